//! Schema manifest: model labels mapped to table, column, key and
//! constraint metadata.
//!
//! The manifest is an explicit declaration loaded from a YAML or JSON file.
//! Engines only see it through the [`SchemaRegistry`] trait.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::identifier::parse_model_label;
use crate::error::{MigrateError, Result};

/// How exported values of a field are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Emitted as returned by the driver.
    #[default]
    Plain,
    /// 0/1 integers emitted as JSON booleans.
    Bool,
    /// JSON text parsed into a JSON value.
    Json,
}

/// One concrete field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// ORM field name (keys of exported rows).
    pub name: String,
    /// Database column.
    pub column: String,
    #[serde(default)]
    pub kind: FieldKind,
}

/// Primary key metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkMeta {
    pub field: String,
    pub column: String,
    #[serde(default)]
    pub auto_increment: bool,
}

/// Model metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeta {
    /// `app_label.ModelName`.
    pub label: String,
    /// Table name.
    pub table: String,
    /// Primary key, if the model has one.
    pub pk: Option<PkMeta>,
    /// Concrete fields in declaration order.
    pub fields: Vec<FieldMeta>,
    /// unique_together tuples.
    pub unique_together: Vec<Vec<String>>,
    /// UniqueConstraint field lists.
    pub unique_constraints: Vec<Vec<String>>,
}

impl ModelMeta {
    pub fn app_label(&self) -> &str {
        self.label.split_once('.').map(|(app, _)| app).unwrap_or("")
    }

    pub fn model_name(&self) -> &str {
        self.label
            .split_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.label)
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Column backing a field; unknown fields are assumed to share the name.
    pub fn column_for<'a>(&'a self, field: &'a str) -> &'a str {
        self.field(field).map(|f| f.column.as_str()).unwrap_or(field)
    }

    /// Whether the primary key is an integer auto-increment field.
    pub fn has_auto_increment_pk(&self) -> bool {
        self.pk.as_ref().is_some_and(|pk| pk.auto_increment)
    }

    /// Unique key used for conflict detection, in order of preference:
    /// first unique_together tuple, first UniqueConstraint, primary key.
    pub fn unique_key(&self) -> Option<Vec<String>> {
        self.unique_together
            .iter()
            .chain(&self.unique_constraints)
            .find(|fields| !fields.is_empty())
            .cloned()
            .or_else(|| self.pk.as_ref().map(|pk| vec![pk.field.clone()]))
    }
}

/// Model lookup consumed by the engines.
pub trait SchemaRegistry: Send + Sync {
    /// Metadata for one model label.
    fn get_model(&self, label: &str) -> Option<&ModelMeta>;

    /// Labels of all models declared by an app, in declaration order.
    fn list_models(&self, app_label: &str) -> Vec<String>;

    /// Metadata for one model label, failing with `ModelNotFound`.
    fn require_model(&self, label: &str) -> Result<&ModelMeta> {
        self.get_model(label)
            .ok_or_else(|| MigrateError::ModelNotFound(label.to_string()))
    }
}

/// Field declaration: a bare name, or a full mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FieldDecl {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        kind: FieldKind,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct ModelDecl {
    label: String,
    table: String,
    #[serde(default)]
    pk: Option<PkMeta>,
    fields: Vec<FieldDecl>,
    #[serde(default)]
    unique_together: Vec<Vec<String>>,
    #[serde(default)]
    unique_constraints: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestFile {
    models: Vec<ModelDecl>,
}

/// In-memory schema manifest.
#[derive(Debug, Clone, Default)]
pub struct SchemaManifest {
    models: Vec<ModelMeta>,
    index: HashMap<String, usize>,
}

impl SchemaManifest {
    /// Load a manifest from a `.json`, `.yaml` or `.yml` file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::Config(format!(
                "cannot read schema manifest {}: {}",
                path.display(),
                e
            ))
        })?;
        let file: ManifestFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Self::from_decls(file.models)
    }

    /// Parse a manifest from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: ManifestFile = serde_yaml::from_str(yaml)?;
        Self::from_decls(file.models)
    }

    /// Build a manifest from already-assembled metadata.
    pub fn from_models(models: Vec<ModelMeta>) -> Result<Self> {
        let mut manifest = Self::default();
        for model in models {
            manifest.insert(model)?;
        }
        Ok(manifest)
    }

    fn from_decls(decls: Vec<ModelDecl>) -> Result<Self> {
        let models = decls
            .into_iter()
            .map(|decl| {
                let fields = decl
                    .fields
                    .into_iter()
                    .map(|f| match f {
                        FieldDecl::Name(name) => FieldMeta {
                            column: name.clone(),
                            name,
                            kind: FieldKind::Plain,
                        },
                        FieldDecl::Full { name, column, kind } => FieldMeta {
                            column: column.unwrap_or_else(|| name.clone()),
                            name,
                            kind,
                        },
                    })
                    .collect();
                ModelMeta {
                    label: decl.label,
                    table: decl.table,
                    pk: decl.pk,
                    fields,
                    unique_together: decl.unique_together,
                    unique_constraints: decl.unique_constraints,
                }
            })
            .collect();
        Self::from_models(models)
    }

    fn insert(&mut self, model: ModelMeta) -> Result<()> {
        parse_model_label(&model.label)?;
        if self.index.contains_key(&model.label) {
            return Err(MigrateError::Config(format!(
                "model {} is declared twice in the schema manifest",
                model.label
            )));
        }
        if let Some(pk) = &model.pk {
            if model.field(&pk.field).is_none() {
                return Err(MigrateError::Config(format!(
                    "primary key {} of {} is not a declared field",
                    pk.field, model.label
                )));
            }
        }
        self.index.insert(model.label.clone(), self.models.len());
        self.models.push(model);
        Ok(())
    }

    /// All models in declaration order.
    pub fn models(&self) -> &[ModelMeta] {
        &self.models
    }
}

impl SchemaRegistry for SchemaManifest {
    fn get_model(&self, label: &str) -> Option<&ModelMeta> {
        self.index.get(label).map(|&i| &self.models[i])
    }

    fn list_models(&self, app_label: &str) -> Vec<String> {
        self.models
            .iter()
            .filter(|m| m.app_label() == app_label)
            .map(|m| m.label.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
models:
  - label: demo.Item
    table: demo_item
    pk: { field: id, column: id, auto_increment: true }
    fields:
      - id
      - name
      - { name: enabled, column: is_enabled, kind: bool }
  - label: demo.Tag
    table: demo_tag
    pk: { field: id, column: id }
    fields: [id, item_id, tag]
    unique_together: [[item_id, tag]]
  - label: other.Log
    table: other_log
    fields: [message]
"#;

    #[test]
    fn test_load_manifest() {
        let manifest = SchemaManifest::from_yaml(MANIFEST).unwrap();
        let item = manifest.get_model("demo.Item").unwrap();
        assert_eq!(item.app_label(), "demo");
        assert_eq!(item.model_name(), "Item");
        assert_eq!(item.column_for("enabled"), "is_enabled");
        assert_eq!(item.field("enabled").unwrap().kind, FieldKind::Bool);
        assert!(item.has_auto_increment_pk());
        assert!(manifest.get_model("demo.Missing").is_none());
    }

    #[test]
    fn test_list_models_keeps_declaration_order() {
        let manifest = SchemaManifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(manifest.list_models("demo"), vec!["demo.Item", "demo.Tag"]);
        assert!(manifest.list_models("nope").is_empty());
    }

    #[test]
    fn test_unique_key_preference() {
        let manifest = SchemaManifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(
            manifest.get_model("demo.Tag").unwrap().unique_key(),
            Some(vec!["item_id".to_string(), "tag".to_string()])
        );
        assert_eq!(
            manifest.get_model("demo.Item").unwrap().unique_key(),
            Some(vec!["id".to_string()])
        );
        assert_eq!(manifest.get_model("other.Log").unwrap().unique_key(), None);
    }

    #[test]
    fn test_unique_constraint_used_before_pk() {
        let mut model = SchemaManifest::from_yaml(MANIFEST)
            .unwrap()
            .get_model("demo.Item")
            .cloned()
            .unwrap();
        model.unique_constraints = vec![vec!["name".into()]];
        assert_eq!(model.unique_key(), Some(vec!["name".to_string()]));
    }

    #[test]
    fn test_duplicate_model_rejected() {
        let yaml = r#"
models:
  - { label: a.X, table: x, fields: [id] }
  - { label: a.X, table: x2, fields: [id] }
"#;
        assert!(SchemaManifest::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_require_model_reports_not_found() {
        let manifest = SchemaManifest::from_yaml(MANIFEST).unwrap();
        assert!(matches!(
            manifest.require_model("x.Y"),
            Err(MigrateError::ModelNotFound(label)) if label == "x.Y"
        ));
    }
}
