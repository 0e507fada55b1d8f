//! Transformers and global pipelines declared in the `handle` config.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use super::global::GlobalPipelineSpec;
use super::transformer::{BatchTransformer, TransformContext};
use crate::config::{GlobalPipelineConfig, TenantConfig, TransformerSpec};
use crate::core::value::{as_i64, key_fragment, RowDict};
use crate::error::Result;

/// Build a transformer from its declaration.
pub fn build_transformer(spec: &TransformerSpec, tenant: &TenantConfig) -> Arc<dyn BatchTransformer> {
    match spec.clone() {
        TransformerSpec::SetField {
            field,
            value,
            only_if_present,
        } => Arc::new(SetField {
            name: format!("set_field({})", field),
            field,
            value,
            only_if_present,
        }),
        TransformerSpec::DropFields { fields } => Arc::new(DropFields {
            name: format!("drop_fields({})", fields.join(",")),
            fields: fields.into_iter().collect(),
        }),
        TransformerSpec::RenameField { from, to } => Arc::new(RenameField {
            name: format!("rename_field({}->{})", from, to),
            from,
            to,
        }),
        TransformerSpec::FilterValues { field, values, keep } => Arc::new(FilterValues {
            name: format!("filter_values({})", field),
            field,
            values: values.iter().map(key_fragment).collect(),
            keep,
        }),
        TransformerSpec::AssignTenant {
            biz_field,
            tenant_field,
        } => Arc::new(AssignTenant {
            name: format!("assign_tenant({})", tenant_field),
            biz_field,
            tenant_field,
            tenant: tenant.clone(),
        }),
        TransformerSpec::ResolveRelation {
            field,
            model,
            attribute,
            target_field,
        } => Arc::new(ResolveRelation {
            name: format!("resolve_relation({}->{}.{})", field, model, attribute),
            field,
            model,
            attribute,
            target_field,
        }),
        TransformerSpec::RequireRelation { field, model } => Arc::new(RequireRelation {
            name: format!("require_relation({}->{})", field, model),
            field,
            model,
        }),
    }
}

struct SetField {
    name: String,
    field: String,
    value: Value,
    only_if_present: bool,
}

impl BatchTransformer for SetField {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, mut rows: Vec<RowDict>, _: &str, _: &TransformContext<'_>) -> Result<Vec<RowDict>> {
        for row in &mut rows {
            if !self.only_if_present || row.contains_key(&self.field) {
                row.insert(self.field.clone(), self.value.clone());
            }
        }
        Ok(rows)
    }
}

struct DropFields {
    name: String,
    fields: HashSet<String>,
}

impl BatchTransformer for DropFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, mut rows: Vec<RowDict>, _: &str, _: &TransformContext<'_>) -> Result<Vec<RowDict>> {
        for row in &mut rows {
            row.retain(|key, _| !self.fields.contains(key));
        }
        Ok(rows)
    }
}

struct RenameField {
    name: String,
    from: String,
    to: String,
}

impl BatchTransformer for RenameField {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, rows: Vec<RowDict>, _: &str, _: &TransformContext<'_>) -> Result<Vec<RowDict>> {
        Ok(rows
            .into_iter()
            .map(|row| {
                if !row.contains_key(&self.from) {
                    return row;
                }
                // rebuild so the renamed key keeps its position
                row.into_iter()
                    .filter(|(key, _)| *key != self.to)
                    .map(|(key, value)| {
                        if key == self.from {
                            (self.to.clone(), value)
                        } else {
                            (key, value)
                        }
                    })
                    .collect()
            })
            .collect())
    }
}

struct FilterValues {
    name: String,
    field: String,
    values: HashSet<String>,
    keep: bool,
}

impl BatchTransformer for FilterValues {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, mut rows: Vec<RowDict>, _: &str, _: &TransformContext<'_>) -> Result<Vec<RowDict>> {
        rows.retain(|row| {
            let value = row.get(&self.field).unwrap_or(&Value::Null);
            self.values.contains(&key_fragment(value)) == self.keep
        });
        Ok(rows)
    }
}

struct AssignTenant {
    name: String,
    biz_field: String,
    tenant_field: String,
    tenant: TenantConfig,
}

impl BatchTransformer for AssignTenant {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, mut rows: Vec<RowDict>, _: &str, _: &TransformContext<'_>) -> Result<Vec<RowDict>> {
        for row in &mut rows {
            let tenant = match row.get(&self.biz_field).and_then(as_i64) {
                Some(biz) => self.tenant.tenant_for(biz),
                None => self.tenant.default_target_tenant_id.as_str(),
            };
            row.insert(self.tenant_field.clone(), Value::String(tenant.to_string()));
        }
        Ok(rows)
    }
}

struct ResolveRelation {
    name: String,
    field: String,
    model: String,
    attribute: String,
    target_field: String,
}

impl BatchTransformer for ResolveRelation {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, mut rows: Vec<RowDict>, _: &str, ctx: &TransformContext<'_>) -> Result<Vec<RowDict>> {
        for row in &mut rows {
            let resolved = row
                .get(&self.field)
                .and_then(|key| ctx.cache.attribute(&self.model, key, &self.attribute))
                .cloned()
                .unwrap_or(Value::Null);
            row.insert(self.target_field.clone(), resolved);
        }
        Ok(rows)
    }
}

/// Drops rows whose reference is missing from the cache. Rows with a null
/// reference have nothing to check and are kept.
struct RequireRelation {
    name: String,
    field: String,
    model: String,
}

impl BatchTransformer for RequireRelation {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, mut rows: Vec<RowDict>, _: &str, ctx: &TransformContext<'_>) -> Result<Vec<RowDict>> {
        rows.retain(|row| match row.get(&self.field) {
            None | Some(Value::Null) => true,
            Some(key) => ctx.cache.contains(&self.model, key),
        });
        Ok(rows)
    }
}

/// Build a global pipeline from its declaration.
pub fn build_global(config: &GlobalPipelineConfig) -> GlobalPipelineSpec {
    match config.clone() {
        GlobalPipelineConfig::PruneOrphans {
            name,
            parent,
            child,
            foreign_key,
            parent_key,
            prune_parents,
        } => {
            let required = [parent.clone(), child.clone()];
            GlobalPipelineSpec::new(name, required, move |ctx| {
                let parent_keys: HashSet<String> = ctx
                    .get(&parent)?
                    .iter()
                    .filter_map(|row| row.get(&parent_key))
                    .map(key_fragment)
                    .collect();

                let mut children = ctx.take(&child)?;
                children.retain(|row| match row.get(&foreign_key) {
                    None | Some(Value::Null) => true,
                    Some(fk) => parent_keys.contains(&key_fragment(fk)),
                });

                if prune_parents {
                    let referenced: HashSet<String> = children
                        .iter()
                        .filter_map(|row| row.get(&foreign_key))
                        .map(key_fragment)
                        .collect();
                    ctx.get_mut(&parent)?.retain(|row| {
                        row.get(&parent_key)
                            .is_some_and(|key| referenced.contains(&key_fragment(key)))
                    });
                }
                ctx.set(&child, children)
            })
        }
    }
}
