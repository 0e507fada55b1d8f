//! Configuration type definitions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database connection (MySQL/MariaDB). Required by export, import and
    /// set-auto-increment; handle runs without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    /// Path to the schema manifest. Relative paths resolve against the
    /// directory of the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_manifest: Option<PathBuf>,

    /// Export behaviour.
    #[serde(default)]
    pub export: ExportConfig,

    /// Import behaviour.
    #[serde(default)]
    pub import: ImportConfig,

    /// Tenant rewriting.
    #[serde(default)]
    pub tenant: TenantConfig,

    /// Handle registry: transformer chains, global pipelines, partitioning.
    #[serde(default)]
    pub handle: HandleConfig,
}

/// Database connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// TLS mode (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Models exported when none are given on the command line.
    #[serde(default)]
    pub default_models: Vec<String>,

    /// Models (or whole apps) never exported.
    #[serde(default)]
    pub exclude_models: Vec<String>,

    /// Per-model WHERE fragments, without the WHERE keyword.
    #[serde(default)]
    pub sql_filters: HashMap<String, String>,

    /// Rows per keyset page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_models: Vec::new(),
            exclude_models: Vec::new(),
            sql_filters: HashMap::new(),
            batch_size: default_batch_size(),
        }
    }
}

/// Import configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Import order: higher priority first, default 0.
    #[serde(default)]
    pub table_priority: HashMap<String, i64>,

    /// Rows per write batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            table_priority: HashMap::new(),
            batch_size: default_batch_size(),
        }
    }
}

/// Tenant configuration used by the `assign_tenant` transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Business id to tenant id.
    #[serde(default)]
    pub biz_tenant_id_mapping: BTreeMap<i64, String>,

    /// Tenant for businesses missing from the mapping.
    #[serde(default = "default_tenant")]
    pub default_target_tenant_id: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            biz_tenant_id_mapping: BTreeMap::new(),
            default_target_tenant_id: default_tenant(),
        }
    }
}

impl TenantConfig {
    /// Tenant id for a business.
    pub fn tenant_for(&self, bk_biz_id: i64) -> &str {
        self.biz_tenant_id_mapping
            .get(&bk_biz_id)
            .map(String::as_str)
            .unwrap_or(&self.default_target_tenant_id)
    }
}

/// Handle registry and partitioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleConfig {
    /// Per-model transformer chains; the `*` key applies to every model.
    #[serde(default)]
    pub table_pipelines: BTreeMap<String, Vec<TransformerSpec>>,

    /// Cross-table passes, run in declared order.
    #[serde(default)]
    pub global_pipelines: Vec<GlobalPipelineConfig>,

    /// Models indexed into the relation cache.
    #[serde(default)]
    pub cache_sources: Vec<CacheSource>,

    /// Additional models preloaded into the relation cache.
    #[serde(default)]
    pub extra_preload_models: Vec<CacheSource>,

    /// Model enumerating tenants (spaces).
    #[serde(default = "default_space_model")]
    pub space_model: String,

    /// Models never partitioned by business.
    #[serde(default)]
    pub global_tables: Vec<String>,

    /// Per-model biz id rules for `--split-by-biz`.
    #[serde(default)]
    pub biz_rules: BTreeMap<String, BizRule>,

    /// Rows per transform chunk.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            table_pipelines: BTreeMap::new(),
            global_pipelines: Vec::new(),
            cache_sources: Vec::new(),
            extra_preload_models: Vec::new(),
            space_model: default_space_model(),
            global_tables: Vec::new(),
            biz_rules: BTreeMap::new(),
            batch_size: default_batch_size(),
        }
    }
}

/// A model indexed into the relation cache by one of its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSource {
    pub model: String,
    #[serde(default = "default_key_field")]
    pub key: String,
}

/// Declarative batch transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformerSpec {
    /// Overwrite a field with a constant.
    SetField {
        field: String,
        value: Value,
        /// Only touch rows that already carry the field.
        #[serde(default = "default_true")]
        only_if_present: bool,
    },

    /// Remove fields from every row.
    DropFields { fields: Vec<String> },

    /// Rename a field.
    RenameField { from: String, to: String },

    /// Keep (or drop) rows whose field value is one of `values`.
    FilterValues {
        field: String,
        values: Vec<Value>,
        #[serde(default = "default_true")]
        keep: bool,
    },

    /// Set the tenant field from the row's business id.
    AssignTenant {
        #[serde(default = "default_biz_field")]
        biz_field: String,
        #[serde(default = "default_tenant_field")]
        tenant_field: String,
    },

    /// Copy an attribute from the related row found in the relation cache.
    ResolveRelation {
        field: String,
        model: String,
        attribute: String,
        target_field: String,
    },

    /// Drop rows whose reference is absent from the relation cache.
    RequireRelation { field: String, model: String },
}

/// Declarative global pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GlobalPipelineConfig {
    /// Drop children whose parent row is gone; optionally drop parents
    /// left without children.
    PruneOrphans {
        name: String,
        parent: String,
        child: String,
        foreign_key: String,
        #[serde(default = "default_key_field")]
        parent_key: String,
        #[serde(default)]
        prune_parents: bool,
    },
}

/// How a row's business id is derived when splitting by business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum BizRule {
    /// The row carries the biz id in a field.
    Field { field: String },

    /// The row carries a space uid (`<space_type>__<space_id>`).
    SpaceUid { field: String },

    /// The biz id is an attribute of a related row in the relation cache.
    Relation {
        field: String,
        model: String,
        attribute: String,
    },

    /// The row is a space itself.
    Space,
}

// Default value functions for serde
fn default_mysql_port() -> u16 {
    3306
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_batch_size() -> usize {
    1_000
}

fn default_tenant() -> String {
    "system".to_string()
}

fn default_space_model() -> String {
    "metadata.Space".to_string()
}

fn default_key_field() -> String {
    "id".to_string()
}

fn default_biz_field() -> String {
    "bk_biz_id".to_string()
}

fn default_tenant_field() -> String {
    "bk_tenant_id".to_string()
}

fn default_true() -> bool {
    true
}
