//! Export engine: keyset-paginated extraction into a JSON corpus.
//!
//! Models are exported in selection order. Models required by a global
//! pipeline are deferred: their rows are collected in memory, run through the
//! global pipelines after every other model, and written last.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::identifier::{is_app_selector, parse_model_label};
use crate::core::schema::{ModelMeta, SchemaRegistry};
use crate::core::traits::{QueryRows, SqlExecutor};
use crate::core::value::{assemble_row, ExportBatch, RowDict};
use crate::corpus::{
    write_atomic, write_payload, AutoIncrementItem, AutoIncrementReport, OutputCorpus,
    PayloadWriter, WrittenPayload, EXPORT_REPORT,
};
use crate::drivers::mysql::dialect::{validate_filter_fragment, MysqlDialect};
use crate::error::{MigrateError, Result};
use crate::pipeline::{run_global_pipelines, HandleRegistry, RelationCache, TransformContext};
use crate::report::{render_export_report, ModelStatus};

/// Export command options.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Model selectors (`app.Model` or bare `app`); empty means the
    /// configured default models.
    pub models: Vec<String>,
    /// Output directory or `.zip`.
    pub out: PathBuf,
    /// Write payloads with no rows.
    pub write_empty_file: bool,
    /// Apply table transformers and global pipelines.
    pub enable_handle: bool,
    /// Rows per page, overriding `export.batch_size`.
    pub batch_size: Option<usize>,
}

/// Outcome for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelExport {
    pub model: String,
    /// Rows written.
    pub rows: usize,
    /// Rows dropped by batch transformers and global pipelines.
    pub filtered: usize,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub bytes: u64,
    pub status: ModelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelExport {
    fn failed(model: &str, error: &MigrateError, duration_seconds: f64) -> Self {
        Self {
            model: model.to_string(),
            rows: 0,
            filtered: 0,
            duration_seconds,
            file: None,
            bytes: 0,
            status: ModelStatus::Failed,
            error: Some(error.to_string()),
        }
    }

    fn written(
        model: &str,
        written: Option<WrittenPayload>,
        filtered: usize,
        duration_seconds: f64,
    ) -> Self {
        let (rows, bytes, file) = match written {
            Some(w) => (w.rows, w.bytes, Some(w.path)),
            None => (0, 0, None),
        };
        Self {
            model: model.to_string(),
            rows,
            filtered,
            duration_seconds,
            file,
            bytes,
            status: ModelStatus::Ok,
            error: None,
        }
    }
}

/// Result of an export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub output: PathBuf,
    pub models: Vec<ModelExport>,
    pub rows_exported: usize,
    pub failed_models: Vec<String>,
}

impl ExportResult {
    pub fn is_success(&self) -> bool {
        self.failed_models.is_empty()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Export engine.
pub struct ExportEngine<'a> {
    config: &'a Config,
    schema: &'a dyn SchemaRegistry,
    registry: HandleRegistry,
    dialect: MysqlDialect,
}

impl<'a> ExportEngine<'a> {
    pub fn new(config: &'a Config, schema: &'a dyn SchemaRegistry) -> Self {
        Self {
            config,
            schema,
            registry: HandleRegistry::from_config(&config.handle, &config.tenant),
            dialect: MysqlDialect::new(),
        }
    }

    /// Replace the registry built from the config.
    pub fn with_registry(mut self, registry: HandleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Expand selectors, de-duplicate, subtract exclusions and add the
    /// models global pipelines need.
    pub fn resolve_models(&self, requested: &[String], enable_handle: bool) -> Result<Vec<String>> {
        let excluded: HashSet<String> = self
            .expand(&self.config.export.exclude_models, false)?
            .into_iter()
            .collect();
        let mut models: Vec<String> = self
            .expand(requested, true)?
            .into_iter()
            .filter(|m| !excluded.contains(m))
            .collect();

        if enable_handle {
            for spec in &self.registry.globals {
                for model in &spec.required_models {
                    if excluded.contains(model) {
                        return Err(MigrateError::RequiredModelExcluded {
                            model: model.clone(),
                            pipeline: spec.name.clone(),
                        });
                    }
                    if !models.contains(model) {
                        debug!("Adding {} required by global pipeline {}", model, spec.name);
                        models.push(model.clone());
                    }
                }
            }
        }
        Ok(models)
    }

    fn expand(&self, selectors: &[String], strict: bool) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut models = Vec::new();
        for selector in selectors {
            let selector = selector.trim();
            let expanded = if is_app_selector(selector) {
                let labels = self.schema.list_models(selector);
                if labels.is_empty() && strict {
                    return Err(MigrateError::ModelNotFound(selector.to_string()));
                }
                labels
            } else {
                parse_model_label(selector)?;
                vec![selector.to_string()]
            };
            for label in expanded {
                if seen.insert(label.clone()) {
                    models.push(label);
                }
            }
        }
        Ok(models)
    }

    /// Run the export.
    pub async fn run(
        &self,
        executor: &mut dyn SqlExecutor,
        options: &ExportOptions,
    ) -> Result<ExportResult> {
        let started_at = Utc::now();
        let timer = Instant::now();

        let requested = if options.models.is_empty() {
            &self.config.export.default_models
        } else {
            &options.models
        };
        if requested.is_empty() {
            return Err(MigrateError::Config(
                "no models to export: pass --model or set export.default_models".into(),
            ));
        }
        let batch_size = options.batch_size.unwrap_or(self.config.export.batch_size);
        if batch_size == 0 {
            return Err(MigrateError::Config("batch size must be at least 1".into()));
        }

        let labels = self.resolve_models(requested, options.enable_handle)?;
        for (label, fragment) in &self.config.export.sql_filters {
            validate_filter_fragment(label, fragment)?;
        }
        let metas = labels
            .iter()
            .map(|label| {
                let meta = self.schema.require_model(label)?;
                if meta.pk.is_none() {
                    return Err(MigrateError::ModelHasNoPrimaryKey(label.clone()));
                }
                Ok(meta)
            })
            .collect::<Result<Vec<_>>>()?;

        let deferred: BTreeSet<String> = if options.enable_handle {
            self.registry.required_models()
        } else {
            BTreeSet::new()
        };

        let output = OutputCorpus::open(&options.out)?;
        info!(
            "Exporting {} models to {} (batch size {})",
            metas.len(),
            options.out.display(),
            batch_size
        );

        let cache = RelationCache::new();
        let mut results = Vec::with_capacity(metas.len());

        for meta in metas.iter().filter(|m| !deferred.contains(&m.label)) {
            let model_timer = Instant::now();
            let mut writer =
                PayloadWriter::create(output.root(), &meta.label, options.write_empty_file)?;
            let outcome = self
                .pump(executor, meta, batch_size, options.enable_handle, &cache, |rows| {
                    writer.write_rows(&rows)
                })
                .await;
            let result = match outcome {
                Ok(filtered) => ModelExport::written(
                    &meta.label,
                    writer.finish()?,
                    filtered,
                    model_timer.elapsed().as_secs_f64(),
                ),
                Err(e @ MigrateError::Transformer { .. }) => {
                    warn!("{}: export aborted: {}", meta.label, e);
                    drop(writer);
                    ModelExport::failed(&meta.label, &e, model_timer.elapsed().as_secs_f64())
                }
                Err(e) => return Err(e),
            };
            info!(
                "{}: {} rows ({} filtered)",
                result.model, result.rows, result.filtered
            );
            results.push(result);
        }

        let deferred_metas: Vec<&ModelMeta> = metas
            .iter()
            .copied()
            .filter(|m| deferred.contains(&m.label))
            .collect();
        if !deferred_metas.is_empty() {
            results.extend(
                self.export_deferred(executor, &deferred_metas, batch_size, options, &cache, &output)
                    .await?,
            );
        }

        let items: Vec<AutoIncrementItem> = results
            .iter()
            .filter(|r| r.status == ModelStatus::Ok)
            .filter(|r| {
                self.schema
                    .get_model(&r.model)
                    .is_some_and(ModelMeta::has_auto_increment_pk)
            })
            .map(|r| AutoIncrementItem {
                model: r.model.clone(),
                total_rows: r.rows as u64,
            })
            .collect();
        if !items.is_empty() {
            AutoIncrementReport { items }.save(output.root())?;
        }

        let failed_models: Vec<String> = results
            .iter()
            .filter(|r| r.status == ModelStatus::Failed)
            .map(|r| r.model.clone())
            .collect();
        let mut result = ExportResult {
            started_at,
            completed_at: Utc::now(),
            duration_seconds: timer.elapsed().as_secs_f64(),
            output: options.out.clone(),
            rows_exported: results.iter().map(|r| r.rows).sum(),
            models: results,
            failed_models,
        };
        write_atomic(
            &output.root().join(EXPORT_REPORT),
            render_export_report(&result).as_bytes(),
        )?;
        result.output = output.finish()?;
        result.completed_at = Utc::now();
        result.duration_seconds = timer.elapsed().as_secs_f64();

        info!(
            "Export finished: {} rows in {} models, {} failed",
            result.rows_exported,
            result.models.len(),
            result.failed_models.len()
        );
        Ok(result)
    }

    async fn export_deferred(
        &self,
        executor: &mut dyn SqlExecutor,
        metas: &[&ModelMeta],
        batch_size: usize,
        options: &ExportOptions,
        cache: &RelationCache,
        output: &OutputCorpus,
    ) -> Result<Vec<ModelExport>> {
        let mut workspace: BTreeMap<String, Vec<RowDict>> = BTreeMap::new();
        let mut filtered: BTreeMap<String, usize> = BTreeMap::new();
        let mut durations: BTreeMap<String, f64> = BTreeMap::new();
        let mut failures: Vec<ModelExport> = Vec::new();

        for meta in metas {
            let model_timer = Instant::now();
            let mut rows = Vec::new();
            let outcome = self
                .pump(executor, meta, batch_size, true, cache, |batch| {
                    rows.extend(batch);
                    Ok(())
                })
                .await;
            match outcome {
                Ok(dropped) => {
                    debug!("{}: holding {} rows for global pipelines", meta.label, rows.len());
                    workspace.insert(meta.label.clone(), rows);
                    filtered.insert(meta.label.clone(), dropped);
                    durations.insert(meta.label.clone(), model_timer.elapsed().as_secs_f64());
                }
                Err(e @ MigrateError::Transformer { .. }) => {
                    warn!("{}: export aborted: {}", meta.label, e);
                    failures.push(ModelExport::failed(
                        &meta.label,
                        &e,
                        model_timer.elapsed().as_secs_f64(),
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        if failures.is_empty() {
            let global_timer = Instant::now();
            let dropped = run_global_pipelines(&self.registry.globals, &mut workspace)?;
            let share = global_timer.elapsed().as_secs_f64() / workspace.len().max(1) as f64;
            for (model, count) in dropped {
                *filtered.entry(model.clone()).or_default() += count;
                *durations.entry(model).or_default() += share;
            }
        } else {
            warn!(
                "Skipping global pipelines: {} required models failed",
                failures.len()
            );
        }

        let mut results = failures;
        for meta in metas {
            let Some(rows) = workspace.remove(&meta.label) else {
                continue;
            };
            let written = write_payload(output.root(), &meta.label, &rows, options.write_empty_file)?;
            let result = ModelExport::written(
                &meta.label,
                written,
                filtered.get(&meta.label).copied().unwrap_or(0),
                durations.get(&meta.label).copied().unwrap_or(0.0),
            );
            info!(
                "{}: {} rows ({} filtered)",
                result.model, result.rows, result.filtered
            );
            results.push(result);
        }
        Ok(results)
    }

    /// Page through a model, transforming each batch and handing the
    /// surviving rows to `emit`. Returns the number of rows dropped.
    async fn pump<F>(
        &self,
        executor: &mut dyn SqlExecutor,
        meta: &ModelMeta,
        batch_size: usize,
        transform: bool,
        cache: &RelationCache,
        mut emit: F,
    ) -> Result<usize>
    where
        F: FnMut(Vec<RowDict>) -> Result<()>,
    {
        let filter = self.config.export.sql_filters.get(&meta.label).map(String::as_str);
        let mut pager = KeysetPager::new(&self.dialect, meta, filter, batch_size)?;
        let ctx = TransformContext::new(cache);
        let mut dropped = 0;
        let mut pages = 0;

        while let Some(batch) = pager.next_batch(executor).await? {
            pages += 1;
            let rows = if transform {
                let (rows, count) = self.registry.tables.apply(&meta.label, batch.rows, &ctx)?;
                dropped += count;
                rows
            } else {
                batch.rows
            };
            debug!("{}: page {} -> {} rows", meta.label, pages, rows.len());
            emit(rows)?;
        }
        Ok(dropped)
    }
}

/// Keyset pagination over one model.
pub struct KeysetPager<'m> {
    meta: &'m ModelMeta,
    first_sql: String,
    next_sql: String,
    batch_size: usize,
    last_key: Option<Value>,
    pk_index: Option<usize>,
    exhausted: bool,
}

impl<'m> KeysetPager<'m> {
    pub fn new(
        dialect: &MysqlDialect,
        meta: &'m ModelMeta,
        filter: Option<&str>,
        batch_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            meta,
            first_sql: dialect.build_page_query(meta, filter, false)?,
            next_sql: dialect.build_page_query(meta, filter, true)?,
            batch_size,
            last_key: None,
            pk_index: None,
            exhausted: false,
        })
    }

    /// Fetch the next page; `None` once a page comes back empty.
    pub async fn next_batch(
        &mut self,
        executor: &mut dyn SqlExecutor,
    ) -> Result<Option<ExportBatch>> {
        if self.exhausted {
            return Ok(None);
        }
        let (sql, mut params) = match &self.last_key {
            Some(key) => (self.next_sql.as_str(), vec![key.clone()]),
            None => (self.first_sql.as_str(), Vec::new()),
        };
        params.push(json!(self.batch_size));

        let QueryRows { columns, rows } = executor.query(sql, params).await?;
        if rows.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let pk_index = match self.pk_index {
            Some(index) => index,
            None => {
                let pk_field = self
                    .meta
                    .pk
                    .as_ref()
                    .map(|pk| pk.field.as_str())
                    .ok_or_else(|| MigrateError::ModelHasNoPrimaryKey(self.meta.label.clone()))?;
                let index = columns.iter().position(|c| c == pk_field).ok_or_else(|| {
                    MigrateError::Query(format!(
                        "primary key {} missing from the result of {}",
                        pk_field, self.meta.label
                    ))
                })?;
                self.pk_index = Some(index);
                index
            }
        };

        let last_key = rows
            .last()
            .and_then(|row| row.get(pk_index))
            .cloned()
            .filter(|key| !key.is_null());
        if last_key.is_none() {
            self.exhausted = true;
        }
        self.last_key = last_key.clone();

        let rows = rows
            .into_iter()
            .map(|values| assemble_row(self.meta, &columns, values))
            .collect();
        Ok(Some(ExportBatch::new(rows, last_key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::SchemaManifest;
    use crate::corpus::{read_payload, InputCorpus, AUTO_INCREMENT_REPORT};
    use crate::pipeline::GlobalPipelineSpec;
    use crate::testing::MemoryExecutor;
    use tempfile::TempDir;

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
  - label: a.Customer
    table: a_customer
    pk: { field: id, column: id }
    fields: [id, name]
  - label: a.Order
    table: a_order
    pk: { field: id, column: id }
    fields: [id, customer_id]
  - label: other.Log
    table: other_log
    fields: [message]
"#;

    fn manifest() -> SchemaManifest {
        SchemaManifest::from_yaml(MANIFEST).unwrap()
    }

    fn items_db() -> MemoryExecutor {
        MemoryExecutor::new()
            .with_table(
                "demo_item",
                "id",
                json!([
                    {"id": 1, "name": "a", "is_enabled": 1},
                    {"id": 2, "name": "b", "is_enabled": 1},
                    {"id": 3, "name": "c", "is_enabled": 0}
                ]),
            )
            .with_table("demo_tag", "id", json!([]))
    }

    fn options(out: &std::path::Path, models: &[&str]) -> ExportOptions {
        ExportOptions {
            models: models.iter().map(|m| m.to_string()).collect(),
            out: out.to_path_buf(),
            write_empty_file: false,
            enable_handle: false,
            batch_size: Some(2),
        }
    }

    #[tokio::test]
    async fn test_single_table_export() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let schema = manifest();
        let mut db = items_db();

        let result = ExportEngine::new(&config, &schema)
            .run(&mut db, &options(dir.path(), &["demo.Item"]))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.rows_exported, 3);
        let payload = read_payload(&dir.path().join("demo/Item.json")).unwrap();
        assert_eq!(payload.model, "demo.Item");
        assert_eq!(payload.stats.total, 3);
        assert_eq!(
            Value::Array(payload.data.into_iter().map(Value::Object).collect()),
            json!([
                {"id": 1, "name": "a", "enabled": true},
                {"id": 2, "name": "b", "enabled": true},
                {"id": 3, "name": "c", "enabled": false}
            ])
        );

        let report = AutoIncrementReport::load(dir.path()).unwrap().unwrap();
        assert_eq!(
            report.items,
            vec![AutoIncrementItem {
                model: "demo.Item".to_string(),
                total_rows: 3
            }]
        );
        assert!(dir.path().join(AUTO_INCREMENT_REPORT).exists());
        let markdown = std::fs::read_to_string(dir.path().join(EXPORT_REPORT)).unwrap();
        assert!(markdown.contains("| demo.Item | 3 | 0 |"));
    }

    #[tokio::test]
    async fn test_every_batch_size_yields_each_row_once_in_order() {
        let rows: Vec<Value> = [5, 1, 9, 3, 7, 2, 8]
            .iter()
            .map(|id| json!({"id": id, "name": format!("n{}", id), "is_enabled": 1}))
            .collect();
        let config = Config::default();
        let schema = manifest();

        for batch_size in 1..=8 {
            let dir = TempDir::new().unwrap();
            let mut db = MemoryExecutor::new().with_table("demo_item", "id", Value::Array(rows.clone()));
            let mut opts = options(dir.path(), &["demo.Item"]);
            opts.batch_size = Some(batch_size);

            ExportEngine::new(&config, &schema).run(&mut db, &opts).await.unwrap();

            let payload = read_payload(&dir.path().join("demo/Item.json")).unwrap();
            let ids: Vec<i64> = payload.data.iter().map(|r| r["id"].as_i64().unwrap()).collect();
            assert_eq!(ids, vec![1, 2, 3, 5, 7, 8, 9], "batch size {}", batch_size);
        }
    }

    #[tokio::test]
    async fn test_wildcard_transformer_rewrites_without_dropping() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let schema = manifest();
        let mut db = items_db();
        let mut registry = HandleRegistry::new();
        registry.tables.register_fn("*", "disable_enabled", |mut rows, _, _| {
            for row in &mut rows {
                if row.contains_key("enabled") {
                    row.insert("enabled".to_string(), json!(false));
                }
            }
            Ok(rows)
        });
        let mut opts = options(dir.path(), &["demo.Item"]);
        opts.enable_handle = true;

        let result = ExportEngine::new(&config, &schema)
            .with_registry(registry)
            .run(&mut db, &opts)
            .await
            .unwrap();

        assert_eq!(result.models[0].filtered, 0);
        let payload = read_payload(&dir.path().join("demo/Item.json")).unwrap();
        assert!(payload.data.iter().all(|r| r["enabled"] == json!(false)));
        assert_eq!(payload.data.len(), 3);
    }

    #[tokio::test]
    async fn test_transformers_only_run_with_handle_enabled() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let schema = manifest();
        let mut db = items_db();
        let mut registry = HandleRegistry::new();
        registry
            .tables
            .register_fn("demo.Item", "drop_all", |_, _, _| Ok(Vec::new()));

        let result = ExportEngine::new(&config, &schema)
            .with_registry(registry)
            .run(&mut db, &options(dir.path(), &["demo.Item"]))
            .await
            .unwrap();
        assert_eq!(result.rows_exported, 3);
    }

    #[tokio::test]
    async fn test_filtered_rows_are_counted() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let schema = manifest();
        let mut db = items_db();
        let mut registry = HandleRegistry::new();
        registry.tables.register_fn("demo.Item", "drop_b", |rows, _, _| {
            Ok(rows.into_iter().filter(|r| r["name"] != json!("b")).collect())
        });
        let mut opts = options(dir.path(), &["demo.Item"]);
        opts.enable_handle = true;

        let result = ExportEngine::new(&config, &schema)
            .with_registry(registry)
            .run(&mut db, &opts)
            .await
            .unwrap();

        assert_eq!(result.models[0].rows, 2);
        assert_eq!(result.models[0].filtered, 1);
    }

    #[tokio::test]
    async fn test_empty_file_policy() {
        let config = Config::default();
        let schema = manifest();

        let dir = TempDir::new().unwrap();
        let mut db = items_db();
        let result = ExportEngine::new(&config, &schema)
            .run(&mut db, &options(dir.path(), &["demo.Tag"]))
            .await
            .unwrap();
        assert!(result.models[0].file.is_none());
        assert!(!dir.path().join("demo/Tag.json").exists());

        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path(), &["demo.Tag"]);
        opts.write_empty_file = true;
        ExportEngine::new(&config, &schema).run(&mut db, &opts).await.unwrap();
        let payload = read_payload(&dir.path().join("demo/Tag.json")).unwrap();
        assert!(payload.data.is_empty());
        assert_eq!(payload.stats.total, 0);
    }

    #[tokio::test]
    async fn test_transformer_failure_marks_model_failed_and_continues() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let schema = manifest();
        let mut db = items_db().with_table("a_customer", "id", json!([{"id": 1, "name": "x"}]));
        let mut registry = HandleRegistry::new();
        registry.tables.register_fn("demo.Item", "explode", |_, _, _| {
            Err(MigrateError::Config("boom".into()))
        });
        let mut opts = options(dir.path(), &["demo.Item", "a.Customer"]);
        opts.enable_handle = true;

        let result = ExportEngine::new(&config, &schema)
            .with_registry(registry)
            .run(&mut db, &opts)
            .await
            .unwrap();

        assert_eq!(result.failed_models, vec!["demo.Item"]);
        assert_eq!(result.models[0].status, ModelStatus::Failed);
        assert!(result.models[0].error.as_deref().unwrap().contains("explode"));
        assert!(!dir.path().join("demo/Item.json").exists());
        assert!(!dir.path().join("demo/Item.json.tmp").exists());
        assert!(dir.path().join("a/Customer.json").exists());
        assert!(dir.path().join(EXPORT_REPORT).exists());
    }

    #[tokio::test]
    async fn test_database_error_aborts_without_report() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let schema = manifest();
        let mut db = items_db();

        let err = ExportEngine::new(&config, &schema)
            .run(&mut db, &options(dir.path(), &["demo.Item", "a.Customer"]))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Query(_)));
        assert!(!dir.path().join(EXPORT_REPORT).exists());
    }

    #[tokio::test]
    async fn test_global_pipeline_runs_on_deferred_models() {
        let dir = TempDir::new().unwrap();
        let config = Config::from_yaml(
            r#"
handle:
  table_pipelines:
    a.Customer:
      - { kind: filter_values, field: id, values: [20], keep: false }
  global_pipelines:
    - kind: prune_orphans
      name: orders
      parent: a.Customer
      child: a.Order
      foreign_key: customer_id
      prune_parents: true
"#,
        )
        .unwrap();
        let schema = manifest();
        let mut db = items_db()
            .with_table(
                "a_customer",
                "id",
                json!([{"id": 10, "name": "x"}, {"id": 20, "name": "y"}]),
            )
            .with_table(
                "a_order",
                "id",
                json!([{"id": 1, "customer_id": 10}, {"id": 2, "customer_id": 20}]),
            );
        let mut opts = options(dir.path(), &["a.Customer", "demo.Item"]);
        opts.enable_handle = true;

        let result = ExportEngine::new(&config, &schema)
            .run(&mut db, &opts)
            .await
            .unwrap();

        let order: Vec<&str> = result.models.iter().map(|m| m.model.as_str()).collect();
        assert_eq!(order, vec!["demo.Item", "a.Customer", "a.Order"]);
        let orders = read_payload(&dir.path().join("a/Order.json")).unwrap();
        assert_eq!(
            Value::Array(orders.data.into_iter().map(Value::Object).collect()),
            json!([{"id": 1, "customer_id": 10}])
        );
        let customers = read_payload(&dir.path().join("a/Customer.json")).unwrap();
        assert_eq!(customers.data.len(), 1);
        assert_eq!(result.models[1].filtered, 1);
        assert_eq!(result.models[2].filtered, 1);
    }

    #[tokio::test]
    async fn test_required_model_cannot_be_excluded() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.export.exclude_models = vec!["a.Order".to_string()];
        let schema = manifest();
        let registry = HandleRegistry::new().with_global(GlobalPipelineSpec::new(
            "orders",
            ["a.Customer", "a.Order"],
            |_| Ok(()),
        ));
        let mut db = items_db();
        let mut opts = options(dir.path(), &["a.Customer"]);
        opts.enable_handle = true;

        let err = ExportEngine::new(&config, &schema)
            .with_registry(registry)
            .run(&mut db, &opts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MigrateError::RequiredModelExcluded { ref model, ref pipeline }
                if model == "a.Order" && pipeline == "orders"
        ));
    }

    #[test]
    fn test_resolve_models_expands_apps_and_excludes() {
        let mut config = Config::default();
        config.export.exclude_models = vec!["demo.Tag".to_string(), "ghost".to_string()];
        let schema = manifest();
        let engine = ExportEngine::new(&config, &schema);

        let models = engine
            .resolve_models(&["a.Order".into(), "demo".into(), "a.Order".into()], false)
            .unwrap();
        assert_eq!(models, vec!["a.Order", "demo.Item"]);
        assert!(matches!(
            engine.resolve_models(&["nope".into()], false),
            Err(MigrateError::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_model_without_pk_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let schema = manifest();
        let mut db = items_db();
        let err = ExportEngine::new(&config, &schema)
            .run(&mut db, &options(dir.path(), &["demo.Item", "other.Log"]))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::ModelHasNoPrimaryKey(_)));
        assert!(!dir.path().join("demo/Item.json").exists());
    }

    #[tokio::test]
    async fn test_sql_filter() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config
            .export
            .sql_filters
            .insert("demo.Item".to_string(), "is_enabled = 1".to_string());
        let schema = manifest();
        let mut db = items_db();

        let result = ExportEngine::new(&config, &schema)
            .run(&mut db, &options(dir.path(), &["demo.Item"]))
            .await
            .unwrap();
        assert_eq!(result.rows_exported, 2);

        config
            .export
            .sql_filters
            .insert("demo.Item".to_string(), "WHERE is_enabled = 1".to_string());
        let err = ExportEngine::new(&config, &schema)
            .run(&mut db, &options(dir.path(), &["demo.Item"]))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::InvalidFilterFragment { .. }));
    }

    #[tokio::test]
    async fn test_default_models_and_zip_output() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("corpus.zip");
        let mut config = Config::default();
        config.export.default_models = vec!["demo.Item".to_string()];
        let schema = manifest();
        let mut db = items_db();

        let result = ExportEngine::new(&config, &schema)
            .run(&mut db, &options(&zip_path, &[]))
            .await
            .unwrap();
        assert_eq!(result.output, zip_path);

        let input = InputCorpus::open(&zip_path).unwrap();
        let payload = read_payload(&input.root().join("demo/Item.json")).unwrap();
        assert_eq!(payload.stats.total, 3);
    }

    #[tokio::test]
    async fn test_no_models_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let schema = manifest();
        let mut db = items_db();
        let err = ExportEngine::new(&config, &schema)
            .run(&mut db, &options(dir.path(), &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}
