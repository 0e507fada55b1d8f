//! Import engine: load a corpus into the target database.
//!
//! Files are imported in descending `import.table_priority` order, ties
//! broken by model label and path. Each batch probes which unique keys
//! already exist, then inserts (SKIP) or upserts (UPDATE) inside one
//! transaction. A failing batch is rolled back and counted as failed.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::schema::{ModelMeta, SchemaRegistry};
use crate::core::traits::{execute_many_atomic, SqlExecutor};
use crate::core::value::{composite_key, fold_key, row_key, RowDict};
use crate::corpus::{discover_nested, read_payload, InputCorpus, PayloadFile};
use crate::drivers::mysql::MysqlDialect;
use crate::error::{MigrateError, Result};
use crate::report::ModelStatus;

/// What to do with rows whose unique key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Overwrite every column of the existing row.
    #[default]
    Update,
    /// Leave the existing row alone.
    Skip,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStrategy::Update => f.write_str("update"),
            ConflictStrategy::Skip => f.write_str("skip"),
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "update" => Ok(ConflictStrategy::Update),
            "skip" => Ok(ConflictStrategy::Skip),
            other => Err(MigrateError::Config(format!(
                "unknown conflict strategy '{}' (expected update or skip)",
                other
            ))),
        }
    }
}

/// Import command options.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Input directory or `.zip`.
    pub input: PathBuf,
    pub conflict: ConflictStrategy,
    /// Probe only; nothing is written.
    pub dry_run: bool,
    /// Rows per batch, overriding `import.batch_size`.
    pub batch_size: Option<usize>,
}

/// Row counters for one model. `total` is the sum of the other four.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub model: String,
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ImportStats {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Self::default()
        }
    }
}

/// Outcome for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelImport {
    #[serde(flatten)]
    pub stats: ImportStats,
    pub files: usize,
    pub status: ModelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
}

/// Result of an import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub input: PathBuf,
    pub conflict: ConflictStrategy,
    pub dry_run: bool,
    pub models: Vec<ModelImport>,
    pub failed_models: Vec<String>,
    pub rows_failed: usize,
}

impl ImportResult {
    pub fn is_success(&self) -> bool {
        self.failed_models.is_empty()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Files of one model, contiguous after ordering.
struct ModelGroup<'m> {
    meta: &'m ModelMeta,
    files: Vec<PayloadFile>,
}

/// Import engine.
pub struct ImportEngine<'a> {
    config: &'a Config,
    schema: &'a dyn SchemaRegistry,
    dialect: MysqlDialect,
}

impl<'a> ImportEngine<'a> {
    pub fn new(config: &'a Config, schema: &'a dyn SchemaRegistry) -> Self {
        Self {
            config,
            schema,
            dialect: MysqlDialect::new(),
        }
    }

    fn priority(&self, model: &str) -> i64 {
        self.config
            .import
            .table_priority
            .get(model)
            .copied()
            .unwrap_or(0)
    }

    /// Order files by (-priority, model, path) and resolve every model
    /// before anything is written.
    fn plan(&self, mut files: Vec<PayloadFile>) -> Result<Vec<ModelGroup<'_>>> {
        files.sort_by(|a, b| {
            self.priority(&b.model)
                .cmp(&self.priority(&a.model))
                .then_with(|| a.model.cmp(&b.model))
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut groups: Vec<ModelGroup<'_>> = Vec::new();
        for file in files {
            if let Some(group) = groups.last_mut().filter(|g| g.meta.label == file.model) {
                group.files.push(file);
                continue;
            }
            let meta = self.schema.require_model(&file.model)?;
            groups.push(ModelGroup {
                meta,
                files: vec![file],
            });
        }
        Ok(groups)
    }

    /// Run the import.
    pub async fn run(
        &self,
        executor: &mut dyn SqlExecutor,
        options: &ImportOptions,
    ) -> Result<ImportResult> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let batch_size = options.batch_size.unwrap_or(self.config.import.batch_size);
        if batch_size == 0 {
            return Err(MigrateError::Config("batch size must be at least 1".into()));
        }

        let input = InputCorpus::open(&options.input)?;
        let groups = self.plan(discover_nested(input.root())?)?;
        info!(
            "Importing {} models from {} (conflict: {}{})",
            groups.len(),
            options.input.display(),
            options.conflict,
            if options.dry_run { ", dry run" } else { "" }
        );

        let mut results = Vec::with_capacity(groups.len());
        for group in &groups {
            let model_timer = Instant::now();
            let mut stats = ImportStats::new(&group.meta.label);
            let outcome = self
                .import_model(executor, group, batch_size, options, &mut stats)
                .await;
            let (status, error) = match outcome {
                Ok(()) => (ModelStatus::Ok, None),
                Err(
                    e @ (MigrateError::NoUniqueKey(_) | MigrateError::MissingUniqueKeyField { .. }),
                ) => {
                    warn!("{}: {}", group.meta.label, e);
                    (ModelStatus::Failed, Some(e.to_string()))
                }
                Err(e) => return Err(e),
            };
            info!(
                "{}: total={} inserted={} updated={} skipped={} failed={}",
                stats.model, stats.total, stats.inserted, stats.updated, stats.skipped, stats.failed
            );
            results.push(ModelImport {
                stats,
                files: group.files.len(),
                status,
                error,
                duration_seconds: model_timer.elapsed().as_secs_f64(),
            });
        }

        let failed_models = results
            .iter()
            .filter(|m| m.status == ModelStatus::Failed)
            .map(|m| m.stats.model.clone())
            .collect();
        Ok(ImportResult {
            started_at,
            completed_at: Utc::now(),
            duration_seconds: timer.elapsed().as_secs_f64(),
            input: options.input.clone(),
            conflict: options.conflict,
            dry_run: options.dry_run,
            rows_failed: results.iter().map(|m| m.stats.failed).sum(),
            models: results,
            failed_models,
        })
    }

    async fn import_model(
        &self,
        executor: &mut dyn SqlExecutor,
        group: &ModelGroup<'_>,
        batch_size: usize,
        options: &ImportOptions,
        stats: &mut ImportStats,
    ) -> Result<()> {
        let meta = group.meta;
        let key_fields = meta
            .unique_key()
            .ok_or_else(|| MigrateError::NoUniqueKey(meta.label.clone()))?;

        let mut batch_no = 0;
        for file in &group.files {
            let payload = read_payload(&file.path)?;
            debug!(
                "{}: {} rows from {}",
                meta.label,
                payload.data.len(),
                file.path.display()
            );
            for batch in payload.data.chunks(batch_size) {
                batch_no += 1;
                self.import_batch(executor, meta, &key_fields, batch, batch_no, options, stats)
                    .await?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn import_batch(
        &self,
        executor: &mut dyn SqlExecutor,
        meta: &ModelMeta,
        key_fields: &[String],
        rows: &[RowDict],
        batch_no: usize,
        options: &ImportOptions,
        stats: &mut ImportStats,
    ) -> Result<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let fields: Vec<String> = first.keys().cloned().collect();
        if let Some(missing) = key_fields.iter().find(|k| !fields.contains(*k)) {
            return Err(MigrateError::MissingUniqueKeyField {
                model: meta.label.clone(),
                field: missing.clone(),
            });
        }
        stats.total += rows.len();

        let outcome = match self.existing_keys(executor, meta, key_fields, rows).await {
            Ok(existing) => {
                let (to_write, counts) = classify(rows, key_fields, &existing, options.conflict);
                if options.dry_run || to_write.is_empty() {
                    Ok(counts)
                } else {
                    self.write(executor, meta, &fields, &to_write, options.conflict)
                        .await
                        .map(|()| counts)
                }
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(counts) => {
                stats.inserted += counts.inserted;
                stats.updated += counts.updated;
                stats.skipped += counts.skipped;
                debug!(
                    "{}: batch {} inserted={} updated={} skipped={}",
                    meta.label, batch_no, counts.inserted, counts.updated, counts.skipped
                );
            }
            Err(e) => {
                stats.failed += rows.len();
                let err = MigrateError::BatchWrite {
                    model: meta.label.clone(),
                    batch: batch_no,
                    message: e.to_string(),
                };
                warn!("{} ({} rows rolled back)", err, rows.len());
            }
        }
        Ok(())
    }

    /// Keys of `rows` already present in the target.
    async fn existing_keys(
        &self,
        executor: &mut dyn SqlExecutor,
        meta: &ModelMeta,
        key_fields: &[String],
        rows: &[RowDict],
    ) -> Result<ExistingKeys> {
        let key_columns: Vec<String> = key_fields
            .iter()
            .map(|f| meta.column_for(f).to_string())
            .collect();
        let sql = self
            .dialect
            .build_existing_keys_query(&meta.table, &key_columns, rows.len())?;
        let params: Vec<Value> = rows
            .iter()
            .flat_map(|row| {
                key_fields
                    .iter()
                    .map(move |f| row.get(f).cloned().unwrap_or(Value::Null))
            })
            .collect();
        let found = executor.query(&sql, params).await?;
        let payload_keys: HashSet<String> = rows.iter().map(|row| row_key(row, key_fields)).collect();
        Ok(ExistingKeys::resolve(
            found.rows.iter().map(|values| composite_key(values.iter())),
            &payload_keys,
        ))
    }

    async fn write(
        &self,
        executor: &mut dyn SqlExecutor,
        meta: &ModelMeta,
        fields: &[String],
        rows: &[&RowDict],
        conflict: ConflictStrategy,
    ) -> Result<()> {
        let columns: Vec<String> = fields
            .iter()
            .map(|f| meta.column_for(f).to_string())
            .collect();
        let sql = match conflict {
            ConflictStrategy::Update => self.dialect.build_upsert(&meta.table, &columns)?,
            ConflictStrategy::Skip => self.dialect.build_insert(&meta.table, &columns)?,
        };
        let params: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| {
                fields
                    .iter()
                    .map(|f| row.get(f).cloned().unwrap_or(Value::Null))
                    .collect::<Vec<_>>()
            })
            .collect();
        execute_many_atomic(executor, &sql, params).await
    }
}

/// Keys the target reported for one batch.
///
/// The probe's `IN (...)` matches under the column collation, so a reported
/// key may differ in case or trailing spaces from the payload key that found
/// it. Reported keys that equal no payload key are kept folded and matched
/// that way.
#[derive(Debug, Default)]
struct ExistingKeys {
    exact: HashSet<String>,
    folded: HashSet<String>,
}

impl ExistingKeys {
    fn resolve<I>(found: I, payload_keys: &HashSet<String>) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut keys = Self::default();
        for key in found {
            if !payload_keys.contains(&key) {
                keys.folded.insert(fold_key(&key));
            }
            keys.exact.insert(key);
        }
        keys
    }

    fn contains(&self, key: &str) -> bool {
        self.exact.contains(key) || (!self.folded.is_empty() && self.folded.contains(&fold_key(key)))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BatchCounts {
    inserted: usize,
    updated: usize,
    skipped: usize,
}

/// Decide which rows to write and how they count.
///
/// SKIP writes rows whose key is neither in the target nor earlier in the
/// batch. UPDATE writes every row; a row counts as updated when its key
/// exists in the target or earlier in the batch.
fn classify<'r>(
    rows: &'r [RowDict],
    key_fields: &[String],
    existing: &ExistingKeys,
    conflict: ConflictStrategy,
) -> (Vec<&'r RowDict>, BatchCounts) {
    let mut seen = HashSet::new();
    let mut counts = BatchCounts::default();
    let mut to_write = Vec::with_capacity(rows.len());

    for row in rows {
        let key = row_key(row, key_fields);
        let conflict_found = existing.contains(&key) || !seen.insert(key);
        match (conflict, conflict_found) {
            (ConflictStrategy::Skip, true) => counts.skipped += 1,
            (ConflictStrategy::Skip, false) => {
                counts.inserted += 1;
                to_write.push(row);
            }
            (ConflictStrategy::Update, true) => {
                counts.updated += 1;
                to_write.push(row);
            }
            (ConflictStrategy::Update, false) => {
                counts.inserted += 1;
                to_write.push(row);
            }
        }
    }
    (to_write, counts)
}
