//! Handle engine: rewrite an exported corpus offline.
//!
//! Reads `<input>/<app>/<Model>.json` files, applies the table pipelines and
//! the global pipelines, optionally partitions rows by business and writes a
//! new corpus. No database connection is involved.

mod biz;

pub use biz::{sanitize_bucket_name, BizDirectory, BizInfo, BizRouter, Route, GLOBAL_BUCKET};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CacheSource, Config};
use crate::core::value::RowDict;
use crate::corpus::{
    discover_strict, read_payload, write_atomic, AutoIncrementReport, InputCorpus, OutputCorpus,
    PayloadFile, PayloadWriter, HANDLE_REPORT,
};
use crate::error::{MigrateError, Result};
use crate::pipeline::{run_global_pipelines, HandleRegistry, RelationCache, TransformContext};
use crate::report::{render_handle_report, ModelStatus};

/// Handle command options.
#[derive(Debug, Clone, Default)]
pub struct HandleOptions {
    /// Input directory or `.zip`.
    pub input: PathBuf,
    /// Output directory or `.zip`.
    pub out: PathBuf,
    pub split_by_biz: bool,
    /// Businesses whose rows are dropped.
    pub exclude_biz_ids: BTreeSet<i64>,
    /// Run every stage without writing anything.
    pub dry_run: bool,
}

/// Outcome for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub model: String,
    pub rows_in: usize,
    pub rows_out: usize,
    /// Rows dropped by table and global pipelines.
    pub filtered: usize,
    /// Rows dropped because their business is excluded.
    pub excluded: usize,
    /// Rows written per business bucket.
    pub buckets: BTreeMap<String, usize>,
    pub status: ModelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
}

/// Result of a handle run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub input: PathBuf,
    pub output: PathBuf,
    pub split_by_biz: bool,
    pub dry_run: bool,
    pub models: Vec<ModelHandle>,
    pub rows_in: usize,
    pub rows_out: usize,
    /// Models whose transformers failed and whose original rows were kept.
    pub fallback_models: Vec<String>,
}

impl HandleResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Transformed rows of one model plus what happened on the way.
struct Transformed {
    rows: Vec<RowDict>,
    rows_in: usize,
    filtered: usize,
    error: Option<String>,
}

/// Per-model writers, one per bucket.
struct BucketSink<'r> {
    root: Option<&'r Path>,
    model: String,
    writers: BTreeMap<Option<String>, PayloadWriter>,
    counts: BTreeMap<Option<String>, usize>,
    excluded: usize,
}

impl<'r> BucketSink<'r> {
    fn new(root: Option<&'r Path>, model: &str) -> Self {
        Self {
            root,
            model: model.to_string(),
            writers: BTreeMap::new(),
            counts: BTreeMap::new(),
            excluded: 0,
        }
    }

    fn push(&mut self, rows: Vec<RowDict>, router: &BizRouter<'_>, cache: &RelationCache) -> Result<()> {
        let mut routed: BTreeMap<Option<String>, Vec<RowDict>> = BTreeMap::new();
        for row in rows {
            match router.route(&self.model, &row, cache) {
                Route::Keep(bucket) => routed.entry(bucket).or_default().push(row),
                Route::Drop => self.excluded += 1,
            }
        }
        for (bucket, rows) in routed {
            *self.counts.entry(bucket.clone()).or_default() += rows.len();
            let Some(root) = self.root else {
                continue;
            };
            if !self.writers.contains_key(&bucket) {
                let dir = match &bucket {
                    Some(name) => root.join(name),
                    None => root.to_path_buf(),
                };
                let writer = PayloadWriter::create(&dir, &self.model, false)?;
                self.writers.insert(bucket.clone(), writer);
            }
            if let Some(writer) = self.writers.get_mut(&bucket) {
                writer.write_rows(&rows)?;
            }
        }
        Ok(())
    }

    /// Close every writer. Returns rows per named bucket, rows kept and
    /// rows excluded.
    fn finish(self) -> Result<(BTreeMap<String, usize>, usize, usize)> {
        for writer in self.writers.into_values() {
            writer.finish()?;
        }
        let kept = self.counts.values().sum();
        let buckets = self
            .counts
            .into_iter()
            .filter_map(|(bucket, rows)| bucket.map(|b| (b, rows)))
            .collect();
        Ok((buckets, kept, self.excluded))
    }
}

/// Handle engine.
pub struct HandleEngine<'a> {
    config: &'a Config,
    registry: HandleRegistry,
}

impl<'a> HandleEngine<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            registry: HandleRegistry::from_config(&config.handle, &config.tenant),
        }
    }

    /// Replace the registry built from the config.
    pub fn with_registry(mut self, registry: HandleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Run the handle pipeline.
    pub fn run(&self, options: &HandleOptions) -> Result<HandleResult> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let batch_size = self.config.handle.batch_size;
        if batch_size == 0 {
            return Err(MigrateError::Config("handle.batch_size must be at least 1".into()));
        }

        let input = InputCorpus::open(&options.input)?;
        let files = discover_strict(input.root())?;
        info!(
            "Handling {} payload files from {}",
            files.len(),
            options.input.display()
        );

        let output = if options.dry_run {
            None
        } else {
            Some(OutputCorpus::open(&options.out)?)
        };
        let out_root = output.as_ref().map(OutputCorpus::root);

        let cache = self.preload(&files)?;
        // Exclusion needs the directory too: non-bkcc space uids only
        // resolve through it.
        let directory = if options.split_by_biz || !options.exclude_biz_ids.is_empty() {
            self.load_directory(&files)?
        } else {
            BizDirectory::default()
        };
        let router = BizRouter::new(
            &self.config.handle,
            &directory,
            &options.exclude_biz_ids,
            options.split_by_biz,
        );
        let ctx = TransformContext::new(&cache);
        let required = self.registry.required_models();

        let mut results = Vec::with_capacity(files.len());
        let mut held: Vec<(PayloadFile, Transformed, f64)> = Vec::new();

        for file in &files {
            let model_timer = Instant::now();
            let transformed = self.transform_file(file, batch_size, &ctx)?;
            if required.contains(&file.model) {
                debug!("{}: holding {} rows for global pipelines", file.model, transformed.rows.len());
                held.push((file.clone(), transformed, model_timer.elapsed().as_secs_f64()));
                continue;
            }
            let result = self.write_model(out_root, &file.model, transformed, &router, &cache, model_timer)?;
            results.push(result);
        }

        if !self.registry.globals.is_empty() {
            let mut workspace: BTreeMap<String, Vec<RowDict>> = held
                .iter_mut()
                .map(|(file, transformed, _)| (file.model.clone(), std::mem::take(&mut transformed.rows)))
                .collect();
            let dropped = run_global_pipelines(&self.registry.globals, &mut workspace)?;
            for (file, mut transformed, elapsed) in held {
                transformed.rows = workspace.remove(&file.model).unwrap_or_default();
                transformed.filtered += dropped.get(&file.model).copied().unwrap_or(0);
                let model_timer = Instant::now();
                let mut result =
                    self.write_model(out_root, &file.model, transformed, &router, &cache, model_timer)?;
                result.duration_seconds += elapsed;
                results.push(result);
            }
            // Rows set by a global pipeline for a model with no input file.
            for (model, rows) in workspace {
                if rows.is_empty() {
                    continue;
                }
                debug!("{}: writing {} rows created by global pipelines", model, rows.len());
                let transformed = Transformed {
                    rows,
                    rows_in: 0,
                    filtered: 0,
                    error: None,
                };
                let result =
                    self.write_model(out_root, &model, transformed, &router, &cache, Instant::now())?;
                results.push(result);
            }
        }

        let fallback_models: Vec<String> = results
            .iter()
            .filter(|r| r.status == ModelStatus::Fallback)
            .map(|r| r.model.clone())
            .collect();
        let mut result = HandleResult {
            started_at,
            completed_at: Utc::now(),
            duration_seconds: timer.elapsed().as_secs_f64(),
            input: options.input.clone(),
            output: options.out.clone(),
            split_by_biz: options.split_by_biz,
            dry_run: options.dry_run,
            rows_in: results.iter().map(|r| r.rows_in).sum(),
            rows_out: results.iter().map(|r| r.rows_out).sum(),
            models: results,
            fallback_models,
        };

        if let Some(output) = output {
            if let Some(report) = AutoIncrementReport::load(input.root())? {
                report.save(output.root())?;
            }
            write_atomic(
                &output.root().join(HANDLE_REPORT),
                render_handle_report(&result).as_bytes(),
            )?;
            result.output = output.finish()?;
        }
        result.completed_at = Utc::now();
        result.duration_seconds = timer.elapsed().as_secs_f64();

        info!(
            "Handle finished: {} rows in, {} rows out, {} models{}",
            result.rows_in,
            result.rows_out,
            result.models.len(),
            if options.dry_run { " (dry run)" } else { "" }
        );
        Ok(result)
    }

    /// Index cache source models from the input corpus.
    fn preload(&self, files: &[PayloadFile]) -> Result<RelationCache> {
        let mut cache = RelationCache::new();
        let mut seen = HashSet::new();
        let sources: Vec<&CacheSource> = self
            .config
            .handle
            .cache_sources
            .iter()
            .chain(&self.config.handle.extra_preload_models)
            .filter(|source| seen.insert(source.model.clone()))
            .collect();

        for source in sources {
            let Some(file) = files.iter().find(|f| f.model == source.model) else {
                debug!("Cache source {} is not in the corpus", source.model);
                continue;
            };
            let payload = read_payload(&file.path)?;
            cache.insert_rows(&source.model, &source.key, payload.data);
            info!(
                "Preloaded {} rows of {} keyed by {}",
                cache.len(&source.model),
                source.model,
                source.key
            );
        }
        Ok(cache)
    }

    fn load_directory(&self, files: &[PayloadFile]) -> Result<BizDirectory> {
        let space_model = &self.config.handle.space_model;
        match files.iter().find(|f| &f.model == space_model) {
            Some(file) => {
                let directory = BizDirectory::from_space_rows(&read_payload(&file.path)?.data);
                info!("Found {} businesses in {}", directory.len(), space_model);
                Ok(directory)
            }
            None => {
                warn!(
                    "{} is not in the corpus: only bk_biz_id fields and bkcc space uids resolve to a business",
                    space_model
                );
                Ok(BizDirectory::default())
            }
        }
    }

    /// Apply the table pipeline in chunks. A failing transformer keeps the
    /// file's original rows.
    fn transform_file(
        &self,
        file: &PayloadFile,
        batch_size: usize,
        ctx: &TransformContext<'_>,
    ) -> Result<Transformed> {
        let payload = read_payload(&file.path)?;
        let rows_in = payload.data.len();

        let mut rows = Vec::with_capacity(rows_in);
        let mut filtered = 0;
        for chunk in payload.data.chunks(batch_size) {
            match self.registry.tables.apply(&file.model, chunk.to_vec(), ctx) {
                Ok((kept, dropped)) => {
                    filtered += dropped;
                    rows.extend(kept);
                }
                Err(e) => {
                    warn!("{}: keeping original rows: {}", file.model, e);
                    return Ok(Transformed {
                        rows: payload.data,
                        rows_in,
                        filtered: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(Transformed {
            rows,
            rows_in,
            filtered,
            error: None,
        })
    }

    fn write_model(
        &self,
        out_root: Option<&Path>,
        model: &str,
        transformed: Transformed,
        router: &BizRouter<'_>,
        cache: &RelationCache,
        model_timer: Instant,
    ) -> Result<ModelHandle> {
        let mut sink = BucketSink::new(out_root, model);
        sink.push(transformed.rows, router, cache)?;
        let (buckets, rows_out, excluded) = sink.finish()?;

        let status = if transformed.error.is_some() {
            ModelStatus::Fallback
        } else {
            ModelStatus::Ok
        };
        info!(
            "{}: {} -> {} rows ({} filtered, {} excluded)",
            model, transformed.rows_in, rows_out, transformed.filtered, excluded
        );
        Ok(ModelHandle {
            model: model.to_string(),
            rows_in: transformed.rows_in,
            rows_out,
            filtered: transformed.filtered,
            excluded,
            buckets,
            status,
            error: transformed.error,
            duration_seconds: model_timer.elapsed().as_secs_f64(),
        })
    }
}
