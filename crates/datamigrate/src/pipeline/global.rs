//! Cross-table (global) pipelines.
//!
//! A global pipeline runs once, after every batch transform, with all of its
//! required models held in memory. It may only read or write those models;
//! anything else is an `UndeclaredDependency` error.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::core::value::RowDict;
use crate::error::{MigrateError, Result};

type GlobalFn = dyn Fn(&mut GlobalPipelineContext) -> Result<()> + Send + Sync;

/// A named cross-table transformer with its declared models.
#[derive(Clone)]
pub struct GlobalPipelineSpec {
    pub name: String,
    pub required_models: BTreeSet<String>,
    run: Arc<GlobalFn>,
}

impl fmt::Debug for GlobalPipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalPipelineSpec")
            .field("name", &self.name)
            .field("required_models", &self.required_models)
            .finish()
    }
}

impl GlobalPipelineSpec {
    pub fn new<I, S, F>(name: impl Into<String>, required_models: I, run: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&mut GlobalPipelineContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            required_models: required_models.into_iter().map(Into::into).collect(),
            run: Arc::new(run),
        }
    }

    pub fn run(&self, ctx: &mut GlobalPipelineContext) -> Result<()> {
        (self.run)(ctx)
    }
}

/// Workspace of one global pass, bounded by the pipeline's required models.
#[derive(Debug)]
pub struct GlobalPipelineContext {
    pipeline: String,
    allowed_models: BTreeSet<String>,
    tables: BTreeMap<String, Vec<RowDict>>,
}

impl GlobalPipelineContext {
    pub fn new(pipeline: impl Into<String>, allowed_models: BTreeSet<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            allowed_models,
            tables: BTreeMap::new(),
        }
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn allowed_models(&self) -> &BTreeSet<String> {
        &self.allowed_models
    }

    fn check(&self, model: &str) -> Result<()> {
        if self.allowed_models.contains(model) {
            Ok(())
        } else {
            Err(MigrateError::undeclared(&self.pipeline, model))
        }
    }

    /// Current rows of a declared model.
    pub fn get(&self, model: &str) -> Result<&[RowDict]> {
        self.check(model)?;
        Ok(self.tables.get(model).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Mutable rows of a declared model.
    pub fn get_mut(&mut self, model: &str) -> Result<&mut Vec<RowDict>> {
        self.check(model)?;
        Ok(self.tables.entry(model.to_string()).or_default())
    }

    /// Replace the rows of a declared model.
    pub fn set(&mut self, model: &str, rows: Vec<RowDict>) -> Result<()> {
        self.check(model)?;
        self.tables.insert(model.to_string(), rows);
        Ok(())
    }

    /// Move the rows of a declared model out, leaving it empty.
    pub fn take(&mut self, model: &str) -> Result<Vec<RowDict>> {
        self.check(model)?;
        Ok(self.tables.remove(model).unwrap_or_default())
    }

    fn into_tables(self) -> BTreeMap<String, Vec<RowDict>> {
        self.tables
    }
}

/// Run global pipelines in declared order over an in-memory workspace.
///
/// Each spec sees the output of the specs before it. Returns, per model,
/// how many rows the global stage removed (length difference).
pub fn run_global_pipelines(
    specs: &[GlobalPipelineSpec],
    workspace: &mut BTreeMap<String, Vec<RowDict>>,
) -> Result<BTreeMap<String, usize>> {
    let before: BTreeMap<String, usize> = workspace
        .iter()
        .map(|(model, rows)| (model.clone(), rows.len()))
        .collect();

    for spec in specs {
        let mut ctx = GlobalPipelineContext::new(&spec.name, spec.required_models.clone());
        for model in &spec.required_models {
            let rows = workspace.remove(model).unwrap_or_default();
            ctx.tables.insert(model.clone(), rows);
        }

        debug!("Running global pipeline {}", spec.name);
        let outcome = spec.run(&mut ctx);
        // rows go back even on failure so the caller still owns them
        workspace.extend(ctx.into_tables());
        outcome.map_err(|e| match e {
            MigrateError::UndeclaredDependency { .. } | MigrateError::Transformer { .. } => e,
            other => MigrateError::transformer(
                spec.required_models.iter().cloned().collect::<Vec<_>>().join(","),
                &spec.name,
                other.to_string(),
            ),
        })?;
        info!("Global pipeline {} done", spec.name);
    }

    Ok(workspace
        .iter()
        .map(|(model, rows)| {
            let start = before.get(model).copied().unwrap_or(0);
            (model.clone(), start.saturating_sub(rows.len()))
        })
        .collect())
}
