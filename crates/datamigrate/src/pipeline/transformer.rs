//! Batch transformers and the per-model registry.
//!
//! A batch transformer maps `(rows, model_label)` to rows. It may filter,
//! reorder or rewrite rows of its own model; it never produces rows for
//! another model.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::identifier::WILDCARD;
use crate::core::value::RowDict;
use crate::error::{MigrateError, Result};

use super::relation::RelationCache;

/// What a transformer can see besides its rows.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub cache: &'a RelationCache,
}

impl<'a> TransformContext<'a> {
    pub fn new(cache: &'a RelationCache) -> Self {
        Self { cache }
    }
}

/// Row-level transformer applied to every batch of a model.
pub trait BatchTransformer: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    fn transform(
        &self,
        rows: Vec<RowDict>,
        model: &str,
        ctx: &TransformContext<'_>,
    ) -> Result<Vec<RowDict>>;
}

/// Closure adapter for [`BatchTransformer`].
pub struct FnTransformer<F> {
    name: String,
    f: F,
}

impl<F> FnTransformer<F>
where
    F: Fn(Vec<RowDict>, &str, &TransformContext<'_>) -> Result<Vec<RowDict>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> BatchTransformer for FnTransformer<F>
where
    F: Fn(Vec<RowDict>, &str, &TransformContext<'_>) -> Result<Vec<RowDict>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(
        &self,
        rows: Vec<RowDict>,
        model: &str,
        ctx: &TransformContext<'_>,
    ) -> Result<Vec<RowDict>> {
        (self.f)(rows, model, ctx)
    }
}

/// Transformer chains keyed by model label, plus the `*` chain that is
/// appended to every model's chain.
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    chains: BTreeMap<String, Vec<Arc<dyn BatchTransformer>>>,
}

impl fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (label, chain) in &self.chains {
            let names: Vec<&str> = chain.iter().map(|t| t.name()).collect();
            map.entry(label, &names);
        }
        map.finish()
    }
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transformer to a model's chain, or to every chain with `*`.
    pub fn register(&mut self, label: impl Into<String>, transformer: Arc<dyn BatchTransformer>) {
        self.chains.entry(label.into()).or_default().push(transformer);
    }

    /// Register a closure.
    pub fn register_fn<F>(&mut self, label: impl Into<String>, name: impl Into<String>, f: F)
    where
        F: Fn(Vec<RowDict>, &str, &TransformContext<'_>) -> Result<Vec<RowDict>>
            + Send
            + Sync
            + 'static,
    {
        self.register(label, Arc::new(FnTransformer::new(name, f)));
    }

    /// The model's own chain followed by the wildcard chain.
    pub fn chain_for(&self, label: &str) -> Vec<Arc<dyn BatchTransformer>> {
        let own = self.chains.get(label).into_iter().flatten();
        let wildcard = self
            .chains
            .get(WILDCARD)
            .filter(|_| label != WILDCARD)
            .into_iter()
            .flatten();
        own.chain(wildcard).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.values().all(Vec::is_empty)
    }

    /// Run the composed chain over one batch.
    ///
    /// Returns the surviving rows and how many rows the chain dropped.
    /// Errors are reported as `Transformer` errors naming the stage.
    pub fn apply(
        &self,
        model: &str,
        rows: Vec<RowDict>,
        ctx: &TransformContext<'_>,
    ) -> Result<(Vec<RowDict>, usize)> {
        let before = rows.len();
        let mut rows = rows;
        for transformer in self.chain_for(model) {
            rows = transformer
                .transform(rows, model, ctx)
                .map_err(|e| match e {
                    MigrateError::Transformer { .. } => e,
                    other => MigrateError::transformer(model, transformer.name(), other.to_string()),
                })?;
        }
        let dropped = before.saturating_sub(rows.len());
        Ok((rows, dropped))
    }
}
