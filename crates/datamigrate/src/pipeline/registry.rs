//! Handle registry: table chains plus global pipelines.

use std::collections::BTreeSet;

use tracing::debug;

use super::builtin::{build_global, build_transformer};
use super::global::GlobalPipelineSpec;
use super::transformer::TransformerRegistry;
use crate::config::{HandleConfig, TenantConfig};

/// Everything export and handle apply to rows.
#[derive(Debug, Clone, Default)]
pub struct HandleRegistry {
    pub tables: TransformerRegistry,
    pub globals: Vec<GlobalPipelineSpec>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry declared in the `handle` section.
    pub fn from_config(handle: &HandleConfig, tenant: &TenantConfig) -> Self {
        let mut registry = Self::new();
        for (label, specs) in &handle.table_pipelines {
            for spec in specs {
                registry
                    .tables
                    .register(label.clone(), build_transformer(spec, tenant));
            }
        }
        registry.globals = handle.global_pipelines.iter().map(build_global).collect();
        debug!(
            "Handle registry: {:?}, {} global pipelines",
            registry.tables,
            registry.globals.len()
        );
        registry
    }

    /// Append a global pipeline after the declared ones.
    pub fn with_global(mut self, spec: GlobalPipelineSpec) -> Self {
        self.globals.push(spec);
        self
    }

    /// Union of every global pipeline's required models.
    pub fn required_models(&self) -> BTreeSet<String> {
        self.globals
            .iter()
            .flat_map(|spec| spec.required_models.iter().cloned())
            .collect()
    }
}
