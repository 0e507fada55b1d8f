//! Configuration validation.

use super::{BizRule, Config, GlobalPipelineConfig, TransformerSpec};
use crate::core::identifier::{parse_model_label, WILDCARD};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if let Some(db) = &config.database {
        if db.host.is_empty() {
            return Err(MigrateError::Config("database.host is required".into()));
        }
        if db.database.is_empty() {
            return Err(MigrateError::Config("database.database is required".into()));
        }
        if db.user.is_empty() {
            return Err(MigrateError::Config("database.user is required".into()));
        }
    }

    if config.export.batch_size == 0 {
        return Err(MigrateError::Config(
            "export.batch_size must be at least 1".into(),
        ));
    }
    if config.import.batch_size == 0 {
        return Err(MigrateError::Config(
            "import.batch_size must be at least 1".into(),
        ));
    }
    if config.handle.batch_size == 0 {
        return Err(MigrateError::Config(
            "handle.batch_size must be at least 1".into(),
        ));
    }

    // Selectors may be bare app labels; everything else must be app.Model.
    for selector in config
        .export
        .default_models
        .iter()
        .chain(&config.export.exclude_models)
    {
        if selector.trim().is_empty() {
            return Err(MigrateError::Config("empty model selector".into()));
        }
    }

    let labels = config
        .export
        .sql_filters
        .keys()
        .chain(config.import.table_priority.keys())
        .chain(config.handle.global_tables.iter())
        .chain(config.handle.biz_rules.keys())
        .chain(std::iter::once(&config.handle.space_model))
        .chain(config.handle.cache_sources.iter().map(|s| &s.model))
        .chain(config.handle.extra_preload_models.iter().map(|s| &s.model));
    for label in labels {
        parse_model_label(label)?;
    }

    for (label, chain) in &config.handle.table_pipelines {
        if label != WILDCARD {
            parse_model_label(label)?;
        }
        for spec in chain {
            match spec {
                TransformerSpec::ResolveRelation { model, .. }
                | TransformerSpec::RequireRelation { model, .. } => {
                    parse_model_label(model)?;
                }
                _ => {}
            }
        }
    }

    for spec in &config.handle.global_pipelines {
        match spec {
            GlobalPipelineConfig::PruneOrphans {
                name,
                parent,
                child,
                ..
            } => {
                if name.is_empty() {
                    return Err(MigrateError::Config(
                        "global pipeline name is required".into(),
                    ));
                }
                parse_model_label(parent)?;
                parse_model_label(child)?;
            }
        }
    }

    for rule in config.handle.biz_rules.values() {
        if let BizRule::Relation { model, .. } = rule {
            parse_model_label(model)?;
        }
    }

    Ok(())
}
