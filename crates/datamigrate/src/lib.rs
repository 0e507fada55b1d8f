//! # datamigrate
//!
//! Move MySQL data between environments through a portable JSON corpus.
//!
//! The pipeline has four stages, each usable on its own:
//!
//! - **Export** pages every selected model by primary key and streams the
//!   rows into `<app_label>/<ModelName>.json` payload files
//! - **Handle** rewrites a corpus offline with table transformer chains,
//!   cross-table global pipelines and optional per-business partitioning
//! - **Import** loads a corpus with unique-key conflict detection
//!   (`update` or `skip`), one transaction per batch
//! - **Set auto-increment** raises `AUTO_INCREMENT` seeds above the
//!   imported row counts
//!
//! Any corpus path may be a directory or a `.zip` archive.
//!
//! ## Example
//!
//! ```rust,no_run
//! use datamigrate::{Config, ExportEngine, ExportOptions, MysqlExecutor};
//!
//! #[tokio::main]
//! async fn main() -> datamigrate::Result<()> {
//!     let config = Config::load("datamigrate.yaml")?;
//!     let schema = config.load_manifest()?;
//!     let mut executor = MysqlExecutor::connect(config.database()?).await?;
//!     let options = ExportOptions {
//!         models: vec!["demo.Item".into()],
//!         out: "corpus.zip".into(),
//!         ..ExportOptions::default()
//!     };
//!     let result = ExportEngine::new(&config, &schema)
//!         .run(&mut executor, &options)
//!         .await?;
//!     println!("Exported {} rows", result.rows_exported);
//!     Ok(())
//! }
//! ```

pub mod autoinc;
pub mod config;
pub mod core;
pub mod corpus;
pub mod drivers;
pub mod error;
pub mod export;
pub mod handle;
pub mod import;
pub mod pipeline;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use autoinc::{AutoIncrementOptions, AutoIncrementPlanner, AutoIncrementResult};
pub use config::Config;
pub use crate::core::{RowDict, SchemaManifest, SchemaRegistry, SqlExecutor};
pub use drivers::{MysqlDialect, MysqlExecutor};
pub use error::{MigrateError, Result};
pub use export::{ExportEngine, ExportOptions, ExportResult};
pub use handle::{HandleEngine, HandleOptions, HandleResult};
pub use import::{ConflictStrategy, ImportEngine, ImportOptions, ImportResult, ImportStats};
pub use pipeline::{GlobalPipelineSpec, HandleRegistry};
pub use report::ModelStatus;
