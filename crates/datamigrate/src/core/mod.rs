//! Core abstractions shared by every engine.
//!
//! - [`schema`]: the schema manifest and the [`SchemaRegistry`] trait
//! - [`value`]: rows, batches and key normalisation
//! - [`traits`]: the [`SqlExecutor`] trait
//! - [`identifier`]: identifier quoting and model label parsing

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{FieldKind, FieldMeta, ModelMeta, PkMeta, SchemaManifest, SchemaRegistry};
pub use traits::{QueryRows, SqlExecutor};
pub use value::{ExportBatch, RowDict};
