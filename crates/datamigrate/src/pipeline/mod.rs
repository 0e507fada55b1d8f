//! Row transformation: batch transformer chains, global pipelines and the
//! relation cache they read from.

mod builtin;
mod global;
mod registry;
mod relation;
mod transformer;

pub use builtin::{build_global, build_transformer};
pub use global::{run_global_pipelines, GlobalPipelineContext, GlobalPipelineSpec};
pub use registry::HandleRegistry;
pub use relation::RelationCache;
pub use transformer::{BatchTransformer, FnTransformer, TransformContext, TransformerRegistry};
