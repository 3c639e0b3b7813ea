//! Intraprocedural transforms over the Opal IR.
//!
//! A transform is pure: it takes a method body, rewrites its graph through
//! a builder, and hands back a new body. The [`TransformPipeline`]
//! sequences registered transforms and keeps per-pass statistics.

mod delegates;
mod pass;
mod verify_types;

pub use delegates::LowerDelegates;
pub use pass::{PassStat, PipelineStats, Transform, TransformError, TransformPipeline, TransformResult};
pub use verify_types::{
    verify_type, FieldDef, MethodDef, PropertyDef, TypeDefinition, TypeUniverse,
};
