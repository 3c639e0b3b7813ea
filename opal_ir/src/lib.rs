//! Opal mid-end intermediate representation.
//!
//! A method body is a persistent control-flow graph of basic blocks with
//! explicitly named, typed values. The pieces:
//!
//! - **Tags** (`tag`): opaque identities for blocks and values
//! - **Types** (`types`): structurally interned type handles
//! - **Constants** (`constant`): literal values
//! - **Prototypes** (`proto`): interned operation descriptors
//! - **Instructions & flow** (`instruction`, `flow`): bound operations and
//!   block terminators
//! - **Graph** (`graph`): persistent snapshots plus method bodies
//! - **Builder** (`builder`): mutable facade with graph inclusion
//! - **Analysis** (`analysis`): the result-type-indexed macro cache
//! - **Validator** (`validate`): invariant checking
//! - **Diagnostics** (`diagnostics`): the driver-facing error sink
//!
//! # Design Principles
//!
//! - **Snapshots, not mutation**: every edit derives a new graph that
//!   shares structure with its predecessor
//! - **Identity through tags**: blocks and values are named by opaque
//!   tokens, never by position
//! - **Interned descriptions**: equal prototypes and types are the same
//!   allocation, process-wide

pub mod analysis;
pub mod block;
pub mod builder;
pub mod constant;
pub mod diagnostics;
pub mod flow;
pub mod graph;
pub mod instruction;
pub mod method;
pub mod proto;
pub mod tag;
pub mod types;
pub mod validate;

pub use analysis::{AnalysisNotRegistered, AnalysisValue, GraphAnalysis, GraphUpdate, MacroCache, UpdateKind};
pub use block::{BasicBlock, BlockParameter};
pub use builder::{BlockBuilder, FlowGraphBuilder, InstructionBuilder};
pub use constant::Constant;
pub use diagnostics::{
    CompilationAborted, Diagnostic, DiagnosticSink, DriverConfig, Severity, SourceRange,
};
pub use flow::{BlockFlow, Branch, BranchArgument, SwitchCase};
pub use graph::{
    FlowGraph, GraphError, GraphResult, MethodBody, Parameter, SelectedInstruction,
};
pub use instruction::{ArgumentList, Instruction};
pub use method::{FnSignature, MethodRef};
pub use proto::{CallLookup, ExceptionSpec, ProtoShape, Prototype, TypeEnv};
pub use tag::{BlockTag, QualifiedName, TagAllocator, ValueTag};
pub use types::{FloatWidth, IntWidth, PointerKind, Type, TypeKind};
