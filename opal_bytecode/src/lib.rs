//! Stack-based bytecode input model.
//!
//! This crate models the CIL-family bytecode the mid-end accepts: a linear
//! instruction sequence with index-valued branch operands, typed local
//! slots, and an explicit method signature. Front-ends produce
//! [`MethodBytecode`] values (usually through the [`FunctionBuilder`]);
//! the translator in `opal_lower` consumes them.

mod builder;
mod method;
mod opcode;

pub use builder::{BuilderError, FunctionBuilder, Label};
pub use method::{disassemble, BytecodeInstruction, InstrIndex, MethodBytecode};
pub use opcode::Opcode;
