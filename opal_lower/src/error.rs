//! Translation errors. All of these report malformed bytecode input; the
//! translator raises them immediately, aborting the method while leaving
//! the caller free to keep compiling other methods.

use opal_bytecode::InstrIndex;
use opal_ir::{GraphError, Type};

/// Why a method body could not be translated.
#[derive(Debug, Clone)]
pub enum LowerError {
    /// Two predecessors reached the same block with different stacks.
    IncompatibleStackContents {
        at: InstrIndex,
        expected: Vec<Type>,
        found: Vec<Type>,
    },
    /// An opcode popped more values than the stack held.
    StackUnderflow { at: InstrIndex, mnemonic: &'static str },
    /// An opcode combined operands of incompatible types.
    OperandTypeMismatch { at: InstrIndex, message: String },
    /// An argument or local slot index is out of range.
    BadSlot { at: InstrIndex, slot: u16 },
    /// Control falls off the end of the instruction sequence.
    MissingTerminator { at: InstrIndex },
    /// The opcode has no translation yet. The dispatch table is meant to
    /// widen; which opcodes a driver needs is its decision.
    UnsupportedOpcode { at: InstrIndex, mnemonic: &'static str },
    /// The method body holds no instructions.
    EmptyBody,
    /// A graph edit failed while emitting.
    Graph(GraphError),
}

impl std::fmt::Display for LowerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LowerError::IncompatibleStackContents { at, expected, found } => write!(
                f,
                "{}: incompatible stack contents on incoming edges: expected {:?}, found {:?}",
                at, expected, found
            ),
            LowerError::StackUnderflow { at, mnemonic } => {
                write!(f, "{}: operand stack underflow at '{}'", at, mnemonic)
            }
            LowerError::OperandTypeMismatch { at, message } => write!(f, "{}: {}", at, message),
            LowerError::BadSlot { at, slot } => {
                write!(f, "{}: variable slot {} is out of range", at, slot)
            }
            LowerError::MissingTerminator { at } => {
                write!(f, "{}: control falls off the end of the method", at)
            }
            LowerError::UnsupportedOpcode { at, mnemonic } => {
                write!(f, "{}: opcode '{}' is not supported", at, mnemonic)
            }
            LowerError::EmptyBody => write!(f, "method body holds no instructions"),
            LowerError::Graph(err) => write!(f, "graph edit failed: {}", err),
        }
    }
}

impl std::error::Error for LowerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LowerError::Graph(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphError> for LowerError {
    fn from(err: GraphError) -> Self {
        LowerError::Graph(err)
    }
}

/// Result type for translation.
pub type LowerResult<T> = Result<T, LowerError>;
