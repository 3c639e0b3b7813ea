//! Bytecode operations.

use std::sync::Arc;

use opal_ir::MethodRef;

use crate::method::InstrIndex;

/// A stack-machine operation.
///
/// Branch operands are instruction indices into the owning method's linear
/// sequence. Call-shaped opcodes carry resolved method references; the
/// bytecode layer does no name lookup of its own.
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    Nop,

    // Constants
    /// Push a 32-bit integer constant.
    LdcI4(i32),
    /// Push a 64-bit integer constant.
    LdcI8(i64),
    /// Push a 32-bit float constant.
    LdcR4(f32),
    /// Push a 64-bit float constant.
    LdcR8(f64),
    /// Push the null reference.
    LdNull,
    /// Push a string literal.
    LdStr(Arc<str>),

    // Argument and local slots
    /// Push the value of argument slot `n` (0 is `this` for instance
    /// methods).
    LdArg(u16),
    /// Pop into argument slot `n`.
    StArg(u16),
    /// Push the value of local slot `n`.
    LdLoc(u16),
    /// Pop into local slot `n`.
    StLoc(u16),

    // Stack shuffling
    Dup,
    Pop,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,

    // Comparison (push bool)
    Ceq,
    Cgt,
    Clt,

    // Branches
    /// Unconditional jump.
    Br(InstrIndex),
    /// Pop a boolean; jump when true.
    BrTrue(InstrIndex),
    /// Pop a boolean; jump when false.
    BrFalse(InstrIndex),

    // Calls
    /// Direct call.
    Call(MethodRef),
    /// Virtual call through the receiver.
    CallVirt(MethodRef),
    /// Allocate and construct.
    NewObj(MethodRef),

    // Terminators
    Ret,
    /// Pop an exception object and raise it.
    Throw,
    /// Re-raise the exception in flight.
    Rethrow,
}

impl Opcode {
    /// The branch operand, when this opcode has one.
    pub fn branch_target(&self) -> Option<InstrIndex> {
        match self {
            Opcode::Br(target) | Opcode::BrTrue(target) | Opcode::BrFalse(target) => Some(*target),
            _ => None,
        }
    }

    /// Whether this opcode conditionally branches (and so also falls
    /// through).
    pub fn is_conditional_branch(&self) -> bool {
        matches!(self, Opcode::BrTrue(_) | Opcode::BrFalse(_))
    }

    /// Whether control never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Br(_) | Opcode::Ret | Opcode::Throw | Opcode::Rethrow
        )
    }

    /// Mnemonic for dumps.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::LdcI4(_) => "ldc.i4",
            Opcode::LdcI8(_) => "ldc.i8",
            Opcode::LdcR4(_) => "ldc.r4",
            Opcode::LdcR8(_) => "ldc.r8",
            Opcode::LdNull => "ldnull",
            Opcode::LdStr(_) => "ldstr",
            Opcode::LdArg(_) => "ldarg",
            Opcode::StArg(_) => "starg",
            Opcode::LdLoc(_) => "ldloc",
            Opcode::StLoc(_) => "stloc",
            Opcode::Dup => "dup",
            Opcode::Pop => "pop",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Rem => "rem",
            Opcode::Neg => "neg",
            Opcode::Ceq => "ceq",
            Opcode::Cgt => "cgt",
            Opcode::Clt => "clt",
            Opcode::Br(_) => "br",
            Opcode::BrTrue(_) => "brtrue",
            Opcode::BrFalse(_) => "brfalse",
            Opcode::Call(_) => "call",
            Opcode::CallVirt(_) => "callvirt",
            Opcode::NewObj(_) => "newobj",
            Opcode::Ret => "ret",
            Opcode::Throw => "throw",
            Opcode::Rethrow => "rethrow",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Opcode::LdcI4(v) => write!(f, "ldc.i4 {}", v),
            Opcode::LdcI8(v) => write!(f, "ldc.i8 {}", v),
            Opcode::LdcR4(v) => write!(f, "ldc.r4 {}", v),
            Opcode::LdcR8(v) => write!(f, "ldc.r8 {}", v),
            Opcode::LdStr(s) => write!(f, "ldstr {:?}", s),
            Opcode::LdArg(n) => write!(f, "ldarg {}", n),
            Opcode::StArg(n) => write!(f, "starg {}", n),
            Opcode::LdLoc(n) => write!(f, "ldloc {}", n),
            Opcode::StLoc(n) => write!(f, "stloc {}", n),
            Opcode::Br(t) => write!(f, "br {}", t),
            Opcode::BrTrue(t) => write!(f, "brtrue {}", t),
            Opcode::BrFalse(t) => write!(f, "brfalse {}", t),
            Opcode::Call(m) => write!(f, "call {}", m),
            Opcode::CallVirt(m) => write!(f, "callvirt {}", m),
            Opcode::NewObj(m) => write!(f, "newobj {}", m),
            other => f.write_str(other.mnemonic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_targets() {
        assert_eq!(Opcode::Br(InstrIndex(3)).branch_target(), Some(InstrIndex(3)));
        assert_eq!(Opcode::BrTrue(InstrIndex(7)).branch_target(), Some(InstrIndex(7)));
        assert_eq!(Opcode::Ret.branch_target(), None);
    }

    #[test]
    fn terminator_classification() {
        assert!(Opcode::Ret.is_terminator());
        assert!(Opcode::Throw.is_terminator());
        assert!(Opcode::Br(InstrIndex(0)).is_terminator());
        assert!(!Opcode::BrTrue(InstrIndex(0)).is_terminator());
        assert!(Opcode::BrFalse(InstrIndex(0)).is_conditional_branch());
    }
}
