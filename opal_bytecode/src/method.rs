//! Method bodies: a linear instruction sequence plus signature metadata.

use std::sync::Arc;

use opal_ir::Type;

use crate::opcode::Opcode;

/// Index of an instruction within a method's linear sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrIndex(pub u32);

impl InstrIndex {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for InstrIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// One positioned instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeInstruction {
    /// Position in the sequence; doubles as the diagnostic offset.
    pub index: InstrIndex,
    pub opcode: Opcode,
}

/// A compiled method body in stack bytecode form.
///
/// Immutable once built; bodies are shared across translation and
/// diagnostics without copying.
#[derive(Debug, Clone)]
pub struct MethodBytecode {
    /// Method name, for dumps and diagnostics.
    pub name: Arc<str>,
    /// The `this` type for instance methods.
    pub this_type: Option<Type>,
    /// Declared parameter types, excluding `this`.
    pub param_types: Vec<Type>,
    /// Local variable slot types.
    pub local_types: Vec<Type>,
    /// Return type.
    pub return_type: Type,
    /// The instruction sequence.
    pub instructions: Box<[BytecodeInstruction]>,
}

impl MethodBytecode {
    /// The instruction at `index`.
    pub fn get(&self, index: InstrIndex) -> Option<&BytecodeInstruction> {
        self.instructions.get(index.as_usize())
    }

    /// The index after `index`, while still in range.
    pub fn next(&self, index: InstrIndex) -> Option<InstrIndex> {
        let next = InstrIndex(index.0 + 1);
        if next.as_usize() < self.instructions.len() {
            Some(next)
        } else {
            None
        }
    }

    /// The first instruction's index.
    pub fn first_index(&self) -> Option<InstrIndex> {
        if self.instructions.is_empty() {
            None
        } else {
            Some(InstrIndex(0))
        }
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The extended parameter list: `this` (when present) followed by the
    /// declared parameters.
    pub fn extended_param_types(&self) -> Vec<Type> {
        let mut types = Vec::with_capacity(self.param_types.len() + 1);
        if let Some(this) = self.this_type {
            types.push(this);
        }
        types.extend_from_slice(&self.param_types);
        types
    }
}

/// Render a method body as one instruction per line.
pub fn disassemble(method: &MethodBytecode) -> String {
    let mut out = String::with_capacity(method.instructions.len() * 24);
    out.push_str(&format!(
        "method {} ({} param(s), {} local(s)) -> {}\n",
        method.name,
        method.param_types.len(),
        method.local_types.len(),
        method.return_type,
    ));
    for instr in method.instructions.iter() {
        out.push_str(&format!("  {:>4}: {}\n", instr.index.0, instr.opcode));
    }
    out
}
