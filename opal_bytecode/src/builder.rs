//! Function builder with label resolution.
//!
//! Branch targets are emitted against [`Label`]s and patched to instruction
//! indices when the builder finishes, so callers emit forward jumps
//! without tracking positions by hand.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use opal_ir::Type;

use crate::method::{BytecodeInstruction, InstrIndex, MethodBytecode};
use crate::opcode::Opcode;

/// A jump target to be resolved at finish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// A branch emitted before its label was bound.
#[derive(Debug)]
struct ForwardRef {
    instruction: usize,
    label: Label,
}

/// Builder misuse detected at finish time.
#[derive(Debug, Clone)]
pub enum BuilderError {
    /// A branch references a label that was never bound.
    UnboundLabel(u32),
}

impl std::fmt::Display for BuilderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderError::UnboundLabel(id) => write!(f, "label {} was never bound", id),
        }
    }
}

impl std::error::Error for BuilderError {}

/// Builder for [`MethodBytecode`].
pub struct FunctionBuilder {
    name: Arc<str>,
    this_type: Option<Type>,
    param_types: Vec<Type>,
    local_types: Vec<Type>,
    return_type: Type,
    instructions: Vec<Opcode>,
    next_label: u32,
    bound: FxHashMap<Label, u32>,
    forward_refs: Vec<ForwardRef>,
}

impl FunctionBuilder {
    /// Start a static method returning `return_type`.
    pub fn new(name: impl Into<Arc<str>>, return_type: Type) -> Self {
        Self {
            name: name.into(),
            this_type: None,
            param_types: Vec::new(),
            local_types: Vec::new(),
            return_type,
            instructions: Vec::new(),
            next_label: 0,
            bound: FxHashMap::default(),
            forward_refs: Vec::new(),
        }
    }

    /// Give the method a `this` parameter.
    pub fn with_this(mut self, ty: Type) -> Self {
        self.this_type = Some(ty);
        self
    }

    /// Declare a parameter, returning its argument slot.
    pub fn add_param(&mut self, ty: Type) -> u16 {
        self.param_types.push(ty);
        let slot = self.param_types.len() as u16 - 1;
        if self.this_type.is_some() {
            slot + 1
        } else {
            slot
        }
    }

    /// Declare a local variable, returning its slot.
    pub fn add_local(&mut self, ty: Type) -> u16 {
        self.local_types.push(ty);
        self.local_types.len() as u16 - 1
    }

    /// Emit an opcode. Branch opcodes go through [`FunctionBuilder::emit_br`]
    /// and friends instead.
    pub fn emit(&mut self, opcode: Opcode) {
        self.instructions.push(opcode);
    }

    /// Allocate an unbound label.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind a label to the next emitted instruction.
    pub fn bind_label(&mut self, label: Label) {
        self.bound.insert(label, self.instructions.len() as u32);
    }

    fn emit_branch(&mut self, label: Label, make: fn(InstrIndex) -> Opcode) {
        match self.bound.get(&label) {
            Some(&target) => self.emit(make(InstrIndex(target))),
            None => {
                self.forward_refs.push(ForwardRef {
                    instruction: self.instructions.len(),
                    label,
                });
                // Placeholder target, patched at finish.
                self.emit(make(InstrIndex(u32::MAX)));
            }
        }
    }

    /// Emit an unconditional jump to `label`.
    pub fn emit_br(&mut self, label: Label) {
        self.emit_branch(label, Opcode::Br);
    }

    /// Emit a branch taken when the popped value is true.
    pub fn emit_brtrue(&mut self, label: Label) {
        self.emit_branch(label, Opcode::BrTrue);
    }

    /// Emit a branch taken when the popped value is false.
    pub fn emit_brfalse(&mut self, label: Label) {
        self.emit_branch(label, Opcode::BrFalse);
    }

    /// Patch forward references and produce the immutable body.
    pub fn finish(mut self) -> Result<MethodBytecode, BuilderError> {
        for forward in &self.forward_refs {
            let target = *self
                .bound
                .get(&forward.label)
                .ok_or(BuilderError::UnboundLabel(forward.label.0))?;
            let patched = match &self.instructions[forward.instruction] {
                Opcode::Br(_) => Opcode::Br(InstrIndex(target)),
                Opcode::BrTrue(_) => Opcode::BrTrue(InstrIndex(target)),
                Opcode::BrFalse(_) => Opcode::BrFalse(InstrIndex(target)),
                other => other.clone(),
            };
            self.instructions[forward.instruction] = patched;
        }

        Ok(MethodBytecode {
            name: self.name,
            this_type: self.this_type,
            param_types: self.param_types,
            local_types: self.local_types,
            return_type: self.return_type,
            instructions: self
                .instructions
                .into_iter()
                .enumerate()
                .map(|(i, opcode)| BytecodeInstruction {
                    index: InstrIndex(i as u32),
                    opcode,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_branch_is_patched() {
        let mut b = FunctionBuilder::new("f", Type::int32());
        let end = b.new_label();
        b.emit(Opcode::LdcI4(1));
        b.emit_brtrue(end);
        b.emit(Opcode::LdcI4(0));
        b.emit(Opcode::Ret);
        b.bind_label(end);
        b.emit(Opcode::LdcI4(1));
        b.emit(Opcode::Ret);

        let body = b.finish().unwrap();
        assert_eq!(body.instructions[1].opcode, Opcode::BrTrue(InstrIndex(4)));
    }

    #[test]
    fn backward_branch_resolves_immediately() {
        let mut b = FunctionBuilder::new("loop", Type::void());
        let top = b.new_label();
        b.bind_label(top);
        b.emit(Opcode::Nop);
        b.emit_br(top);

        let body = b.finish().unwrap();
        assert_eq!(body.instructions[1].opcode, Opcode::Br(InstrIndex(0)));
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut b = FunctionBuilder::new("bad", Type::void());
        let nowhere = b.new_label();
        b.emit_br(nowhere);
        assert!(matches!(b.finish(), Err(BuilderError::UnboundLabel(_))));
    }

    #[test]
    fn arg_slots_account_for_this() {
        let mut b = FunctionBuilder::new("m", Type::void()).with_this(Type::root());
        let first = b.add_param(Type::int32());
        assert_eq!(first, 1, "slot 0 belongs to this");

        let mut s = FunctionBuilder::new("s", Type::void());
        assert_eq!(s.add_param(Type::int32()), 0);
    }
}
