//! Branch-target analysis.
//!
//! One scan over the linear sequence decides where basic blocks begin: at
//! the first instruction, at every branch operand, at the fall-through
//! successor of every conditional branch, and at the instruction following
//! a terminator (`br`, `ret`, `throw`, `rethrow`). Targets that turn out to
//! be unreachable are pruned after translation.

use rustc_hash::FxHashSet;

use opal_bytecode::{InstrIndex, MethodBytecode};

/// The instruction indices at which basic blocks begin.
pub(crate) fn branch_targets(method: &MethodBytecode) -> FxHashSet<InstrIndex> {
    let mut targets = FxHashSet::default();

    if let Some(first) = method.first_index() {
        targets.insert(first);
    }

    for instr in method.instructions.iter() {
        if let Some(target) = instr.opcode.branch_target() {
            targets.insert(target);
        }
        if instr.opcode.is_conditional_branch() || instr.opcode.is_terminator() {
            if let Some(next) = method.next(instr.index) {
                targets.insert(next);
            }
        }
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_bytecode::{FunctionBuilder, Opcode};
    use opal_ir::Type;

    #[test]
    fn straight_line_has_one_block() {
        let mut b = FunctionBuilder::new("f", Type::int32());
        b.emit(Opcode::LdcI4(42));
        b.emit(Opcode::Ret);
        let method = b.finish().unwrap();

        let targets = branch_targets(&method);
        assert_eq!(targets.len(), 1);
        assert!(targets.contains(&InstrIndex(0)));
    }

    #[test]
    fn conditional_branch_splits_three_ways() {
        // 0 ldc; 1 brtrue 4; 2 ldc; 3 ret; 4 ldc; 5 ret
        let mut b = FunctionBuilder::new("f", Type::int32());
        let taken = b.new_label();
        b.emit(Opcode::LdcI4(1));
        b.emit_brtrue(taken);
        b.emit(Opcode::LdcI4(0));
        b.emit(Opcode::Ret);
        b.bind_label(taken);
        b.emit(Opcode::LdcI4(1));
        b.emit(Opcode::Ret);
        let method = b.finish().unwrap();

        let targets = branch_targets(&method);
        assert_eq!(
            targets,
            [InstrIndex(0), InstrIndex(2), InstrIndex(4)].into_iter().collect()
        );
    }

    #[test]
    fn terminator_at_end_adds_no_target() {
        let mut b = FunctionBuilder::new("f", Type::void());
        b.emit(Opcode::Ret);
        let method = b.finish().unwrap();
        assert_eq!(branch_targets(&method).len(), 1);
    }
}
