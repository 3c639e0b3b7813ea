//! Block terminators and the branches they carry.

use crate::constant::Constant;
use crate::instruction::Instruction;
use crate::tag::{BlockTag, ValueTag};

// =============================================================================
// Branches
// =============================================================================

/// A value handed to a successor block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchArgument {
    /// An ordinary value defined in the graph.
    Value(ValueTag),
    /// The result of the guarded instruction; only meaningful on the
    /// success edge of `Try` flow.
    TryResult,
    /// The caught exception object; only meaningful on the exception edge
    /// of `Try` flow.
    TryException,
}

impl BranchArgument {
    /// The value tag, when this is an ordinary argument.
    pub fn as_value(&self) -> Option<&ValueTag> {
        match self {
            BranchArgument::Value(tag) => Some(tag),
            _ => None,
        }
    }
}

/// An edge to a successor block with the arguments its parameters receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub target: BlockTag,
    pub arguments: Vec<BranchArgument>,
}

impl Branch {
    /// A branch passing ordinary values.
    pub fn new(target: BlockTag, arguments: impl IntoIterator<Item = ValueTag>) -> Self {
        Self {
            target,
            arguments: arguments.into_iter().map(BranchArgument::Value).collect(),
        }
    }

    /// A branch with explicit argument kinds.
    pub fn with_arguments(target: BlockTag, arguments: Vec<BranchArgument>) -> Self {
        Self { target, arguments }
    }

    /// Rewrite the target and every ordinary value argument.
    pub fn map(
        &self,
        blocks: &mut dyn FnMut(&BlockTag) -> BlockTag,
        values: &mut dyn FnMut(&ValueTag) -> ValueTag,
    ) -> Branch {
        Branch {
            target: blocks(&self.target),
            arguments: self
                .arguments
                .iter()
                .map(|arg| match arg {
                    BranchArgument::Value(tag) => BranchArgument::Value(values(tag)),
                    other => other.clone(),
                })
                .collect(),
        }
    }
}

// =============================================================================
// Block Flow
// =============================================================================

/// A switch case: a set of constants selecting one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCase {
    pub values: Vec<Constant>,
    pub branch: Branch,
}

/// The terminator of a basic block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BlockFlow {
    /// Unconditional transfer.
    Jump(Branch),
    /// Leave the method; the returned value rides on a `Copy` instruction.
    Return(Instruction),
    /// Multi-way dispatch over a flow-level instruction's result. Two-way
    /// conditionals are switches with a single boolean `false` case.
    Switch {
        value: Instruction,
        cases: Vec<SwitchCase>,
        default: Branch,
    },
    /// Run a throwing instruction; continue on `success` or transfer to
    /// `exception` with the thrown object.
    Try {
        inner: Instruction,
        success: Branch,
        exception: Branch,
    },
    /// Control never leaves this block. The flow of every freshly created
    /// block.
    #[default]
    Unreachable,
}

impl BlockFlow {
    /// The outgoing branches, in a fixed order (switch: cases then default;
    /// try: success then exception).
    pub fn branches(&self) -> Vec<&Branch> {
        match self {
            BlockFlow::Jump(branch) => vec![branch],
            BlockFlow::Return(_) | BlockFlow::Unreachable => Vec::new(),
            BlockFlow::Switch { cases, default, .. } => {
                let mut all: Vec<&Branch> = cases.iter().map(|c| &c.branch).collect();
                all.push(default);
                all
            }
            BlockFlow::Try {
                success, exception, ..
            } => vec![success, exception],
        }
    }

    /// Replace every outgoing branch, preserving the flow's shape. For
    /// switches the replacement list must hold `cases + 1` branches (the
    /// default comes last); other shapes take exactly their branch count.
    pub fn with_branches(&self, mut branches: Vec<Branch>) -> BlockFlow {
        match self {
            BlockFlow::Jump(_) => {
                assert_eq!(branches.len(), 1, "jump flow takes exactly one branch");
                BlockFlow::Jump(branches.pop().expect("checked above"))
            }
            BlockFlow::Return(instr) => {
                assert!(branches.is_empty(), "return flow takes no branches");
                BlockFlow::Return(instr.clone())
            }
            BlockFlow::Unreachable => {
                assert!(branches.is_empty(), "unreachable flow takes no branches");
                BlockFlow::Unreachable
            }
            BlockFlow::Switch { value, cases, .. } => {
                assert_eq!(
                    branches.len(),
                    cases.len() + 1,
                    "switch flow takes one branch per case plus the default"
                );
                let default = branches.pop().expect("checked above");
                BlockFlow::Switch {
                    value: value.clone(),
                    cases: cases
                        .iter()
                        .zip(branches)
                        .map(|(case, branch)| SwitchCase {
                            values: case.values.clone(),
                            branch,
                        })
                        .collect(),
                    default,
                }
            }
            BlockFlow::Try { inner, .. } => {
                assert_eq!(branches.len(), 2, "try flow takes success and exception");
                let exception = branches.pop().expect("checked above");
                let success = branches.pop().expect("checked above");
                BlockFlow::Try {
                    inner: inner.clone(),
                    success,
                    exception,
                }
            }
        }
    }

    /// The flow-level instructions embedded in this terminator.
    pub fn instructions(&self) -> Vec<&Instruction> {
        match self {
            BlockFlow::Return(instr) => vec![instr],
            BlockFlow::Switch { value, .. } => vec![value],
            BlockFlow::Try { inner, .. } => vec![inner],
            BlockFlow::Jump(_) | BlockFlow::Unreachable => Vec::new(),
        }
    }

    /// Rewrite embedded instructions through `mapper`, keeping branches.
    pub fn map_instructions(
        &self,
        mapper: &mut dyn FnMut(&Instruction) -> Instruction,
    ) -> BlockFlow {
        match self {
            BlockFlow::Return(instr) => BlockFlow::Return(mapper(instr)),
            BlockFlow::Switch {
                value,
                cases,
                default,
            } => BlockFlow::Switch {
                value: mapper(value),
                cases: cases.clone(),
                default: default.clone(),
            },
            BlockFlow::Try {
                inner,
                success,
                exception,
            } => BlockFlow::Try {
                inner: mapper(inner),
                success: success.clone(),
                exception: exception.clone(),
            },
            other => other.clone(),
        }
    }

    /// Rewrite block targets and value tags everywhere in this flow:
    /// branch targets, branch arguments, and embedded instruction
    /// arguments.
    pub fn map(
        &self,
        blocks: &mut dyn FnMut(&BlockTag) -> BlockTag,
        values: &mut dyn FnMut(&ValueTag) -> ValueTag,
    ) -> BlockFlow {
        match self {
            BlockFlow::Jump(branch) => BlockFlow::Jump(branch.map(blocks, values)),
            BlockFlow::Return(instr) => BlockFlow::Return(instr.map_arguments(values)),
            BlockFlow::Switch {
                value,
                cases,
                default,
            } => BlockFlow::Switch {
                value: value.map_arguments(values),
                cases: cases
                    .iter()
                    .map(|case| SwitchCase {
                        values: case.values.clone(),
                        branch: case.branch.map(blocks, values),
                    })
                    .collect(),
                default: default.map(blocks, values),
            },
            BlockFlow::Try {
                inner,
                success,
                exception,
            } => BlockFlow::Try {
                inner: inner.map_arguments(values),
                success: success.map(blocks, values),
                exception: exception.map(blocks, values),
            },
            BlockFlow::Unreachable => BlockFlow::Unreachable,
        }
    }

    /// Build the two-way conditional encoding: take `on_false` when the
    /// value is boolean `false`, `on_true` otherwise.
    pub fn boolean_switch(value: Instruction, on_false: Branch, on_true: Branch) -> BlockFlow {
        BlockFlow::Switch {
            value,
            cases: vec![SwitchCase {
                values: vec![Constant::Bool(false)],
                branch: on_false,
            }],
            default: on_true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Prototype;
    use crate::tag::TagAllocator;
    use crate::types::Type;

    #[test]
    fn default_flow_is_unreachable() {
        assert_eq!(BlockFlow::default(), BlockFlow::Unreachable);
    }

    #[test]
    fn switch_with_branches_preserves_shape() {
        let alloc = TagAllocator::new();
        let b1 = alloc.block("a");
        let b2 = alloc.block("b");
        let b3 = alloc.block("c");
        let cond = Instruction::new(Prototype::copy(Type::bool()), [alloc.value("c")]);

        let flow = BlockFlow::boolean_switch(
            cond,
            Branch::new(b1.clone(), []),
            Branch::new(b2.clone(), []),
        );
        let replaced = flow.with_branches(vec![
            Branch::new(b3.clone(), []),
            Branch::new(b1.clone(), []),
        ]);

        match replaced {
            BlockFlow::Switch { cases, default, .. } => {
                assert_eq!(cases.len(), 1);
                assert_eq!(cases[0].branch.target, b3);
                assert_eq!(cases[0].values, vec![Constant::Bool(false)]);
                assert_eq!(default.target, b1);
            }
            other => panic!("unexpected flow: {:?}", other),
        }
    }

    #[test]
    #[should_panic(expected = "one branch per case")]
    fn switch_with_branches_rejects_wrong_count() {
        let alloc = TagAllocator::new();
        let cond = Instruction::new(Prototype::copy(Type::bool()), [alloc.value("c")]);
        let flow = BlockFlow::boolean_switch(
            cond,
            Branch::new(alloc.block("a"), []),
            Branch::new(alloc.block("b"), []),
        );
        let _ = flow.with_branches(vec![Branch::new(alloc.block("c"), [])]);
    }

    #[test]
    fn branches_order_is_cases_then_default() {
        let alloc = TagAllocator::new();
        let b1 = alloc.block("a");
        let b2 = alloc.block("b");
        let cond = Instruction::new(Prototype::copy(Type::bool()), [alloc.value("c")]);
        let flow = BlockFlow::boolean_switch(
            cond,
            Branch::new(b1.clone(), []),
            Branch::new(b2.clone(), []),
        );
        let branches = flow.branches();
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].target, b1);
        assert_eq!(branches[1].target, b2);
    }
}
