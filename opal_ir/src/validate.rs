//! Graph validation: collect every invariant violation, never abort.

use crate::block::BasicBlock;
use crate::flow::{BlockFlow, Branch, BranchArgument};
use crate::graph::{FlowGraph, MethodBody};
use crate::instruction::Instruction;
use crate::proto::TypeEnv;
use crate::tag::{BlockTag, ValueTag};

// =============================================================================
// Errors
// =============================================================================

/// A single validation finding, anchored to the block and value it
/// concerns where those are known.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub block: Option<BlockTag>,
    pub value: Option<ValueTag>,
    pub message: String,
}

impl ValidationError {
    fn in_block(block: &BlockTag, message: impl Into<String>) -> Self {
        Self {
            block: Some(block.clone()),
            value: None,
            message: message.into(),
        }
    }

    fn at_value(block: &BlockTag, value: &ValueTag, message: impl Into<String>) -> Self {
        Self {
            block: Some(block.clone()),
            value: Some(value.clone()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.block, &self.value) {
            (Some(block), Some(value)) => {
                write!(f, "{} in {}: {}", value, block, self.message)
            }
            (Some(block), None) => write!(f, "{}: {}", block, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

// =============================================================================
// Validator
// =============================================================================

/// Which extra branch-argument kind a branch may carry, besides plain
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtraArgumentKind {
    None,
    TryResult,
    TryException,
}

/// Validate a method body's graph.
pub fn validate_body(body: &MethodBody) -> Vec<ValidationError> {
    validate_graph(&body.graph)
}

/// Validate a graph, returning every finding. An empty list means the
/// graph satisfies the structural invariants.
pub fn validate_graph(graph: &FlowGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !graph.contains_block(graph.entry_point()) {
        errors.push(ValidationError {
            block: Some(graph.entry_point().clone()),
            value: None,
            message: "entry point is not a block in the graph".into(),
        });
    }

    for (block_tag, block) in graph.blocks() {
        // Block-membership consistency: every listed instruction resolves.
        for instr_tag in &block.instructions {
            match graph.get_instruction(instr_tag) {
                Ok(instr) => {
                    validate_instruction(graph, block_tag, Some(instr_tag), instr, &mut errors)
                }
                Err(_) => errors.push(ValidationError::at_value(
                    block_tag,
                    instr_tag,
                    "instruction value is not in the graph",
                )),
            }
        }

        validate_flow(graph, block_tag, block, &mut errors);
    }

    errors
}

/// Check an instruction's arguments: existence first, then prototype
/// conformance.
fn validate_instruction(
    graph: &FlowGraph,
    block: &BlockTag,
    value: Option<&ValueTag>,
    instruction: &Instruction,
    errors: &mut Vec<ValidationError>,
) {
    let mut dangling = false;
    for arg in instruction.arguments() {
        if !graph.contains_value(arg) {
            dangling = true;
            errors.push(ValidationError {
                block: Some(block.clone()),
                value: value.cloned(),
                message: format!("argument {} is not defined in the graph", arg),
            });
        }
    }
    if dangling {
        return;
    }

    for message in instruction
        .prototype()
        .check_conformance(instruction.arguments(), graph as &dyn TypeEnv)
    {
        errors.push(ValidationError {
            block: Some(block.clone()),
            value: value.cloned(),
            message,
        });
    }
}

/// Validate a block's terminator: embedded instructions and every branch.
fn validate_flow(
    graph: &FlowGraph,
    block_tag: &BlockTag,
    block: &BasicBlock,
    errors: &mut Vec<ValidationError>,
) {
    for instr in block.flow.instructions() {
        validate_instruction(graph, block_tag, None, instr, errors);
    }

    match &block.flow {
        BlockFlow::Try {
            success, exception, ..
        } => {
            validate_branch(graph, block_tag, success, ExtraArgumentKind::TryResult, errors);
            validate_branch(
                graph,
                block_tag,
                exception,
                ExtraArgumentKind::TryException,
                errors,
            );
        }
        other => {
            for branch in other.branches() {
                validate_branch(graph, block_tag, branch, ExtraArgumentKind::None, errors);
            }
        }
    }
}

/// Validate one branch: target membership, arity, per-slot types, and
/// placement of the special argument kinds.
fn validate_branch(
    graph: &FlowGraph,
    block_tag: &BlockTag,
    branch: &Branch,
    extra: ExtraArgumentKind,
    errors: &mut Vec<ValidationError>,
) {
    let target = match graph.get_basic_block(&branch.target) {
        Ok(target) => target,
        Err(_) => {
            errors.push(ValidationError::in_block(
                block_tag,
                "Branch to block outside of graph",
            ));
            return;
        }
    };

    if branch.arguments.len() != target.parameters.len() {
        errors.push(ValidationError::in_block(
            block_tag,
            format!(
                "branch to {} passes {} argument(s), target takes {}",
                branch.target,
                branch.arguments.len(),
                target.parameters.len()
            ),
        ));
        return;
    }

    for (argument, parameter) in branch.arguments.iter().zip(&target.parameters) {
        match argument {
            BranchArgument::Value(tag) => match graph.get_value_type(tag) {
                Ok(actual) if actual == parameter.ty => {}
                Ok(actual) => errors.push(ValidationError::in_block(
                    block_tag,
                    format!(
                        "branch argument {} has type '{}', target parameter {} takes '{}'",
                        tag, actual, parameter.tag, parameter.ty
                    ),
                )),
                Err(_) => errors.push(ValidationError::in_block(
                    block_tag,
                    format!("branch argument {} is not defined in the graph", tag),
                )),
            },
            BranchArgument::TryResult => {
                if extra != ExtraArgumentKind::TryResult {
                    errors.push(ValidationError::in_block(
                        block_tag,
                        "try-result argument outside the success edge of try flow",
                    ));
                }
            }
            BranchArgument::TryException => {
                if extra != ExtraArgumentKind::TryException {
                    errors.push(ValidationError::in_block(
                        block_tag,
                        "try-exception argument outside the exception edge of try flow",
                    ));
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockParameter;
    use crate::constant::Constant;
    use crate::proto::Prototype;
    use crate::tag::TagAllocator;
    use crate::types::Type;

    fn const_i32(v: i32) -> Instruction {
        Instruction::new(Prototype::constant(Constant::I32(v), Type::int32()), [])
    }

    /// A two-block graph: entry jumps to a block taking one int32.
    fn valid_graph() -> FlowGraph {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        let (graph, target) = graph.add_block("target");

        let param = BlockParameter::new(graph.tags().value("p"), Type::int32());
        let graph = graph.update_block_parameters(&target, vec![param.clone()]).unwrap();
        let ret = Instruction::new(Prototype::copy(Type::int32()), [param.tag.clone()]);
        let graph = graph.update_block_flow(&target, BlockFlow::Return(ret)).unwrap();

        let (graph, sel) = graph.append_instruction(&entry, const_i32(3), "c").unwrap();
        graph
            .update_block_flow(
                &entry,
                BlockFlow::Jump(Branch::new(target, [sel.tag().clone()])),
            )
            .unwrap()
    }

    #[test]
    fn valid_graph_yields_no_errors() {
        assert!(validate_graph(&valid_graph()).is_empty());
    }

    #[test]
    fn branch_outside_graph_is_reported() {
        // S6: a branch whose target was never added to the graph.
        let graph = valid_graph();
        let entry = graph.entry_point().clone();
        let foreign = TagAllocator::new().block("elsewhere");
        let graph = graph
            .update_block_flow(&entry, BlockFlow::Jump(Branch::new(foreign, [])))
            .unwrap();

        let errors = validate_graph(&graph);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Branch to block outside of graph")));
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let graph = valid_graph();
        let entry = graph.entry_point().clone();
        let target = graph
            .blocks()
            .map(|(t, _)| t.clone())
            .find(|t| t != &entry)
            .unwrap();
        let graph = graph
            .update_block_flow(&entry, BlockFlow::Jump(Branch::new(target, [])))
            .unwrap();

        let errors = validate_graph(&graph);
        assert!(errors.iter().any(|e| e.message.contains("passes 0 argument")));
    }

    #[test]
    fn argument_type_mismatch_is_reported() {
        let graph = valid_graph();
        let entry = graph.entry_point().clone();
        let target = graph
            .blocks()
            .map(|(t, _)| t.clone())
            .find(|t| t != &entry)
            .unwrap();

        let wrong = Instruction::new(
            Prototype::constant(Constant::Bool(true), Type::bool()),
            [],
        );
        let (graph, sel) = graph.append_instruction(&entry, wrong, "b").unwrap();
        let graph = graph
            .update_block_flow(
                &entry,
                BlockFlow::Jump(Branch::new(target, [sel.tag().clone()])),
            )
            .unwrap();

        let errors = validate_graph(&graph);
        assert!(errors.iter().any(|e| e.message.contains("has type 'bool'")));
    }

    #[test]
    fn dangling_instruction_argument_is_reported() {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        let ghost = graph.tags().value("ghost");
        let instr = Instruction::new(Prototype::copy(Type::int32()), [ghost]);
        let (graph, _) = graph.append_instruction(&entry, instr, "c").unwrap();

        let errors = validate_graph(&graph);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("not defined in the graph")));
    }

    #[test]
    fn try_result_outside_try_is_reported() {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        let (graph, target) = graph.add_block("t");
        let param = BlockParameter::new(graph.tags().value("p"), Type::int32());
        let graph = graph.update_block_parameters(&target, vec![param]).unwrap();
        let graph = graph
            .update_block_flow(
                &entry,
                BlockFlow::Jump(Branch::with_arguments(
                    target,
                    vec![BranchArgument::TryResult],
                )),
            )
            .unwrap();

        let errors = validate_graph(&graph);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("try-result argument outside")));
    }

    #[test]
    fn conformance_violation_is_reported() {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        let (graph, sel) = graph.append_instruction(&entry, const_i32(1), "c").unwrap();
        // copy int64 applied to an int32 value.
        let bad = Instruction::new(Prototype::copy(Type::int64()), [sel.tag().clone()]);
        let (graph, _) = graph.append_instruction(&entry, bad, "bad").unwrap();

        let errors = validate_graph(&graph);
        assert!(errors.iter().any(|e| e.message.contains("expected 'int64'")));
    }
}
