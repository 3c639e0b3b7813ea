//! Properties that span the graph, builder, and validator.

use opal_ir::validate::validate_graph;
use opal_ir::{
    BlockFlow, BlockParameter, Branch, Constant, FlowGraph, FlowGraphBuilder, Instruction,
    Prototype, Type,
};

fn const_i32(v: i32) -> Instruction {
    Instruction::new(Prototype::constant(Constant::I32(v), Type::int32()), [])
}

/// A callee graph with two blocks: entry computes a constant and jumps to
/// a block that returns a value passed as a parameter.
fn two_block_callee() -> FlowGraph {
    let graph = FlowGraph::new();
    let entry = graph.entry_point().clone();
    let (graph, exit) = graph.add_block("exit");

    let param = BlockParameter::new(graph.tags().value("r"), Type::int32());
    let graph = graph
        .update_block_parameters(&exit, vec![param.clone()])
        .unwrap();
    let graph = graph
        .update_block_flow(
            &exit,
            BlockFlow::Return(Instruction::new(
                Prototype::copy(Type::int32()),
                [param.tag.clone()],
            )),
        )
        .unwrap();

    let (graph, sel) = graph.append_instruction(&entry, const_i32(9), "nine").unwrap();
    graph
        .update_block_flow(
            &entry,
            BlockFlow::Jump(Branch::new(exit, [sel.tag().clone()])),
        )
        .unwrap()
}

#[test]
fn callee_graphs_validate_cleanly() {
    assert!(validate_graph(&two_block_callee()).is_empty());
}

#[test]
fn inclusion_preserves_validity_and_freshness() {
    let callee = two_block_callee();
    let mut builder = FlowGraphBuilder::new(FlowGraph::new());

    // Route returns into a fresh join block taking the returned value.
    let join = builder.add_block("join");
    builder
        .update_block_parameters(
            &join,
            vec![BlockParameter::new(
                builder.graph().tags().value("v"),
                Type::int32(),
            )],
        )
        .unwrap();
    let join_param = builder.graph().get_basic_block(&join).unwrap().parameters[0]
        .tag
        .clone();
    builder
        .update_block_flow(
            &join,
            BlockFlow::Return(Instruction::new(Prototype::copy(Type::int32()), [join_param])),
        )
        .unwrap();

    let join_for_handler = join.clone();
    let included_entry = builder
        .include_graph(
            &callee,
            &mut move |_builder, _block, ret| {
                BlockFlow::Jump(Branch::new(
                    join_for_handler.clone(),
                    ret.arguments().iter().cloned(),
                ))
            },
            None,
        )
        .unwrap();

    builder
        .update_block_flow(
            &builder.graph().entry_point().clone(),
            BlockFlow::Jump(Branch::new(included_entry.clone(), [])),
        )
        .unwrap();

    let host = builder.to_immutable();

    // Exactly one fresh block per callee block, plus host entry and join.
    assert_eq!(host.block_count(), callee.block_count() + 2);

    // No callee tag leaks into the host.
    for (tag, _) in callee.blocks() {
        assert!(!host.contains_block(tag));
    }
    for (tag, _) in callee.instructions() {
        assert!(!host.contains_value(tag));
    }

    // Every branch in the host resolves inside the host.
    assert!(validate_graph(&host).is_empty());

    // The callee itself is untouched.
    assert!(validate_graph(&callee).is_empty());
    assert_eq!(callee.block_count(), 2);
}

#[test]
fn snapshot_observers_are_isolated_from_builder_edits() {
    let graph = FlowGraph::new();
    let entry = graph.entry_point().clone();
    let (graph, sel) = graph.append_instruction(&entry, const_i32(1), "c").unwrap();

    let observed = graph.clone();
    let mut builder = FlowGraphBuilder::new(graph);
    builder.remove_instruction(sel.tag()).unwrap();

    // The observer's snapshot still contains the value; the builder's
    // current graph does not.
    assert!(observed.contains_value(sel.tag()));
    assert!(!builder.graph().contains_value(sel.tag()));
}
