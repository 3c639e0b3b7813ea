//! Mutable facade over the persistent graph.
//!
//! The builder holds one current snapshot. Every mutator derives a
//! successor snapshot and publishes it with a plain pointer swap, so an
//! observer that cloned the current graph earlier keeps a consistent view;
//! it never sees a half-applied edit.
//!
//! Handles returned by the builder ([`BlockBuilder`], [`InstructionBuilder`])
//! are live views keyed by tag, not bound to a snapshot: they re-resolve
//! through the current graph on every access, and they are valid exactly as
//! long as the current graph still contains their tag.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::block::{BasicBlock, BlockParameter};
use crate::flow::{Branch, BranchArgument, BlockFlow};
use crate::graph::{FlowGraph, GraphResult, SelectedInstruction};
use crate::instruction::Instruction;
use crate::proto::{ExceptionSpec, Prototype};
use crate::tag::{BlockTag, ValueTag};

// =============================================================================
// Builder
// =============================================================================

/// Rewrites a copied `Return` flow during graph inclusion. Receives the
/// builder, the host block that ended in the return, and the remapped
/// `Copy` instruction carrying the returned value; produces the flow that
/// replaces the return.
pub type ReturnHandler<'h> =
    dyn FnMut(&mut FlowGraphBuilder, &BlockTag, Instruction) -> BlockFlow + 'h;

/// Mutable builder over a [`FlowGraph`] snapshot.
pub struct FlowGraphBuilder {
    current: FlowGraph,
}

impl FlowGraphBuilder {
    /// Wrap an existing snapshot.
    pub fn new(graph: FlowGraph) -> Self {
        Self { current: graph }
    }

    /// The current snapshot.
    #[inline]
    pub fn graph(&self) -> &FlowGraph {
        &self.current
    }

    /// Finish editing, yielding the current snapshot.
    pub fn to_immutable(self) -> FlowGraph {
        self.current
    }

    // =========================================================================
    // Forwarded mutators
    // =========================================================================

    /// Add an empty block.
    pub fn add_block(&mut self, hint: impl Into<Arc<str>>) -> BlockTag {
        let (next, tag) = self.current.add_block(hint);
        self.current = next;
        tag
    }

    /// Remove a block and its values.
    pub fn remove_block(&mut self, tag: &BlockTag) -> GraphResult<()> {
        self.current = self.current.remove_block(tag)?;
        Ok(())
    }

    /// Insert an instruction at a position within a block.
    pub fn insert_instruction(
        &mut self,
        block: &BlockTag,
        index: usize,
        instruction: Instruction,
        name: impl Into<Arc<str>>,
    ) -> GraphResult<ValueTag> {
        let (next, selected) = self
            .current
            .insert_instruction(block, index, instruction, name)?;
        self.current = next;
        Ok(selected.tag().clone())
    }

    /// Append an instruction to a block.
    pub fn append_instruction(
        &mut self,
        block: &BlockTag,
        instruction: Instruction,
        name: impl Into<Arc<str>>,
    ) -> GraphResult<ValueTag> {
        let (next, selected) = self.current.append_instruction(block, instruction, name)?;
        self.current = next;
        Ok(selected.tag().clone())
    }

    /// Replace the instruction stored under a value tag.
    pub fn replace_instruction(
        &mut self,
        tag: &ValueTag,
        instruction: Instruction,
    ) -> GraphResult<()> {
        self.current = self.current.replace_instruction(tag, instruction)?;
        Ok(())
    }

    /// Remove an instruction and its value.
    pub fn remove_instruction(&mut self, tag: &ValueTag) -> GraphResult<()> {
        self.current = self.current.remove_instruction(tag)?;
        Ok(())
    }

    /// Replace a block's terminator.
    pub fn update_block_flow(&mut self, tag: &BlockTag, flow: BlockFlow) -> GraphResult<()> {
        self.current = self.current.update_block_flow(tag, flow)?;
        Ok(())
    }

    /// Replace a block's parameters.
    pub fn update_block_parameters(
        &mut self,
        tag: &BlockTag,
        parameters: Vec<BlockParameter>,
    ) -> GraphResult<()> {
        self.current = self.current.update_block_parameters(tag, parameters)?;
        Ok(())
    }

    /// Redesignate the entry block.
    pub fn set_entry_point(&mut self, tag: BlockTag) -> GraphResult<()> {
        self.current = self.current.with_entry_point(tag)?;
        Ok(())
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// A live view of a block.
    pub fn block<'a>(&'a mut self, tag: &BlockTag) -> BlockBuilder<'a> {
        BlockBuilder {
            builder: self,
            tag: tag.clone(),
        }
    }

    /// A live view of an instruction.
    pub fn instruction<'a>(&'a mut self, tag: &ValueTag) -> InstructionBuilder<'a> {
        InstructionBuilder {
            builder: self,
            tag: tag.clone(),
        }
    }

    /// Snapshot of every instruction tag, for rewriting walks that mutate
    /// as they go.
    pub fn instruction_tags(&self) -> Vec<ValueTag> {
        self.current
            .instructions()
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// Snapshot of every block tag.
    pub fn block_tags(&self) -> Vec<BlockTag> {
        self.current.blocks().map(|(tag, _)| tag.clone()).collect()
    }

    // =========================================================================
    // Graph inclusion
    // =========================================================================

    /// Copy `callee` into this graph with fresh tags.
    ///
    /// Every block and value receives a fresh tag; instruction arguments
    /// and branch targets are rewritten through the remap table, so no
    /// callee tag is ever referenced by the host. Copied `Return` flows are
    /// replaced by whatever `return_handler` produces. When
    /// `exception_branch` is given, every throwing instruction in the
    /// copied blocks is hoisted into `Try` flow whose exception edge is
    /// that branch.
    ///
    /// Returns the host tag of the callee's entry block.
    pub fn include_graph(
        &mut self,
        callee: &FlowGraph,
        return_handler: &mut ReturnHandler<'_>,
        exception_branch: Option<&Branch>,
    ) -> GraphResult<BlockTag> {
        let mut parts = self.current.to_parts();

        // Pass 1: allocate fresh tags for every callee block and value.
        let mut block_map: FxHashMap<BlockTag, BlockTag> = FxHashMap::default();
        let mut value_map: FxHashMap<ValueTag, ValueTag> = FxHashMap::default();
        for (tag, body) in callee.blocks() {
            block_map.insert(tag.clone(), parts.tags.block(tag.hint()));
            for param in &body.parameters {
                value_map.insert(param.tag.clone(), parts.tags.value(param.tag.hint()));
            }
            for instr_tag in &body.instructions {
                value_map.insert(instr_tag.clone(), parts.tags.value(instr_tag.hint()));
            }
        }

        let remap_block = |map: &FxHashMap<BlockTag, BlockTag>, tag: &BlockTag| -> BlockTag {
            map.get(tag).cloned().unwrap_or_else(|| tag.clone())
        };
        let remap_value = |map: &FxHashMap<ValueTag, ValueTag>, tag: &ValueTag| -> ValueTag {
            map.get(tag).cloned().unwrap_or_else(|| tag.clone())
        };

        // Pass 2: copy block bodies through the remap.
        let mut included: Vec<BlockTag> = Vec::with_capacity(callee.block_count());
        for (tag, body) in callee.blocks() {
            let host_tag = remap_block(&block_map, tag);
            let mut host_body = BasicBlock::new();
            host_body.parameters = body
                .parameters
                .iter()
                .map(|p| BlockParameter::new(remap_value(&value_map, &p.tag), p.ty))
                .collect();
            for instr_tag in &body.instructions {
                let host_instr_tag = remap_value(&value_map, instr_tag);
                let instr = callee
                    .get_instruction(instr_tag)?
                    .map_arguments(&mut |v| remap_value(&value_map, v));
                parts.register_instruction(host_instr_tag.clone(), host_tag.clone(), instr);
                host_body.instructions.push(host_instr_tag);
            }
            host_body.flow = body.flow.map(
                &mut |b| remap_block(&block_map, b),
                &mut |v| remap_value(&value_map, v),
            );
            parts.install_block(host_tag.clone(), host_body);
            included.push(host_tag);
        }

        self.current = FlowGraph::from_parts(parts);

        // Pass 3: hoist throwing instructions into try flow.
        if let Some(exception) = exception_branch {
            self.wrap_throwing_instructions(&mut included, exception)?;
        }

        // Pass 4: let the caller rewrite the copied returns.
        for block in &included {
            let flow = self.current.get_basic_block(block)?.flow.clone();
            if let BlockFlow::Return(ret) = flow {
                let replacement = return_handler(self, block, ret);
                self.update_block_flow(block, replacement)?;
            }
        }

        Ok(remap_block(&block_map, callee.entry_point()))
    }

    /// Split every listed block at its throwing instructions, turning each
    /// into `Try` flow with the given exception edge. Continuation blocks
    /// created by splits are appended to `blocks` so later passes see them.
    fn wrap_throwing_instructions(
        &mut self,
        blocks: &mut Vec<BlockTag>,
        exception: &Branch,
    ) -> GraphResult<()> {
        let mut queue: Vec<BlockTag> = blocks.clone();

        while let Some(block_tag) = queue.pop() {
            let body = self.current.get_basic_block(&block_tag)?.clone();
            let throwing = body.instructions.iter().position(|tag| {
                self.current
                    .get_instruction(tag)
                    .map(|i| i.prototype().exception_spec() == ExceptionSpec::MayThrow)
                    .unwrap_or(false)
            });
            let Some(split_at) = throwing else { continue };

            let inner_tag = body.instructions[split_at].clone();
            let inner = (**self.current.get_instruction(&inner_tag)?).clone();
            let result_ty = inner.result_type();

            // Continuation receives the guarded result as its parameter
            // (no parameter for void results).
            let mut parts = self.current.to_parts();
            let cont_tag = parts.tags.block(block_tag.hint());
            let mut cont_body = BasicBlock::new();
            let mut success_args = Vec::new();
            let mut result_param = None;
            if !result_ty.is_void() {
                let param_tag = parts.tags.value(inner_tag.hint());
                cont_body.parameters = vec![BlockParameter::new(param_tag.clone(), result_ty)];
                success_args.push(BranchArgument::TryResult);
                result_param = Some(param_tag);
            }
            cont_body.instructions = body.instructions[split_at + 1..].to_vec();
            cont_body.flow = body.flow.clone();

            let mut head_body = BasicBlock::new();
            head_body.parameters = body.parameters.clone();
            head_body.instructions = body.instructions[..split_at].to_vec();
            head_body.flow = BlockFlow::Try {
                inner,
                success: Branch::with_arguments(cont_tag.clone(), success_args),
                exception: exception.clone(),
            };

            parts.unregister_value(&inner_tag);
            parts.install_block(block_tag.clone(), head_body);
            parts.install_block(cont_tag.clone(), cont_body);
            self.current = FlowGraph::from_parts(parts);

            // The guarded instruction's value now enters through the
            // continuation parameter; rewrite its uses.
            if let Some(param_tag) = result_param {
                self.replace_value_uses(&inner_tag, &param_tag)?;
            }

            blocks.push(cont_tag.clone());
            queue.push(cont_tag);
            queue.push(block_tag);
        }

        Ok(())
    }

    /// Rewrite every use of `old` (instruction arguments, flow-level
    /// instructions, branch arguments) to `new`.
    fn replace_value_uses(&mut self, old: &ValueTag, new: &ValueTag) -> GraphResult<()> {
        let mut remap = |tag: &ValueTag| -> ValueTag {
            if tag == old {
                new.clone()
            } else {
                tag.clone()
            }
        };

        for tag in self.instruction_tags() {
            let instr = self.current.get_instruction(&tag)?;
            if instr.arguments().contains(old) {
                let rewritten = instr.map_arguments(&mut remap);
                self.replace_instruction(&tag, rewritten)?;
            }
        }

        for block in self.block_tags() {
            let flow = self.current.get_basic_block(&block)?.flow.clone();
            let rewritten = flow.map(&mut |b| b.clone(), &mut remap);
            if rewritten != flow {
                self.update_block_flow(&block, rewritten)?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Flow-instruction replacement
    // =========================================================================

    /// Replace the flow-level instruction of `block` with the body of an
    /// implementation graph whose entry parameters bind to `arguments`.
    ///
    /// When the implementation is a straight line (its entry terminates in
    /// a lone `Return`), its instructions are appended to the block and the
    /// flow instruction becomes a copy of the returned value. Otherwise a
    /// continuation block is created carrying the result as a parameter,
    /// the implementation is included with its returns routed there, and
    /// the block jumps into the included entry.
    pub fn replace_flow_instruction(
        &mut self,
        block: &BlockTag,
        impl_graph: &FlowGraph,
        arguments: &[ValueTag],
    ) -> GraphResult<()> {
        let flow = self.current.get_basic_block(block)?.flow.clone();
        let replaced = match flow.instructions().first() {
            Some(instr) => (*instr).clone(),
            None => return Ok(()),
        };
        let result_ty = replaced.result_type();

        let impl_entry = impl_graph.get_basic_block(impl_graph.entry_point())?;

        if let BlockFlow::Return(ret) = &impl_entry.flow {
            // Straight-line implementation: splice the entry block inline.
            let mut value_map: FxHashMap<ValueTag, ValueTag> = FxHashMap::default();
            for (param, arg) in impl_entry.parameters.iter().zip(arguments) {
                value_map.insert(param.tag.clone(), arg.clone());
            }
            for instr_tag in &impl_entry.instructions {
                let instr = impl_graph
                    .get_instruction(instr_tag)?
                    .map_arguments(&mut |v| value_map.get(v).cloned().unwrap_or_else(|| v.clone()));
                let host_tag = self.append_instruction(block, instr, instr_tag.hint())?;
                value_map.insert(instr_tag.clone(), host_tag);
            }
            let result = ret.map_arguments(&mut |v| {
                value_map.get(v).cloned().unwrap_or_else(|| v.clone())
            });
            let rewritten = flow.map_instructions(&mut |_| result.clone());
            self.update_block_flow(block, rewritten)?;
            return Ok(());
        }

        // General case: continuation block + full inclusion.
        let cont = self.add_block("continuation");
        let mut cont_args = Vec::new();
        if !result_ty.is_void() {
            let param = BlockParameter::new(self.current.tags().value("result"), result_ty);
            cont_args.push(param.tag.clone());
            self.update_block_parameters(&cont, vec![param])?;
        }

        let cont_for_handler = cont.clone();
        let entry = self.include_graph(
            impl_graph,
            &mut move |_builder, _block, ret_copy| {
                BlockFlow::Jump(Branch::new(
                    cont_for_handler.clone(),
                    ret_copy.arguments().iter().cloned(),
                ))
            },
            None,
        )?;

        // The continuation inherits the original flow with the replaced
        // instruction reading the continuation parameter.
        let result_copy = Instruction::new(
            Prototype::copy(result_ty),
            cont_args.iter().cloned(),
        );
        let cont_flow = flow.map_instructions(&mut |_| result_copy.clone());
        self.update_block_flow(&cont, cont_flow)?;

        self.update_block_flow(
            block,
            BlockFlow::Jump(Branch::new(entry, arguments.iter().cloned())),
        )?;
        Ok(())
    }
}

impl From<FlowGraph> for FlowGraphBuilder {
    fn from(graph: FlowGraph) -> Self {
        Self::new(graph)
    }
}

// =============================================================================
// Live views
// =============================================================================

/// Live view of a block, keyed by tag.
pub struct BlockBuilder<'a> {
    builder: &'a mut FlowGraphBuilder,
    tag: BlockTag,
}

impl<'a> BlockBuilder<'a> {
    /// The block's tag.
    #[inline]
    pub fn tag(&self) -> &BlockTag {
        &self.tag
    }

    /// Whether the current graph still contains this block.
    pub fn is_valid(&self) -> bool {
        self.builder.current.contains_block(&self.tag)
    }

    /// The block's parameters as of the current snapshot.
    pub fn parameters(&self) -> GraphResult<Vec<BlockParameter>> {
        Ok(self
            .builder
            .current
            .get_basic_block(&self.tag)?
            .parameters
            .clone())
    }

    /// Replace the parameter list.
    pub fn set_parameters(&mut self, parameters: Vec<BlockParameter>) -> GraphResult<()> {
        self.builder.update_block_parameters(&self.tag, parameters)
    }

    /// The block's terminator as of the current snapshot.
    pub fn flow(&self) -> GraphResult<BlockFlow> {
        Ok(self.builder.current.get_basic_block(&self.tag)?.flow.clone())
    }

    /// Replace the terminator.
    pub fn set_flow(&mut self, flow: BlockFlow) -> GraphResult<()> {
        self.builder.update_block_flow(&self.tag, flow)
    }

    /// Append an instruction, returning its value tag.
    pub fn append_instruction(
        &mut self,
        instruction: Instruction,
        name: impl Into<Arc<str>>,
    ) -> GraphResult<ValueTag> {
        self.builder.append_instruction(&self.tag, instruction, name)
    }
}

/// Live view of an instruction, keyed by value tag.
pub struct InstructionBuilder<'a> {
    builder: &'a mut FlowGraphBuilder,
    tag: ValueTag,
}

impl<'a> InstructionBuilder<'a> {
    /// The instruction's value tag.
    #[inline]
    pub fn tag(&self) -> &ValueTag {
        &self.tag
    }

    /// Whether the current graph still contains this value.
    pub fn is_valid(&self) -> bool {
        self.builder.current.contains_value(&self.tag)
    }

    /// A positioned view resolved through the current snapshot.
    pub fn selected(&self) -> GraphResult<SelectedInstruction> {
        self.builder.current.select_instruction(&self.tag)
    }

    /// The instruction payload as of the current snapshot.
    pub fn instruction(&self) -> GraphResult<Instruction> {
        Ok((**self.builder.current.get_instruction(&self.tag)?).clone())
    }

    /// Overwrite the instruction.
    pub fn set_instruction(&mut self, instruction: Instruction) -> GraphResult<()> {
        self.builder.replace_instruction(&self.tag, instruction)
    }

    /// Insert a new instruction immediately before this one.
    pub fn insert_before(
        &mut self,
        instruction: Instruction,
        name: impl Into<Arc<str>>,
    ) -> GraphResult<ValueTag> {
        let selected = self.builder.current.select_instruction(&self.tag)?;
        let index = selected.instruction_index(&self.builder.current)?;
        let block = selected.block().clone();
        self.builder
            .insert_instruction(&block, index, instruction, name)
    }

    /// Insert a new instruction immediately after this one.
    pub fn insert_after(
        &mut self,
        instruction: Instruction,
        name: impl Into<Arc<str>>,
    ) -> GraphResult<ValueTag> {
        let selected = self.builder.current.select_instruction(&self.tag)?;
        let index = selected.instruction_index(&self.builder.current)?;
        let block = selected.block().clone();
        self.builder
            .insert_instruction(&block, index + 1, instruction, name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::Constant;
    use crate::graph::FlowGraph;
    use crate::types::Type;

    fn const_i32(v: i32) -> Instruction {
        Instruction::new(Prototype::constant(Constant::I32(v), Type::int32()), [])
    }

    /// A callee graph computing `return 7`.
    fn return_seven() -> FlowGraph {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        let (graph, sel) = graph.append_instruction(&entry, const_i32(7), "seven").unwrap();
        let ret = Instruction::new(Prototype::copy(Type::int32()), [sel.tag().clone()]);
        graph.update_block_flow(&entry, BlockFlow::Return(ret)).unwrap()
    }

    #[test]
    fn views_follow_current_snapshot() {
        let mut builder = FlowGraphBuilder::new(FlowGraph::new());
        let tag = builder.add_block("b");
        {
            let view = builder.block(&tag);
            assert!(view.is_valid());
        }
        builder.remove_block(&tag).unwrap();
        let view = builder.block(&tag);
        assert!(!view.is_valid());
    }

    #[test]
    fn insert_before_and_after() {
        let mut builder = FlowGraphBuilder::new(FlowGraph::new());
        let entry = builder.graph().entry_point().clone();
        let mid = builder.append_instruction(&entry, const_i32(2), "two").unwrap();

        builder
            .instruction(&mid)
            .insert_before(const_i32(1), "one")
            .unwrap();
        builder
            .instruction(&mid)
            .insert_after(const_i32(3), "three")
            .unwrap();

        let block = builder.graph().get_basic_block(&entry).unwrap();
        let hints: Vec<&str> = block.instructions.iter().map(|t| t.hint()).collect();
        assert_eq!(hints, vec!["one", "two", "three"]);
    }

    #[test]
    fn include_remaps_every_tag() {
        let callee = return_seven();
        let mut builder = FlowGraphBuilder::new(FlowGraph::new());

        let mut returns = Vec::new();
        let entry = builder
            .include_graph(
                &callee,
                &mut |_b, block, ret| {
                    returns.push((block.clone(), ret));
                    BlockFlow::Unreachable
                },
                None,
            )
            .unwrap();

        // The callee is untouched and the host references none of its tags.
        assert!(builder.graph().contains_block(&entry));
        assert_ne!(&entry, callee.entry_point());
        for (tag, _) in callee.instructions() {
            assert!(!builder.graph().contains_value(tag));
        }
        // Exactly one fresh value per callee value.
        assert_eq!(
            builder.graph().instructions().count(),
            callee.instructions().count()
        );
        assert_eq!(returns.len(), 1);
    }

    #[test]
    fn include_wraps_throwing_instructions() {
        // Callee: call-like throwing intrinsic, then return its value.
        let callee = {
            let graph = FlowGraph::new();
            let entry = graph.entry_point().clone();
            let throwing = Instruction::new(
                Prototype::intrinsic(
                    "checked.div",
                    Type::int32(),
                    vec![],
                    ExceptionSpec::MayThrow,
                ),
                [],
            );
            let (graph, sel) = graph.append_instruction(&entry, throwing, "q").unwrap();
            let ret = Instruction::new(Prototype::copy(Type::int32()), [sel.tag().clone()]);
            graph.update_block_flow(&entry, BlockFlow::Return(ret)).unwrap()
        };

        let mut builder = FlowGraphBuilder::new(FlowGraph::new());
        let handler_block = builder.add_block("handler");
        let exception = Branch::with_arguments(handler_block, vec![BranchArgument::TryException]);

        let entry = builder
            .include_graph(&callee, &mut |_b, _block, _ret| BlockFlow::Unreachable, Some(&exception))
            .unwrap();

        let entry_body = builder.graph().get_basic_block(&entry).unwrap();
        match &entry_body.flow {
            BlockFlow::Try { success, exception, .. } => {
                assert_eq!(success.arguments, vec![BranchArgument::TryResult]);
                assert_eq!(exception.arguments, vec![BranchArgument::TryException]);
            }
            other => panic!("expected try flow, found {:?}", other),
        }
    }

    #[test]
    fn replace_flow_instruction_straight_line() {
        // Host block returns a constant; implementation computes 7.
        let mut builder = FlowGraphBuilder::new(FlowGraph::new());
        let entry = builder.graph().entry_point().clone();
        let c = builder.append_instruction(&entry, const_i32(1), "one").unwrap();
        builder
            .update_block_flow(
                &entry,
                BlockFlow::Return(Instruction::new(Prototype::copy(Type::int32()), [c])),
            )
            .unwrap();

        let before_blocks = builder.graph().block_count();
        builder
            .replace_flow_instruction(&entry, &return_seven(), &[])
            .unwrap();

        // Straight-line implementations splice inline: no new blocks.
        assert_eq!(builder.graph().block_count(), before_blocks);
        let body = builder.graph().get_basic_block(&entry).unwrap();
        assert_eq!(body.instructions.len(), 2);
        match &body.flow {
            BlockFlow::Return(copy) => {
                let arg = &copy.arguments()[0];
                assert_eq!(arg.hint(), "seven");
                assert!(builder.graph().contains_value(arg));
            }
            other => panic!("expected return, found {:?}", other),
        }
    }
}
