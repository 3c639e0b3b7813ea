//! The persistent control-flow graph and method bodies built on it.
//!
//! A [`FlowGraph`] is a value: every mutator takes `&self` and returns a
//! successor snapshot. Snapshots share structure: block bodies and
//! instructions sit behind `Arc`, so deriving a snapshot copies only the
//! index maps. Observers holding an older snapshot are never disturbed by
//! later edits.
//!
//! Each snapshot carries a process-unique revision, which the analysis
//! cache uses to memoize per-graph results.

use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::block::{BasicBlock, BlockParameter};
use crate::flow::BlockFlow;
use crate::instruction::Instruction;
use crate::proto::TypeEnv;
use crate::tag::{BlockTag, TagAllocator, ValueTag};
use crate::types::Type;

// =============================================================================
// Errors
// =============================================================================

/// A graph operation referenced something the snapshot does not contain.
#[derive(Debug, Clone)]
pub enum GraphError {
    UnknownBlock(BlockTag),
    UnknownValue(ValueTag),
    /// An instruction insertion index past the end of the block.
    IndexOutOfRange { block: BlockTag, index: usize },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::UnknownBlock(tag) => write!(f, "block {} is not in the graph", tag),
            GraphError::UnknownValue(tag) => write!(f, "value {} is not in the graph", tag),
            GraphError::IndexOutOfRange { block, index } => {
                write!(f, "index {} is out of range for block {}", index, block)
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

// =============================================================================
// Flow Graph
// =============================================================================

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

fn fresh_revision() -> u64 {
    NEXT_REVISION.fetch_add(1, Ordering::Relaxed)
}

/// A persistent control-flow graph snapshot.
#[derive(Clone)]
pub struct FlowGraph {
    blocks: FxHashMap<BlockTag, Arc<BasicBlock>>,
    instructions: FxHashMap<ValueTag, Arc<Instruction>>,
    value_types: FxHashMap<ValueTag, Type>,
    value_parents: FxHashMap<ValueTag, BlockTag>,
    entry: BlockTag,
    tags: Arc<TagAllocator>,
    revision: u64,
}

impl FlowGraph {
    /// Create a graph holding a single empty entry block.
    pub fn new() -> FlowGraph {
        let tags = Arc::new(TagAllocator::new());
        let entry = tags.block("entry");
        let mut blocks = FxHashMap::default();
        blocks.insert(entry.clone(), Arc::new(BasicBlock::new()));
        FlowGraph {
            blocks,
            instructions: FxHashMap::default(),
            value_types: FxHashMap::default(),
            value_parents: FxHashMap::default(),
            entry,
            tags,
            revision: fresh_revision(),
        }
    }

    /// Copy the index maps into a successor snapshot with a new revision.
    fn derive(&self) -> FlowGraph {
        let mut next = self.clone();
        next.revision = fresh_revision();
        next
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The snapshot's unique revision.
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The allocator shared by all snapshots of this graph family.
    #[inline]
    pub fn tags(&self) -> &TagAllocator {
        &self.tags
    }

    /// The designated entry block.
    #[inline]
    pub fn entry_point(&self) -> &BlockTag {
        &self.entry
    }

    #[inline]
    pub fn contains_block(&self, tag: &BlockTag) -> bool {
        self.blocks.contains_key(tag)
    }

    #[inline]
    pub fn contains_value(&self, tag: &ValueTag) -> bool {
        self.value_parents.contains_key(tag)
    }

    /// A block body by tag.
    pub fn get_basic_block(&self, tag: &BlockTag) -> GraphResult<&Arc<BasicBlock>> {
        self.blocks
            .get(tag)
            .ok_or_else(|| GraphError::UnknownBlock(tag.clone()))
    }

    /// An instruction by its owning value tag. Block parameters have no
    /// instruction and report `UnknownValue`.
    pub fn get_instruction(&self, tag: &ValueTag) -> GraphResult<&Arc<Instruction>> {
        self.instructions
            .get(tag)
            .ok_or_else(|| GraphError::UnknownValue(tag.clone()))
    }

    /// The result type of a value (parameter or instruction).
    pub fn get_value_type(&self, tag: &ValueTag) -> GraphResult<Type> {
        self.value_types
            .get(tag)
            .copied()
            .ok_or_else(|| GraphError::UnknownValue(tag.clone()))
    }

    /// The block owning a value.
    pub fn get_value_parent(&self, tag: &ValueTag) -> GraphResult<&BlockTag> {
        self.value_parents
            .get(tag)
            .ok_or_else(|| GraphError::UnknownValue(tag.clone()))
    }

    /// Iterate over all blocks.
    pub fn blocks(&self) -> impl Iterator<Item = (&BlockTag, &Arc<BasicBlock>)> {
        self.blocks.iter()
    }

    /// Iterate over all instruction-producing values.
    pub fn instructions(&self) -> impl Iterator<Item = (&ValueTag, &Arc<Instruction>)> {
        self.instructions.iter()
    }

    /// Number of blocks in this snapshot.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Resolve a value tag into a positioned instruction view.
    pub fn select_instruction(&self, tag: &ValueTag) -> GraphResult<SelectedInstruction> {
        let block = self.get_value_parent(tag)?.clone();
        let instruction = self.get_instruction(tag)?.clone();
        Ok(SelectedInstruction {
            block,
            tag: tag.clone(),
            instruction,
            index: Cell::new(None),
        })
    }

    // =========================================================================
    // Mutators (snapshot-deriving)
    // =========================================================================

    /// Add an empty `Unreachable` block.
    pub fn add_block(&self, hint: impl Into<Arc<str>>) -> (FlowGraph, BlockTag) {
        let tag = self.tags.block(hint);
        let mut next = self.derive();
        next.blocks.insert(tag.clone(), Arc::new(BasicBlock::new()));
        (next, tag)
    }

    /// Remove a block along with every value it defines. Branches elsewhere
    /// that still target the block become validator findings, not errors
    /// here.
    pub fn remove_block(&self, tag: &BlockTag) -> GraphResult<FlowGraph> {
        let block = self.get_basic_block(tag)?.clone();
        let mut next = self.derive();
        for param in &block.parameters {
            next.value_types.remove(&param.tag);
            next.value_parents.remove(&param.tag);
        }
        for instr_tag in &block.instructions {
            next.instructions.remove(instr_tag);
            next.value_types.remove(instr_tag);
            next.value_parents.remove(instr_tag);
        }
        next.blocks.remove(tag);
        Ok(next)
    }

    /// Insert an instruction at `index` within a block, naming its result.
    pub fn insert_instruction(
        &self,
        block_tag: &BlockTag,
        index: usize,
        instruction: Instruction,
        name: impl Into<Arc<str>>,
    ) -> GraphResult<(FlowGraph, SelectedInstruction)> {
        let block = self.get_basic_block(block_tag)?;
        if index > block.instructions.len() {
            return Err(GraphError::IndexOutOfRange {
                block: block_tag.clone(),
                index,
            });
        }

        let tag = self.tags.value(name);
        let mut next = self.derive();

        let mut body = (**block).clone();
        body.instructions.insert(index, tag.clone());
        next.blocks.insert(block_tag.clone(), Arc::new(body));

        let instruction = Arc::new(instruction);
        next.value_types
            .insert(tag.clone(), instruction.result_type());
        next.value_parents.insert(tag.clone(), block_tag.clone());
        next.instructions.insert(tag.clone(), instruction.clone());

        let selected = SelectedInstruction {
            block: block_tag.clone(),
            tag,
            instruction,
            index: Cell::new(Some(index)),
        };
        Ok((next, selected))
    }

    /// Append an instruction to the end of a block.
    pub fn append_instruction(
        &self,
        block_tag: &BlockTag,
        instruction: Instruction,
        name: impl Into<Arc<str>>,
    ) -> GraphResult<(FlowGraph, SelectedInstruction)> {
        let len = self.get_basic_block(block_tag)?.instructions.len();
        self.insert_instruction(block_tag, len, instruction, name)
    }

    /// Swap the instruction stored under an existing value tag.
    pub fn replace_instruction(
        &self,
        tag: &ValueTag,
        instruction: Instruction,
    ) -> GraphResult<FlowGraph> {
        if !self.instructions.contains_key(tag) {
            return Err(GraphError::UnknownValue(tag.clone()));
        }
        let mut next = self.derive();
        next.value_types.insert(tag.clone(), instruction.result_type());
        next.instructions.insert(tag.clone(), Arc::new(instruction));
        Ok(next)
    }

    /// Remove an instruction and its value.
    pub fn remove_instruction(&self, tag: &ValueTag) -> GraphResult<FlowGraph> {
        let parent = self.get_value_parent(tag)?.clone();
        let block = self.get_basic_block(&parent)?;

        let mut next = self.derive();
        let mut body = (**block).clone();
        body.instructions.retain(|t| t != tag);
        next.blocks.insert(parent, Arc::new(body));
        next.instructions.remove(tag);
        next.value_types.remove(tag);
        next.value_parents.remove(tag);
        Ok(next)
    }

    /// Replace a block's terminator.
    pub fn update_block_flow(&self, tag: &BlockTag, flow: BlockFlow) -> GraphResult<FlowGraph> {
        let block = self.get_basic_block(tag)?;
        let mut next = self.derive();
        let mut body = (**block).clone();
        body.flow = flow;
        next.blocks.insert(tag.clone(), Arc::new(body));
        Ok(next)
    }

    /// Replace a block's parameter list, retiring the old parameter values
    /// and registering the new ones.
    pub fn update_block_parameters(
        &self,
        tag: &BlockTag,
        parameters: Vec<BlockParameter>,
    ) -> GraphResult<FlowGraph> {
        let block = self.get_basic_block(tag)?;
        let mut next = self.derive();

        let mut body = (**block).clone();
        for old in &body.parameters {
            next.value_types.remove(&old.tag);
            next.value_parents.remove(&old.tag);
        }
        for param in &parameters {
            next.value_types.insert(param.tag.clone(), param.ty);
            next.value_parents.insert(param.tag.clone(), tag.clone());
        }
        body.parameters = parameters;
        next.blocks.insert(tag.clone(), Arc::new(body));
        Ok(next)
    }

    /// Redesignate the entry block.
    pub fn with_entry_point(&self, tag: BlockTag) -> GraphResult<FlowGraph> {
        if !self.contains_block(&tag) {
            return Err(GraphError::UnknownBlock(tag));
        }
        let mut next = self.derive();
        next.entry = tag;
        Ok(next)
    }

    // =========================================================================
    // Raw parts (crate-internal)
    // =========================================================================

    /// Decompose into editable maps for multi-step surgery (graph
    /// inclusion). The caller reassembles with [`FlowGraph::from_parts`];
    /// every intermediate state stays private to the edit.
    pub(crate) fn to_parts(&self) -> GraphParts {
        GraphParts {
            blocks: self.blocks.clone(),
            instructions: self.instructions.clone(),
            value_types: self.value_types.clone(),
            value_parents: self.value_parents.clone(),
            entry: self.entry.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Reassemble a snapshot from edited parts.
    pub(crate) fn from_parts(parts: GraphParts) -> FlowGraph {
        FlowGraph {
            blocks: parts.blocks,
            instructions: parts.instructions,
            value_types: parts.value_types,
            value_parents: parts.value_parents,
            entry: parts.entry,
            tags: parts.tags,
            revision: fresh_revision(),
        }
    }
}

/// Editable decomposition of a [`FlowGraph`]. Crate-internal.
pub(crate) struct GraphParts {
    pub blocks: FxHashMap<BlockTag, Arc<BasicBlock>>,
    pub instructions: FxHashMap<ValueTag, Arc<Instruction>>,
    pub value_types: FxHashMap<ValueTag, Type>,
    pub value_parents: FxHashMap<ValueTag, BlockTag>,
    pub entry: BlockTag,
    pub tags: Arc<TagAllocator>,
}

impl GraphParts {
    /// Register an instruction value owned by `parent`.
    pub(crate) fn register_instruction(
        &mut self,
        tag: ValueTag,
        parent: BlockTag,
        instruction: Instruction,
    ) {
        self.value_types.insert(tag.clone(), instruction.result_type());
        self.value_parents.insert(tag.clone(), parent);
        self.instructions.insert(tag, Arc::new(instruction));
    }

    /// Drop a value from every index.
    pub(crate) fn unregister_value(&mut self, tag: &ValueTag) {
        self.instructions.remove(tag);
        self.value_types.remove(tag);
        self.value_parents.remove(tag);
    }

    /// Install a block body, registering parameter ownership. Instruction
    /// tags listed by the body must be registered separately.
    pub(crate) fn install_block(&mut self, tag: BlockTag, body: BasicBlock) {
        for param in &body.parameters {
            self.value_types.insert(param.tag.clone(), param.ty);
            self.value_parents.insert(param.tag.clone(), tag.clone());
        }
        for instr_tag in &body.instructions {
            self.value_parents.insert(instr_tag.clone(), tag.clone());
        }
        self.blocks.insert(tag, Arc::new(body));
    }
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeEnv for FlowGraph {
    fn type_of(&self, tag: &ValueTag) -> Option<Type> {
        self.value_types.get(tag).copied()
    }
}

impl std::fmt::Debug for FlowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "FlowGraph (rev {}, entry {}):", self.revision, self.entry)?;
        for (tag, block) in &self.blocks {
            writeln!(f, "  {}:", tag)?;
            for param in &block.parameters {
                writeln!(f, "    param {} : {}", param.tag, param.ty)?;
            }
            for instr_tag in &block.instructions {
                if let Some(instr) = self.instructions.get(instr_tag) {
                    writeln!(f, "    {} = {:?}", instr_tag, instr)?;
                }
            }
            writeln!(f, "    {:?}", block.flow)?;
        }
        Ok(())
    }
}

// =============================================================================
// Selected Instruction
// =============================================================================

/// A positioned view of one instruction: owning block, value tag, payload,
/// and a lazily computed index within the block's instruction list.
///
/// The index cache is monotonic: once computed against a snapshot it stays
/// correct until the instruction is removed, at which point the view as a
/// whole is invalid.
#[derive(Clone)]
pub struct SelectedInstruction {
    block: BlockTag,
    tag: ValueTag,
    instruction: Arc<Instruction>,
    index: Cell<Option<usize>>,
}

impl SelectedInstruction {
    /// The block owning this instruction.
    #[inline]
    pub fn block(&self) -> &BlockTag {
        &self.block
    }

    /// The value tag naming this instruction's result.
    #[inline]
    pub fn tag(&self) -> &ValueTag {
        &self.tag
    }

    /// The instruction payload as of the snapshot this view was taken from.
    #[inline]
    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    /// Position within the owning block, resolved through `graph` on first
    /// use and cached.
    pub fn instruction_index(&self, graph: &FlowGraph) -> GraphResult<usize> {
        if let Some(cached) = self.index.get() {
            return Ok(cached);
        }
        let block = graph.get_basic_block(&self.block)?;
        let index = block
            .instruction_index(&self.tag)
            .ok_or_else(|| GraphError::UnknownValue(self.tag.clone()))?;
        self.index.set(Some(index));
        Ok(index)
    }

    /// The instruction preceding this one in its block.
    pub fn previous_instruction(&self, graph: &FlowGraph) -> GraphResult<Option<SelectedInstruction>> {
        let index = self.instruction_index(graph)?;
        if index == 0 {
            return Ok(None);
        }
        let block = graph.get_basic_block(&self.block)?;
        let tag = &block.instructions[index - 1];
        Ok(Some(SelectedInstruction {
            block: self.block.clone(),
            tag: tag.clone(),
            instruction: graph.get_instruction(tag)?.clone(),
            index: Cell::new(Some(index - 1)),
        }))
    }

    /// The instruction following this one in its block.
    pub fn next_instruction(&self, graph: &FlowGraph) -> GraphResult<Option<SelectedInstruction>> {
        let index = self.instruction_index(graph)?;
        let block = graph.get_basic_block(&self.block)?;
        if index + 1 >= block.instructions.len() {
            return Ok(None);
        }
        let tag = &block.instructions[index + 1];
        Ok(Some(SelectedInstruction {
            block: self.block.clone(),
            tag: tag.clone(),
            instruction: graph.get_instruction(tag)?.clone(),
            index: Cell::new(Some(index + 1)),
        }))
    }
}

impl std::fmt::Debug for SelectedInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {:?} in {}", self.tag, self.instruction, self.block)
    }
}

// =============================================================================
// Method Body
// =============================================================================

/// A named, typed input of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub tag: ValueTag,
    pub ty: Type,
    pub name: Arc<str>,
}

impl Parameter {
    pub fn new(tag: ValueTag, ty: Type, name: impl Into<Arc<str>>) -> Self {
        Self {
            tag,
            ty,
            name: name.into(),
        }
    }
}

/// A method's control-flow graph together with its signature-level inputs.
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub graph: FlowGraph,
    pub return_type: Type,
    pub this_parameter: Option<Parameter>,
    pub parameters: Vec<Parameter>,
}

impl MethodBody {
    pub fn new(
        graph: FlowGraph,
        return_type: Type,
        this_parameter: Option<Parameter>,
        parameters: Vec<Parameter>,
    ) -> Self {
        Self {
            graph,
            return_type,
            this_parameter,
            parameters,
        }
    }

    /// The `this` parameter (when present) followed by the declared
    /// parameters.
    pub fn extended_parameters(&self) -> Vec<&Parameter> {
        self.this_parameter
            .iter()
            .chain(self.parameters.iter())
            .collect()
    }

    /// Replace the graph, keeping the signature.
    pub fn with_graph(&self, graph: FlowGraph) -> MethodBody {
        MethodBody {
            graph,
            return_type: self.return_type,
            this_parameter: self.this_parameter.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl TypeEnv for MethodBody {
    fn type_of(&self, tag: &ValueTag) -> Option<Type> {
        self.graph.type_of(tag)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Prototype;
    use crate::constant::Constant;

    #[test]
    fn new_graph_has_unreachable_entry() {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        assert!(graph.contains_block(&entry));
        let block = graph.get_basic_block(&entry).unwrap();
        assert_eq!(block.flow, BlockFlow::Unreachable);
    }

    #[test]
    fn add_block_yields_unreachable_default() {
        let graph = FlowGraph::new();
        let (graph, tag) = graph.add_block("b");
        assert!(graph.contains_block(&tag));
        assert_eq!(
            graph.get_basic_block(&tag).unwrap().flow,
            BlockFlow::Unreachable
        );
    }

    #[test]
    fn snapshots_are_independent() {
        let g0 = FlowGraph::new();
        let (g1, tag) = g0.add_block("b");
        assert!(!g0.contains_block(&tag));
        assert!(g1.contains_block(&tag));
        assert_ne!(g0.revision(), g1.revision());
    }

    #[test]
    fn insert_instruction_registers_value() {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        let instr = Instruction::new(
            Prototype::constant(Constant::I32(42), Type::int32()),
            [],
        );
        let (graph, sel) = graph.insert_instruction(&entry, 0, instr, "c").unwrap();

        assert!(graph.contains_value(sel.tag()));
        assert_eq!(graph.get_value_type(sel.tag()).unwrap(), Type::int32());
        assert_eq!(graph.get_value_parent(sel.tag()).unwrap(), &entry);
        assert_eq!(sel.instruction_index(&graph).unwrap(), 0);
    }

    #[test]
    fn insert_out_of_range_fails() {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        let instr = Instruction::new(
            Prototype::constant(Constant::I32(1), Type::int32()),
            [],
        );
        assert!(matches!(
            graph.insert_instruction(&entry, 3, instr, "c"),
            Err(GraphError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn neighbour_navigation() {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        let c = |v| Instruction::new(Prototype::constant(Constant::I32(v), Type::int32()), []);

        let (graph, first) = graph.append_instruction(&entry, c(1), "a").unwrap();
        let (graph, second) = graph.append_instruction(&entry, c(2), "b").unwrap();

        let next = first.next_instruction(&graph).unwrap().unwrap();
        assert_eq!(next.tag(), second.tag());
        let prev = second.previous_instruction(&graph).unwrap().unwrap();
        assert_eq!(prev.tag(), first.tag());
        assert!(first.previous_instruction(&graph).unwrap().is_none());
        assert!(second.next_instruction(&graph).unwrap().is_none());
    }

    #[test]
    fn remove_instruction_unregisters_value() {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        let instr = Instruction::new(
            Prototype::constant(Constant::I32(1), Type::int32()),
            [],
        );
        let (graph, sel) = graph.append_instruction(&entry, instr, "c").unwrap();
        let graph = graph.remove_instruction(sel.tag()).unwrap();
        assert!(!graph.contains_value(sel.tag()));
        assert!(graph
            .get_basic_block(&entry)
            .unwrap()
            .instructions
            .is_empty());
    }

    #[test]
    fn remove_block_drops_its_values() {
        let graph = FlowGraph::new();
        let (graph, tag) = graph.add_block("b");
        let instr = Instruction::new(
            Prototype::constant(Constant::I32(1), Type::int32()),
            [],
        );
        let (graph, sel) = graph.append_instruction(&tag, instr, "c").unwrap();
        let graph = graph.remove_block(&tag).unwrap();
        assert!(!graph.contains_block(&tag));
        assert!(!graph.contains_value(sel.tag()));
    }

    #[test]
    fn update_block_parameters_swaps_values() {
        let graph = FlowGraph::new();
        let entry = graph.entry_point().clone();
        let p1 = BlockParameter::new(graph.tags().value("x"), Type::int32());
        let graph = graph
            .update_block_parameters(&entry, vec![p1.clone()])
            .unwrap();
        assert_eq!(graph.get_value_type(&p1.tag).unwrap(), Type::int32());

        let p2 = BlockParameter::new(graph.tags().value("y"), Type::bool());
        let graph = graph
            .update_block_parameters(&entry, vec![p2.clone()])
            .unwrap();
        assert!(!graph.contains_value(&p1.tag));
        assert_eq!(graph.get_value_type(&p2.tag).unwrap(), Type::bool());
    }

    #[test]
    fn entry_point_must_exist() {
        let graph = FlowGraph::new();
        let foreign = TagAllocator::new().block("other");
        assert!(graph.with_entry_point(foreign).is_err());
    }
}
