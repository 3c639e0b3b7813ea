//! Abstract interpretation of the operand stack.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

use opal_bytecode::{InstrIndex, MethodBytecode, Opcode};
use opal_ir::{
    BlockFlow, BlockParameter, BlockTag, Branch, CallLookup, Constant, ExceptionSpec, FlowGraph,
    Instruction, IntWidth, MethodBody, Parameter, Prototype, SwitchCase, Type, TypeKind, ValueTag,
};

use crate::error::{LowerError, LowerResult};
use crate::targets::branch_targets;

/// The simulated operand stack: bottom of the stack first.
type OperandStack = SmallVec<[(ValueTag, Type); 8]>;

/// Translate a bytecode method into an IR method body.
///
/// Produces one basic block per branch-target region; operand stack
/// contents at block boundaries become block parameters. Raises
/// [`LowerError`] on malformed input (the caller abandons this method but
/// may keep compiling others).
pub fn translate(method: &MethodBytecode) -> LowerResult<MethodBody> {
    Translator::new(method).run()
}

struct Translator<'a> {
    method: &'a MethodBytecode,
    graph: FlowGraph,
    /// Block skeletons keyed by the instruction starting the region.
    blocks: FxHashMap<InstrIndex, BlockTag>,
    /// Incoming stack types for every analyzed block.
    analyzed: FxHashMap<InstrIndex, Vec<Type>>,
    /// Alloca slots for the extended parameter list.
    arg_slots: Vec<(ValueTag, Type)>,
    /// Alloca slots for local variables.
    local_slots: Vec<(ValueTag, Type)>,
    /// Signature parameters, filled during entry setup.
    this_param: Option<Parameter>,
    params: Vec<Parameter>,
}

impl<'a> Translator<'a> {
    fn new(method: &'a MethodBytecode) -> Self {
        Self {
            method,
            graph: FlowGraph::new(),
            blocks: FxHashMap::default(),
            analyzed: FxHashMap::default(),
            arg_slots: Vec::new(),
            local_slots: Vec::new(),
            this_param: None,
            params: Vec::new(),
        }
    }

    fn run(mut self) -> LowerResult<MethodBody> {
        let first = self.method.first_index().ok_or(LowerError::EmptyBody)?;

        // Pre-create a block skeleton per branch-target region.
        for target in branch_targets(self.method) {
            let (graph, tag) = self.graph.add_block(format!("IL_{}", target.0));
            self.graph = graph;
            self.blocks.insert(target, tag);
        }

        self.build_entry_block(first)?;
        self.analyze_block(first, Vec::new())?;

        // Regions that no analyzed edge ever reached stay empty; drop them.
        let unreachable: Vec<BlockTag> = self
            .blocks
            .iter()
            .filter(|(index, _)| !self.analyzed.contains_key(index))
            .map(|(_, tag)| tag.clone())
            .collect();
        for tag in unreachable {
            self.graph = self.graph.remove_block(&tag)?;
        }

        Ok(MethodBody::new(
            self.graph,
            self.method.return_type,
            self.this_param,
            self.params,
        ))
    }

    /// Materialize the entry block: one parameter per signature input, an
    /// alloca-plus-store per input, an alloca per local, then a jump into
    /// the first real region.
    fn build_entry_block(&mut self, first: InstrIndex) -> LowerResult<()> {
        let entry = self.graph.entry_point().clone();

        let mut block_params = Vec::new();
        let ext_types = self.method.extended_param_types();
        let has_this = self.method.this_type.is_some();
        for (i, ty) in ext_types.iter().enumerate() {
            let name: Arc<str> = if has_this && i == 0 {
                "this".into()
            } else {
                format!("arg{}", if has_this { i - 1 } else { i }).into()
            };
            let tag = self.graph.tags().value(name.clone());
            block_params.push(BlockParameter::new(tag.clone(), *ty));
            let param = Parameter::new(tag, *ty, name);
            if has_this && i == 0 {
                self.this_param = Some(param);
            } else {
                self.params.push(param);
            }
        }
        self.graph = self
            .graph
            .update_block_parameters(&entry, block_params.clone())?;

        for param in &block_params {
            let slot = self.append(
                &entry,
                Instruction::new(Prototype::alloca(param.ty), []),
                format!("{}.slot", param.tag.hint()),
            )?;
            self.append(
                &entry,
                Instruction::new(
                    Prototype::store(param.ty),
                    [param.tag.clone(), slot.clone()],
                ),
                "",
            )?;
            self.arg_slots.push((slot, param.ty));
        }

        for (i, ty) in self.method.local_types.iter().enumerate() {
            let slot = self.append(
                &entry,
                Instruction::new(Prototype::alloca(*ty), []),
                format!("loc{}", i),
            )?;
            self.local_slots.push((slot, *ty));
        }

        let target = self.region_block(first);
        self.graph = self
            .graph
            .update_block_flow(&entry, BlockFlow::Jump(Branch::new(target, [])))?;
        Ok(())
    }

    /// The block skeleton for a region, creating one if the target scan
    /// did not (defensive for synthetic inputs).
    fn region_block(&mut self, index: InstrIndex) -> BlockTag {
        if let Some(tag) = self.blocks.get(&index) {
            return tag.clone();
        }
        let (graph, tag) = self.graph.add_block(format!("IL_{}", index.0));
        self.graph = graph;
        self.blocks.insert(index, tag.clone());
        tag
    }

    /// Append an instruction to a block.
    fn append(
        &mut self,
        block: &BlockTag,
        instruction: Instruction,
        name: impl Into<Arc<str>>,
    ) -> LowerResult<ValueTag> {
        let (graph, selected) = self.graph.append_instruction(block, instruction, name)?;
        self.graph = graph;
        Ok(selected.tag().clone())
    }

    /// A branch into a region, passing the live stack bottom-to-top.
    fn branch_to(&mut self, target: InstrIndex, stack: &OperandStack) -> Branch {
        let block = self.region_block(target);
        Branch::new(block, stack.iter().map(|(tag, _)| tag.clone()))
    }

    /// Analyze one region with the given incoming stack types.
    ///
    /// Re-entry over a different stack shape is a hard error; re-entry
    /// over the same shape is a no-op (loops converge immediately).
    fn analyze_block(&mut self, at: InstrIndex, incoming: Vec<Type>) -> LowerResult<()> {
        if let Some(expected) = self.analyzed.get(&at) {
            if *expected != incoming {
                return Err(LowerError::IncompatibleStackContents {
                    at,
                    expected: expected.clone(),
                    found: incoming,
                });
            }
            return Ok(());
        }
        self.analyzed.insert(at, incoming.clone());

        let block = self.region_block(at);

        // One fresh parameter per incoming stack slot.
        let params: Vec<BlockParameter> = incoming
            .iter()
            .enumerate()
            .map(|(i, ty)| BlockParameter::new(self.graph.tags().value(format!("s{}", i)), *ty))
            .collect();
        self.graph = self.graph.update_block_parameters(&block, params.clone())?;

        let mut stack: OperandStack = params
            .into_iter()
            .map(|p| (p.tag, p.ty))
            .collect();

        let mut current = at;
        loop {
            let instr = match self.method.get(current) {
                Some(instr) => instr.clone(),
                None => return Err(LowerError::MissingTerminator { at: current }),
            };

            if self.interpret(&block, current, &instr.opcode, &mut stack)? {
                // The opcode established the block's flow.
                return Ok(());
            }

            let next = self
                .method
                .next(current)
                .ok_or(LowerError::MissingTerminator { at: current })?;
            if self.blocks.contains_key(&next) {
                // The next instruction opens another region: fall through
                // with an explicit jump.
                let branch = self.branch_to(next, &stack);
                self.graph = self
                    .graph
                    .update_block_flow(&block, BlockFlow::Jump(branch))?;
                return self.analyze_block(next, stack_types(&stack));
            }
            current = next;
        }
    }

    /// Interpret one opcode against the operand stack. Returns `true` when
    /// the opcode terminated the block (flow was set and successors were
    /// analyzed).
    fn interpret(
        &mut self,
        block: &BlockTag,
        at: InstrIndex,
        opcode: &Opcode,
        stack: &mut OperandStack,
    ) -> LowerResult<bool> {
        match opcode {
            Opcode::Nop => {}

            // Constants push themselves.
            Opcode::LdcI4(v) => {
                self.push_constant(block, stack, Constant::I32(*v))?;
            }
            Opcode::LdcI8(v) => {
                self.push_constant(block, stack, Constant::I64(*v))?;
            }
            Opcode::LdcR4(v) => {
                self.push_constant(block, stack, Constant::float32(*v))?;
            }
            Opcode::LdcR8(v) => {
                self.push_constant(block, stack, Constant::float64(*v))?;
            }
            Opcode::LdNull => {
                self.push_constant(block, stack, Constant::Null)?;
            }
            Opcode::LdStr(s) => {
                self.push_constant(block, stack, Constant::Str(s.clone()))?;
            }

            // Variable slots load and store through their allocas.
            Opcode::LdArg(n) => {
                let (slot, ty) = self.arg_slot(at, *n)?;
                let value = self.append(
                    block,
                    Instruction::new(Prototype::load(ty), [slot]),
                    format!("arg{}.value", n),
                )?;
                stack.push((value, ty));
            }
            Opcode::StArg(n) => {
                let (slot, ty) = self.arg_slot(at, *n)?;
                let (value, vty) = pop(stack, at, "starg")?;
                self.expect_type(at, vty, ty)?;
                self.append(
                    block,
                    Instruction::new(Prototype::store(ty), [value, slot]),
                    "",
                )?;
            }
            Opcode::LdLoc(n) => {
                let (slot, ty) = self.local_slot(at, *n)?;
                let value = self.append(
                    block,
                    Instruction::new(Prototype::load(ty), [slot]),
                    format!("loc{}.value", n),
                )?;
                stack.push((value, ty));
            }
            Opcode::StLoc(n) => {
                let (slot, ty) = self.local_slot(at, *n)?;
                let (value, vty) = pop(stack, at, "stloc")?;
                self.expect_type(at, vty, ty)?;
                self.append(
                    block,
                    Instruction::new(Prototype::store(ty), [value, slot]),
                    "",
                )?;
            }

            Opcode::Dup => {
                let (top, ty) = peek(stack, at, "dup")?;
                let copy = self.append(
                    block,
                    Instruction::new(Prototype::copy(ty), [top]),
                    "dup",
                )?;
                stack.push((copy, ty));
            }
            Opcode::Pop => {
                pop(stack, at, "pop")?;
            }

            // Arithmetic lowers to typed intrinsics.
            Opcode::Add => self.binary_arith(block, at, stack, "arith.add", false)?,
            Opcode::Sub => self.binary_arith(block, at, stack, "arith.sub", false)?,
            Opcode::Mul => self.binary_arith(block, at, stack, "arith.mul", false)?,
            Opcode::Div => self.binary_arith(block, at, stack, "arith.div", true)?,
            Opcode::Rem => self.binary_arith(block, at, stack, "arith.rem", true)?,
            Opcode::Neg => {
                let (value, ty) = pop(stack, at, "neg")?;
                self.expect_numeric(at, ty)?;
                let result = self.append(
                    block,
                    Instruction::new(
                        Prototype::intrinsic("arith.neg", ty, vec![ty], ExceptionSpec::NoThrow),
                        [value],
                    ),
                    "neg",
                )?;
                stack.push((result, ty));
            }

            Opcode::Ceq => self.binary_compare(block, at, stack, "cmp.eq")?,
            Opcode::Cgt => self.binary_compare(block, at, stack, "cmp.gt")?,
            Opcode::Clt => self.binary_compare(block, at, stack, "cmp.lt")?,

            Opcode::Call(method) => {
                self.emit_call(block, at, stack, method.clone(), CallLookup::Static)?;
            }
            Opcode::CallVirt(method) => {
                self.emit_call(block, at, stack, method.clone(), CallLookup::Virtual)?;
            }
            Opcode::NewObj(ctor) => {
                let arity = ctor.signature().params.len();
                let args = pop_n(stack, at, "newobj", arity)?;
                let result_ty = ctor.declaring_type();
                let result = self.append(
                    block,
                    Instruction::new(
                        Prototype::new_object(ctor.clone()),
                        args.into_iter().map(|(tag, _)| tag),
                    ),
                    "obj",
                )?;
                stack.push((result, result_ty));
            }

            // Terminators establish flow and recurse into successors.
            Opcode::Br(target) => {
                let branch = self.branch_to(*target, stack);
                self.graph = self
                    .graph
                    .update_block_flow(block, BlockFlow::Jump(branch))?;
                self.analyze_block(*target, stack_types(stack))?;
                return Ok(true);
            }
            Opcode::BrTrue(target) | Opcode::BrFalse(target) => {
                let (cond, cond_ty) = pop(stack, at, opcode.mnemonic())?;
                let falsy = zero_constant(cond_ty).ok_or_else(|| {
                    LowerError::OperandTypeMismatch {
                        at,
                        message: format!(
                            "conditional branch takes a bool or integer condition, found '{}'",
                            cond_ty
                        ),
                    }
                })?;
                let fall = self
                    .method
                    .next(at)
                    .ok_or(LowerError::MissingTerminator { at })?;

                // The falsy case selects the not-taken edge of brtrue (the
                // taken edge of brfalse); the default edge is the other.
                let (false_region, true_region) = if matches!(opcode, Opcode::BrTrue(_)) {
                    (fall, *target)
                } else {
                    (*target, fall)
                };
                let on_false = self.branch_to(false_region, stack);
                let on_true = self.branch_to(true_region, stack);

                let cond_instr = Instruction::new(Prototype::copy(cond_ty), [cond]);
                self.graph = self.graph.update_block_flow(
                    block,
                    BlockFlow::Switch {
                        value: cond_instr,
                        cases: vec![SwitchCase {
                            values: vec![falsy],
                            branch: on_false,
                        }],
                        default: on_true,
                    },
                )?;

                let types = stack_types(stack);
                // Case branch first, then the default edge.
                self.analyze_block(false_region, types.clone())?;
                self.analyze_block(true_region, types)?;
                return Ok(true);
            }
            Opcode::Ret => {
                let flow = if self.method.return_type.is_void() {
                    BlockFlow::Return(Instruction::new(Prototype::copy(Type::void()), []))
                } else {
                    let (value, vty) = pop(stack, at, "ret")?;
                    self.expect_type(at, vty, self.method.return_type)?;
                    BlockFlow::Return(Instruction::new(
                        Prototype::copy(self.method.return_type),
                        [value],
                    ))
                };
                self.graph = self.graph.update_block_flow(block, flow)?;
                return Ok(true);
            }
            Opcode::Throw => {
                let (exception, ex_ty) = pop(stack, at, "throw")?;
                self.append(
                    block,
                    Instruction::new(
                        Prototype::intrinsic(
                            "exception.throw",
                            Type::void(),
                            vec![ex_ty],
                            ExceptionSpec::MayThrow,
                        ),
                        [exception],
                    ),
                    "",
                )?;
                self.graph = self
                    .graph
                    .update_block_flow(block, BlockFlow::Unreachable)?;
                return Ok(true);
            }
            Opcode::Rethrow => {
                self.append(
                    block,
                    Instruction::new(
                        Prototype::intrinsic(
                            "exception.rethrow",
                            Type::void(),
                            vec![],
                            ExceptionSpec::MayThrow,
                        ),
                        [],
                    ),
                    "",
                )?;
                self.graph = self
                    .graph
                    .update_block_flow(block, BlockFlow::Unreachable)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn push_constant(
        &mut self,
        block: &BlockTag,
        stack: &mut OperandStack,
        constant: Constant,
    ) -> LowerResult<()> {
        let ty = constant.ty();
        let tag = self.append(
            block,
            Instruction::new(Prototype::constant(constant, ty), []),
            "c",
        )?;
        stack.push((tag, ty));
        Ok(())
    }

    fn binary_arith(
        &mut self,
        block: &BlockTag,
        at: InstrIndex,
        stack: &mut OperandStack,
        name: &str,
        can_trap: bool,
    ) -> LowerResult<()> {
        let (rhs, rty) = pop(stack, at, "arith")?;
        let (lhs, lty) = pop(stack, at, "arith")?;
        self.expect_type(at, rty, lty)?;
        self.expect_numeric(at, lty)?;
        let throws = if can_trap {
            ExceptionSpec::MayThrow
        } else {
            ExceptionSpec::NoThrow
        };
        let result = self.append(
            block,
            Instruction::new(
                Prototype::intrinsic(name, lty, vec![lty, lty], throws),
                [lhs, rhs],
            ),
            name.rsplit('.').next().unwrap_or(name),
        )?;
        stack.push((result, lty));
        Ok(())
    }

    fn binary_compare(
        &mut self,
        block: &BlockTag,
        at: InstrIndex,
        stack: &mut OperandStack,
        name: &str,
    ) -> LowerResult<()> {
        let (rhs, rty) = pop(stack, at, "cmp")?;
        let (lhs, lty) = pop(stack, at, "cmp")?;
        self.expect_type(at, rty, lty)?;
        let result = self.append(
            block,
            Instruction::new(
                Prototype::intrinsic(name, Type::bool(), vec![lty, lty], ExceptionSpec::NoThrow),
                [lhs, rhs],
            ),
            name.rsplit('.').next().unwrap_or(name),
        )?;
        stack.push((result, Type::bool()));
        Ok(())
    }

    fn emit_call(
        &mut self,
        block: &BlockTag,
        at: InstrIndex,
        stack: &mut OperandStack,
        method: opal_ir::MethodRef,
        lookup: CallLookup,
    ) -> LowerResult<()> {
        let arity = method.call_parameter_types().len();
        let args = pop_n(stack, at, "call", arity)?;
        let ret = method.signature().ret;
        let result = self.append(
            block,
            Instruction::new(
                Prototype::call(method, lookup),
                args.into_iter().map(|(tag, _)| tag),
            ),
            "call",
        )?;
        if !ret.is_void() {
            stack.push((result, ret));
        }
        Ok(())
    }

    fn arg_slot(&self, at: InstrIndex, slot: u16) -> LowerResult<(ValueTag, Type)> {
        self.arg_slots
            .get(slot as usize)
            .cloned()
            .ok_or(LowerError::BadSlot { at, slot })
    }

    fn local_slot(&self, at: InstrIndex, slot: u16) -> LowerResult<(ValueTag, Type)> {
        self.local_slots
            .get(slot as usize)
            .cloned()
            .ok_or(LowerError::BadSlot { at, slot })
    }

    fn expect_type(&self, at: InstrIndex, found: Type, expected: Type) -> LowerResult<()> {
        if found == expected {
            Ok(())
        } else {
            Err(LowerError::OperandTypeMismatch {
                at,
                message: format!("operand has type '{}', expected '{}'", found, expected),
            })
        }
    }

    fn expect_numeric(&self, at: InstrIndex, ty: Type) -> LowerResult<()> {
        let numeric = ty.is_integer() || matches!(ty.kind(), TypeKind::Float(_));
        if numeric {
            Ok(())
        } else {
            Err(LowerError::OperandTypeMismatch {
                at,
                message: format!("arithmetic operand has non-numeric type '{}'", ty),
            })
        }
    }
}

fn stack_types(stack: &OperandStack) -> Vec<Type> {
    stack.iter().map(|(_, ty)| *ty).collect()
}

/// The constant a two-way branch treats as "false": `false` for booleans,
/// zero for integers. Other condition types have no falsy constant.
fn zero_constant(ty: Type) -> Option<Constant> {
    match ty.kind() {
        TypeKind::Bool => Some(Constant::Bool(false)),
        TypeKind::SignedInt(IntWidth::W8) => Some(Constant::I8(0)),
        TypeKind::SignedInt(IntWidth::W16) => Some(Constant::I16(0)),
        TypeKind::SignedInt(IntWidth::W32) => Some(Constant::I32(0)),
        TypeKind::SignedInt(IntWidth::W64) => Some(Constant::I64(0)),
        TypeKind::UnsignedInt(IntWidth::W8) => Some(Constant::U8(0)),
        TypeKind::UnsignedInt(IntWidth::W16) => Some(Constant::U16(0)),
        TypeKind::UnsignedInt(IntWidth::W32) => Some(Constant::U32(0)),
        TypeKind::UnsignedInt(IntWidth::W64) => Some(Constant::U64(0)),
        _ => None,
    }
}

fn pop(
    stack: &mut OperandStack,
    at: InstrIndex,
    mnemonic: &'static str,
) -> LowerResult<(ValueTag, Type)> {
    stack
        .pop()
        .ok_or(LowerError::StackUnderflow { at, mnemonic })
}

fn peek(
    stack: &OperandStack,
    at: InstrIndex,
    mnemonic: &'static str,
) -> LowerResult<(ValueTag, Type)> {
    stack
        .last()
        .cloned()
        .ok_or(LowerError::StackUnderflow { at, mnemonic })
}

/// Pop `n` operands, returning them in push (argument) order.
fn pop_n(
    stack: &mut OperandStack,
    at: InstrIndex,
    mnemonic: &'static str,
    n: usize,
) -> LowerResult<Vec<(ValueTag, Type)>> {
    if stack.len() < n {
        return Err(LowerError::StackUnderflow { at, mnemonic });
    }
    let split = stack.len() - n;
    Ok(stack.drain(split..).collect())
}
