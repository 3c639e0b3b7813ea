//! Delegate lowering.
//!
//! Rewrites the two delegate-shaped operations into the forms back-ends
//! consume directly:
//!
//! - an `IndirectCall` whose callee value has delegate type becomes a
//!   virtual `Call` of the delegate's `Invoke` method (the callee value is
//!   already in receiver position);
//! - a `NewDelegate` producing a delegate type becomes a `NewObject` of
//!   the delegate's two-argument constructor, applied to the bound object
//!   (or null) and a function pointer. The function pointer is itself a
//!   `NewDelegate` retyped to a bare function type, which preserves the
//!   original static-versus-virtual dispatch decision for the back-end.

use opal_ir::{
    Constant, FlowGraphBuilder, Instruction, MethodBody, MethodRef, ProtoShape, Prototype,
    CallLookup, Type, TypeKind, ValueTag,
};

use crate::pass::{Transform, TransformError, TransformResult};

/// The delegate-lowering transform.
pub struct LowerDelegates;

impl Transform for LowerDelegates {
    fn name(&self) -> &'static str {
        "lower-delegates"
    }

    fn apply(&self, body: MethodBody) -> TransformResult<MethodBody> {
        let mut builder = FlowGraphBuilder::new(body.graph.clone());

        // Value-level instructions.
        for tag in builder.instruction_tags() {
            let instr = (**builder.graph().get_instruction(&tag)?).clone();
            if let Some(rewritten) = self.rewrite(&mut builder, Some(&tag), &instr)? {
                builder.replace_instruction(&tag, rewritten)?;
            }
        }

        // Flow-level instructions (return values, switch scrutinees, try
        // bodies). These cannot host the two-step new-delegate rewrite, so
        // only indirect calls are handled here.
        for block in builder.block_tags() {
            let flow = builder.graph().get_basic_block(&block)?.flow.clone();
            let mut changed = false;
            let rewritten = flow.map_instructions(&mut |instr| {
                match self.rewrite_indirect_call(builder.graph(), instr) {
                    Some(new_instr) => {
                        changed = true;
                        new_instr
                    }
                    None => instr.clone(),
                }
            });
            if changed {
                builder.update_block_flow(&block, rewritten)?;
            }
        }

        Ok(body.with_graph(builder.to_immutable()))
    }
}

impl LowerDelegates {
    /// Rewrite one value-level instruction, inserting helper instructions
    /// before `at` as needed. Returns the replacement, if any.
    fn rewrite(
        &self,
        builder: &mut FlowGraphBuilder,
        at: Option<&ValueTag>,
        instr: &Instruction,
    ) -> TransformResult<Option<Instruction>> {
        if let Some(rewritten) = self.rewrite_indirect_call(builder.graph(), instr) {
            return Ok(Some(rewritten));
        }

        let ProtoShape::NewDelegate {
            delegate,
            callee,
            has_this,
            lookup,
        } = instr.prototype().shape().clone()
        else {
            return Ok(None);
        };

        // Already-lowered delegates produce bare function types; only
        // genuine delegate results need the two-step rewrite.
        let TypeKind::Delegate { params, ret, .. } = delegate.kind() else {
            return Ok(None);
        };
        let Some(at) = at else {
            return Err(TransformError::NotSupported {
                transform: self.name(),
                operation: "new-delegate in flow position".into(),
            });
        };

        let fnptr_ty = Type::function(params, ret);

        // Step one: materialize the function pointer. The bound receiver
        // stays attached so virtual lookup can still resolve the slot.
        let fnptr = Instruction::new(
            Prototype::new_delegate(fnptr_ty, callee.clone(), has_this, lookup),
            instr.arguments().iter().cloned(),
        );
        let fnptr_tag = builder.instruction(at).insert_before(fnptr, "fptr")?;

        // Step two: construct the delegate object over (receiver, fptr).
        let bound = match (has_this, instr.arguments().first()) {
            (true, Some(receiver)) => receiver.clone(),
            _ => {
                let null = Instruction::new(
                    Prototype::constant(Constant::Null, Type::root()),
                    [],
                );
                builder.instruction(at).insert_before(null, "null")?
            }
        };

        let ctor = MethodRef::delegate_ctor(delegate, fnptr_ty).ok_or_else(|| {
            TransformError::NotSupported {
                transform: self.name(),
                operation: format!("delegate constructor for '{}'", delegate),
            }
        })?;
        Ok(Some(Instruction::new(
            Prototype::new_object(ctor),
            [bound, fnptr_tag],
        )))
    }

    /// An `IndirectCall` over a delegate-typed callee becomes a virtual
    /// call of `Invoke`; the argument list is already in receiver-first
    /// order.
    fn rewrite_indirect_call(
        &self,
        graph: &opal_ir::FlowGraph,
        instr: &Instruction,
    ) -> Option<Instruction> {
        let ProtoShape::IndirectCall { .. } = instr.prototype().shape() else {
            return None;
        };
        let callee = instr.arguments().first()?;
        let callee_ty = graph.get_value_type(callee).ok()?;
        if !matches!(callee_ty.kind(), TypeKind::Delegate { .. }) {
            return None;
        }
        let invoke = MethodRef::delegate_invoke(callee_ty)?;
        Some(Instruction::new(
            Prototype::call(invoke, CallLookup::Virtual),
            instr.arguments().iter().cloned(),
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
