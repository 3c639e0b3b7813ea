//! Transforms applied to freshly translated bodies.

use opal_bytecode::{FunctionBuilder, Opcode};
use opal_ir::validate::validate_graph;
use opal_ir::{FnSignature, MethodRef, Type};
use opal_lower::translate;
use opal_transform::{LowerDelegates, TransformPipeline};

#[test]
fn lowering_a_translated_body_keeps_it_valid() {
    // int32 f(int32 x) { return g(x) + 1; }
    let g = MethodRef::static_method(
        Type::root(),
        "g",
        FnSignature::new(vec![Type::int32()], Type::int32()),
    );

    let mut b = FunctionBuilder::new("f", Type::int32());
    let x = b.add_param(Type::int32());
    b.emit(Opcode::LdArg(x));
    b.emit(Opcode::Call(g));
    b.emit(Opcode::LdcI4(1));
    b.emit(Opcode::Add);
    b.emit(Opcode::Ret);

    let body = translate(&b.finish().unwrap()).unwrap();
    assert!(validate_graph(&body.graph).is_empty());

    let mut pipeline = TransformPipeline::new();
    pipeline.register(LowerDelegates);
    let (lowered, stats) = pipeline.run(body).unwrap();

    assert_eq!(stats.passes_run, 1);
    assert!(validate_graph(&lowered.graph).is_empty());
}
