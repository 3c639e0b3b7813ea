//! The `opalc` driver shell.
//!
//! Reads files of serialized IR entities (type tables, type and method
//! references, constants, instruction prototypes), decodes each one, and
//! reports structured diagnostics. The core's error sink enforces
//! `-Werror`, `-Wfatal-errors`, and `-fmax-errors`; the process exits 0
//! on success and 1 when any error was emitted.

mod args;

use opal_ir::{
    CompilationAborted, Diagnostic, DiagnosticSink, SourceRange,
};
use opal_sexpr::{
    decode_constant, decode_method_ref, decode_prototype, decode_type, encode_constant,
    encode_method_ref, encode_prototype, encode_type, parse_all, print, SExpr, TypeTable,
};

use crate::args::{parse_args, DriverArgs, USAGE};

fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    std::process::exit(run(argv));
}

fn run(argv: Vec<String>) -> i32 {
    let args = match parse_args(argv) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("opalc: {}", err);
            eprintln!("{}", USAGE);
            return 1;
        }
    };

    if args.help || (args.inputs.is_empty() && !args.demo) {
        println!("{}", USAGE);
        return if args.help { 0 } else { 1 };
    }

    let mut sink = DiagnosticSink::new(args.config.clone());
    let aborted = if args.demo {
        run_demo(&mut sink).is_err()
    } else {
        check_inputs(&args, &mut sink).is_err()
    };

    for diagnostic in sink.diagnostics() {
        eprintln!("{}", diagnostic);
    }
    if aborted {
        eprintln!("opalc: compilation aborted");
    }
    sink.exit_code()
}

fn check_inputs(args: &DriverArgs, sink: &mut DiagnosticSink) -> Result<(), CompilationAborted> {
    for input in &args.inputs {
        let text = match std::fs::read_to_string(input) {
            Ok(text) => text,
            Err(_) => {
                // Missing sources are ordinary errors; the policy knobs
                // decide whether they end the run.
                sink.report(Diagnostic::unavailable_source(input))?;
                continue;
            }
        };
        check_source(input, &text, args.dump, sink)?;
    }
    Ok(())
}

fn check_source(
    document: &str,
    text: &str,
    dump: bool,
    sink: &mut DiagnosticSink,
) -> Result<(), CompilationAborted> {
    let exprs = match parse_all(text) {
        Ok(exprs) => exprs,
        Err(err) => {
            sink.report(
                Diagnostic::error("syntax error", err.message.clone())
                    .with_range(SourceRange::new(document, err.offset, 1)),
            )?;
            return Ok(());
        }
    };

    let mut table = TypeTable::new();
    for expr in &exprs {
        match decode_entity(expr, &mut table) {
            Ok(entity) => {
                if dump {
                    if let Some(encoded) = entity.reencode() {
                        println!("{}", print(&encoded));
                    }
                }
            }
            Err(err) => {
                sink.report(Diagnostic::error("malformed entity", err.to_string()))?;
            }
        }
    }
    Ok(())
}

/// Build a small sample method, run it through the whole mid-end, and
/// report what came out. Exercises the same path a front-end drives:
/// bytecode, translation, transforms, validation.
fn run_demo(sink: &mut DiagnosticSink) -> Result<(), CompilationAborted> {
    use opal_bytecode::{disassemble, FunctionBuilder, Opcode};
    use opal_transform::{LowerDelegates, TransformPipeline};

    // int32 abs_delta(int32 a, int32 b) {
    //     if (a < b) return b - a; else return a - b;
    // }
    let mut builder = FunctionBuilder::new("abs_delta", opal_ir::Type::int32());
    let a = builder.add_param(opal_ir::Type::int32());
    let b = builder.add_param(opal_ir::Type::int32());
    let swapped = builder.new_label();
    builder.emit(Opcode::LdArg(a));
    builder.emit(Opcode::LdArg(b));
    builder.emit(Opcode::Clt);
    builder.emit_brtrue(swapped);
    builder.emit(Opcode::LdArg(a));
    builder.emit(Opcode::LdArg(b));
    builder.emit(Opcode::Sub);
    builder.emit(Opcode::Ret);
    builder.bind_label(swapped);
    builder.emit(Opcode::LdArg(b));
    builder.emit(Opcode::LdArg(a));
    builder.emit(Opcode::Sub);
    builder.emit(Opcode::Ret);

    let method = match builder.finish() {
        Ok(method) => method,
        Err(err) => {
            sink.report(Diagnostic::error("demo build failed", err.to_string()))?;
            return Ok(());
        }
    };
    println!("{}", disassemble(&method));

    let body = match opal_lower::translate(&method) {
        Ok(body) => body,
        Err(err) => {
            sink.report(Diagnostic::error("translation failed", err.to_string()))?;
            return Ok(());
        }
    };

    let mut pipeline = TransformPipeline::new();
    pipeline.register(LowerDelegates);
    let body = match pipeline.run(body) {
        Ok((body, _)) => body,
        Err(err) => {
            sink.report(Diagnostic::error("transform failed", err.to_string()))?;
            return Ok(());
        }
    };

    for finding in opal_ir::validate::validate_body(&body) {
        sink.report(Diagnostic::error("invalid IR", finding.to_string()))?;
    }
    println!(
        "translated 'abs_delta' into {} basic block(s)",
        body.graph.block_count()
    );
    Ok(())
}

/// A decoded top-level entity.
enum Entity {
    Table,
    Type(opal_ir::Type),
    Method(opal_ir::MethodRef),
    Constant(opal_ir::Constant),
    Prototype(opal_ir::Prototype),
}

impl Entity {
    /// The canonical re-encoding, for `--dump`.
    fn reencode(&self) -> Option<SExpr> {
        match self {
            Entity::Table => None,
            Entity::Type(ty) => Some(encode_type(*ty)),
            Entity::Method(method) => Some(encode_method_ref(method)),
            Entity::Constant(constant) => Some(encode_constant(constant)),
            Entity::Prototype(prototype) => Some(encode_prototype(prototype)),
        }
    }
}

/// Dispatch a top-level expression by its head family.
fn decode_entity(
    expr: &SExpr,
    table: &mut TypeTable,
) -> Result<Entity, opal_sexpr::DecodeError> {
    let head = match expr {
        SExpr::Node(head, _) => head.as_str(),
        _ => "",
    };
    match head {
        "#type_table" => {
            *table = TypeTable::decode(expr)?;
            Ok(Entity::Table)
        }
        "#method_reference" | "#ctor_reference" => {
            decode_method_ref(expr, table).map(Entity::Method)
        }
        h if h.starts_with("#const_") => decode_constant(expr, table).map(Entity::Constant),
        h if h.starts_with('#') => decode_type(expr, table).map(Entity::Type),
        _ => decode_prototype(expr, table).map(Entity::Prototype),
    }
}

// =============================================================================
// Tests
// =============================================================================
