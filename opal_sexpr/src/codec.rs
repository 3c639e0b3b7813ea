//! Table-driven codecs for IR entities.
//!
//! Decoding dispatches through head-identifier tables (one per entity
//! family); encoders are the symmetric inverses. Types may be emitted
//! through a [`TypeTable`] so repeated references serialize as
//! `#type_table_reference(index)`.

use rustc_hash::FxHashMap;
use std::sync::OnceLock;

use opal_ir::{
    CallLookup, Constant, ExceptionSpec, FloatWidth, FnSignature, IntWidth, MethodRef,
    PointerKind, ProtoShape, Prototype, QualifiedName, Type, TypeKind,
};

use crate::reader::SExpr;

// =============================================================================
// Errors
// =============================================================================

/// A decode failure.
#[derive(Debug, Clone)]
pub enum DecodeError {
    /// No decoder is registered for the head.
    UnknownHead(String),
    /// The operands do not fit the head's shape.
    BadShape { head: String, message: String },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnknownHead(head) => write!(f, "unknown head '{}'", head),
            DecodeError::BadShape { head, message } => write!(f, "'{}': {}", head, message),
        }
    }
}

impl std::error::Error for DecodeError {}

fn bad(head: &str, message: impl Into<String>) -> DecodeError {
    DecodeError::BadShape {
        head: head.into(),
        message: message.into(),
    }
}

// =============================================================================
// Operand helpers
// =============================================================================

fn expect_arity<'a>(head: &str, operands: &'a [SExpr], n: usize) -> Result<&'a [SExpr], DecodeError> {
    if operands.len() == n {
        Ok(operands)
    } else {
        Err(bad(head, format!("takes {} operand(s), found {}", n, operands.len())))
    }
}

fn expect_str<'a>(head: &str, operand: &'a SExpr) -> Result<&'a str, DecodeError> {
    match operand {
        SExpr::Str(s) => Ok(s),
        other => Err(bad(head, format!("expected a string, found {:?}", other))),
    }
}

fn expect_int(head: &str, operand: &SExpr) -> Result<i64, DecodeError> {
    match operand {
        SExpr::Int(v) => Ok(*v),
        other => Err(bad(head, format!("expected an integer, found {:?}", other))),
    }
}

fn expect_float(head: &str, operand: &SExpr) -> Result<f64, DecodeError> {
    match operand {
        SExpr::Float(v) => Ok(*v),
        SExpr::Int(v) => Ok(*v as f64),
        other => Err(bad(head, format!("expected a float, found {:?}", other))),
    }
}

fn expect_bool(head: &str, operand: &SExpr) -> Result<bool, DecodeError> {
    match operand {
        SExpr::Ident(name) if name == "true" => Ok(true),
        SExpr::Ident(name) if name == "false" => Ok(false),
        other => Err(bad(head, format!("expected true or false, found {:?}", other))),
    }
}

fn expect_ident<'a>(head: &str, operand: &'a SExpr) -> Result<&'a str, DecodeError> {
    match operand {
        SExpr::Ident(name) => Ok(name),
        other => Err(bad(head, format!("expected an identifier, found {:?}", other))),
    }
}

fn expect_list<'a>(head: &str, operand: &'a SExpr) -> Result<&'a [SExpr], DecodeError> {
    match operand {
        SExpr::List(items) => Ok(items),
        other => Err(bad(head, format!("expected a list, found {:?}", other))),
    }
}

fn decode_type_list(head: &str, operand: &SExpr, table: &TypeTable) -> Result<Vec<Type>, DecodeError> {
    expect_list(head, operand)?
        .iter()
        .map(|item| decode_type(item, table))
        .collect()
}

fn encode_type_list(types: &[Type]) -> SExpr {
    SExpr::List(types.iter().map(|ty| encode_type(*ty)).collect())
}

// =============================================================================
// Type table
// =============================================================================

/// An indexable table of types, allowing repeated references to serialize
/// as `#type_table_reference(index)`.
#[derive(Default)]
pub struct TypeTable {
    entries: Vec<Type>,
    index: FxHashMap<Type, usize>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Intern a type, returning its index.
    pub fn intern(&mut self, ty: Type) -> usize {
        if let Some(&index) = self.index.get(&ty) {
            return index;
        }
        let index = self.entries.len();
        self.entries.push(ty);
        self.index.insert(ty, index);
        index
    }

    /// The type at an index.
    pub fn get(&self, index: usize) -> Option<Type> {
        self.entries.get(index).copied()
    }

    /// Encode the table itself: `#type_table({...})`.
    pub fn encode(&self) -> SExpr {
        SExpr::node(
            "#type_table",
            vec![SExpr::List(
                self.entries.iter().map(|ty| encode_type(*ty)).collect(),
            )],
        )
    }

    /// Decode a `#type_table({...})` expression.
    pub fn decode(expr: &SExpr) -> Result<TypeTable, DecodeError> {
        let SExpr::Node(head, operands) = expr else {
            return Err(bad("#type_table", "expected a node"));
        };
        if head != "#type_table" {
            return Err(DecodeError::UnknownHead(head.clone()));
        }
        let operands = expect_arity(head, operands, 1)?;
        let mut table = TypeTable::new();
        for item in expect_list(head, &operands[0])? {
            // Entries may reference earlier entries.
            let ty = decode_type(item, &table)?;
            table.intern(ty);
        }
        Ok(table)
    }

    /// Encode a reference into this table, interning as needed.
    pub fn encode_ref(&mut self, ty: Type) -> SExpr {
        let index = self.intern(ty);
        SExpr::node("#type_table_reference", vec![SExpr::Int(index as i64)])
    }
}

// =============================================================================
// Types
// =============================================================================

type TypeDecoder = fn(&str, &[SExpr], &TypeTable) -> Result<Type, DecodeError>;

fn type_decoders() -> &'static FxHashMap<&'static str, TypeDecoder> {
    static TABLE: OnceLock<FxHashMap<&'static str, TypeDecoder>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: FxHashMap<&'static str, TypeDecoder> = FxHashMap::default();
        table.insert("#primitive_type", |head, ops, _| {
            let ops = expect_arity(head, ops, 1)?;
            primitive_by_name(head, expect_str(head, &ops[0])?)
        });
        table.insert("#root_type", |head, ops, _| {
            expect_arity(head, ops, 0)?;
            Ok(Type::root())
        });
        table.insert("#type_reference", |head, ops, _| {
            let ops = expect_arity(head, ops, 1)?;
            Ok(Type::named(QualifiedName::parse(expect_str(head, &ops[0])?)))
        });
        table.insert("#nested_type", |head, ops, table| {
            let ops = expect_arity(head, ops, 2)?;
            let decl = decode_type(&ops[0], table)?;
            let name = expect_str(head, &ops[1])?;
            match decl.kind() {
                TypeKind::Named(qualified) => Ok(Type::named(qualified.nested(name))),
                other => Err(bad(head, format!("cannot nest inside {:?}", other))),
            }
        });
        table.insert("#type_table_reference", |head, ops, table| {
            let ops = expect_arity(head, ops, 1)?;
            let index = expect_int(head, &ops[0])? as usize;
            table
                .get(index)
                .ok_or_else(|| bad(head, format!("index {} out of range", index)))
        });
        table.insert("#pointer_type", |head, ops, table| {
            let ops = expect_arity(head, ops, 2)?;
            let elem = decode_type(&ops[0], table)?;
            let kind = match expect_ident(head, &ops[1])? {
                "box" => PointerKind::Box,
                "ref" => PointerKind::Reference,
                other => return Err(bad(head, format!("unknown pointer kind '{}'", other))),
            };
            Ok(Type::pointer(elem, kind))
        });
        table.insert("#array_type", |head, ops, table| {
            let ops = expect_arity(head, ops, 2)?;
            let elem = decode_type(&ops[0], table)?;
            let rank = expect_int(head, &ops[1])? as u32;
            Ok(Type::array(elem, rank))
        });
        table.insert("#function_type", |head, ops, table| {
            let ops = expect_arity(head, ops, 2)?;
            let ret = decode_type(&ops[0], table)?;
            let params = decode_type_list(head, &ops[1], table)?;
            Ok(Type::function(params, ret))
        });
        table.insert("#delegate_type", |head, ops, table| {
            let ops = expect_arity(head, ops, 3)?;
            let name = QualifiedName::parse(expect_str(head, &ops[0])?);
            let ret = decode_type(&ops[1], table)?;
            let params = decode_type_list(head, &ops[2], table)?;
            Ok(Type::delegate(name, params, ret))
        });
        table
    })
}

fn primitive_by_name(head: &str, name: &str) -> Result<Type, DecodeError> {
    let ty = match name {
        "void" => Type::void(),
        "bool" => Type::bool(),
        "char" => Type::char(),
        "string" => Type::string(),
        "int8" => Type::int(IntWidth::W8, true),
        "int16" => Type::int(IntWidth::W16, true),
        "int32" => Type::int(IntWidth::W32, true),
        "int64" => Type::int(IntWidth::W64, true),
        "uint8" => Type::int(IntWidth::W8, false),
        "uint16" => Type::int(IntWidth::W16, false),
        "uint32" => Type::int(IntWidth::W32, false),
        "uint64" => Type::int(IntWidth::W64, false),
        "float32" => Type::float(FloatWidth::W32),
        "float64" => Type::float(FloatWidth::W64),
        other => return Err(bad(head, format!("unknown primitive '{}'", other))),
    };
    Ok(ty)
}

/// Decode a type reference.
pub fn decode_type(expr: &SExpr, table: &TypeTable) -> Result<Type, DecodeError> {
    let SExpr::Node(head, operands) = expr else {
        return Err(bad("type", format!("expected a type node, found {:?}", expr)));
    };
    let decoder = type_decoders()
        .get(head.as_str())
        .ok_or_else(|| DecodeError::UnknownHead(head.clone()))?;
    decoder(head, operands, table)
}

/// Encode a type reference (never through a table).
pub fn encode_type(ty: Type) -> SExpr {
    match ty.kind() {
        TypeKind::Void => primitive("void"),
        TypeKind::Bool => primitive("bool"),
        TypeKind::Char => primitive("char"),
        TypeKind::Str => primitive("string"),
        TypeKind::SignedInt(w) => primitive(&format!("int{}", w.bits())),
        TypeKind::UnsignedInt(w) => primitive(&format!("uint{}", w.bits())),
        TypeKind::Float(FloatWidth::W32) => primitive("float32"),
        TypeKind::Float(FloatWidth::W64) => primitive("float64"),
        TypeKind::Root => SExpr::node("#root_type", vec![]),
        TypeKind::Pointer { elem, kind } => SExpr::node(
            "#pointer_type",
            vec![
                encode_type(elem),
                SExpr::ident(match kind {
                    PointerKind::Box => "box",
                    PointerKind::Reference => "ref",
                }),
            ],
        ),
        TypeKind::Array { elem, rank } => SExpr::node(
            "#array_type",
            vec![encode_type(elem), SExpr::Int(rank as i64)],
        ),
        TypeKind::Function { params, ret } => SExpr::node(
            "#function_type",
            vec![encode_type(ret), encode_type_list(&params)],
        ),
        TypeKind::Named(name) => {
            SExpr::node("#type_reference", vec![SExpr::Str(name.to_string())])
        }
        TypeKind::Delegate { name, params, ret } => SExpr::node(
            "#delegate_type",
            vec![
                SExpr::Str(name.to_string()),
                encode_type(ret),
                encode_type_list(&params),
            ],
        ),
    }
}

fn primitive(name: &str) -> SExpr {
    SExpr::node("#primitive_type", vec![SExpr::Str(name.into())])
}

// =============================================================================
// Constants
// =============================================================================

/// Decode a constant.
pub fn decode_constant(expr: &SExpr, table: &TypeTable) -> Result<Constant, DecodeError> {
    let SExpr::Node(head, ops) = expr else {
        return Err(bad("constant", format!("expected a constant node, found {:?}", expr)));
    };
    let constant = match head.as_str() {
        "#const_int8" => Constant::I8(expect_int(head, &expect_arity(head, ops, 1)?[0])? as i8),
        "#const_int16" => Constant::I16(expect_int(head, &expect_arity(head, ops, 1)?[0])? as i16),
        "#const_int32" => Constant::I32(expect_int(head, &expect_arity(head, ops, 1)?[0])? as i32),
        "#const_int64" => Constant::I64(expect_int(head, &expect_arity(head, ops, 1)?[0])?),
        "#const_uint8" => Constant::U8(expect_int(head, &expect_arity(head, ops, 1)?[0])? as u8),
        "#const_uint16" => Constant::U16(expect_int(head, &expect_arity(head, ops, 1)?[0])? as u16),
        "#const_uint32" => Constant::U32(expect_int(head, &expect_arity(head, ops, 1)?[0])? as u32),
        "#const_uint64" => Constant::U64(expect_int(head, &expect_arity(head, ops, 1)?[0])? as u64),
        "#const_float32" => {
            Constant::float32(expect_float(head, &expect_arity(head, ops, 1)?[0])? as f32)
        }
        "#const_float64" => {
            Constant::float64(expect_float(head, &expect_arity(head, ops, 1)?[0])?)
        }
        "#const_bool" => Constant::Bool(expect_bool(head, &expect_arity(head, ops, 1)?[0])?),
        "#const_char" => {
            let text = expect_str(head, &expect_arity(head, ops, 1)?[0])?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Constant::Char(c),
                _ => return Err(bad(head, "expected a single character")),
            }
        }
        "#const_string" => {
            Constant::Str(expect_str(head, &expect_arity(head, ops, 1)?[0])?.into())
        }
        "#const_null" => {
            expect_arity(head, ops, 0)?;
            Constant::Null
        }
        "#const_default" => {
            Constant::Default(decode_type(&expect_arity(head, ops, 1)?[0], table)?)
        }
        other => return Err(DecodeError::UnknownHead(other.into())),
    };
    Ok(constant)
}

/// Encode a constant.
pub fn encode_constant(constant: &Constant) -> SExpr {
    match constant {
        Constant::I8(v) => SExpr::node("#const_int8", vec![SExpr::Int(*v as i64)]),
        Constant::I16(v) => SExpr::node("#const_int16", vec![SExpr::Int(*v as i64)]),
        Constant::I32(v) => SExpr::node("#const_int32", vec![SExpr::Int(*v as i64)]),
        Constant::I64(v) => SExpr::node("#const_int64", vec![SExpr::Int(*v)]),
        Constant::U8(v) => SExpr::node("#const_uint8", vec![SExpr::Int(*v as i64)]),
        Constant::U16(v) => SExpr::node("#const_uint16", vec![SExpr::Int(*v as i64)]),
        Constant::U32(v) => SExpr::node("#const_uint32", vec![SExpr::Int(*v as i64)]),
        Constant::U64(v) => SExpr::node("#const_uint64", vec![SExpr::Int(*v as i64)]),
        Constant::F32(bits) => SExpr::node(
            "#const_float32",
            vec![SExpr::Float(f32::from_bits(*bits) as f64)],
        ),
        Constant::F64(bits) => SExpr::node(
            "#const_float64",
            vec![SExpr::Float(f64::from_bits(*bits))],
        ),
        Constant::Bool(v) => SExpr::node("#const_bool", vec![SExpr::bool(*v)]),
        Constant::Char(c) => SExpr::node("#const_char", vec![SExpr::Str(c.to_string())]),
        Constant::Str(s) => SExpr::node("#const_string", vec![SExpr::Str(s.to_string())]),
        Constant::Null => SExpr::node("#const_null", vec![]),
        Constant::Default(ty) => SExpr::node("#const_default", vec![encode_type(*ty)]),
    }
}

// =============================================================================
// Method references
// =============================================================================

/// Decode a method or constructor reference.
pub fn decode_method_ref(expr: &SExpr, table: &TypeTable) -> Result<MethodRef, DecodeError> {
    let SExpr::Node(head, ops) = expr else {
        return Err(bad("method", format!("expected a method node, found {:?}", expr)));
    };
    match head.as_str() {
        "#method_reference" => {
            let ops = expect_arity(head, ops, 6)?;
            let declaring = decode_type(&ops[0], table)?;
            let name = expect_str(head, &ops[1])?;
            let is_static = expect_bool(head, &ops[2])?;
            // Generic parameter names are accepted but not modeled.
            expect_list(head, &ops[3])?;
            let ret = decode_type(&ops[4], table)?;
            let params = decode_type_list(head, &ops[5], table)?;
            let signature = FnSignature::new(params, ret);
            Ok(if is_static {
                MethodRef::static_method(declaring, name, signature)
            } else {
                MethodRef::instance(declaring, name, signature)
            })
        }
        "#ctor_reference" => {
            let ops = expect_arity(head, ops, 2)?;
            let declaring = decode_type(&ops[0], table)?;
            let params = decode_type_list(head, &ops[1], table)?;
            Ok(MethodRef::ctor(declaring, params))
        }
        other => Err(DecodeError::UnknownHead(other.into())),
    }
}

/// Encode a method or constructor reference.
pub fn encode_method_ref(method: &MethodRef) -> SExpr {
    if method.is_ctor() {
        return SExpr::node(
            "#ctor_reference",
            vec![
                encode_type(method.declaring_type()),
                encode_type_list(&method.signature().params),
            ],
        );
    }
    SExpr::node(
        "#method_reference",
        vec![
            encode_type(method.declaring_type()),
            SExpr::Str(method.name().into()),
            SExpr::bool(method.is_static()),
            SExpr::List(vec![]),
            encode_type(method.signature().ret),
            encode_type_list(&method.signature().params),
        ],
    )
}

// =============================================================================
// Instruction prototypes
// =============================================================================

type ProtoDecoder = fn(&str, &[SExpr], &TypeTable) -> Result<Prototype, DecodeError>;

fn lookup_by_name(head: &str, operand: &SExpr) -> Result<CallLookup, DecodeError> {
    match expect_ident(head, operand)? {
        "static" => Ok(CallLookup::Static),
        "virtual" => Ok(CallLookup::Virtual),
        other => Err(bad(head, format!("unknown lookup '{}'", other))),
    }
}

fn lookup_name(lookup: CallLookup) -> SExpr {
    SExpr::ident(match lookup {
        CallLookup::Static => "static",
        CallLookup::Virtual => "virtual",
    })
}

fn proto_decoders() -> &'static FxHashMap<&'static str, ProtoDecoder> {
    static TABLE: OnceLock<FxHashMap<&'static str, ProtoDecoder>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: FxHashMap<&'static str, ProtoDecoder> = FxHashMap::default();
        table.insert("alloca", |head, ops, table| {
            let ops = expect_arity(head, ops, 1)?;
            Ok(Prototype::alloca(decode_type(&ops[0], table)?))
        });
        table.insert("alloca_array", |head, ops, table| {
            let ops = expect_arity(head, ops, 1)?;
            Ok(Prototype::alloca_array(decode_type(&ops[0], table)?))
        });
        table.insert("const", |head, ops, table| {
            let ops = expect_arity(head, ops, 2)?;
            let value = decode_constant(&ops[0], table)?;
            let ty = decode_type(&ops[1], table)?;
            Ok(Prototype::constant(value, ty))
        });
        table.insert("copy", |head, ops, table| {
            let ops = expect_arity(head, ops, 1)?;
            Ok(Prototype::copy(decode_type(&ops[0], table)?))
        });
        table.insert("load", |head, ops, table| {
            let ops = expect_arity(head, ops, 1)?;
            Ok(Prototype::load(decode_type(&ops[0], table)?))
        });
        table.insert("store", |head, ops, table| {
            let ops = expect_arity(head, ops, 1)?;
            Ok(Prototype::store(decode_type(&ops[0], table)?))
        });
        table.insert("call", |head, ops, table| {
            let ops = expect_arity(head, ops, 2)?;
            let method = decode_method_ref(&ops[0], table)?;
            let lookup = lookup_by_name(head, &ops[1])?;
            Ok(Prototype::call(method, lookup))
        });
        table.insert("indirect_call", |head, ops, table| {
            let ops = expect_arity(head, ops, 2)?;
            let ret = decode_type(&ops[0], table)?;
            let params = decode_type_list(head, &ops[1], table)?;
            Ok(Prototype::indirect_call(ret, params))
        });
        table.insert("new_object", |head, ops, table| {
            let ops = expect_arity(head, ops, 1)?;
            Ok(Prototype::new_object(decode_method_ref(&ops[0], table)?))
        });
        table.insert("new_delegate", |head, ops, table| {
            let ops = expect_arity(head, ops, 4)?;
            let delegate = decode_type(&ops[0], table)?;
            let callee = decode_method_ref(&ops[1], table)?;
            let has_this = expect_bool(head, &ops[2])?;
            let lookup = lookup_by_name(head, &ops[3])?;
            Ok(Prototype::new_delegate(delegate, callee, has_this, lookup))
        });
        table.insert("reinterpret_cast", |head, ops, table| {
            let ops = expect_arity(head, ops, 1)?;
            Ok(Prototype::reinterpret_cast(decode_type(&ops[0], table)?))
        });
        table.insert("intrinsic", |head, ops, table| {
            let ops = expect_arity(head, ops, 4)?;
            let name = expect_str(head, &ops[0])?;
            let ret = decode_type(&ops[1], table)?;
            let params = decode_type_list(head, &ops[2], table)?;
            let throws = match expect_ident(head, &ops[3])? {
                "nothrow" => ExceptionSpec::NoThrow,
                "maythrow" => ExceptionSpec::MayThrow,
                other => return Err(bad(head, format!("unknown exception spec '{}'", other))),
            };
            Ok(Prototype::intrinsic(name, ret, params, throws))
        });
        table
    })
}

/// Decode an instruction prototype.
pub fn decode_prototype(expr: &SExpr, table: &TypeTable) -> Result<Prototype, DecodeError> {
    let SExpr::Node(head, operands) = expr else {
        return Err(bad("prototype", format!("expected a prototype node, found {:?}", expr)));
    };
    let decoder = proto_decoders()
        .get(head.as_str())
        .ok_or_else(|| DecodeError::UnknownHead(head.clone()))?;
    decoder(head, operands, table)
}

/// Encode an instruction prototype.
pub fn encode_prototype(prototype: &Prototype) -> SExpr {
    match prototype.shape() {
        ProtoShape::Alloca { elem } => SExpr::node("alloca", vec![encode_type(*elem)]),
        ProtoShape::AllocaArray { elem } => {
            SExpr::node("alloca_array", vec![encode_type(*elem)])
        }
        ProtoShape::Constant { value, ty } => {
            SExpr::node("const", vec![encode_constant(value), encode_type(*ty)])
        }
        ProtoShape::Copy { ty } => SExpr::node("copy", vec![encode_type(*ty)]),
        ProtoShape::Load { ty } => SExpr::node("load", vec![encode_type(*ty)]),
        ProtoShape::Store { ty } => SExpr::node("store", vec![encode_type(*ty)]),
        ProtoShape::Call { method, lookup } => SExpr::node(
            "call",
            vec![encode_method_ref(method), lookup_name(*lookup)],
        ),
        ProtoShape::IndirectCall { ret, params } => SExpr::node(
            "indirect_call",
            vec![encode_type(*ret), encode_type_list(params)],
        ),
        ProtoShape::NewObject { ctor } => {
            SExpr::node("new_object", vec![encode_method_ref(ctor)])
        }
        ProtoShape::NewDelegate {
            delegate,
            callee,
            has_this,
            lookup,
        } => SExpr::node(
            "new_delegate",
            vec![
                encode_type(*delegate),
                encode_method_ref(callee),
                SExpr::bool(*has_this),
                lookup_name(*lookup),
            ],
        ),
        ProtoShape::ReinterpretCast { ptr } => {
            SExpr::node("reinterpret_cast", vec![encode_type(*ptr)])
        }
        ProtoShape::Intrinsic {
            name,
            ret,
            params,
            throws,
        } => SExpr::node(
            "intrinsic",
            vec![
                SExpr::Str(name.to_string()),
                encode_type(*ret),
                encode_type_list(params),
                SExpr::ident(match throws {
                    ExceptionSpec::NoThrow => "nothrow",
                    ExceptionSpec::MayThrow => "maythrow",
                }),
            ],
        ),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{parse, print};

    fn empty() -> TypeTable {
        TypeTable::new()
    }

    fn roundtrip_type(ty: Type) {
        let encoded = encode_type(ty);
        let decoded = decode_type(&encoded, &empty()).unwrap();
        assert_eq!(decoded, ty, "type failed to round-trip: {}", print(&encoded));
        // Also through the textual form.
        let reparsed = parse(&print(&encoded)).unwrap();
        assert_eq!(decode_type(&reparsed, &empty()).unwrap(), ty);
    }

    #[test]
    fn types_round_trip() {
        roundtrip_type(Type::void());
        roundtrip_type(Type::bool());
        roundtrip_type(Type::int32());
        roundtrip_type(Type::int(IntWidth::W16, false));
        roundtrip_type(Type::float(FloatWidth::W64));
        roundtrip_type(Type::root());
        roundtrip_type(Type::string());
        roundtrip_type(Type::pointer(Type::int32(), PointerKind::Reference));
        roundtrip_type(Type::array(Type::int64(), 2));
        roundtrip_type(Type::function(vec![Type::int32()], Type::bool()));
        roundtrip_type(Type::named(QualifiedName::parse("System.Text.Builder")));
        roundtrip_type(Type::delegate(
            QualifiedName::parse("App.Handler"),
            vec![Type::int32()],
            Type::int32(),
        ));
    }

    #[test]
    fn nested_type_decodes() {
        let expr = parse("#nested_type(#type_reference(\"A.B\"), \"C\")").unwrap();
        let ty = decode_type(&expr, &empty()).unwrap();
        assert_eq!(ty, Type::named(QualifiedName::parse("A.B.C")));
    }

    #[test]
    fn constants_round_trip() {
        let samples = [
            Constant::I8(-3),
            Constant::I32(42),
            Constant::I64(i64::MIN),
            Constant::U8(200),
            Constant::U64(17),
            Constant::float32(1.25),
            Constant::float64(-0.5),
            Constant::Bool(true),
            Constant::Bool(false),
            Constant::Char('x'),
            Constant::Str("hello world".into()),
            Constant::Null,
            Constant::Default(Type::int32()),
        ];
        for constant in samples {
            let encoded = encode_constant(&constant);
            let decoded = decode_constant(&encoded, &empty()).unwrap();
            assert_eq!(decoded, constant, "constant failed: {}", print(&encoded));
        }
    }

    #[test]
    fn method_refs_round_trip() {
        let instance = MethodRef::instance(
            Type::root(),
            "Frob",
            FnSignature::new(vec![Type::int32()], Type::bool()),
        );
        let of_static = MethodRef::static_method(
            Type::named(QualifiedName::parse("App.Math")),
            "Max",
            FnSignature::new(vec![Type::int32(), Type::int32()], Type::int32()),
        );
        let ctor = MethodRef::ctor(Type::root(), vec![Type::int32()]);

        for method in [instance, of_static, ctor] {
            let encoded = encode_method_ref(&method);
            let decoded = decode_method_ref(&encoded, &empty()).unwrap();
            assert_eq!(decoded, method, "method failed: {}", print(&encoded));
        }
    }

    #[test]
    fn prototypes_round_trip() {
        let method = MethodRef::instance(
            Type::root(),
            "Frob",
            FnSignature::new(vec![Type::int32()], Type::bool()),
        );
        let delegate = Type::delegate(
            QualifiedName::parse("App.Handler"),
            vec![Type::int32()],
            Type::int32(),
        );

        let samples = vec![
            Prototype::alloca(Type::int32()),
            Prototype::alloca_array(Type::int64()),
            Prototype::constant(Constant::I32(42), Type::int32()),
            Prototype::copy(Type::bool()),
            Prototype::load(Type::int32()),
            Prototype::store(Type::int32()),
            Prototype::call(method.clone(), CallLookup::Virtual),
            Prototype::indirect_call(Type::int32(), vec![Type::int32()]),
            Prototype::new_object(MethodRef::ctor(Type::root(), vec![])),
            Prototype::new_delegate(delegate, method, true, CallLookup::Static),
            Prototype::reinterpret_cast(Type::pointer(Type::int32(), PointerKind::Box)),
            Prototype::intrinsic(
                "arith.add",
                Type::int32(),
                vec![Type::int32(), Type::int32()],
                ExceptionSpec::NoThrow,
            ),
        ];

        for prototype in samples {
            let encoded = encode_prototype(&prototype);
            let decoded = decode_prototype(&encoded, &empty()).unwrap();
            // Interning makes round-trip equality pointer identity.
            assert_eq!(decoded, prototype, "prototype failed: {}", print(&encoded));
            let reparsed = parse(&print(&encoded)).unwrap();
            assert_eq!(decode_prototype(&reparsed, &empty()).unwrap(), prototype);
        }
    }

    #[test]
    fn type_table_references_resolve() {
        let mut table = TypeTable::new();
        let ty = Type::pointer(Type::int32(), PointerKind::Box);
        let reference = table.encode_ref(ty);
        assert_eq!(table.encode_ref(ty), reference, "interning is stable");

        let decoded = decode_type(&reference, &table).unwrap();
        assert_eq!(decoded, ty);
    }

    #[test]
    fn type_table_round_trips() {
        let mut table = TypeTable::new();
        table.intern(Type::int32());
        table.intern(Type::pointer(Type::int32(), PointerKind::Reference));

        let encoded = table.encode();
        let decoded = TypeTable::decode(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.get(0), Some(Type::int32()));
        assert_eq!(
            decoded.get(1),
            Some(Type::pointer(Type::int32(), PointerKind::Reference))
        );
    }

    #[test]
    fn out_of_range_table_reference_fails() {
        let expr = parse("#type_table_reference(9)").unwrap();
        assert!(decode_type(&expr, &empty()).is_err());
    }

    #[test]
    fn unknown_heads_fail() {
        let expr = parse("#mystery_type(1)").unwrap();
        assert!(matches!(
            decode_type(&expr, &empty()),
            Err(DecodeError::UnknownHead(_))
        ));
        let expr = parse("mystery(1)").unwrap();
        assert!(matches!(
            decode_prototype(&expr, &empty()),
            Err(DecodeError::UnknownHead(_))
        ));
    }
}
