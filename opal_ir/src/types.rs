//! Structurally interned type handles.
//!
//! The mid-end treats types as opaque: a [`Type`] is a small copyable handle
//! into a process-wide store, and the only questions the IR ever asks of it
//! are structural equality and the [`TypeKind`] resolution (integer width and
//! sign, float width, pointer kind, voidness, callable signatures). Nothing
//! in this module models inheritance.
//!
//! Interning follows the runtime registry idiom: a concurrent lookup-or-insert
//! table in front of an append-only shape list. Two threads racing to intern
//! the same shape observe the same handle.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

use crate::tag::QualifiedName;

// =============================================================================
// Handles
// =============================================================================

/// An interned type handle.
///
/// Equality is structural by construction: interning maps equal shapes to
/// equal handles, so handle comparison is a single integer compare.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type(u32);

impl Type {
    /// Raw index into the store (stable for the process lifetime).
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Width of an integer type, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    /// Width in bits.
    #[inline]
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

/// Width of a floating-point type, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    W32,
    W64,
}

/// How a pointer refers to its pointee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    /// An owning allocation (stack slot or heap box).
    Box,
    /// A borrowed reference to storage owned elsewhere.
    Reference,
}

// =============================================================================
// Shapes
// =============================================================================

/// The structural shape of a type. Internal to the store; the IR sees
/// [`TypeKind`] views instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TypeShape {
    Void,
    Bool,
    Char,
    Str,
    Int { width: IntWidth, signed: bool },
    Float(FloatWidth),
    /// The root object type every managed reference conforms to.
    Root,
    Pointer { elem: Type, kind: PointerKind },
    Array { elem: Type, rank: u32 },
    Function { params: Vec<Type>, ret: Type },
    Named(QualifiedName),
    Delegate { name: QualifiedName, params: Vec<Type>, ret: Type },
}

/// Resolved view of a type, answering the questions the mid-end asks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Bool,
    Char,
    Str,
    SignedInt(IntWidth),
    UnsignedInt(IntWidth),
    Float(FloatWidth),
    /// Root object type.
    Root,
    Pointer { elem: Type, kind: PointerKind },
    Array { elem: Type, rank: u32 },
    Function { params: Vec<Type>, ret: Type },
    /// Nominal type with no structure visible to the mid-end.
    Named(QualifiedName),
    /// Delegate type carrying its `Invoke` signature.
    Delegate { name: QualifiedName, params: Vec<Type>, ret: Type },
}

// =============================================================================
// Store
// =============================================================================

/// Process-wide interning store.
struct TypeStore {
    /// Shape -> handle, the canonicalizing map.
    interned: DashMap<TypeShape, Type>,
    /// Handle -> shape, append-only.
    shapes: RwLock<Vec<TypeShape>>,
}

impl TypeStore {
    fn new() -> Self {
        Self {
            interned: DashMap::new(),
            shapes: RwLock::new(Vec::new()),
        }
    }

    fn intern(&self, shape: TypeShape) -> Type {
        if let Some(existing) = self.interned.get(&shape) {
            return *existing;
        }
        // Resolve the race inside the entry: the first writer appends, later
        // writers observe the stored handle.
        *self.interned.entry(shape.clone()).or_insert_with(|| {
            let mut shapes = self.shapes.write();
            let handle = Type(shapes.len() as u32);
            shapes.push(shape);
            handle
        })
    }

    fn shape(&self, ty: Type) -> TypeShape {
        self.shapes.read()[ty.0 as usize].clone()
    }
}

static STORE: OnceLock<TypeStore> = OnceLock::new();

fn store() -> &'static TypeStore {
    STORE.get_or_init(TypeStore::new)
}

// =============================================================================
// Constructors & Resolution
// =============================================================================

impl Type {
    /// The `void` type.
    pub fn void() -> Type {
        store().intern(TypeShape::Void)
    }

    /// The boolean type.
    pub fn bool() -> Type {
        store().intern(TypeShape::Bool)
    }

    /// The character type.
    pub fn char() -> Type {
        store().intern(TypeShape::Char)
    }

    /// The string type.
    pub fn string() -> Type {
        store().intern(TypeShape::Str)
    }

    /// An integer type of the given width and signedness.
    pub fn int(width: IntWidth, signed: bool) -> Type {
        store().intern(TypeShape::Int { width, signed })
    }

    /// The signed 32-bit integer type.
    pub fn int32() -> Type {
        Type::int(IntWidth::W32, true)
    }

    /// The signed 64-bit integer type.
    pub fn int64() -> Type {
        Type::int(IntWidth::W64, true)
    }

    /// A floating-point type of the given width.
    pub fn float(width: FloatWidth) -> Type {
        store().intern(TypeShape::Float(width))
    }

    /// The root object type.
    pub fn root() -> Type {
        store().intern(TypeShape::Root)
    }

    /// A pointer to `elem` with the given kind.
    pub fn pointer(elem: Type, kind: PointerKind) -> Type {
        store().intern(TypeShape::Pointer { elem, kind })
    }

    /// An array of `elem` with the given rank.
    pub fn array(elem: Type, rank: u32) -> Type {
        store().intern(TypeShape::Array { elem, rank })
    }

    /// A bare function type `(params) -> ret`.
    pub fn function(params: Vec<Type>, ret: Type) -> Type {
        store().intern(TypeShape::Function { params, ret })
    }

    /// A nominal type known only by name.
    pub fn named(name: QualifiedName) -> Type {
        store().intern(TypeShape::Named(name))
    }

    /// A delegate type with its `Invoke` signature.
    pub fn delegate(name: QualifiedName, params: Vec<Type>, ret: Type) -> Type {
        store().intern(TypeShape::Delegate { name, params, ret })
    }

    /// Resolve this handle to its structural view.
    pub fn kind(self) -> TypeKind {
        match store().shape(self) {
            TypeShape::Void => TypeKind::Void,
            TypeShape::Bool => TypeKind::Bool,
            TypeShape::Char => TypeKind::Char,
            TypeShape::Str => TypeKind::Str,
            TypeShape::Int { width, signed: true } => TypeKind::SignedInt(width),
            TypeShape::Int { width, signed: false } => TypeKind::UnsignedInt(width),
            TypeShape::Float(w) => TypeKind::Float(w),
            TypeShape::Root => TypeKind::Root,
            TypeShape::Pointer { elem, kind } => TypeKind::Pointer { elem, kind },
            TypeShape::Array { elem, rank } => TypeKind::Array { elem, rank },
            TypeShape::Function { params, ret } => TypeKind::Function { params, ret },
            TypeShape::Named(name) => TypeKind::Named(name),
            TypeShape::Delegate { name, params, ret } => TypeKind::Delegate { name, params, ret },
        }
    }

    /// Whether this is the `void` type.
    #[inline]
    pub fn is_void(self) -> bool {
        self == Type::void()
    }

    /// Whether this type resolves to an integer of either sign.
    pub fn is_integer(self) -> bool {
        matches!(
            self.kind(),
            TypeKind::SignedInt(_) | TypeKind::UnsignedInt(_)
        )
    }

    /// Whether this type resolves to a pointer.
    pub fn is_pointer(self) -> bool {
        matches!(self.kind(), TypeKind::Pointer { .. })
    }

    /// The callable signature of this type, if it is a function or delegate.
    pub fn callable_signature(self) -> Option<(Vec<Type>, Type)> {
        match self.kind() {
            TypeKind::Function { params, ret } => Some((params, ret)),
            TypeKind::Delegate { params, ret, .. } => Some((params, ret)),
            _ => None,
        }
    }

    /// Substitute through this type, re-interning the result.
    ///
    /// The mapper runs on every type embedded in this one, innermost first,
    /// and finally on the rebuilt type itself. Generic specialization drives
    /// prototype rewriting through this.
    pub fn map(self, mapper: &mut dyn FnMut(Type) -> Type) -> Type {
        let rebuilt = match store().shape(self) {
            TypeShape::Pointer { elem, kind } => Type::pointer(elem.map(mapper), kind),
            TypeShape::Array { elem, rank } => Type::array(elem.map(mapper), rank),
            TypeShape::Function { params, ret } => Type::function(
                params.into_iter().map(|p| p.map(mapper)).collect(),
                ret.map(mapper),
            ),
            TypeShape::Delegate { name, params, ret } => Type::delegate(
                name,
                params.into_iter().map(|p| p.map(mapper)).collect(),
                ret.map(mapper),
            ),
            _ => self,
        };
        mapper(rebuilt)
    }
}

impl std::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            TypeKind::Void => write!(f, "void"),
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Char => write!(f, "char"),
            TypeKind::Str => write!(f, "string"),
            TypeKind::SignedInt(w) => write!(f, "int{}", w.bits()),
            TypeKind::UnsignedInt(w) => write!(f, "uint{}", w.bits()),
            TypeKind::Float(FloatWidth::W32) => write!(f, "float32"),
            TypeKind::Float(FloatWidth::W64) => write!(f, "float64"),
            TypeKind::Root => write!(f, "object"),
            TypeKind::Pointer { elem, kind } => {
                let sigil = match kind {
                    PointerKind::Box => "box",
                    PointerKind::Reference => "ref",
                };
                write!(f, "{}*{}", elem, sigil)
            }
            TypeKind::Array { elem, rank } => write!(f, "{}[{}]", elem, rank),
            TypeKind::Function { params, ret } => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", ret)
            }
            TypeKind::Named(name) => write!(f, "{}", name),
            TypeKind::Delegate { name, .. } => write!(f, "{}", name),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_structural() {
        let a = Type::int(IntWidth::W32, true);
        let b = Type::int(IntWidth::W32, true);
        assert_eq!(a, b);
        assert_ne!(a, Type::int(IntWidth::W32, false));
        assert_ne!(a, Type::int(IntWidth::W64, true));
    }

    #[test]
    fn composite_interning() {
        let p1 = Type::pointer(Type::int32(), PointerKind::Reference);
        let p2 = Type::pointer(Type::int32(), PointerKind::Reference);
        assert_eq!(p1, p2);
        assert_ne!(p1, Type::pointer(Type::int32(), PointerKind::Box));
    }

    #[test]
    fn kind_round_trips() {
        let f = Type::function(vec![Type::int32(), Type::bool()], Type::void());
        match f.kind() {
            TypeKind::Function { params, ret } => {
                assert_eq!(params, vec![Type::int32(), Type::bool()]);
                assert_eq!(ret, Type::void());
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn delegate_signature_resolves() {
        let d = Type::delegate(
            QualifiedName::parse("App.Handler"),
            vec![Type::int32()],
            Type::int32(),
        );
        assert_eq!(
            d.callable_signature(),
            Some((vec![Type::int32()], Type::int32()))
        );
    }

    #[test]
    fn map_substitutes_nested_types() {
        let src = Type::function(vec![Type::int32()], Type::int32());
        let mapped = src.map(&mut |t| {
            if t == Type::int32() {
                Type::int64()
            } else {
                t
            }
        });
        assert_eq!(mapped, Type::function(vec![Type::int64()], Type::int64()));
    }

    #[test]
    fn void_query() {
        assert!(Type::void().is_void());
        assert!(!Type::bool().is_void());
    }
}
