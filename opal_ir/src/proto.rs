//! Instruction prototypes: interned, immutable operation descriptors.
//!
//! A prototype fixes an operation's kind and every non-value parameter
//! (types, callees, constants). Binding a prototype to value arguments
//! produces an [`Instruction`](crate::instruction::Instruction); the
//! prototype itself is shared.
//!
//! Prototypes are structurally interned through a process-wide
//! canonicalizing cache: building the same shape twice hands back the same
//! allocation, so equality is pointer identity. The cache is safe under
//! concurrent lookup-or-insert; racing writers observe one canonical handle.

use dashmap::DashMap;
use std::sync::{Arc, OnceLock};

use crate::constant::Constant;
use crate::method::MethodRef;
use crate::tag::ValueTag;
use crate::types::{Type, TypeKind};

// =============================================================================
// Supporting enums
// =============================================================================

/// How a call site resolves its callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallLookup {
    /// Direct dispatch to the named method.
    Static,
    /// Late-bound dispatch through the receiver.
    Virtual,
}

/// Whether an operation can transfer control to an exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionSpec {
    NoThrow,
    MayThrow,
}

// =============================================================================
// Prototype shapes
// =============================================================================

/// The structural content of a prototype. Only the interner constructs
/// these; everything else handles [`Prototype`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProtoShape {
    /// Allocate one stack slot of the element type; yields a box pointer.
    Alloca { elem: Type },
    /// Allocate a counted run of elements; yields a box pointer.
    AllocaArray { elem: Type },
    /// Materialize a literal.
    Constant { value: Constant, ty: Type },
    /// Identity copy; the way terminal values ride on `Return` flow.
    Copy { ty: Type },
    /// Read through a pointer.
    Load { ty: Type },
    /// Write a value through a pointer.
    Store { ty: Type },
    /// Call a known method.
    Call { method: MethodRef, lookup: CallLookup },
    /// Call through a first-argument callee of function or delegate type.
    IndirectCall { ret: Type, params: Vec<Type> },
    /// Allocate and construct an object.
    NewObject { ctor: MethodRef },
    /// Materialize a delegate (or, after lowering, a raw function pointer)
    /// over a callee method.
    NewDelegate {
        delegate: Type,
        callee: MethodRef,
        has_this: bool,
        lookup: CallLookup,
    },
    /// Repaint a pointer with a different pointee type.
    ReinterpretCast { ptr: Type },
    /// A named primitive operation with an explicit signature.
    Intrinsic {
        name: Arc<str>,
        ret: Type,
        params: Vec<Type>,
        throws: ExceptionSpec,
    },
}

// =============================================================================
// Interning
// =============================================================================

/// An interned instruction prototype.
///
/// Equality and hashing are by identity; the interner guarantees that
/// structural equality of shapes coincides with identity of handles.
#[derive(Clone)]
pub struct Prototype(Arc<ProtoShape>);

impl PartialEq for Prototype {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Prototype {}

impl std::hash::Hash for Prototype {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

static CACHE: OnceLock<DashMap<ProtoShape, Prototype>> = OnceLock::new();

fn cache() -> &'static DashMap<ProtoShape, Prototype> {
    CACHE.get_or_init(DashMap::new)
}

impl Prototype {
    /// Intern a shape, returning the canonical handle.
    pub fn intern(shape: ProtoShape) -> Prototype {
        if let Some(existing) = cache().get(&shape) {
            return existing.clone();
        }
        cache()
            .entry(shape.clone())
            .or_insert_with(|| Prototype(Arc::new(shape)))
            .clone()
    }

    // Convenience constructors, one per operation.

    pub fn alloca(elem: Type) -> Prototype {
        Prototype::intern(ProtoShape::Alloca { elem })
    }

    pub fn alloca_array(elem: Type) -> Prototype {
        Prototype::intern(ProtoShape::AllocaArray { elem })
    }

    pub fn constant(value: Constant, ty: Type) -> Prototype {
        Prototype::intern(ProtoShape::Constant { value, ty })
    }

    pub fn copy(ty: Type) -> Prototype {
        Prototype::intern(ProtoShape::Copy { ty })
    }

    pub fn load(ty: Type) -> Prototype {
        Prototype::intern(ProtoShape::Load { ty })
    }

    pub fn store(ty: Type) -> Prototype {
        Prototype::intern(ProtoShape::Store { ty })
    }

    pub fn call(method: MethodRef, lookup: CallLookup) -> Prototype {
        Prototype::intern(ProtoShape::Call { method, lookup })
    }

    pub fn indirect_call(ret: Type, params: Vec<Type>) -> Prototype {
        Prototype::intern(ProtoShape::IndirectCall { ret, params })
    }

    pub fn new_object(ctor: MethodRef) -> Prototype {
        Prototype::intern(ProtoShape::NewObject { ctor })
    }

    pub fn new_delegate(
        delegate: Type,
        callee: MethodRef,
        has_this: bool,
        lookup: CallLookup,
    ) -> Prototype {
        Prototype::intern(ProtoShape::NewDelegate {
            delegate,
            callee,
            has_this,
            lookup,
        })
    }

    pub fn reinterpret_cast(ptr: Type) -> Prototype {
        Prototype::intern(ProtoShape::ReinterpretCast { ptr })
    }

    pub fn intrinsic(
        name: impl Into<Arc<str>>,
        ret: Type,
        params: Vec<Type>,
        throws: ExceptionSpec,
    ) -> Prototype {
        Prototype::intern(ProtoShape::Intrinsic {
            name: name.into(),
            ret,
            params,
            throws,
        })
    }

    /// The underlying shape.
    #[inline]
    pub fn shape(&self) -> &ProtoShape {
        &self.0
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Where conformance checks resolve the types of value arguments.
pub trait TypeEnv {
    /// The result type of the value named by `tag`, if it is known.
    fn type_of(&self, tag: &ValueTag) -> Option<Type>;
}

impl Prototype {
    /// The type of the value this prototype produces.
    pub fn result_type(&self) -> Type {
        match self.shape() {
            ProtoShape::Alloca { elem } | ProtoShape::AllocaArray { elem } => {
                Type::pointer(*elem, crate::types::PointerKind::Box)
            }
            ProtoShape::Constant { ty, .. } => *ty,
            ProtoShape::Copy { ty } => *ty,
            ProtoShape::Load { ty } => *ty,
            ProtoShape::Store { .. } => Type::void(),
            ProtoShape::Call { method, .. } => method.signature().ret,
            ProtoShape::IndirectCall { ret, .. } => *ret,
            ProtoShape::NewObject { ctor } => ctor.declaring_type(),
            ProtoShape::NewDelegate { delegate, .. } => *delegate,
            ProtoShape::ReinterpretCast { ptr } => *ptr,
            ProtoShape::Intrinsic { ret, .. } => *ret,
        }
    }

    /// Declared parameter types, in argument order.
    pub fn parameter_types(&self) -> Vec<Type> {
        match self.shape() {
            ProtoShape::Alloca { .. } | ProtoShape::Constant { .. } => Vec::new(),
            ProtoShape::AllocaArray { .. } => vec![Type::int(crate::types::IntWidth::W64, false)],
            ProtoShape::Copy { ty } => {
                if ty.is_void() {
                    Vec::new()
                } else {
                    vec![*ty]
                }
            }
            ProtoShape::Load { ty } => {
                vec![Type::pointer(*ty, crate::types::PointerKind::Box)]
            }
            ProtoShape::Store { ty } => {
                vec![*ty, Type::pointer(*ty, crate::types::PointerKind::Box)]
            }
            ProtoShape::Call { method, .. } => method.call_parameter_types(),
            ProtoShape::IndirectCall { ret, params } => {
                let mut all = Vec::with_capacity(params.len() + 1);
                all.push(Type::function(params.clone(), *ret));
                all.extend_from_slice(params);
                all
            }
            ProtoShape::NewObject { ctor } => ctor.signature().params.clone(),
            ProtoShape::NewDelegate {
                callee, has_this, ..
            } => {
                if *has_this {
                    vec![callee.declaring_type()]
                } else {
                    Vec::new()
                }
            }
            ProtoShape::ReinterpretCast { ptr } => vec![*ptr],
            ProtoShape::Intrinsic { params, .. } => params.clone(),
        }
    }

    /// Number of value arguments an instance of this prototype binds.
    pub fn parameter_count(&self) -> usize {
        self.parameter_types().len()
    }

    /// Whether an instance of this prototype can throw.
    pub fn exception_spec(&self) -> ExceptionSpec {
        match self.shape() {
            ProtoShape::Call { .. }
            | ProtoShape::IndirectCall { .. }
            | ProtoShape::NewObject { .. } => ExceptionSpec::MayThrow,
            ProtoShape::Intrinsic { throws, .. } => *throws,
            _ => ExceptionSpec::NoThrow,
        }
    }

    /// Check a single argument slot against this prototype.
    ///
    /// Most slots demand exact type equality with the declared parameter.
    /// The exceptions carry their own rules: allocation counts accept any
    /// integer, pointer slots accept either pointer kind over the right
    /// pointee, and the indirect-call callee accepts any function or
    /// delegate whose signature matches.
    pub fn check_argument(&self, index: usize, actual: Type) -> Result<(), String> {
        match self.shape() {
            ProtoShape::AllocaArray { .. } if index == 0 => {
                if actual.is_integer() {
                    Ok(())
                } else {
                    Err(format!(
                        "element count must be an integer, found '{}'",
                        actual
                    ))
                }
            }
            ProtoShape::Load { ty } if index == 0 => expect_pointer_to(actual, *ty),
            ProtoShape::Store { ty } if index == 1 => expect_pointer_to(actual, *ty),
            ProtoShape::ReinterpretCast { .. } if index == 0 => {
                if actual.is_pointer() {
                    Ok(())
                } else {
                    Err(format!("cast source must be a pointer, found '{}'", actual))
                }
            }
            ProtoShape::IndirectCall { ret, params } if index == 0 => {
                match actual.callable_signature() {
                    Some((sig_params, sig_ret))
                        if sig_params == *params && sig_ret == *ret =>
                    {
                        Ok(())
                    }
                    Some(_) => Err(format!(
                        "callee type '{}' does not match the call signature",
                        actual
                    )),
                    None => Err(format!(
                        "callee must have function or delegate type, found '{}'",
                        actual
                    )),
                }
            }
            _ => {
                let expected = self
                    .parameter_types()
                    .get(index)
                    .copied()
                    .ok_or_else(|| format!("argument index {} out of range", index))?;
                if expected == actual {
                    Ok(())
                } else {
                    Err(format!(
                        "argument {} has type '{}', expected '{}'",
                        index, actual, expected
                    ))
                }
            }
        }
    }

    /// Check an argument list against this prototype, resolving argument
    /// types through `env`. Returns every violation found.
    pub fn check_conformance(&self, args: &[ValueTag], env: &dyn TypeEnv) -> Vec<String> {
        let mut errors = Vec::new();

        let expected = self.parameter_count();
        if args.len() != expected {
            errors.push(format!(
                "'{}' takes {} argument(s), found {}",
                self, expected, args.len()
            ));
            return errors;
        }

        for (i, tag) in args.iter().enumerate() {
            match env.type_of(tag) {
                Some(actual) => {
                    if let Err(msg) = self.check_argument(i, actual) {
                        errors.push(format!("'{}': {}", self, msg));
                    }
                }
                None => {
                    errors.push(format!("'{}': argument {} is not in the graph", self, tag));
                }
            }
        }

        errors
    }

    /// Substitute every embedded type and re-intern.
    pub fn map_types(&self, mapper: &mut dyn FnMut(Type) -> Type) -> Prototype {
        let shape = match self.shape() {
            ProtoShape::Alloca { elem } => ProtoShape::Alloca {
                elem: elem.map(mapper),
            },
            ProtoShape::AllocaArray { elem } => ProtoShape::AllocaArray {
                elem: elem.map(mapper),
            },
            ProtoShape::Constant { value, ty } => ProtoShape::Constant {
                value: value.map_types(mapper),
                ty: ty.map(mapper),
            },
            ProtoShape::Copy { ty } => ProtoShape::Copy { ty: ty.map(mapper) },
            ProtoShape::Load { ty } => ProtoShape::Load { ty: ty.map(mapper) },
            ProtoShape::Store { ty } => ProtoShape::Store { ty: ty.map(mapper) },
            ProtoShape::Call { method, lookup } => ProtoShape::Call {
                method: method.map_types(mapper),
                lookup: *lookup,
            },
            ProtoShape::IndirectCall { ret, params } => ProtoShape::IndirectCall {
                ret: ret.map(mapper),
                params: params.iter().map(|p| p.map(mapper)).collect(),
            },
            ProtoShape::NewObject { ctor } => ProtoShape::NewObject {
                ctor: ctor.map_types(mapper),
            },
            ProtoShape::NewDelegate {
                delegate,
                callee,
                has_this,
                lookup,
            } => ProtoShape::NewDelegate {
                delegate: delegate.map(mapper),
                callee: callee.map_types(mapper),
                has_this: *has_this,
                lookup: *lookup,
            },
            ProtoShape::ReinterpretCast { ptr } => ProtoShape::ReinterpretCast {
                ptr: ptr.map(mapper),
            },
            ProtoShape::Intrinsic {
                name,
                ret,
                params,
                throws,
            } => ProtoShape::Intrinsic {
                name: name.clone(),
                ret: ret.map(mapper),
                params: params.iter().map(|p| p.map(mapper)).collect(),
                throws: *throws,
            },
        };
        Prototype::intern(shape)
    }
}

fn expect_pointer_to(actual: Type, pointee: Type) -> Result<(), String> {
    match actual.kind() {
        TypeKind::Pointer { elem, .. } if elem == pointee => Ok(()),
        _ => Err(format!(
            "expected a pointer to '{}', found '{}'",
            pointee, actual
        )),
    }
}

impl std::fmt::Debug for Prototype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl std::fmt::Display for Prototype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.shape() {
            ProtoShape::Alloca { elem } => write!(f, "alloca {}", elem),
            ProtoShape::AllocaArray { elem } => write!(f, "alloca_array {}", elem),
            ProtoShape::Constant { value, ty } => write!(f, "const {:?} : {}", value, ty),
            ProtoShape::Copy { ty } => write!(f, "copy {}", ty),
            ProtoShape::Load { ty } => write!(f, "load {}", ty),
            ProtoShape::Store { ty } => write!(f, "store {}", ty),
            ProtoShape::Call { method, lookup } => {
                let how = match lookup {
                    CallLookup::Static => "call",
                    CallLookup::Virtual => "callvirt",
                };
                write!(f, "{} {}", how, method)
            }
            ProtoShape::IndirectCall { ret, params } => {
                write!(f, "indirect_call (")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", ret)
            }
            ProtoShape::NewObject { ctor } => write!(f, "new_object {}", ctor),
            ProtoShape::NewDelegate {
                delegate, callee, ..
            } => write!(f, "new_delegate {} over {}", delegate, callee),
            ProtoShape::ReinterpretCast { ptr } => write!(f, "reinterpret_cast {}", ptr),
            ProtoShape::Intrinsic { name, .. } => write!(f, "intrinsic {}", name),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::FnSignature;
    use crate::tag::{QualifiedName, TagAllocator};
    use rustc_hash::FxHashMap;

    struct MapEnv(FxHashMap<ValueTag, Type>);

    impl TypeEnv for MapEnv {
        fn type_of(&self, tag: &ValueTag) -> Option<Type> {
            self.0.get(tag).copied()
        }
    }

    #[test]
    fn interning_yields_pointer_identity() {
        let a = Prototype::alloca(Type::int32());
        let b = Prototype::alloca(Type::int32());
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_ne!(a, Prototype::alloca(Type::int64()));
    }

    #[test]
    fn call_prototype_shapes() {
        let m = MethodRef::instance(
            Type::root(),
            "Frob",
            FnSignature::new(vec![Type::int32()], Type::bool()),
        );
        let p = Prototype::call(m, CallLookup::Virtual);
        assert_eq!(p.result_type(), Type::bool());
        assert_eq!(p.parameter_types(), vec![Type::root(), Type::int32()]);
        assert_eq!(p.exception_spec(), ExceptionSpec::MayThrow);
    }

    #[test]
    fn copy_of_void_takes_no_arguments() {
        assert_eq!(Prototype::copy(Type::void()).parameter_count(), 0);
        assert_eq!(Prototype::copy(Type::int32()).parameter_count(), 1);
    }

    #[test]
    fn conformance_checks_arity_and_types() {
        let alloc = TagAllocator::new();
        let v = alloc.value("v");
        let mut env = FxHashMap::default();
        env.insert(v.clone(), Type::int32());
        let env = MapEnv(env);

        let copy32 = Prototype::copy(Type::int32());
        assert!(copy32.check_conformance(&[v.clone()], &env).is_empty());

        let copy64 = Prototype::copy(Type::int64());
        let errors = copy64.check_conformance(&[v.clone()], &env);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("expected 'int64'"));

        let errors = copy32.check_conformance(&[], &env);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("takes 1 argument"));
    }

    #[test]
    fn indirect_call_requires_matching_callee() {
        let alloc = TagAllocator::new();
        let callee = alloc.value("f");
        let arg = alloc.value("x");

        let mut env = FxHashMap::default();
        env.insert(
            callee.clone(),
            Type::delegate(
                QualifiedName::parse("App.Handler"),
                vec![Type::int32()],
                Type::int32(),
            ),
        );
        env.insert(arg.clone(), Type::int32());
        let env = MapEnv(env);

        let p = Prototype::indirect_call(Type::int32(), vec![Type::int32()]);
        assert!(p
            .check_conformance(&[callee.clone(), arg.clone()], &env)
            .is_empty());

        let wrong = Prototype::indirect_call(Type::bool(), vec![Type::int32()]);
        let errors = wrong.check_conformance(&[callee, arg], &env);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("does not match"));
    }

    #[test]
    fn map_types_reinterns() {
        let p = Prototype::load(Type::int32());
        let mapped = p.map_types(&mut |t| if t == Type::int32() { Type::int64() } else { t });
        assert_eq!(mapped, Prototype::load(Type::int64()));
        assert_ne!(mapped, p);
    }

    #[test]
    fn store_accepts_either_pointer_kind() {
        use crate::types::PointerKind;
        let p = Prototype::store(Type::int32());
        assert!(p
            .check_argument(1, Type::pointer(Type::int32(), PointerKind::Reference))
            .is_ok());
        assert!(p
            .check_argument(1, Type::pointer(Type::int32(), PointerKind::Box))
            .is_ok());
        assert!(p.check_argument(1, Type::int32()).is_err());
    }
}
