//! References to callable members of the surrounding type system.
//!
//! The mid-end never resolves method bodies; a [`MethodRef`] is just enough
//! identity and signature for `Call`, `NewObject`, and `NewDelegate`
//! prototypes to type-check their arguments.

use std::sync::Arc;

use crate::types::{Type, TypeKind};

// =============================================================================
// Method References
// =============================================================================

/// Signature of a callable: parameter types and return type, excluding any
/// implicit `this`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnSignature {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl FnSignature {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self { params, ret }
    }
}

/// A reference to a method or constructor of some type.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodRef(Arc<MethodData>);

#[derive(Debug, PartialEq, Eq, Hash)]
struct MethodData {
    declaring: Type,
    name: Arc<str>,
    is_static: bool,
    is_ctor: bool,
    signature: FnSignature,
}

impl MethodRef {
    /// Reference an instance method.
    pub fn instance(declaring: Type, name: impl Into<Arc<str>>, signature: FnSignature) -> Self {
        MethodRef(Arc::new(MethodData {
            declaring,
            name: name.into(),
            is_static: false,
            is_ctor: false,
            signature,
        }))
    }

    /// Reference a static method.
    pub fn static_method(
        declaring: Type,
        name: impl Into<Arc<str>>,
        signature: FnSignature,
    ) -> Self {
        MethodRef(Arc::new(MethodData {
            declaring,
            name: name.into(),
            is_static: true,
            is_ctor: false,
            signature,
        }))
    }

    /// Reference a constructor. Constructors return `void`; the `NewObject`
    /// prototype produces the constructed instance.
    pub fn ctor(declaring: Type, params: Vec<Type>) -> Self {
        MethodRef(Arc::new(MethodData {
            declaring,
            name: ".ctor".into(),
            is_static: false,
            is_ctor: true,
            signature: FnSignature::new(params, Type::void()),
        }))
    }

    /// The `Invoke` method of a delegate type. Returns `None` when the type
    /// is not a delegate.
    pub fn delegate_invoke(delegate: Type) -> Option<Self> {
        match delegate.kind() {
            TypeKind::Delegate { params, ret, .. } => Some(MethodRef::instance(
                delegate,
                "Invoke",
                FnSignature::new(params, ret),
            )),
            _ => None,
        }
    }

    /// The two-argument constructor `(object, fnptr)` of a delegate type.
    pub fn delegate_ctor(delegate: Type, fnptr_ty: Type) -> Option<Self> {
        match delegate.kind() {
            TypeKind::Delegate { .. } => Some(MethodRef::ctor(
                delegate,
                vec![Type::root(), fnptr_ty],
            )),
            _ => None,
        }
    }

    /// The type declaring this method.
    #[inline]
    pub fn declaring_type(&self) -> Type {
        self.0.declaring
    }

    /// The unqualified method name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Whether the method takes no implicit `this`.
    #[inline]
    pub fn is_static(&self) -> bool {
        self.0.is_static
    }

    /// Whether this references a constructor.
    #[inline]
    pub fn is_ctor(&self) -> bool {
        self.0.is_ctor
    }

    /// Explicit parameter and return types.
    #[inline]
    pub fn signature(&self) -> &FnSignature {
        &self.0.signature
    }

    /// Parameter list as seen by a call site: the declaring type is
    /// prepended for instance methods.
    pub fn call_parameter_types(&self) -> Vec<Type> {
        let sig = &self.0.signature;
        if self.0.is_static {
            sig.params.clone()
        } else {
            let mut params = Vec::with_capacity(sig.params.len() + 1);
            params.push(self.0.declaring);
            params.extend_from_slice(&sig.params);
            params
        }
    }

    /// Substitute every type in this reference.
    pub fn map_types(&self, mapper: &mut dyn FnMut(Type) -> Type) -> MethodRef {
        MethodRef(Arc::new(MethodData {
            declaring: self.0.declaring.map(mapper),
            name: self.0.name.clone(),
            is_static: self.0.is_static,
            is_ctor: self.0.is_ctor,
            signature: FnSignature::new(
                self.0
                    .signature
                    .params
                    .iter()
                    .map(|p| p.map(mapper))
                    .collect(),
                self.0.signature.ret.map(mapper),
            ),
        }))
    }
}

impl std::fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.0.declaring, self.0.name)
    }
}

impl std::fmt::Display for MethodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.0.declaring, self.0.name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::QualifiedName;

    fn handler_delegate() -> Type {
        Type::delegate(
            QualifiedName::parse("App.Handler"),
            vec![Type::int32()],
            Type::int32(),
        )
    }

    #[test]
    fn instance_call_parameters_include_this() {
        let m = MethodRef::instance(
            Type::root(),
            "ToString",
            FnSignature::new(vec![], Type::string()),
        );
        assert_eq!(m.call_parameter_types(), vec![Type::root()]);
    }

    #[test]
    fn static_call_parameters_are_explicit() {
        let m = MethodRef::static_method(
            Type::root(),
            "Max",
            FnSignature::new(vec![Type::int32(), Type::int32()], Type::int32()),
        );
        assert_eq!(
            m.call_parameter_types(),
            vec![Type::int32(), Type::int32()]
        );
    }

    #[test]
    fn delegate_invoke_mirrors_signature() {
        let invoke = MethodRef::delegate_invoke(handler_delegate()).unwrap();
        assert_eq!(invoke.name(), "Invoke");
        assert_eq!(invoke.signature().params, vec![Type::int32()]);
        assert_eq!(invoke.signature().ret, Type::int32());
        assert!(!invoke.is_static());
    }

    #[test]
    fn delegate_invoke_rejects_non_delegates() {
        assert!(MethodRef::delegate_invoke(Type::int32()).is_none());
    }

    #[test]
    fn structural_equality() {
        let a = MethodRef::ctor(handler_delegate(), vec![Type::root()]);
        let b = MethodRef::ctor(handler_delegate(), vec![Type::root()]);
        assert_eq!(a, b);
    }
}
