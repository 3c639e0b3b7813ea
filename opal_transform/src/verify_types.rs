//! Member-level type verification.
//!
//! Runs after the mid-end, over the driver's view of declared types. The
//! verifier walks a type (fields, methods, properties, then base types)
//! and reports structural violations as diagnostics: enums backed by
//! non-primitive types, inheritance from closed types, and unimplemented
//! abstract members.

use rustc_hash::FxHashMap;

use opal_ir::{
    CompilationAborted, Diagnostic, DiagnosticSink, MethodRef, Type, TypeKind,
};

// =============================================================================
// Declared-type model
// =============================================================================

/// A declared field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: Type,
}

/// A declared method.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub method: MethodRef,
    pub is_abstract: bool,
}

/// A declared property (modeled by its accessor type).
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub ty: Type,
}

/// The driver's declaration-level view of one type.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub ty: Type,
    /// Enum declarations carry their backing type.
    pub enum_backing: Option<Type>,
    /// Open for inheritance.
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_interface: bool,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
    pub properties: Vec<PropertyDef>,
    pub bases: Vec<Type>,
}

impl TypeDefinition {
    /// A closed concrete class with no members.
    pub fn class(ty: Type) -> Self {
        Self {
            ty,
            enum_backing: None,
            is_virtual: false,
            is_abstract: false,
            is_interface: false,
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            bases: Vec::new(),
        }
    }
}

/// Every declared type the verifier can resolve bases against.
#[derive(Default)]
pub struct TypeUniverse {
    definitions: FxHashMap<Type, TypeDefinition>,
}

impl TypeUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, definition: TypeDefinition) {
        self.definitions.insert(definition.ty, definition);
    }

    pub fn get(&self, ty: Type) -> Option<&TypeDefinition> {
        self.definitions.get(&ty)
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Whether a type can back an enum: primitive integers, floats, bools and
/// chars qualify.
fn is_value_backing(ty: Type) -> bool {
    matches!(
        ty.kind(),
        TypeKind::SignedInt(_)
            | TypeKind::UnsignedInt(_)
            | TypeKind::Float(_)
            | TypeKind::Bool
            | TypeKind::Char
    )
}

/// Verify one declared type against the universe, reporting findings into
/// the sink. Walks the type's own members first, then its bases.
pub fn verify_type(
    definition: &TypeDefinition,
    universe: &TypeUniverse,
    sink: &mut DiagnosticSink,
) -> Result<(), CompilationAborted> {
    // Enum backing must be a primitive value type.
    if let Some(backing) = definition.enum_backing {
        if !is_value_backing(backing) {
            sink.report(Diagnostic::error(
                "invalid enum backing",
                format!(
                    "enum '{}' is backed by '{}', which is not a primitive value type",
                    definition.ty, backing
                ),
            ))?;
        }
    }

    for base in &definition.bases {
        let Some(base_def) = universe.get(*base) else {
            sink.report(Diagnostic::error(
                "unknown base type",
                format!("type '{}' inherits the undeclared '{}'", definition.ty, base),
            ))?;
            continue;
        };

        // A base must be open: virtual, abstract, or an interface.
        if !(base_def.is_virtual || base_def.is_abstract || base_def.is_interface) {
            sink.report(Diagnostic::error(
                "inheritance from closed type",
                format!(
                    "type '{}' inherits '{}', which is neither virtual, abstract, nor an interface",
                    definition.ty, base
                ),
            ))?;
        }

        // Concrete types must implement every abstract base member.
        if definition.is_abstract || definition.is_interface {
            continue;
        }
        for base_method in base_def.methods.iter().filter(|m| m.is_abstract) {
            let implemented = definition.methods.iter().any(|m| {
                !m.is_abstract
                    && m.method.name() == base_method.method.name()
                    && m.method.signature() == base_method.method.signature()
            });
            if !implemented {
                sink.report(Diagnostic::error(
                    "unimplemented abstract member",
                    format!(
                        "type '{}' does not implement abstract member '{}'",
                        definition.ty, base_method.method
                    ),
                ))?;
            }
        }
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use opal_ir::{DriverConfig, FnSignature, QualifiedName};

    fn named(name: &str) -> Type {
        Type::named(QualifiedName::parse(name))
    }

    fn sink() -> DiagnosticSink {
        DiagnosticSink::new(DriverConfig::default())
    }

    #[test]
    fn enum_backed_by_primitive_is_fine() {
        let mut def = TypeDefinition::class(named("App.Color"));
        def.enum_backing = Some(Type::int32());
        let mut sink = sink();
        verify_type(&def, &TypeUniverse::new(), &mut sink).unwrap();
        assert!(!sink.has_errors());
    }

    #[test]
    fn enum_backed_by_class_is_reported() {
        let mut def = TypeDefinition::class(named("App.Color"));
        def.enum_backing = Some(named("App.Widget"));
        let mut sink = sink();
        verify_type(&def, &TypeUniverse::new(), &mut sink).unwrap();
        assert!(sink.has_errors());
        assert!(sink.diagnostics()[0].message.contains("not a primitive value type"));
    }

    #[test]
    fn inheriting_a_closed_type_is_reported() {
        let base = TypeDefinition::class(named("App.Sealed"));
        let mut universe = TypeUniverse::new();
        universe.add(base);

        let mut derived = TypeDefinition::class(named("App.Derived"));
        derived.bases = vec![named("App.Sealed")];

        let mut sink = sink();
        verify_type(&derived, &universe, &mut sink).unwrap();
        assert!(sink.has_errors());
        assert!(sink.diagnostics()[0]
            .message
            .contains("neither virtual, abstract, nor an interface"));
    }

    #[test]
    fn missing_abstract_member_is_reported() {
        let shape = named("App.Shape");
        let mut base = TypeDefinition::class(shape);
        base.is_abstract = true;
        base.methods = vec![MethodDef {
            method: MethodRef::instance(
                shape,
                "Area",
                FnSignature::new(vec![], Type::float(opal_ir::FloatWidth::W64)),
            ),
            is_abstract: true,
        }];
        let mut universe = TypeUniverse::new();
        universe.add(base);

        let mut derived = TypeDefinition::class(named("App.Circle"));
        derived.bases = vec![shape];

        let mut sink = sink();
        verify_type(&derived, &universe, &mut sink).unwrap();
        assert!(sink.has_errors());
        assert!(sink.diagnostics()[0]
            .message
            .contains("does not implement abstract member"));
    }

    #[test]
    fn implemented_abstract_member_passes() {
        let shape = named("App.Shape");
        let area_sig = FnSignature::new(vec![], Type::float(opal_ir::FloatWidth::W64));
        let mut base = TypeDefinition::class(shape);
        base.is_abstract = true;
        base.methods = vec![MethodDef {
            method: MethodRef::instance(shape, "Area", area_sig.clone()),
            is_abstract: true,
        }];
        let mut universe = TypeUniverse::new();
        universe.add(base);

        let circle = named("App.Circle");
        let mut derived = TypeDefinition::class(circle);
        derived.bases = vec![shape];
        derived.methods = vec![MethodDef {
            method: MethodRef::instance(circle, "Area", area_sig),
            is_abstract: false,
        }];

        let mut sink = sink();
        verify_type(&derived, &universe, &mut sink).unwrap();
        assert!(!sink.has_errors());
    }

    #[test]
    fn abstract_derived_types_defer_implementation() {
        let shape = named("App.Shape");
        let mut base = TypeDefinition::class(shape);
        base.is_abstract = true;
        base.methods = vec![MethodDef {
            method: MethodRef::instance(shape, "Area", FnSignature::new(vec![], Type::int32())),
            is_abstract: true,
        }];
        let mut universe = TypeUniverse::new();
        universe.add(base);

        let mut derived = TypeDefinition::class(named("App.AbstractCircle"));
        derived.is_abstract = true;
        derived.bases = vec![shape];

        let mut sink = sink();
        verify_type(&derived, &universe, &mut sink).unwrap();
        assert!(!sink.has_errors());
    }
}
