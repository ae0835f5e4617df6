use crate::model::TypeHandle;

#[allow(non_snake_case, dead_code, missing_docs)]
/// Element type bytes of ECMA-335 II.23.1.16
pub mod ELEMENT_TYPE {
    // Marks end of a list
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    // Followed by type
    pub const PTR: u8 = 0x0f;
    // Followed by type
    pub const BYREF: u8 = 0x10;
    // Followed by TypeDef or TypeRef token
    pub const VALUETYPE: u8 = 0x11;
    // Followed by TypeDef or TypeRef token
    pub const CLASS: u8 = 0x12;
    // Generic parameter in a generic type definition, represented as number
    pub const VAR: u8 = 0x13;
    // type rank boundsCount bound1 … loCount lo1 …
    pub const ARRAY: u8 = 0x14;
    // Generic type instantiation. Followed by type type-arg-count type-1 ... type-n
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    // System.IntPtr
    pub const I: u8 = 0x18;
    // System.UIntPtr
    pub const U: u8 = 0x19;
    // Followed by full method signature
    pub const FNPTR: u8 = 0x1b;
    // System.Object
    pub const OBJECT: u8 = 0x1c;
    // Single-dim array with 0 lower bound
    pub const SZARRAY: u8 = 0x1d;
    // Generic parameter in a generic method definition, represented as number
    pub const MVAR: u8 = 0x1e;
    // Required modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_REQD: u8 = 0x1f;
    // Optional modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_OPT: u8 = 0x20;
    // Implemented within the CLI
    pub const INTERNAL: u8 = 0x21;
    // Sentinel for vararg method signature
    pub const SENTINEL: u8 = 0x41;
    // Denotes a local variable that points at a pinned object
    pub const PINNED: u8 = 0x45;
    // Custom attribute blobs: System.Type argument
    pub const CA_TYPE: u8 = 0x50;
    // Custom attribute blobs: boxed object argument
    pub const CA_BOXED: u8 = 0x51;
    // Custom attribute blobs: named field argument
    pub const CA_FIELD: u8 = 0x53;
    // Custom attribute blobs: named property argument
    pub const CA_PROPERTY: u8 = 0x54;
    // Custom attribute blobs: enum argument
    pub const CA_ENUM: u8 = 0x55;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Calling convention byte of method signatures, ECMA-335 II.23.2.3
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const C: u8 = 0x01;
    pub const STDCALL: u8 = 0x02;
    pub const THISCALL: u8 = 0x03;
    pub const FASTCALL: u8 = 0x04;
    pub const VARARG: u8 = 0x05;
    // Low nibble holds one of the kinds above
    pub const KIND_MASK: u8 = 0x0F;
    pub const GENERIC: u8 = 0x10;
    pub const HASTHIS: u8 = 0x20;
    pub const EXPLICITTHIS: u8 = 0x40;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// First byte of the non-method signature kinds
pub mod SIGNATURE_HEADER {
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const PROPERTY: u8 = 0x08;
    pub const METHOD_SPEC: u8 = 0x0A;
}

/// A type as it appears inside a signature blob.
///
/// Custom modifiers, `ByRef` and `Pinned` are prefixes in the blob and are kept as
/// wrappers around the type they prefix, so every signature position decodes and
/// encodes the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TypeSig {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    /// Native signed integer
    I,
    /// Native unsigned integer
    U,
    String,
    Object,
    TypedByRef,
    /// A reference type
    Class(TypeHandle),
    /// A value type
    ValueType(TypeHandle),
    /// Single dimension, zero based array
    SzArray(Box<TypeSig>),
    /// General array
    Array(Box<TypeSig>, ArrayShape),
    /// Unmanaged pointer
    Ptr(Box<TypeSig>),
    /// Managed reference
    ByRef(Box<TypeSig>),
    /// Pinned local variable
    Pinned(Box<TypeSig>),
    /// A generic type instantiation
    GenericInst {
        /// Whether the instantiated type is a value type; written as `VALUETYPE` or `CLASS`
        is_value_type: bool,
        /// The generic type definition
        base: TypeHandle,
        /// Type arguments, one per generic parameter of `base`
        args: Vec<TypeSig>,
    },
    /// Generic parameter of the enclosing type, by position
    Var(u32),
    /// Generic parameter of the enclosing method, by position
    MVar(u32),
    /// A type carrying a `modreq` or `modopt`
    Modified {
        /// `modreq` when set, `modopt` otherwise
        required: bool,
        /// The modifier type
        modifier: TypeHandle,
        /// The modified type
        inner: Box<TypeSig>,
    },
    /// Function pointer
    FnPtr(Box<MethodSig>),
}

impl TypeSig {
    /// Build `base<args>`.
    ///
    /// The value-type flag is taken from `is_value_type` when known; for an unknown
    /// external type pass `None` and the instance is treated as a reference type.
    #[must_use]
    pub fn generic_instance(
        base: TypeHandle,
        args: Vec<TypeSig>,
        is_value_type: Option<bool>,
    ) -> TypeSig {
        TypeSig::GenericInst {
            is_value_type: is_value_type.unwrap_or(false),
            base,
            args,
        }
    }

    /// The element type byte of primitive types, `None` for everything else.
    #[must_use]
    pub fn primitive_element_type(&self) -> Option<u8> {
        Some(match self {
            TypeSig::Void => ELEMENT_TYPE::VOID,
            TypeSig::Boolean => ELEMENT_TYPE::BOOLEAN,
            TypeSig::Char => ELEMENT_TYPE::CHAR,
            TypeSig::I1 => ELEMENT_TYPE::I1,
            TypeSig::U1 => ELEMENT_TYPE::U1,
            TypeSig::I2 => ELEMENT_TYPE::I2,
            TypeSig::U2 => ELEMENT_TYPE::U2,
            TypeSig::I4 => ELEMENT_TYPE::I4,
            TypeSig::U4 => ELEMENT_TYPE::U4,
            TypeSig::I8 => ELEMENT_TYPE::I8,
            TypeSig::U8 => ELEMENT_TYPE::U8,
            TypeSig::R4 => ELEMENT_TYPE::R4,
            TypeSig::R8 => ELEMENT_TYPE::R8,
            TypeSig::I => ELEMENT_TYPE::I,
            TypeSig::U => ELEMENT_TYPE::U,
            TypeSig::String => ELEMENT_TYPE::STRING,
            TypeSig::Object => ELEMENT_TYPE::OBJECT,
            TypeSig::TypedByRef => ELEMENT_TYPE::TYPEDBYREF,
            _ => return None,
        })
    }

    /// The primitive type for an element type byte.
    #[must_use]
    pub fn from_primitive(element_type: u8) -> Option<TypeSig> {
        Some(match element_type {
            ELEMENT_TYPE::VOID => TypeSig::Void,
            ELEMENT_TYPE::BOOLEAN => TypeSig::Boolean,
            ELEMENT_TYPE::CHAR => TypeSig::Char,
            ELEMENT_TYPE::I1 => TypeSig::I1,
            ELEMENT_TYPE::U1 => TypeSig::U1,
            ELEMENT_TYPE::I2 => TypeSig::I2,
            ELEMENT_TYPE::U2 => TypeSig::U2,
            ELEMENT_TYPE::I4 => TypeSig::I4,
            ELEMENT_TYPE::U4 => TypeSig::U4,
            ELEMENT_TYPE::I8 => TypeSig::I8,
            ELEMENT_TYPE::U8 => TypeSig::U8,
            ELEMENT_TYPE::R4 => TypeSig::R4,
            ELEMENT_TYPE::R8 => TypeSig::R8,
            ELEMENT_TYPE::I => TypeSig::I,
            ELEMENT_TYPE::U => TypeSig::U,
            ELEMENT_TYPE::STRING => TypeSig::String,
            ELEMENT_TYPE::OBJECT => TypeSig::Object,
            ELEMENT_TYPE::TYPEDBYREF => TypeSig::TypedByRef,
            _ => return None,
        })
    }

    /// The type with custom modifiers and `Pinned` removed.
    #[must_use]
    pub fn strip_modifiers(&self) -> &TypeSig {
        match self {
            TypeSig::Modified { inner, .. } | TypeSig::Pinned(inner) => inner.strip_modifiers(),
            other => other,
        }
    }

    /// Call `visit` for every type handle inside this signature, depth first.
    pub fn for_each_handle<'a>(&'a self, visit: &mut dyn FnMut(&'a TypeHandle)) {
        match self {
            TypeSig::Class(handle) | TypeSig::ValueType(handle) => visit(handle),
            TypeSig::SzArray(inner)
            | TypeSig::Array(inner, _)
            | TypeSig::Ptr(inner)
            | TypeSig::ByRef(inner)
            | TypeSig::Pinned(inner) => inner.for_each_handle(visit),
            TypeSig::GenericInst { base, args, .. } => {
                visit(base);
                for arg in args {
                    arg.for_each_handle(visit);
                }
            }
            TypeSig::Modified {
                modifier, inner, ..
            } => {
                visit(modifier);
                inner.for_each_handle(visit);
            }
            TypeSig::FnPtr(method) => {
                method.ret.for_each_handle(visit);
                for param in &method.params {
                    param.for_each_handle(visit);
                }
            }
            _ => {}
        }
    }
}

/// Shape of a general array: rank, known sizes and known lower bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ArrayShape {
    /// Number of dimensions
    pub rank: u32,
    /// Sizes of the first `sizes.len()` dimensions
    pub sizes: Vec<u32>,
    /// Lower bounds of the first `lower_bounds.len()` dimensions
    pub lower_bounds: Vec<i32>,
}

/// A method signature (`MethodDefSig`, `MethodRefSig`, `StandAloneMethodSig`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Raw calling convention byte, see [`CALLING_CONVENTION`]
    pub calling_convention: u8,
    /// Number of generic parameters, present when [`CALLING_CONVENTION::GENERIC`] is set
    pub generic_param_count: u32,
    /// Return type
    pub ret: TypeSig,
    /// Parameter types, including vararg extras after the sentinel
    pub params: Vec<TypeSig>,
    /// Index into `params` at which the vararg sentinel sits
    pub sentinel: Option<usize>,
}

impl MethodSig {
    /// A static method with the default calling convention.
    #[must_use]
    pub fn new_static(ret: TypeSig, params: Vec<TypeSig>) -> MethodSig {
        MethodSig {
            calling_convention: CALLING_CONVENTION::DEFAULT,
            generic_param_count: 0,
            ret,
            params,
            sentinel: None,
        }
    }

    /// An instance method with the default calling convention.
    #[must_use]
    pub fn new_instance(ret: TypeSig, params: Vec<TypeSig>) -> MethodSig {
        MethodSig {
            calling_convention: CALLING_CONVENTION::HASTHIS,
            ..MethodSig::new_static(ret, params)
        }
    }

    /// Whether a `this` argument is passed.
    #[must_use]
    pub fn has_this(&self) -> bool {
        self.calling_convention & CALLING_CONVENTION::HASTHIS != 0
    }

    /// Whether `this` is listed explicitly among the parameters.
    #[must_use]
    pub fn explicit_this(&self) -> bool {
        self.calling_convention & CALLING_CONVENTION::EXPLICITTHIS != 0
    }

    /// Whether the method has generic parameters.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.calling_convention & CALLING_CONVENTION::GENERIC != 0
    }

    /// Whether the method uses the managed vararg calling convention.
    #[must_use]
    pub fn is_vararg(&self) -> bool {
        self.calling_convention & CALLING_CONVENTION::KIND_MASK == CALLING_CONVENTION::VARARG
    }

    /// The parameters declared by the method itself, without vararg extras.
    #[must_use]
    pub fn fixed_params(&self) -> &[TypeSig] {
        match self.sentinel {
            Some(index) => &self.params[..index.min(self.params.len())],
            None => &self.params,
        }
    }
}

/// A field signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSig {
    /// Field type, including custom modifiers
    pub ty: TypeSig,
}

/// A property signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertySig {
    /// Instance property
    pub has_this: bool,
    /// Property type
    pub ty: TypeSig,
    /// Indexer parameters
    pub params: Vec<TypeSig>,
}

/// A local variable signature, stored in a `StandAloneSig` row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LocalVarSig {
    /// Local types in slot order; pinned and by-ref locals are wrapped
    pub locals: Vec<TypeSig>,
}

/// Type arguments of a generic method instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MethodSpecSig {
    /// One type per generic parameter of the method
    pub args: Vec<TypeSig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TypeId, TypeRefId};

    #[test]
    fn calling_convention_flags() {
        let mut sig = MethodSig::new_instance(TypeSig::Void, vec![TypeSig::I4]);
        assert!(sig.has_this());
        assert!(!sig.is_generic());
        assert!(!sig.is_vararg());

        sig.calling_convention = CALLING_CONVENTION::VARARG;
        sig.params.push(TypeSig::String);
        sig.sentinel = Some(1);
        assert!(sig.is_vararg());
        assert_eq!(sig.fixed_params(), &[TypeSig::I4]);
    }

    #[test]
    fn primitives_map_both_ways() {
        for byte in 0x01..=0x1C_u8 {
            if let Some(sig) = TypeSig::from_primitive(byte) {
                assert_eq!(sig.primitive_element_type(), Some(byte));
            }
        }
        assert_eq!(TypeSig::from_primitive(ELEMENT_TYPE::CLASS), None);
    }

    #[test]
    fn handles_are_visited() {
        let sig = TypeSig::GenericInst {
            is_value_type: false,
            base: TypeHandle::Ref(TypeRefId::new(0)),
            args: vec![
                TypeSig::ValueType(TypeHandle::Def(TypeId::new(3))),
                TypeSig::SzArray(Box::new(TypeSig::Class(TypeHandle::Ref(TypeRefId::new(1))))),
            ],
        };

        let mut seen = Vec::new();
        sig.for_each_handle(&mut |handle| seen.push(handle.clone()));
        assert_eq!(
            seen,
            vec![
                TypeHandle::Ref(TypeRefId::new(0)),
                TypeHandle::Def(TypeId::new(3)),
                TypeHandle::Ref(TypeRefId::new(1)),
            ]
        );
    }

    #[test]
    fn generic_instance_defaults_to_class() {
        let sig = TypeSig::generic_instance(TypeHandle::Ref(TypeRefId::new(0)), vec![], None);
        assert!(matches!(
            sig,
            TypeSig::GenericInst {
                is_value_type: false,
                ..
            }
        ));
    }
}
