//! References from one entity to another.
//!
//! A handle names a type, method or field independently of metadata tokens. Local
//! definitions are addressed by arena id, external ones through the reference
//! arenas, and constructed types (generic instances, arrays, pointers) carry their
//! full signature.

use crate::{
    metadata::signatures::TypeSig,
    model::{AssemblyRefId, FieldId, MemberRefId, MethodId, ModuleRefId, TypeId, TypeRefId},
};

/// A type as used by `extends`, interface lists, signatures and operands.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeHandle {
    /// A type defined in this module
    Def(TypeId),
    /// A type defined elsewhere
    Ref(TypeRefId),
    /// A constructed type, stored as a `TypeSpec` row on disk
    Spec(Box<TypeSig>),
}

impl TypeHandle {
    /// The local definition this handle names, looking through generic instantiations.
    ///
    /// `List<int>` where `List` is local yields `List`'s id; arrays and pointers yield
    /// `None`.
    #[must_use]
    pub fn definition(&self) -> Option<TypeId> {
        match self {
            TypeHandle::Def(id) => Some(*id),
            TypeHandle::Ref(_) => None,
            TypeHandle::Spec(sig) => match sig.as_ref() {
                TypeSig::GenericInst { base, .. } => base.definition(),
                _ => None,
            },
        }
    }

    /// The type reference this handle names, looking through generic instantiations.
    #[must_use]
    pub fn reference(&self) -> Option<TypeRefId> {
        match self {
            TypeHandle::Def(_) => None,
            TypeHandle::Ref(id) => Some(*id),
            TypeHandle::Spec(sig) => match sig.as_ref() {
                TypeSig::GenericInst { base, .. } => base.reference(),
                _ => None,
            },
        }
    }
}

/// A method as used by call instructions, custom attribute constructors and overrides.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MethodHandle {
    /// A method defined in this module
    Def(MethodId),
    /// A method defined elsewhere, or a method of a generic type instance
    Ref(MemberRefId),
    /// A generic method instantiation, stored as a `MethodSpec` row on disk
    Spec {
        /// The generic method definition or reference
        method: Box<MethodHandle>,
        /// Type arguments
        args: Vec<TypeSig>,
    },
}

/// A field as used by field instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldHandle {
    /// A field defined in this module
    Def(FieldId),
    /// A field defined elsewhere, or a field of a generic type instance
    Ref(MemberRefId),
}

/// A method or field defined in this module, as named by a member reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberDef {
    /// A method definition
    Method(MethodId),
    /// A field definition
    Field(FieldId),
}

/// Where a type reference is resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResolutionScope {
    /// This module
    Module,
    /// Another module of this assembly
    ModuleRef(ModuleRefId),
    /// Another assembly
    AssemblyRef(AssemblyRefId),
    /// A type nested inside another referenced type
    Nested(TypeRefId),
    /// Resolved through the `ExportedType` table
    None,
}

/// Owner of a member reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberRefParent {
    /// A type, possibly a generic instance
    Type(TypeHandle),
    /// A global function or field of another module
    ModuleRef(ModuleRefId),
    /// A local vararg method, for call sites with extra arguments
    Method(MethodId),
}
