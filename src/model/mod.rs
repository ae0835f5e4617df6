//! The mutable object graph of one module.
//!
//! A [`ModuleGraph`] owns every entity of a module in typed arenas: type, method,
//! field, property and event definitions, and the type, member, assembly and module
//! references they use. Entities point at each other through ids and
//! [handles](TypeHandle), never through shared ownership, so a method body can name a
//! field of its own type, and a nested type can point back at its encloser, without
//! reference cycles.
//!
//! Ownership is expressed by the owner's id lists. The writer starts at the
//! top-level types and follows `nested_types`, `fields`, `methods`, `properties` and
//! `events`; an entity removed from its owner's list is simply no longer written.
//! Ids are never reused.
//!
//! Graphs come from [`crate::loader`] or are assembled with the builder methods
//! ([`ModuleGraph::add_type`], [`ModuleGraph::add_method`], ...). Both paths produce
//! the same structure.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::model::{flags::TypeAttributes, ModuleGraph};
//! use cilweave::metadata::{method::MethodAttributes, signatures::{MethodSig, TypeSig}};
//!
//! let mut graph = ModuleGraph::new("Demo.dll");
//! let object = graph.object_type();
//! let program = graph.add_type("Demo", "Program", TypeAttributes::PUBLIC, Some(object));
//! let main = graph.add_method(
//!     program,
//!     "Main",
//!     MethodAttributes::PUBLIC | MethodAttributes::STATIC,
//!     MethodSig::new_static(TypeSig::Void, vec![]),
//! );
//!
//! assert_eq!(graph.full_name(program), "Demo.Program");
//! assert_eq!(graph[main].declaring_type, Some(program));
//! assert_eq!(graph.all_types().count(), 2); // <Module> and Program
//! ```

mod builders;
mod entities;
pub mod flags;
mod handles;
mod ids;
mod query;

use std::ops::{Index, IndexMut};

pub use builders::GenericParamOwner;
pub(crate) use builders::CORE_LIBRARIES;
pub use entities::*;
pub use handles::{
    FieldHandle, MemberDef, MemberRefParent, MethodHandle, ResolutionScope, TypeHandle,
};
pub use ids::{
    AssemblyRefId, EventId, FieldId, MemberRefId, MethodId, ModuleRefId, PropertyId, TypeId,
    TypeRefId,
};

/// Name of the pseudo type that holds global fields and methods
pub const MODULE_TYPE_NAME: &str = "<Module>";

/// The entities of one module and everything they reference.
#[derive(Clone, Debug)]
pub struct ModuleGraph {
    /// The module row
    pub module: ModuleDef,
    /// The assembly manifest; `None` for a netmodule
    pub assembly: Option<AssemblyDef>,
    /// PE properties carried over to the written image
    pub image: ImageInfo,
    /// Manifest resources
    pub resources: Vec<ManifestResource>,
    /// Files of a multi-file assembly
    pub files: Vec<FileDef>,
    /// Exported and forwarded types
    pub exported_types: Vec<ExportedType>,
    /// The managed entry point
    pub entry_point: Option<MethodId>,
    types: Vec<TypeDef>,
    methods: Vec<MethodDef>,
    fields: Vec<FieldDef>,
    properties: Vec<PropertyDef>,
    events: Vec<EventDef>,
    type_refs: Vec<TypeRef>,
    member_refs: Vec<MemberRef>,
    assembly_refs: Vec<AssemblyRef>,
    module_refs: Vec<ModuleRef>,
    top_level: Vec<TypeId>,
}

impl ModuleGraph {
    /// An empty graph with only the `<Module>` type and no assembly manifest.
    #[must_use]
    pub fn new(module_name: &str) -> ModuleGraph {
        let module = ModuleDef {
            name: module_name.to_string(),
            mvid: uguid::Guid::ZERO,
            generation: 0,
            custom_attributes: Vec::new(),
        };
        let mut graph = ModuleGraph::bare(module, ImageInfo::default());
        graph.add_type("", MODULE_TYPE_NAME, 0, None);
        graph
    }

    /// A graph without any type; the loader adds `<Module>` itself, as row 1.
    pub(crate) fn bare(module: ModuleDef, image: ImageInfo) -> ModuleGraph {
        ModuleGraph {
            module,
            assembly: None,
            image,
            resources: Vec::new(),
            files: Vec::new(),
            exported_types: Vec::new(),
            entry_point: None,
            types: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            type_refs: Vec::new(),
            member_refs: Vec::new(),
            assembly_refs: Vec::new(),
            module_refs: Vec::new(),
            top_level: Vec::new(),
        }
    }

    /// The `<Module>` type, which is always the first top-level type.
    #[must_use]
    pub fn module_type(&self) -> TypeId {
        self.top_level.first().copied().unwrap_or(TypeId::new(0))
    }

    /// Top-level types in declaration order, `<Module>` first.
    #[must_use]
    pub fn top_level_types(&self) -> &[TypeId] {
        &self.top_level
    }

    /// Number of allocated type definitions, including detached ones.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Every type reference in the arena.
    pub fn type_refs(&self) -> impl Iterator<Item = (TypeRefId, &TypeRef)> {
        self.type_refs
            .iter()
            .enumerate()
            .map(|(index, type_ref)| (TypeRefId::new(index), type_ref))
    }

    /// Every member reference in the arena.
    pub fn member_refs(&self) -> impl Iterator<Item = (MemberRefId, &MemberRef)> {
        self.member_refs
            .iter()
            .enumerate()
            .map(|(index, member_ref)| (MemberRefId::new(index), member_ref))
    }

    /// Every assembly reference in the arena.
    pub fn assembly_refs(&self) -> impl Iterator<Item = (AssemblyRefId, &AssemblyRef)> {
        self.assembly_refs
            .iter()
            .enumerate()
            .map(|(index, assembly_ref)| (AssemblyRefId::new(index), assembly_ref))
    }

    /// Every module reference in the arena.
    pub fn module_refs(&self) -> impl Iterator<Item = (ModuleRefId, &ModuleRef)> {
        self.module_refs
            .iter()
            .enumerate()
            .map(|(index, module_ref)| (ModuleRefId::new(index), module_ref))
    }

    /// Look an id up without panicking.
    #[must_use]
    pub fn get_type(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.get(id.index())
    }

    /// Look an id up without panicking.
    #[must_use]
    pub fn get_method(&self, id: MethodId) -> Option<&MethodDef> {
        self.methods.get(id.index())
    }

    /// Look an id up without panicking.
    #[must_use]
    pub fn get_field(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(id.index())
    }

    /// Look an id up without panicking.
    #[must_use]
    pub fn get_type_ref(&self, id: TypeRefId) -> Option<&TypeRef> {
        self.type_refs.get(id.index())
    }

    /// Look an id up without panicking.
    #[must_use]
    pub fn get_member_ref(&self, id: MemberRefId) -> Option<&MemberRef> {
        self.member_refs.get(id.index())
    }

    /// Look an id up without panicking.
    #[must_use]
    pub fn get_assembly_ref(&self, id: AssemblyRefId) -> Option<&AssemblyRef> {
        self.assembly_refs.get(id.index())
    }

    /// Look an id up without panicking.
    #[must_use]
    pub fn get_module_ref(&self, id: ModuleRefId) -> Option<&ModuleRef> {
        self.module_refs.get(id.index())
    }
}

macro_rules! arena_index {
    ($($id:ty => $field:ident : $entity:ty),* $(,)?) => {
        $(
            impl Index<$id> for ModuleGraph {
                type Output = $entity;

                fn index(&self, id: $id) -> &$entity {
                    &self.$field[id.index()]
                }
            }

            impl IndexMut<$id> for ModuleGraph {
                fn index_mut(&mut self, id: $id) -> &mut $entity {
                    &mut self.$field[id.index()]
                }
            }
        )*
    };
}

arena_index! {
    TypeId => types: TypeDef,
    MethodId => methods: MethodDef,
    FieldId => fields: FieldDef,
    PropertyId => properties: PropertyDef,
    EventId => events: EventDef,
    TypeRefId => type_refs: TypeRef,
    MemberRefId => member_refs: MemberRef,
    AssemblyRefId => assembly_refs: AssemblyRef,
    ModuleRefId => module_refs: ModuleRef,
}
