//! Construction and detachment of graph entities.
//!
//! The public builders keep owner lists and back references in sync. The loader
//! uses the crate-private `push_*` functions, which only allocate, because it links
//! owners in a later pass.

use crate::{
    metadata::{
        method::{MethodAttributes, MethodImplAttributes},
        signatures::{FieldSig, MethodSig, PropertySig},
        token::Token,
    },
    model::{
        AssemblyRef, AssemblyRefId, AssemblyVersion, EventDef, EventId, FieldDef, FieldId,
        GenericParam, MemberRef, MemberRefId, MemberRefParent, MemberRefSig, MethodDef, MethodId,
        ModuleGraph, ModuleRef, ModuleRefId, PropertyDef, PropertyId, ResolutionScope, TypeDef,
        TypeHandle, TypeId, TypeRef, TypeRefId,
    },
    Result,
};

/// Names of assemblies that define `System.Object`, in preference order
pub(crate) const CORE_LIBRARIES: &[&str] = &[
    "mscorlib",
    "System.Runtime",
    "netstandard",
    "System.Private.CoreLib",
];

/// Public key token of the ECMA standard libraries
const ECMA_PUBLIC_KEY_TOKEN: [u8; 8] = [0xB7, 0x7A, 0x5C, 0x56, 0x19, 0x34, 0xE0, 0x89];

/// The owner of a generic parameter list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenericParamOwner {
    /// A generic type; `!n` in signatures
    Type(TypeId),
    /// A generic method; `!!n` in signatures
    Method(MethodId),
}

impl GenericParamOwner {
    /// The declared parameters, in position order.
    #[must_use]
    pub fn generic_params<'g>(&self, graph: &'g ModuleGraph) -> &'g [GenericParam] {
        match self {
            GenericParamOwner::Type(id) => &graph[*id].generic_params,
            GenericParamOwner::Method(id) => &graph[*id].generic_params,
        }
    }

    /// The position of the parameter called `name`.
    ///
    /// Positions come from the owner's declared list, not from the parameter name:
    /// `T` in `Dictionary<TKey, T>` is position 1 whatever it is called.
    ///
    /// # Errors
    /// Returns [`crate::Error::GraphError`] if the owner declares no such parameter.
    pub fn resolve_position(&self, graph: &ModuleGraph, name: &str) -> Result<u32> {
        self.generic_params(graph)
            .iter()
            .find(|param| param.name == name)
            .map(|param| u32::from(param.number))
            .ok_or_else(|| {
                crate::Error::GraphError(format!(
                    "generic parameter '{}' has no owner: {} declares [{}]",
                    name,
                    self.describe(graph),
                    self.generic_params(graph)
                        .iter()
                        .map(|param| param.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }

    /// Append a parameter named `name` and return its position.
    pub fn add_generic_param(&self, graph: &mut ModuleGraph, name: &str) -> u16 {
        let params = match self {
            GenericParamOwner::Type(id) => &mut graph[*id].generic_params,
            GenericParamOwner::Method(id) => &mut graph[*id].generic_params,
        };
        #[allow(clippy::cast_possible_truncation)]
        let number = params.len() as u16;
        params.push(GenericParam {
            number,
            flags: 0,
            name: name.to_string(),
            constraints: Vec::new(),
            custom_attributes: Vec::new(),
        });
        number
    }

    fn describe(&self, graph: &ModuleGraph) -> String {
        match self {
            GenericParamOwner::Type(id) => graph.full_name(*id),
            GenericParamOwner::Method(id) => graph.method_full_name(*id),
        }
    }
}

impl ModuleGraph {
    /// Add a top-level type.
    pub fn add_type(
        &mut self,
        namespace: &str,
        name: &str,
        flags: u32,
        extends: Option<TypeHandle>,
    ) -> TypeId {
        let id = self.push_type(TypeDef::new(namespace, name, flags, extends));
        self.top_level.push(id);
        id
    }

    /// Add a type nested inside `parent`.
    pub fn add_nested_type(
        &mut self,
        parent: TypeId,
        name: &str,
        flags: u32,
        extends: Option<TypeHandle>,
    ) -> TypeId {
        let mut type_def = TypeDef::new("", name, flags, extends);
        type_def.declaring_type = Some(parent);
        let id = self.push_type(type_def);
        self[parent].nested_types.push(id);
        id
    }

    /// Add a method to `owner`. The method has no body; assign one for CIL methods.
    pub fn add_method(
        &mut self,
        owner: TypeId,
        name: &str,
        flags: MethodAttributes,
        signature: MethodSig,
    ) -> MethodId {
        let id = self.push_method(MethodDef {
            flags,
            impl_flags: MethodImplAttributes::empty(),
            name: name.to_string(),
            signature,
            declaring_type: Some(owner),
            params: Vec::new(),
            generic_params: Vec::new(),
            body: None,
            pinvoke: None,
            security: Vec::new(),
            custom_attributes: Vec::new(),
            token: Token(0),
        });
        self[owner].methods.push(id);
        id
    }

    /// Add a field to `owner`.
    pub fn add_field(&mut self, owner: TypeId, name: &str, flags: u16, signature: FieldSig) -> FieldId {
        let id = self.push_field(FieldDef {
            flags,
            name: name.to_string(),
            signature,
            declaring_type: Some(owner),
            constant: None,
            marshal: None,
            offset: None,
            initial_value: None,
            custom_attributes: Vec::new(),
            token: Token(0),
        });
        self[owner].fields.push(id);
        id
    }

    /// Add a property to `owner`. Accessors are linked by setting `getter`/`setter`.
    pub fn add_property(&mut self, owner: TypeId, name: &str, signature: PropertySig) -> PropertyId {
        let id = self.push_property(PropertyDef {
            flags: 0,
            name: name.to_string(),
            signature,
            declaring_type: Some(owner),
            getter: None,
            setter: None,
            others: Vec::new(),
            constant: None,
            custom_attributes: Vec::new(),
            token: Token(0),
        });
        self[owner].properties.push(id);
        id
    }

    /// Add an event to `owner`.
    pub fn add_event(&mut self, owner: TypeId, name: &str, event_type: TypeHandle) -> EventId {
        let id = self.push_event(EventDef {
            flags: 0,
            name: name.to_string(),
            event_type: Some(event_type),
            declaring_type: Some(owner),
            add_method: None,
            remove_method: None,
            fire_method: None,
            others: Vec::new(),
            custom_attributes: Vec::new(),
            token: Token(0),
        });
        self[owner].events.push(id);
        id
    }

    /// Reference an external type, reusing an existing reference with the same
    /// scope, namespace and name.
    pub fn add_type_ref(&mut self, scope: ResolutionScope, namespace: &str, name: &str) -> TypeRefId {
        let candidate = TypeRef {
            scope,
            namespace: namespace.to_string(),
            name: name.to_string(),
            definition: None,
            custom_attributes: Vec::new(),
        };
        if let Some(index) = self
            .type_refs
            .iter()
            .position(|existing| existing.same_type(&candidate))
        {
            return TypeRefId::new(index);
        }
        let id = self.push_type_ref(candidate);
        self[id].definition = self.resolve_type_ref(id);
        id
    }

    /// Reference a member by owner, name and signature, reusing an identical reference.
    pub fn add_member_ref(
        &mut self,
        parent: MemberRefParent,
        name: &str,
        signature: MemberRefSig,
    ) -> MemberRefId {
        if let Some(index) = self.member_refs.iter().position(|existing| {
            existing.parent == parent && existing.name == name && existing.signature == signature
        }) {
            return MemberRefId::new(index);
        }
        let id = self.push_member_ref(MemberRef {
            parent,
            name: name.to_string(),
            signature,
            definition: None,
            custom_attributes: Vec::new(),
        });
        self[id].definition = self.resolve_member_ref(id);
        id
    }

    /// Bind every type and member reference that names a definition of this module
    /// to that definition.
    ///
    /// Bound references follow renames: the writer emits the definition's current
    /// name. The loader calls this once the whole image is read; graphs built by hand
    /// only need it when references were added before the members they name.
    pub fn link_references(&mut self) {
        for index in 0..self.type_refs.len() {
            let id = TypeRefId::new(index);
            self[id].definition = self.resolve_type_ref(id);
        }
        for index in 0..self.member_refs.len() {
            let id = MemberRefId::new(index);
            self[id].definition = self.resolve_member_ref(id);
        }
    }

    /// Reference an assembly, reusing a reference with the same identity.
    pub fn add_assembly_ref(&mut self, assembly_ref: AssemblyRef) -> AssemblyRefId {
        if let Some(index) = self
            .assembly_refs
            .iter()
            .position(|existing| existing.same_identity(&assembly_ref))
        {
            return AssemblyRefId::new(index);
        }
        self.push_assembly_ref(assembly_ref)
    }

    /// Reference a module by file name, reusing an existing reference.
    pub fn add_module_ref(&mut self, name: &str) -> ModuleRefId {
        if let Some(index) = self.module_refs.iter().position(|existing| existing.name == name) {
            return ModuleRefId::new(index);
        }
        self.push_module_ref(ModuleRef {
            name: name.to_string(),
            custom_attributes: Vec::new(),
        })
    }

    /// The core library reference, added as `mscorlib` 4.0.0.0 when there is none.
    pub fn core_library(&mut self) -> AssemblyRefId {
        for library in CORE_LIBRARIES {
            if let Some(index) = self
                .assembly_refs
                .iter()
                .position(|existing| existing.name == *library)
            {
                return AssemblyRefId::new(index);
            }
        }
        self.add_assembly_ref(AssemblyRef {
            name: CORE_LIBRARIES[0].to_string(),
            version: AssemblyVersion {
                major: 4,
                minor: 0,
                build: 0,
                revision: 0,
            },
            public_key_or_token: ECMA_PUBLIC_KEY_TOKEN.to_vec(),
            ..AssemblyRef::default()
        })
    }

    /// A type of the core library, such as `System.Object`.
    pub fn core_type(&mut self, namespace: &str, name: &str) -> TypeHandle {
        let library = self.core_library();
        TypeHandle::Ref(self.add_type_ref(ResolutionScope::AssemblyRef(library), namespace, name))
    }

    /// `System.Object` of the core library.
    pub fn object_type(&mut self) -> TypeHandle {
        self.core_type("System", "Object")
    }

    /// Remove a type from its owner. It stays in the arena but is no longer written.
    pub fn detach_type(&mut self, id: TypeId) {
        match self[id].declaring_type.take() {
            Some(parent) => self[parent].nested_types.retain(|nested| *nested != id),
            None => {
                if id != self.module_type() {
                    self.top_level.retain(|top| *top != id);
                }
            }
        }
    }

    /// Remove a method from its owner, together with property and event accessor links.
    pub fn detach_method(&mut self, id: MethodId) {
        let Some(owner) = self[id].declaring_type.take() else {
            return;
        };
        self[owner].methods.retain(|method| *method != id);

        let properties = self[owner].properties.clone();
        for property in properties {
            let property = &mut self[property];
            if property.getter == Some(id) {
                property.getter = None;
            }
            if property.setter == Some(id) {
                property.setter = None;
            }
            property.others.retain(|other| *other != id);
        }
        let events = self[owner].events.clone();
        for event in events {
            let event = &mut self[event];
            for slot in [
                &mut event.add_method,
                &mut event.remove_method,
                &mut event.fire_method,
            ] {
                if *slot == Some(id) {
                    *slot = None;
                }
            }
            event.others.retain(|other| *other != id);
        }
        if self.entry_point == Some(id) {
            self.entry_point = None;
        }
    }

    /// Remove a field from its owner.
    pub fn detach_field(&mut self, id: FieldId) {
        if let Some(owner) = self[id].declaring_type.take() {
            self[owner].fields.retain(|field| *field != id);
        }
    }

    pub(crate) fn push_type(&mut self, type_def: TypeDef) -> TypeId {
        self.types.push(type_def);
        TypeId::new(self.types.len() - 1)
    }

    pub(crate) fn push_top_level(&mut self, id: TypeId) {
        self.top_level.push(id);
    }

    pub(crate) fn push_method(&mut self, method: MethodDef) -> MethodId {
        self.methods.push(method);
        MethodId::new(self.methods.len() - 1)
    }

    pub(crate) fn push_field(&mut self, field: FieldDef) -> FieldId {
        self.fields.push(field);
        FieldId::new(self.fields.len() - 1)
    }

    pub(crate) fn push_property(&mut self, property: PropertyDef) -> PropertyId {
        self.properties.push(property);
        PropertyId::new(self.properties.len() - 1)
    }

    pub(crate) fn push_event(&mut self, event: EventDef) -> EventId {
        self.events.push(event);
        EventId::new(self.events.len() - 1)
    }

    pub(crate) fn push_type_ref(&mut self, type_ref: TypeRef) -> TypeRefId {
        self.type_refs.push(type_ref);
        TypeRefId::new(self.type_refs.len() - 1)
    }

    pub(crate) fn push_member_ref(&mut self, member_ref: MemberRef) -> MemberRefId {
        self.member_refs.push(member_ref);
        MemberRefId::new(self.member_refs.len() - 1)
    }

    pub(crate) fn push_assembly_ref(&mut self, assembly_ref: AssemblyRef) -> AssemblyRefId {
        self.assembly_refs.push(assembly_ref);
        AssemblyRefId::new(self.assembly_refs.len() - 1)
    }

    pub(crate) fn push_module_ref(&mut self, module_ref: ModuleRef) -> ModuleRefId {
        self.module_refs.push(module_ref);
        ModuleRefId::new(self.module_refs.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::signatures::TypeSig, model::flags::TypeAttributes};

    #[test]
    fn builders_link_owners() {
        let mut graph = ModuleGraph::new("Test.dll");
        let object = graph.object_type();
        let outer = graph.add_type("Test", "Outer", TypeAttributes::PUBLIC, Some(object));
        let inner = graph.add_nested_type(outer, "Inner", TypeAttributes::NESTED_PRIVATE, None);
        let field = graph.add_field(inner, "value", 0x0001, FieldSig { ty: TypeSig::I4 });
        let method = graph.add_method(
            outer,
            "Run",
            MethodAttributes::PUBLIC,
            MethodSig::new_instance(TypeSig::Void, vec![]),
        );

        assert_eq!(graph.top_level_types(), &[graph.module_type(), outer]);
        assert_eq!(graph[outer].nested_types, vec![inner]);
        assert_eq!(graph[inner].declaring_type, Some(outer));
        assert_eq!(graph[field].declaring_type, Some(inner));
        assert_eq!(graph[outer].methods, vec![method]);
    }

    #[test]
    fn references_are_deduplicated() {
        let mut graph = ModuleGraph::new("Test.dll");
        let first = graph.object_type();
        let second = graph.object_type();
        assert_eq!(first, second);
        assert_eq!(graph.assembly_refs().count(), 1);
        assert_eq!(graph.type_refs().count(), 1);

        let library = graph.core_library();
        let string = graph.add_type_ref(ResolutionScope::AssemblyRef(library), "System", "String");
        assert_ne!(TypeHandle::Ref(string), first);
        assert_eq!(graph.add_module_ref("kernel32.dll"), graph.add_module_ref("kernel32.dll"));
    }

    #[test]
    fn detached_entities_leave_their_owner() {
        let mut graph = ModuleGraph::new("Test.dll");
        let owner = graph.add_type("Test", "Owner", 0, None);
        let getter = graph.add_method(
            owner,
            "get_Value",
            MethodAttributes::PUBLIC,
            MethodSig::new_instance(TypeSig::I4, vec![]),
        );
        let property = graph.add_property(
            owner,
            "Value",
            PropertySig {
                has_this: true,
                ty: TypeSig::I4,
                params: vec![],
            },
        );
        graph[property].getter = Some(getter);

        graph.detach_method(getter);
        assert!(graph[owner].methods.is_empty());
        assert_eq!(graph[property].getter, None);

        graph.detach_type(owner);
        assert_eq!(graph.top_level_types(), &[graph.module_type()]);
        graph.detach_type(graph.module_type());
        assert_eq!(graph.top_level_types().len(), 1);
    }

    #[test]
    fn generic_positions_come_from_the_owner() {
        let mut graph = ModuleGraph::new("Test.dll");
        let pair = graph.add_type("Test", "Pair`2", 0, None);
        let owner = GenericParamOwner::Type(pair);
        assert_eq!(owner.add_generic_param(&mut graph, "TKey"), 0);
        assert_eq!(owner.add_generic_param(&mut graph, "T"), 1);

        assert_eq!(owner.resolve_position(&graph, "T").unwrap(), 1);
        let error = owner.resolve_position(&graph, "TValue").unwrap_err();
        assert!(matches!(error, crate::Error::GraphError(ref message)
            if message.contains("TValue") && message.contains("Test.Pair`2")));
    }
}
