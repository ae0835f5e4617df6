//! Read-only queries over a module graph.
//!
//! Enumeration follows ownership: [`ModuleGraph::all_types`] walks the top-level
//! types and their nested types depth first, so detached entities never show up.

use crate::{
    dependencies,
    metadata::{
        customattributes::CustomAttribute,
        method::MethodAttributes,
        signatures::{MethodSig, TypeSig, MAX_RECURSION_DEPTH},
    },
    model::{
        flags::{FieldAttributes, TypeAttributes},
        FieldId, MemberDef, MemberRefId, MemberRefParent, MemberRefSig, MethodHandle, MethodId,
        ModuleGraph, ResolutionScope, TypeHandle, TypeId, TypeRefId,
    },
    Result,
};

/// Whether a call-site signature names a method with `definition`'s signature.
fn same_method(reference: &MethodSig, definition: &MethodSig) -> bool {
    reference.calling_convention == definition.calling_convention
        && reference.generic_param_count == definition.generic_param_count
        && reference.ret == definition.ret
        && reference.fixed_params() == definition.fixed_params()
}

/// Namespace and name of the attribute compilers put on generated code
const COMPILER_GENERATED: (&str, &str) = (
    "System.Runtime.CompilerServices",
    "CompilerGeneratedAttribute",
);

impl ModuleGraph {
    /// Every type reachable from the top-level list, each encloser before its nested types.
    pub fn all_types(&self) -> impl Iterator<Item = TypeId> + '_ {
        let mut stack: Vec<TypeId> = self.top_level.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            stack.extend(self[id].nested_types.iter().rev().copied());
            Some(id)
        })
    }

    /// Every method of every reachable type.
    pub fn methods(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.all_types()
            .flat_map(move |id| self[id].methods.iter().copied())
    }

    /// Every field of every reachable type.
    pub fn fields(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.all_types().flat_map(move |id| self[id].fields.iter().copied())
    }

    /// Every reachable type, each one after its base type, interfaces and encloser.
    ///
    /// # Errors
    /// Returns [`crate::Error::GraphError`] for a dependency cycle that cannot be broken.
    pub fn ordered_types(&self) -> Result<Vec<TypeId>> {
        let types: Vec<TypeId> = self.all_types().collect();
        dependencies::order(self, &types)
    }

    /// `Namespace.Name`, with `/` separating nested types: `Demo.Outer/Inner`.
    #[must_use]
    pub fn full_name(&self, id: TypeId) -> String {
        self.qualified_name(id, '/')
    }

    /// The reflection name used inside custom attribute blobs: `Demo.Outer+Inner`.
    #[must_use]
    pub fn serialized_name(&self, id: TypeId) -> String {
        self.qualified_name(id, '+')
    }

    fn qualified_name(&self, id: TypeId, separator: char) -> String {
        let type_def = &self[id];
        match type_def.declaring_type {
            Some(parent) => format!(
                "{}{}{}",
                self.qualified_name(parent, separator),
                separator,
                type_def.name
            ),
            None if type_def.namespace.is_empty() => type_def.name.clone(),
            None => format!("{}.{}", type_def.namespace, type_def.name),
        }
    }

    /// Full name of a type reference, following enclosing references.
    #[must_use]
    pub fn type_ref_full_name(&self, id: TypeRefId) -> String {
        self.type_ref_name(id, '/')
    }

    /// Reflection name of a type reference: `Ns.Outer+Inner`.
    #[must_use]
    pub fn type_ref_serialized_name(&self, id: TypeRefId) -> String {
        self.type_ref_name(id, '+')
    }

    fn type_ref_name(&self, id: TypeRefId, separator: char) -> String {
        let type_ref = &self[id];
        let own = if type_ref.namespace.is_empty() {
            type_ref.name.clone()
        } else {
            format!("{}.{}", type_ref.namespace, type_ref.name)
        };
        match type_ref.scope {
            ResolutionScope::Nested(parent) if parent != id => {
                format!("{}{}{}", self.type_ref_name(parent, separator), separator, own)
            }
            _ => own,
        }
    }

    /// A readable name for any type handle.
    #[must_use]
    pub fn handle_name(&self, handle: &TypeHandle) -> String {
        match handle {
            TypeHandle::Def(id) => self.full_name(*id),
            TypeHandle::Ref(id) => self.type_ref_full_name(*id),
            TypeHandle::Spec(sig) => match sig.as_ref() {
                TypeSig::GenericInst { base, args, .. } => {
                    format!("{}<{} args>", self.handle_name(base), args.len())
                }
                other => format!("{:?}", other),
            },
        }
    }

    /// Namespace and name of the type a handle names, looking through generic instances.
    #[must_use]
    pub fn handle_namespace_and_name(&self, handle: &TypeHandle) -> Option<(&str, &str)> {
        if let Some(id) = handle.definition() {
            let type_def = &self[id];
            return Some((type_def.namespace.as_str(), type_def.name.as_str()));
        }
        handle.reference().map(|id| {
            let type_ref = &self[id];
            (type_ref.namespace.as_str(), type_ref.name.as_str())
        })
    }

    /// `Type::Method` for diagnostics.
    #[must_use]
    pub fn method_full_name(&self, id: MethodId) -> String {
        let method = &self[id];
        match method.declaring_type {
            Some(owner) => format!("{}::{}", self.full_name(owner), method.name),
            None => method.name.clone(),
        }
    }

    /// `Type::field` for diagnostics.
    #[must_use]
    pub fn field_full_name(&self, id: FieldId) -> String {
        let field = &self[id];
        match field.declaring_type {
            Some(owner) => format!("{}::{}", self.full_name(owner), field.name),
            None => field.name.clone(),
        }
    }

    /// Find a reachable type by namespace and name. Nested types have an empty namespace.
    #[must_use]
    pub fn find_type(&self, namespace: &str, name: &str) -> Option<TypeId> {
        self.all_types()
            .find(|id| self[*id].namespace == namespace && self[*id].name == name)
    }

    /// Find a reachable type by its full name, as printed by [`ModuleGraph::full_name`].
    #[must_use]
    pub fn find_type_by_full_name(&self, full_name: &str) -> Option<TypeId> {
        self.all_types().find(|id| self.full_name(*id) == full_name)
    }

    /// The local type a type reference names when it points back into this module:
    /// scope `Module`, an `AssemblyRef` naming this assembly, or nested in such a
    /// reference.
    ///
    /// A reference bound by [`ModuleGraph::link_references`] keeps resolving to its
    /// type after a rename, until the type is detached.
    #[must_use]
    pub fn resolve_type_ref(&self, id: TypeRefId) -> Option<TypeId> {
        self.resolve_type_ref_at(id, 0)
    }

    fn resolve_type_ref_at(&self, id: TypeRefId, depth: usize) -> Option<TypeId> {
        let type_ref = self.get_type_ref(id)?;
        if let Some(bound) = type_ref.definition.filter(|bound| self.is_attached(*bound)) {
            return Some(bound);
        }
        let top_level = || {
            self.top_level.iter().copied().find(|top| {
                self[*top].namespace == type_ref.namespace && self[*top].name == type_ref.name
            })
        };
        match type_ref.scope {
            ResolutionScope::Module => top_level(),
            ResolutionScope::AssemblyRef(assembly_ref) => {
                let own = self.assembly.as_ref()?;
                (self.get_assembly_ref(assembly_ref)?.name == own.name)
                    .then(top_level)
                    .flatten()
            }
            ResolutionScope::Nested(outer) if depth < MAX_RECURSION_DEPTH && outer != id => {
                let outer = self.resolve_type_ref_at(outer, depth + 1)?;
                self[outer]
                    .nested_types
                    .iter()
                    .copied()
                    .find(|nested| self[*nested].name == type_ref.name)
            }
            _ => None,
        }
    }

    /// The local method or field a member reference names.
    ///
    /// The owner comes from the parent: a local type, a reference back into this
    /// module, or a generic instance of either, so `Box<string>::Get` resolves to
    /// `Box`1::Get`. Members match on name and signature, vararg extras aside. A
    /// reference bound by [`ModuleGraph::link_references`] keeps resolving after the
    /// definition is renamed, until it is detached.
    #[must_use]
    pub fn resolve_member_ref(&self, id: MemberRefId) -> Option<MemberDef> {
        let member = self.get_member_ref(id)?;
        if let Some(bound) = member.definition.filter(|bound| self.is_member_attached(*bound)) {
            return Some(bound);
        }
        let owner = match &member.parent {
            MemberRefParent::Type(handle) => handle
                .definition()
                .or_else(|| handle.reference().and_then(|r| self.resolve_type_ref(r)))?,
            MemberRefParent::Method(method) => {
                let definition = self.get_method(*method)?;
                return (definition.name == member.name && definition.declaring_type.is_some())
                    .then_some(MemberDef::Method(*method));
            }
            MemberRefParent::ModuleRef(_) => return None,
        };
        let owner = self.get_type(owner)?;
        match &member.signature {
            MemberRefSig::Method(signature) => owner
                .methods
                .iter()
                .copied()
                .find(|method| {
                    let candidate = &self[*method];
                    candidate.name == member.name && same_method(signature, &candidate.signature)
                })
                .map(MemberDef::Method),
            MemberRefSig::Field(signature) => owner
                .fields
                .iter()
                .copied()
                .find(|field| {
                    let candidate = &self[*field];
                    candidate.name == member.name && candidate.signature == *signature
                })
                .map(MemberDef::Field),
        }
    }

    /// Whether a type is still owned: listed at the top level or by an enclosing type.
    fn is_attached(&self, id: TypeId) -> bool {
        self.get_type(id).is_some_and(|type_def| {
            type_def.declaring_type.is_some() || self.top_level.contains(&id)
        })
    }

    fn is_member_attached(&self, member: MemberDef) -> bool {
        match member {
            MemberDef::Method(id) => self
                .get_method(id)
                .is_some_and(|method| method.declaring_type.is_some()),
            MemberDef::Field(id) => self
                .get_field(id)
                .is_some_and(|field| field.declaring_type.is_some()),
        }
    }

    /// Whether a type is visible outside the assembly: public, or nested public
    /// inside a visible type.
    #[must_use]
    pub fn is_public(&self, id: TypeId) -> bool {
        let type_def = &self[id];
        match (type_def.declaring_type, type_def.flags & TypeAttributes::VISIBILITY_MASK) {
            (None, visibility) => visibility == TypeAttributes::PUBLIC,
            (Some(parent), TypeAttributes::NESTED_PUBLIC) => self.is_public(parent),
            _ => false,
        }
    }

    /// Whether a method is public on a visible type.
    #[must_use]
    pub fn is_method_public(&self, id: MethodId) -> bool {
        let method = &self[id];
        method.flags.access() == MethodAttributes::PUBLIC.bits()
            && method.declaring_type.is_some_and(|owner| self.is_public(owner))
    }

    /// Whether a field is public on a visible type.
    #[must_use]
    pub fn is_field_public(&self, id: FieldId) -> bool {
        let field = &self[id];
        field.flags & FieldAttributes::FIELD_ACCESS_MASK == FieldAttributes::PUBLIC
            && field.declaring_type.is_some_and(|owner| self.is_public(owner))
    }

    /// Whether a type was produced by a compiler: it carries
    /// `CompilerGeneratedAttribute`, directly or through an enclosing type, or has
    /// an unspeakable name such as `<>c`.
    #[must_use]
    pub fn is_compiler_generated(&self, id: TypeId) -> bool {
        let type_def = &self[id];
        if type_def.name.starts_with('<') && id != self.module_type() {
            return true;
        }
        if self
            .custom_attribute(&type_def.custom_attributes, COMPILER_GENERATED.0, COMPILER_GENERATED.1)
            .is_some()
        {
            return true;
        }
        type_def
            .declaring_type
            .is_some_and(|parent| self.is_compiler_generated(parent))
    }

    /// Whether a method carries `CompilerGeneratedAttribute` or sits in a generated type.
    #[must_use]
    pub fn is_method_compiler_generated(&self, id: MethodId) -> bool {
        let method = &self[id];
        self.custom_attribute(&method.custom_attributes, COMPILER_GENERATED.0, COMPILER_GENERATED.1)
            .is_some()
            || method
                .declaring_type
                .is_some_and(|owner| self.is_compiler_generated(owner))
    }

    /// The type that declares an attribute's constructor.
    #[must_use]
    pub fn attribute_type(&self, attribute: &CustomAttribute) -> Option<TypeHandle> {
        self.method_declaring_type(&attribute.constructor)
    }

    /// The type that declares a method handle.
    #[must_use]
    pub fn method_declaring_type(&self, method: &MethodHandle) -> Option<TypeHandle> {
        match method {
            MethodHandle::Def(id) => self[*id].declaring_type.map(TypeHandle::Def),
            MethodHandle::Ref(id) => match &self[*id].parent {
                MemberRefParent::Type(handle) => Some(handle.clone()),
                MemberRefParent::Method(id) => self[*id].declaring_type.map(TypeHandle::Def),
                MemberRefParent::ModuleRef(_) => None,
            },
            MethodHandle::Spec { method, .. } => self.method_declaring_type(method),
        }
    }

    /// The first attribute in `attributes` whose type is `namespace.name`.
    #[must_use]
    pub fn custom_attribute<'a>(
        &self,
        attributes: &'a [CustomAttribute],
        namespace: &str,
        name: &str,
    ) -> Option<&'a CustomAttribute> {
        attributes.iter().find(|attribute| {
            self.attribute_type(attribute).is_some_and(|handle| {
                self.handle_namespace_and_name(&handle) == Some((namespace, name))
            })
        })
    }

    /// Whether a type is a value type: it derives from `System.ValueType`, or from
    /// `System.Enum` without being `System.Enum` itself.
    ///
    /// `None` when the answer depends on a type of another assembly.
    #[must_use]
    pub fn is_value_type(&self, handle: &TypeHandle) -> Option<bool> {
        let id = match handle {
            TypeHandle::Def(id) => *id,
            TypeHandle::Ref(_) => return None,
            TypeHandle::Spec(sig) => match sig.as_ref() {
                TypeSig::GenericInst { base, .. } => return self.is_value_type(base),
                _ => return Some(false),
            },
        };
        let type_def = &self[id];
        if type_def.flags & TypeAttributes::INTERFACE != 0 {
            return Some(false);
        }
        let Some(extends) = &type_def.extends else {
            return Some(false);
        };
        match self.handle_namespace_and_name(extends) {
            Some(("System", "ValueType")) => {
                Some(!(type_def.namespace == "System" && type_def.name == "Enum"))
            }
            Some(("System", "Enum")) => Some(true),
            _ => Some(false),
        }
    }

    /// The underlying element type of a local enum, from its `value__` field.
    #[must_use]
    pub fn enum_underlying_type(&self, id: TypeId) -> Option<u8> {
        let type_def = &self[id];
        let extends = type_def.extends.as_ref()?;
        if self.handle_namespace_and_name(extends) != Some(("System", "Enum")) {
            return None;
        }
        type_def
            .fields
            .iter()
            .map(|field| &self[*field])
            .find(|field| field.flags & FieldAttributes::STATIC == 0)
            .and_then(|field| field.signature.ty.strip_modifiers().primitive_element_type())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        metadata::{
            customattributes::{CustomAttribute, CustomAttributeData, CustomAttributeValue},
            method::MethodAttributes,
            signatures::{FieldSig, MethodSig, TypeSig, ELEMENT_TYPE},
        },
        model::{
            flags::{FieldAttributes, TypeAttributes},
            MemberDef, MemberRefParent, MemberRefSig, MethodHandle, ModuleGraph, ResolutionScope,
            TypeHandle,
        },
    };

    #[test]
    fn references_stay_bound_across_renames() {
        let mut graph = ModuleGraph::new("Test.dll");
        let program = graph.add_type("Demo", "Program", TypeAttributes::PUBLIC, None);
        let run = graph.add_method(
            program,
            "Run",
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            MethodSig::new_static(TypeSig::Void, vec![]),
        );
        let program_ref = graph.add_type_ref(ResolutionScope::Module, "Demo", "Program");
        let run_ref = graph.add_member_ref(
            MemberRefParent::Type(TypeHandle::Ref(program_ref)),
            "Run",
            MemberRefSig::Method(MethodSig::new_static(TypeSig::Void, vec![])),
        );
        let other = graph.add_member_ref(
            MemberRefParent::Type(TypeHandle::Ref(program_ref)),
            "Run",
            MemberRefSig::Method(MethodSig::new_static(TypeSig::I4, vec![])),
        );

        graph[program].name = "P".to_string();
        graph[run].name = "r".to_string();
        assert_eq!(graph.resolve_type_ref(program_ref), Some(program));
        assert_eq!(graph.resolve_member_ref(run_ref), Some(MemberDef::Method(run)));
        assert_eq!(graph.resolve_member_ref(other), None);

        graph.detach_method(run);
        assert_eq!(graph.resolve_member_ref(run_ref), None);
    }

    #[test]
    fn references_added_before_their_definitions_bind_on_link() {
        let mut graph = ModuleGraph::new("Test.dll");
        let program_ref = graph.add_type_ref(ResolutionScope::Module, "Demo", "Program");
        assert_eq!(graph[program_ref].definition, None);

        let program = graph.add_type("Demo", "Program", TypeAttributes::PUBLIC, None);
        graph.link_references();
        graph[program].name = "P".to_string();
        assert_eq!(graph[program_ref].definition, Some(program));
        assert_eq!(graph.resolve_type_ref(program_ref), Some(program));
    }

    #[test]
    fn names_and_enumeration() {
        let mut graph = ModuleGraph::new("Test.dll");
        let outer = graph.add_type("Demo", "Outer", TypeAttributes::PUBLIC, None);
        let inner = graph.add_nested_type(outer, "Inner", TypeAttributes::NESTED_PUBLIC, None);
        let deeper = graph.add_nested_type(inner, "Deeper", TypeAttributes::NESTED_PRIVATE, None);
        let other = graph.add_type("Demo", "Other", 0, None);

        assert_eq!(graph.full_name(deeper), "Demo.Outer/Inner/Deeper");
        assert_eq!(graph.serialized_name(inner), "Demo.Outer+Inner");
        assert_eq!(
            graph.all_types().collect::<Vec<_>>(),
            vec![graph.module_type(), outer, inner, deeper, other]
        );
        assert_eq!(graph.find_type_by_full_name("Demo.Outer/Inner"), Some(inner));
        assert_eq!(graph.find_type("Demo", "Other"), Some(other));

        assert!(graph.is_public(inner));
        assert!(!graph.is_public(deeper));
        assert!(!graph.is_public(other));
    }

    #[test]
    fn compiler_generated_detection() {
        let mut graph = ModuleGraph::new("Test.dll");
        let attribute_type =
            graph.core_type("System.Runtime.CompilerServices", "CompilerGeneratedAttribute");
        let constructor = graph.add_member_ref(
            MemberRefParent::Type(attribute_type),
            ".ctor",
            MemberRefSig::Method(MethodSig::new_instance(TypeSig::Void, vec![])),
        );

        let closure = graph.add_type("Demo", "Closure", 0, None);
        graph[closure].custom_attributes.push(CustomAttribute {
            constructor: MethodHandle::Ref(constructor),
            value: CustomAttributeData::Decoded(CustomAttributeValue::default()),
        });
        let nested = graph.add_nested_type(closure, "State", 0, None);
        let display = graph.add_type("Demo", "<>c__DisplayClass0", 0, None);
        let plain = graph.add_type("Demo", "Plain", 0, None);
        let method = graph.add_method(
            nested,
            "MoveNext",
            MethodAttributes::PRIVATE,
            MethodSig::new_instance(TypeSig::Boolean, vec![]),
        );

        assert!(graph.is_compiler_generated(closure));
        assert!(graph.is_compiler_generated(nested));
        assert!(graph.is_compiler_generated(display));
        assert!(!graph.is_compiler_generated(plain));
        assert!(!graph.is_compiler_generated(graph.module_type()));
        assert!(graph.is_method_compiler_generated(method));
        assert!(graph
            .custom_attribute(
                &graph[closure].custom_attributes,
                "System.Runtime.CompilerServices",
                "CompilerGeneratedAttribute"
            )
            .is_some());
    }

    #[test]
    fn value_types_and_enums() {
        let mut graph = ModuleGraph::new("Test.dll");
        let value_type = graph.core_type("System", "ValueType");
        let enum_type = graph.core_type("System", "Enum");
        let point = graph.add_type("Demo", "Point", 0, Some(value_type.clone()));
        let color = graph.add_type("Demo", "Color", 0, Some(enum_type));
        graph.add_field(
            color,
            "value__",
            FieldAttributes::PUBLIC | FieldAttributes::RT_SPECIAL_NAME,
            FieldSig { ty: TypeSig::U2 },
        );
        let object = graph.object_type();
        let class = graph.add_type("Demo", "Class", 0, Some(object));

        assert_eq!(graph.is_value_type(&crate::model::TypeHandle::Def(point)), Some(true));
        assert_eq!(graph.is_value_type(&crate::model::TypeHandle::Def(color)), Some(true));
        assert_eq!(graph.is_value_type(&crate::model::TypeHandle::Def(class)), Some(false));
        assert_eq!(graph.is_value_type(&value_type), None);
        assert_eq!(graph.enum_underlying_type(color), Some(ELEMENT_TYPE::U2));
        assert_eq!(graph.enum_underlying_type(point), None);
    }
}
