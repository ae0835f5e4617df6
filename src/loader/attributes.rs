use log::warn;

use crate::{
    loader::context::{Loader, SecurityOwner},
    metadata::{
        customattributes::{
            parse_custom_attribute, CustomAttribute, CustomAttributeData, CustomAttributeTypeResolver,
        },
        signatures::MethodSig,
        tables::{CodedIndexType, TableId},
        token::Token,
    },
    model::{MemberRefSig, MethodHandle, ModuleGraph, TypeHandle},
    project::ResolutionCache,
    Error, Result,
};

/// Names and enum facts for custom attribute decoding: local types first, then the
/// resolution cache for types of other assemblies.
pub(crate) struct AttributeTypes<'g> {
    pub graph: &'g ModuleGraph,
    pub cache: Option<&'g ResolutionCache>,
}

impl CustomAttributeTypeResolver for AttributeTypes<'_> {
    fn type_name(&mut self, handle: &TypeHandle) -> Option<String> {
        match handle {
            TypeHandle::Def(id) => Some(self.graph.serialized_name(*id)),
            TypeHandle::Ref(id) => Some(self.graph.type_ref_serialized_name(*id)),
            TypeHandle::Spec(_) => None,
        }
    }

    fn enum_underlying(&mut self, name: &str) -> Option<u8> {
        let local_name = name.split(',').next().unwrap_or(name).trim();
        let local = self
            .graph
            .all_types()
            .find(|id| self.graph.serialized_name(*id) == local_name);
        if let Some(id) = local {
            return self.graph.enum_underlying_type(id);
        }
        self.cache?.enum_underlying(name)
    }
}

impl Loader<'_> {
    pub fn load_custom_attributes(&mut self) -> Result<()> {
        for row in 1..=self.count(TableId::CustomAttribute) {
            let result = self.load_custom_attribute(row);
            self.recover(result, &format!("custom attribute row {}", row), || ())?;
        }
        Ok(())
    }

    fn load_custom_attribute(&mut self, row: u32) -> Result<()> {
        let [parent, constructor, value] = self.row(TableId::CustomAttribute, row)?;
        let parent = CodedIndexType::HasCustomAttribute.decode(parent)?;
        let constructor = self.method_handle(CodedIndexType::CustomAttributeType.decode(constructor)?)?;
        let blob = self.blob(value)?;

        let signature: Option<MethodSig> = match &constructor {
            MethodHandle::Def(id) => Some(self.graph[*id].signature.clone()),
            MethodHandle::Ref(id) => match &self.graph[*id].signature {
                MemberRefSig::Method(signature) => Some(signature.clone()),
                MemberRefSig::Field(_) => None,
            },
            MethodHandle::Spec { .. } => {
                warn!("Custom attribute row {} has an instantiated constructor", row);
                None
            }
        };

        let value = match signature {
            Some(signature) if self.options.decode_custom_attributes && !blob.is_empty() => {
                let mut types = AttributeTypes {
                    graph: &self.graph,
                    cache: self.options.cache.as_ref(),
                };
                match parse_custom_attribute(blob, &signature, &mut types) {
                    Ok(value) => CustomAttributeData::Decoded(value),
                    Err(error) => {
                        warn!("Custom attribute row {} kept raw: {}", row, error);
                        CustomAttributeData::Raw(blob.to_vec())
                    }
                }
            }
            _ => CustomAttributeData::Raw(blob.to_vec()),
        };

        let attribute = CustomAttribute { constructor, value };
        match self.attributes_of(parent)? {
            Some(list) => list.push(attribute),
            None => warn!(
                "Custom attribute row {} sits on {}, which is not kept; dropped",
                row, parent
            ),
        }
        Ok(())
    }

    /// The attribute list of the entity a `HasCustomAttribute` token names.
    fn attributes_of(&mut self, token: Token) -> Result<Option<&mut Vec<CustomAttribute>>> {
        let index = (token.row() as usize)
            .checked_sub(1)
            .ok_or(Error::InvalidToken(token))?;

        let list = match TableId::from_u8(token.table()) {
            Some(TableId::MethodDef) => {
                let id = self.method_def(token)?;
                &mut self.graph[id].custom_attributes
            }
            Some(TableId::Field) => {
                let id = self.field_def(token)?;
                &mut self.graph[id].custom_attributes
            }
            Some(TableId::TypeRef) => {
                let id = self.type_ref(token.row(), 0)?;
                &mut self.graph[id].custom_attributes
            }
            Some(TableId::TypeDef) => {
                let id = self.type_def(token)?;
                &mut self.graph[id].custom_attributes
            }
            Some(TableId::Param) => {
                let (method, position) = self.param(token)?;
                &mut self.graph[method].params[position].custom_attributes
            }
            Some(TableId::InterfaceImpl) => {
                let (owner, position) = self
                    .rows
                    .interface_impls
                    .get(index)
                    .copied()
                    .flatten()
                    .ok_or(Error::InvalidToken(token))?;
                &mut self.graph[owner].interfaces[position].custom_attributes
            }
            Some(TableId::MemberRef) => {
                let id = self.member_ref(token)?;
                &mut self.graph[id].custom_attributes
            }
            Some(TableId::Module) => &mut self.graph.module.custom_attributes,
            Some(TableId::DeclSecurity) => {
                let (owner, position) = self
                    .rows
                    .security
                    .get(index)
                    .copied()
                    .flatten()
                    .ok_or(Error::InvalidToken(token))?;
                let declarations = match owner {
                    SecurityOwner::Type(id) => &mut self.graph[id].security,
                    SecurityOwner::Method(id) => &mut self.graph[id].security,
                    SecurityOwner::Assembly => match self.graph.assembly.as_mut() {
                        Some(assembly) => &mut assembly.security,
                        None => return Err(Error::InvalidToken(token)),
                    },
                };
                &mut declarations[position].custom_attributes
            }
            Some(TableId::Property) => {
                let id = self.property(token)?;
                &mut self.graph[id].custom_attributes
            }
            Some(TableId::Event) => {
                let id = self.event(token)?;
                &mut self.graph[id].custom_attributes
            }
            Some(TableId::ModuleRef) => {
                let id = self.module_ref(token)?;
                &mut self.graph[id].custom_attributes
            }
            Some(TableId::Assembly) => match self.graph.assembly.as_mut() {
                Some(assembly) => &mut assembly.custom_attributes,
                None => return Err(Error::InvalidToken(token)),
            },
            Some(TableId::AssemblyRef) => {
                let id = self.assembly_ref(token)?;
                &mut self.graph[id].custom_attributes
            }
            Some(TableId::File) => match self.graph.files.get_mut(index) {
                Some(file) => &mut file.custom_attributes,
                None => return Err(Error::InvalidToken(token)),
            },
            Some(TableId::ExportedType) => match self.graph.exported_types.get_mut(index) {
                Some(exported) => &mut exported.custom_attributes,
                None => return Err(Error::InvalidToken(token)),
            },
            Some(TableId::ManifestResource) => match self.graph.resources.get_mut(index) {
                Some(resource) => &mut resource.custom_attributes,
                None => return Err(Error::InvalidToken(token)),
            },
            Some(TableId::GenericParam) => {
                let (owner, position) = self
                    .rows
                    .generic_params
                    .get(index)
                    .copied()
                    .flatten()
                    .ok_or(Error::InvalidToken(token))?;
                &mut self.generic_params_mut(owner)[position].custom_attributes
            }
            Some(TableId::GenericParamConstraint) => {
                let (owner, position, constraint) = self
                    .rows
                    .constraints
                    .get(index)
                    .copied()
                    .flatten()
                    .ok_or(Error::InvalidToken(token))?;
                &mut self.generic_params_mut(owner)[position].constraints[constraint].custom_attributes
            }
            _ => return Ok(None),
        };
        Ok(Some(list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::signatures::{FieldSig, TypeSig, ELEMENT_TYPE},
        model::flags::FieldAttributes,
    };

    #[test]
    fn enum_facts_prefer_local_types() {
        let mut graph = ModuleGraph::new("Test.dll");
        let enum_type = graph.core_type("System", "Enum");
        let color = graph.add_type("Demo", "Color", 0, Some(enum_type));
        graph.add_field(
            color,
            "value__",
            FieldAttributes::PUBLIC | FieldAttributes::RT_SPECIAL_NAME,
            FieldSig { ty: TypeSig::U1 },
        );
        let target = graph.core_type("System", "AttributeTargets");
        let cache = ResolutionCache::with_core_library();

        let mut types = AttributeTypes {
            graph: &graph,
            cache: Some(&cache),
        };
        assert_eq!(types.type_name(&TypeHandle::Def(color)).as_deref(), Some("Demo.Color"));
        assert_eq!(
            types.type_name(&target).as_deref(),
            Some("System.AttributeTargets")
        );
        assert_eq!(types.enum_underlying("Demo.Color"), Some(ELEMENT_TYPE::U1));
        assert_eq!(
            types.enum_underlying("System.AttributeTargets, mscorlib, Version=4.0.0.0"),
            Some(ELEMENT_TYPE::I4)
        );
        assert_eq!(types.enum_underlying("Demo.Missing"), None);

        let mut without_cache = AttributeTypes {
            graph: &graph,
            cache: None,
        };
        assert_eq!(without_cache.enum_underlying("System.AttributeTargets"), None);
    }
}
