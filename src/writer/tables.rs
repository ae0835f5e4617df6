//! The table passes.
//!
//! Rows are produced in the order forward references allow: module, assembly and
//! references first, then every type with its fields, methods and parameters, then
//! generic parameters, then everything that points at those rows. Tables that other
//! rows point into (`InterfaceImpl`, `GenericParam`, `GenericParamConstraint`,
//! `DeclSecurity`) are filled in key order, so the final sort never moves a row
//! that has already been referenced.

use log::debug;
use strum::IntoEnumIterator;

use crate::{
    assembly::encode_body,
    file::io::pad_to,
    metadata::{
        customattributes::{encode_custom_attribute, CustomAttribute, CustomAttributeData},
        method::{fits_tiny, MethodAttributes, MethodImplAttributes},
        signatures::{encode_field_signature, encode_method_signature, encode_property_signature},
        tables::{sort_keys, CodedIndexType, TableId},
        token::Token,
    },
    model::{
        flags::{AssemblyFlags, FieldAttributes, MethodSemanticsAttributes, ParamAttributes},
        Constant, ExportedTypeImplementation, FieldId, GenericParam, MethodDef, MethodId, ModuleGraph,
        PInvokeMap, ResourceData, SecurityDecl, TypeHandle, TypeId,
    },
    writer::{
        context::{row_of, Emitter},
        WriterOptions,
    },
    Error, Result,
};

/// `PropertyAttributes.HasDefault`
const PROPERTY_HAS_DEFAULT: u16 = 0x1000;

/// Rows and data blocks of one write, ready for layout.
pub(crate) struct TableBuilder<'g> {
    pub emitter: Emitter<'g>,
    options: &'g WriterOptions,
    code_rva: u32,
    /// Method bodies, placed at `code_rva`
    pub code: Vec<u8>,
    /// Initial values of RVA fields, placed on the next 8 byte boundary after `code`
    pub field_data: Vec<u8>,
    /// Embedded manifest resources, each behind its `u32` length
    pub resources: Vec<u8>,
    /// `#GUID` index of the module MVID when it is derived after layout
    pub mvid_index: Option<u32>,
    pub entry_point: Token,
    attributes: Vec<(u32, &'g CustomAttribute)>,
    constants: Vec<(u32, &'g Constant)>,
    marshals: Vec<(u32, &'g [u8])>,
    security: Vec<(u32, &'g SecurityDecl)>,
    field_layouts: Vec<(u32, u32)>,
    field_rvas: Vec<(u32, u32)>,
    impl_maps: Vec<(u32, &'g PInvokeMap)>,
    generic_params: Vec<(u32, &'g GenericParam)>,
}

impl<'g> TableBuilder<'g> {
    /// Run every pass over `graph`. Method bodies are addressed from `code_rva`.
    pub fn build(
        graph: &'g ModuleGraph,
        options: &'g WriterOptions,
        code_rva: u32,
    ) -> Result<TableBuilder<'g>> {
        let mut builder = TableBuilder {
            emitter: Emitter::new(graph, options.cache.as_ref()),
            options,
            code_rva,
            code: Vec::new(),
            field_data: Vec::new(),
            resources: Vec::new(),
            mvid_index: None,
            entry_point: Token(0),
            attributes: Vec::new(),
            constants: Vec::new(),
            marshals: Vec::new(),
            security: Vec::new(),
            field_layouts: Vec::new(),
            field_rvas: Vec::new(),
            impl_maps: Vec::new(),
            generic_params: Vec::new(),
        };

        builder.write_manifest()?;
        let types: Vec<TypeId> = graph.all_types().collect();
        builder.assign_rows(&types)?;
        builder.write_types(&types)?;
        debug!(
            "Writer: {} types, {} methods, {} bytes of code",
            types.len(),
            builder.emitter.rows(TableId::MethodDef),
            builder.code.len()
        );
        builder.write_generic_params()?;
        builder.write_members(&types)?;
        builder.write_files_and_resources()?;
        builder.write_reference_attributes()?;
        builder.write_deferred()?;

        if let Some(entry_point) = graph.entry_point {
            builder.entry_point = builder.emitter.method_def_token(entry_point)?;
        }

        for table in TableId::iter() {
            if let Some((primary, secondary)) = sort_keys(table) {
                builder.emitter.tables[table as usize].sort_by_columns(primary, secondary);
            }
        }
        Ok(builder)
    }

    fn graph(&self) -> &'g ModuleGraph {
        self.emitter.graph
    }

    fn attach(&mut self, parent: (TableId, u32), attributes: &'g [CustomAttribute]) -> Result<()> {
        if attributes.is_empty() {
            return Ok(());
        }
        let parent = CodedIndexType::HasCustomAttribute.encode(parent.0, parent.1)?;
        self.attributes
            .extend(attributes.iter().map(|attribute| (parent, attribute)));
        Ok(())
    }

    fn attach_security(&mut self, parent: (TableId, u32), decls: &'g [SecurityDecl]) -> Result<()> {
        if decls.is_empty() {
            return Ok(());
        }
        let parent = CodedIndexType::HasDeclSecurity.encode(parent.0, parent.1)?;
        self.security.extend(decls.iter().map(|decl| (parent, decl)));
        Ok(())
    }

    fn string(&mut self, value: &str) -> u32 {
        self.emitter.strings.add(value)
    }

    fn blob(&mut self, value: &[u8]) -> Result<u32> {
        self.emitter.blobs.add(value)
    }

    /// `Module` and `Assembly` rows, assembly and module references.
    fn write_manifest(&mut self) -> Result<()> {
        let graph = self.graph();
        let options = self.options;
        let module = &graph.module;
        let name = self.string(&module.name);
        let mvid = if options.deterministic_mvid {
            let index = self.emitter.guids.reserve();
            self.mvid_index = Some(index);
            index
        } else {
            self.emitter.guids.add(module.mvid)
        };
        self.emitter.push(
            TableId::Module,
            &[u32::from(module.generation), name, mvid, 0, 0],
        );
        self.attach((TableId::Module, 1), &module.custom_attributes)?;

        if let Some(assembly) = &graph.assembly {
            let (public_key, flags) = match &options.strong_name {
                Some(strong_name) => (
                    strong_name.public_key.as_slice(),
                    assembly.flags | AssemblyFlags::PUBLIC_KEY,
                ),
                None => (assembly.public_key.as_slice(), assembly.flags),
            };
            let row = [
                assembly.hash_algorithm,
                u32::from(assembly.version.major),
                u32::from(assembly.version.minor),
                u32::from(assembly.version.build),
                u32::from(assembly.version.revision),
                flags,
                self.blob(public_key)?,
                self.string(&assembly.name),
                self.string(&assembly.culture),
            ];
            self.emitter.push(TableId::Assembly, &row);
            self.attach_security((TableId::Assembly, 1), &assembly.security)?;
            self.attach((TableId::Assembly, 1), &assembly.custom_attributes)?;
        }

        for (id, assembly_ref) in graph.assembly_refs() {
            let row = [
                u32::from(assembly_ref.version.major),
                u32::from(assembly_ref.version.minor),
                u32::from(assembly_ref.version.build),
                u32::from(assembly_ref.version.revision),
                assembly_ref.flags,
                self.blob(&assembly_ref.public_key_or_token)?,
                self.string(&assembly_ref.name),
                self.string(&assembly_ref.culture),
                self.blob(&assembly_ref.hash_value)?,
            ];
            self.emitter.push(TableId::AssemblyRef, &row);
            self.attach(
                (TableId::AssemblyRef, row_of(id.index())),
                &assembly_ref.custom_attributes,
            )?;
        }

        for (id, module_ref) in graph.module_refs() {
            let name = self.string(&module_ref.name);
            self.emitter.push(TableId::ModuleRef, &[name]);
            self.attach(
                (TableId::ModuleRef, row_of(id.index())),
                &module_ref.custom_attributes,
            )?;
        }
        Ok(())
    }

    /// Fix the row of every type, field and method before any row is written.
    fn assign_rows(&mut self, types: &[TypeId]) -> Result<()> {
        let graph = self.graph();
        let mut field_row = 1;
        let mut method_row = 1;
        for (index, &id) in types.iter().enumerate() {
            self.emitter.type_rows.insert(id, row_of(index));
            let type_def = &graph[id];
            for &field in &type_def.fields {
                if self.emitter.field_rows.insert(field, field_row).is_some() {
                    return Err(encode_error!(
                        graph.field_full_name(field),
                        "field is listed by more than one type"
                    ));
                }
                field_row += 1;
            }
            for &method in &type_def.methods {
                if self.emitter.method_rows.insert(method, method_row).is_some() {
                    return Err(encode_error!(
                        graph.method_full_name(method),
                        "method is listed by more than one type"
                    ));
                }
                method_row += 1;
            }
        }
        Ok(())
    }

    /// `TypeDef`, `Field`, `MethodDef`, `Param` and `InterfaceImpl` rows, and the
    /// method bodies.
    fn write_types(&mut self, types: &[TypeId]) -> Result<()> {
        let graph = self.graph();
        let mut next_field = 1;
        let mut next_method = 1;
        let mut next_param = 1;

        for &id in types {
            let type_def = &graph[id];
            let type_row = self.emitter.type_rows[&id];
            let extends = self.emitter.type_def_or_ref(type_def.extends.as_ref())?;
            let row = [
                type_def.flags,
                self.string(&type_def.name),
                self.string(&type_def.namespace),
                extends,
                next_field,
                next_method,
            ];
            self.emitter.push(TableId::TypeDef, &row);
            self.attach((TableId::TypeDef, type_row), &type_def.custom_attributes)?;
            self.attach_security((TableId::TypeDef, type_row), &type_def.security)?;

            let owner = CodedIndexType::TypeOrMethodDef.encode(TableId::TypeDef, type_row)?;
            self.generic_params
                .extend(type_def.generic_params.iter().map(|param| (owner, param)));

            for &field in &type_def.fields {
                self.write_field(field)?;
                next_field += 1;
            }
            for &method in &type_def.methods {
                next_param += self.write_method(method, next_param)?;
                next_method += 1;
            }

            let mut interfaces = Vec::with_capacity(type_def.interfaces.len());
            for implementation in &type_def.interfaces {
                let interface = self.emitter.type_def_or_ref(Some(&implementation.interface))?;
                interfaces.push((interface, implementation));
            }
            interfaces.sort_by_key(|(interface, _)| *interface);
            for (interface, implementation) in interfaces {
                let row = self
                    .emitter
                    .push(TableId::InterfaceImpl, &[type_row, interface]);
                self.attach(
                    (TableId::InterfaceImpl, row),
                    &implementation.custom_attributes,
                )?;
            }
        }
        Ok(())
    }

    fn write_field(&mut self, id: FieldId) -> Result<()> {
        let graph = self.graph();
        let field = &graph[id];
        let signature = encode_field_signature(&field.signature, &mut self.emitter)?;

        let mut flags = field.flags;
        if field.constant.is_some() {
            flags |= FieldAttributes::HAS_DEFAULT;
        }
        if field.marshal.is_some() {
            flags |= FieldAttributes::HAS_FIELD_MARSHAL;
        }
        if field.initial_value.is_some() {
            flags |= FieldAttributes::HAS_FIELD_RVA;
        }
        let row = [
            u32::from(flags),
            self.string(&field.name),
            self.blob(&signature)?,
        ];
        let row = self.emitter.push(TableId::Field, &row);

        if let Some(constant) = &field.constant {
            let parent = CodedIndexType::HasConstant.encode(TableId::Field, row)?;
            self.constants.push((parent, constant));
        }
        if let Some(marshal) = &field.marshal {
            let parent = CodedIndexType::HasFieldMarshal.encode(TableId::Field, row)?;
            self.marshals.push((parent, marshal));
        }
        if let Some(offset) = field.offset {
            self.field_layouts.push((offset, row));
        }
        if let Some(data) = &field.initial_value {
            pad_to(&mut self.field_data, 8);
            #[allow(clippy::cast_possible_truncation)]
            let offset = self.field_data.len() as u32;
            self.field_data.extend_from_slice(data);
            self.field_rvas.push((offset, row));
        }
        self.attach((TableId::Field, row), &field.custom_attributes)
    }

    /// Write one method with its parameters; returns the number of `Param` rows.
    fn write_method(&mut self, id: MethodId, first_param: u32) -> Result<u32> {
        let graph = self.graph();
        let method = &graph[id];
        let signature = encode_method_signature(&method.signature, &mut self.emitter)?;
        let rva = self.write_body(id, method)?;

        let mut flags = method.flags;
        if method.pinvoke.is_some() {
            flags |= MethodAttributes::PINVOKE_IMPL;
        }
        let row = [
            rva,
            u32::from(method.impl_flags.bits()),
            u32::from(flags.bits()),
            self.string(&method.name),
            self.blob(&signature)?,
            first_param,
        ];
        let row = self.emitter.push(TableId::MethodDef, &row);

        let mut params = 0;
        for param in &method.params {
            let mut flags = param.flags;
            if param.constant.is_some() {
                flags |= ParamAttributes::HAS_DEFAULT;
            }
            if param.marshal.is_some() {
                flags |= ParamAttributes::HAS_FIELD_MARSHAL;
            }
            let name = self.string(&param.name);
            let param_row = self.emitter.push(
                TableId::Param,
                &[u32::from(flags), u32::from(param.sequence), name],
            );
            if let Some(constant) = &param.constant {
                let parent = CodedIndexType::HasConstant.encode(TableId::Param, param_row)?;
                self.constants.push((parent, constant));
            }
            if let Some(marshal) = &param.marshal {
                let parent = CodedIndexType::HasFieldMarshal.encode(TableId::Param, param_row)?;
                self.marshals.push((parent, marshal));
            }
            self.attach((TableId::Param, param_row), &param.custom_attributes)?;
            params += 1;
        }

        if let Some(pinvoke) = &method.pinvoke {
            let forwarded = CodedIndexType::MemberForwarded.encode(TableId::MethodDef, row)?;
            self.impl_maps.push((forwarded, pinvoke));
        }
        let owner = CodedIndexType::TypeOrMethodDef.encode(TableId::MethodDef, row)?;
        self.generic_params
            .extend(method.generic_params.iter().map(|param| (owner, param)));
        self.attach_security((TableId::MethodDef, row), &method.security)?;
        self.attach((TableId::MethodDef, row), &method.custom_attributes)?;
        Ok(params)
    }

    /// Encode the body of `method` into the code block and return its RVA, or 0 for
    /// methods implemented elsewhere.
    ///
    /// An IL method that is neither abstract, P/Invoke nor an internal call must
    /// have a body; a missing one fails the write.
    fn write_body(&mut self, id: MethodId, method: &'g MethodDef) -> Result<u32> {
        let Some(body) = &method.body else {
            let expects_body = method.impl_flags.is_il()
                && !method.impl_flags.contains(MethodImplAttributes::INTERNAL_CALL)
                && !method.flags.contains(MethodAttributes::ABSTRACT)
                && method.pinvoke.is_none();
            if expects_body {
                return Err(encode_error!(
                    self.graph().method_full_name(id),
                    "IL method has no body"
                ));
            }
            return Ok(0);
        };

        let graph = self.graph();
        let in_method = |error: Error| match error {
            Error::Encode { entity, message } => Error::Encode {
                entity: graph.method_full_name(id),
                message: format!("{entity}: {message}"),
            },
            other => encode_error!(graph.method_full_name(id), "{}", other),
        };
        body.validate().map_err(in_method)?;
        let encoded = encode_body(body, &mut self.emitter).map_err(in_method)?;

        if !fits_tiny(&encoded.header, encoded.code.len(), !encoded.clauses.is_empty()) {
            pad_to(&mut self.code, 4);
        }
        #[allow(clippy::cast_possible_truncation)]
        let rva = self.code_rva + self.code.len() as u32;
        encoded.write(&mut self.code);
        Ok(rva)
    }

    /// `GenericParam` rows in (owner, number) order, then their constraints.
    fn write_generic_params(&mut self) -> Result<()> {
        let mut params = std::mem::take(&mut self.generic_params);
        params.sort_by_key(|(owner, param)| (*owner, param.number));

        let mut constraints = Vec::new();
        for (owner, param) in params {
            let name = self.string(&param.name);
            let row = self.emitter.push(
                TableId::GenericParam,
                &[u32::from(param.number), u32::from(param.flags), owner, name],
            );
            self.attach((TableId::GenericParam, row), &param.custom_attributes)?;
            constraints.extend(param.constraints.iter().map(|constraint| (row, constraint)));
        }

        for (param_row, constraint) in constraints {
            let coded = self.emitter.type_def_or_ref(Some(&constraint.constraint))?;
            let row = self
                .emitter
                .push(TableId::GenericParamConstraint, &[param_row, coded]);
            self.attach(
                (TableId::GenericParamConstraint, row),
                &constraint.custom_attributes,
            )?;
        }
        Ok(())
    }

    fn semantics(
        &mut self,
        rows: &mut Vec<[u32; 3]>,
        semantic: u16,
        method: Option<MethodId>,
        association: u32,
    ) -> Result<()> {
        if let Some(method) = method {
            let method = self.emitter.method_def_token(method)?.row();
            rows.push([u32::from(semantic), method, association]);
        }
        Ok(())
    }

    /// Nesting, properties, events, accessors, overrides and class layout.
    fn write_members(&mut self, types: &[TypeId]) -> Result<()> {
        let graph = self.graph();
        let mut semantics = Vec::new();

        for &id in types {
            let type_def = &graph[id];
            let type_row = self.emitter.type_rows[&id];

            if let Some(encloser) = type_def.declaring_type {
                let encloser = self.emitter.type_def_token(encloser)?.row();
                self.emitter
                    .push(TableId::NestedClass, &[type_row, encloser]);
            }

            if !type_def.properties.is_empty() {
                let first = self.emitter.rows(TableId::Property) + 1;
                self.emitter.push(TableId::PropertyMap, &[type_row, first]);
            }
            for &property in &type_def.properties {
                let property = &graph[property];
                let signature = encode_property_signature(&property.signature, &mut self.emitter)?;
                let mut flags = property.flags;
                if property.constant.is_some() {
                    flags |= PROPERTY_HAS_DEFAULT;
                }
                let row = [
                    u32::from(flags),
                    self.string(&property.name),
                    self.blob(&signature)?,
                ];
                let row = self.emitter.push(TableId::Property, &row);
                if let Some(constant) = &property.constant {
                    let parent = CodedIndexType::HasConstant.encode(TableId::Property, row)?;
                    self.constants.push((parent, constant));
                }

                let association = CodedIndexType::HasSemantics.encode(TableId::Property, row)?;
                self.semantics(&mut semantics, MethodSemanticsAttributes::SETTER, property.setter, association)?;
                self.semantics(&mut semantics, MethodSemanticsAttributes::GETTER, property.getter, association)?;
                for &other in &property.others {
                    self.semantics(&mut semantics, MethodSemanticsAttributes::OTHER, Some(other), association)?;
                }
                self.attach((TableId::Property, row), &property.custom_attributes)?;
            }

            if !type_def.events.is_empty() {
                let first = self.emitter.rows(TableId::Event) + 1;
                self.emitter.push(TableId::EventMap, &[type_row, first]);
            }
            for &event in &type_def.events {
                let event = &graph[event];
                let event_type = self.emitter.type_def_or_ref(event.event_type.as_ref())?;
                let name = self.string(&event.name);
                let row = self.emitter.push(
                    TableId::Event,
                    &[u32::from(event.flags), name, event_type],
                );

                let association = CodedIndexType::HasSemantics.encode(TableId::Event, row)?;
                self.semantics(&mut semantics, MethodSemanticsAttributes::ADD_ON, event.add_method, association)?;
                self.semantics(&mut semantics, MethodSemanticsAttributes::REMOVE_ON, event.remove_method, association)?;
                self.semantics(&mut semantics, MethodSemanticsAttributes::FIRE, event.fire_method, association)?;
                for &other in &event.others {
                    self.semantics(&mut semantics, MethodSemanticsAttributes::OTHER, Some(other), association)?;
                }
                self.attach((TableId::Event, row), &event.custom_attributes)?;
            }

            for method_impl in &type_def.method_impls {
                let body = self.emitter.method_handle_token(&method_impl.body)?;
                let declaration = self.emitter.method_handle_token(&method_impl.declaration)?;
                let row = [
                    type_row,
                    CodedIndexType::MethodDefOrRef.encode_token(body)?,
                    CodedIndexType::MethodDefOrRef.encode_token(declaration)?,
                ];
                self.emitter.push(TableId::MethodImpl, &row);
            }

            if let Some(layout) = &type_def.layout {
                self.emitter.push(
                    TableId::ClassLayout,
                    &[u32::from(layout.packing_size), layout.class_size, type_row],
                );
            }
        }

        for row in semantics {
            self.emitter.push(TableId::MethodSemantics, &row);
        }
        Ok(())
    }

    /// `File`, `ExportedType` and `ManifestResource` rows, and the embedded resource data.
    fn write_files_and_resources(&mut self) -> Result<()> {
        let graph = self.graph();
        for file in &graph.files {
            let row = [file.flags, self.string(&file.name), self.blob(&file.hash_value)?];
            let row = self.emitter.push(TableId::File, &row);
            self.attach((TableId::File, row), &file.custom_attributes)?;
        }

        for exported in &graph.exported_types {
            let implementation = match exported.implementation {
                ExportedTypeImplementation::File(index) => {
                    CodedIndexType::Implementation.encode(TableId::File, row_of(index))?
                }
                ExportedTypeImplementation::AssemblyRef(id) => CodedIndexType::Implementation
                    .encode(TableId::AssemblyRef, row_of(id.index()))?,
                ExportedTypeImplementation::Enclosing(index) => {
                    CodedIndexType::Implementation.encode(TableId::ExportedType, row_of(index))?
                }
            };
            let row = [
                exported.flags,
                exported.type_def_id,
                self.string(&exported.name),
                self.string(&exported.namespace),
                implementation,
            ];
            let row = self.emitter.push(TableId::ExportedType, &row);
            self.attach((TableId::ExportedType, row), &exported.custom_attributes)?;
        }

        for resource in &graph.resources {
            let (offset, implementation) = match &resource.data {
                ResourceData::Embedded(data) => {
                    pad_to(&mut self.resources, 8);
                    let offset = u32::try_from(self.resources.len()).map_err(|_| {
                        encode_error!(resource.name, "managed resources exceed 4 GiB")
                    })?;
                    let length = u32::try_from(data.len()).map_err(|_| {
                        encode_error!(resource.name, "resource exceeds 4 GiB")
                    })?;
                    self.resources.extend_from_slice(&length.to_le_bytes());
                    self.resources.extend_from_slice(data);
                    (offset, 0)
                }
                ResourceData::File { file, offset } => (
                    *offset,
                    CodedIndexType::Implementation.encode(TableId::File, row_of(*file))?,
                ),
                ResourceData::Assembly(id) => (
                    0,
                    CodedIndexType::Implementation
                        .encode(TableId::AssemblyRef, row_of(id.index()))?,
                ),
            };
            let name = self.string(&resource.name);
            let row = self.emitter.push(
                TableId::ManifestResource,
                &[offset, resource.flags, name, implementation],
            );
            self.attach((TableId::ManifestResource, row), &resource.custom_attributes)?;
        }
        Ok(())
    }

    /// Attributes on type and member references, which share rows with other
    /// references or with local definitions.
    fn write_reference_attributes(&mut self) -> Result<()> {
        let graph = self.graph();
        for (id, type_ref) in graph.type_refs() {
            if type_ref.custom_attributes.is_empty() {
                continue;
            }
            let token = self.emitter.type_handle_token(&TypeHandle::Ref(id))?;
            self.attach_token(token, &type_ref.custom_attributes)?;
        }
        for (id, member_ref) in graph.member_refs() {
            if member_ref.custom_attributes.is_empty() {
                continue;
            }
            let token = self.emitter.member_ref_token(id)?;
            self.attach_token(token, &member_ref.custom_attributes)?;
        }
        Ok(())
    }

    fn attach_token(&mut self, token: Token, attributes: &'g [CustomAttribute]) -> Result<()> {
        let parent = CodedIndexType::HasCustomAttribute.encode_token(token)?;
        self.attributes
            .extend(attributes.iter().map(|attribute| (parent, attribute)));
        Ok(())
    }

    /// Rows that only point at others: constants, marshalling, field layout and
    /// data, P/Invoke maps, security and custom attributes.
    fn write_deferred(&mut self) -> Result<()> {
        for (parent, constant) in std::mem::take(&mut self.constants) {
            let value = self.blob(&constant.value)?;
            self.emitter.push(
                TableId::Constant,
                &[u32::from(constant.element_type), parent, value],
            );
        }

        for (parent, marshal) in std::mem::take(&mut self.marshals) {
            let blob = self.blob(marshal)?;
            self.emitter.push(TableId::FieldMarshal, &[parent, blob]);
        }

        for (offset, field) in std::mem::take(&mut self.field_layouts) {
            self.emitter.push(TableId::FieldLayout, &[offset, field]);
        }

        let data_rva = self.field_data_rva();
        for (offset, field) in std::mem::take(&mut self.field_rvas) {
            self.emitter.push(TableId::FieldRVA, &[data_rva + offset, field]);
        }

        for (forwarded, pinvoke) in std::mem::take(&mut self.impl_maps) {
            let name = self.string(&pinvoke.import_name);
            let graph = self.graph();
            if graph.get_module_ref(pinvoke.module).is_none() {
                return Err(encode_error!(
                    pinvoke.import_name,
                    "P/Invoke target module does not exist"
                ));
            }
            self.emitter.push(
                TableId::ImplMap,
                &[
                    u32::from(pinvoke.flags),
                    forwarded,
                    name,
                    row_of(pinvoke.module.index()),
                ],
            );
        }

        let mut security = std::mem::take(&mut self.security);
        security.sort_by_key(|(parent, _)| *parent);
        for (parent, decl) in security {
            let permission_set = self.blob(&decl.permission_set)?;
            let row = self.emitter.push(
                TableId::DeclSecurity,
                &[u32::from(decl.action), parent, permission_set],
            );
            self.attach((TableId::DeclSecurity, row), &decl.custom_attributes)?;
        }

        let mut attributes = std::mem::take(&mut self.attributes);
        attributes.sort_by_key(|(parent, _)| *parent);
        for (parent, attribute) in attributes {
            let constructor = self.emitter.method_handle_token(&attribute.constructor)?;
            let constructor = CodedIndexType::CustomAttributeType.encode_token(constructor)?;
            let value = match &attribute.value {
                CustomAttributeData::Raw(data) => self.blob(data)?,
                CustomAttributeData::Decoded(value) => {
                    let data = encode_custom_attribute(value)?;
                    self.blob(&data)?
                }
            };
            self.emitter
                .push(TableId::CustomAttribute, &[parent, constructor, value]);
        }
        Ok(())
    }

    /// RVA of the first byte of `field_data`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn field_data_rva(&self) -> u32 {
        align(self.code_rva + self.code.len() as u32, 8)
    }
}

/// `value` rounded up to a multiple of `alignment`, a power of two.
pub(crate) fn align(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{MethodBody, OpCode, Operand},
        metadata::signatures::{FieldSig, MethodSig, TypeSig},
        model::{flags::TypeAttributes, InterfaceImpl},
    };

    fn table(builder: &TableBuilder<'_>, table: TableId) -> Vec<Vec<u32>> {
        let raw = &builder.emitter.tables[table as usize];
        (1..=raw.len()).map(|row| raw.row(row).unwrap().to_vec()).collect()
    }

    #[test]
    fn module_type_is_row_one_and_lists_are_contiguous() {
        let mut graph = ModuleGraph::new("Demo.dll");
        let object = graph.object_type();
        let program = graph.add_type("Demo", "Program", TypeAttributes::PUBLIC, Some(object));
        graph.add_field(program, "a", FieldAttributes::PUBLIC, FieldSig { ty: TypeSig::I4 });
        graph.add_field(program, "b", FieldAttributes::PUBLIC, FieldSig { ty: TypeSig::String });
        let run = graph.add_method(
            program,
            "Run",
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            MethodSig::new_static(TypeSig::Void, vec![]),
        );
        let mut body = MethodBody::new();
        body.push(OpCode::RET, Operand::None);
        graph[run].body = Some(body);

        let options = WriterOptions::default();
        let builder = TableBuilder::build(&graph, &options, 0x2050).unwrap();

        let types = table(&builder, TableId::TypeDef);
        assert_eq!(types.len(), 2);
        // <Module>: no fields, no methods, lists start at row 1
        assert_eq!(&types[0][4..], &[1, 1]);
        assert_eq!(&types[1][4..], &[1, 1]);
        assert_eq!(table(&builder, TableId::Field).len(), 2);

        let methods = table(&builder, TableId::MethodDef);
        assert_eq!(methods[0][0], 0x2050);
        // tiny header plus `ret`
        assert_eq!(builder.code, vec![0x06, 0x2A]);
    }

    #[test]
    fn interface_rows_are_sorted_before_attributes_point_at_them() {
        let mut graph = ModuleGraph::new("Demo.dll");
        let first = graph.add_type("Demo", "IFirst", TypeAttributes::INTERFACE, None);
        let second = graph.add_type("Demo", "ISecond", TypeAttributes::INTERFACE, None);
        let class = graph.add_type("Demo", "Class", 0, None);
        for interface in [second, first] {
            graph[class].interfaces.push(InterfaceImpl {
                interface: TypeHandle::Def(interface),
                custom_attributes: Vec::new(),
            });
        }

        let options = WriterOptions::default();
        let builder = TableBuilder::build(&graph, &options, 0x2050).unwrap();
        let interfaces = table(&builder, TableId::InterfaceImpl);
        let coded = |row| CodedIndexType::TypeDefOrRef.encode(TableId::TypeDef, row).unwrap();
        // class is row 4, IFirst row 2, ISecond row 3
        assert_eq!(interfaces, vec![vec![4, coded(2)], vec![4, coded(3)]]);
    }

    #[test]
    fn missing_owner_rows_abort_the_write() {
        let mut graph = ModuleGraph::new("Demo.dll");
        let program = graph.add_type("Demo", "Program", 0, None);
        let gone = graph.add_type("Demo", "Gone", 0, None);
        graph[program].extends = Some(TypeHandle::Def(gone));
        graph.detach_type(gone);

        let options = WriterOptions::default();
        assert!(matches!(
            TableBuilder::build(&graph, &options, 0x2050),
            Err(Error::Encode { .. })
        ));
    }

    #[test]
    fn alignment() {
        assert_eq!(align(0x2051, 8), 0x2058);
        assert_eq!(align(0x2058, 8), 0x2058);
        assert_eq!(align(1, 0x200), 0x200);
    }
}
