//! Member references, properties and events, and the tables that decorate members.

use log::warn;

use crate::{
    loader::context::{Loader, SecurityOwner},
    metadata::{
        signatures::{
            parse_field_signature, parse_method_signature, parse_property_signature,
            PropertySig, TypeSig, SIGNATURE_HEADER,
        },
        tables::{CodedIndexType, TableId},
    },
    model::{
        flags::MethodSemanticsAttributes, Constant, EventDef, MemberRefParent, MemberRefSig,
        MethodImpl, PInvokeMap, PropertyDef, SecurityDecl, TypeHandle,
    },
    Error, Result,
};

impl Loader<'_> {
    pub fn load_member_refs(&mut self) -> Result<()> {
        self.rows.member_refs = vec![None; self.count(TableId::MemberRef) as usize];
        for row in 1..=self.count(TableId::MemberRef) {
            let result = self.load_member_ref(row);
            self.recover(result, &format!("MemberRef row {}", row), || ())?;
        }
        Ok(())
    }

    fn load_member_ref(&mut self, row: u32) -> Result<()> {
        let [parent, name, signature] = self.row(TableId::MemberRef, row)?;
        let token = CodedIndexType::MemberRefParent.decode(parent)?;
        let parent = match TableId::from_u8(token.table()) {
            Some(TableId::TypeDef | TableId::TypeRef | TableId::TypeSpec) => {
                MemberRefParent::Type(self.type_handle_at(token, 0)?)
            }
            Some(TableId::ModuleRef) => MemberRefParent::ModuleRef(self.module_ref(token)?),
            Some(TableId::MethodDef) => MemberRefParent::Method(self.method_def(token)?),
            _ => return Err(Error::InvalidToken(token)),
        };

        let name = self.string(name)?;
        let blob = self.blob(signature)?;
        let signature = if blob.first() == Some(&SIGNATURE_HEADER::FIELD) {
            MemberRefSig::Field(parse_field_signature(blob, self)?)
        } else {
            MemberRefSig::Method(parse_method_signature(blob, self)?)
        };

        let id = self.graph.add_member_ref(parent, &name, signature);
        self.rows.member_refs[row as usize - 1] = Some(id);
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn load_properties_and_events(&mut self) -> Result<()> {
        self.rows.properties = vec![None; self.count(TableId::Property) as usize];
        for map_row in 1..=self.count(TableId::PropertyMap) {
            let [parent, _] = self.row(TableId::PropertyMap, map_row)?;
            let owner = self.type_def(TableId::TypeDef.token(parent))?;
            for row in self.member_list(
                TableId::PropertyMap,
                map_row,
                1,
                TableId::Property,
                TableId::PropertyPtr,
            )? {
                let [flags, name, signature] = self.row(TableId::Property, row)?;
                let name = self.string(name)?;
                let blob = self.blob(signature)?;
                let result = parse_property_signature(blob, self);
                let signature = self.recover(result, &format!("signature of property {}", name), || {
                    PropertySig {
                        has_this: true,
                        ty: TypeSig::Object,
                        params: Vec::new(),
                    }
                })?;

                let id = self.graph.push_property(PropertyDef {
                    flags: flags as u16,
                    name,
                    signature,
                    declaring_type: Some(owner),
                    getter: None,
                    setter: None,
                    others: Vec::new(),
                    constant: None,
                    custom_attributes: Vec::new(),
                    token: TableId::Property.token(row),
                });
                self.graph[owner].properties.push(id);
                if let Some(slot) = self.rows.properties.get_mut(row as usize - 1) {
                    *slot = Some(id);
                }
            }
        }

        self.rows.events = vec![None; self.count(TableId::Event) as usize];
        for map_row in 1..=self.count(TableId::EventMap) {
            let [parent, _] = self.row(TableId::EventMap, map_row)?;
            let owner = self.type_def(TableId::TypeDef.token(parent))?;
            for row in
                self.member_list(TableId::EventMap, map_row, 1, TableId::Event, TableId::EventPtr)?
            {
                let [flags, name, event_type] = self.row(TableId::Event, row)?;
                let name = self.string(name)?;
                let result = self.type_def_or_ref(event_type);
                let event_type = self.recover(result, &format!("type of event {}", name), || None)?;

                let id = self.graph.push_event(EventDef {
                    flags: flags as u16,
                    name,
                    event_type,
                    declaring_type: Some(owner),
                    add_method: None,
                    remove_method: None,
                    fire_method: None,
                    others: Vec::new(),
                    custom_attributes: Vec::new(),
                    token: TableId::Event.token(row),
                });
                self.graph[owner].events.push(id);
                if let Some(slot) = self.rows.events.get_mut(row as usize - 1) {
                    *slot = Some(id);
                }
            }
        }
        Ok(())
    }

    /// Link accessors to the properties and events they implement.
    #[allow(clippy::cast_possible_truncation)]
    pub fn load_semantics(&mut self) -> Result<()> {
        for row in 1..=self.count(TableId::MethodSemantics) {
            let [semantics, method, association] = self.row(TableId::MethodSemantics, row)?;
            let method = self.method_def(TableId::MethodDef.token(method))?;
            let semantics = semantics as u16;
            let token = CodedIndexType::HasSemantics.decode(association)?;

            match TableId::from_u8(token.table()) {
                Some(TableId::Property) => {
                    let id = self.property(token)?;
                    let property = &mut self.graph[id];
                    match semantics {
                        MethodSemanticsAttributes::GETTER => property.getter = Some(method),
                        MethodSemanticsAttributes::SETTER => property.setter = Some(method),
                        _ => property.others.push(method),
                    }
                }
                Some(TableId::Event) => {
                    let id = self.event(token)?;
                    let event = &mut self.graph[id];
                    match semantics {
                        MethodSemanticsAttributes::ADD_ON => event.add_method = Some(method),
                        MethodSemanticsAttributes::REMOVE_ON => event.remove_method = Some(method),
                        MethodSemanticsAttributes::FIRE => event.fire_method = Some(method),
                        _ => event.others.push(method),
                    }
                }
                _ => return Err(Error::InvalidToken(token)),
            }
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn load_constants_and_marshalling(&mut self) -> Result<()> {
        for row in 1..=self.count(TableId::Constant) {
            let [element_type, parent, value] = self.row(TableId::Constant, row)?;
            let constant = Some(Constant {
                element_type: (element_type & 0xFF) as u8,
                value: self.blob(value)?.to_vec(),
            });
            let token = CodedIndexType::HasConstant.decode(parent)?;
            match TableId::from_u8(token.table()) {
                Some(TableId::Field) => {
                    let field = self.field_def(token)?;
                    self.graph[field].constant = constant;
                }
                Some(TableId::Param) => {
                    let (method, index) = self.param(token)?;
                    self.graph[method].params[index].constant = constant;
                }
                Some(TableId::Property) => {
                    let property = self.property(token)?;
                    self.graph[property].constant = constant;
                }
                _ => return Err(Error::InvalidToken(token)),
            }
        }

        for row in 1..=self.count(TableId::FieldMarshal) {
            let [parent, native_type] = self.row(TableId::FieldMarshal, row)?;
            let marshal = Some(self.blob(native_type)?.to_vec());
            let token = CodedIndexType::HasFieldMarshal.decode(parent)?;
            match TableId::from_u8(token.table()) {
                Some(TableId::Field) => {
                    let field = self.field_def(token)?;
                    self.graph[field].marshal = marshal;
                }
                Some(TableId::Param) => {
                    let (method, index) = self.param(token)?;
                    self.graph[method].params[index].marshal = marshal;
                }
                _ => return Err(Error::InvalidToken(token)),
            }
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn load_security(&mut self) -> Result<()> {
        self.rows.security = vec![None; self.count(TableId::DeclSecurity) as usize];
        for row in 1..=self.count(TableId::DeclSecurity) {
            let [action, parent, permission_set] = self.row(TableId::DeclSecurity, row)?;
            let declaration = SecurityDecl {
                action: action as u16,
                permission_set: self.blob(permission_set)?.to_vec(),
                custom_attributes: Vec::new(),
            };
            let token = CodedIndexType::HasDeclSecurity.decode(parent)?;
            let (owner, list) = match TableId::from_u8(token.table()) {
                Some(TableId::TypeDef) => {
                    let id = self.type_def(token)?;
                    (SecurityOwner::Type(id), &mut self.graph[id].security)
                }
                Some(TableId::MethodDef) => {
                    let id = self.method_def(token)?;
                    (SecurityOwner::Method(id), &mut self.graph[id].security)
                }
                Some(TableId::Assembly) => match self.graph.assembly.as_mut() {
                    Some(assembly) => (SecurityOwner::Assembly, &mut assembly.security),
                    None => {
                        warn!("DeclSecurity row {} targets a missing assembly row; dropped", row);
                        continue;
                    }
                },
                _ => return Err(Error::InvalidToken(token)),
            };
            list.push(declaration);
            let index = list.len() - 1;
            self.rows.security[row as usize - 1] = Some((owner, index));
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn load_pinvoke_and_overrides(&mut self) -> Result<()> {
        for row in 1..=self.count(TableId::ImplMap) {
            let [flags, member, import_name, scope] = self.row(TableId::ImplMap, row)?;
            let token = CodedIndexType::MemberForwarded.decode(member)?;
            if TableId::from_u8(token.table()) != Some(TableId::MethodDef) {
                warn!("ImplMap row {} forwards a field; dropped", row);
                continue;
            }
            let method = self.method_def(token)?;
            let pinvoke = PInvokeMap {
                flags: flags as u16,
                import_name: self.string(import_name)?,
                module: self.module_ref(TableId::ModuleRef.token(scope))?,
            };
            self.graph[method].pinvoke = Some(pinvoke);
        }

        for row in 1..=self.count(TableId::MethodImpl) {
            let [class, body, declaration] = self.row(TableId::MethodImpl, row)?;
            let owner = self.type_def(TableId::TypeDef.token(class))?;
            let result = CodedIndexType::MethodDefOrRef
                .decode(body)
                .and_then(|token| self.method_handle(token))
                .and_then(|body| {
                    let declaration = CodedIndexType::MethodDefOrRef.decode(declaration)?;
                    Ok(MethodImpl {
                        body,
                        declaration: self.method_handle(declaration)?,
                    })
                });
            let what = format!("override in {}", self.graph.full_name(owner));
            if let Some(method_impl) = self.recover(result.map(Some), &what, || None)? {
                self.graph[owner].method_impls.push(method_impl);
            }
        }
        Ok(())
    }

    /// Initial data of RVA-backed fields.
    pub fn load_field_data(&mut self) -> Result<()> {
        let mut entries = Vec::with_capacity(self.count(TableId::FieldRVA) as usize);
        for row in 1..=self.count(TableId::FieldRVA) {
            let [rva, field] = self.row(TableId::FieldRVA, row)?;
            entries.push((rva, self.field_def(TableId::Field.token(field))?));
        }
        let mut starts: Vec<u32> = entries.iter().map(|(rva, _)| *rva).collect();
        starts.sort_unstable();
        starts.dedup();

        for (rva, field) in entries {
            let size = match self.value_size(&self.graph[field].signature.ty) {
                Some(size) => size,
                None => {
                    let next = starts.iter().find(|start| **start > rva).copied();
                    let section_end = self
                        .file
                        .section_containing(rva)
                        .map(|(address, _, raw_size)| address + raw_size);
                    let end = match (next, section_end) {
                        (Some(next), Some(section_end)) => next.min(section_end),
                        (Some(end), None) | (None, Some(end)) => end,
                        (None, None) => rva,
                    };
                    let size = end.saturating_sub(rva) as usize;
                    warn!(
                        "Size of the initial value of {} is unknown; keeping {} bytes",
                        self.graph.field_full_name(field),
                        size
                    );
                    size
                }
            };
            let data = self.file.rva_slice(rva, size)?.to_vec();
            self.graph[field].initial_value = Some(data);
        }
        Ok(())
    }

    /// Size in bytes of a value of type `ty`, when the image says so.
    fn value_size(&self, ty: &TypeSig) -> Option<usize> {
        let pointer = if self.graph.image.pe32_plus { 8 } else { 4 };
        match ty.strip_modifiers() {
            TypeSig::Boolean | TypeSig::I1 | TypeSig::U1 => Some(1),
            TypeSig::Char | TypeSig::I2 | TypeSig::U2 => Some(2),
            TypeSig::I4 | TypeSig::U4 | TypeSig::R4 => Some(4),
            TypeSig::I8 | TypeSig::U8 | TypeSig::R8 => Some(8),
            TypeSig::I | TypeSig::U | TypeSig::Ptr(_) | TypeSig::FnPtr(_) => Some(pointer),
            TypeSig::ValueType(TypeHandle::Def(id)) => self.graph[*id]
                .layout
                .map(|layout| layout.class_size as usize)
                .filter(|size| *size > 0),
            _ => None,
        }
    }
}
