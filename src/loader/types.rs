//! Module, references, type definitions and their members.

use log::warn;

use crate::{
    loader::context::Loader,
    metadata::{
        method::{MethodAttributes, MethodImplAttributes},
        signatures::{parse_field_signature, parse_method_signature, FieldSig, MethodSig, TypeSig},
        tables::{CodedIndexType, TableId},
    },
    model::{
        AssemblyDef, AssemblyRef, AssemblyVersion, ClassLayout, FieldDef, GenericParam,
        GenericParamConstraint, GenericParamOwner, InterfaceImpl, MethodDef, ParamDef, TypeDef,
        TypeId,
    },
    Error, Result,
};

/// Whether following the enclosing links from `start` leads back to `start`.
fn nests_in_itself(enclosing: &[Option<usize>], start: usize) -> bool {
    let mut current = enclosing[start];
    for _ in 0..enclosing.len() {
        match current {
            Some(index) if index == start => return true,
            Some(index) => current = enclosing.get(index).copied().flatten(),
            None => return false,
        }
    }
    true
}

impl Loader<'_> {
    #[allow(clippy::cast_possible_truncation)]
    pub fn load_module(&mut self) -> Result<()> {
        if self.count(TableId::Module) == 0 {
            return Err(malformed_error!("Image has no Module row"));
        }
        let [generation, name, mvid, _enc_id, _enc_base_id] = self.row(TableId::Module, 1)?;
        self.graph.module.generation = generation as u16;
        self.graph.module.name = self.string(name)?;
        self.graph.module.mvid = self.guid(mvid)?;

        if self.count(TableId::Assembly) > 0 {
            let [hash_algorithm, major, minor, build, revision, flags, public_key, name, culture] =
                self.row(TableId::Assembly, 1)?;
            self.graph.assembly = Some(AssemblyDef {
                name: self.string(name)?,
                culture: self.string(culture)?,
                version: AssemblyVersion {
                    major: major as u16,
                    minor: minor as u16,
                    build: build as u16,
                    revision: revision as u16,
                },
                flags,
                hash_algorithm,
                public_key: self.blob(public_key)?.to_vec(),
                security: Vec::new(),
                custom_attributes: Vec::new(),
            });
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn load_references(&mut self) -> Result<()> {
        for row in 1..=self.count(TableId::AssemblyRef) {
            let [major, minor, build, revision, flags, public_key_or_token, name, culture, hash_value] =
                self.row(TableId::AssemblyRef, row)?;
            let assembly_ref = AssemblyRef {
                name: self.string(name)?,
                culture: self.string(culture)?,
                version: AssemblyVersion {
                    major: major as u16,
                    minor: minor as u16,
                    build: build as u16,
                    revision: revision as u16,
                },
                flags,
                public_key_or_token: self.blob(public_key_or_token)?.to_vec(),
                hash_value: self.blob(hash_value)?.to_vec(),
                custom_attributes: Vec::new(),
            };
            let id = self.graph.add_assembly_ref(assembly_ref);
            self.rows.assembly_refs.push(id);
        }

        for row in 1..=self.count(TableId::ModuleRef) {
            let [name] = self.row(TableId::ModuleRef, row)?;
            let name = self.string(name)?;
            let id = self.graph.add_module_ref(&name);
            self.rows.module_refs.push(id);
        }

        self.rows.type_refs = vec![None; self.count(TableId::TypeRef) as usize];
        for row in 1..=self.count(TableId::TypeRef) {
            let result = self.type_ref(row, 0).map(|_| ());
            self.recover(result, &format!("TypeRef row {}", row), || ())?;
        }
        Ok(())
    }

    /// Type shells first, so signatures can name any type; then members per type.
    pub fn load_types(&mut self) -> Result<()> {
        let type_count = self.count(TableId::TypeDef);
        if type_count == 0 {
            return Err(malformed_error!("Image has no <Module> type"));
        }
        self.rows.fields = vec![None; self.count(TableId::Field) as usize];
        self.rows.methods = vec![None; self.count(TableId::MethodDef) as usize];
        self.rows.params = vec![None; self.count(TableId::Param) as usize];

        for row in 1..=type_count {
            let [flags, name, namespace, _, _, _] = self.row(TableId::TypeDef, row)?;
            let mut type_def = TypeDef::new(&self.string(namespace)?, &self.string(name)?, flags, None);
            type_def.token = TableId::TypeDef.token(row);
            let id = self.graph.push_type(type_def);
            self.rows.types.push(id);
        }

        for row in 1..=type_count {
            let id = self.rows.types[row as usize - 1];
            let [_, _, _, extends, _, _] = self.row(TableId::TypeDef, row)?;
            let result = self.type_def_or_ref(extends);
            let extends = self.recover(result, &format!("base type of {}", self.graph.full_name(id)), || None)?;
            self.graph[id].extends = extends;

            for field_row in self.member_list(TableId::TypeDef, row, 4, TableId::Field, TableId::FieldPtr)? {
                self.load_field(id, field_row)?;
            }
            for method_row in
                self.member_list(TableId::TypeDef, row, 5, TableId::MethodDef, TableId::MethodPtr)?
            {
                self.load_method(id, method_row)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn load_field(&mut self, owner: TypeId, row: u32) -> Result<()> {
        let token = TableId::Field.token(row);
        let [flags, name, signature] = self.row(TableId::Field, row)?;
        let name = self.string(name)?;
        let blob = self.blob(signature)?;
        let result = parse_field_signature(blob, self);
        let signature = self.recover(result, &format!("signature of field {}", name), || FieldSig {
            ty: TypeSig::Object,
        })?;

        let id = self.graph.push_field(FieldDef {
            flags: flags as u16,
            name,
            signature,
            declaring_type: Some(owner),
            constant: None,
            marshal: None,
            offset: None,
            initial_value: None,
            custom_attributes: Vec::new(),
            token,
        });
        self.graph[owner].fields.push(id);
        match self.rows.fields.get_mut(row as usize - 1) {
            Some(slot) => *slot = Some(id),
            None => return Err(Error::InvalidToken(token)),
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn load_method(&mut self, owner: TypeId, row: u32) -> Result<()> {
        let token = TableId::MethodDef.token(row);
        let [rva, impl_flags, flags, name, signature, _] = self.row(TableId::MethodDef, row)?;
        let name = self.string(name)?;
        let blob = self.blob(signature)?;
        let result = parse_method_signature(blob, self);
        let signature = self.recover(result, &format!("signature of method {}", name), || {
            MethodSig::new_static(TypeSig::Void, Vec::new())
        })?;

        let id = self.graph.push_method(MethodDef {
            flags: MethodAttributes::from_bits_retain(flags as u16),
            impl_flags: MethodImplAttributes::from_bits_retain(impl_flags as u16),
            name,
            signature,
            declaring_type: Some(owner),
            params: Vec::new(),
            generic_params: Vec::new(),
            body: None,
            pinvoke: None,
            security: Vec::new(),
            custom_attributes: Vec::new(),
            token,
        });
        self.graph[owner].methods.push(id);
        match self.rows.methods.get_mut(row as usize - 1) {
            Some(slot) => *slot = Some(id),
            None => return Err(Error::InvalidToken(token)),
        }
        if rva != 0 {
            self.bodies.push((id, rva));
        }

        for param_row in self.member_list(TableId::MethodDef, row, 5, TableId::Param, TableId::ParamPtr)? {
            let [flags, sequence, name] = self.row(TableId::Param, param_row)?;
            let param = ParamDef {
                sequence: sequence as u16,
                flags: flags as u16,
                name: self.string(name)?,
                constant: None,
                marshal: None,
                custom_attributes: Vec::new(),
            };
            let params = &mut self.graph[id].params;
            params.push(param);
            let index = params.len() - 1;
            if let Some(slot) = self.rows.params.get_mut(param_row as usize - 1) {
                *slot = Some((id, index));
            }
        }
        Ok(())
    }

    /// Attach nested types to their enclosers; everything else becomes top-level,
    /// `<Module>` first.
    pub fn load_nesting(&mut self) -> Result<()> {
        let mut enclosing: Vec<Option<usize>> = vec![None; self.rows.types.len()];
        for row in 1..=self.count(TableId::NestedClass) {
            let [nested, outer] = self.row(TableId::NestedClass, row)?;
            let (nested, outer) = (nested as usize, outer as usize);
            if nested == 0 || outer == 0 || nested > enclosing.len() || outer > enclosing.len() {
                return Err(malformed_error!("NestedClass row {} names a missing type", row));
            }
            enclosing[nested - 1] = Some(outer - 1);
        }

        for index in 0..enclosing.len() {
            if enclosing[index].is_some() && nests_in_itself(&enclosing, index) {
                warn!(
                    "Type {} is nested in itself; treating it as top-level",
                    self.graph.full_name(self.rows.types[index])
                );
                enclosing[index] = None;
            }
        }

        for (index, outer) in enclosing.iter().enumerate() {
            let id = self.rows.types[index];
            match outer {
                Some(outer) => {
                    let parent = self.rows.types[*outer];
                    self.graph[id].declaring_type = Some(parent);
                    self.graph[parent].nested_types.push(id);
                }
                None => self.graph.push_top_level(id),
            }
        }
        Ok(())
    }

    pub(super) fn generic_params_mut(&mut self, owner: GenericParamOwner) -> &mut Vec<GenericParam> {
        match owner {
            GenericParamOwner::Type(id) => &mut self.graph[id].generic_params,
            GenericParamOwner::Method(id) => &mut self.graph[id].generic_params,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn load_generic_params(&mut self) -> Result<()> {
        self.rows.generic_params = vec![None; self.count(TableId::GenericParam) as usize];
        for row in 1..=self.count(TableId::GenericParam) {
            let [number, flags, owner, name] = self.row(TableId::GenericParam, row)?;
            let token = CodedIndexType::TypeOrMethodDef.decode(owner)?;
            let owner = match TableId::from_u8(token.table()) {
                Some(TableId::TypeDef) => GenericParamOwner::Type(self.type_def(token)?),
                Some(TableId::MethodDef) => GenericParamOwner::Method(self.method_def(token)?),
                _ => return Err(Error::InvalidToken(token)),
            };
            let param = GenericParam {
                number: number as u16,
                flags: flags as u16,
                name: self.string(name)?,
                constraints: Vec::new(),
                custom_attributes: Vec::new(),
            };
            let params = self.generic_params_mut(owner);
            params.push(param);
            let index = params.len() - 1;
            self.rows.generic_params[row as usize - 1] = Some((owner, index));
        }

        self.rows.constraints = vec![None; self.count(TableId::GenericParamConstraint) as usize];
        for row in 1..=self.count(TableId::GenericParamConstraint) {
            let [param, constraint] = self.row(TableId::GenericParamConstraint, row)?;
            let Some((owner, index)) = self
                .rows
                .generic_params
                .get((param as usize).wrapping_sub(1))
                .copied()
                .flatten()
            else {
                return Err(malformed_error!(
                    "GenericParamConstraint row {} names missing GenericParam {}",
                    row,
                    param
                ));
            };
            let result = self.type_def_or_ref(constraint);
            let Some(constraint) = self.recover(result, &format!("generic constraint row {}", row), || None)?
            else {
                continue;
            };

            let constraints = &mut self.generic_params_mut(owner)[index].constraints;
            constraints.push(GenericParamConstraint {
                constraint,
                custom_attributes: Vec::new(),
            });
            let position = constraints.len() - 1;
            self.rows.constraints[row as usize - 1] = Some((owner, index, position));
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn load_interfaces_and_layouts(&mut self) -> Result<()> {
        self.rows.interface_impls = vec![None; self.count(TableId::InterfaceImpl) as usize];
        for row in 1..=self.count(TableId::InterfaceImpl) {
            let [class, interface] = self.row(TableId::InterfaceImpl, row)?;
            let owner = self.type_def(TableId::TypeDef.token(class))?;
            let result = self.type_def_or_ref(interface);
            let Some(interface) = self.recover(result, &format!("interface of {}", self.graph.full_name(owner)), || None)?
            else {
                continue;
            };
            let interfaces = &mut self.graph[owner].interfaces;
            interfaces.push(InterfaceImpl {
                interface,
                custom_attributes: Vec::new(),
            });
            let index = interfaces.len() - 1;
            self.rows.interface_impls[row as usize - 1] = Some((owner, index));
        }

        for row in 1..=self.count(TableId::ClassLayout) {
            let [packing_size, class_size, parent] = self.row(TableId::ClassLayout, row)?;
            let owner = self.type_def(TableId::TypeDef.token(parent))?;
            self.graph[owner].layout = Some(ClassLayout {
                packing_size: packing_size as u16,
                class_size,
            });
        }

        for row in 1..=self.count(TableId::FieldLayout) {
            let [offset, field] = self.row(TableId::FieldLayout, row)?;
            let field = self.field_def(TableId::Field.token(field))?;
            self.graph[field].offset = Some(offset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::nests_in_itself;

    #[test]
    fn nesting_cycles_are_detected() {
        // 0 <- 1 <- 2, and 3 <-> 4
        let enclosing = [None, Some(0), Some(1), Some(4), Some(3)];
        assert!(!nests_in_itself(&enclosing, 2));
        assert!(!nests_in_itself(&enclosing, 0));
        assert!(nests_in_itself(&enclosing, 3));
        assert!(nests_in_itself(&enclosing, 4));
    }
}
