//! Token emission for one write.
//!
//! Definition rows are assigned up front, so any definition can be referenced
//! before its row is written. Reference and specification rows are created the
//! first time something needs them and shared from then on.

use std::collections::HashMap;

use strum::IntoEnumIterator;
use widestring::U16String;

use crate::{
    assembly::OperandEmitter,
    metadata::{
        signatures::{
            encode_field_signature, encode_local_var_signature, encode_method_signature,
            encode_method_spec_signature, encode_typespec_signature, LocalVarSig, MethodSig,
            MethodSpecSig, TypeSig, TypeTokenEmitter, MAX_RECURSION_DEPTH,
        },
        streams::RawTable,
        tables::{columns, CodedIndexType, TableId},
        token::{Token, USER_STRING_TABLE},
    },
    model::{
        FieldHandle, FieldId, MemberDef, MemberRef, MemberRefId, MemberRefParent, MemberRefSig,
        MethodHandle, MethodId, ModuleGraph, ResolutionScope, TypeHandle, TypeId, TypeRefId,
    },
    project::ResolutionCache,
    writer::heaps::{BlobHeap, GuidHeap, StringHeap, UserStringHeap},
    Error, Result,
};

/// 1-based row of the arena entry at `index`, for tables written in arena order.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn row_of(index: usize) -> u32 {
    index as u32 + 1
}

pub(crate) struct Emitter<'g> {
    pub graph: &'g ModuleGraph,
    cache: Option<&'g ResolutionCache>,
    pub strings: StringHeap,
    pub blobs: BlobHeap,
    pub guids: GuidHeap,
    pub user_strings: UserStringHeap,
    pub tables: Vec<RawTable>,
    pub type_rows: HashMap<TypeId, u32>,
    pub method_rows: HashMap<MethodId, u32>,
    pub field_rows: HashMap<FieldId, u32>,
    type_refs: HashMap<TypeRefId, Token>,
    type_ref_rows: HashMap<(u32, &'g str, &'g str), u32>,
    member_refs: HashMap<MemberRefId, Token>,
    member_ref_rows: HashMap<(u32, &'g str, u32), u32>,
    type_specs: HashMap<u32, u32>,
    method_specs: HashMap<(u32, u32), u32>,
    stand_alone_sigs: HashMap<u32, u32>,
}

impl<'g> Emitter<'g> {
    pub fn new(graph: &'g ModuleGraph, cache: Option<&'g ResolutionCache>) -> Self {
        Emitter {
            graph,
            cache,
            strings: StringHeap::new(),
            blobs: BlobHeap::new(),
            guids: GuidHeap::new(),
            user_strings: UserStringHeap::new(),
            tables: TableId::iter()
                .map(|table| RawTable::new(columns(table).len()))
                .collect(),
            type_rows: HashMap::new(),
            method_rows: HashMap::new(),
            field_rows: HashMap::new(),
            type_refs: HashMap::new(),
            type_ref_rows: HashMap::new(),
            member_refs: HashMap::new(),
            member_ref_rows: HashMap::new(),
            type_specs: HashMap::new(),
            method_specs: HashMap::new(),
            stand_alone_sigs: HashMap::new(),
        }
    }

    /// Append a row and return its 1-based index.
    pub fn push(&mut self, table: TableId, row: &[u32]) -> u32 {
        self.tables[table as usize].push(row)
    }

    /// Rows written so far.
    pub fn rows(&self, table: TableId) -> u32 {
        self.tables[table as usize].len()
    }

    pub fn type_def_token(&self, id: TypeId) -> Result<Token> {
        match self.type_rows.get(&id) {
            Some(row) => Ok(TableId::TypeDef.token(*row)),
            None => Err(encode_error!(
                self.graph.get_type(id).map_or_else(|| id.to_string(), |t| t.name.clone()),
                "type is not reachable from the module's type list"
            )),
        }
    }

    pub fn method_def_token(&self, id: MethodId) -> Result<Token> {
        match self.method_rows.get(&id) {
            Some(row) => Ok(TableId::MethodDef.token(*row)),
            None => Err(encode_error!(
                self.graph.get_method(id).map_or_else(|| id.to_string(), |m| m.name.clone()),
                "method is not owned by an emitted type"
            )),
        }
    }

    pub fn field_def_token(&self, id: FieldId) -> Result<Token> {
        match self.field_rows.get(&id) {
            Some(row) => Ok(TableId::Field.token(*row)),
            None => Err(encode_error!(
                self.graph.get_field(id).map_or_else(|| id.to_string(), |f| f.name.clone()),
                "field is not owned by an emitted type"
            )),
        }
    }

    /// The emitted type a reference names, when it names one of this image.
    fn local_type(&self, id: TypeRefId) -> Option<TypeId> {
        let local = self.graph.resolve_type_ref(id)?;
        self.type_rows.contains_key(&local).then_some(local)
    }

    /// Name of the assembly a reference resolves in, following enclosing references.
    fn reference_assembly(&self, id: TypeRefId) -> Option<&'g str> {
        let graph = self.graph;
        let mut current = id;
        for _ in 0..MAX_RECURSION_DEPTH {
            match graph.get_type_ref(current)?.scope {
                ResolutionScope::Nested(outer) => current = outer,
                ResolutionScope::AssemblyRef(assembly_ref) => {
                    return graph.get_assembly_ref(assembly_ref).map(|r| r.name.as_str())
                }
                _ => return None,
            }
        }
        None
    }

    fn type_ref_token(&mut self, id: TypeRefId, depth: usize) -> Result<Token> {
        if let Some(token) = self.type_refs.get(&id) {
            return Ok(*token);
        }
        if depth >= MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimit(MAX_RECURSION_DEPTH));
        }
        if let Some(local) = self.local_type(id) {
            let token = self.type_def_token(local)?;
            self.type_refs.insert(id, token);
            return Ok(token);
        }

        let graph = self.graph;
        let type_ref = graph
            .get_type_ref(id)
            .ok_or_else(|| encode_error!(id, "type reference does not exist"))?;
        let scope = match type_ref.scope {
            ResolutionScope::Module => CodedIndexType::ResolutionScope.encode(TableId::Module, 1)?,
            ResolutionScope::ModuleRef(module_ref) => CodedIndexType::ResolutionScope
                .encode(TableId::ModuleRef, row_of(module_ref.index()))?,
            ResolutionScope::AssemblyRef(assembly_ref) => CodedIndexType::ResolutionScope
                .encode(TableId::AssemblyRef, row_of(assembly_ref.index()))?,
            ResolutionScope::Nested(outer) => {
                let outer = self.type_ref_token(outer, depth + 1)?;
                if TableId::from_u8(outer.table()) != Some(TableId::TypeRef) {
                    return Err(encode_error!(
                        graph.type_ref_full_name(id),
                        "is nested in a local type that does not declare it"
                    ));
                }
                CodedIndexType::ResolutionScope.encode_token(outer)?
            }
            ResolutionScope::None => 0,
        };

        let key = (scope, type_ref.namespace.as_str(), type_ref.name.as_str());
        let row = match self.type_ref_rows.get(&key) {
            Some(row) => *row,
            None => {
                let name = self.strings.add(&type_ref.name);
                let namespace = self.strings.add(&type_ref.namespace);
                let row = self.push(TableId::TypeRef, &[scope, name, namespace]);
                self.type_ref_rows.insert(key, row);
                row
            }
        };
        let token = TableId::TypeRef.token(row);
        self.type_refs.insert(id, token);
        Ok(token)
    }

    fn type_spec_token(&mut self, sig: &TypeSig) -> Result<Token> {
        let blob = encode_typespec_signature(sig, self)?;
        let blob = self.blobs.add(&blob)?;
        let row = match self.type_specs.get(&blob) {
            Some(row) => *row,
            None => {
                let row = self.push(TableId::TypeSpec, &[blob]);
                self.type_specs.insert(blob, row);
                row
            }
        };
        Ok(TableId::TypeSpec.token(row))
    }

    /// Token of any type handle.
    pub fn type_handle_token(&mut self, handle: &TypeHandle) -> Result<Token> {
        match handle {
            TypeHandle::Def(id) => self.type_def_token(*id),
            TypeHandle::Ref(id) => self.type_ref_token(*id, 0),
            TypeHandle::Spec(sig) => self.type_spec_token(sig),
        }
    }

    /// `TypeDefOrRef` coded value of a handle; 0 for `None`.
    pub fn type_def_or_ref(&mut self, handle: Option<&TypeHandle>) -> Result<u32> {
        match handle {
            Some(handle) => {
                let token = self.type_handle_token(handle)?;
                CodedIndexType::TypeDefOrRef.encode_token(token)
            }
            None => Ok(0),
        }
    }

    fn value_type(&self, handle: &TypeHandle) -> Option<bool> {
        if let Some(known) = self.graph.is_value_type(handle) {
            return Some(known);
        }
        let id = handle.reference()?;
        if let Some(local) = self.local_type(id) {
            return self.graph.is_value_type(&TypeHandle::Def(local));
        }
        let assembly = self.reference_assembly(id)?;
        self.cache?
            .is_value_type(assembly, &self.graph.type_ref_serialized_name(id))
    }

    fn member_signature(&mut self, signature: &MemberRefSig) -> Result<Vec<u8>> {
        match signature {
            MemberRefSig::Method(sig) => encode_method_signature(sig, self),
            MemberRefSig::Field(sig) => encode_field_signature(sig, self),
        }
    }

    /// The definition token a member reference collapses to: its local definition,
    /// when the parent names the emitted owner directly rather than through a generic
    /// instance. Vararg call sites keep their reference, since it carries the extra
    /// arguments.
    fn local_member(&self, member: &MemberRef, definition: MemberDef) -> Result<Option<Token>> {
        let MemberRefParent::Type(parent) = &member.parent else {
            return Ok(None);
        };
        let direct = match parent {
            TypeHandle::Def(id) => self.type_rows.contains_key(id),
            TypeHandle::Ref(id) => self.local_type(*id).is_some(),
            TypeHandle::Spec(_) => false,
        };
        if !direct {
            return Ok(None);
        }
        match (definition, &member.signature) {
            (MemberDef::Method(_), MemberRefSig::Method(sig)) if sig.is_vararg() => Ok(None),
            (MemberDef::Method(method), _) if self.method_rows.contains_key(&method) => {
                self.method_def_token(method).map(Some)
            }
            (MemberDef::Field(field), _) if self.field_rows.contains_key(&field) => {
                self.field_def_token(field).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn member_ref_token(&mut self, id: MemberRefId) -> Result<Token> {
        if let Some(token) = self.member_refs.get(&id) {
            return Ok(*token);
        }
        let graph = self.graph;
        let member = graph
            .get_member_ref(id)
            .ok_or_else(|| encode_error!(id, "member reference does not exist"))?;
        let definition = graph.resolve_member_ref(id);
        if let Some(definition) = definition {
            if let Some(token) = self.local_member(member, definition)? {
                self.member_refs.insert(id, token);
                return Ok(token);
            }
        }
        // a bound reference carries its definition's current name
        let name = match definition {
            Some(MemberDef::Method(method)) => graph[method].name.as_str(),
            Some(MemberDef::Field(field)) => graph[field].name.as_str(),
            None => member.name.as_str(),
        };

        let parent = match &member.parent {
            MemberRefParent::Type(handle) => {
                let token = self.type_handle_token(handle)?;
                CodedIndexType::MemberRefParent.encode_token(token)?
            }
            MemberRefParent::ModuleRef(module_ref) => CodedIndexType::MemberRefParent
                .encode(TableId::ModuleRef, row_of(module_ref.index()))?,
            MemberRefParent::Method(method) => {
                let token = self.method_def_token(*method)?;
                CodedIndexType::MemberRefParent.encode_token(token)?
            }
        };
        let signature = self.member_signature(&member.signature)?;
        let blob = self.blobs.add(&signature)?;

        let key = (parent, name, blob);
        let row = match self.member_ref_rows.get(&key) {
            Some(row) => *row,
            None => {
                let name = self.strings.add(name);
                let row = self.push(TableId::MemberRef, &[parent, name, blob]);
                self.member_ref_rows.insert(key, row);
                row
            }
        };
        let token = TableId::MemberRef.token(row);
        self.member_refs.insert(id, token);
        Ok(token)
    }

    /// Token of any method handle; instantiations get a `MethodSpec` row.
    pub fn method_handle_token(&mut self, handle: &MethodHandle) -> Result<Token> {
        match handle {
            MethodHandle::Def(id) => self.method_def_token(*id),
            MethodHandle::Ref(id) => self.member_ref_token(*id),
            MethodHandle::Spec { method, args } => {
                let generic = self.method_handle_token(method)?;
                let generic = CodedIndexType::MethodDefOrRef.encode_token(generic)?;
                let instantiation = encode_method_spec_signature(
                    &MethodSpecSig { args: args.clone() },
                    self,
                )?;
                let blob = self.blobs.add(&instantiation)?;
                let row = match self.method_specs.get(&(generic, blob)) {
                    Some(row) => *row,
                    None => {
                        let row = self.push(TableId::MethodSpec, &[generic, blob]);
                        self.method_specs.insert((generic, blob), row);
                        row
                    }
                };
                Ok(TableId::MethodSpec.token(row))
            }
        }
    }

    pub fn field_handle_token(&mut self, handle: &FieldHandle) -> Result<Token> {
        match handle {
            FieldHandle::Def(id) => self.field_def_token(*id),
            FieldHandle::Ref(id) => {
                if let Some(MemberRefSig::Method(_)) =
                    self.graph.get_member_ref(*id).map(|member| &member.signature)
                {
                    return Err(encode_error!(
                        self.graph[*id].name,
                        "method reference used as a field"
                    ));
                }
                self.member_ref_token(*id)
            }
        }
    }

    fn stand_alone_sig(&mut self, signature: &[u8]) -> Result<Token> {
        let blob = self.blobs.add(signature)?;
        let row = match self.stand_alone_sigs.get(&blob) {
            Some(row) => *row,
            None => {
                let row = self.push(TableId::StandAloneSig, &[blob]);
                self.stand_alone_sigs.insert(blob, row);
                row
            }
        };
        Ok(TableId::StandAloneSig.token(row))
    }
}

impl TypeTokenEmitter for Emitter<'_> {
    fn type_token(&mut self, handle: &TypeHandle) -> Result<Token> {
        self.type_handle_token(handle)
    }

    fn is_value_type(&mut self, handle: &TypeHandle) -> Option<bool> {
        self.value_type(handle)
    }
}

impl OperandEmitter for Emitter<'_> {
    fn user_string(&mut self, value: &U16String) -> Result<Token> {
        let offset = self.user_strings.add(value)?;
        Ok(Token::from_parts(USER_STRING_TABLE, offset))
    }

    fn type_token(&mut self, handle: &TypeHandle) -> Result<Token> {
        self.type_handle_token(handle)
    }

    fn method_token(&mut self, handle: &MethodHandle) -> Result<Token> {
        self.method_handle_token(handle)
    }

    fn field_token(&mut self, handle: &FieldHandle) -> Result<Token> {
        self.field_handle_token(handle)
    }

    fn signature_token(&mut self, sig: &MethodSig) -> Result<Token> {
        let signature = encode_method_signature(sig, self)?;
        self.stand_alone_sig(&signature)
    }

    fn locals_token(&mut self, locals: &[TypeSig]) -> Result<Token> {
        let signature = encode_local_var_signature(
            &LocalVarSig {
                locals: locals.to_vec(),
            },
            self,
        )?;
        self.stand_alone_sig(&signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{method::MethodAttributes, signatures::FieldSig},
        model::flags::FieldAttributes,
    };

    fn assign_rows(emitter: &mut Emitter<'_>) {
        let graph = emitter.graph;
        for (index, id) in graph.all_types().enumerate() {
            emitter.type_rows.insert(id, row_of(index));
        }
        for (index, id) in graph.methods().enumerate() {
            emitter.method_rows.insert(id, row_of(index));
        }
        for (index, id) in graph.fields().enumerate() {
            emitter.field_rows.insert(id, row_of(index));
        }
    }

    #[test]
    fn references_to_local_definitions_become_definitions() {
        let mut graph = ModuleGraph::new("Demo.dll");
        let object = graph.object_type();
        let program = graph.add_type("Demo", "Program", 0, Some(object.clone()));
        let helper = graph.add_nested_type(program, "Helper", 0, Some(object.clone()));
        let run = graph.add_method(
            program,
            "Run",
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            MethodSig::new_static(TypeSig::Void, vec![TypeSig::I4]),
        );
        let count = graph.add_field(program, "count", FieldAttributes::PUBLIC, FieldSig { ty: TypeSig::I4 });

        let program_ref = graph.add_type_ref(ResolutionScope::Module, "Demo", "Program");
        let helper_ref = graph.add_type_ref(ResolutionScope::Nested(program_ref), "", "Helper");
        let run_ref = graph.add_member_ref(
            MemberRefParent::Type(TypeHandle::Ref(program_ref)),
            "Run",
            MemberRefSig::Method(MethodSig::new_static(TypeSig::Void, vec![TypeSig::I4])),
        );
        let other_run = graph.add_member_ref(
            MemberRefParent::Type(TypeHandle::Ref(program_ref)),
            "Run",
            MemberRefSig::Method(MethodSig::new_static(TypeSig::Void, vec![TypeSig::I8])),
        );
        let count_ref = graph.add_member_ref(
            MemberRefParent::Type(TypeHandle::Def(program)),
            "count",
            MemberRefSig::Field(FieldSig { ty: TypeSig::I4 }),
        );

        let mut emitter = Emitter::new(&graph, None);
        assign_rows(&mut emitter);

        assert_eq!(
            emitter.type_handle_token(&TypeHandle::Ref(program_ref)).unwrap(),
            emitter.type_def_token(program).unwrap()
        );
        assert_eq!(
            emitter.type_handle_token(&TypeHandle::Ref(helper_ref)).unwrap(),
            emitter.type_def_token(helper).unwrap()
        );
        assert_eq!(
            emitter.member_ref_token(run_ref).unwrap(),
            emitter.method_def_token(run).unwrap()
        );
        assert_eq!(
            emitter.field_handle_token(&FieldHandle::Ref(count_ref)).unwrap(),
            emitter.field_def_token(count).unwrap()
        );

        let mismatch = emitter.member_ref_token(other_run).unwrap();
        assert_eq!(TableId::from_u8(mismatch.table()), Some(TableId::MemberRef));
        assert_eq!(emitter.rows(TableId::MemberRef), 1);
    }

    #[test]
    fn references_and_specs_are_shared() {
        let mut graph = ModuleGraph::new("Demo.dll");
        let list = graph.core_type("System.Collections.Generic", "List`1");
        let first = graph.core_type("System", "String");
        let instance = TypeHandle::Spec(Box::new(TypeSig::GenericInst {
            is_value_type: false,
            base: list,
            args: vec![TypeSig::String],
        }));

        let mut emitter = Emitter::new(&graph, None);
        assign_rows(&mut emitter);

        let string = emitter.type_handle_token(&first).unwrap();
        assert_eq!(emitter.type_handle_token(&first).unwrap(), string);
        let spec = emitter.type_handle_token(&instance).unwrap();
        assert_eq!(emitter.type_handle_token(&instance.clone()).unwrap(), spec);
        assert_eq!(emitter.rows(TableId::TypeSpec), 1);
        // List`1 and String
        assert_eq!(emitter.rows(TableId::TypeRef), 2);

        let token = OperandEmitter::user_string(&mut emitter, &U16String::from_str("x")).unwrap();
        assert_eq!(token, Token(0x7000_0001));
    }

    #[test]
    fn detached_definitions_fail_to_encode() {
        let mut graph = ModuleGraph::new("Demo.dll");
        let gone = graph.add_type("Demo", "Gone", 0, None);
        graph.detach_type(gone);
        let mut emitter = Emitter::new(&graph, None);
        assign_rows(&mut emitter);

        assert!(matches!(
            emitter.type_handle_token(&TypeHandle::Def(gone)),
            Err(Error::Encode { .. })
        ));
    }
}
