//! Shared state of one load: heaps, raw tables, the graph under construction and
//! the row-to-id maps that turn tokens into handles.

use std::collections::HashMap;

use log::warn;
use widestring::U16String;

use crate::{
    assembly::{MemberToken, OperandResolver},
    file::File,
    loader::LoaderOptions,
    metadata::{
        signatures::{
            parse_local_var_signature, parse_method_signature, parse_method_spec_signature,
            MethodSig, SignatureParser, TypeSig, TypeTokenResolver, MAX_RECURSION_DEPTH,
        },
        streams::{Blob, Guid, Strings, TablesHeader, UserStrings},
        tables::{CodedIndexType, TableId},
        token::Token,
    },
    model::{
        AssemblyRefId, EventId, FieldHandle, FieldId, GenericParamOwner, MemberRefId,
        MemberRefSig, MethodHandle, MethodId, ModuleGraph, ModuleRefId, PropertyId,
        ResolutionScope, TypeHandle, TypeId, TypeRefId,
    },
    Error, Result,
};

/// Owner of a `DeclSecurity` row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SecurityOwner {
    Type(TypeId),
    Method(MethodId),
    Assembly,
}

/// Where each table row ended up in the graph. Indexed by `row - 1`.
#[derive(Default)]
pub(crate) struct RowMap {
    pub types: Vec<TypeId>,
    pub fields: Vec<Option<FieldId>>,
    pub methods: Vec<Option<MethodId>>,
    pub params: Vec<Option<(MethodId, usize)>>,
    pub properties: Vec<Option<PropertyId>>,
    pub events: Vec<Option<EventId>>,
    pub type_refs: Vec<Option<TypeRefId>>,
    pub member_refs: Vec<Option<MemberRefId>>,
    pub assembly_refs: Vec<AssemblyRefId>,
    pub module_refs: Vec<ModuleRefId>,
    pub generic_params: Vec<Option<(GenericParamOwner, usize)>>,
    pub constraints: Vec<Option<(GenericParamOwner, usize, usize)>>,
    pub interface_impls: Vec<Option<(TypeId, usize)>>,
    pub security: Vec<Option<(SecurityOwner, usize)>>,
}

pub(crate) struct Loader<'a> {
    pub file: &'a File,
    pub options: &'a LoaderOptions,
    pub strings: Strings<'a>,
    pub blobs: Blob<'a>,
    pub guids: Guid<'a>,
    pub user_strings: Option<UserStrings<'a>>,
    pub tables: TablesHeader,
    pub graph: ModuleGraph,
    pub rows: RowMap,
    /// Methods with code, by RVA, waiting for the body pass
    pub bodies: Vec<(MethodId, u32)>,
    type_specs: HashMap<u32, TypeHandle>,
    method_specs: HashMap<u32, MethodHandle>,
}

/// The entry for a token's row, or an error naming the token.
fn lookup<T: Copy>(slice: &[T], token: Token) -> Result<T> {
    (token.row() as usize)
        .checked_sub(1)
        .and_then(|index| slice.get(index))
        .copied()
        .ok_or(Error::InvalidToken(token))
}

impl<'a> Loader<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file: &'a File,
        options: &'a LoaderOptions,
        strings: Strings<'a>,
        blobs: Blob<'a>,
        guids: Guid<'a>,
        user_strings: Option<UserStrings<'a>>,
        tables: TablesHeader,
        graph: ModuleGraph,
    ) -> Self {
        Loader {
            file,
            options,
            strings,
            blobs,
            guids,
            user_strings,
            tables,
            graph,
            rows: RowMap::default(),
            bodies: Vec::new(),
            type_specs: HashMap::new(),
            method_specs: HashMap::new(),
        }
    }

    /// All columns of a row, as a fixed-size array.
    pub fn row<const N: usize>(&self, table: TableId, row: u32) -> Result<[u32; N]> {
        let values = self
            .tables
            .table(table)
            .row(row)
            .ok_or_else(|| malformed_error!("{:?} row {} does not exist", table, row))?;
        values
            .try_into()
            .map_err(|_| malformed_error!("{:?} has {} columns, not {}", table, values.len(), N))
    }

    /// Row count of a table.
    pub fn count(&self, table: TableId) -> u32 {
        self.tables.rows(table)
    }

    pub fn string(&self, index: u32) -> Result<String> {
        Ok(self.strings.get(index as usize)?.into_owned())
    }

    pub fn blob(&self, index: u32) -> Result<&'a [u8]> {
        if index == 0 {
            return Ok(&[]);
        }
        self.blobs.get(index as usize)
    }

    pub fn guid(&self, index: u32) -> Result<uguid::Guid> {
        if index == 0 {
            return Ok(uguid::Guid::ZERO);
        }
        self.guids.get(index as usize)
    }

    /// The rows of `target` owned by row `row` of `owner`, whose list starts at
    /// `column`. Goes through the `ptr` indirection table when the image has one.
    pub fn member_list(
        &self,
        owner: TableId,
        row: u32,
        column: usize,
        target: TableId,
        ptr: TableId,
    ) -> Result<Vec<u32>> {
        let indirect = self.count(ptr) > 0;
        let limit = if indirect {
            self.count(ptr)
        } else {
            self.count(target)
        };

        let column_of = |row: u32| -> Result<u32> {
            self.tables
                .table(owner)
                .row(row)
                .and_then(|values| values.get(column).copied())
                .ok_or_else(|| out_of_bounds_error!())
        };
        let start = column_of(row)?.max(1);
        let next = if row < self.count(owner) {
            column_of(row + 1)?
        } else {
            limit + 1
        };
        let end = next.min(limit + 1);

        (start..end.max(start))
            .map(|index| {
                if indirect {
                    Ok(self.row::<1>(ptr, index)?[0])
                } else {
                    Ok(index)
                }
            })
            .collect()
    }

    /// Report a read-side recovery, or fail in strict mode.
    pub fn recover<T>(&self, result: Result<T>, what: &str, placeholder: impl FnOnce() -> T) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(error) if self.options.tolerant => {
                warn!("{}: {}; using a placeholder", what, error);
                Ok(placeholder())
            }
            Err(error) => Err(error),
        }
    }

    pub fn type_def(&self, token: Token) -> Result<TypeId> {
        lookup(&self.rows.types, token)
    }

    pub fn method_def(&self, token: Token) -> Result<MethodId> {
        lookup(&self.rows.methods, token)?.ok_or(Error::InvalidToken(token))
    }

    pub fn field_def(&self, token: Token) -> Result<FieldId> {
        lookup(&self.rows.fields, token)?.ok_or(Error::InvalidToken(token))
    }

    pub fn member_ref(&self, token: Token) -> Result<MemberRefId> {
        lookup(&self.rows.member_refs, token)?.ok_or(Error::InvalidToken(token))
    }

    pub fn module_ref(&self, token: Token) -> Result<ModuleRefId> {
        lookup(&self.rows.module_refs, token)
    }

    pub fn assembly_ref(&self, token: Token) -> Result<AssemblyRefId> {
        lookup(&self.rows.assembly_refs, token)
    }

    pub fn param(&self, token: Token) -> Result<(MethodId, usize)> {
        lookup(&self.rows.params, token)?.ok_or(Error::InvalidToken(token))
    }

    pub fn property(&self, token: Token) -> Result<PropertyId> {
        lookup(&self.rows.properties, token)?.ok_or(Error::InvalidToken(token))
    }

    pub fn event(&self, token: Token) -> Result<EventId> {
        lookup(&self.rows.events, token)?.ok_or(Error::InvalidToken(token))
    }

    /// The resolution scope of a `TypeRef`, from its coded index value.
    fn scope(&mut self, value: u32, depth: usize) -> Result<ResolutionScope> {
        let token = CodedIndexType::ResolutionScope.decode(value)?;
        if token.row() == 0 {
            return Ok(ResolutionScope::None);
        }
        Ok(match TableId::from_u8(token.table()) {
            Some(TableId::Module) => ResolutionScope::Module,
            Some(TableId::ModuleRef) => ResolutionScope::ModuleRef(lookup(&self.rows.module_refs, token)?),
            Some(TableId::AssemblyRef) => {
                ResolutionScope::AssemblyRef(lookup(&self.rows.assembly_refs, token)?)
            }
            Some(TableId::TypeRef) => ResolutionScope::Nested(self.type_ref(token.row(), depth + 1)?),
            _ => return Err(Error::InvalidToken(token)),
        })
    }

    /// The graph reference for a `TypeRef` row; identical rows share one id.
    pub fn type_ref(&mut self, row: u32, depth: usize) -> Result<TypeRefId> {
        let token = TableId::TypeRef.token(row);
        if let Some(id) = lookup(&self.rows.type_refs, token)? {
            return Ok(id);
        }
        if depth >= MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let [scope, name, namespace] = self.row(TableId::TypeRef, row)?;
        let scope = self.scope(scope, depth)?;
        let name = self.string(name)?;
        let namespace = self.string(namespace)?;
        let id = self.graph.add_type_ref(scope, &namespace, &name);
        self.rows.type_refs[row as usize - 1] = Some(id);
        Ok(id)
    }

    /// A `TypeDef`, `TypeRef` or `TypeSpec` token as a handle.
    pub fn type_handle_at(&mut self, token: Token, depth: usize) -> Result<TypeHandle> {
        match TableId::from_u8(token.table()) {
            Some(TableId::TypeDef) => self.type_def(token).map(TypeHandle::Def),
            Some(TableId::TypeRef) => self.type_ref(token.row(), depth).map(TypeHandle::Ref),
            Some(TableId::TypeSpec) => self.type_spec(token, depth),
            _ => Err(Error::InvalidToken(token)),
        }
    }

    fn type_spec(&mut self, token: Token, depth: usize) -> Result<TypeHandle> {
        if let Some(handle) = self.type_specs.get(&token.row()) {
            return Ok(handle.clone());
        }
        if depth >= MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let [signature] = self.row(TableId::TypeSpec, token.row())?;
        let blob = self.blob(signature)?;
        let sig = SignatureParser::with_depth(blob, self, depth + 1).parse_type_spec_signature()?;
        let handle = TypeHandle::Spec(Box::new(sig));
        self.type_specs.insert(token.row(), handle.clone());
        Ok(handle)
    }

    /// A `TypeDefOrRef` coded index as a handle; `None` for a null index.
    pub fn type_def_or_ref(&mut self, value: u32) -> Result<Option<TypeHandle>> {
        let token = CodedIndexType::TypeDefOrRef.decode(value)?;
        if token.row() == 0 {
            return Ok(None);
        }
        self.type_handle_at(token, 0).map(Some)
    }

    /// A `MethodDef`, `MemberRef` or `MethodSpec` token as a handle.
    pub fn method_handle(&mut self, token: Token) -> Result<MethodHandle> {
        match TableId::from_u8(token.table()) {
            Some(TableId::MethodDef) => self.method_def(token).map(MethodHandle::Def),
            Some(TableId::MemberRef) => {
                let id = self.member_ref(token)?;
                match self.graph[id].signature {
                    MemberRefSig::Method(_) => Ok(MethodHandle::Ref(id)),
                    MemberRefSig::Field(_) => Err(decode_error!(
                        token,
                        "member reference {} is a field, not a method",
                        self.graph[id].name
                    )),
                }
            }
            Some(TableId::MethodSpec) => self.method_spec(token),
            _ => Err(Error::InvalidToken(token)),
        }
    }

    fn method_spec(&mut self, token: Token) -> Result<MethodHandle> {
        if let Some(handle) = self.method_specs.get(&token.row()) {
            return Ok(handle.clone());
        }

        let [method, instantiation] = self.row(TableId::MethodSpec, token.row())?;
        let method = CodedIndexType::MethodDefOrRef.decode(method)?;
        if TableId::from_u8(method.table()) == Some(TableId::MethodSpec) {
            return Err(decode_error!(token, "method instantiation of an instantiation"));
        }
        let method = self.method_handle(method)?;
        let blob = self.blob(instantiation)?;
        let args = parse_method_spec_signature(blob, self)?.args;

        let handle = MethodHandle::Spec {
            method: Box::new(method),
            args,
        };
        self.method_specs.insert(token.row(), handle.clone());
        Ok(handle)
    }

    /// A `Field` or field `MemberRef` token as a handle.
    pub fn field_handle(&mut self, token: Token) -> Result<FieldHandle> {
        match TableId::from_u8(token.table()) {
            Some(TableId::Field) => self.field_def(token).map(FieldHandle::Def),
            Some(TableId::MemberRef) => {
                let id = self.member_ref(token)?;
                match self.graph[id].signature {
                    MemberRefSig::Field(_) => Ok(FieldHandle::Ref(id)),
                    MemberRefSig::Method(_) => Err(decode_error!(
                        token,
                        "member reference {} is a method, not a field",
                        self.graph[id].name
                    )),
                }
            }
            _ => Err(Error::InvalidToken(token)),
        }
    }

    fn stand_alone_sig(&self, token: Token) -> Result<&'a [u8]> {
        if TableId::from_u8(token.table()) != Some(TableId::StandAloneSig) {
            return Err(Error::InvalidToken(token));
        }
        let [signature] = self.row(TableId::StandAloneSig, token.row())?;
        self.blob(signature)
    }
}

impl TypeTokenResolver for Loader<'_> {
    fn resolve_type(&mut self, token: Token, depth: usize) -> Result<TypeHandle> {
        self.type_handle_at(token, depth)
    }
}

impl OperandResolver for Loader<'_> {
    fn user_string(&mut self, token: Token) -> Result<U16String> {
        match &self.user_strings {
            Some(heap) => heap.get(token.row() as usize),
            None => Err(Error::InvalidToken(token)),
        }
    }

    fn type_handle(&mut self, token: Token) -> Result<TypeHandle> {
        self.type_handle_at(token, 0)
    }

    fn method(&mut self, token: Token) -> Result<MethodHandle> {
        self.method_handle(token)
    }

    fn field(&mut self, token: Token) -> Result<FieldHandle> {
        self.field_handle(token)
    }

    fn member(&mut self, token: Token) -> Result<MemberToken> {
        match TableId::from_u8(token.table()) {
            Some(TableId::TypeDef | TableId::TypeRef | TableId::TypeSpec) => {
                self.type_handle_at(token, 0).map(MemberToken::Type)
            }
            Some(TableId::MethodDef | TableId::MethodSpec) => {
                self.method_handle(token).map(MemberToken::Method)
            }
            Some(TableId::Field) => self.field_handle(token).map(MemberToken::Field),
            Some(TableId::MemberRef) => {
                let id = self.member_ref(token)?;
                Ok(match self.graph[id].signature {
                    MemberRefSig::Method(_) => MemberToken::Method(MethodHandle::Ref(id)),
                    MemberRefSig::Field(_) => MemberToken::Field(FieldHandle::Ref(id)),
                })
            }
            _ => Err(Error::InvalidToken(token)),
        }
    }

    fn signature(&mut self, token: Token) -> Result<MethodSig> {
        let blob = self.stand_alone_sig(token)?;
        parse_method_signature(blob, self)
    }

    fn locals(&mut self, token: Token) -> Result<Vec<TypeSig>> {
        let blob = self.stand_alone_sig(token)?;
        Ok(parse_local_var_signature(blob, self)?.locals)
    }
}
