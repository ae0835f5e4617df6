//! Column layout of every metadata table.
//!
//! The reader and the writer share this schema: a row is a list of `u32` column
//! values, and [`columns`] says how each value is stored. Heap columns hold heap
//! offsets, table columns hold 1-based rows, coded columns hold the encoded coded
//! index value.

use crate::metadata::tables::{CodedIndexType, TableId};

/// Storage class of one column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Column {
    /// Two-byte constant (Constant.Type is a byte followed by a padding byte)
    U16,
    /// Four-byte constant
    U32,
    /// `#Strings` heap offset
    Str,
    /// `#GUID` heap index
    Guid,
    /// `#Blob` heap offset
    Blob,
    /// Row in another table
    Table(TableId),
    /// Coded index
    Coded(CodedIndexType),
}

use CodedIndexType as C;
use Column::{Blob, Coded, Guid, Str, Table, U16, U32};

/// Columns of `table`, in storage order.
#[must_use]
pub fn columns(table: TableId) -> &'static [Column] {
    match table {
        TableId::Module => &[U16, Str, Guid, Guid, Guid],
        TableId::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
        TableId::TypeDef => &[
            U32,
            Str,
            Str,
            Coded(C::TypeDefOrRef),
            Table(TableId::Field),
            Table(TableId::MethodDef),
        ],
        TableId::FieldPtr => &[Table(TableId::Field)],
        TableId::Field => &[U16, Str, Blob],
        TableId::MethodPtr => &[Table(TableId::MethodDef)],
        TableId::MethodDef => &[U32, U16, U16, Str, Blob, Table(TableId::Param)],
        TableId::ParamPtr => &[Table(TableId::Param)],
        TableId::Param => &[U16, U16, Str],
        TableId::InterfaceImpl => &[Table(TableId::TypeDef), Coded(C::TypeDefOrRef)],
        TableId::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
        TableId::Constant => &[U16, Coded(C::HasConstant), Blob],
        TableId::CustomAttribute => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        TableId::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
        TableId::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
        TableId::ClassLayout => &[U16, U32, Table(TableId::TypeDef)],
        TableId::FieldLayout => &[U32, Table(TableId::Field)],
        TableId::StandAloneSig => &[Blob],
        TableId::EventMap => &[Table(TableId::TypeDef), Table(TableId::Event)],
        TableId::EventPtr => &[Table(TableId::Event)],
        TableId::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
        TableId::PropertyMap => &[Table(TableId::TypeDef), Table(TableId::Property)],
        TableId::PropertyPtr => &[Table(TableId::Property)],
        TableId::Property => &[U16, Str, Blob],
        TableId::MethodSemantics => &[
            U16,
            Table(TableId::MethodDef),
            Coded(C::HasSemantics),
        ],
        TableId::MethodImpl => &[
            Table(TableId::TypeDef),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        TableId::ModuleRef => &[Str],
        TableId::TypeSpec => &[Blob],
        TableId::ImplMap => &[
            U16,
            Coded(C::MemberForwarded),
            Str,
            Table(TableId::ModuleRef),
        ],
        TableId::FieldRVA => &[U32, Table(TableId::Field)],
        TableId::EncLog => &[U32, U32],
        TableId::EncMap => &[U32],
        TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        TableId::AssemblyProcessor => &[U32],
        TableId::AssemblyOS => &[U32, U32, U32],
        TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        TableId::AssemblyRefProcessor => &[U32, Table(TableId::AssemblyRef)],
        TableId::AssemblyRefOS => &[U32, U32, U32, Table(TableId::AssemblyRef)],
        TableId::File => &[U32, Str, Blob],
        TableId::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
        TableId::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
        TableId::NestedClass => &[Table(TableId::TypeDef), Table(TableId::TypeDef)],
        TableId::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        TableId::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
        TableId::GenericParamConstraint => &[
            Table(TableId::GenericParam),
            Coded(C::TypeDefOrRef),
        ],
    }
}

/// Index of the column a sorted table is keyed on, with an optional secondary key.
///
/// Returns `None` for tables that carry no ordering requirement.
#[must_use]
pub fn sort_keys(table: TableId) -> Option<(usize, Option<usize>)> {
    match table {
        TableId::InterfaceImpl => Some((0, Some(1))),
        TableId::Constant => Some((1, None)),
        TableId::CustomAttribute => Some((0, None)),
        TableId::FieldMarshal => Some((0, None)),
        TableId::DeclSecurity => Some((1, None)),
        TableId::ClassLayout => Some((2, None)),
        TableId::FieldLayout => Some((1, None)),
        TableId::MethodSemantics => Some((2, None)),
        TableId::MethodImpl => Some((0, None)),
        TableId::ImplMap => Some((1, None)),
        TableId::FieldRVA => Some((1, None)),
        TableId::NestedClass => Some((0, None)),
        TableId::GenericParam => Some((2, Some(0))),
        TableId::GenericParamConstraint => Some((0, None)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_table_has_columns() {
        for table in TableId::iter() {
            assert!(!columns(table).is_empty(), "{:?}", table);
        }
    }

    #[test]
    fn sorted_tables_have_keys() {
        for table in TableId::iter() {
            let sorted = crate::metadata::tables::SORTED_TABLES & table.bit() != 0;
            assert_eq!(sort_keys(table).is_some(), sorted, "{:?}", table);
        }
    }
}
