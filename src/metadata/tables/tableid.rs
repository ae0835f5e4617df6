use strum::{EnumCount, EnumIter};

use crate::metadata::token::Token;

/// Identifier of every metadata table that can appear in an ECMA-335 table stream.
///
/// The discriminant is the table number used in the `Valid` bit vector and in the
/// high byte of tokens. The `*Ptr` indirection tables and the edit-and-continue
/// tables only occur in the uncompressed `#-` stream; the reader understands them,
/// the writer never emits them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, EnumIter, EnumCount)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TableId {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRVA = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOS = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOS = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

/// Tables the writer keeps sorted, as announced in the `Sorted` bit vector.
///
/// InterfaceImpl, Constant, CustomAttribute, FieldMarshal, DeclSecurity, ClassLayout,
/// FieldLayout, MethodSemantics, MethodImpl, ImplMap, FieldRVA, NestedClass,
/// GenericParam and GenericParamConstraint.
pub const SORTED_TABLES: u64 = 0x0000_1600_3301_FA00;

impl TableId {
    /// Look a table up by its number.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<TableId> {
        use strum::IntoEnumIterator;
        TableId::iter().find(|id| *id as u8 == value)
    }

    /// Token of `row` in this table.
    #[must_use]
    pub fn token(self, row: u32) -> Token {
        Token::from_parts(self as u8, row)
    }

    /// Bit of this table in the `Valid`/`Sorted` vectors.
    #[must_use]
    pub fn bit(self) -> u64 {
        1_u64 << (self as u8)
    }
}

/// Number of table slots in a table stream.
pub const TABLE_COUNT: usize = TableId::COUNT;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_numbers_are_dense() {
        assert_eq!(TABLE_COUNT, 0x2D);
        for value in 0..0x2D_u8 {
            assert_eq!(TableId::from_u8(value).map(|id| id as u8), Some(value));
        }
        assert_eq!(TableId::from_u8(0x2D), None);
    }

    #[test]
    fn sorted_mask_matches_tables() {
        let sorted = [
            TableId::InterfaceImpl,
            TableId::Constant,
            TableId::CustomAttribute,
            TableId::FieldMarshal,
            TableId::DeclSecurity,
            TableId::ClassLayout,
            TableId::FieldLayout,
            TableId::MethodSemantics,
            TableId::MethodImpl,
            TableId::ImplMap,
            TableId::FieldRVA,
            TableId::NestedClass,
            TableId::GenericParam,
            TableId::GenericParamConstraint,
        ];
        let mask = sorted.iter().fold(0_u64, |mask, id| mask | id.bit());
        assert_eq!(mask, SORTED_TABLES);
    }

    #[test]
    fn table_tokens() {
        assert_eq!(TableId::MethodDef.token(3), Token(0x0600_0003));
        assert_eq!(TableId::TypeSpec.token(1).table(), 0x1B);
    }
}
