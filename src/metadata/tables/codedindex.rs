use strum::{EnumCount, EnumIter};

use crate::{
    metadata::{tables::TableId, token::Token},
    Result,
};

/// The coded index kinds of ECMA-335 II.24.2.6.
///
/// A coded index multiplexes several tables into one column: the low `tag_bits()`
/// bits select the table, the remaining bits hold the row.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[allow(missing_docs)]
pub enum CodedIndexType {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// Tables addressed by each tag value; `None` marks tags the format reserves.
    #[must_use]
    pub fn tables(&self) -> &'static [Option<TableId>] {
        match self {
            CodedIndexType::TypeDefOrRef => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexType::HasConstant => &[
                Some(TableId::Field),
                Some(TableId::Param),
                Some(TableId::Property),
            ],
            CodedIndexType::HasCustomAttribute => &[
                Some(TableId::MethodDef),
                Some(TableId::Field),
                Some(TableId::TypeRef),
                Some(TableId::TypeDef),
                Some(TableId::Param),
                Some(TableId::InterfaceImpl),
                Some(TableId::MemberRef),
                Some(TableId::Module),
                // listed as 'Permission' in the standard
                Some(TableId::DeclSecurity),
                Some(TableId::Property),
                Some(TableId::Event),
                Some(TableId::StandAloneSig),
                Some(TableId::ModuleRef),
                Some(TableId::TypeSpec),
                Some(TableId::Assembly),
                Some(TableId::AssemblyRef),
                Some(TableId::File),
                Some(TableId::ExportedType),
                Some(TableId::ManifestResource),
                Some(TableId::GenericParam),
                Some(TableId::GenericParamConstraint),
                Some(TableId::MethodSpec),
            ],
            CodedIndexType::HasFieldMarshal => &[Some(TableId::Field), Some(TableId::Param)],
            CodedIndexType::HasDeclSecurity => &[
                Some(TableId::TypeDef),
                Some(TableId::MethodDef),
                Some(TableId::Assembly),
            ],
            CodedIndexType::MemberRefParent => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::ModuleRef),
                Some(TableId::MethodDef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexType::HasSemantics => &[Some(TableId::Event), Some(TableId::Property)],
            CodedIndexType::MethodDefOrRef => &[Some(TableId::MethodDef), Some(TableId::MemberRef)],
            CodedIndexType::MemberForwarded => &[Some(TableId::Field), Some(TableId::MethodDef)],
            CodedIndexType::Implementation => &[
                Some(TableId::File),
                Some(TableId::AssemblyRef),
                Some(TableId::ExportedType),
            ],
            CodedIndexType::CustomAttributeType => &[
                None,
                None,
                Some(TableId::MethodDef),
                Some(TableId::MemberRef),
                None,
            ],
            CodedIndexType::ResolutionScope => &[
                Some(TableId::Module),
                Some(TableId::ModuleRef),
                Some(TableId::AssemblyRef),
                Some(TableId::TypeRef),
            ],
            CodedIndexType::TypeOrMethodDef => &[Some(TableId::TypeDef), Some(TableId::MethodDef)],
        }
    }

    /// Number of low bits that hold the tag.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn tag_bits(&self) -> u8 {
        let tags = self.tables().len() as u32;
        (u32::BITS - (tags - 1).leading_zeros()) as u8
    }

    /// Split a stored value into a token. A zero row yields a null token of the tagged table.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a reserved or out-of-range tag.
    pub fn decode(&self, value: u32) -> Result<Token> {
        let tag_bits = self.tag_bits();
        let tag = (value & ((1 << tag_bits) - 1)) as usize;
        let row = value >> tag_bits;

        match self.tables().get(tag) {
            Some(Some(table)) => Ok(table.token(row)),
            _ => Err(malformed_error!(
                "Invalid tag {} in {:?} coded index 0x{:X}",
                tag,
                self,
                value
            )),
        }
    }

    /// Build the stored value for `row` of `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Encode`] if `table` cannot be addressed by this kind.
    pub fn encode(&self, table: TableId, row: u32) -> Result<u32> {
        let Some(tag) = self
            .tables()
            .iter()
            .position(|candidate| *candidate == Some(table))
        else {
            return Err(encode_error!(
                format!("{:?} row {}", table, row),
                "table cannot be referenced through a {:?} coded index",
                self
            ));
        };

        #[allow(clippy::cast_possible_truncation)]
        Ok((row << self.tag_bits()) | tag as u32)
    }

    /// Build the stored value for a token.
    ///
    /// # Errors
    /// Same conditions as [`CodedIndexType::encode`], plus unknown table bytes.
    pub fn encode_token(&self, token: Token) -> Result<u32> {
        let Some(table) = TableId::from_u8(token.table()) else {
            return Err(encode_error!(token, "unknown table in {:?} coded index", self));
        };
        self.encode(table, token.row())
    }
}

/// Number of coded index kinds.
pub const CODED_INDEX_COUNT: usize = CodedIndexType::COUNT;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_widths() {
        assert_eq!(CodedIndexType::TypeDefOrRef.tag_bits(), 2);
        assert_eq!(CodedIndexType::HasCustomAttribute.tag_bits(), 5);
        assert_eq!(CodedIndexType::HasFieldMarshal.tag_bits(), 1);
        assert_eq!(CodedIndexType::MemberRefParent.tag_bits(), 3);
        assert_eq!(CodedIndexType::CustomAttributeType.tag_bits(), 3);
        assert_eq!(CodedIndexType::ResolutionScope.tag_bits(), 2);
    }

    #[test]
    fn encode_and_decode() {
        let value = CodedIndexType::TypeDefOrRef
            .encode(TableId::TypeRef, 0x12)
            .unwrap();
        assert_eq!(value, 0x49);
        assert_eq!(
            CodedIndexType::TypeDefOrRef.decode(value).unwrap(),
            Token(0x0100_0012)
        );

        let value = CodedIndexType::CustomAttributeType
            .encode(TableId::MemberRef, 2)
            .unwrap();
        assert_eq!(value, (2 << 3) | 3);
        assert_eq!(
            CodedIndexType::CustomAttributeType.decode(value).unwrap(),
            Token(0x0A00_0002)
        );
    }

    #[test]
    fn reserved_tags_are_rejected() {
        assert!(CodedIndexType::CustomAttributeType.decode(0x08).is_err());
        assert!(CodedIndexType::TypeDefOrRef.decode(0x07).is_err());
        assert!(CodedIndexType::HasConstant
            .encode(TableId::MethodDef, 1)
            .is_err());
    }
}
