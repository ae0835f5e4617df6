use crate::metadata::tables::{columns, CodedIndexType, Column, TableId, TABLE_COUNT};

/// Heap size flag: `#Strings` offsets are four bytes wide
pub const HEAP_LARGE_STRINGS: u8 = 0x01;
/// Heap size flag: `#GUID` indices are four bytes wide
pub const HEAP_LARGE_GUID: u8 = 0x02;
/// Heap size flag: `#Blob` offsets are four bytes wide
pub const HEAP_LARGE_BLOB: u8 = 0x04;

/// Row counts and heap widths, the inputs every column size depends on.
///
/// Built from a table stream header by the reader and from the final row counts by
/// the writer, so both compute identical layouts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInfo {
    rows: [u32; TABLE_COUNT],
    heap_sizes: u8,
}

impl Default for TableInfo {
    fn default() -> Self {
        TableInfo {
            rows: [0; TABLE_COUNT],
            heap_sizes: 0,
        }
    }
}

impl TableInfo {
    /// Create from explicit row counts and heap size flags.
    #[must_use]
    pub fn new(rows: [u32; TABLE_COUNT], heap_sizes: u8) -> Self {
        TableInfo { rows, heap_sizes }
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table as usize]
    }

    /// The heap size flags byte.
    #[must_use]
    pub fn heap_sizes(&self) -> u8 {
        self.heap_sizes
    }

    /// Whether a column indexing `table` needs four bytes.
    #[must_use]
    pub fn is_large(&self, table: TableId) -> bool {
        self.rows(table) > u32::from(u16::MAX)
    }

    /// Whether a coded index of `kind` needs four bytes.
    ///
    /// Two bytes suffice while every addressed table has fewer than
    /// `2^(16 - tag_bits)` rows.
    #[must_use]
    pub fn is_large_coded(&self, kind: CodedIndexType) -> bool {
        let limit = 1_u32 << (16 - kind.tag_bits());
        kind.tables()
            .iter()
            .flatten()
            .any(|table| self.rows(*table) >= limit)
    }

    /// Width in bytes of one column.
    #[must_use]
    pub fn column_size(&self, column: Column) -> usize {
        let large = match column {
            Column::U16 => return 2,
            Column::U32 => return 4,
            Column::Str => self.heap_sizes & HEAP_LARGE_STRINGS != 0,
            Column::Guid => self.heap_sizes & HEAP_LARGE_GUID != 0,
            Column::Blob => self.heap_sizes & HEAP_LARGE_BLOB != 0,
            Column::Table(table) => self.is_large(table),
            Column::Coded(kind) => self.is_large_coded(kind),
        };
        if large {
            4
        } else {
            2
        }
    }

    /// Width in bytes of one row of `table`.
    #[must_use]
    pub fn row_size(&self, table: TableId) -> usize {
        columns(table)
            .iter()
            .map(|column| self.column_size(*column))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_layout() {
        let mut rows = [0_u32; TABLE_COUNT];
        rows[TableId::TypeDef as usize] = 10;
        rows[TableId::Field as usize] = 3;
        let info = TableInfo::new(rows, 0);

        // Flags(4) Name(2) Namespace(2) Extends(2) FieldList(2) MethodList(2)
        assert_eq!(info.row_size(TableId::TypeDef), 14);
        assert_eq!(info.row_size(TableId::MethodDef), 14);
        assert_eq!(info.row_size(TableId::Assembly), 22);
    }

    #[test]
    fn large_indices() {
        let mut rows = [0_u32; TABLE_COUNT];
        // 2^14 rows no longer fit a TypeDefOrRef index with 2 tag bits
        rows[TableId::TypeRef as usize] = 0x4000;
        rows[TableId::Field as usize] = 0x1_0000;
        let info = TableInfo::new(rows, HEAP_LARGE_STRINGS | HEAP_LARGE_BLOB);

        assert!(info.is_large_coded(CodedIndexType::TypeDefOrRef));
        assert!(!info.is_large_coded(CodedIndexType::MethodDefOrRef));
        assert!(info.is_large(TableId::Field));
        assert_eq!(info.column_size(Column::Str), 4);
        assert_eq!(info.column_size(Column::Guid), 2);
        // Flags(4) Name(4) Namespace(4) Extends(4) FieldList(4) MethodList(2)
        assert_eq!(info.row_size(TableId::TypeDef), 22);
    }
}
