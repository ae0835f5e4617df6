use strum::IntoEnumIterator;

use crate::{
    file::{
        io::{read_le_at_dyn, write_le, write_le_dyn},
        parser::Parser,
    },
    metadata::tables::{columns, TableId, TableInfo, SORTED_TABLES, TABLE_COUNT},
    Result,
};

/// Heap size flag announcing four extra bytes after the row counts
const HEAP_EXTRA_DATA: u8 = 0x40;

/// One table of the table stream, as column values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawTable {
    width: usize,
    values: Vec<u32>,
}

impl RawTable {
    /// An empty table whose rows have `width` columns.
    #[must_use]
    pub fn new(width: usize) -> Self {
        RawTable {
            width,
            values: Vec::new(),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        if self.width == 0 {
            0
        } else {
            (self.values.len() / self.width) as u32
        }
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The columns of the 1-based `row`, or `None` if it does not exist.
    #[must_use]
    pub fn row(&self, row: u32) -> Option<&[u32]> {
        if row == 0 || row > self.len() {
            return None;
        }
        let start = (row as usize - 1) * self.width;
        self.values.get(start..start + self.width)
    }

    /// Append a row and return its 1-based index.
    ///
    /// # Panics
    /// Debug builds assert that `row` has the table's width.
    pub fn push(&mut self, row: &[u32]) -> u32 {
        debug_assert_eq!(row.len(), self.width);
        self.values.extend_from_slice(row);
        self.len()
    }

    /// Overwrite one column of an existing row.
    pub fn set(&mut self, row: u32, column: usize, value: u32) {
        if row == 0 || row > self.len() || column >= self.width {
            return;
        }
        self.values[(row as usize - 1) * self.width + column] = value;
    }

    /// Iterate over all rows in order.
    pub fn rows(&self) -> impl Iterator<Item = &[u32]> {
        self.values.chunks(self.width.max(1))
    }

    /// Stable sort of the rows by one or two columns.
    pub fn sort_by_columns(&mut self, primary: usize, secondary: Option<usize>) {
        let mut rows: Vec<Vec<u32>> = self.rows().map(<[u32]>::to_vec).collect();
        rows.sort_by_key(|row| (row[primary], secondary.map_or(0, |column| row[column])));
        self.values = rows.concat();
    }
}

/// The decoded `#~` (or `#-`) stream: every table as raw column values.
pub struct TablesHeader {
    /// Major schema version, 2
    pub major_version: u8,
    /// Minor schema version, 0
    pub minor_version: u8,
    /// Row counts and index widths
    pub info: TableInfo,
    /// Bit vector of sorted tables as declared by the producer
    pub sorted: u64,
    /// Whether this was the uncompressed `#-` stream, which may carry `*Ptr` tables
    pub uncompressed: bool,
    tables: Vec<RawTable>,
}

impl TablesHeader {
    /// Decode a table stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the tables extend past the stream and
    /// [`crate::Error::Malformed`] for an empty `Valid` vector.
    pub fn read(data: &[u8], uncompressed: bool) -> Result<TablesHeader> {
        let mut parser = Parser::new(data);
        let _reserved = parser.read_le::<u32>()?;
        let major_version = parser.read_le::<u8>()?;
        let minor_version = parser.read_le::<u8>()?;
        let heap_sizes = parser.read_le::<u8>()?;
        let _reserved = parser.read_le::<u8>()?;
        let valid = parser.read_le::<u64>()?;
        let sorted = parser.read_le::<u64>()?;

        if valid == 0 {
            return Err(malformed_error!("Table stream declares no tables"));
        }

        let mut rows = [0_u32; TABLE_COUNT];
        let mut unknown_tables = false;
        for bit in 0..64_usize {
            if valid & (1 << bit) == 0 {
                continue;
            }
            let count = parser.read_le::<u32>()?;
            if bit < TABLE_COUNT {
                rows[bit] = count;
            } else if count > 0 {
                unknown_tables = true;
            }
        }
        if unknown_tables {
            log::warn!("Table stream contains unknown tables past GenericParamConstraint; they are ignored");
        }
        if heap_sizes & HEAP_EXTRA_DATA != 0 {
            parser.advance_by(4)?;
        }

        let info = TableInfo::new(rows, heap_sizes);
        let mut tables = Vec::with_capacity(TABLE_COUNT);
        let mut offset = parser.pos();
        for table in TableId::iter() {
            let schema = columns(table);
            let mut raw = RawTable::new(schema.len());
            let row_count = info.rows(table) as usize;
            let row_size = info.row_size(table);

            match row_count
                .checked_mul(row_size)
                .and_then(|size| size.checked_add(offset))
            {
                Some(end) if end <= data.len() => {}
                _ => return Err(out_of_bounds_error!()),
            }

            raw.values.reserve(row_count * schema.len());
            for _ in 0..row_count {
                for column in schema {
                    let size = info.column_size(*column);
                    raw.values.push(read_le_at_dyn(data, &mut offset, size == 4)?);
                }
            }
            tables.push(raw);
        }

        Ok(TablesHeader {
            major_version,
            minor_version,
            info,
            sorted,
            uncompressed,
            tables,
        })
    }

    /// The raw rows of `table`.
    #[must_use]
    pub fn table(&self, table: TableId) -> &RawTable {
        &self.tables[table as usize]
    }

    /// Row count of `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.info.rows(table)
    }
}

/// Serialize a complete `#~` stream from per-table rows.
///
/// `tables` is indexed by table number. Sorted tables must already be in order;
/// the `Sorted` vector always announces [`SORTED_TABLES`].
#[allow(clippy::cast_possible_truncation)]
pub fn write_tables(tables: &[RawTable], heap_sizes: u8, buffer: &mut Vec<u8>) {
    let mut rows = [0_u32; TABLE_COUNT];
    let mut valid = 0_u64;
    for table in TableId::iter() {
        let count = tables.get(table as usize).map_or(0, RawTable::len);
        rows[table as usize] = count;
        if count > 0 {
            valid |= table.bit();
        }
    }
    let info = TableInfo::new(rows, heap_sizes);

    write_le(buffer, 0_u32);
    write_le(buffer, 2_u8);
    write_le(buffer, 0_u8);
    write_le(buffer, heap_sizes);
    write_le(buffer, 1_u8);
    write_le(buffer, valid);
    write_le(buffer, SORTED_TABLES);
    for count in rows.iter().filter(|count| **count > 0) {
        write_le(buffer, *count);
    }

    for table in TableId::iter() {
        let Some(raw) = tables.get(table as usize) else {
            continue;
        };
        let schema = columns(table);
        for row in raw.rows().filter(|row| !row.is_empty()) {
            for (column, value) in schema.iter().zip(row) {
                write_le_dyn(buffer, *value, info.column_size(*column) == 4);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_tables() -> Vec<RawTable> {
        TableId::iter()
            .map(|table| RawTable::new(columns(table).len()))
            .collect()
    }

    #[test]
    fn raw_table_rows() {
        let mut table = RawTable::new(2);
        assert_eq!(table.push(&[5, 1]), 1);
        assert_eq!(table.push(&[2, 9]), 2);
        assert_eq!(table.push(&[2, 3]), 3);
        assert_eq!(table.row(2), Some(&[2_u32, 9][..]));
        assert_eq!(table.row(0), None);
        assert_eq!(table.row(4), None);

        table.sort_by_columns(0, Some(1));
        assert_eq!(table.row(1), Some(&[2_u32, 3][..]));
        assert_eq!(table.row(3), Some(&[5_u32, 1][..]));

        table.set(1, 1, 7);
        assert_eq!(table.row(1), Some(&[2_u32, 7][..]));
    }

    #[test]
    fn write_then_read() {
        let mut tables = empty_tables();
        tables[TableId::Module as usize].push(&[0, 1, 1, 0, 0]);
        tables[TableId::TypeDef as usize].push(&[0, 10, 0, 0, 1, 1]);
        tables[TableId::TypeDef as usize].push(&[0x0010_0001, 19, 30, 0x5, 1, 1]);
        tables[TableId::MethodDef as usize].push(&[0x2050, 0, 0x96, 40, 1, 1]);

        let mut buffer = Vec::new();
        write_tables(&tables, 0, &mut buffer);

        let header = TablesHeader::read(&buffer, false).unwrap();
        assert_eq!(header.major_version, 2);
        assert_eq!(header.sorted, SORTED_TABLES);
        assert_eq!(header.rows(TableId::TypeDef), 2);
        assert_eq!(header.rows(TableId::Field), 0);
        assert_eq!(
            header.table(TableId::TypeDef).row(2),
            Some(&[0x0010_0001_u32, 19, 30, 0x5, 1, 1][..])
        );
        assert_eq!(
            header.table(TableId::MethodDef).row(1),
            Some(&[0x2050_u32, 0, 0x96, 40, 1, 1][..])
        );
    }

    #[test]
    fn truncated_stream() {
        let mut tables = empty_tables();
        tables[TableId::Module as usize].push(&[0, 1, 1, 0, 0]);
        let mut buffer = Vec::new();
        write_tables(&tables, 0, &mut buffer);
        buffer.truncate(buffer.len() - 1);
        assert!(matches!(
            TablesHeader::read(&buffer, false),
            Err(crate::Error::OutOfBounds)
        ));
    }
}
