//! Metadata table identifiers, coded indices and the shared column schema.
//!
//! Tables are handled generically: a table is a list of rows, a row is a list of
//! `u32` column values, and [`schema::columns`] describes how each value is stored.
//! [`TableInfo`] turns row counts and heap widths into byte sizes. The reader uses
//! this to walk a table stream, and the writer uses the same code to lay one out.

mod codedindex;
mod schema;
mod tableid;
mod tableinfo;

pub use codedindex::{CodedIndexType, CODED_INDEX_COUNT};
pub use schema::{columns, sort_keys, Column};
pub use tableid::{TableId, SORTED_TABLES, TABLE_COUNT};
pub use tableinfo::{TableInfo, HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS};
