//! Metadata streams: the four heaps and the table stream.
//!
//! Readers borrow the metadata block; the writer side builds its own heaps in
//! [`crate::writer`] and serializes the table stream through [`write_tables`].

mod strings;
mod tablesheader;
mod userstrings;

pub use strings::{Blob, Guid, Strings};
pub use tablesheader::{write_tables, RawTable, TablesHeader};
pub use userstrings::UserStrings;
