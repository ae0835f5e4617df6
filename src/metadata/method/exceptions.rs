//! Exception handling clauses as stored after a fat method body.
//!
//! Clauses are kept in their on-disk shape here, with byte offsets and lengths.
//! [`crate::assembly`] turns them into instruction-anchored handlers and back.
//!
//! # Layout
//!
//! ```text
//! Small clause (12 bytes)          Fat clause (24 bytes)
//!   u16 flags                        u32 flags
//!   u16 try offset                   u32 try offset
//!   u8  try length                   u32 try length
//!   u16 handler offset               u32 handler offset
//!   u8  handler length               u32 handler length
//!   u32 class token / filter offset  u32 class token / filter offset
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4.6 - Exception Handling

use bitflags::bitflags;

use crate::{file::io::write_le, metadata::method::SectionFlags};

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    ///
    /// These flags determine how the exception handler processes exceptions and
    /// control flow within try/catch/finally blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause.
        ///
        /// The last field of the clause holds the metadata token of the exception type
        /// that this handler catches.
        const EXCEPTION = 0x0000;

        /// An exception filter and handler clause.
        ///
        /// The last field of the clause holds the offset of the filter code.
        const FILTER = 0x0001;

        /// A finally clause.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// Size of the small section header and of each small clause
const SMALL_CLAUSE_SIZE: usize = 12;
/// Size of each fat clause
const FAT_CLAUSE_SIZE: usize = 24;
/// Size of a section header, small or fat
const SECTION_HEADER_SIZE: usize = 4;

/// One exception handling clause with byte offsets relative to the first instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionClause {
    /// Kind of clause
    pub flags: ExceptionHandlerFlags,
    /// Offset in bytes of the try block
    pub try_offset: u32,
    /// Length in bytes of the try block
    pub try_length: u32,
    /// Offset in bytes of the handler block
    pub handler_offset: u32,
    /// Length in bytes of the handler block
    pub handler_length: u32,
    /// Catch type token for typed clauses, filter offset for filter clauses, else 0
    pub class_token_or_filter: u32,
}

impl ExceptionClause {
    /// Whether this clause can be written in the small format.
    #[must_use]
    pub fn fits_small(&self) -> bool {
        self.try_offset <= u32::from(u16::MAX)
            && self.handler_offset <= u32::from(u16::MAX)
            && self.try_length <= u32::from(u8::MAX)
            && self.handler_length <= u32::from(u8::MAX)
    }
}

/// Whether a set of clauses must use the fat table format.
///
/// The decision is made once for the whole table: a single clause with an offset
/// above 65535 or a length above 255, or more clauses than a small section size
/// byte can describe, makes every clause fat.
#[must_use]
pub fn needs_fat_table(clauses: &[ExceptionClause]) -> bool {
    SECTION_HEADER_SIZE + clauses.len() * SMALL_CLAUSE_SIZE > usize::from(u8::MAX)
        || clauses.iter().any(|clause| !clause.fits_small())
}

/// Append the exception handling section for `clauses`.
///
/// The caller has already aligned `buffer` to four bytes. Nothing is written for an
/// empty list.
#[allow(clippy::cast_possible_truncation)]
pub fn write_exception_section(clauses: &[ExceptionClause], buffer: &mut Vec<u8>) {
    if clauses.is_empty() {
        return;
    }

    if needs_fat_table(clauses) {
        let data_size = (SECTION_HEADER_SIZE + clauses.len() * FAT_CLAUSE_SIZE) as u32;
        let kind = (SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits();
        write_le(buffer, u32::from(kind) | (data_size << 8));
        for clause in clauses {
            write_le(buffer, u32::from(clause.flags.bits()));
            write_le(buffer, clause.try_offset);
            write_le(buffer, clause.try_length);
            write_le(buffer, clause.handler_offset);
            write_le(buffer, clause.handler_length);
            write_le(buffer, clause.class_token_or_filter);
        }
    } else {
        let data_size = (SECTION_HEADER_SIZE + clauses.len() * SMALL_CLAUSE_SIZE) as u8;
        buffer.push(SectionFlags::EHTABLE.bits());
        buffer.push(data_size);
        write_le(buffer, 0_u16);
        for clause in clauses {
            write_le(buffer, clause.flags.bits());
            write_le(buffer, clause.try_offset as u16);
            buffer.push(clause.try_length as u8);
            write_le(buffer, clause.handler_offset as u16);
            buffer.push(clause.handler_length as u8);
            write_le(buffer, clause.class_token_or_filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(try_offset: u32, handler_offset: u32) -> ExceptionClause {
        ExceptionClause {
            flags: ExceptionHandlerFlags::FINALLY,
            try_offset,
            try_length: 1,
            handler_offset,
            handler_length: 1,
            class_token_or_filter: 0,
        }
    }

    #[test]
    fn small_table_bytes() {
        let mut buffer = Vec::new();
        write_exception_section(&[clause(0, 4)], &mut buffer);
        assert_eq!(
            buffer,
            [
                0x01, 0x10, 0x00, 0x00, // EHTable, 16 bytes
                0x02, 0x00, 0x00, 0x00, 0x01, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn fat_table_bytes() {
        let mut buffer = Vec::new();
        write_exception_section(&[clause(0, 0x1_0000)], &mut buffer);
        assert_eq!(buffer.len(), 28);
        assert_eq!(&buffer[..4], &[0x41, 0x1C, 0x00, 0x00]);
        assert_eq!(&buffer[16..20], &[0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn table_format_thresholds() {
        assert!(!needs_fat_table(&[clause(0, 0xFFFF)]));
        assert!(needs_fat_table(&[clause(0, 0x1_0000)]));
        // one fat clause makes the whole table fat
        assert!(needs_fat_table(&[clause(0, 2), clause(0x1_0000, 0)]));

        let mut long = clause(0, 0x200);
        long.try_length = 0x100;
        assert!(needs_fat_table(&[long]));

        // 20 small clauses fill 244 bytes, 21 no longer fit a size byte
        assert!(!needs_fat_table(&vec![clause(0, 2); 20]));
        assert!(needs_fat_table(&vec![clause(0, 2); 21]));
    }
}
