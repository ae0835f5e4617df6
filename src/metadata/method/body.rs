//! Method body framing: tiny and fat headers and the trailing data sections.
//!
//! This layer only knows the byte layout. The instruction stream itself is decoded
//! by [`crate::assembly`].
//!
//! # Examples
//!
//! ```rust
//! use cilweave::metadata::method::{write_method_body, BodyHeader, RawMethodBody};
//!
//! let header = BodyHeader { max_stack: 8, local_var_sig_token: 0, init_locals: false };
//! let mut buffer = Vec::new();
//! write_method_body(&header, &[0x2A], &[], &mut buffer);
//! assert_eq!(buffer, [0x06, 0x2A]);
//!
//! let body = RawMethodBody::read(&buffer)?;
//! assert!(!body.is_fat);
//! assert_eq!(body.code, &[0x2A]);
//! # Ok::<(), cilweave::Error>(())
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Common Intermediate Language physical layout

use crate::{
    file::{
        io::{pad_to, write_le},
        parser::Parser,
    },
    metadata::method::{
        write_exception_section, ExceptionClause, ExceptionHandlerFlags, MethodBodyFlags,
        SectionFlags,
    },
    Result,
};

/// Size of a fat header in bytes
pub const FAT_HEADER_SIZE: usize = 12;
/// Largest code size a tiny header can describe
pub const TINY_MAX_CODE_SIZE: usize = 63;
/// Stack depth the runtime assumes for tiny bodies
pub const TINY_MAX_STACK: u16 = 8;

/// The header values of a body that do not follow from its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BodyHeader {
    /// Maximum number of items on the operand stack
    pub max_stack: u16,
    /// `StandAloneSig` token of the local variable signature, 0 for none
    pub local_var_sig_token: u32,
    /// Zero-initialize all locals
    pub init_locals: bool,
}

/// A method body as stored in the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMethodBody<'a> {
    /// Header values
    pub header: BodyHeader,
    /// Whether the body used the fat header
    pub is_fat: bool,
    /// The instruction stream
    pub code: &'a [u8],
    /// Exception handling clauses from all `EHTable` sections
    pub exception_clauses: Vec<ExceptionClause>,
    /// Total size including header, code, padding and sections
    pub size: usize,
}

impl<'a> RawMethodBody<'a> {
    /// Parse a body starting at the beginning of `data`.
    ///
    /// `data` may extend past the body; [`RawMethodBody::size`] reports how much was consumed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown header format and
    /// [`crate::Error::OutOfBounds`] if the body is truncated.
    pub fn read(data: &'a [u8]) -> Result<RawMethodBody<'a>> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let mut parser = Parser::new(data);
        let first_byte = parser.peek_byte()?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_0000_0011)) {
            MethodBodyFlags::TINY_FORMAT => {
                parser.advance()?;
                let code = parser.read_bytes(usize::from(first_byte >> 2))?;
                Ok(RawMethodBody {
                    header: BodyHeader {
                        max_stack: TINY_MAX_STACK,
                        local_var_sig_token: 0,
                        init_locals: false,
                    },
                    is_fat: false,
                    code,
                    exception_clauses: Vec::new(),
                    size: parser.pos(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                let first_duo = parser.read_le::<u16>()?;
                let size_header = usize::from(first_duo >> 12) * 4;
                if size_header < FAT_HEADER_SIZE {
                    return Err(malformed_error!(
                        "Fat method header declares {} bytes",
                        size_header
                    ));
                }
                let flags = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
                let max_stack = parser.read_le::<u16>()?;
                let code_size = parser.read_le::<u32>()? as usize;
                let local_var_sig_token = parser.read_le::<u32>()?;

                parser.seek(size_header)?;
                let code = parser.read_bytes(code_size)?;

                let mut exception_clauses = Vec::new();
                if flags.contains(MethodBodyFlags::MORE_SECTS) {
                    read_sections(&mut parser, &mut exception_clauses)?;
                }

                Ok(RawMethodBody {
                    header: BodyHeader {
                        max_stack,
                        local_var_sig_token,
                        init_locals: flags.contains(MethodBodyFlags::INIT_LOCALS),
                    },
                    is_fat: true,
                    code,
                    exception_clauses,
                    size: parser.pos(),
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }
}

// Exception Handling -> II.25.4.5
fn read_sections(parser: &mut Parser, clauses: &mut Vec<ExceptionClause>) -> Result<()> {
    loop {
        parser.align(4)?;
        let section_start = parser.pos();
        let kind = SectionFlags::from_bits_truncate(parser.read_le::<u8>()?);
        let fat = kind.contains(SectionFlags::FAT_FORMAT);

        let data_size = if fat {
            let low = u32::from(parser.read_le::<u16>()?);
            let high = u32::from(parser.read_le::<u8>()?);
            (low | (high << 16)) as usize
        } else {
            let size = usize::from(parser.read_le::<u8>()?);
            parser.advance_by(2)?;
            size
        };
        if data_size < 4 {
            return Err(malformed_error!(
                "Method data section of {} bytes",
                data_size
            ));
        }

        if kind.contains(SectionFlags::EHTABLE) {
            let clause_size = if fat { 24 } else { 12 };
            for _ in 0..(data_size - 4) / clause_size {
                clauses.push(if fat {
                    ExceptionClause {
                        #[allow(clippy::cast_possible_truncation)]
                        flags: ExceptionHandlerFlags::from_bits_truncate(
                            parser.read_le::<u32>()? as u16,
                        ),
                        try_offset: parser.read_le::<u32>()?,
                        try_length: parser.read_le::<u32>()?,
                        handler_offset: parser.read_le::<u32>()?,
                        handler_length: parser.read_le::<u32>()?,
                        class_token_or_filter: parser.read_le::<u32>()?,
                    }
                } else {
                    ExceptionClause {
                        flags: ExceptionHandlerFlags::from_bits_truncate(
                            parser.read_le::<u16>()?,
                        ),
                        try_offset: u32::from(parser.read_le::<u16>()?),
                        try_length: u32::from(parser.read_le::<u8>()?),
                        handler_offset: u32::from(parser.read_le::<u16>()?),
                        handler_length: u32::from(parser.read_le::<u8>()?),
                        class_token_or_filter: parser.read_le::<u32>()?,
                    }
                });
            }
        }
        parser.seek(section_start + data_size)?;

        if !kind.contains(SectionFlags::MORE_SECTS) {
            return Ok(());
        }
    }
}

/// Whether a body with these properties is written with a tiny header.
#[must_use]
pub fn fits_tiny(header: &BodyHeader, code_size: usize, has_clauses: bool) -> bool {
    code_size <= TINY_MAX_CODE_SIZE
        && header.max_stack <= TINY_MAX_STACK
        && header.local_var_sig_token == 0
        && !has_clauses
}

/// Append a complete method body: header, code, and the exception section.
///
/// A tiny header is used when [`fits_tiny`] allows it, otherwise a fat one. The
/// exception section is padded to a four byte boundary relative to the start of
/// `buffer`, so the caller starts fat bodies on an aligned offset.
#[allow(clippy::cast_possible_truncation)]
pub fn write_method_body(
    header: &BodyHeader,
    code: &[u8],
    clauses: &[ExceptionClause],
    buffer: &mut Vec<u8>,
) {
    if fits_tiny(header, code.len(), !clauses.is_empty()) {
        buffer.push(((code.len() as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8);
        buffer.extend_from_slice(code);
        return;
    }

    let mut flags = MethodBodyFlags::FAT_FORMAT;
    if header.init_locals {
        flags |= MethodBodyFlags::INIT_LOCALS;
    }
    if !clauses.is_empty() {
        flags |= MethodBodyFlags::MORE_SECTS;
    }

    write_le(buffer, flags.bits() | (3 << 12));
    write_le(buffer, header.max_stack);
    write_le(buffer, code.len() as u32);
    write_le(buffer, header.local_var_sig_token);
    buffer.extend_from_slice(code);

    if !clauses.is_empty() {
        pad_to(buffer, 4);
        write_exception_section(clauses, buffer);
    }
}
