//! Cursor-based reader over a byte slice.
//!
//! [`Parser`] is what every decoder in this crate is written against: the metadata
//! root, the table stream, signature blobs, custom attribute blobs and CIL method
//! bodies. It tracks a position, refuses to read past the end, and knows the
//! compressed encodings defined by ECMA-335 II.23.2.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::file::parser::Parser;
//!
//! let data = [0x08, 0x80, 0x95, 0x01, 0x02];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_compressed_uint()?, 8);
//! assert_eq!(parser.read_compressed_uint()?, 0x95);
//! assert_eq!(parser.read_le::<u16>()?, 0x0201);
//! assert!(!parser.has_more_data());
//! # Ok::<(), cilweave::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::token::Token,
    Result,
};

/// A bounds-checked cursor over borrowed binary data.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }
        self.position = pos;
        Ok(())
    }

    /// Skip one byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn advance(&mut self) -> Result<()> {
        self.advance_by(1)
    }

    /// Skip `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        match self.position.checked_add(step) {
            Some(end) if end <= self.data.len() => {
                self.position = end;
                Ok(())
            }
            _ => Err(out_of_bounds_error!()),
        }
    }

    /// Current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The complete underlying buffer, independent of the position.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Look at the next byte without consuming it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Advance the position to the next multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if aligning would move past the end.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Read a `T` in little-endian byte order.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Borrow the next `length` bytes and advance past them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let start = self.position;
        self.advance_by(length)?;
        Ok(&self.data[start..self.position])
    }

    /// Read a compressed unsigned integer (ECMA-335 II.23.2).
    ///
    /// - `0xxxxxxx` - one byte, 7 bits of value
    /// - `10xxxxxx xxxxxxxx` - two bytes, 14 bits of value
    /// - `110xxxxx` followed by three bytes - four bytes, 29 bits of value
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input and
    /// [`crate::Error::Malformed`] for a first byte of the form `111xxxxx`.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        if (first_byte & 0xE0) == 0xC0 {
            let rest = self.read_bytes(3)?;
            return Ok(((u32::from(first_byte) & 0x1F) << 24)
                | (u32::from(rest[0]) << 16)
                | (u32::from(rest[1]) << 8)
                | u32::from(rest[2]));
        }

        Err(malformed_error!("Invalid compressed uint - 0x{:02X}", first_byte))
    }

    /// Read a compressed signed integer (ECMA-335 II.23.2).
    ///
    /// The stored value is the two's complement number rotated left by one bit inside
    /// its 7, 14 or 29 bit field, so the sign sits in bit 0.
    ///
    /// # Errors
    /// Same conditions as [`Parser::read_compressed_uint`].
    #[allow(clippy::cast_possible_wrap)]
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        let width = match self.peek_byte()? {
            b if b & 0x80 == 0 => 7,
            b if b & 0xC0 == 0x80 => 14,
            _ => 29,
        };
        let rotated = self.read_compressed_uint()?;

        let magnitude = rotated >> 1;
        if rotated & 1 == 0 {
            return Ok(magnitude as i32);
        }

        let sign_extension = match width {
            7 => 0xFFFF_FFC0_u32,
            14 => 0xFFFF_E000_u32,
            _ => 0xF000_0000_u32,
        };
        Ok((magnitude | sign_extension) as i32)
    }

    /// Read a `TypeDefOrRefOrSpecEncoded` value (ECMA-335 II.23.2.8).
    ///
    /// The two lowest bits select TypeDef, TypeRef or TypeSpec; the rest is the row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for the reserved tag `3`.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table: u32 = match compressed_token & 0x3 {
            0x0 => 0x0200_0000,
            0x1 => 0x0100_0000,
            0x2 => 0x1B00_0000,
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::new(table | (compressed_token >> 2)))
    }

    /// Read a null-terminated UTF-8 string.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if there is no terminator and
    /// [`crate::Error::Malformed`] for invalid UTF-8.
    pub fn read_string_utf8(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.position.min(self.data.len())..];
        let Some(end) = rest.iter().position(|byte| *byte == 0) else {
            return Err(out_of_bounds_error!());
        };

        let value = std::str::from_utf8(&rest[..end])
            .map_err(|error| malformed_error!("Invalid UTF-8 string - {}", error))?;
        self.position += end + 1;
        Ok(value)
    }

    /// Read a custom attribute `SerString`: a compressed length followed by UTF-8 bytes.
    ///
    /// A single `0xFF` byte denotes the null string and yields `None`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncation and
    /// [`crate::Error::Malformed`] for invalid UTF-8.
    pub fn read_ser_string(&mut self) -> Result<Option<String>> {
        if self.peek_byte()? == 0xFF {
            self.advance()?;
            return Ok(None);
        }

        let length = self.read_compressed_uint()? as usize;
        let bytes = self.read_bytes(length)?;
        let value = std::str::from_utf8(bytes)
            .map_err(|error| malformed_error!("Invalid SerString - {}", error))?;
        Ok(Some(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_compressed_uint() {
        let test_cases = vec![
            (vec![0x03], 3),
            (vec![0x7F], 0x7F),
            (vec![0x80, 0x80], 0x80),
            (vec![0xAE, 0x57], 0x2E57),
            (vec![0xBF, 0xFF], 0x3FFF),
            (vec![0xC0, 0x00, 0x40, 0x00], 0x4000),
            (vec![0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_uint().unwrap(), expected);
            assert!(!parser.has_more_data());
        }

        let mut parser = Parser::new(&[0xE0, 0, 0, 0]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_read_compressed_int() {
        let test_cases = vec![
            (vec![0x06], 3),
            (vec![0x7B], -3),
            (vec![0x80, 0x80], 64),
            (vec![0x01], -64),
            (vec![0xC0, 0x00, 0x40, 0x00], 8192),
            (vec![0x80, 0x01], -8192),
            (vec![0xDF, 0xFF, 0xFF, 0xFE], 268_435_455),
            (vec![0xC0, 0x00, 0x00, 0x01], -268_435_456),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_int().unwrap(), expected);
        }
    }

    #[test]
    fn test_read_compressed_token() {
        let mut parser = Parser::new(&[0x49, 0x0C, 0x0A]);
        assert_eq!(parser.read_compressed_token().unwrap().value(), 0x0100_0012);
        assert_eq!(parser.read_compressed_token().unwrap().value(), 0x0200_0003);
        assert_eq!(parser.read_compressed_token().unwrap().value(), 0x1B00_0002);

        let mut parser = Parser::new(&[0x07]);
        assert!(parser.read_compressed_token().is_err());
    }

    #[test]
    fn test_navigation() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut parser = Parser::new(&data);

        parser.advance().unwrap();
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 4);
        assert_eq!(parser.peek_byte().unwrap(), 0x05);
        assert_eq!(parser.read_bytes(3).unwrap(), &[0x05, 0x06, 0x07]);
        assert_eq!(parser.remaining(), 1);
        assert!(parser.advance_by(2).is_err());
        assert_eq!(parser.pos(), 7);
        assert!(parser.seek(9).is_err());
        parser.seek(8).unwrap();
        assert!(parser.peek_byte().is_err());
    }

    #[test]
    fn test_strings() {
        let data = [b'a', b'b', b'c', 0x00, b'd', 0x00];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_string_utf8().unwrap(), "abc");
        assert_eq!(parser.read_string_utf8().unwrap(), "d");
        assert!(parser.read_string_utf8().is_err());

        let data = [0x03, b'f', b'o', b'o', 0xFF, 0x00];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_ser_string().unwrap().as_deref(), Some("foo"));
        assert_eq!(parser.read_ser_string().unwrap(), None);
        assert_eq!(parser.read_ser_string().unwrap().as_deref(), Some(""));
    }
}
