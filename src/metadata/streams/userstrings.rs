use widestring::U16String;

use crate::{file::parser::Parser, Result};

/// The `#US` heap: UTF-16 string literals referenced by `ldstr`.
///
/// Each entry is a compressed byte length, the UTF-16LE code units, and one
/// trailing flag byte. Strings are kept as raw code units so that literals with
/// unpaired surrogates survive a round trip unchanged.
pub struct UserStrings<'a> {
    data: &'a [u8],
}

impl<'a> UserStrings<'a> {
    /// Wrap the raw heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the first byte is not zero.
    pub fn from(data: &'a [u8]) -> Result<UserStrings<'a>> {
        match data.first() {
            None | Some(0) => Ok(UserStrings { data }),
            Some(_) => Err(malformed_error!("#US heap must start with a NUL byte")),
        }
    }

    /// The literal at byte offset `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the entry extends past the heap.
    pub fn get(&self, index: usize) -> Result<U16String> {
        if index == 0 || index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(self.data);
        parser.seek(index)?;
        let length = parser.read_compressed_uint()? as usize;
        // The final byte is the 'has special characters' flag
        let units = length.saturating_sub(1) / 2;

        let mut chars = Vec::with_capacity(units);
        for _ in 0..units {
            chars.push(parser.read_le::<u16>()?);
        }
        Ok(U16String::from_vec(chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data: [u8; 32] = [
            0x00, 0x1b, 0x48, 0x00, 0x65, 0x00, 0x6c, 0x00, 0x6c, 0x00, 0x6f, 0x00, 0x2c, 0x00, 0x20, 0x00,
            0x57, 0x00, 0x6f, 0x00, 0x72, 0x00, 0x6c, 0x00, 0x64, 0x00, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00
        ];

        let heap = UserStrings::from(&data).unwrap();
        assert_eq!(heap.get(1).unwrap().to_string_lossy(), "Hello, World!");
        assert!(heap.get(0).is_err());
        assert!(heap.get(64).is_err());
    }

    #[test]
    fn unpaired_surrogate_survives() {
        let data = [0x00, 0x03, 0x00, 0xD8, 0x01];
        let heap = UserStrings::from(&data).unwrap();
        assert_eq!(heap.get(1).unwrap().as_slice(), &[0xD800]);
    }

    #[test]
    fn invalid_heap() {
        assert!(UserStrings::from(&[0x22, 0x00]).is_err());
    }
}
