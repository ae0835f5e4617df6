use std::borrow::Cow;

use crate::{file::parser::Parser, Result};

/// The `#Strings` heap: null-terminated UTF-8 identifiers addressed by byte offset.
pub struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    /// Wrap the raw heap. A present heap always starts with the empty string.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the first byte is not zero.
    pub fn from(data: &'a [u8]) -> Result<Strings<'a>> {
        match data.first() {
            None | Some(0) => Ok(Strings { data }),
            Some(_) => Err(malformed_error!("#Strings heap must start with a NUL byte")),
        }
    }

    /// The string at `index`.
    ///
    /// Identifiers produced by obfuscators are not always valid UTF-8; invalid
    /// sequences are replaced rather than failing the whole load.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `index` is past the heap or the string
    /// has no terminator.
    pub fn get(&self, index: usize) -> Result<Cow<'a, str>> {
        if index == 0 {
            return Ok(Cow::Borrowed(""));
        }

        let rest = self.data.get(index..).ok_or(out_of_bounds_error!())?;
        let Some(end) = rest.iter().position(|byte| *byte == 0) else {
            return Err(out_of_bounds_error!());
        };
        Ok(String::from_utf8_lossy(&rest[..end]))
    }
}

/// The `#Blob` heap: length-prefixed byte sequences addressed by byte offset.
pub struct Blob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Wrap the raw heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the first byte is not zero.
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        match data.first() {
            None | Some(0) => Ok(Blob { data }),
            Some(_) => Err(malformed_error!("#Blob heap must start with a NUL byte")),
        }
    }

    /// The blob at `index`, without its length prefix.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the blob extends past the heap.
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index == 0 {
            return Ok(&[]);
        }
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(self.data);
        parser.seek(index)?;
        let length = parser.read_compressed_uint()? as usize;
        parser.read_bytes(length)
    }
}

/// The `#GUID` heap: 16-byte GUIDs addressed by 1-based index.
pub struct Guid<'a> {
    data: &'a [u8],
}

impl<'a> Guid<'a> {
    /// Wrap the raw heap.
    #[must_use]
    pub fn from(data: &'a [u8]) -> Guid<'a> {
        Guid { data }
    }

    /// The GUID at the 1-based `index`; index 0 is the null GUID.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the index is past the heap.
    pub fn get(&self, index: usize) -> Result<uguid::Guid> {
        if index == 0 {
            return Ok(uguid::Guid::ZERO);
        }

        let start = (index - 1) * 16;
        let bytes: [u8; 16] = self
            .data
            .get(start..start + 16)
            .and_then(|slice| slice.try_into().ok())
            .ok_or(out_of_bounds_error!())?;
        Ok(uguid::Guid::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_heap() {
        let data = b"\0<Module>\0System\0Object\0";
        let strings = Strings::from(data).unwrap();
        assert_eq!(strings.get(0).unwrap(), "");
        assert_eq!(strings.get(1).unwrap(), "<Module>");
        assert_eq!(strings.get(10).unwrap(), "System");
        assert_eq!(strings.get(13).unwrap(), "tem");
        assert!(strings.get(100).is_err());
        assert!(Strings::from(b"x\0").is_err());
    }

    #[test]
    fn blob_heap() {
        let data = [0x00, 0x03, 0x20, 0x00, 0x01, 0x02, 0x0A, 0x0B, 0x05, 0x00];
        let blob = Blob::from(&data).unwrap();
        assert_eq!(blob.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(blob.get(1).unwrap(), &[0x20, 0x00, 0x01]);
        assert_eq!(blob.get(5).unwrap(), &[0x0A, 0x0B]);
        assert!(blob.get(8).is_err());
        assert!(blob.get(50).is_err());
    }

    #[test]
    fn guid_heap() {
        let mut data = vec![0x11; 16];
        data.extend_from_slice(&[0x22; 16]);
        let guid = Guid::from(&data);
        assert_eq!(guid.get(0).unwrap(), uguid::Guid::ZERO);
        assert_eq!(guid.get(2).unwrap().to_bytes(), [0x22; 16]);
        assert!(guid.get(3).is_err());
    }
}
