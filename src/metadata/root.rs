//! The metadata root (`BSJB` header) and its stream directory, ECMA-335 II.24.2.1.

use crate::{
    file::{
        io::{pad_to, write_le},
        parser::Parser,
    },
    Result,
};

/// Magic signature at the start of the metadata root
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// Version string written by current compilers
pub const DEFAULT_RUNTIME_VERSION: &str = "v4.0.30319";

/// One entry of the stream directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset of the stream relative to the metadata root
    pub offset: u32,
    /// Size of the stream in bytes
    pub size: u32,
    /// Name, for example `#~` or `#Strings`
    pub name: String,
}

/// The parsed metadata root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Root {
    /// Major version, 1 in practice
    pub major_version: u16,
    /// Minor version, 1 in practice
    pub minor_version: u16,
    /// Runtime version string, without padding
    pub version: String,
    /// Reserved flags
    pub flags: u16,
    /// Stream directory
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Parse the root at the start of `data`, which must span the whole metadata block.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a bad magic or an invalid directory, and
    /// [`crate::Error::OutOfBounds`] if a stream lies outside `data`.
    pub fn read(data: &[u8]) -> Result<Root> {
        let mut parser = Parser::new(data);

        let signature = parser.read_le::<u32>()?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - 0x{:08X}",
                signature
            ));
        }

        let major_version = parser.read_le::<u16>()?;
        let minor_version = parser.read_le::<u16>()?;
        let _reserved = parser.read_le::<u32>()?;
        let version_length = parser.read_le::<u32>()? as usize;
        if version_length > 255 {
            return Err(malformed_error!(
                "Version string length too large - {}",
                version_length
            ));
        }
        let version_bytes = parser.read_bytes(version_length)?;
        let version = String::from_utf8_lossy(version_bytes)
            .trim_end_matches('\0')
            .to_string();

        let flags = parser.read_le::<u16>()?;
        let stream_count = parser.read_le::<u16>()?;
        if stream_count == 0 || stream_count > 16 {
            return Err(malformed_error!("Invalid stream count - {}", stream_count));
        }

        let mut stream_headers = Vec::with_capacity(stream_count as usize);
        for _ in 0..stream_count {
            let offset = parser.read_le::<u32>()?;
            let size = parser.read_le::<u32>()?;

            let name_start = parser.pos();
            let name = parser.read_string_utf8()?.to_string();
            if name.len() > 32 {
                return Err(malformed_error!("Stream name too long - {}", name));
            }
            let name_aligned = (name.len() + 1 + 3) & !3;
            parser.seek(name_start + name_aligned)?;

            match offset.checked_add(size) {
                Some(end) if end as usize <= data.len() => {}
                _ => return Err(out_of_bounds_error!()),
            }

            stream_headers.push(StreamHeader { offset, size, name });
        }

        Ok(Root {
            major_version,
            minor_version,
            version,
            flags,
            stream_headers,
        })
    }

    /// Find a stream by name.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|header| header.name == name)
    }

    /// Size in bytes of the serialized root, including the stream directory.
    #[must_use]
    pub fn size(&self) -> usize {
        let version = (self.version.len() + 1 + 3) & !3;
        let directory: usize = self
            .stream_headers
            .iter()
            .map(|header| 8 + ((header.name.len() + 1 + 3) & !3))
            .sum();
        16 + version + 4 + directory
    }

    /// Append the serialized root to `buffer`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write(&self, buffer: &mut Vec<u8>) {
        write_le(buffer, CIL_HEADER_MAGIC);
        write_le(buffer, self.major_version);
        write_le(buffer, self.minor_version);
        write_le(buffer, 0_u32);

        let version_length = (self.version.len() + 1 + 3) & !3;
        write_le(buffer, version_length as u32);
        let start = buffer.len();
        buffer.extend_from_slice(self.version.as_bytes());
        buffer.resize(start + version_length, 0);

        write_le(buffer, self.flags);
        write_le(buffer, self.stream_headers.len() as u16);
        for header in &self.stream_headers {
            write_le(buffer, header.offset);
            write_le(buffer, header.size);
            buffer.extend_from_slice(header.name.as_bytes());
            buffer.push(0);
            pad_to(buffer, 4);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Root {
        Root {
            major_version: 1,
            minor_version: 1,
            version: DEFAULT_RUNTIME_VERSION.to_string(),
            flags: 0,
            stream_headers: vec![
                StreamHeader {
                    offset: 0x6C,
                    size: 4,
                    name: "#~".to_string(),
                },
                StreamHeader {
                    offset: 0x70,
                    size: 4,
                    name: "#Strings".to_string(),
                },
            ],
        }
    }

    #[test]
    fn write_then_read() {
        let root = sample();
        let mut buffer = Vec::new();
        root.write(&mut buffer);
        assert_eq!(buffer.len(), root.size());
        // version "v4.0.30319" + NUL is padded to 12 bytes
        assert_eq!(&buffer[12..16], &[12, 0, 0, 0]);

        buffer.resize(0x74, 0);
        let parsed = Root::read(&buffer).unwrap();
        assert_eq!(parsed, root);
        assert_eq!(parsed.stream("#Strings").map(|s| s.offset), Some(0x70));
        assert!(parsed.stream("#Blob").is_none());
    }

    #[test]
    fn bad_magic() {
        let mut buffer = Vec::new();
        sample().write(&mut buffer);
        buffer[0] = 0;
        assert!(matches!(
            Root::read(&buffer),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn stream_outside_metadata() {
        let root = sample();
        let mut buffer = Vec::new();
        root.write(&mut buffer);
        assert!(matches!(Root::read(&buffer), Err(crate::Error::OutOfBounds)));
    }
}
