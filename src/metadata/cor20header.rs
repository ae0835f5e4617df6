//! The CLI header (`IMAGE_COR20_HEADER`), ECMA-335 II.25.3.3.

use crate::{
    file::{io::write_le, parser::Parser},
    Result,
};

/// Image contains only IL code
pub const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
/// Image can only be loaded into a 32-bit process
pub const COMIMAGE_FLAGS_32BITREQUIRED: u32 = 0x0000_0002;
/// Image has a strong name signature
pub const COMIMAGE_FLAGS_STRONGNAMESIGNED: u32 = 0x0000_0008;
/// Entry point is a native RVA rather than a token
pub const COMIMAGE_FLAGS_NATIVE_ENTRYPOINT: u32 = 0x0000_0010;
/// Prefer a 32-bit process when the image is AnyCPU
pub const COMIMAGE_FLAGS_32BITPREFERRED: u32 = 0x0002_0000;

/// Serialized size of the header
pub const COR20_HEADER_SIZE: u32 = 72;

/// The CLI header fields this engine reads and writes.
///
/// Code manager, vtable fixup, export address and managed native header directories
/// describe mixed-mode images, which are rejected by the loader, so they are not kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cor20Header {
    /// Runtime major version, 2
    pub major_runtime_version: u16,
    /// Runtime minor version, 5
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub metadata_rva: u32,
    /// Size of the metadata block
    pub metadata_size: u32,
    /// `COMIMAGE_FLAGS_*`
    pub flags: u32,
    /// Entry point MethodDef (or File) token
    pub entry_point_token: u32,
    /// RVA of the managed resources blob
    pub resource_rva: u32,
    /// Size of the managed resources blob
    pub resource_size: u32,
    /// RVA of the strong name signature
    pub strong_name_rva: u32,
    /// Size of the strong name signature
    pub strong_name_size: u32,
    /// RVA of the vtable fixups, non-zero for mixed-mode images
    pub vtable_fixups_rva: u32,
}

impl Cor20Header {
    /// Parse the header from its 72 bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncation and [`crate::Error::Malformed`]
    /// for a size field other than 72 or an empty metadata directory.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb != COR20_HEADER_SIZE {
            return Err(malformed_error!("Invalid CLI header size - {}", cb));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;
        let metadata_rva = parser.read_le::<u32>()?;
        let metadata_size = parser.read_le::<u32>()?;
        let flags = parser.read_le::<u32>()?;
        let entry_point_token = parser.read_le::<u32>()?;
        let resource_rva = parser.read_le::<u32>()?;
        let resource_size = parser.read_le::<u32>()?;
        let strong_name_rva = parser.read_le::<u32>()?;
        let strong_name_size = parser.read_le::<u32>()?;
        // CodeManagerTable
        parser.advance_by(8)?;
        let vtable_fixups_rva = parser.read_le::<u32>()?;

        if metadata_rva == 0 || metadata_size == 0 {
            return Err(malformed_error!("CLI header has no metadata directory"));
        }

        Ok(Cor20Header {
            major_runtime_version,
            minor_runtime_version,
            metadata_rva,
            metadata_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_rva,
            strong_name_size,
            vtable_fixups_rva,
        })
    }

    /// Append the 72 serialized bytes to `buffer`.
    pub fn write(&self, buffer: &mut Vec<u8>) {
        write_le(buffer, COR20_HEADER_SIZE);
        write_le(buffer, self.major_runtime_version);
        write_le(buffer, self.minor_runtime_version);
        write_le(buffer, self.metadata_rva);
        write_le(buffer, self.metadata_size);
        write_le(buffer, self.flags);
        write_le(buffer, self.entry_point_token);
        write_le(buffer, self.resource_rva);
        write_le(buffer, self.resource_size);
        write_le(buffer, self.strong_name_rva);
        write_le(buffer, self.strong_name_size);
        // CodeManagerTable, VTableFixups, ExportAddressTableJumps, ManagedNativeHeader
        buffer.resize(buffer.len() + 32, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let header = Cor20Header {
            major_runtime_version: 2,
            minor_runtime_version: 5,
            metadata_rva: 0x2100,
            metadata_size: 0x400,
            flags: COMIMAGE_FLAGS_ILONLY | COMIMAGE_FLAGS_STRONGNAMESIGNED,
            entry_point_token: 0x0600_0001,
            resource_rva: 0,
            resource_size: 0,
            strong_name_rva: 0x2080,
            strong_name_size: 0x80,
            vtable_fixups_rva: 0,
        };

        let mut buffer = Vec::new();
        header.write(&mut buffer);
        assert_eq!(buffer.len(), COR20_HEADER_SIZE as usize);
        assert_eq!(Cor20Header::read(&buffer).unwrap(), header);
    }

    #[test]
    fn rejects_wrong_size() {
        let mut buffer = Vec::new();
        Cor20Header {
            metadata_rva: 1,
            metadata_size: 1,
            ..Default::default()
        }
        .write(&mut buffer);
        buffer[0] = 0x40;
        assert!(Cor20Header::read(&buffer).is_err());
        assert!(Cor20Header::read(&buffer[..10]).is_err());
    }
}
