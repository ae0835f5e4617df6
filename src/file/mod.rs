//! PE container access.
//!
//! [`File`] wraps an image together with its goblin-parsed PE headers. It is the
//! only place that understands sections and data directories; everything above it
//! works in terms of RVAs and the CLI header.
//!
//! Two backends supply the bytes:
//! - [`memory::Memory`] - an owned buffer, for images already in memory
//! - [`physical::Physical`] - a memory-mapped file
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilweave::file::File;
//!
//! let file = File::from_file("input.dll".as_ref())?;
//! let (clr_rva, clr_size) = file.clr()?;
//! let header = file.data_slice(file.rva_to_offset(clr_rva)?, clr_size)?;
//! assert_eq!(header.len(), 72);
//! # Ok::<(), cilweave::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use goblin::pe::{optional_header::OptionalHeader, section_table::SectionTable, PE};
use ouroboros::self_referencing;

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};
use memory::Memory;
use physical::Physical;

/// `IMAGE_FILE_MACHINE_I386`
pub const MACHINE_I386: u16 = 0x014C;
/// `IMAGE_FILE_MACHINE_AMD64`
pub const MACHINE_AMD64: u16 = 0x8664;
/// `IMAGE_FILE_MACHINE_ARM64`
pub const MACHINE_ARM64: u16 = 0xAA64;
/// `IMAGE_FILE_DLL` characteristic
pub const CHARACTERISTICS_DLL: u16 = 0x2000;

/// Index of the resource table in the data directory array
pub const DIRECTORY_RESOURCE: usize = 2;
/// Index of the CLI header in the data directory array
pub const DIRECTORY_CLR_RUNTIME: usize = 14;

/// Source of the raw image bytes.
///
/// Both backends give the whole image as one contiguous slice.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

#[self_referencing]
/// A loaded PE image that carries a CLI header.
///
/// Loading fails for anything that is not a PE file, and for PE files without a
/// CLR runtime header data directory, so every accessor below may assume both.
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// The parsed PE structure, referencing the data.
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Load and validate an image from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is empty, is not a PE image, or
    /// has no CLI header.
    pub fn from_file(file: &Path) -> Result<File> {
        Self::load(Physical::new(file)?)
    }

    /// Load and validate an image from an owned buffer.
    ///
    /// # Errors
    ///
    /// Same conditions as [`File::from_file`], minus the IO ones.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        Self::load(Memory::new(data))
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        File::try_new(Box::new(data), |data| match PE::parse(data.data()) {
            Ok(pe) => match pe.header.optional_header {
                Some(optional_header) => {
                    if optional_header
                        .data_directories
                        .get_clr_runtime_header()
                        .is_none()
                    {
                        Err(crate::Error::NotSupported)
                    } else {
                        Ok(pe)
                    }
                }
                None => Err(malformed_error!("File does not have an OptionalHeader")),
            },
            Err(error) => Err(GoblinErr(error)),
        })
    }

    /// Size of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Whether the image is empty. Never true for a successfully loaded file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// A bounds-checked slice of the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range leaves the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// The optional header, whose presence was checked during loading.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if it is missing.
    pub fn optional_header(&self) -> Result<OptionalHeader> {
        self.with_pe(|pe| pe.header.optional_header)
            .ok_or_else(|| malformed_error!("File does not have an OptionalHeader"))
    }

    /// RVA and size of the CLI (COR20) header.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] if the image has no CLI header.
    pub fn clr(&self) -> Result<(usize, usize)> {
        self.data_directory(DIRECTORY_CLR_RUNTIME)
            .map(|(rva, size)| (rva as usize, size as usize))
            .ok_or(crate::Error::NotSupported)
    }

    /// RVA and size of a non-empty data directory, by index.
    #[must_use]
    pub fn data_directory(&self, index: usize) -> Option<(u32, u32)> {
        self.with_pe(|pe| {
            let optional_header = pe.header.optional_header.as_ref()?;
            optional_header
                .data_directories
                .dirs()
                .find(|(directory_type, directory)| {
                    *directory_type as usize == index
                        && directory.virtual_address != 0
                        && directory.size != 0
                })
                .map(|(_, directory)| (directory.virtual_address, directory.size))
        })
    }

    /// COFF machine type.
    #[must_use]
    pub fn machine(&self) -> u16 {
        self.with_pe(|pe| pe.header.coff_header.machine)
    }

    /// COFF characteristics.
    #[must_use]
    pub fn characteristics(&self) -> u16 {
        self.with_pe(|pe| pe.header.coff_header.characteristics)
    }

    /// Whether the optional header is the PE32+ flavour.
    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.with_pe(|pe| pe.is_64)
    }

    /// The section table.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// Translate an RVA into a file offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section contains the RVA.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        let rva_u32 =
            u32::try_from(rva).map_err(|_| malformed_error!("RVA too large to fit in u32: {}", rva))?;

        self.with_pe(|pe| {
            for section in &pe.sections {
                let extent = section.virtual_size.max(section.size_of_raw_data);
                let Some(section_max) = section.virtual_address.checked_add(extent) else {
                    return Err(malformed_error!(
                        "Section malformed, causing integer overflow - {} + {}",
                        section.virtual_address,
                        extent
                    ));
                };

                if section.virtual_address <= rva_u32 && rva_u32 < section_max {
                    return Ok((rva - section.virtual_address as usize)
                        + section.pointer_to_raw_data as usize);
                }
            }

            Err(malformed_error!(
                "RVA could not be converted to offset - 0x{:08X}",
                rva
            ))
        })
    }

    /// The section that contains `rva`, as (virtual address, file offset, raw size).
    #[must_use]
    pub fn section_containing(&self, rva: u32) -> Option<(u32, u32, u32)> {
        self.sections()
            .find(|section| {
                let extent = section.virtual_size.max(section.size_of_raw_data);
                section.virtual_address <= rva
                    && u64::from(rva) < u64::from(section.virtual_address) + u64::from(extent)
            })
            .map(|section| {
                (
                    section.virtual_address,
                    section.pointer_to_raw_data,
                    section.size_of_raw_data,
                )
            })
    }

    /// Read `len` bytes located at `rva`.
    ///
    /// # Errors
    /// Returns an error if the RVA is unmapped or the range leaves the image.
    pub fn rva_slice(&self, rva: u32, len: usize) -> Result<&[u8]> {
        let offset = self.rva_to_offset(rva as usize)?;
        self.data_slice(offset, len)
    }
}
