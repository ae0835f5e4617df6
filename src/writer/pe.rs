//! PE/COFF layout of the written image.
//!
//! The image has up to three sections:
//!
//! ```text
//! .text   [IAT] CLI header | code | field data | resources | signature | metadata | [imports, stub]
//! .rsrc   the unmanaged resource directory of the source image, relocated
//! .reloc  one base relocation for the stub's indirect jump
//! ```
//!
//! The bracketed parts and `.reloc` only exist for PE32 images written with the native
//! stub. Everything in `.text` before the code has a fixed size, so code RVAs are known
//! before the tables are written.

use crate::{
    file::io::{pad_to, read_le_at, write_le, write_le_at},
    metadata::{
        cor20header::{
            Cor20Header, COMIMAGE_FLAGS_NATIVE_ENTRYPOINT, COMIMAGE_FLAGS_STRONGNAMESIGNED,
            COR20_HEADER_SIZE,
        },
        token::Token,
    },
    model::{ImageInfo, Win32Resources},
    writer::{tables::align, WriterOptions},
    Result,
};

const FILE_ALIGNMENT: u32 = 0x200;
const SECTION_ALIGNMENT: u32 = 0x2000;
const TEXT_RVA: u32 = 0x2000;
const DOS_HEADER_SIZE: u32 = 0x80;
const SECTION_HEADER_SIZE: u32 = 40;
const DIRECTORY_COUNT: u32 = 16;

const DIRECTORY_IMPORT: usize = 1;
const DIRECTORY_RESOURCE: usize = 2;
const DIRECTORY_BASERELOC: usize = 5;
const DIRECTORY_IAT: usize = 12;
const DIRECTORY_CLR_RUNTIME: usize = 14;

const SCN_TEXT: u32 = 0x6000_0020;
const SCN_RSRC: u32 = 0x4000_0040;
const SCN_RELOC: u32 = 0x4200_0040;

/// `IMAGE_REL_BASED_HIGHLOW`
const REL_BASED_HIGHLOW: u16 = 3;
/// Directory nesting of a resource tree is type, name, language
const MAX_RESOURCE_DEPTH: usize = 8;

const DOS_STUB: [u8; 64] = [
    0x0E, 0x1F, 0xBA, 0x0E, 0x00, 0xB4, 0x09, 0xCD, 0x21, 0xB8, 0x01, 0x4C, 0xCD, 0x21, 0x54,
    0x68, 0x69, 0x73, 0x20, 0x70, 0x72, 0x6F, 0x67, 0x72, 0x61, 0x6D, 0x20, 0x63, 0x61, 0x6E,
    0x6E, 0x6F, 0x74, 0x20, 0x62, 0x65, 0x20, 0x72, 0x75, 0x6E, 0x20, 0x69, 0x6E, 0x20, 0x44,
    0x4F, 0x53, 0x20, 0x6D, 0x6F, 0x64, 0x65, 0x2E, 0x0D, 0x0D, 0x0A, 0x24, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

/// Whether `image` gets the `mscoree.dll` import, entry stub and relocation.
pub(crate) fn has_native_stub(image: &ImageInfo, options: &WriterOptions) -> bool {
    options.emit_native_stub && !image.pe32_plus
}

/// RVA of the first method body.
pub(crate) fn code_rva(native_stub: bool) -> u32 {
    TEXT_RVA + if native_stub { 8 } else { 0 } + COR20_HEADER_SIZE
}

/// The managed content of `.text`, produced by the table passes.
pub(crate) struct ManagedData {
    pub code: Vec<u8>,
    pub field_data: Vec<u8>,
    pub field_data_rva: u32,
    pub resources: Vec<u8>,
    pub metadata: Vec<u8>,
    pub entry_point: Token,
}

/// A finished image and where the strong-name signature goes.
pub(crate) struct Image {
    pub bytes: Vec<u8>,
    /// File offset of the reserved signature and its size
    pub strong_name: Option<(usize, usize)>,
    /// File offset of the metadata block
    pub metadata_offset: usize,
}

struct Section {
    name: [u8; 8],
    rva: u32,
    data: Vec<u8>,
    characteristics: u32,
}

impl Section {
    fn virtual_size(&self) -> u32 {
        u32::try_from(self.data.len()).unwrap_or(u32::MAX)
    }

    fn raw_size(&self) -> u32 {
        align(self.virtual_size(), FILE_ALIGNMENT)
    }
}

fn section_name(name: &str) -> [u8; 8] {
    let mut bytes = [0_u8; 8];
    bytes[..name.len()].copy_from_slice(name.as_bytes());
    bytes
}

#[allow(clippy::cast_possible_truncation)]
fn len32(data: &[u8]) -> u32 {
    data.len() as u32
}

/// Lay out the image around `managed`.
#[allow(clippy::cast_possible_truncation, clippy::too_many_lines)]
pub(crate) fn write_image(
    image: &ImageInfo,
    options: &WriterOptions,
    managed: ManagedData,
) -> Result<Image> {
    let native_stub = has_native_stub(image, options);
    let mut directories = [(0_u32, 0_u32); DIRECTORY_COUNT as usize];

    // .text, built at offsets relative to TEXT_RVA
    let mut text = Vec::new();
    if native_stub {
        text.resize(8, 0);
        directories[DIRECTORY_IAT] = (TEXT_RVA, 8);
    }
    let cor20_at = text.len();
    text.resize(cor20_at + COR20_HEADER_SIZE as usize, 0);
    debug_assert_eq!(TEXT_RVA + len32(&text), code_rva(native_stub));
    text.extend_from_slice(&managed.code);

    if !managed.field_data.is_empty() {
        text.resize((managed.field_data_rva - TEXT_RVA) as usize, 0);
        text.extend_from_slice(&managed.field_data);
    }

    let resources = if managed.resources.is_empty() {
        (0, 0)
    } else {
        pad_to(&mut text, 8);
        let rva = TEXT_RVA + len32(&text);
        text.extend_from_slice(&managed.resources);
        (rva, len32(&managed.resources))
    };

    let strong_name = match &options.strong_name {
        Some(strong_name) => {
            pad_to(&mut text, 4);
            let at = text.len();
            text.resize(at + strong_name.signature_size as usize, 0);
            Some((at, strong_name.signature_size))
        }
        None => None,
    };

    pad_to(&mut text, 4);
    let metadata_at = text.len();
    text.extend_from_slice(&managed.metadata);

    let mut entry_point = 0;
    let mut jump_operand = None;
    if native_stub {
        pad_to(&mut text, 4);
        let import_rva = TEXT_RVA + len32(&text);
        let lookup_rva = import_rva + 40;
        let hint_name_rva = lookup_rva + 8;
        let entry_name: &[u8] = if image.is_dll() {
            b"_CorDllMain\0"
        } else {
            b"_CorExeMain\0"
        };
        let dll_name_rva = hint_name_rva + 2 + len32(entry_name);

        write_le(&mut text, lookup_rva);
        write_le(&mut text, 0_u32);
        write_le(&mut text, 0_u32);
        write_le(&mut text, dll_name_rva);
        write_le(&mut text, TEXT_RVA);
        text.extend_from_slice(&[0; 20]);
        write_le(&mut text, hint_name_rva);
        write_le(&mut text, 0_u32);
        write_le(&mut text, 0_u16);
        text.extend_from_slice(entry_name);
        text.extend_from_slice(b"mscoree.dll\0");
        directories[DIRECTORY_IMPORT] = (import_rva, 40);

        // IAT slot, resolved by the loader to the hint/name entry
        write_le_at(&mut text, &mut 0, hint_name_rva)?;

        pad_to(&mut text, 4);
        text.extend_from_slice(&[0, 0, 0xFF, 0x25]);
        entry_point = TEXT_RVA + len32(&text) - 2;
        jump_operand = Some(TEXT_RVA + len32(&text));
        write_le(&mut text, (image.image_base as u32).wrapping_add(TEXT_RVA));
    }

    let mut flags = image.cor_flags & !COMIMAGE_FLAGS_NATIVE_ENTRYPOINT;
    if strong_name.is_some() {
        flags |= COMIMAGE_FLAGS_STRONGNAMESIGNED;
    } else {
        flags &= !COMIMAGE_FLAGS_STRONGNAMESIGNED;
    }
    let cor20 = Cor20Header {
        major_runtime_version: 2,
        minor_runtime_version: 5,
        metadata_rva: TEXT_RVA + metadata_at as u32,
        metadata_size: len32(&managed.metadata),
        flags,
        entry_point_token: managed.entry_point.value(),
        resource_rva: resources.0,
        resource_size: resources.1,
        strong_name_rva: strong_name.map_or(0, |(at, _)| TEXT_RVA + at as u32),
        strong_name_size: strong_name.map_or(0, |(_, size)| size),
        vtable_fixups_rva: 0,
    };
    let mut header = Vec::with_capacity(COR20_HEADER_SIZE as usize);
    cor20.write(&mut header);
    text[cor20_at..cor20_at + header.len()].copy_from_slice(&header);
    directories[DIRECTORY_CLR_RUNTIME] = (TEXT_RVA + cor20_at as u32, COR20_HEADER_SIZE);

    let mut sections = vec![Section {
        name: section_name(".text"),
        rva: TEXT_RVA,
        data: text,
        characteristics: SCN_TEXT,
    }];

    if options.preserve_win32_resources {
        if let Some(win32) = &image.win32_resources {
            let rva = next_rva(&sections);
            let data = relocate_resources(win32, rva)?;
            directories[DIRECTORY_RESOURCE] = (rva, len32(&data));
            sections.push(Section {
                name: section_name(".rsrc"),
                rva,
                data,
                characteristics: SCN_RSRC,
            });
        }
    }

    if let Some(operand) = jump_operand {
        let rva = next_rva(&sections);
        let page = operand & !0xFFF;
        let mut data = Vec::with_capacity(12);
        write_le(&mut data, page);
        write_le(&mut data, 12_u32);
        write_le(&mut data, (REL_BASED_HIGHLOW << 12) | (operand - page) as u16);
        write_le(&mut data, 0_u16);
        directories[DIRECTORY_BASERELOC] = (rva, 12);
        sections.push(Section {
            name: section_name(".reloc"),
            rva,
            data,
            characteristics: SCN_RELOC,
        });
    }

    let optional_size: u32 = if image.pe32_plus { 0xF0 } else { 0xE0 };
    let headers_size = align(
        DOS_HEADER_SIZE + 4 + 20 + optional_size + SECTION_HEADER_SIZE * len32_sections(&sections),
        FILE_ALIGNMENT,
    );

    let mut bytes = Vec::new();
    write_dos_header(&mut bytes);
    bytes.extend_from_slice(b"PE\0\0");

    // COFF header
    write_le(&mut bytes, image.machine);
    write_le(&mut bytes, len32_sections(&sections) as u16);
    write_le(&mut bytes, 0_u32);
    write_le(&mut bytes, 0_u32);
    write_le(&mut bytes, 0_u32);
    write_le(&mut bytes, optional_size as u16);
    write_le(&mut bytes, image.characteristics);

    let code_size = sections[0].raw_size();
    let data_size: u32 = sections[1..].iter().map(Section::raw_size).sum();
    let image_size = align(next_rva(&sections), SECTION_ALIGNMENT);

    write_le(&mut bytes, if image.pe32_plus { 0x20B_u16 } else { 0x10B_u16 });
    write_le(&mut bytes, 8_u8);
    write_le(&mut bytes, 0_u8);
    write_le(&mut bytes, code_size);
    write_le(&mut bytes, data_size);
    write_le(&mut bytes, 0_u32);
    write_le(&mut bytes, entry_point);
    write_le(&mut bytes, TEXT_RVA);
    if image.pe32_plus {
        write_le(&mut bytes, image.image_base);
    } else {
        write_le(&mut bytes, sections.get(1).map_or(0, |section| section.rva));
        write_le(&mut bytes, image.image_base as u32);
    }
    write_le(&mut bytes, SECTION_ALIGNMENT);
    write_le(&mut bytes, FILE_ALIGNMENT);
    // OS, image and subsystem versions
    for version in [4_u16, 0, 0, 0, 4, 0] {
        write_le(&mut bytes, version);
    }
    write_le(&mut bytes, 0_u32);
    write_le(&mut bytes, image_size);
    write_le(&mut bytes, headers_size);
    write_le(&mut bytes, 0_u32);
    write_le(&mut bytes, image.subsystem);
    write_le(&mut bytes, image.dll_characteristics);
    for size in [0x0010_0000_u32, 0x1000, 0x0010_0000, 0x1000] {
        if image.pe32_plus {
            write_le(&mut bytes, u64::from(size));
        } else {
            write_le(&mut bytes, size);
        }
    }
    write_le(&mut bytes, 0_u32);
    write_le(&mut bytes, DIRECTORY_COUNT);
    for (rva, size) in directories {
        write_le(&mut bytes, rva);
        write_le(&mut bytes, size);
    }

    let mut raw_offset = headers_size;
    for section in &sections {
        bytes.extend_from_slice(&section.name);
        write_le(&mut bytes, section.virtual_size());
        write_le(&mut bytes, section.rva);
        write_le(&mut bytes, section.raw_size());
        write_le(&mut bytes, raw_offset);
        bytes.extend_from_slice(&[0; 12]);
        write_le(&mut bytes, section.characteristics);
        raw_offset += section.raw_size();
    }

    bytes.resize(headers_size as usize, 0);
    let text_offset = bytes.len();
    for section in sections {
        let end = bytes.len() + section.raw_size() as usize;
        bytes.extend_from_slice(&section.data);
        bytes.resize(end, 0);
    }

    Ok(Image {
        bytes,
        strong_name: strong_name.map(|(at, size)| (text_offset + at, size as usize)),
        metadata_offset: text_offset + metadata_at,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn len32_sections(sections: &[Section]) -> u32 {
    sections.len() as u32
}

fn next_rva(sections: &[Section]) -> u32 {
    sections.last().map_or(TEXT_RVA, |last| {
        align(last.rva + last.virtual_size(), SECTION_ALIGNMENT)
    })
}

fn write_dos_header(bytes: &mut Vec<u8>) {
    bytes.extend_from_slice(b"MZ");
    write_le(bytes, 0x90_u16);
    write_le(bytes, 3_u16);
    write_le(bytes, 0_u16);
    write_le(bytes, 4_u16);
    write_le(bytes, 0_u16);
    write_le(bytes, 0xFFFF_u16);
    write_le(bytes, 0_u16);
    write_le(bytes, 0xB8_u16);
    bytes.resize(0x18, 0);
    write_le(bytes, 0x40_u16);
    bytes.resize(0x3C, 0);
    write_le(bytes, DOS_HEADER_SIZE);
    bytes.extend_from_slice(&DOS_STUB);
}

/// Copy a resource directory and move its data entries to `new_rva`.
fn relocate_resources(win32: &Win32Resources, new_rva: u32) -> Result<Vec<u8>> {
    let mut data = win32.data.clone();
    let mut entries = Vec::new();
    collect_data_entries(&data, 0, 0, &mut entries)?;

    let end = win32.rva + len32(&data);
    for at in entries {
        let old: u32 = read_le_at(&data, &mut at.clone())?;
        if old < win32.rva || old >= end {
            return Err(encode_error!(
                "Win32 resources",
                "data at RVA 0x{:08x} lies outside the resource section",
                old
            ));
        }
        write_le_at(&mut data, &mut at.clone(), old - win32.rva + new_rva)?;
    }
    Ok(data)
}

/// Offsets of every `IMAGE_RESOURCE_DATA_ENTRY` below the directory at `offset`.
fn collect_data_entries(
    data: &[u8],
    offset: usize,
    depth: usize,
    entries: &mut Vec<usize>,
) -> Result<()> {
    if depth >= MAX_RESOURCE_DEPTH {
        return Err(encode_error!("Win32 resources", "directory nesting exceeds {}", MAX_RESOURCE_DEPTH));
    }
    let named: u16 = read_le_at(data, &mut (offset + 12))?;
    let ids: u16 = read_le_at(data, &mut (offset + 14))?;
    for index in 0..usize::from(named) + usize::from(ids) {
        let mut cursor = offset + 16 + index * 8 + 4;
        let target: u32 = read_le_at(data, &mut cursor)?;
        let target_offset = (target & 0x7FFF_FFFF) as usize;
        if target & 0x8000_0000 != 0 {
            collect_data_entries(data, target_offset, depth + 1, entries)?;
        } else {
            if target_offset + 16 > data.len() {
                return Err(out_of_bounds_error!());
            }
            entries.push(target_offset);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::root::{Root, StreamHeader, CIL_HEADER_MAGIC, DEFAULT_RUNTIME_VERSION};

    /// A metadata root with one empty `#~` stream, enough for PE parsers that follow
    /// the CLI header into the metadata.
    #[allow(clippy::cast_possible_truncation)]
    fn metadata() -> Vec<u8> {
        let mut root = Root {
            major_version: 1,
            minor_version: 1,
            version: DEFAULT_RUNTIME_VERSION.to_string(),
            flags: 0,
            stream_headers: vec![StreamHeader {
                offset: 0,
                size: 0,
                name: "#~".to_string(),
            }],
        };
        root.stream_headers[0].offset = root.size() as u32;
        let mut data = Vec::new();
        root.write(&mut data);
        data
    }

    fn managed() -> ManagedData {
        ManagedData {
            code: vec![0x06, 0x2A],
            field_data: Vec::new(),
            field_data_rva: 0,
            resources: Vec::new(),
            metadata: metadata(),
            entry_point: Token(0x0600_0001),
        }
    }

    /// A directory with one type, one name and one language entry.
    fn resource_tree(section_rva: u32) -> Vec<u8> {
        let mut data = Vec::new();
        for (level, next) in [(0_u32, 0x18_u32 | 0x8000_0000), (0, 0x30 | 0x8000_0000), (0, 0x48)] {
            data.extend_from_slice(&[0; 12]);
            write_le(&mut data, 0_u16);
            write_le(&mut data, 1_u16);
            write_le(&mut data, level + 1);
            write_le(&mut data, next);
        }
        write_le(&mut data, section_rva + 0x58);
        write_le(&mut data, 4_u32);
        write_le(&mut data, 0_u32);
        write_le(&mut data, 0_u32);
        data.extend_from_slice(b"DATA");
        data
    }

    #[test]
    fn stub_and_relocation_for_pe32() {
        let image = ImageInfo::default();
        let options = WriterOptions::default();
        let written = write_image(&image, &options, managed()).unwrap();
        let pe = goblin::pe::PE::parse(&written.bytes).unwrap();

        let names: Vec<String> = pe.sections.iter().map(|s| s.name().unwrap().to_string()).collect();
        assert_eq!(names, [".text", ".reloc"]);
        assert_eq!(pe.imports.len(), 1);
        assert_eq!(pe.imports[0].name, "_CorExeMain");
        assert_eq!(pe.imports[0].dll, "mscoree.dll");
        assert_ne!(pe.entry, 0);
        assert!(pe.relocation_data.is_some());
        assert!(pe.clr_data.as_ref().is_some_and(|clr| clr.is_valid()));

        let text = &pe.sections[0];
        let body_offset = text.pointer_to_raw_data as usize + (code_rva(true) - TEXT_RVA) as usize;
        assert_eq!(&written.bytes[body_offset..body_offset + 2], &[0x06, 0x2A]);
        assert_eq!(
            &written.bytes[written.metadata_offset..written.metadata_offset + 4],
            &CIL_HEADER_MAGIC.to_le_bytes()
        );
    }

    #[test]
    fn pe32_plus_has_no_stub() {
        let image = ImageInfo {
            machine: crate::file::MACHINE_AMD64,
            pe32_plus: true,
            characteristics: 0x0022,
            ..ImageInfo::default()
        };
        let options = WriterOptions::default().with_strong_name(vec![1; 160], 128);
        let written = write_image(&image, &options, managed()).unwrap();
        let pe = goblin::pe::PE::parse(&written.bytes).unwrap();

        assert!(pe.is_64);
        assert_eq!(pe.sections.len(), 1);
        assert!(pe.imports.is_empty());
        assert!(pe.relocation_data.is_none());
        assert!(pe.clr_data.as_ref().is_some_and(|clr| clr.is_valid()));
        let (offset, size) = written.strong_name.unwrap();
        assert_eq!(size, 128);
        assert!(written.bytes[offset..offset + size].iter().all(|byte| *byte == 0));
        assert!(offset + size <= written.metadata_offset);
    }

    #[test]
    fn resources_are_relocated() {
        let original = Win32Resources {
            rva: 0x8000,
            data: resource_tree(0x8000),
        };
        let moved = relocate_resources(&original, 0x4000).unwrap();
        let entry: u32 = read_le_at(&moved, &mut 0x48_usize).unwrap();
        assert_eq!(entry, 0x4058);
        assert_eq!(&moved[0x58..], b"DATA");

        let outside = Win32Resources {
            rva: 0x9000,
            data: resource_tree(0x8000),
        };
        assert!(relocate_resources(&outside, 0x4000).is_err());
    }
}
