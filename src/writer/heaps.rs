//! Builders for the four metadata heaps.
//!
//! Every builder deduplicates its entries, so equal strings, blobs and GUIDs share
//! one offset. Offsets are final as soon as they are handed out; the heaps only grow.

use std::collections::HashMap;

use widestring::U16String;

use crate::{
    file::io::{pad_to, write_compressed_uint, write_le},
    metadata::tables::{HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS},
    Error, Result,
};

/// Offsets into the `#US` heap are stored in the low 24 bits of a token
const USER_STRING_LIMIT: usize = 0x00FF_FFFF;

/// The `#Strings` heap: NUL-terminated UTF-8.
pub(crate) struct StringHeap {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl StringHeap {
    pub fn new() -> Self {
        StringHeap {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Offset of `value`; the empty string is offset 0.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(offset) = self.offsets.get(value) {
            return *offset;
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.offsets.insert(value.to_string(), offset);
        offset
    }

    pub fn is_large(&self) -> bool {
        self.data.len() > usize::from(u16::MAX)
    }

    /// The heap, padded to four bytes.
    pub fn finish(mut self) -> Vec<u8> {
        pad_to(&mut self.data, 4);
        self.data
    }
}

/// The `#Blob` heap: length-prefixed byte strings.
pub(crate) struct BlobHeap {
    data: Vec<u8>,
    offsets: HashMap<Vec<u8>, u32>,
}

impl BlobHeap {
    pub fn new() -> Self {
        BlobHeap {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Offset of `value`; the empty blob is offset 0.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(offset) = self.offsets.get(value) {
            return Ok(*offset);
        }
        let length = u32::try_from(value.len())
            .ok()
            .filter(|length| *length <= 0x1FFF_FFFF)
            .ok_or_else(|| encode_error!("#Blob", "blob of {} bytes is too large", value.len()))?;

        let offset = self.data.len() as u32;
        write_compressed_uint(length, &mut self.data);
        self.data.extend_from_slice(value);
        self.offsets.insert(value.to_vec(), offset);
        Ok(offset)
    }

    pub fn is_large(&self) -> bool {
        self.data.len() > usize::from(u16::MAX)
    }

    pub fn finish(mut self) -> Vec<u8> {
        pad_to(&mut self.data, 4);
        self.data
    }
}

/// The `#GUID` heap: 16-byte entries addressed by 1-based index.
pub(crate) struct GuidHeap {
    data: Vec<u8>,
}

impl GuidHeap {
    pub fn new() -> Self {
        GuidHeap { data: Vec::new() }
    }

    /// Index of a new entry; a zero GUID is index 0.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add(&mut self, value: uguid::Guid) -> u32 {
        if value == uguid::Guid::ZERO {
            return 0;
        }
        let bytes = value.to_bytes();
        if let Some(position) = self.data.chunks(16).position(|entry| entry == bytes) {
            return position as u32 + 1;
        }
        self.data.extend_from_slice(&bytes);
        (self.data.len() / 16) as u32
    }

    /// Append an entry even if it is zero, for values patched after layout.
    #[allow(clippy::cast_possible_truncation)]
    pub fn reserve(&mut self) -> u32 {
        self.data.extend_from_slice(&[0; 16]);
        (self.data.len() / 16) as u32
    }

    pub fn is_large(&self) -> bool {
        self.data.len() / 16 > usize::from(u16::MAX)
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

/// The `#US` heap: UTF-16 literals with a trailing flag byte.
pub(crate) struct UserStringHeap {
    data: Vec<u8>,
    offsets: HashMap<U16String, u32>,
}

impl UserStringHeap {
    pub fn new() -> Self {
        UserStringHeap {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Offset of `value`, which becomes the row of a `0x70` token.
    ///
    /// # Errors
    /// Returns [`Error::Encode`] once the heap outgrows what a token can address.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add(&mut self, value: &U16String) -> Result<u32> {
        if let Some(offset) = self.offsets.get(value) {
            return Ok(*offset);
        }
        let offset = self.data.len();
        if offset > USER_STRING_LIMIT {
            return Err(Error::Encode {
                entity: "#US".to_string(),
                message: format!("heap exceeds {} bytes", USER_STRING_LIMIT),
            });
        }

        let units = value.as_slice();
        write_compressed_uint((units.len() * 2 + 1) as u32, &mut self.data);
        for unit in units {
            write_le(&mut self.data, *unit);
        }
        self.data.push(u8::from(units.iter().any(|unit| needs_flag(*unit))));

        self.offsets.insert(value.clone(), offset as u32);
        Ok(offset as u32)
    }

    pub fn finish(mut self) -> Vec<u8> {
        pad_to(&mut self.data, 4);
        self.data
    }
}

/// Whether a code unit sets the trailing byte of a `#US` entry (ECMA-335 II.24.2.4).
fn needs_flag(unit: u16) -> bool {
    unit > 0x7F || matches!(unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
}

/// The `HeapSizes` byte of the table stream.
pub(crate) fn heap_sizes(strings: &StringHeap, guids: &GuidHeap, blobs: &BlobHeap) -> u8 {
    let mut sizes = 0;
    if strings.is_large() {
        sizes |= HEAP_LARGE_STRINGS;
    }
    if guids.is_large() {
        sizes |= HEAP_LARGE_GUID;
    }
    if blobs.is_large() {
        sizes |= HEAP_LARGE_BLOB;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::streams::{Blob, Strings, UserStrings};

    #[test]
    fn strings_are_shared() {
        let mut heap = StringHeap::new();
        assert_eq!(heap.add(""), 0);
        let first = heap.add("Program");
        assert_eq!(heap.add("Main"), first + 8);
        assert_eq!(heap.add("Program"), first);

        let data = heap.finish();
        assert_eq!(data.len() % 4, 0);
        let strings = Strings::from(&data).unwrap();
        assert_eq!(strings.get(first as usize).unwrap(), "Program");
    }

    #[test]
    fn blobs_read_back() {
        let mut heap = BlobHeap::new();
        assert_eq!(heap.add(&[]).unwrap(), 0);
        let short = heap.add(&[0x06, 0x08]).unwrap();
        let long = heap.add(&[0xAB; 200]).unwrap();
        assert_eq!(heap.add(&[0x06, 0x08]).unwrap(), short);

        let data = heap.finish();
        let blobs = Blob::from(&data).unwrap();
        assert_eq!(blobs.get(short as usize).unwrap(), &[0x06, 0x08]);
        assert_eq!(blobs.get(long as usize).unwrap().len(), 200);
    }

    #[test]
    fn guids_are_one_based() {
        let mut heap = GuidHeap::new();
        let guid = uguid::guid!("01234567-89ab-cdef-0123-456789abcdef");
        assert_eq!(heap.add(uguid::Guid::ZERO), 0);
        assert_eq!(heap.add(guid), 1);
        assert_eq!(heap.add(guid), 1);
        assert_eq!(heap.reserve(), 2);
        assert_eq!(heap.finish().len(), 32);
    }

    #[test]
    fn user_strings_carry_the_flag_byte() {
        let mut heap = UserStringHeap::new();
        let plain = heap.add(&U16String::from_str("x")).unwrap();
        let quoted = heap.add(&U16String::from_str("it's")).unwrap();
        assert_eq!(plain, 1);
        assert_eq!(heap.add(&U16String::from_str("x")).unwrap(), plain);

        let data = heap.finish();
        assert_eq!(&data[1..5], &[3, b'x', 0, 0]);
        assert_eq!(data[quoted as usize + 9], 1);
        let strings = UserStrings::from(&data).unwrap();
        assert_eq!(strings.get(quoted as usize).unwrap().to_string_lossy(), "it's");
    }
}
