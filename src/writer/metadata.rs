//! Serialization of the metadata block: root, stream directory and the five streams.

use log::debug;
use sha1::{Digest, Sha1};

use crate::{
    file::io::pad_to,
    metadata::{
        root::{Root, StreamHeader},
        streams::write_tables,
    },
    writer::{heaps::heap_sizes, tables::TableBuilder},
    Result,
};

/// The metadata block and where its MVID landed.
pub(crate) struct Metadata {
    pub bytes: Vec<u8>,
    /// Offset of the derived MVID inside `bytes`
    pub mvid_offset: Option<usize>,
}

/// Assemble the metadata block of `builder`, using `version` as the runtime version.
///
/// With a derived MVID, the GUID is computed from the block with the MVID slot still
/// zero: SHA-1 over the bytes, truncated to 16 and marked as a name-based GUID.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn serialize(builder: TableBuilder<'_>, version: &str) -> Result<Metadata> {
    let TableBuilder {
        emitter, mvid_index, ..
    } = builder;
    let sizes = heap_sizes(&emitter.strings, &emitter.guids, &emitter.blobs);

    let mut tables = Vec::new();
    write_tables(&emitter.tables, sizes, &mut tables);
    pad_to(&mut tables, 4);

    let streams = [
        ("#~", tables),
        ("#Strings", emitter.strings.finish()),
        ("#US", emitter.user_strings.finish()),
        ("#GUID", emitter.guids.finish()),
        ("#Blob", emitter.blobs.finish()),
    ];

    let mut root = Root {
        major_version: 1,
        minor_version: 1,
        version: version.to_string(),
        flags: 0,
        stream_headers: streams
            .iter()
            .map(|(name, data)| StreamHeader {
                offset: 0,
                size: data.len() as u32,
                name: (*name).to_string(),
            })
            .collect(),
    };
    let mut offset = root.size();
    for header in &mut root.stream_headers {
        header.offset = offset as u32;
        offset += header.size as usize;
    }

    let mut bytes = Vec::with_capacity(offset);
    root.write(&mut bytes);
    let mut guid_start = 0;
    for (name, data) in &streams {
        if *name == "#GUID" {
            guid_start = bytes.len();
        }
        bytes.extend_from_slice(data);
    }

    let mvid_offset = mvid_index
        .filter(|index| *index > 0)
        .map(|index| guid_start + (index as usize - 1) * 16);
    if let Some(at) = mvid_offset {
        let mvid = derive_mvid(&bytes);
        bytes[at..at + 16].copy_from_slice(&mvid);
        debug!("Writer: derived MVID {}", uguid::Guid::from_bytes(mvid));
    }

    Ok(Metadata { bytes, mvid_offset })
}

/// A version 5 GUID from the SHA-1 of `data`.
fn derive_mvid(data: &[u8]) -> [u8; 16] {
    let digest = Sha1::digest(data);
    let mut mvid = [0_u8; 16];
    mvid.copy_from_slice(&digest[..16]);
    // version nibble is the top of the third field, stored little endian
    mvid[7] = (mvid[7] & 0x0F) | 0x50;
    mvid[8] = (mvid[8] & 0x3F) | 0x80;
    mvid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::ModuleGraph, writer::WriterOptions};

    #[test]
    fn streams_are_laid_out_after_the_root() {
        let graph = ModuleGraph::new("Demo.dll");
        let options = WriterOptions::default();
        let builder = TableBuilder::build(&graph, &options, 0x2050).unwrap();
        let metadata = serialize(builder, "v4.0.30319").unwrap();

        let root = Root::read(&metadata.bytes).unwrap();
        let names: Vec<&str> = root.stream_headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["#~", "#Strings", "#US", "#GUID", "#Blob"]);
        let last = root.stream_headers.last().unwrap();
        assert_eq!((last.offset + last.size) as usize, metadata.bytes.len());
        assert!(root.stream_headers.iter().all(|h| h.offset % 4 == 0));
        assert_eq!(metadata.mvid_offset, None);
    }

    #[test]
    fn derived_mvid_is_stable_and_versioned() {
        let mut graph = ModuleGraph::new("Demo.dll");
        graph.add_type("Demo", "Program", 0, None);
        let options = WriterOptions::deterministic();

        let first = serialize(TableBuilder::build(&graph, &options, 0x2050).unwrap(), "v4.0.30319").unwrap();
        let second = serialize(TableBuilder::build(&graph, &options, 0x2050).unwrap(), "v4.0.30319").unwrap();
        assert_eq!(first.bytes, second.bytes);

        let at = first.mvid_offset.unwrap();
        let mvid = &first.bytes[at..at + 16];
        assert_ne!(mvid, &[0; 16]);
        assert_eq!(mvid[7] >> 4, 5);
        assert_eq!(mvid[8] & 0xC0, 0x80);
    }
}
