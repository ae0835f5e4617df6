//! Writing a [`ModuleGraph`] back to a PE image.
//!
//! The writer assigns fresh rows to everything reachable from the graph's type list,
//! encodes signatures and method bodies against those rows and lays the result out
//! as a new image. Nothing of the source image is patched in place; only its PE
//! properties ([`crate::model::ImageInfo`]) and, optionally, its unmanaged resources
//! are carried over.
//!
//! Writing is all or nothing. Every table, heap and section is staged in memory and
//! only a complete image is returned or flushed to disk; the first unresolvable
//! operand, unencodable signature or dangling handle aborts the write with
//! [`crate::Error::Encode`].
//!
//! References are written as definitions wherever the graph allows it: a type
//! reference naming a type of this module becomes its `TypeDef` token, and a member
//! reference matching a local method or field by name and signature becomes the
//! definition's token.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::{
//!     assembly::{MethodBody, OpCode, Operand},
//!     metadata::{method::MethodAttributes, signatures::{MethodSig, TypeSig}},
//!     model::{flags::TypeAttributes, ModuleGraph},
//!     writer::{write, WriterOptions},
//! };
//!
//! let mut graph = ModuleGraph::new("Demo.dll");
//! let object = graph.object_type();
//! let program = graph.add_type("Demo", "Program", TypeAttributes::PUBLIC, Some(object));
//! let main = graph.add_method(
//!     program,
//!     "Main",
//!     MethodAttributes::PUBLIC | MethodAttributes::STATIC,
//!     MethodSig::new_static(TypeSig::Void, vec![]),
//! );
//! let mut body = MethodBody::new();
//! body.push(OpCode::RET, Operand::None);
//! graph[main].body = Some(body);
//!
//! let image = write(&graph, &WriterOptions::default())?;
//! let reloaded = cilweave::loader::load(&image.bytes)?;
//! assert!(reloaded.find_type("Demo", "Program").is_some());
//! # Ok::<(), cilweave::Error>(())
//! ```

mod context;
mod heaps;
mod metadata;
mod options;
mod pe;
mod tables;

use std::{fs::OpenOptions, path::Path};

use log::debug;
use memmap2::MmapOptions;

pub use options::{StrongNameOptions, WriterOptions};

use crate::{
    metadata::root::DEFAULT_RUNTIME_VERSION,
    model::ModuleGraph,
    writer::{
        pe::{code_rva, has_native_stub, write_image, ManagedData},
        tables::TableBuilder,
    },
    Error, Result,
};

/// A written image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenImage {
    /// The complete file contents
    pub bytes: Vec<u8>,
    /// File offset and length of the space reserved for the strong-name signature
    pub strong_name: Option<(usize, usize)>,
}

/// Serialize `graph` to a complete PE image.
///
/// # Errors
/// Returns [`Error::Encode`] for anything that cannot be written: a handle to a
/// detached or foreign entity, an unencodable signature, a method body that fails
/// validation, or an operand left unresolved by a tolerant load.
pub fn write(graph: &ModuleGraph, options: &WriterOptions) -> Result<WrittenImage> {
    let native_stub = has_native_stub(&graph.image, options);
    let mut builder = TableBuilder::build(graph, options, code_rva(native_stub))?;

    let field_data_rva = builder.field_data_rva();
    let code = std::mem::take(&mut builder.code);
    let field_data = std::mem::take(&mut builder.field_data);
    let resources = std::mem::take(&mut builder.resources);
    let entry_point = builder.entry_point;

    let version = if graph.image.runtime_version.is_empty() {
        DEFAULT_RUNTIME_VERSION
    } else {
        graph.image.runtime_version.as_str()
    };
    let metadata = metadata::serialize(builder, version)?;
    debug!(
        "Writer: {} bytes of metadata, derived MVID at {:?}",
        metadata.bytes.len(),
        metadata.mvid_offset
    );

    let image = write_image(
        &graph.image,
        options,
        ManagedData {
            code,
            field_data,
            field_data_rva,
            resources,
            metadata: metadata.bytes,
            entry_point,
        },
    )?;
    debug!(
        "Writer: image of {} bytes, metadata at {:#x}",
        image.bytes.len(),
        image.metadata_offset
    );

    Ok(WrittenImage {
        bytes: image.bytes,
        strong_name: image.strong_name,
    })
}

/// Serialize `graph` and store it at `path`.
///
/// The image is complete in memory before the file is created. If storing it fails,
/// the partially written file is removed.
///
/// # Errors
/// See [`write`], plus IO errors.
pub fn write_file(graph: &ModuleGraph, options: &WriterOptions, path: &Path) -> Result<WrittenImage> {
    let image = write(graph, options)?;
    if let Err(error) = store(&image.bytes, path) {
        let _ = std::fs::remove_file(path);
        return Err(error);
    }
    Ok(image)
}

fn store(bytes: &[u8], path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(bytes.len() as u64)?;

    let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    mmap.copy_from_slice(bytes);
    mmap.flush().map_err(Error::FileError)
}
