//! Reading images into a [`ModuleGraph`].
//!
//! The loader walks the table stream in a fixed sequence of passes. Each pass only
//! depends on rows materialized by earlier ones:
//!
//! 1. Module, assembly, assembly and module references, type references
//! 2. Type shells, then per type its base type, fields, methods and parameters
//! 3. Member references
//! 4. Nesting, generic parameters and constraints, interfaces and layouts
//! 5. Properties, events and accessor semantics
//! 6. Constants, marshalling, security, P/Invoke maps, overrides, field data
//! 7. Method bodies
//! 8. Files, exported types, manifest and Win32 resources
//! 9. Custom attributes, which may sit on any of the above
//!
//! Finally every reference that names a definition of the image itself is bound to
//! it with [`ModuleGraph::link_references`], so renaming the definition later also
//! renames its call sites.
//!
//! Type references that cannot be resolved to another assembly are kept as plain
//! references; nothing here loads other files.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilweave::loader::{load_file, LoaderOptions};
//!
//! let graph = load_file("tests/samples/Demo.dll".as_ref(), &LoaderOptions::default())?;
//! for id in graph.all_types() {
//!     println!("{}", graph.full_name(id));
//! }
//! # Ok::<(), cilweave::Error>(())
//! ```

mod attributes;
mod bodies;
mod context;
mod members;
mod options;
mod resources;
mod types;

use std::path::Path;

use log::debug;

pub use options::LoaderOptions;

use crate::{
    file::File,
    loader::context::Loader,
    metadata::{
        cor20header::{Cor20Header, COR20_HEADER_SIZE},
        root::Root,
        streams::{Blob, Guid, Strings, TablesHeader, UserStrings},
    },
    model::{ImageInfo, ModuleDef, ModuleGraph},
    Result,
};

/// Load an image held in memory with default options.
///
/// # Errors
/// Returns a format error for anything that is not a managed PE image, and a decode
/// error for corrupt tables or method bodies.
pub fn load(data: &[u8]) -> Result<ModuleGraph> {
    load_with(data, &LoaderOptions::default())
}

/// Load an image held in memory.
///
/// # Errors
/// See [`load`]. In strict mode, any undecodable signature or token also fails.
pub fn load_with(data: &[u8], options: &LoaderOptions) -> Result<ModuleGraph> {
    let file = File::from_mem(data.to_vec())?;
    load_image(&file, options)
}

/// Load an image from disk.
///
/// # Errors
/// See [`load_with`], plus IO errors.
pub fn load_file(path: &Path, options: &LoaderOptions) -> Result<ModuleGraph> {
    let file = File::from_file(path)?;
    load_image(&file, options)
}

/// The bytes of a named metadata stream, if present.
fn stream<'m>(root: &Root, metadata: &'m [u8], name: &str) -> Result<Option<&'m [u8]>> {
    let Some(header) = root.stream(name) else {
        return Ok(None);
    };
    let start = header.offset as usize;
    metadata
        .get(start..start + header.size as usize)
        .map(Some)
        .ok_or_else(|| malformed_error!("Stream {} extends past the metadata", name))
}

/// Load an already opened [`File`].
///
/// # Errors
/// See [`load_with`].
#[allow(clippy::cast_possible_truncation)]
pub fn load_image(file: &File, options: &LoaderOptions) -> Result<ModuleGraph> {
    let (clr_rva, _) = file.clr()?;
    let cor20 = Cor20Header::read(file.rva_slice(clr_rva as u32, COR20_HEADER_SIZE as usize)?)?;
    let metadata = file.rva_slice(cor20.metadata_rva, cor20.metadata_size as usize)?;
    let root = Root::read(metadata)?;

    let named = |name: &str| stream(&root, metadata, name);
    let (table_data, uncompressed) = match (named("#~")?, named("#-")?) {
        (Some(data), _) => (data, false),
        (None, Some(data)) => (data, true),
        (None, None) => return Err(malformed_error!("Metadata has no table stream")),
    };
    let tables = TablesHeader::read(table_data, uncompressed)?;
    let strings = Strings::from(named("#Strings")?.unwrap_or(&[0]))?;
    let blobs = Blob::from(named("#Blob")?.unwrap_or(&[0]))?;
    let guids = Guid::from(named("#GUID")?.unwrap_or(&[]));
    let user_strings = named("#US")?.map(UserStrings::from).transpose()?;

    let optional_header = file.optional_header()?;
    let image = ImageInfo {
        machine: file.machine(),
        characteristics: file.characteristics(),
        pe32_plus: file.is_pe32_plus(),
        image_base: optional_header.windows_fields.image_base,
        subsystem: optional_header.windows_fields.subsystem,
        dll_characteristics: optional_header.windows_fields.dll_characteristics,
        cor_flags: cor20.flags,
        runtime_version: root.version.clone(),
        win32_resources: None,
    };
    let module = ModuleDef {
        name: String::new(),
        mvid: uguid::Guid::ZERO,
        generation: 0,
        custom_attributes: Vec::new(),
    };

    let mut loader = Loader::new(
        file,
        options,
        strings,
        blobs,
        guids,
        user_strings,
        tables,
        ModuleGraph::bare(module, image),
    );

    loader.load_module()?;
    loader.load_references()?;
    debug!("Loader: {} type references", loader.graph.type_refs().count());

    loader.load_types()?;
    debug!("Loader: {} types", loader.graph.type_count());

    loader.load_member_refs()?;
    loader.load_nesting()?;
    loader.load_generic_params()?;
    loader.load_interfaces_and_layouts()?;
    loader.load_properties_and_events()?;
    loader.load_semantics()?;
    debug!("Loader: declarations complete");

    loader.load_constants_and_marshalling()?;
    loader.load_security()?;
    loader.load_pinvoke_and_overrides()?;
    loader.load_field_data()?;

    if options.decode_bodies {
        loader.load_bodies()?;
        debug!("Loader: {} method bodies", loader.bodies.len());
    }

    loader.load_files_and_exports()?;
    loader.load_resources(&cor20)?;
    loader.load_custom_attributes()?;
    loader.load_entry_point(cor20.entry_point_token)?;
    loader.graph.link_references();
    debug!("Loader: done with {}", loader.graph.module.name);

    Ok(loader.graph)
}
