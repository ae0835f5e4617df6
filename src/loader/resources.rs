use log::{debug, warn};

use crate::{
    file::{io::read_le, DIRECTORY_RESOURCE},
    loader::context::Loader,
    metadata::{
        cor20header::Cor20Header,
        tables::{CodedIndexType, TableId},
        token::Token,
    },
    model::{
        ExportedType, ExportedTypeImplementation, FileDef, ManifestResource, ResourceData,
        Win32Resources,
    },
    Error, Result,
};

impl Loader<'_> {
    /// Files of a multi-file assembly and the types exported through them.
    pub fn load_files_and_exports(&mut self) -> Result<()> {
        for row in 1..=self.count(TableId::File) {
            let [flags, name, hash_value] = self.row(TableId::File, row)?;
            let file = FileDef {
                flags,
                name: self.string(name)?,
                hash_value: self.blob(hash_value)?.to_vec(),
                custom_attributes: Vec::new(),
            };
            self.graph.files.push(file);
        }

        let exported_count = self.count(TableId::ExportedType) as usize;
        for row in 1..=self.count(TableId::ExportedType) {
            let [flags, type_def_id, name, namespace, implementation] =
                self.row(TableId::ExportedType, row)?;
            let token = CodedIndexType::Implementation.decode(implementation)?;
            let index = (token.row() as usize)
                .checked_sub(1)
                .ok_or(Error::InvalidToken(token))?;
            let implementation = match TableId::from_u8(token.table()) {
                Some(TableId::File) if index < self.graph.files.len() => {
                    ExportedTypeImplementation::File(index)
                }
                Some(TableId::AssemblyRef) => {
                    ExportedTypeImplementation::AssemblyRef(self.assembly_ref(token)?)
                }
                Some(TableId::ExportedType) if index < exported_count => {
                    ExportedTypeImplementation::Enclosing(index)
                }
                _ => return Err(Error::InvalidToken(token)),
            };

            let exported = ExportedType {
                flags,
                type_def_id,
                name: self.string(name)?,
                namespace: self.string(namespace)?,
                implementation,
                custom_attributes: Vec::new(),
            };
            self.graph.exported_types.push(exported);
        }
        Ok(())
    }

    /// Manifest resources, and the unmanaged resource section of the image.
    pub fn load_resources(&mut self, cor20: &Cor20Header) -> Result<()> {
        for row in 1..=self.count(TableId::ManifestResource) {
            let [offset, flags, name, implementation] = self.row(TableId::ManifestResource, row)?;
            let name = self.string(name)?;
            let token = CodedIndexType::Implementation.decode(implementation)?;

            let data = if token.row() == 0 {
                ResourceData::Embedded(self.embedded_resource(cor20, offset, &name)?)
            } else {
                match TableId::from_u8(token.table()) {
                    Some(TableId::File) if (token.row() as usize) <= self.graph.files.len() => {
                        ResourceData::File {
                            file: token.row() as usize - 1,
                            offset,
                        }
                    }
                    Some(TableId::AssemblyRef) => ResourceData::Assembly(self.assembly_ref(token)?),
                    _ => return Err(Error::InvalidToken(token)),
                }
            };

            self.graph.resources.push(ManifestResource {
                name,
                flags,
                data,
                custom_attributes: Vec::new(),
            });
        }

        let file = self.file;
        if let Some((rva, size)) = file.data_directory(DIRECTORY_RESOURCE) {
            let data = file.rva_slice(rva, size as usize).map(Some);
            if let Some(data) = self.recover(data, "Win32 resource directory", || None)? {
                debug!("Loader: {} bytes of Win32 resources at 0x{:08x}", size, rva);
                self.graph.image.win32_resources = Some(Win32Resources {
                    rva,
                    data: data.to_vec(),
                });
            }
        }
        Ok(())
    }

    /// A length-prefixed entry of the managed resource blob.
    fn embedded_resource(&self, cor20: &Cor20Header, offset: u32, name: &str) -> Result<Vec<u8>> {
        if cor20.resource_rva == 0 {
            return Err(decode_error!(name, "embedded resource without a resource directory"));
        }
        if u64::from(offset) + 4 > u64::from(cor20.resource_size) {
            return Err(decode_error!(
                name,
                "offset 0x{:x} is past the resource directory (0x{:x} bytes)",
                offset,
                cor20.resource_size
            ));
        }

        let directory = self
            .file
            .rva_slice(cor20.resource_rva, cor20.resource_size as usize)?;
        let start = offset as usize;
        let length = read_le::<u32>(&directory[start..])? as usize;
        directory
            .get(start + 4..start + 4 + length)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| decode_error!(name, "{} bytes do not fit the resource directory", length))
    }

    /// Set the managed entry point. Entry points in other files are not kept.
    pub fn load_entry_point(&mut self, token: u32) -> Result<()> {
        let token = Token(token);
        if token.is_null() {
            return Ok(());
        }
        match TableId::from_u8(token.table()) {
            Some(TableId::MethodDef) => {
                let result = self.method_def(token).map(Some);
                self.graph.entry_point = self.recover(result, "entry point", || None)?;
            }
            _ => warn!("Entry point {} is not a method of this module; dropped", token),
        }
        Ok(())
    }
}
