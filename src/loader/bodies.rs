use log::debug;

use crate::{
    assembly::decode_body,
    loader::context::Loader,
    metadata::method::{MethodAttributes, RawMethodBody},
    Error, Result,
};

impl Loader<'_> {
    /// Decode the body of every IL method that has an RVA.
    ///
    /// A body that does not decode is fatal in both modes: instructions cannot be
    /// replaced by a placeholder without changing what the method does.
    pub fn load_bodies(&mut self) -> Result<()> {
        let file = self.file;
        let tolerant = self.options.tolerant;
        let pending = std::mem::take(&mut self.bodies);

        for &(method, rva) in &pending {
            let definition = &self.graph[method];
            if !definition.impl_flags.is_il()
                || definition.flags.contains(MethodAttributes::ABSTRACT)
                || definition.pinvoke.is_some()
            {
                debug!("Loader: {} has an RVA but no IL", definition.name);
                continue;
            }

            let name = self.graph.method_full_name(method);
            let offset = file.rva_to_offset(rva as usize)?;
            let data = file
                .data()
                .get(offset..)
                .ok_or_else(|| decode_error!(name, "body RVA 0x{:08x} is outside the image", rva))?;
            let raw = RawMethodBody::read(data).map_err(|error| rename(error, &name))?;
            let body = decode_body(&raw, self, tolerant).map_err(|error| rename(error, &name))?;
            self.graph[method].body = Some(body);
        }

        self.bodies = pending;
        Ok(())
    }
}

/// Attribute a body error to the method it came from.
fn rename(error: Error, method: &str) -> Error {
    match error {
        Error::Decode { entity, message } => Error::Decode {
            entity: method.to_string(),
            message: format!("{entity}: {message}"),
        },
        other => decode_error!(method, "{}", other),
    }
}
