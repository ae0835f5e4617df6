//! Writer configuration

use crate::project::ResolutionCache;

/// Space to reserve for a strong-name signature.
///
/// The writer only reserves the space and marks the image as signed; the signature
/// itself is computed by an external signer over the written bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrongNameOptions {
    /// Public key blob stored in the `Assembly` row
    pub public_key: Vec<u8>,
    /// Bytes reserved for the signature, 128 for a 1024-bit RSA key
    pub signature_size: u32,
}

/// Configuration for [`crate::writer::write`].
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct WriterOptions {
    /// Reserve a strong-name signature and set the signed flag
    pub strong_name: Option<StrongNameOptions>,
    /// Copy the unmanaged resource section of the source image
    pub preserve_win32_resources: bool,
    /// Replace the module MVID with a value derived from the emitted metadata
    pub deterministic_mvid: bool,
    /// Emit the `mscoree.dll` import, the entry stub and the base relocation for
    /// PE32 images
    pub emit_native_stub: bool,
    /// Facts about types of other assemblies, for the value-type flag of generic
    /// instances over referenced types
    pub cache: Option<ResolutionCache>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            strong_name: None,
            preserve_win32_resources: true,
            deterministic_mvid: false,
            emit_native_stub: true,
            cache: None,
        }
    }
}

impl WriterOptions {
    /// Output that only depends on the graph: same graph, same bytes.
    #[must_use]
    pub fn deterministic() -> Self {
        Self {
            deterministic_mvid: true,
            ..Self::default()
        }
    }

    /// Metadata and code only, without unmanaged resources or a native stub.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            preserve_win32_resources: false,
            emit_native_stub: false,
            ..Self::default()
        }
    }

    /// Reserve a strong-name signature of `signature_size` bytes for `public_key`.
    #[must_use]
    pub fn with_strong_name(mut self, public_key: Vec<u8>, signature_size: u32) -> Self {
        self.strong_name = Some(StrongNameOptions {
            public_key,
            signature_size,
        });
        self
    }

    /// Use `cache` for facts about other assemblies.
    #[must_use]
    pub fn with_cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let default = WriterOptions::default();
        assert!(default.preserve_win32_resources && default.emit_native_stub);
        assert!(!default.deterministic_mvid);
        assert!(WriterOptions::deterministic().deterministic_mvid);

        let minimal = WriterOptions::minimal();
        assert!(!minimal.preserve_win32_resources && !minimal.emit_native_stub);

        let signed = WriterOptions::default().with_strong_name(vec![0; 160], 128);
        assert_eq!(signed.strong_name.map(|name| name.signature_size), Some(128));
    }
}
