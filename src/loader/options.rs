//! Loader configuration

use crate::project::ResolutionCache;

/// Configuration for reading an image into a [`crate::model::ModuleGraph`].
///
/// The defaults favour tolerance: damaged descriptive data is replaced by
/// placeholders and logged, while anything that affects control flow still fails.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct LoaderOptions {
    /// Substitute `object`/`void` for undecodable signatures and keep unresolvable
    /// instruction tokens as [`crate::assembly::Operand::Unresolved`]
    pub tolerant: bool,
    /// Decode method bodies into instructions. A graph loaded without bodies is
    /// meant for inspection; writing it drops the code of every method.
    pub decode_bodies: bool,
    /// Decode custom attribute blobs; undecoded blobs are kept raw either way
    pub decode_custom_attributes: bool,
    /// Facts about types of other assemblies, for enum arguments and generic instances
    pub cache: Option<ResolutionCache>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            tolerant: true,
            decode_bodies: true,
            decode_custom_attributes: true,
            cache: None,
        }
    }
}

impl LoaderOptions {
    /// Fail on the first undecodable signature or token.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            tolerant: false,
            ..Self::default()
        }
    }

    /// Recover from damaged descriptive data wherever possible; the default.
    #[must_use]
    pub fn tolerant() -> Self {
        Self::default()
    }

    /// Only materialize declarations: no instructions, attributes stay raw.
    ///
    /// Graphs loaded this way describe an image but cannot be written back, since
    /// their IL methods have no bodies.
    #[must_use]
    pub fn declarations_only() -> Self {
        Self {
            decode_bodies: false,
            decode_custom_attributes: false,
            ..Self::default()
        }
    }

    /// Use `cache` for facts about other assemblies.
    #[must_use]
    pub fn with_cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = Some(cache);
        self
    }
}
