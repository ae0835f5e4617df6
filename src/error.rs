use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

macro_rules! decode_error {
    ($entity:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        crate::Error::Decode {
            entity: $entity.to_string(),
            message: format!($fmt $(, $arg)*),
        }
    };
}

macro_rules! encode_error {
    ($entity:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        crate::Error::Encode {
            entity: $entity.to_string(),
            message: format!($fmt $(, $arg)*),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the four failure classes of the engine:
///
/// ## Format errors
/// - [`Error::Malformed`] - Corrupted or invalid file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond file boundaries
/// - [`Error::NotSupported`] - Unsupported file format or feature
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
///
/// ## Decode inconsistency
/// - [`Error::Decode`] - A dangling branch target, an unresolvable required token, a signature
///   that does not match its owner
///
/// ## Graph invariant violation
/// - [`Error::GraphError`] - A dependency cycle that could not be broken, a missing owner
///
/// ## Encode failure
/// - [`Error::Encode`] - An unencodable signature shape or an unresolved handle at write time
///
/// Every variant that concerns a specific entity carries its name or token, so a caller
/// can report which member of which type made the pass fail.
///
/// # Examples
///
/// ```rust,no_run
/// use cilweave::{Error, loader::load};
///
/// let bytes = std::fs::read("input.dll")?;
/// match load(&bytes) {
///     Ok(graph) => println!("{} types", graph.all_types().count()),
///     Err(Error::NotSupported) => eprintln!("not a managed image"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed file: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("{}", e),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // File parsing Errors
    /// The file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    ///
    /// Raised for images without a CLI header, and for features of the format this
    /// engine does not handle (for example mixed-mode images with native method bodies).
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    // Decode errors
    /// A structurally valid image whose content is inconsistent.
    ///
    /// Raised for branch targets that do not land on an instruction, exception handler
    /// boundaries in the middle of an instruction, and tokens that a body needs but
    /// which point to rows that do not exist.
    #[error("Failed to decode {entity} - {message}")]
    Decode {
        /// Name or token of the entity being decoded
        entity: String,
        /// What went wrong
        message: String,
    },

    /// A metadata token referenced a row that does not exist.
    #[error("Token {0} does not reference a valid row")]
    InvalidToken(Token),

    /// Recursion limit reached.
    ///
    /// Signatures and type specifications may nest. Nesting deeper than the limit is
    /// treated as malicious input rather than followed.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    // Graph errors
    /// The object graph violates one of its invariants.
    ///
    /// Carries the full diagnostic text, for dependency ordering that includes every
    /// remaining node together with its unresolved parents.
    #[error("{0}")]
    GraphError(String),

    // Encode errors
    /// The writer could not encode an entity.
    ///
    /// Nothing is emitted when this is returned; the whole write is abandoned.
    #[error("Failed to encode {entity} - {message}")]
    Encode {
        /// Name of the entity that could not be written
        entity: String,
        /// What went wrong
        message: String,
    },
}
