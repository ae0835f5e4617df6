//! ECMA-335 metadata primitives.
//!
//! Everything in here works on bytes and tokens and knows nothing about the object
//! graph: the CLI header, the metadata root and its streams, table schemas and
//! coded indices, signature and custom attribute blobs, and method body framing.
//! The [`crate::loader`] and [`crate::writer`] are built on top of these pieces.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::metadata::tables::{CodedIndexType, TableId};
//!
//! // A TypeDefOrRef coded index for TypeRef row 5
//! let value = CodedIndexType::TypeDefOrRef.encode(TableId::TypeRef, 5)?;
//! assert_eq!(value, (5 << 2) | 1);
//! assert_eq!(CodedIndexType::TypeDefOrRef.decode(value)?.value(), 0x0100_0005);
//! # Ok::<(), cilweave::Error>(())
//! ```

/// The CLI header (`IMAGE_COR20_HEADER`)
pub mod cor20header;
/// Custom attribute value blobs
pub mod customattributes;
/// Method body headers and exception clauses
pub mod method;
/// The metadata root and stream directory
pub mod root;
/// Method, field, property, local and type signatures
pub mod signatures;
/// Heaps and the table stream
pub mod streams;
/// Table identifiers, schemas and coded indices
pub mod tables;
/// Metadata tokens
pub mod token;
