//! Custom attribute blobs.
//!
//! Custom attributes encode constructor arguments and named field or property
//! values in a compact binary format:
//! - **Prolog** - the marker `0x0001`
//! - **Fixed Arguments** - constructor parameter values in declaration order
//! - **Named Arguments** - a count, then tagged field and property assignments
//!
//! Decoding needs the constructor signature and, for enums, the underlying type
//! of each enum ([`CustomAttributeTypeResolver`]). Blobs that cannot be decoded
//! are kept as [`CustomAttributeData::Raw`] and written back unchanged.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::metadata::{
//!     customattributes::{encode_custom_attribute, parse_custom_attribute, NoTypes},
//!     signatures::{MethodSig, TypeSig},
//! };
//!
//! let blob = [0x01, 0x00, 0x05, b'H', b'e', b'l', b'l', b'o', 0x00, 0x00];
//! let ctor = MethodSig::new_instance(TypeSig::Void, vec![TypeSig::String]);
//!
//! let value = parse_custom_attribute(&blob, &ctor, &mut NoTypes)?;
//! assert_eq!(value.fixed_args.len(), 1);
//! assert_eq!(encode_custom_attribute(&value)?, blob);
//! # Ok::<(), cilweave::Error>(())
//! ```
//!
//! # References
//!
//! - ECMA-335 6th Edition, Partition II, Section 23.3 - Custom Attributes

mod encoder;
mod parser;
mod types;

pub use encoder::{encode_custom_attribute, encode_type_tag, write_ser_string};
pub use parser::{
    parse_custom_attribute, CustomAttributeParser, CustomAttributeTypeResolver, NoTypes,
};
pub use types::*;
