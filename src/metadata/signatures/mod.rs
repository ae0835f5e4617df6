//! Method and type signature blobs.
//!
//! Signatures encode types, method parameters, calling conventions and local
//! variable lists in the compressed format of ECMA-335 II.23.2. This module decodes
//! them into [`TypeSig`] trees whose type references are model handles, and encodes
//! such trees back.
//!
//! The codec itself knows nothing about tables. Tokens found in a blob are handed
//! to a [`TypeTokenResolver`] while decoding; handles are turned back into tokens by
//! a [`TypeTokenEmitter`] while encoding. The loader and the writer provide these.
//!
//! # Signature kinds
//!
//! - [`MethodSig`] - `MethodDefSig`, `MethodRefSig` (with vararg sentinel), `StandAloneMethodSig`
//! - [`FieldSig`] - header `0x06`
//! - [`PropertySig`] - header `0x08`, or `0x28` for instance properties
//! - [`LocalVarSig`] - header `0x07`
//! - [`MethodSpecSig`] - header `0x0A`
//! - `TypeSpec` blobs are a bare [`TypeSig`]
//!
//! # Examples
//!
//! ```rust
//! use cilweave::metadata::signatures::{encode_method_signature, MethodSig, TypeSig, TypeTokenEmitter};
//! use cilweave::{metadata::token::Token, model::TypeHandle};
//!
//! struct NoTypes;
//! impl TypeTokenEmitter for NoTypes {
//!     fn type_token(&mut self, _handle: &TypeHandle) -> cilweave::Result<Token> {
//!         Err(cilweave::Error::NotSupported)
//!     }
//! }
//!
//! let sig = MethodSig::new_static(TypeSig::Void, vec![TypeSig::String]);
//! assert_eq!(encode_method_signature(&sig, &mut NoTypes)?, [0x00, 0x01, 0x01, 0x0E]);
//! # Ok::<(), cilweave::Error>(())
//! ```
//!
//! # References
//!
//! - ECMA-335 6th Edition, Partition II, Section 23.2 - Blobs and Signatures

mod encoder;
mod parser;
mod types;

pub use encoder::{SignatureEncoder, TypeTokenEmitter};
pub use parser::{SignatureParser, TypeTokenResolver, MAX_RECURSION_DEPTH};
pub use types::*;

use crate::Result;

/// Parse a method signature blob.
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_method_signature(
    data: &[u8],
    resolver: &mut dyn TypeTokenResolver,
) -> Result<MethodSig> {
    SignatureParser::new(data, resolver).parse_method_signature()
}

/// Parse a field signature blob.
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_field_signature(
    data: &[u8],
    resolver: &mut dyn TypeTokenResolver,
) -> Result<FieldSig> {
    SignatureParser::new(data, resolver).parse_field_signature()
}

/// Parse a property signature blob.
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_property_signature(
    data: &[u8],
    resolver: &mut dyn TypeTokenResolver,
) -> Result<PropertySig> {
    SignatureParser::new(data, resolver).parse_property_signature()
}

/// Parse a local variable signature blob.
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_local_var_signature(
    data: &[u8],
    resolver: &mut dyn TypeTokenResolver,
) -> Result<LocalVarSig> {
    SignatureParser::new(data, resolver).parse_local_var_signature()
}

/// Parse a method instantiation blob.
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_method_spec_signature(
    data: &[u8],
    resolver: &mut dyn TypeTokenResolver,
) -> Result<MethodSpecSig> {
    SignatureParser::new(data, resolver).parse_method_spec_signature()
}

/// Encode a method signature blob.
///
/// # Errors
/// Returns an error if a contained type cannot be encoded.
pub fn encode_method_signature(
    sig: &MethodSig,
    emitter: &mut dyn TypeTokenEmitter,
) -> Result<Vec<u8>> {
    let mut encoder = SignatureEncoder::new(emitter);
    encoder.encode_method(sig)?;
    Ok(encoder.finish())
}

/// Encode a field signature blob.
///
/// # Errors
/// Returns an error if the field type cannot be encoded.
pub fn encode_field_signature(
    sig: &FieldSig,
    emitter: &mut dyn TypeTokenEmitter,
) -> Result<Vec<u8>> {
    let mut encoder = SignatureEncoder::new(emitter);
    encoder.encode_field(sig)?;
    Ok(encoder.finish())
}

/// Encode a property signature blob.
///
/// # Errors
/// Returns an error if a contained type cannot be encoded.
pub fn encode_property_signature(
    sig: &PropertySig,
    emitter: &mut dyn TypeTokenEmitter,
) -> Result<Vec<u8>> {
    let mut encoder = SignatureEncoder::new(emitter);
    encoder.encode_property(sig)?;
    Ok(encoder.finish())
}

/// Encode a local variable signature blob.
///
/// # Errors
/// Returns an error if a local type cannot be encoded.
pub fn encode_local_var_signature(
    sig: &LocalVarSig,
    emitter: &mut dyn TypeTokenEmitter,
) -> Result<Vec<u8>> {
    let mut encoder = SignatureEncoder::new(emitter);
    encoder.encode_locals(sig)?;
    Ok(encoder.finish())
}

/// Encode a `TypeSpec` blob.
///
/// # Errors
/// Returns an error if the type cannot be encoded.
pub fn encode_typespec_signature(
    sig: &TypeSig,
    emitter: &mut dyn TypeTokenEmitter,
) -> Result<Vec<u8>> {
    let mut encoder = SignatureEncoder::new(emitter);
    encoder.encode_type(sig)?;
    Ok(encoder.finish())
}

/// Encode a method instantiation blob.
///
/// # Errors
/// Returns an error if a type argument cannot be encoded.
pub fn encode_method_spec_signature(
    sig: &MethodSpecSig,
    emitter: &mut dyn TypeTokenEmitter,
) -> Result<Vec<u8>> {
    let mut encoder = SignatureEncoder::new(emitter);
    encoder.encode_method_spec(sig)?;
    Ok(encoder.finish())
}
