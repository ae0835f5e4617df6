//! # cilweave Prelude
//!
//! The types and functions most rewriting passes need: loading, the graph and its
//! handles, signatures, method bodies and writing.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilweave operations
pub use crate::Error;

/// The result type used throughout cilweave
pub use crate::Result;

// ================================================================================================
// Reading and Writing
// ================================================================================================

/// Image to graph
pub use crate::loader::{load, load_file, load_with, LoaderOptions};

/// Graph to image
pub use crate::writer::{write, write_file, StrongNameOptions, WriterOptions, WrittenImage};

/// Batches of assemblies
pub use crate::project::{Batch, BatchResult, ResolutionCache};

// ================================================================================================
// The Module Graph
// ================================================================================================

/// The graph and its arenas
pub use crate::model::{
    EventDef, FieldDef, MemberRef, MethodDef, ModuleGraph, PropertyDef, TypeDef, TypeRef,
};

/// Ids and handles
pub use crate::model::{
    FieldHandle, FieldId, MemberDef, MemberRefId, MethodHandle, MethodId, ResolutionScope,
    TypeHandle, TypeId, TypeRefId,
};

/// Attribute flag constants
pub use crate::model::flags::{FieldAttributes, TypeAttributes};

// ================================================================================================
// Metadata
// ================================================================================================

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Signatures
pub use crate::metadata::signatures::{FieldSig, MethodSig, TypeSig};

/// Method flags
pub use crate::metadata::method::{MethodAttributes, MethodImplAttributes};

// ================================================================================================
// Method Bodies
// ================================================================================================

/// Symbolic method bodies
pub use crate::assembly::{
    replace_instructions, ExceptionHandler, HandlerKind, InstrId, Instruction, MethodBody,
    OpCode, Operand,
};
