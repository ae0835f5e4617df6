// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory
// - 'writer/mod.rs' uses a writable mmap to store an image

//! # cilweave
//!
//! Read a .NET assembly into a mutable object graph, change it, and write it back
//! as a valid PE image.
//!
//! `cilweave` is the codec layer of assembly rewriting tools such as obfuscators and
//! patchers: it parses the ECMA-335 metadata tables, heaps, signatures, custom
//! attributes and CIL method bodies of an image into a [`model::ModuleGraph`] whose
//! entities refer to each other by handle instead of by token. Types, members and
//! instructions can be renamed, added, removed or replaced freely; the writer
//! assigns fresh rows and re-encodes everything on the way out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cilweave::prelude::*;
//!
//! let mut graph = load_file("App.exe".as_ref(), &LoaderOptions::default())?;
//!
//! for id in graph.all_types().collect::<Vec<_>>() {
//!     if !graph.is_public(id) {
//!         graph[id].name = format!("T{}", graph[id].name.len());
//!     }
//! }
//!
//! write_file(&graph, &WriterOptions::default(), "App.renamed.exe".as_ref())?;
//! # Ok::<(), cilweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - PE container access and little-endian IO helpers
//! - [`metadata`] - Tokens, the metadata root, heaps, tables, signatures, custom
//!   attributes and method body headers
//! - [`assembly`] - Opcodes, symbolic method bodies, instruction decoding and encoding
//! - [`model`] - The mutable module graph and its builder and query helpers
//! - [`loader`] - Image to graph
//! - [`dependencies`] - Dependency-safe ordering of types
//! - [`writer`] - Graph to image
//! - [`project`] - Batches of assemblies and the shared [`project::ResolutionCache`]
//!
//! ## Error handling
//!
//! Every fallible operation returns [`Result`]. Damaged input surfaces as
//! [`Error::Malformed`] or [`Error::Decode`], graph inconsistencies as
//! [`Error::GraphError`], and anything the writer cannot express as
//! [`Error::Encode`]. A failed write never leaves a partial image behind.
//!
//! ## Logging
//!
//! Recoverable problems, such as placeholders substituted by a tolerant load or
//! assemblies that failed inside a batch, are reported through the [`log`] facade.
//! Install any logger to see them.

#[macro_use]
pub(crate) mod error;

/// PE container access and byte-level IO
pub mod file;

/// Convenient re-exports of the most commonly used types and functions.
///
/// # Example
///
/// ```rust,no_run
/// use cilweave::prelude::*;
///
/// let graph = load(&std::fs::read("App.exe")?)?;
/// println!("{} types", graph.all_types().count());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub mod prelude;

/// CIL instructions and method bodies
///
/// Opcode tables, the symbolic [`assembly::MethodBody`] and the decoder and encoder
/// between bodies and bytes, plus [`assembly::replace_instructions`] for swapping
/// instruction ranges without breaking branches or exception handlers.
pub mod assembly;

/// ECMA-335 metadata: tokens, the metadata root, heaps, tables and blob formats
pub mod metadata;

pub mod dependencies;
pub mod loader;
pub mod model;
pub mod project;
pub mod writer;

/// `cilweave` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilweave` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use cilweave::{loader, Error};
///
/// match loader::load(&std::fs::read("App.exe").unwrap()) {
///     Ok(graph) => println!("{} types", graph.all_types().count()),
///     Err(Error::NotSupported) => println!("Not a managed image"),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;
