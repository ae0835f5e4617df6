//! Working with more than one assembly.
//!
//! Graphs of different assemblies never share entities; they refer to each other by
//! name only. What crosses assembly boundaries is a small set of facts the metadata
//! of one module cannot answer on its own (is a referenced type a value type, which
//! integer type backs a referenced enum), kept in a [`ResolutionCache`].
//!
//! [`Batch`] drives the usual pipeline over a set of assemblies: warm the cache from
//! all of them, then load, mutate and write each one on a `rayon` worker.

mod batch;
mod cache;

pub use batch::{Batch, BatchItem, BatchResult};
pub use cache::{ResolutionCache, TypeFacts};
