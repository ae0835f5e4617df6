//! Method attributes and the physical layout of method bodies.
//!
//! - [`body`] - tiny and fat headers, code, and extra data sections
//! - [`exceptions`] - exception handling clauses in their small and fat table formats
//! - [`types`] - `MethodAttributes`, `MethodImplAttributes` and framing flags

mod body;
mod exceptions;
mod types;

pub use body::*;
pub use exceptions::*;
pub use types::*;
