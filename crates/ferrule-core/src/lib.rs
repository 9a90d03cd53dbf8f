//! # ferrule-core
//!
//! Debug-information type engine and expression evaluator for Ferrule.
//!
//! This crate turns DWARF debugging entries into something a debugger can
//! reason about, including:
//! - Lazily decoded compilation units and their entry graph
//! - Type queries: sizes, capabilities, members, declarations
//! - Reading, writing and printing values in target memory
//! - C/C++ and Fortran expression parsing and evaluation
//!
//! ## Targets
//!
//! The engine never touches a process directly. Memory, registers, the
//! symbol table and function calls are reached through the
//! [`target::Target`] trait, so the same code serves a live process, a core
//! file or a test double.
//!
//! ## Logging
//!
//! Events are emitted with `tracing`; install a subscriber (for example with
//! `ferrule_utils::init_logging`) to see them.

pub mod containers;
pub mod context;
pub mod demangle;
pub mod dwarf;
pub mod error;
pub mod expr;
pub mod format;
pub mod location;
pub mod lookup;
pub mod prelude;
pub mod target;
pub mod types;
pub mod value;
pub mod variant;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use context::{EvalContext, PrintOptions};
pub use error::{FerruleError, FerruleResult};
pub use expr::Expression;
pub use value::Value;
