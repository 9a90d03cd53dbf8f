//! # Types
//!
//! Small platform-agnostic types shared by the symbol engine and the
//! expression evaluator.
//!
//! These types abstract away target details, allowing the rest of the engine
//! to talk about addresses, registers and source languages without knowing
//! which process-control backend is attached.

pub mod address;
pub mod arch;
pub mod registers;
pub mod symbols;

// Re-export all public types
pub use address::Address;
pub use arch::Architecture;
pub use registers::RegisterId;
pub use symbols::{SourceLanguage, SymbolLocation};
