//! # Error Types
//!
//! General error handling for the symbol engine and the expression evaluator.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages. Every message is meant to be shown to the user as
//! is: the top-level evaluation entry point formats the error with `Display`
//! and nothing more.

use thiserror::Error;

use crate::value::ConversionError;

/// Main error type for symbol and expression operations
///
/// ## Error Categories
///
/// 1. **Malformed input**: MalformedDebugInfo
/// 2. **Target unavailable**: NoProcess, Memory, Register
/// 3. **Rejected operations**: NotAnLvalue, NotSupported
/// 4. **Lookup failures**: SymbolNotFound
/// 5. **Language errors**: Syntax, Eval, Conversion
///
/// Finding a member through a base class or an anonymous union is not an
/// error; see [`crate::variant::MemberResolution`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FerruleError
{
    /// The debug information could not be decoded
    ///
    /// Raised for unexpected attribute forms, references that point outside
    /// the unit, truncated entries and similar problems. Always fatal to the
    /// operation in progress.
    #[error("Malformed debug information: {0}")]
    MalformedDebugInfo(String),

    /// The operation needs live memory or registers but no process is attached
    #[error("A running process is required for this operation")]
    NoProcess,

    /// Memory at the given address could not be read or written
    #[error("Cannot access memory at address 0x{address:x}: {reason}")]
    Memory
    {
        /// Address of the failed access
        address: u64,
        /// Reason reported by the target
        reason: String,
    },

    /// A register could not be read or written
    #[error("Register access failed: {0}")]
    Register(String),

    /// The expression does not designate storage that can be assigned
    #[error("{0}")]
    NotAnLvalue(String),

    /// The operation is not supported for this type or target
    #[error("{0}")]
    NotSupported(String),

    /// A name could not be resolved in the current context
    #[error("No symbol \"{0}\" in current context.")]
    SymbolNotFound(String),

    /// The expression text could not be tokenized or parsed
    #[error("{0}")]
    Syntax(String),

    /// Any other evaluation failure
    #[error("{0}")]
    Eval(String),

    /// A value was used as a type it does not hold
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl FerruleError
{
    /// Shorthand for [`FerruleError::Eval`]
    pub fn eval(message: impl Into<String>) -> Self
    {
        FerruleError::Eval(message.into())
    }

    /// Shorthand for [`FerruleError::Syntax`]
    pub fn syntax(message: impl Into<String>) -> Self
    {
        FerruleError::Syntax(message.into())
    }

    /// Shorthand for [`FerruleError::Memory`]
    pub fn memory(address: u64, reason: impl Into<String>) -> Self
    {
        FerruleError::Memory {
            address,
            reason: reason.into(),
        }
    }
}

/// Result type alias for ferrule operations
///
/// This is a convenience type alias that makes function signatures shorter.
/// Instead of writing `Result<T, FerruleError>`, you can write `FerruleResult<T>`.
pub type FerruleResult<T> = Result<T, FerruleError>;

/// Map a gimli DWARF error to a `FerruleError` with context.
pub(crate) fn map_dwarf_error(context: &str, err: gimli::Error) -> FerruleError
{
    FerruleError::MalformedDebugInfo(format!("{context}: {err}"))
}
