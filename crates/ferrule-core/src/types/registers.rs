//! CPU register identifiers.

use std::fmt;

/// Identifier for a target register
///
/// The engine meets registers in two places: location expressions name them by
/// DWARF register number, and the expression language names them by `$name`.
/// The three registers every frame has are spelled out; everything else is
/// carried as its DWARF number and interpreted by the target backend.
///
/// ## Example
///
/// ```rust
/// use ferrule_core::types::RegisterId;
///
/// let sp = RegisterId::Sp;
/// let rax = RegisterId::Dwarf(0);
/// assert_ne!(sp, rax);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId
{
    /// Program counter (RIP on x86-64, PC on ARM64)
    Pc,
    /// Stack pointer (RSP on x86-64, SP on ARM64)
    Sp,
    /// Frame pointer (RBP on x86-64, X29 on ARM64)
    Fp,
    /// Any register by its DWARF register number
    Dwarf(u16),
}

impl RegisterId
{
    /// Parse one of the architecture-neutral aliases (`pc`, `sp`, `fp`)
    #[must_use]
    pub fn from_alias(name: &str) -> Option<Self>
    {
        match name {
            "pc" => Some(RegisterId::Pc),
            "sp" => Some(RegisterId::Sp),
            "fp" => Some(RegisterId::Fp),
            _ => None,
        }
    }
}

impl fmt::Display for RegisterId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            RegisterId::Pc => write!(f, "pc"),
            RegisterId::Sp => write!(f, "sp"),
            RegisterId::Fp => write!(f, "fp"),
            RegisterId::Dwarf(number) => write!(f, "r{number}"),
        }
    }
}
