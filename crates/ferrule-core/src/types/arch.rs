//! Target architecture description.

use std::fmt;

use crate::error::FerruleResult;
use crate::target::Target;
use crate::types::{Address, RegisterId};

/// CPU architecture of the inferior
///
/// ## Supported Architectures
///
/// - **Arm64**: 64-bit ARM
/// - **X86_64**: 64-bit x86 (Intel/AMD processors)
/// - **Unknown**: Other architectures; pointer size defaults to 8 and
///   registers are only reachable by DWARF number
///
/// The architecture supplies the few machine facts the type engine needs:
/// pointer width when no compilation unit says otherwise, stack alignment for
/// scratch slots, and the DWARF register names behind `$reg` tokens.
///
/// ## Example
///
/// ```rust
/// use ferrule_core::types::{Architecture, RegisterId};
///
/// let arch = Architecture::X86_64;
/// assert_eq!(arch.pointer_size_bytes(), 8);
/// assert_eq!(arch.register_by_name("rsp"), Some(RegisterId::Dwarf(7)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit ARM
    Arm64,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// Any other architecture
    ///
    /// The `&'static str` contains the architecture name (e.g., "riscv64").
    Unknown(&'static str),
}

/// Highest DWARF register number probed when resolving a name
const MAX_DWARF_REGISTER: u16 = 128;

impl Architecture
{
    /// Architecture of the running binary
    ///
    /// Used as the default when a target does not report one.
    #[must_use]
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Size of a pointer in bytes for this architecture.
    #[must_use]
    pub const fn pointer_size_bytes(self) -> u8
    {
        match self {
            Architecture::Arm64 | Architecture::X86_64 | Architecture::Unknown(_) => 8,
        }
    }

    /// Required alignment of the stack pointer, in bytes
    #[must_use]
    pub const fn stack_alignment(self) -> u64
    {
        16
    }

    /// DWARF name of a register number, if the architecture defines one
    #[must_use]
    pub fn register_name(self, number: u16) -> Option<&'static str>
    {
        let register = gimli::Register(number);
        match self {
            Architecture::X86_64 => gimli::X86_64::register_name(register),
            Architecture::Arm64 => gimli::AArch64::register_name(register),
            Architecture::Unknown(_) => None,
        }
    }

    /// Resolve a `$name` register token
    ///
    /// Accepts the portable aliases `pc`, `sp` and `fp`, the architecture's
    /// DWARF register names, and `rN` for a raw DWARF number.
    #[must_use]
    pub fn register_by_name(self, name: &str) -> Option<RegisterId>
    {
        if let Some(alias) = RegisterId::from_alias(name) {
            return Some(alias);
        }
        if let Some(number) = name.strip_prefix('r').and_then(|n| n.parse::<u16>().ok()) {
            return Some(RegisterId::Dwarf(number));
        }
        (0..=MAX_DWARF_REGISTER)
            .find(|&n| self.register_name(n).is_some_and(|candidate| candidate.eq_ignore_ascii_case(name)))
            .map(RegisterId::Dwarf)
    }

    /// Reserve `size` bytes on the target stack
    ///
    /// Moves the stack pointer down by `size`, keeps it aligned, and returns
    /// the new stack pointer. The caller restores the old value when done.
    ///
    /// ## Errors
    ///
    /// Fails if the stack pointer cannot be read or written.
    pub fn stack_space(self, target: &mut dyn Target, size: u64) -> FerruleResult<Address>
    {
        let sp = Address::new(target.read_register(RegisterId::Sp)?);
        let reserved = (sp - size).align_down(self.stack_alignment());
        target.write_register(RegisterId::Sp, reserved.value())?;
        Ok(reserved)
    }
}

impl Default for Architecture
{
    fn default() -> Self
    {
        Architecture::current()
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_register_names()
    {
        assert_eq!(Architecture::X86_64.register_name(7), Some("rsp"));
        assert_eq!(Architecture::Unknown("mips").register_name(7), None);
    }

    #[test]
    fn test_register_by_name()
    {
        let arch = Architecture::X86_64;
        assert_eq!(arch.register_by_name("pc"), Some(RegisterId::Pc));
        assert_eq!(arch.register_by_name("RBP"), Some(RegisterId::Dwarf(6)));
        assert_eq!(arch.register_by_name("r12"), Some(RegisterId::Dwarf(12)));
        assert_eq!(arch.register_by_name("nonsense"), None);
    }
}
