//! # Target Interface
//!
//! The engine never controls a process itself. Everything it needs from the
//! inferior (memory, registers, the symbol table, function calls) goes through
//! the [`Target`] trait, implemented by the process-control backend of the
//! embedding debugger or by a test double.
//!
//! ## Threading
//!
//! Evaluation is synchronous: every call blocks the caller until the backend
//! answers. Implementations are free to block while the inferior stops.

use crate::error::{FerruleError, FerruleResult};
use crate::types::{Address, Architecture, RegisterId, SymbolLocation};
use crate::value::Value;

/// Longest C string read when no explicit length is known
pub const MAX_STRING_READ: usize = 4096;

/// Process memory, registers and symbol-table access
///
/// Only [`Target::is_active`], the memory pair and the register pair are
/// required. Symbol lookups default to "not found" and function calls or
/// debugger variables default to [`FerruleError::NotSupported`], which is what
/// a post-mortem target offers.
///
/// ## Example
///
/// ```rust
/// use ferrule_core::target::Target;
/// use ferrule_core::types::{Address, RegisterId};
/// use ferrule_core::FerruleResult;
///
/// struct Flat(Vec<u8>);
///
/// impl Target for Flat {
///     fn is_active(&self) -> bool { true }
///
///     fn read_memory(&self, addr: Address, len: usize) -> FerruleResult<Vec<u8>> {
///         let start = addr.value() as usize;
///         Ok(self.0[start..start + len].to_vec())
///     }
///
///     fn write_memory(&mut self, addr: Address, data: &[u8]) -> FerruleResult<usize> {
///         let start = addr.value() as usize;
///         self.0[start..start + data.len()].copy_from_slice(data);
///         Ok(data.len())
///     }
///
///     fn read_register(&self, _reg: RegisterId) -> FerruleResult<u64> { Ok(0) }
///
///     fn write_register(&mut self, _reg: RegisterId, _value: u64) -> FerruleResult<()> { Ok(()) }
/// }
///
/// let flat = Flat(b"hi\0".to_vec());
/// assert_eq!(flat.read_string(Address::new(0), 16).unwrap(), "hi");
/// ```
pub trait Target
{
    /// Whether a live (or post-mortem) process is attached
    fn is_active(&self) -> bool;

    /// Architecture of the inferior
    fn architecture(&self) -> Architecture
    {
        Architecture::current()
    }

    /// Read `len` bytes at `addr`
    ///
    /// ## Errors
    ///
    /// Returns [`FerruleError::Memory`] if any byte is unreadable.
    fn read_memory(&self, addr: Address, len: usize) -> FerruleResult<Vec<u8>>;

    /// Write `data` at `addr`, returning the number of bytes written
    ///
    /// ## Errors
    ///
    /// Returns [`FerruleError::Memory`] if the range is not writable.
    fn write_memory(&mut self, addr: Address, data: &[u8]) -> FerruleResult<usize>;

    /// Read a NUL-terminated string of at most `max` bytes
    ///
    /// The default reads byte by byte; backends with bulk reads should
    /// override it.
    ///
    /// ## Errors
    ///
    /// Fails on the first unreadable byte.
    fn read_string(&self, addr: Address, max: usize) -> FerruleResult<String>
    {
        let mut bytes = Vec::new();
        for i in 0..max {
            let byte = self.read_memory(addr + i as u64, 1)?;
            match byte.first() {
                Some(0) | None => break,
                Some(&b) => bytes.push(b),
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Whether `addr` is readable
    fn test_address(&self, addr: Address) -> bool
    {
        self.read_memory(addr, 1).is_ok()
    }

    /// Read a register of the selected frame
    ///
    /// ## Errors
    ///
    /// Returns [`FerruleError::Register`] for unknown registers.
    fn read_register(&self, reg: RegisterId) -> FerruleResult<u64>;

    /// Write a register of the selected frame
    ///
    /// ## Errors
    ///
    /// Returns [`FerruleError::Register`] for unknown or read-only registers.
    fn write_register(&mut self, reg: RegisterId, value: u64) -> FerruleResult<()>;

    /// Symbol containing `addr`
    fn lookup_address(&self, _addr: Address) -> Option<SymbolLocation>
    {
        None
    }

    /// Entry address of a function
    fn lookup_function(&self, _name: &str) -> Option<Address>
    {
        None
    }

    /// Address of any symbol from the object's symbol table
    fn lookup_symbol(&self, _name: &str, _case_blind: bool) -> Option<Address>
    {
        None
    }

    /// Name of the section containing `addr` (e.g. `.rodata`)
    fn find_section_at_addr(&self, _addr: Address) -> Option<String>
    {
        None
    }

    /// First address generated for a source line of the current file
    fn lookup_line(&self, _line: u64) -> Option<Address>
    {
        None
    }

    /// Call `function` in the inferior with integer-class arguments
    ///
    /// ## Errors
    ///
    /// The default target cannot call functions.
    fn call_function(&mut self, _function: Address, _args: &[u64]) -> FerruleResult<u64>
    {
        Err(FerruleError::NotSupported("Function calls are not supported by this target".to_string()))
    }

    /// Value of a debugger convenience variable (`$name`)
    fn debugger_variable(&self, _name: &str) -> Option<Value>
    {
        None
    }

    /// Assign a debugger convenience variable
    ///
    /// ## Errors
    ///
    /// The default target keeps no variables.
    fn set_debugger_variable(&mut self, name: &str, _value: Value) -> FerruleResult<()>
    {
        Err(FerruleError::NotSupported(format!("Cannot set debugger variable ${name}")))
    }
}
