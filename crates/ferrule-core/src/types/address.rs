//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed address in the inferior's address space
///
/// This wrapper around `u64` keeps target addresses apart from sizes, counts
/// and the integer payloads of [`crate::value::Value`].
///
/// ## Example
///
/// ```rust
/// use ferrule_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100;
/// assert_eq!(next_addr.value(), 0x1100);
/// assert_eq!(addr.offset(-0x10), Address::new(0xff0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the null address
    #[must_use]
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Move the address by a signed byte offset, wrapping on overflow
    ///
    /// Array and member arithmetic in the evaluator works in signed offsets
    /// (negative subscripts are legal in C), so this is the primitive they use.
    #[must_use]
    pub const fn offset(self, delta: i64) -> Self
    {
        Address(self.0.wrapping_add_signed(delta))
    }

    /// Round down to a power-of-two alignment
    #[must_use]
    pub const fn align_down(self, align: u64) -> Self
    {
        Address(self.0 & !(align - 1))
    }

    /// Round up to a power-of-two alignment
    #[must_use]
    pub const fn align_up(self, align: u64) -> Self
    {
        Address(self.0.wrapping_add(align - 1) & !(align - 1))
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

impl Sub<Address> for Address
{
    type Output = u64;

    fn sub(self, rhs: Address) -> Self::Output
    {
        self.0.wrapping_sub(rhs.0)
    }
}
