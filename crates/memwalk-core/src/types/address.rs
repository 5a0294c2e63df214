//! Target address type.

use std::fmt;
use std::ops::{Add, Sub};

use crate::error::{WalkError, WalkResult};

/// Strongly typed address in the target address space
///
/// This wrapper around `u64` keeps target addresses apart from sizes, counts
/// and offsets. An `Address` is never dereferenced by the host; every access
/// goes through a [`MemoryAccessor`](crate::memory::MemoryAccessor).
///
/// ## Address Space
///
/// 32-bit targets still fit in a `u64`. Pointer width is a property of the
/// accessor, not of the address.
///
/// ## Example
///
/// ```rust
/// use memwalk_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100; // Add offset
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// This is equivalent to `Address::from(value)` but can be used in const contexts.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use memwalk_core::types::Address;
    ///
    /// const KERNEL_BASE: Address = Address::new(0xffff_ff80_0000_0000);
    /// ```
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the host null address.
    ///
    /// Tree walkers may use a different sentinel; see
    /// [`RbTreeWalker`](crate::walk::RbTreeWalker).
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Parse an address from user input
    ///
    /// Accepts `0x`-prefixed hexadecimal or plain decimal.
    ///
    /// ```rust
    /// use memwalk_core::types::Address;
    ///
    /// assert_eq!(Address::parse("0x1000").unwrap(), Address::new(0x1000));
    /// assert_eq!(Address::parse("4096").unwrap(), Address::new(0x1000));
    /// assert!(Address::parse("0xzz").is_err());
    /// ```
    ///
    /// ## Errors
    ///
    /// Returns `InvalidArgument` if the text is not a number.
    pub fn parse(text: &str) -> WalkResult<Self>
    {
        let trimmed = text.trim();
        let parsed = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
            u64::from_str_radix(&hex.replace('_', ""), 16)
        } else {
            trimmed.replace('_', "").parse::<u64>()
        };
        parsed
            .map(Address)
            .map_err(|err| WalkError::InvalidArgument(format!("invalid address '{text}': {err}")))
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use memwalk_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None); // Overflow
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Add an offset to this address, saturating at the maximum value
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
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
        write!(f, "0x{:016x}", self.0)
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
