//! # Memory Accessor
//!
//! The only component that touches raw target memory.
//!
//! Everything above this module (typed values, walkers, reports) is pure logic
//! over the bytes returned here. The trait is deliberately read-only: there is
//! no way to write through an accessor.
//!
//! ## Implementations
//!
//! - [`SparseMemory`]: an in-memory image (core file segments, raw dumps, test fixtures)
//! - [`CachedMemory`]: a page cache in front of any other accessor
//! - [`ProcessMemory`]: a live Linux process through `/proc/<pid>/mem`

mod cache;
#[cfg(target_os = "linux")]
mod procfs;
mod sparse;

use std::fmt;

pub use cache::CachedMemory;
#[cfg(target_os = "linux")]
pub use procfs::ProcessMemory;
pub use sparse::SparseMemory;

use crate::error::{WalkError, WalkResult};
use crate::types::Address;

/// Width of a pointer in the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerWidth
{
    /// 4-byte pointers
    Bits32,
    /// 8-byte pointers
    #[default]
    Bits64,
}

impl PointerWidth
{
    /// Pointer size in bytes.
    pub const fn bytes(self) -> usize
    {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }

    /// Map a byte size back to a pointer width.
    pub fn from_bytes(bytes: u64) -> Option<Self>
    {
        match bytes {
            4 => Some(PointerWidth::Bits32),
            8 => Some(PointerWidth::Bits64),
            _ => None,
        }
    }
}

/// An integer read from the target, tagged with its signedness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar
{
    Unsigned(u64),
    Signed(i64),
}

impl Scalar
{
    /// Raw bits as `u64` (signed values are reinterpreted, not clamped).
    #[allow(clippy::cast_sign_loss)]
    pub const fn as_u64(self) -> u64
    {
        match self {
            Scalar::Unsigned(value) => value,
            Scalar::Signed(value) => value as u64,
        }
    }

    /// Value as `i64` (unsigned values are reinterpreted, not clamped).
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_i64(self) -> i64
    {
        match self {
            Scalar::Unsigned(value) => value as i64,
            Scalar::Signed(value) => value,
        }
    }

    pub const fn is_zero(self) -> bool
    {
        self.as_u64() == 0
    }
}

impl fmt::Display for Scalar
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Scalar::Unsigned(value) => write!(f, "{value}"),
            Scalar::Signed(value) => write!(f, "{value}"),
        }
    }
}

/// Read-only access to a target address space
///
/// Implementors provide [`MemoryAccessor::read`]; scalar and pointer decoding
/// is shared. Decoding works on byte buffers, so unaligned target layouts are
/// always readable. Target values are little-endian.
///
/// ## Errors
///
/// - `UnmappedMemory`: the first byte of the range is not accessible
/// - `OutOfRange`: the range starts mapped but runs past the end
/// - `InvalidArgument`: unsupported scalar width
///
/// ## Thread Safety
///
/// Accessors are used from a single thread per query. Nothing here locks the
/// target; reads of a live target are best-effort over a moving structure.
///
/// ## Example
///
/// ```rust
/// use memwalk_core::memory::{MemoryAccessor, SparseMemory};
/// use memwalk_core::types::Address;
///
/// let mut image = SparseMemory::new();
/// image.map(Address::new(0x1000), vec![0u8; 16])?;
/// image.store_u64(Address::new(0x1008), 0x2000)?;
/// assert_eq!(image.read_pointer(Address::new(0x1008))?, Address::new(0x2000));
/// # Ok::<(), memwalk_core::error::WalkError>(())
/// ```
pub trait MemoryAccessor
{
    /// Read `len` bytes starting at `addr`.
    ///
    /// Returns exactly `len` bytes or an error; short reads are errors.
    fn read(&self, addr: Address, len: usize) -> WalkResult<Vec<u8>>;

    /// Pointer width of the target (defaults to 64-bit).
    fn pointer_width(&self) -> PointerWidth
    {
        PointerWidth::Bits64
    }

    /// Read an integer of `width` bytes, sign-extending when `signed` is set.
    fn read_scalar(&self, addr: Address, width: usize, signed: bool) -> WalkResult<Scalar>
    {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(WalkError::InvalidArgument(format!(
                "unsupported scalar width {width} at {addr}"
            )));
        }

        let bytes = self.read(addr, width)?;
        if bytes.len() < width {
            return Err(WalkError::OutOfRange { address: addr, len: width });
        }

        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&bytes[..width]);
        let value = u64::from_le_bytes(raw);

        if signed {
            let shift = 64 - (width as u32) * 8;
            #[allow(clippy::cast_possible_wrap)]
            let extended = ((value << shift) as i64) >> shift;
            Ok(Scalar::Signed(extended))
        } else {
            Ok(Scalar::Unsigned(value))
        }
    }

    /// Read an unsigned integer of `width` bytes.
    fn read_unsigned(&self, addr: Address, width: usize) -> WalkResult<u64>
    {
        self.read_scalar(addr, width, false).map(Scalar::as_u64)
    }

    /// Read a signed integer of `width` bytes.
    fn read_signed(&self, addr: Address, width: usize) -> WalkResult<i64>
    {
        self.read_scalar(addr, width, true).map(Scalar::as_i64)
    }

    /// Read a pointer-width unsigned value as an address.
    fn read_pointer(&self, addr: Address) -> WalkResult<Address>
    {
        self.read_unsigned(addr, self.pointer_width().bytes()).map(Address::from)
    }
}

impl<M: MemoryAccessor + ?Sized> MemoryAccessor for &M
{
    fn read(&self, addr: Address, len: usize) -> WalkResult<Vec<u8>>
    {
        (**self).read(addr, len)
    }

    fn pointer_width(&self) -> PointerWidth
    {
        (**self).pointer_width()
    }
}

impl<M: MemoryAccessor + ?Sized> MemoryAccessor for Box<M>
{
    fn read(&self, addr: Address, len: usize) -> WalkResult<Vec<u8>>
    {
        (**self).read(addr, len)
    }

    fn pointer_width(&self) -> PointerWidth
    {
        (**self).pointer_width()
    }
}
