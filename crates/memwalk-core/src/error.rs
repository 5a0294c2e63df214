//! # Error Types
//!
//! General error handling for memory access, layout lookups and traversals.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

use crate::types::Address;

/// Main error type for walker operations
///
/// Every failure is surfaced to the immediate caller of a traversal. Nothing is
/// retried: the target cannot be validated from here, so a failed read is
/// reported as a structural problem (bad pointer, corrupted node) and the
/// traversal ends.
///
/// ## Error Categories
///
/// 1. **Memory errors**: UnmappedMemory, OutOfRange, NullPointer
/// 2. **Layout errors**: UnknownType, UnknownField, UnknownSymbol, TypeMismatch
/// 3. **Structure errors**: MalformedStructure
/// 4. **Argument errors**: InvalidArgument
/// 5. **I/O errors**: Io (snapshot files, `/proc/<pid>/mem`)
#[derive(Error, Debug)]
pub enum WalkError
{
    /// The accessor could not resolve the first byte of the requested range
    ///
    /// This happens when:
    /// - A pointer in the target is stale or corrupted
    /// - The core file does not contain the page
    /// - The live target unmapped the page between observations
    #[error("Unmapped memory: {len} bytes at {address}")]
    UnmappedMemory
    {
        /// Address of the first unreadable byte
        address: Address,
        /// Number of bytes requested
        len: usize,
    },

    /// The range starts in mapped memory but runs past the end of it
    #[error("Read out of range: {len} bytes at {address}")]
    OutOfRange
    {
        /// Start of the requested range
        address: Address,
        /// Number of bytes requested
        len: usize,
    },

    /// A pointer slot held null where a target object was required
    ///
    /// `address` is the location of the pointer slot, not the pointer value.
    #[error("Null pointer read from {address}")]
    NullPointer
    {
        /// Location of the null pointer
        address: Address,
    },

    /// The resolver does not know the requested type
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// A field lookup failed on a known type
    #[error("Unknown field `{field}` in type `{type_name}`")]
    UnknownField
    {
        /// Type that was searched
        type_name: String,
        /// Field that was requested
        field: String,
    },

    /// The resolver does not know the requested global symbol
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// An accessor was applied to a value of the wrong kind
    ///
    /// Examples:
    /// - `field()` on a pointer instead of an aggregate
    /// - `as_address()` on a nested struct
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch
    {
        /// What the operation needed
        expected: String,
        /// What the value actually is
        found: String,
    },

    /// A traversal invariant was violated
    ///
    /// Raised when a walk exceeds its node budget, which is how an
    /// unterminated cycle in the target shows up. The walker cannot tell
    /// corruption from a torn concurrent read.
    #[error("Malformed structure at {address}: {reason}")]
    MalformedStructure
    {
        /// Node being visited when the violation was detected
        address: Address,
        /// Human-readable description
        reason: String,
    },

    /// Invalid argument passed to a walker or accessor
    ///
    /// Examples:
    /// - Scalar width other than 1, 2, 4 or 8
    /// - Overlapping regions in a memory image
    /// - Malformed address text
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error (snapshot files, `/proc/<pid>/mem`)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WalkError
{
    /// Address this error refers to, if any.
    pub fn address(&self) -> Option<Address>
    {
        match self {
            WalkError::UnmappedMemory { address, .. }
            | WalkError::OutOfRange { address, .. }
            | WalkError::NullPointer { address }
            | WalkError::MalformedStructure { address, .. } => Some(*address),
            _ => None,
        }
    }
}

/// Convenience type alias for `Result<T, WalkError>`
///
/// ```rust
/// use memwalk_core::error::WalkResult;
/// fn foo() -> WalkResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type WalkResult<T> = std::result::Result<T, WalkError>;
