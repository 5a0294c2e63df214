//! Link and field descriptors resolved once per traversal.

use crate::error::{WalkError, WalkResult};
use crate::layout::{FieldKind, TypeResolver};
use crate::memory::{MemoryAccessor, PointerWidth, Scalar};
use crate::types::Address;

/// Location of a pointer inside a node: byte offset plus pointer width
///
/// Walkers follow links through these instead of looking up field names at
/// every step, so they work with any layout source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkDescriptor
{
    pub offset: u64,
    pub width: PointerWidth,
}

impl LinkDescriptor
{
    /// 64-bit link at `offset`.
    pub const fn new(offset: u64) -> Self
    {
        Self {
            offset,
            width: PointerWidth::Bits64,
        }
    }

    pub const fn with_width(offset: u64, width: PointerWidth) -> Self
    {
        Self { offset, width }
    }

    /// Resolve a dotted member path to a pointer link.
    ///
    /// ## Errors
    ///
    /// - `UnknownType` / `UnknownField` from the resolver
    /// - `TypeMismatch` if the member is not a 4- or 8-byte pointer
    pub fn resolve(types: &dyn TypeResolver, type_name: &str, path: &str) -> WalkResult<Self>
    {
        let resolved = types.resolve_path(type_name, path)?;
        match (&resolved.field.kind, PointerWidth::from_bytes(resolved.field.size)) {
            (FieldKind::Pointer { .. }, Some(width)) => Ok(Self::with_width(resolved.offset, width)),
            (kind, _) => Err(WalkError::TypeMismatch {
                expected: format!("pointer at `{type_name}.{path}`"),
                found: format!("{} of {} bytes", kind.describe(), resolved.field.size),
            }),
        }
    }

    /// Address of the link slot inside `node`.
    pub fn slot(&self, node: Address) -> Address
    {
        node + self.offset
    }

    /// Follow the link out of `node`.
    pub fn read(&self, memory: &dyn MemoryAccessor, node: Address) -> WalkResult<Address>
    {
        memory
            .read_unsigned(self.slot(node), self.width.bytes())
            .map(Address::from)
    }
}

/// Location of an integer inside a structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarField
{
    pub offset: u64,
    pub width: usize,
    pub signed: bool,
}

impl ScalarField
{
    pub const fn unsigned(offset: u64, width: usize) -> Self
    {
        Self {
            offset,
            width,
            signed: false,
        }
    }

    /// Resolve a dotted member path to an integer field.
    ///
    /// Pointers are accepted and read as unsigned, which is how flag words
    /// packed into pointer-sized slots are usually declared.
    pub fn resolve(types: &dyn TypeResolver, type_name: &str, path: &str) -> WalkResult<Self>
    {
        let resolved = types.resolve_path(type_name, path)?;
        let width = usize::try_from(resolved.field.size).unwrap_or(usize::MAX);
        let signed = match &resolved.field.kind {
            FieldKind::Unsigned | FieldKind::Pointer { .. } => false,
            FieldKind::Signed => true,
            other => {
                return Err(WalkError::TypeMismatch {
                    expected: format!("integer at `{type_name}.{path}`"),
                    found: other.describe(),
                })
            }
        };
        Ok(Self {
            offset: resolved.offset,
            width,
            signed,
        })
    }

    pub fn read(&self, memory: &dyn MemoryAccessor, base: Address) -> WalkResult<Scalar>
    {
        memory.read_scalar(base + self.offset, self.width, self.signed)
    }
}

/// Per-traversal node budget
///
/// Every node visit is charged. Once the budget is exhausted the traversal is
/// reported as `MalformedStructure`, which is how a cycle in the target
/// surfaces instead of an endless walk.
#[derive(Debug, Clone, Copy)]
pub struct NodeBudget
{
    limit: Option<usize>,
    used: usize,
}

impl NodeBudget
{
    pub const fn new(limit: Option<usize>) -> Self
    {
        Self { limit, used: 0 }
    }

    pub const fn unlimited() -> Self
    {
        Self::new(None)
    }

    /// Charge one visit to `node`.
    pub fn charge(&mut self, node: Address) -> WalkResult<()>
    {
        self.used += 1;
        match self.limit {
            Some(limit) if self.used > limit => Err(WalkError::MalformedStructure {
                address: node,
                reason: format!("traversal visited more than {limit} nodes, the structure may contain a cycle"),
            }),
            _ => Ok(()),
        }
    }

    pub const fn used(&self) -> usize
    {
        self.used
    }
}
