//! # Typed Values
//!
//! A [`TypedValue`] is an address paired with a layout. It never owns target
//! bytes: every accessor reads through the [`MemoryAccessor`] when called, so a
//! value built once and read later observes whatever the target holds then.
//!
//! A [`Target`] bundles the accessor, the resolver and the [`WalkConfig`] for
//! one query and hands out values and collection walkers.
//!
//! ## Example
//!
//! ```rust
//! use memwalk_core::layout::{Field, TypeDescriptor, TypeRegistry};
//! use memwalk_core::memory::SparseMemory;
//! use memwalk_core::types::Address;
//! use memwalk_core::value::Target;
//!
//! let mut types = TypeRegistry::new();
//! types.insert_type(
//!     TypeDescriptor::new("point", 8)
//!         .with_field(Field::unsigned("x", 0, 4))
//!         .with_field(Field::signed("y", 4, 4)),
//! );
//!
//! let mut image = SparseMemory::new();
//! image.map_zeroed(Address::new(0x1000), 8)?;
//! image.store_u32(Address::new(0x1000), 7)?;
//! image.store_u32(Address::new(0x1004), u32::MAX)?;
//!
//! let target = Target::new(&image, &types);
//! let point = target.value(Address::new(0x1000), "point")?;
//! assert_eq!(point.field("x")?.as_u64()?, 7);
//! assert_eq!(point.field("y")?.as_i64()?, -1);
//! # Ok::<(), memwalk_core::error::WalkError>(())
//! ```

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use crate::config::WalkConfig;
use crate::error::{WalkError, WalkResult};
use crate::layout::{FieldKind, TypeResolver};
use crate::memory::{MemoryAccessor, PointerWidth, Scalar};
use crate::types::Address;
use crate::walk::{
    verify_entry_count, CuckooEntry, CuckooLayout, CuckooNames, CuckooTable, CuckooWalker, EntryCount, HashIndexLayout,
    HashIndexNames, HashIndexWalker, LinkDescriptor, ListWalker, QueueHead, QueueKind, QueueLayout, RbTreeLayout,
    RbTreeWalker, SkmemRegionLayout, SkmemRegionNames, SkmemRegionWalker, SlabCacheLayout, SlabCacheNames,
    SlabCacheWalker,
};

/// Longest string [`TypedValue::as_c_string`] follows through a pointer
pub const MAX_C_STRING: usize = 1024;

/// Accessor, resolver and configuration for one query
#[derive(Clone, Copy)]
pub struct Target<'a>
{
    memory: &'a dyn MemoryAccessor,
    types: &'a dyn TypeResolver,
    config: WalkConfig,
}

impl fmt::Debug for Target<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Target").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<'a> Target<'a>
{
    /// Target with the default [`WalkConfig`].
    pub fn new(memory: &'a dyn MemoryAccessor, types: &'a dyn TypeResolver) -> Self
    {
        Self {
            memory,
            types,
            config: WalkConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: WalkConfig) -> Self
    {
        self.config = config;
        self
    }

    pub fn memory(&self) -> &'a dyn MemoryAccessor
    {
        self.memory
    }

    /// View `address` as an instance of `type_name`.
    ///
    /// Only the layout is checked; nothing is read yet.
    pub fn value(&self, address: Address, type_name: &str) -> WalkResult<TypedValue<'a>>
    {
        let descriptor = self.types.resolve_type(type_name)?;
        Ok(TypedValue::aggregate(*self, address, &descriptor.name, descriptor.size))
    }

    /// Value of a global entry point.
    ///
    /// Symbols are resolved on every call; a target that reloads or relinks
    /// between queries is picked up.
    pub fn symbol(&self, name: &str) -> WalkResult<TypedValue<'a>>
    {
        let symbol = self.types.resolve_symbol(name)?;
        debug!(symbol = name, address = %symbol.address, type_name = %symbol.type_name, "resolved symbol");
        self.value(symbol.address, &symbol.type_name)
    }

    fn values<I>(&self, elem_type: &str, inner: I) -> WalkResult<Values<'a, I>>
    where
        I: Iterator<Item = WalkResult<Address>>,
    {
        let descriptor = self.types.resolve_type(elem_type)?;
        Ok(Values {
            target: *self,
            type_name: Arc::from(descriptor.name.as_str()),
            size: descriptor.size,
            inner,
        })
    }

    fn queue_layout(&self, kind: QueueKind, head: &TypedValue<'a>, elem_type: &str, link_field: &str) -> WalkResult<QueueLayout>
    {
        QueueLayout::resolve(self.types, kind, head.aggregate_name()?, elem_type, link_field)
    }

    /// Lazy walk over a `queue.h` queue.
    ///
    /// `head` is the head structure (`TAILQ_HEAD(...)` member or global);
    /// `link_field` is the entry member embedding the link.
    pub fn queue(
        &self,
        kind: QueueKind,
        head: &TypedValue<'a>,
        elem_type: &str,
        link_field: &str,
    ) -> WalkResult<Values<'a, ListWalker<'a>>>
    {
        let layout = self.queue_layout(kind, head, elem_type, link_field)?;
        let walker = layout.iter(self.memory, head.address()).with_max_nodes(self.config.max_nodes);
        self.values(elem_type, walker)
    }

    /// First and last element of a queue, without walking it.
    pub fn queue_head(&self, kind: QueueKind, head: &TypedValue<'a>, elem_type: &str, link_field: &str) -> WalkResult<QueueHead>
    {
        self.queue_layout(kind, head, elem_type, link_field)?
            .read_head(self.memory, head.address())
    }

    /// Lazy in-order walk over a `tree.h` red-black tree.
    pub fn rbtree(&self, head: &TypedValue<'a>, elem_type: &str, link_field: &str) -> WalkResult<Values<'a, RbTreeWalker<'a>>>
    {
        let layout = RbTreeLayout::resolve(self.types, head.aggregate_name()?, elem_type, link_field)?;
        let walker = layout.iter(self.memory, head.address()).with_max_nodes(self.config.max_nodes);
        self.values(elem_type, walker)
    }

    /// Like [`rbtree`](Self::rbtree) for trees whose leaves point at `sentinel`.
    pub fn rbtree_with_sentinel(
        &self,
        head: &TypedValue<'a>,
        elem_type: &str,
        link_field: &str,
        sentinel: Address,
    ) -> WalkResult<Values<'a, RbTreeWalker<'a>>>
    {
        let layout = RbTreeLayout::resolve(self.types, head.aggregate_name()?, elem_type, link_field)?;
        let walker = layout
            .iter(self.memory, head.address())
            .with_null_sentinel(sentinel)
            .with_max_nodes(self.config.max_nodes);
        self.values(elem_type, walker)
    }

    /// Walk a cuckoo hash table using xnu member names.
    ///
    /// A null `table` is an empty table.
    pub fn cuckoo(&self, table: Address) -> WalkResult<CuckooScan<'a>>
    {
        self.cuckoo_with(table, &CuckooNames::default())
    }

    pub fn cuckoo_with(&self, table: Address, names: &CuckooNames) -> WalkResult<CuckooScan<'a>>
    {
        let layout = CuckooLayout::resolve(self.types, names)?;
        let header = if table.is_null() {
            CuckooTable::empty(table)
        } else {
            layout.read_table(self.memory, table)?
        };
        debug!(
            table = %table,
            buckets = %header.buckets,
            n_buckets = header.n_buckets,
            "walking cuckoo table"
        );
        Ok(CuckooScan {
            walker: layout.iter(self.memory, &header).with_max_nodes(self.config.max_nodes),
            table: header,
            verify: self.config.verify_counts,
            failed: false,
            observed: 0,
            check: None,
        })
    }

    /// Lazy bucket-then-chain walk over a hash index embedded in `owner`.
    pub fn hash_index(&self, owner: Address, names: &HashIndexNames<'_>) -> WalkResult<HashIndexWalker<'a>>
    {
        let layout = HashIndexLayout::resolve(self.types, names)?;
        Ok(layout.iter(self.memory, owner)?.with_max_nodes(self.config.max_nodes))
    }

    /// Walk a slab cache using xnu skywalk member names.
    pub fn slab_cache(&self, cache: Address) -> WalkResult<SlabCacheWalker<'a>>
    {
        self.slab_cache_with(cache, &SlabCacheNames::default())
    }

    pub fn slab_cache_with(&self, cache: Address, names: &SlabCacheNames) -> WalkResult<SlabCacheWalker<'a>>
    {
        let layout = SlabCacheLayout::resolve(self.types, names)?;
        Ok(layout.iter(self.memory, cache).with_max_nodes(self.config.max_nodes))
    }

    /// Walk a memory region using xnu skywalk member names.
    pub fn skmem_region(&self, region: Address) -> WalkResult<SkmemRegionWalker<'a>>
    {
        self.skmem_region_with(region, &SkmemRegionNames::default())
    }

    pub fn skmem_region_with(&self, region: Address, names: &SkmemRegionNames) -> WalkResult<SkmemRegionWalker<'a>>
    {
        let layout = SkmemRegionLayout::resolve(self.types, names)?;
        Ok(layout.iter(self.memory, region).with_max_nodes(self.config.max_nodes))
    }
}

/// Address plus layout of a value in the target
#[derive(Clone)]
pub struct TypedValue<'a>
{
    target: Target<'a>,
    address: Address,
    kind: FieldKind,
    size: u64,
}

impl fmt::Debug for TypedValue<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("TypedValue")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .finish()
    }
}

impl PartialEq for TypedValue<'_>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.address == other.address && self.kind == other.kind && self.size == other.size
    }
}

impl<'a> TypedValue<'a>
{
    fn aggregate(target: Target<'a>, address: Address, type_name: &str, size: u64) -> Self
    {
        Self {
            target,
            address,
            kind: FieldKind::Struct {
                type_name: type_name.to_string(),
            },
            size,
        }
    }

    pub const fn address(&self) -> Address
    {
        self.address
    }

    pub const fn kind(&self) -> &FieldKind
    {
        &self.kind
    }

    /// Size in bytes.
    pub const fn size(&self) -> u64
    {
        self.size
    }

    /// Aggregate type name, `None` for scalars, pointers, arrays and bytes.
    pub fn type_name(&self) -> Option<&str>
    {
        match &self.kind {
            FieldKind::Struct { type_name } => Some(type_name),
            _ => None,
        }
    }

    fn aggregate_name(&self) -> WalkResult<&str>
    {
        self.type_name().ok_or_else(|| self.mismatch("struct"))
    }

    fn mismatch(&self, expected: &str) -> WalkError
    {
        WalkError::TypeMismatch {
            expected: format!("{expected} at {}", self.address),
            found: self.kind.describe(),
        }
    }

    /// Member `name` of an aggregate.
    pub fn field(&self, name: &str) -> WalkResult<TypedValue<'a>>
    {
        let descriptor = self.target.types.resolve_type(self.aggregate_name()?)?;
        let field = descriptor.field(name)?;
        Ok(Self {
            target: self.target,
            address: self.address + field.offset,
            kind: field.kind.clone(),
            size: field.size,
        })
    }

    /// Element `index` of an inline array, or of the array a typed pointer points at.
    pub fn index(&self, index: u64) -> WalkResult<TypedValue<'a>>
    {
        match &self.kind {
            FieldKind::Array {
                element,
                element_size,
                count,
            } => {
                if index >= *count {
                    return Err(WalkError::InvalidArgument(format!(
                        "index {index} out of bounds for array[{count}] at {}",
                        self.address
                    )));
                }
                Ok(Self {
                    target: self.target,
                    address: self.address + index.wrapping_mul(*element_size),
                    kind: element.as_ref().clone(),
                    size: *element_size,
                })
            }
            FieldKind::Pointer { pointee: Some(_) } => {
                let first = self.deref()?;
                Ok(Self {
                    address: first.address + index.wrapping_mul(first.size),
                    ..first
                })
            }
            _ => Err(self.mismatch("array or typed pointer")),
        }
    }

    /// Elements `range` of an inline array or of the array a typed pointer points at.
    ///
    /// Bounds come from the target (`ch_first[k]..ch_last[k]`), so the range
    /// is checked against the node budget before anything is read.
    pub fn elements(&self, range: Range<u64>) -> WalkResult<impl Iterator<Item = WalkResult<TypedValue<'a>>> + 'a>
    {
        let len = range.end.checked_sub(range.start).ok_or_else(|| WalkError::MalformedStructure {
            address: self.address,
            reason: format!("element range {}..{} runs backwards", range.start, range.end),
        })?;
        if let Some(limit) = self.target.config.max_nodes {
            if len > u64::try_from(limit).unwrap_or(u64::MAX) {
                return Err(WalkError::MalformedStructure {
                    address: self.address,
                    reason: format!("element range {}..{} exceeds the {limit} node budget", range.start, range.end),
                });
            }
        }
        let array = self.clone();
        Ok(range.map(move |index| array.index(index)))
    }

    /// Reinterpret the same address as `type_name`.
    pub fn cast(&self, type_name: &str) -> WalkResult<TypedValue<'a>>
    {
        self.target.value(self.address, type_name)
    }

    /// Follow a typed pointer.
    ///
    /// ## Errors
    ///
    /// - `NullPointer` if the pointer is null
    /// - `TypeMismatch` for untyped pointers and non-pointers
    pub fn deref(&self) -> WalkResult<TypedValue<'a>>
    {
        self.pointee()?
            .ok_or(WalkError::NullPointer { address: self.address })
    }

    /// Follow a typed pointer, `None` when it is null.
    pub fn pointee(&self) -> WalkResult<Option<TypedValue<'a>>>
    {
        let FieldKind::Pointer { pointee: Some(pointee) } = &self.kind else {
            return Err(self.mismatch("typed pointer"));
        };
        let address = self.as_address()?;
        if address.is_null() {
            return Ok(None);
        }
        self.target.value(address, pointee).map(Some)
    }

    /// The `type_name` instance that embeds this value at member path `member`.
    pub fn container_of(&self, type_name: &str, member: &str) -> WalkResult<TypedValue<'a>>
    {
        let resolved = self.target.types.resolve_path(type_name, member)?;
        let base = self.address.checked_sub(resolved.offset).ok_or_else(|| {
            WalkError::InvalidArgument(format!(
                "{} is below the offset {:#x} of `{type_name}.{member}`",
                self.address, resolved.offset
            ))
        })?;
        self.target.value(base, type_name)
    }

    /// Read an integer or pointer value.
    pub fn as_integer(&self) -> WalkResult<Scalar>
    {
        let signed = match &self.kind {
            FieldKind::Unsigned | FieldKind::Pointer { .. } => false,
            FieldKind::Signed => true,
            _ => return Err(self.mismatch("integer")),
        };
        let width = usize::try_from(self.size).map_err(|_| self.mismatch("integer"))?;
        self.target.memory.read_scalar(self.address, width, signed)
    }

    pub fn as_u64(&self) -> WalkResult<u64>
    {
        self.as_integer().map(Scalar::as_u64)
    }

    pub fn as_i64(&self) -> WalkResult<i64>
    {
        self.as_integer().map(Scalar::as_i64)
    }

    /// Read a pointer value.
    pub fn as_address(&self) -> WalkResult<Address>
    {
        match (&self.kind, PointerWidth::from_bytes(self.size)) {
            (FieldKind::Pointer { .. }, Some(width)) => {
                LinkDescriptor::with_width(0, width).read(self.target.memory, self.address)
            }
            _ => Err(self.mismatch("pointer")),
        }
    }

    /// Read a NUL-terminated string.
    ///
    /// Inline character arrays are read whole and cut at the first NUL; a
    /// pointer is followed for at most [`MAX_C_STRING`] bytes. Invalid UTF-8
    /// is replaced, never rejected.
    pub fn as_c_string(&self) -> WalkResult<String>
    {
        let bytes = match &self.kind {
            FieldKind::Bytes | FieldKind::Array { .. } => {
                let len = usize::try_from(self.size).map_err(|_| self.mismatch("character array"))?;
                let mut bytes = self.target.memory.read(self.address, len)?;
                if let Some(end) = bytes.iter().position(|&byte| byte == 0) {
                    bytes.truncate(end);
                }
                bytes
            }
            FieldKind::Pointer { .. } => {
                let start = self.as_address()?;
                if start.is_null() {
                    return Err(WalkError::NullPointer { address: self.address });
                }
                read_c_string(self.target.memory, start, MAX_C_STRING)?
            }
            _ => return Err(self.mismatch("character array or pointer")),
        };
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn read_c_string(memory: &dyn MemoryAccessor, start: Address, limit: usize) -> WalkResult<Vec<u8>>
{
    let mut bytes = Vec::new();
    let mut cursor = start;
    while bytes.len() < limit {
        match memory.read(cursor, 1)?.first() {
            Some(0) | None => break,
            Some(&byte) => bytes.push(byte),
        }
        cursor = cursor.saturating_add(1);
    }
    Ok(bytes)
}

/// Maps a walker's node addresses to typed values of the element type
pub struct Values<'a, I>
{
    target: Target<'a>,
    type_name: Arc<str>,
    size: u64,
    inner: I,
}

impl<'a, I> Iterator for Values<'a, I>
where
    I: Iterator<Item = WalkResult<Address>>,
{
    type Item = WalkResult<TypedValue<'a>>;

    fn next(&mut self) -> Option<Self::Item>
    {
        let next = self.inner.next()?;
        Some(next.map(|address| TypedValue::aggregate(self.target, address, &self.type_name, self.size)))
    }
}

impl<'a, I> std::iter::FusedIterator for Values<'a, I> where I: std::iter::FusedIterator<Item = WalkResult<Address>> {}

/// A cuckoo table walk with its header and the optional entry count check
///
/// When count verification is on, the check runs once the walk is exhausted
/// without error; [`CuckooScan::count_check`] reports its outcome.
pub struct CuckooScan<'a>
{
    walker: CuckooWalker<'a>,
    table: CuckooTable,
    verify: bool,
    failed: bool,
    observed: u64,
    check: Option<EntryCount>,
}

impl CuckooScan<'_>
{
    pub const fn table(&self) -> &CuckooTable
    {
        &self.table
    }

    /// Entries yielded so far.
    pub const fn observed(&self) -> u64
    {
        self.observed
    }

    pub const fn count_check(&self) -> Option<EntryCount>
    {
        self.check
    }
}

impl Iterator for CuckooScan<'_>
{
    type Item = WalkResult<CuckooEntry>;

    fn next(&mut self) -> Option<Self::Item>
    {
        match self.walker.next() {
            Some(Ok(entry)) => {
                self.observed += 1;
                Some(Ok(entry))
            }
            Some(Err(err)) => {
                self.failed = true;
                Some(Err(err))
            }
            None => {
                if self.verify && !self.failed && self.check.is_none() {
                    if let Some(expected) = self.table.n_entries {
                        self.check = Some(verify_entry_count(self.table.address, expected, self.observed));
                    }
                }
                None
            }
        }
    }
}

impl std::iter::FusedIterator for CuckooScan<'_> {}
