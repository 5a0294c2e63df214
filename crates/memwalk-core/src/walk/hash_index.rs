//! Bucketed hash index walker.
//!
//! The index is an array of buckets, each holding the head of a chain. The
//! owning structure stores a pointer to the array and either the bucket mask
//! (`count - 1`) or nothing at all when the size is a compile-time constant.

use std::iter::FusedIterator;

use tracing::{debug, trace};

use super::link::{LinkDescriptor, NodeBudget, ScalarField};
use super::list::ListWalker;
use super::tailq::{QueueKind, QueueLayout};
use crate::error::{WalkError, WalkResult};
use crate::layout::{FieldKind, TypeResolver};
use crate::memory::MemoryAccessor;
use crate::types::Address;

/// Where an index keeps its bucket count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketCount<M>
{
    /// Owner member holding `count - 1`
    Mask(M),
    /// Fixed size (`KERN_CHANNEL_UPP_HTBL_SIZE`)
    Fixed(u64),
}

/// Member names used to resolve a [`HashIndexLayout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashIndexNames<'n>
{
    /// Type owning the index (`skmem_cache`, `skmem_region`)
    pub owner_type: &'n str,
    pub buckets: BucketCount<&'n str>,
    /// Pointer to the bucket array; its pointee is the bucket type
    pub table: &'n str,
    /// Chain head member inside a bucket
    pub bucket_head: &'n str,
    pub chain: QueueKind,
    pub elem_type: &'n str,
    /// Element member embedding the chain link
    pub link_field: &'n str,
}

/// Resolved hash index layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashIndexLayout
{
    /// Bucket mask relative to the owner, or the fixed count
    pub buckets: BucketCount<ScalarField>,
    /// Bucket array pointer, relative to the owner
    pub table: LinkDescriptor,
    pub bucket_size: u64,
    /// Chain, relative to a bucket
    pub chain: QueueLayout,
}

impl HashIndexLayout
{
    pub fn resolve(types: &dyn TypeResolver, names: &HashIndexNames<'_>) -> WalkResult<Self>
    {
        let table_field = types.resolve_path(names.owner_type, names.table)?;
        let bucket_type = match &table_field.field.kind {
            FieldKind::Pointer { pointee: Some(pointee) } => pointee.clone(),
            other => {
                return Err(WalkError::TypeMismatch {
                    expected: format!("typed pointer at `{}.{}`", names.owner_type, names.table),
                    found: other.describe(),
                })
            }
        };
        let bucket = types.resolve_type(&bucket_type)?;
        let layout = Self {
            buckets: match names.buckets {
                BucketCount::Mask(mask) => BucketCount::Mask(ScalarField::resolve(types, names.owner_type, mask)?),
                BucketCount::Fixed(count) => BucketCount::Fixed(count),
            },
            table: LinkDescriptor::resolve(types, names.owner_type, names.table)?,
            bucket_size: bucket.size,
            chain: QueueLayout::resolve_member(
                types,
                names.chain,
                &bucket_type,
                names.bucket_head,
                names.elem_type,
                names.link_field,
            )?,
        };
        debug!(owner = names.owner_type, bucket_type = %bucket_type, bucket_size = layout.bucket_size, "resolved hash index layout");
        Ok(layout)
    }

    /// Read the owner's bucket array (and mask) and start walking.
    pub fn iter<'a>(&self, memory: &'a dyn MemoryAccessor, owner: Address) -> WalkResult<HashIndexWalker<'a>>
    {
        let table = self.table.read(memory, owner)?;
        match self.buckets {
            BucketCount::Mask(mask) => {
                let mask = mask.read(memory, owner)?.as_u64();
                HashIndexWalker::from_mask(memory, *self, table, mask)
            }
            BucketCount::Fixed(count) => Ok(HashIndexWalker::new(memory, *self, table, count)),
        }
    }
}

/// One step of a hash index walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashIndexItem
{
    /// A bucket, yielded before its chain
    Bucket
    {
        index: u64,
        address: Address,
    },
    /// A chained element of bucket `bucket`
    Entry
    {
        bucket: u64,
        address: Address,
    },
}

/// Lazy bucket-then-chain enumeration
///
/// Every bucket is yielded, populated or not, followed by its chain entries.
/// A null bucket array is an empty index. Buckets and entries both count
/// against the node budget, so a garbage mask cannot run away either.
pub struct HashIndexWalker<'a>
{
    memory: &'a dyn MemoryAccessor,
    layout: HashIndexLayout,
    buckets: Address,
    count: u64,
    index: u64,
    chain: Option<(u64, ListWalker<'a>)>,
    budget: NodeBudget,
    done: bool,
}

impl<'a> HashIndexWalker<'a>
{
    pub fn new(memory: &'a dyn MemoryAccessor, layout: HashIndexLayout, buckets: Address, count: u64) -> Self
    {
        Self {
            memory,
            layout,
            buckets,
            count,
            index: 0,
            chain: None,
            budget: NodeBudget::unlimited(),
            done: buckets.is_null(),
        }
    }

    /// Walk buckets `0..=mask`.
    pub fn from_mask(memory: &'a dyn MemoryAccessor, layout: HashIndexLayout, buckets: Address, mask: u64) -> WalkResult<Self>
    {
        let count = mask.checked_add(1).ok_or_else(|| WalkError::MalformedStructure {
            address: buckets,
            reason: format!("hash mask {mask:#x} overflows the bucket count"),
        })?;
        Ok(Self::new(memory, layout, buckets, count))
    }

    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: Option<usize>) -> Self
    {
        self.budget = NodeBudget::new(max_nodes);
        self
    }

    fn fail(&mut self, err: WalkError) -> Option<WalkResult<HashIndexItem>>
    {
        self.done = true;
        self.chain = None;
        Some(Err(err))
    }
}

impl Iterator for HashIndexWalker<'_>
{
    type Item = WalkResult<HashIndexItem>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done {
            return None;
        }

        if let Some((bucket, chain)) = self.chain.as_mut() {
            let bucket = *bucket;
            match chain.next() {
                Some(Ok(address)) => {
                    if let Err(err) = self.budget.charge(address) {
                        return self.fail(err);
                    }
                    trace!(bucket, entry = %address, "hash index entry");
                    return Some(Ok(HashIndexItem::Entry { bucket, address }));
                }
                Some(Err(err)) => return self.fail(err),
                None => self.chain = None,
            }
        }

        if self.index >= self.count {
            self.done = true;
            return None;
        }
        let index = self.index;
        self.index += 1;
        let address = self.buckets + index.wrapping_mul(self.layout.bucket_size);
        if let Err(err) = self.budget.charge(address) {
            return self.fail(err);
        }
        self.chain = Some((index, self.layout.chain.iter(self.memory, address)));
        Some(Ok(HashIndexItem::Bucket { index, address }))
    }
}

impl FusedIterator for HashIndexWalker<'_> {}
