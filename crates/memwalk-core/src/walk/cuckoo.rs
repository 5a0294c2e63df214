//! Cuckoo hash table walker.
//!
//! A cuckoo table is an array of buckets. Each bucket carries an in-use flag
//! and a fixed number of slots; each slot holds the head of a collision chain
//! and the hash shared by that chain. Items live in one of a few candidate
//! slots, and inserts beyond slot capacity overflow into the chain, so
//! enumeration has to cover both levels: bucket, then slot, then chain.

use std::iter::FusedIterator;

use tracing::{debug, trace, warn};

use super::link::{LinkDescriptor, NodeBudget, ScalarField};
use crate::error::{WalkError, WalkResult};
use crate::layout::{FieldKind, TypeResolver};
use crate::memory::{MemoryAccessor, Scalar};
use crate::types::Address;

/// Member names used to resolve a [`CuckooLayout`]
///
/// Defaults match the xnu `cuckoo_hashtable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuckooNames
{
    pub table_type: String,
    pub buckets: String,
    pub n_buckets: String,
    pub n_entries: String,
    pub capacity: String,
    pub in_use: String,
    pub slots: String,
    pub slot_node: String,
    pub slot_hash: String,
    pub node_type: String,
    pub node_next: String,
}

impl Default for CuckooNames
{
    fn default() -> Self
    {
        Self {
            table_type: "cuckoo_hashtable".to_string(),
            buckets: "_buckets".to_string(),
            n_buckets: "_n_buckets".to_string(),
            n_entries: "_n_entries".to_string(),
            capacity: "_capacity".to_string(),
            in_use: "_inuse".to_string(),
            slots: "_slots".to_string(),
            slot_node: "_node".to_string(),
            slot_hash: "_hash".to_string(),
            node_type: "cuckoo_node".to_string(),
            node_next: "next".to_string(),
        }
    }
}

/// Resolved cuckoo table layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuckooLayout
{
    /// Bucket array pointer, relative to the table
    pub buckets: LinkDescriptor,
    /// Bucket count, relative to the table
    pub n_buckets: ScalarField,
    /// Stored entry count, relative to the table
    pub n_entries: Option<ScalarField>,
    /// Stored capacity, relative to the table
    pub capacity: Option<ScalarField>,
    pub bucket_size: u64,
    /// In-use flag, relative to a bucket
    pub in_use: ScalarField,
    /// Offset of the slot array inside a bucket
    pub slots_offset: u64,
    pub slot_size: u64,
    pub slots_per_bucket: u64,
    /// Chain head, relative to a slot
    pub slot_node: LinkDescriptor,
    /// Cached hash, relative to a slot
    pub slot_hash: ScalarField,
    /// Chain link, relative to a node
    pub node_next: LinkDescriptor,
}

/// Snapshot of a table header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuckooTable
{
    pub address: Address,
    pub buckets: Address,
    pub n_buckets: u64,
    pub n_entries: Option<u64>,
    pub capacity: Option<u64>,
}

impl CuckooTable
{
    /// Header of a table that does not exist (null table pointer).
    pub const fn empty(address: Address) -> Self
    {
        Self {
            address,
            buckets: Address::ZERO,
            n_buckets: 0,
            n_entries: None,
            capacity: None,
        }
    }
}

/// One chained node and the slot it was found through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuckooEntry
{
    pub node: Address,
    pub hash: u64,
    pub bucket: u64,
    pub slot: u64,
}

/// Outcome of comparing walked entries with the table's own count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCount
{
    Consistent(u64),
    /// Either a walker defect or a torn read of a table mutating underneath us
    Mismatch
    {
        expected: u64,
        observed: u64,
    },
}

fn optional_scalar(types: &dyn TypeResolver, type_name: &str, path: &str) -> WalkResult<Option<ScalarField>>
{
    match ScalarField::resolve(types, type_name, path) {
        Ok(field) => Ok(Some(field)),
        Err(WalkError::UnknownField { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

impl CuckooLayout
{
    /// Resolve the layout from type information.
    ///
    /// The bucket type is the pointee of the bucket array pointer, the slot
    /// type and slot count come from the bucket's inline slot array.
    pub fn resolve(types: &dyn TypeResolver, names: &CuckooNames) -> WalkResult<Self>
    {
        let buckets_field = types.resolve_path(&names.table_type, &names.buckets)?;
        let bucket_type = match &buckets_field.field.kind {
            FieldKind::Pointer { pointee: Some(pointee) } => pointee.clone(),
            other => {
                return Err(WalkError::TypeMismatch {
                    expected: format!("typed pointer at `{}.{}`", names.table_type, names.buckets),
                    found: other.describe(),
                })
            }
        };
        let bucket = types.resolve_type(&bucket_type)?;

        let slots_field = types.resolve_path(&bucket_type, &names.slots)?;
        let (slot_type, slot_size, slots_per_bucket) = match &slots_field.field.kind {
            FieldKind::Array {
                element,
                element_size,
                count,
            } => match element.as_ref() {
                FieldKind::Struct { type_name } => (type_name.clone(), *element_size, *count),
                other => {
                    return Err(WalkError::TypeMismatch {
                        expected: format!("array of slot structs at `{bucket_type}.{}`", names.slots),
                        found: format!("array of {}", other.describe()),
                    })
                }
            },
            other => {
                return Err(WalkError::TypeMismatch {
                    expected: format!("slot array at `{bucket_type}.{}`", names.slots),
                    found: other.describe(),
                })
            }
        };

        let layout = Self {
            buckets: LinkDescriptor::resolve(types, &names.table_type, &names.buckets)?,
            n_buckets: ScalarField::resolve(types, &names.table_type, &names.n_buckets)?,
            n_entries: optional_scalar(types, &names.table_type, &names.n_entries)?,
            capacity: optional_scalar(types, &names.table_type, &names.capacity)?,
            bucket_size: bucket.size,
            in_use: ScalarField::resolve(types, &bucket_type, &names.in_use)?,
            slots_offset: slots_field.offset,
            slot_size,
            slots_per_bucket,
            slot_node: LinkDescriptor::resolve(types, &slot_type, &names.slot_node)?,
            slot_hash: ScalarField::resolve(types, &slot_type, &names.slot_hash)?,
            node_next: LinkDescriptor::resolve(types, &names.node_type, &names.node_next)?,
        };
        debug!(
            bucket_type = %bucket_type,
            slot_type = %slot_type,
            slots_per_bucket,
            "resolved cuckoo layout"
        );
        Ok(layout)
    }

    /// Read the table header.
    pub fn read_table(&self, memory: &dyn MemoryAccessor, table: Address) -> WalkResult<CuckooTable>
    {
        let read_optional = |field: Option<ScalarField>| -> WalkResult<Option<u64>> {
            field.map(|field| field.read(memory, table).map(Scalar::as_u64)).transpose()
        };

        Ok(CuckooTable {
            address: table,
            buckets: self.buckets.read(memory, table)?,
            n_buckets: self.n_buckets.read(memory, table)?.as_u64(),
            n_entries: read_optional(self.n_entries)?,
            capacity: read_optional(self.capacity)?,
        })
    }

    /// Lazy walk over every chained node of `table`.
    pub fn iter<'a>(&self, memory: &'a dyn MemoryAccessor, table: &CuckooTable) -> CuckooWalker<'a>
    {
        CuckooWalker::new(memory, *self, table.buckets, table.n_buckets)
    }
}

/// Lazy bucket → slot → chain enumeration
///
/// Buckets whose in-use flag is clear contribute nothing, even if stale slot
/// data remains underneath. Every populated slot's chain is followed to its
/// null terminator; each node is yielded with the slot's hash.
pub struct CuckooWalker<'a>
{
    memory: &'a dyn MemoryAccessor,
    layout: CuckooLayout,
    buckets: Address,
    n_buckets: u64,
    bucket: u64,
    slot: u64,
    bucket_checked: bool,
    chain: Option<CuckooEntry>,
    budget: NodeBudget,
    done: bool,
}

impl<'a> CuckooWalker<'a>
{
    pub fn new(memory: &'a dyn MemoryAccessor, layout: CuckooLayout, buckets: Address, n_buckets: u64) -> Self
    {
        Self {
            memory,
            layout,
            buckets,
            n_buckets,
            bucket: 0,
            slot: 0,
            bucket_checked: false,
            chain: None,
            budget: NodeBudget::unlimited(),
            done: buckets.is_null(),
        }
    }

    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: Option<usize>) -> Self
    {
        self.budget = NodeBudget::new(max_nodes);
        self
    }

    fn fail(&mut self, err: WalkError) -> Option<WalkResult<CuckooEntry>>
    {
        self.done = true;
        self.chain = None;
        Some(Err(err))
    }

    fn emit(&mut self, entry: CuckooEntry) -> Option<WalkResult<CuckooEntry>>
    {
        if let Err(err) = self.budget.charge(entry.node) {
            return self.fail(err);
        }
        trace!(node = %entry.node, hash = entry.hash, bucket = entry.bucket, slot = entry.slot, "cuckoo node");
        self.chain = Some(entry);
        Some(Ok(entry))
    }
}

impl Iterator for CuckooWalker<'_>
{
    type Item = WalkResult<CuckooEntry>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done {
            return None;
        }

        if let Some(previous) = self.chain.take() {
            match self.layout.node_next.read(self.memory, previous.node) {
                Ok(next) if !next.is_null() => return self.emit(CuckooEntry { node: next, ..previous }),
                Ok(_) => {}
                Err(err) => return self.fail(err),
            }
        }

        loop {
            if self.bucket >= self.n_buckets {
                self.done = true;
                return None;
            }
            let bucket_addr = self.buckets + self.bucket.wrapping_mul(self.layout.bucket_size);

            if !self.bucket_checked {
                match self.layout.in_use.read(self.memory, bucket_addr) {
                    Ok(flag) if flag.is_zero() => {
                        self.bucket += 1;
                        continue;
                    }
                    Ok(_) => self.bucket_checked = true,
                    Err(err) => return self.fail(err),
                }
            }

            if self.slot >= self.layout.slots_per_bucket {
                self.bucket += 1;
                self.slot = 0;
                self.bucket_checked = false;
                continue;
            }

            let slot = self.slot;
            self.slot += 1;
            let slot_addr = bucket_addr + self.layout.slots_offset + slot.wrapping_mul(self.layout.slot_size);

            let node = match self.layout.slot_node.read(self.memory, slot_addr) {
                Ok(node) if node.is_null() => continue,
                Ok(node) => node,
                Err(err) => return self.fail(err),
            };
            let hash = match self.layout.slot_hash.read(self.memory, slot_addr) {
                Ok(hash) => hash.as_u64(),
                Err(err) => return self.fail(err),
            };
            return self.emit(CuckooEntry {
                node,
                hash,
                bucket: self.bucket,
                slot,
            });
        }
    }
}

impl FusedIterator for CuckooWalker<'_> {}

/// Compare the number of walked entries with the table's stored count.
///
/// A mismatch is logged, never raised: the walker cannot tell corruption from
/// a concurrent update it happened to observe half-way.
pub fn verify_entry_count(table: Address, expected: u64, observed: u64) -> EntryCount
{
    if expected == observed {
        EntryCount::Consistent(observed)
    } else {
        warn!(
            table = %table,
            expected,
            observed,
            "cuckoo table entry count mismatch (corruption or concurrent update)"
        );
        EntryCount::Mismatch { expected, observed }
    }
}
