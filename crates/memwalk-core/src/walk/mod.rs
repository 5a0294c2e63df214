//! # Collection Walkers
//!
//! Lazy, fused iterators over the intrusive containers found in kernel-style
//! C code. Every walker:
//!
//! - works on node addresses and [`LinkDescriptor`]s resolved once up front
//! - reads at most what it needs to produce the next item
//! - yields a failed read once as `Err` and then stops
//! - charges each visit to a [`NodeBudget`], so a cyclic structure ends in
//!   `MalformedStructure` rather than an endless walk
//!
//! Walkers never write to the target and never modify what they traverse.

pub mod cuckoo;
pub mod hash_index;
pub mod link;
pub mod list;
pub mod rbtree;
pub mod slab;
pub mod tailq;

pub use cuckoo::{verify_entry_count, CuckooEntry, CuckooLayout, CuckooNames, CuckooTable, CuckooWalker, EntryCount};
pub use hash_index::{BucketCount, HashIndexItem, HashIndexLayout, HashIndexNames, HashIndexWalker};
pub use link::{LinkDescriptor, NodeBudget, ScalarField};
pub use list::ListWalker;
pub use rbtree::{RbTreeLayout, RbTreeWalker};
pub use slab::{
    free_allocated_overlap, CacheItem, RegionItem, SkmemRegionLayout, SkmemRegionNames, SkmemRegionWalker,
    SlabCacheLayout, SlabCacheNames, SlabCacheWalker, SlabList,
};
pub use tailq::{QueueHead, QueueKind, QueueLayout, TailConvention};
