//! Slab allocator and memory region walkers.
//!
//! A slab cache keeps its slabs on two tail queues (partially used and
//! completely free) and tracks allocated buffers in a hash index keyed by
//! buffer address. Each slab carries a singly linked list of its free buffer
//! controls. A memory region has the same two-level shape with segments in
//! place of slabs and buffer controls.

use std::collections::BTreeSet;
use std::iter::FusedIterator;

use tracing::{debug, warn};

use super::hash_index::{BucketCount, HashIndexItem, HashIndexLayout, HashIndexNames, HashIndexWalker};
use super::list::ListWalker;
use super::tailq::{QueueKind, QueueLayout};
use crate::error::{WalkError, WalkResult};
use crate::layout::TypeResolver;
use crate::memory::MemoryAccessor;
use crate::types::Address;

/// Member names used to resolve a [`SlabCacheLayout`]
///
/// Defaults match the xnu skywalk `skmem_cache`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabCacheNames
{
    pub cache_type: String,
    pub partial: String,
    pub empty: String,
    pub slab_type: String,
    pub slab_link: String,
    pub slab_free: String,
    pub bufctl_type: String,
    pub bufctl_link: String,
    pub hash_mask: String,
    pub hash_table: String,
    pub bucket_head: String,
}

impl Default for SlabCacheNames
{
    fn default() -> Self
    {
        Self {
            cache_type: "skmem_cache".to_string(),
            partial: "skm_sl_partial".to_string(),
            empty: "skm_sl_empty".to_string(),
            slab_type: "skmem_slab".to_string(),
            slab_link: "sl_link".to_string(),
            slab_free: "sl_head".to_string(),
            bufctl_type: "skmem_bufctl".to_string(),
            bufctl_link: "bc_link".to_string(),
            hash_mask: "skm_hash_mask".to_string(),
            hash_table: "skm_hash_table".to_string(),
            bucket_head: "bcb_head".to_string(),
        }
    }
}

/// Resolved slab cache layout; every queue is relative to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabCacheLayout
{
    pub partial: QueueLayout,
    pub empty: QueueLayout,
    /// Free buffer controls, relative to a slab
    pub free: QueueLayout,
    pub allocated: HashIndexLayout,
}

impl SlabCacheLayout
{
    pub fn resolve(types: &dyn TypeResolver, names: &SlabCacheNames) -> WalkResult<Self>
    {
        let slabs = |member: &str| {
            QueueLayout::resolve_member(
                types,
                QueueKind::Tailq,
                &names.cache_type,
                member,
                &names.slab_type,
                &names.slab_link,
            )
        };
        let layout = Self {
            partial: slabs(&names.partial)?,
            empty: slabs(&names.empty)?,
            free: QueueLayout::resolve_member(
                types,
                QueueKind::Slist,
                &names.slab_type,
                &names.slab_free,
                &names.bufctl_type,
                &names.bufctl_link,
            )?,
            allocated: HashIndexLayout::resolve(
                types,
                &HashIndexNames {
                    owner_type: &names.cache_type,
                    buckets: BucketCount::Mask(&names.hash_mask),
                    table: &names.hash_table,
                    bucket_head: &names.bucket_head,
                    chain: QueueKind::Slist,
                    elem_type: &names.bufctl_type,
                    link_field: &names.bufctl_link,
                },
            )?,
        };
        debug!(cache_type = %names.cache_type, "resolved slab cache layout");
        Ok(layout)
    }

    pub fn iter<'a>(&self, memory: &'a dyn MemoryAccessor, cache: Address) -> SlabCacheWalker<'a>
    {
        SlabCacheWalker::new(memory, *self, cache)
    }
}

/// Which slab queue a slab came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlabList
{
    Partial,
    Empty,
}

/// One step of a slab cache walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheItem
{
    Slab
    {
        list: SlabList,
        slab: Address,
    },
    /// Free buffer control of the slab yielded just before
    FreeBufctl
    {
        slab: Address,
        bufctl: Address,
    },
    /// Allocated-index bucket, yielded before its chain
    Bucket
    {
        index: u64,
        address: Address,
    },
    AllocatedBufctl
    {
        bucket: u64,
        bufctl: Address,
    },
}

impl CacheItem
{
    /// Address of the object this item describes.
    pub const fn address(&self) -> Address
    {
        match *self {
            CacheItem::Slab { slab, .. } => slab,
            CacheItem::FreeBufctl { bufctl, .. } | CacheItem::AllocatedBufctl { bufctl, .. } => bufctl,
            CacheItem::Bucket { address, .. } => address,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase
{
    Slabs(SlabList),
    Allocated,
}

/// Lazy walk of a slab cache
///
/// Order: partial slabs (each followed by its free buffer controls), empty
/// slabs (same), then every bucket of the allocated index followed by its
/// chain. The node budget applies to each queue and to the index separately.
/// A null cache yields nothing.
pub struct SlabCacheWalker<'a>
{
    memory: &'a dyn MemoryAccessor,
    layout: SlabCacheLayout,
    cache: Address,
    phase: Phase,
    slabs: Option<ListWalker<'a>>,
    free: Option<(Address, ListWalker<'a>)>,
    allocated: Option<HashIndexWalker<'a>>,
    max_nodes: Option<usize>,
    done: bool,
}

impl<'a> SlabCacheWalker<'a>
{
    pub fn new(memory: &'a dyn MemoryAccessor, layout: SlabCacheLayout, cache: Address) -> Self
    {
        Self {
            memory,
            layout,
            cache,
            phase: Phase::Slabs(SlabList::Partial),
            slabs: None,
            free: None,
            allocated: None,
            max_nodes: None,
            done: cache.is_null(),
        }
    }

    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: Option<usize>) -> Self
    {
        self.max_nodes = max_nodes;
        self
    }

    fn fail(&mut self, err: WalkError) -> Option<WalkResult<CacheItem>>
    {
        self.done = true;
        self.slabs = None;
        self.free = None;
        self.allocated = None;
        Some(Err(err))
    }

    fn queue(&self, list: SlabList) -> QueueLayout
    {
        match list {
            SlabList::Partial => self.layout.partial,
            SlabList::Empty => self.layout.empty,
        }
    }
}

impl Iterator for SlabCacheWalker<'_>
{
    type Item = WalkResult<CacheItem>;

    fn next(&mut self) -> Option<Self::Item>
    {
        loop {
            if self.done {
                return None;
            }

            if let Some((slab, free)) = self.free.as_mut() {
                let slab = *slab;
                match free.next() {
                    Some(Ok(bufctl)) => return Some(Ok(CacheItem::FreeBufctl { slab, bufctl })),
                    Some(Err(err)) => return self.fail(err),
                    None => self.free = None,
                }
            }

            match self.phase {
                Phase::Slabs(list) => {
                    if self.slabs.is_none() {
                        let walker = self.queue(list).iter(self.memory, self.cache).with_max_nodes(self.max_nodes);
                        self.slabs = Some(walker);
                    }
                    let next = self.slabs.as_mut().and_then(|walker| walker.next());
                    match next {
                        Some(Ok(slab)) => {
                            let free = self.layout.free.iter(self.memory, slab).with_max_nodes(self.max_nodes);
                            self.free = Some((slab, free));
                            return Some(Ok(CacheItem::Slab { list, slab }));
                        }
                        Some(Err(err)) => return self.fail(err),
                        None => {
                            self.slabs = None;
                            self.phase = match list {
                                SlabList::Partial => Phase::Slabs(SlabList::Empty),
                                SlabList::Empty => Phase::Allocated,
                            };
                        }
                    }
                }
                Phase::Allocated => {
                    if self.allocated.is_none() {
                        match self.layout.allocated.iter(self.memory, self.cache) {
                            Ok(walker) => self.allocated = Some(walker.with_max_nodes(self.max_nodes)),
                            Err(err) => return self.fail(err),
                        }
                    }
                    let next = self.allocated.as_mut().and_then(|walker| walker.next());
                    return match next {
                        Some(Ok(HashIndexItem::Bucket { index, address })) => Some(Ok(CacheItem::Bucket { index, address })),
                        Some(Ok(HashIndexItem::Entry { bucket, address })) => {
                            Some(Ok(CacheItem::AllocatedBufctl { bucket, bufctl: address }))
                        }
                        Some(Err(err)) => self.fail(err),
                        None => {
                            self.done = true;
                            None
                        }
                    };
                }
            }
        }
    }
}

impl FusedIterator for SlabCacheWalker<'_> {}

/// Buffer controls seen both on a free list and in the allocated index
///
/// Consumes the whole walk. A healthy cache reports nothing; a hit means the
/// cache is corrupt or changed while it was read, so it is logged and
/// returned rather than raised.
pub fn free_allocated_overlap<I>(items: I) -> WalkResult<Vec<Address>>
where
    I: IntoIterator<Item = WalkResult<CacheItem>>,
{
    let mut free = BTreeSet::new();
    let mut allocated = BTreeSet::new();
    for item in items {
        match item? {
            CacheItem::FreeBufctl { bufctl, .. } => {
                free.insert(bufctl);
            }
            CacheItem::AllocatedBufctl { bufctl, .. } => {
                allocated.insert(bufctl);
            }
            CacheItem::Slab { .. } | CacheItem::Bucket { .. } => {}
        }
    }
    let overlap: Vec<Address> = free.intersection(&allocated).copied().collect();
    if !overlap.is_empty() {
        warn!(count = overlap.len(), first = %overlap[0], "buffer controls both free and allocated");
    }
    Ok(overlap)
}

/// Member names used to resolve a [`SkmemRegionLayout`]
///
/// Defaults match the xnu skywalk `skmem_region`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkmemRegionNames
{
    pub region_type: String,
    pub free: String,
    pub segment_type: String,
    pub segment_link: String,
    pub hash_mask: String,
    pub hash_table: String,
    pub bucket_head: String,
}

impl Default for SkmemRegionNames
{
    fn default() -> Self
    {
        Self {
            region_type: "skmem_region".to_string(),
            free: "skr_seg_free".to_string(),
            segment_type: "skmem_seg".to_string(),
            segment_link: "sg_link".to_string(),
            hash_mask: "skr_hash_mask".to_string(),
            hash_table: "skr_hash_table".to_string(),
            bucket_head: "sgb_head".to_string(),
        }
    }
}

/// Resolved region layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkmemRegionLayout
{
    /// Free segments, relative to the region
    pub free: QueueLayout,
    pub allocated: HashIndexLayout,
}

impl SkmemRegionLayout
{
    pub fn resolve(types: &dyn TypeResolver, names: &SkmemRegionNames) -> WalkResult<Self>
    {
        Ok(Self {
            free: QueueLayout::resolve_member(
                types,
                QueueKind::Tailq,
                &names.region_type,
                &names.free,
                &names.segment_type,
                &names.segment_link,
            )?,
            allocated: HashIndexLayout::resolve(
                types,
                &HashIndexNames {
                    owner_type: &names.region_type,
                    buckets: BucketCount::Mask(&names.hash_mask),
                    table: &names.hash_table,
                    bucket_head: &names.bucket_head,
                    chain: QueueKind::Tailq,
                    elem_type: &names.segment_type,
                    link_field: &names.segment_link,
                },
            )?,
        })
    }

    pub fn iter<'a>(&self, memory: &'a dyn MemoryAccessor, region: Address) -> SkmemRegionWalker<'a>
    {
        SkmemRegionWalker::new(memory, *self, region)
    }
}

/// One step of a region walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionItem
{
    FreeSegment(Address),
    Bucket
    {
        index: u64,
        address: Address,
    },
    AllocatedSegment
    {
        bucket: u64,
        segment: Address,
    },
}

impl RegionItem
{
    pub const fn address(&self) -> Address
    {
        match *self {
            RegionItem::FreeSegment(segment) | RegionItem::AllocatedSegment { segment, .. } => segment,
            RegionItem::Bucket { address, .. } => address,
        }
    }
}

/// Lazy walk of a region: free segments, then the allocated index.
///
/// A null region yields nothing.
pub struct SkmemRegionWalker<'a>
{
    memory: &'a dyn MemoryAccessor,
    layout: SkmemRegionLayout,
    region: Address,
    free: Option<ListWalker<'a>>,
    allocated: Option<HashIndexWalker<'a>>,
    max_nodes: Option<usize>,
    done: bool,
}

impl<'a> SkmemRegionWalker<'a>
{
    pub fn new(memory: &'a dyn MemoryAccessor, layout: SkmemRegionLayout, region: Address) -> Self
    {
        Self {
            memory,
            layout,
            region,
            free: Some(layout.free.iter(memory, region)),
            allocated: None,
            max_nodes: None,
            done: region.is_null(),
        }
    }

    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: Option<usize>) -> Self
    {
        self.max_nodes = max_nodes;
        self.free = self.free.map(|free| free.with_max_nodes(max_nodes));
        self
    }

    fn fail(&mut self, err: WalkError) -> Option<WalkResult<RegionItem>>
    {
        self.done = true;
        self.free = None;
        self.allocated = None;
        Some(Err(err))
    }
}

impl Iterator for SkmemRegionWalker<'_>
{
    type Item = WalkResult<RegionItem>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done {
            return None;
        }

        if let Some(free) = self.free.as_mut() {
            match free.next() {
                Some(Ok(segment)) => return Some(Ok(RegionItem::FreeSegment(segment))),
                Some(Err(err)) => return self.fail(err),
                None => self.free = None,
            }
        }

        if self.allocated.is_none() {
            match self.layout.allocated.iter(self.memory, self.region) {
                Ok(walker) => self.allocated = Some(walker.with_max_nodes(self.max_nodes)),
                Err(err) => return self.fail(err),
            }
        }

        match self.allocated.as_mut().and_then(|walker| walker.next()) {
            Some(Ok(HashIndexItem::Bucket { index, address })) => Some(Ok(RegionItem::Bucket { index, address })),
            Some(Ok(HashIndexItem::Entry { bucket, address })) => Some(Ok(RegionItem::AllocatedSegment {
                bucket,
                segment: address,
            })),
            Some(Err(err)) => self.fail(err),
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl FusedIterator for SkmemRegionWalker<'_> {}
