//! Read-through page cache for slow accessors.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use super::{MemoryAccessor, PointerWidth};
use crate::error::{WalkError, WalkResult};
use crate::types::Address;

const DEFAULT_PAGE_SIZE: usize = 4096;

fn page_align_down(value: u64, page_size: usize) -> u64
{
    let mask = !(page_size as u64 - 1);
    value & mask
}

/// Page cache in front of another accessor.
///
/// Walking a list reads a handful of bytes per node, usually from the same few
/// pages. Against a live process every read is a syscall, so pages are fetched
/// once and served from here afterwards.
///
/// A live target keeps mutating, so a cache should live for a single query.
/// Use [`CachedMemory::clear`] or drop it between queries.
pub struct CachedMemory<M>
{
    inner: M,
    page_size: usize,
    pages: RwLock<HashMap<u64, Arc<Vec<u8>>>>,
}

impl<M: MemoryAccessor> CachedMemory<M>
{
    /// Wrap `inner` with a 4 KiB page cache.
    pub fn new(inner: M) -> Self
    {
        Self::with_page_size(inner, DEFAULT_PAGE_SIZE)
    }

    /// Wrap `inner` with a custom page size (rounded up to a power of two, at least 64 bytes).
    pub fn with_page_size(inner: M, page_size: usize) -> Self
    {
        let size = page_size.max(64).next_power_of_two();
        Self {
            inner,
            page_size: size,
            pages: RwLock::new(HashMap::new()),
        }
    }

    pub fn page_size(&self) -> usize
    {
        self.page_size
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize
    {
        self.pages.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Clears all cached pages.
    pub fn clear(&self)
    {
        self.pages.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Invalidates any cached pages overlapping the provided range.
    pub fn invalidate_range(&self, addr: Address, len: usize)
    {
        if len == 0 {
            return;
        }
        let start = addr.value();
        let end = start.saturating_add(len as u64);
        let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
        let page_size = self.page_size as u64;
        let mut base = page_align_down(start, self.page_size);
        while base < end {
            pages.remove(&base);
            base = match base.checked_add(page_size) {
                Some(next) => next,
                None => break,
            };
        }
    }

    fn fetch_page(&self, base: u64) -> WalkResult<Arc<Vec<u8>>>
    {
        if let Some(existing) = self.pages.read().unwrap_or_else(PoisonError::into_inner).get(&base) {
            return Ok(existing.clone());
        }

        let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = pages.get(&base) {
            return Ok(existing.clone());
        }

        trace!(page = %Address::new(base), "fetching page");
        let data = self.inner.read(Address::new(base), self.page_size)?;
        let arc = Arc::new(data);
        pages.insert(base, arc.clone());
        Ok(arc)
    }
}

impl<M: MemoryAccessor> MemoryAccessor for CachedMemory<M>
{
    fn read(&self, addr: Address, len: usize) -> WalkResult<Vec<u8>>
    {
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut output = Vec::with_capacity(len);
        while output.len() < len {
            let absolute = addr.value().wrapping_add(output.len() as u64);
            let page_base = page_align_down(absolute, self.page_size);
            let page_offset = usize::try_from(absolute - page_base).unwrap_or(0);
            let chunk = (len - output.len()).min(self.page_size - page_offset);

            match self.fetch_page(page_base) {
                Ok(page) if page_offset + chunk <= page.len() => {
                    output.extend_from_slice(&page[page_offset..page_offset + chunk]);
                }
                _ => {
                    // Page not readable as a whole; the range itself may still be.
                    let bytes = match self.inner.read(Address::new(absolute), len - output.len()) {
                        Ok(bytes) => bytes,
                        Err(WalkError::UnmappedMemory { .. }) if !output.is_empty() => {
                            return Err(WalkError::OutOfRange { address: addr, len });
                        }
                        Err(err) => return Err(err),
                    };
                    output.extend_from_slice(&bytes);
                }
            }
        }

        Ok(output)
    }

    fn pointer_width(&self) -> PointerWidth
    {
        self.inner.pointer_width()
    }
}
