//! In-memory target image.

use std::collections::BTreeMap;

use super::{MemoryAccessor, PointerWidth};
use crate::error::{WalkError, WalkResult};
use crate::types::Address;

/// A target address space held in host memory
///
/// The image is a set of non-overlapping mapped regions keyed by start
/// address. It backs core-file snapshots, raw dumps and test fixtures.
///
/// Reads may span adjacent regions. A read whose first byte is unmapped fails
/// with `UnmappedMemory`; a read that starts mapped but reaches a hole fails
/// with `OutOfRange`.
///
/// The `store_*` helpers exist for building images. They are not part of
/// [`MemoryAccessor`], so walkers can never reach them.
#[derive(Debug, Clone, Default)]
pub struct SparseMemory
{
    regions: BTreeMap<u64, Vec<u8>>,
    pointer_width: PointerWidth,
}

impl SparseMemory
{
    /// Create an empty image with 64-bit pointers.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Create an empty image with the given pointer width.
    #[must_use]
    pub fn with_pointer_width(pointer_width: PointerWidth) -> Self
    {
        Self {
            regions: BTreeMap::new(),
            pointer_width,
        }
    }

    /// Map `bytes` at `start`.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` if the region is empty, wraps the address space, or
    /// overlaps an existing region.
    pub fn map(&mut self, start: Address, bytes: Vec<u8>) -> WalkResult<()>
    {
        if bytes.is_empty() {
            return Ok(());
        }
        let begin = start.value();
        let end = begin
            .checked_add(bytes.len() as u64)
            .ok_or_else(|| WalkError::InvalidArgument(format!("region at {start} wraps the address space")))?;

        if let Some((&prev_start, prev)) = self.regions.range(..end).next_back() {
            let prev_end = prev_start + prev.len() as u64;
            if prev_end > begin {
                return Err(WalkError::InvalidArgument(format!(
                    "region {start}+{:#x} overlaps region {}",
                    bytes.len(),
                    Address::new(prev_start)
                )));
            }
        }

        self.regions.insert(begin, bytes);
        Ok(())
    }

    /// Map `len` zero bytes at `start`.
    pub fn map_zeroed(&mut self, start: Address, len: usize) -> WalkResult<()>
    {
        self.map(start, vec![0u8; len])
    }

    /// Number of mapped regions.
    pub fn region_count(&self) -> usize
    {
        self.regions.len()
    }

    /// Total number of mapped bytes.
    pub fn mapped_bytes(&self) -> u64
    {
        self.regions.values().map(|bytes| bytes.len() as u64).sum()
    }

    /// Overwrite bytes inside already-mapped regions.
    pub fn store_bytes(&mut self, addr: Address, data: &[u8]) -> WalkResult<()>
    {
        let mut copied = 0usize;
        while copied < data.len() {
            let cursor = addr.value() + copied as u64;
            let Some((&start, region)) = self.regions.range_mut(..=cursor).next_back() else {
                return Err(WalkError::UnmappedMemory {
                    address: Address::new(cursor),
                    len: data.len() - copied,
                });
            };
            let offset = usize::try_from(cursor - start).unwrap_or(usize::MAX);
            if offset >= region.len() {
                return Err(WalkError::UnmappedMemory {
                    address: Address::new(cursor),
                    len: data.len() - copied,
                });
            }
            let chunk = (region.len() - offset).min(data.len() - copied);
            region[offset..offset + chunk].copy_from_slice(&data[copied..copied + chunk]);
            copied += chunk;
        }
        Ok(())
    }

    pub fn store_u16(&mut self, addr: Address, value: u16) -> WalkResult<()>
    {
        self.store_bytes(addr, &value.to_le_bytes())
    }

    pub fn store_u32(&mut self, addr: Address, value: u32) -> WalkResult<()>
    {
        self.store_bytes(addr, &value.to_le_bytes())
    }

    pub fn store_u64(&mut self, addr: Address, value: u64) -> WalkResult<()>
    {
        self.store_bytes(addr, &value.to_le_bytes())
    }

    /// Store a pointer using the image's pointer width.
    #[allow(clippy::cast_possible_truncation)]
    pub fn store_pointer(&mut self, addr: Address, value: Address) -> WalkResult<()>
    {
        match self.pointer_width {
            PointerWidth::Bits32 => self.store_u32(addr, value.value() as u32),
            PointerWidth::Bits64 => self.store_u64(addr, value.value()),
        }
    }
}

impl MemoryAccessor for SparseMemory
{
    fn read(&self, addr: Address, len: usize) -> WalkResult<Vec<u8>>
    {
        let mut output = Vec::with_capacity(len);
        while output.len() < len {
            let cursor = addr.value().wrapping_add(output.len() as u64);
            let region = self
                .regions
                .range(..=cursor)
                .next_back()
                .filter(|(start, bytes)| cursor - **start < bytes.len() as u64);

            let Some((&start, bytes)) = region else {
                if output.is_empty() {
                    return Err(WalkError::UnmappedMemory { address: addr, len });
                }
                return Err(WalkError::OutOfRange { address: addr, len });
            };

            let offset = usize::try_from(cursor - start).unwrap_or(usize::MAX);
            let chunk = (bytes.len() - offset).min(len - output.len());
            output.extend_from_slice(&bytes[offset..offset + chunk]);
        }
        Ok(output)
    }

    fn pointer_width(&self) -> PointerWidth
    {
        self.pointer_width
    }
}
