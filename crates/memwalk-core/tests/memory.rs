//! Tests for memory accessors

use memwalk_core::error::WalkError;
use memwalk_core::memory::{CachedMemory, MemoryAccessor, PointerWidth, Scalar, SparseMemory};
use memwalk_core::types::Address;

fn addr(value: u64) -> Address
{
    Address::new(value)
}

#[test]
fn test_sparse_read_within_region()
{
    let mut image = SparseMemory::new();
    image.map(addr(0x1000), (0u8..16).collect()).unwrap();

    assert_eq!(image.read(addr(0x1004), 4).unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(image.region_count(), 1);
    assert_eq!(image.mapped_bytes(), 16);
}

#[test]
fn test_sparse_read_spans_adjacent_regions()
{
    let mut image = SparseMemory::new();
    image.map(addr(0x1000), vec![1; 8]).unwrap();
    image.map(addr(0x1008), vec![2; 8]).unwrap();

    assert_eq!(image.read(addr(0x1006), 4).unwrap(), vec![1, 1, 2, 2]);
}

#[test]
fn test_sparse_unmapped_start()
{
    let mut image = SparseMemory::new();
    image.map_zeroed(addr(0x1000), 8).unwrap();

    match image.read(addr(0x2000), 8) {
        Err(WalkError::UnmappedMemory { address, len }) => {
            assert_eq!(address, addr(0x2000));
            assert_eq!(len, 8);
        }
        other => panic!("expected UnmappedMemory, got {other:?}"),
    }
}

#[test]
fn test_sparse_read_past_end_is_out_of_range()
{
    let mut image = SparseMemory::new();
    image.map_zeroed(addr(0x1000), 8).unwrap();

    assert!(matches!(
        image.read(addr(0x1004), 8),
        Err(WalkError::OutOfRange { address, len: 8 }) if address == addr(0x1004)
    ));
}

#[test]
fn test_sparse_rejects_overlap()
{
    let mut image = SparseMemory::new();
    image.map_zeroed(addr(0x1000), 0x100).unwrap();

    assert!(matches!(image.map_zeroed(addr(0x10f8), 16), Err(WalkError::InvalidArgument(_))));
    assert!(matches!(image.map_zeroed(addr(0x0ff8), 16), Err(WalkError::InvalidArgument(_))));
    assert!(image.map_zeroed(addr(0x1100), 16).is_ok());
}

#[test]
fn test_store_outside_mapping_fails()
{
    let mut image = SparseMemory::new();
    image.map_zeroed(addr(0x1000), 8).unwrap();

    assert!(matches!(image.store_u64(addr(0x1004), 1), Err(WalkError::UnmappedMemory { .. })));
}

#[test]
fn test_scalar_widths_and_sign_extension()
{
    let mut image = SparseMemory::new();
    image.map(addr(0x1000), vec![0xff, 0xff, 0xff, 0xff, 0x78, 0x56, 0x34, 0x12]).unwrap();

    assert_eq!(image.read_unsigned(addr(0x1000), 1).unwrap(), 0xff);
    assert_eq!(image.read_signed(addr(0x1000), 1).unwrap(), -1);
    assert_eq!(image.read_signed(addr(0x1000), 4).unwrap(), -1);
    assert_eq!(image.read_unsigned(addr(0x1004), 4).unwrap(), 0x1234_5678);
    assert_eq!(image.read_scalar(addr(0x1004), 2, false).unwrap(), Scalar::Unsigned(0x5678));
}

#[test]
fn test_unaligned_reads_decode()
{
    let mut image = SparseMemory::new();
    image.map_zeroed(addr(0x1000), 32).unwrap();
    image.store_u64(addr(0x1003), 0x0102_0304_0506_0708).unwrap();

    assert_eq!(image.read_unsigned(addr(0x1003), 8).unwrap(), 0x0102_0304_0506_0708);
}

#[test]
fn test_invalid_scalar_width()
{
    let mut image = SparseMemory::new();
    image.map_zeroed(addr(0x1000), 8).unwrap();

    assert!(matches!(image.read_scalar(addr(0x1000), 3, false), Err(WalkError::InvalidArgument(_))));
}

#[test]
fn test_pointer_width_32()
{
    let mut image = SparseMemory::with_pointer_width(PointerWidth::Bits32);
    image.map_zeroed(addr(0x1000), 8).unwrap();
    image.store_pointer(addr(0x1000), addr(0xdead_beef)).unwrap();
    image.store_u32(addr(0x1004), 0xffff_ffff).unwrap();

    assert_eq!(image.pointer_width(), PointerWidth::Bits32);
    assert_eq!(image.read_pointer(addr(0x1000)).unwrap(), addr(0xdead_beef));
}

#[test]
fn test_accessor_through_reference_and_box()
{
    let mut image = SparseMemory::new();
    image.map_zeroed(addr(0x1000), 8).unwrap();
    image.store_u64(addr(0x1000), 42).unwrap();

    let by_ref: &dyn MemoryAccessor = &image;
    assert_eq!(by_ref.read_unsigned(addr(0x1000), 8).unwrap(), 42);

    let boxed: Box<dyn MemoryAccessor> = Box::new(image.clone());
    assert_eq!(boxed.read_unsigned(addr(0x1000), 8).unwrap(), 42);
}

fn patterned_image() -> SparseMemory
{
    let mut image = SparseMemory::new();
    let bytes: Vec<u8> = (0..0x2000u32).map(|i| (i % 251) as u8).collect();
    image.map(addr(0x10000), bytes).unwrap();
    image
}

#[test]
fn test_cache_serves_repeated_reads()
{
    let image = patterned_image();
    let direct = image.read(addr(0x10ffc), 8).unwrap();
    let cache = CachedMemory::new(image);

    assert_eq!(cache.read(addr(0x10ffc), 8).unwrap(), direct);
    // The read straddles two pages.
    assert_eq!(cache.cached_pages(), 2);
    assert_eq!(cache.read(addr(0x10ffc), 8).unwrap(), direct);
    assert_eq!(cache.cached_pages(), 2);
}

#[test]
fn test_cache_invalidate_and_clear()
{
    let cache = CachedMemory::with_page_size(patterned_image(), 1000);
    assert_eq!(cache.page_size(), 1024);

    cache.read(addr(0x10000), 4).unwrap();
    cache.read(addr(0x10800), 4).unwrap();
    assert_eq!(cache.cached_pages(), 2);

    cache.invalidate_range(addr(0x10810), 4);
    assert_eq!(cache.cached_pages(), 1);

    cache.clear();
    assert_eq!(cache.cached_pages(), 0);
}

#[test]
fn test_cache_falls_back_when_page_is_partial()
{
    let mut image = SparseMemory::new();
    image.map(addr(0x1100), vec![7; 16]).unwrap();
    let cache = CachedMemory::new(image);

    // The surrounding page is not fully mapped, the range still is.
    assert_eq!(cache.read(addr(0x1100), 16).unwrap(), vec![7; 16]);
    assert_eq!(cache.cached_pages(), 0);
    assert!(matches!(cache.read(addr(0x3000), 8), Err(WalkError::UnmappedMemory { .. })));
}

#[cfg(target_os = "linux")]
#[test]
fn test_process_memory_reads_own_pid()
{
    use memwalk_core::memory::ProcessMemory;

    let value: u64 = 0x1122_3344_5566_7788;
    let memory = ProcessMemory::open(std::process::id()).unwrap();
    let address = addr(std::ptr::addr_of!(value) as u64);

    assert_eq!(memory.read_pointer(address).unwrap(), addr(value));
    assert_eq!(memory.pid(), std::process::id());
    assert!(matches!(memory.read(addr(0), 8), Err(WalkError::UnmappedMemory { .. })));
}
