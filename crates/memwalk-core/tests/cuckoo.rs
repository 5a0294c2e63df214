//! Tests for the cuckoo hash table walker

mod common;

use common::{addr, cuckoo, register_cuckoo_types, Fixture};
use memwalk_core::error::WalkError;
use memwalk_core::walk::{verify_entry_count, CuckooLayout, CuckooNames, EntryCount};
use memwalk_core::WalkConfig;

const TABLE: u64 = 0x100;
const BUCKETS: u64 = 0x1000;
const NODE_A: u64 = 0x2000;
const NODE_B: u64 = 0x3000;
const NODE_C: u64 = 0x4000;

fn slot(bucket: u64, slot: u64) -> u64
{
    BUCKETS + bucket * cuckoo::BUCKET_SIZE + slot * cuckoo::SLOT_SIZE
}

/// Two buckets of two slots. Bucket 0 is in use with A -> B chained in slot 0;
/// bucket 1 is free but still holds a stale node in slot 0.
fn table(n_entries: u64) -> Fixture
{
    let mut fx = Fixture::new();
    register_cuckoo_types(&mut fx.types);

    fx.map(TABLE, cuckoo::TABLE_SIZE as usize);
    fx.ptr(TABLE, BUCKETS);
    fx.u64(TABLE + 8, 2);
    fx.u64(TABLE + 16, n_entries);
    fx.u64(TABLE + 24, 4);

    fx.map(BUCKETS, (2 * cuckoo::BUCKET_SIZE) as usize);
    fx.ptr(slot(0, 0), NODE_A);
    fx.u32(slot(0, 0) + 8, 0x10);
    fx.u32(BUCKETS + cuckoo::IN_USE, 1);

    fx.ptr(slot(1, 0), NODE_C);
    fx.u32(slot(1, 0) + 8, 0x30);
    fx.u32(BUCKETS + cuckoo::BUCKET_SIZE + cuckoo::IN_USE, 0);

    for node in [NODE_A, NODE_B, NODE_C] {
        fx.map(node, 8);
    }
    fx.ptr(NODE_A, NODE_B);
    fx
}

#[test]
fn test_cuckoo_layout_from_xnu_names()
{
    let fx = table(2);
    let layout = CuckooLayout::resolve(&fx.types, &CuckooNames::default()).unwrap();

    assert_eq!(layout.bucket_size, cuckoo::BUCKET_SIZE);
    assert_eq!(layout.slots_per_bucket, 2);
    assert_eq!(layout.slot_size, cuckoo::SLOT_SIZE);
    assert_eq!(layout.in_use.offset, cuckoo::IN_USE);
    assert!(layout.n_entries.is_some());
}

#[test]
fn test_cuckoo_yields_chain_with_slot_hash()
{
    let fx = table(2);
    let target = fx.target();
    let entries: Vec<(u64, u64)> = target
        .cuckoo(addr(TABLE))
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (entry.node.value(), entry.hash)
        })
        .collect();

    assert_eq!(entries, vec![(NODE_A, 0x10), (NODE_B, 0x10)]);
}

#[test]
fn test_cuckoo_skips_stale_slots_of_free_buckets()
{
    let fx = table(2);
    let target = fx.target();
    let nodes: Vec<u64> = target
        .cuckoo(addr(TABLE))
        .unwrap()
        .map(|entry| entry.unwrap().node.value())
        .collect();

    assert!(!nodes.contains(&NODE_C));
}

#[test]
fn test_cuckoo_entry_positions()
{
    let mut fx = table(3);
    // Mark bucket 1 in use: its slot 0 now counts.
    fx.u32(BUCKETS + cuckoo::BUCKET_SIZE + cuckoo::IN_USE, 1);

    let target = fx.target();
    let entries: Vec<_> = target.cuckoo(addr(TABLE)).unwrap().map(Result::unwrap).collect();

    assert_eq!(entries.len(), 3);
    assert_eq!((entries[2].node.value(), entries[2].bucket, entries[2].slot, entries[2].hash), (NODE_C, 1, 0, 0x30));
}

#[test]
fn test_cuckoo_count_check()
{
    let fx = table(2);
    let mut scan = fx.target().cuckoo(addr(TABLE)).unwrap();
    assert_eq!(scan.table().n_entries, Some(2));
    assert_eq!(scan.table().capacity, Some(4));
    assert_eq!(scan.count_check(), None);

    for entry in scan.by_ref() {
        entry.unwrap();
    }
    assert_eq!(scan.observed(), 2);
    assert_eq!(scan.count_check(), Some(EntryCount::Consistent(2)));
}

#[test]
fn test_cuckoo_count_mismatch_is_not_an_error()
{
    let fx = table(5);
    let mut scan = fx.target().cuckoo(addr(TABLE)).unwrap();

    assert!(scan.by_ref().all(|entry| entry.is_ok()));
    assert_eq!(
        scan.count_check(),
        Some(EntryCount::Mismatch {
            expected: 5,
            observed: 2,
        })
    );
}

#[test]
fn test_cuckoo_count_check_can_be_disabled()
{
    let fx = table(5);
    let mut scan = fx
        .target_with(WalkConfig::default().with_verify_counts(false))
        .cuckoo(addr(TABLE))
        .unwrap();

    assert_eq!(scan.by_ref().count(), 2);
    assert_eq!(scan.count_check(), None);
}

#[test]
fn test_verify_entry_count()
{
    assert_eq!(verify_entry_count(addr(TABLE), 3, 3), EntryCount::Consistent(3));
    assert_eq!(
        verify_entry_count(addr(TABLE), 3, 1),
        EntryCount::Mismatch {
            expected: 3,
            observed: 1,
        }
    );
}

#[test]
fn test_cuckoo_null_bucket_array_is_empty()
{
    let mut fx = table(0);
    fx.ptr(TABLE, 0);

    assert_eq!(fx.target().cuckoo(addr(TABLE)).unwrap().count(), 0);
}

#[test]
fn test_cuckoo_chain_cycle()
{
    let mut fx = table(2);
    fx.ptr(NODE_B, NODE_A);

    let target = fx.target_with(WalkConfig::default().with_max_nodes(32));
    let results: Vec<_> = target.cuckoo(addr(TABLE)).unwrap().collect();

    assert_eq!(results.len(), 33);
    assert!(matches!(results.last(), Some(Err(WalkError::MalformedStructure { .. }))));
}

#[test]
fn test_cuckoo_bad_chain_pointer()
{
    let mut fx = table(2);
    fx.ptr(NODE_B, 0xdead_0000);

    let results: Vec<_> = fx.target().cuckoo(addr(TABLE)).unwrap().collect();

    assert_eq!(results.len(), 4);
    assert!(matches!(results[3], Err(WalkError::UnmappedMemory { .. })));
}

#[test]
fn test_cuckoo_null_table_is_empty()
{
    let fx = table(2);
    let target = fx.target();
    let mut scan = target.cuckoo(addr(0)).unwrap();

    assert_eq!(scan.table().n_buckets, 0);
    assert!(scan.next().is_none());
    assert_eq!(scan.count_check(), None);
}

#[test]
fn test_cuckoo_repeat_walk_is_identical()
{
    let fx = table(2);
    let target = fx.target();
    let walk = || target.cuckoo(addr(TABLE)).unwrap().collect::<Result<Vec<_>, _>>().unwrap();

    let first = walk();
    assert_eq!(first.len(), 2);
    assert_eq!(first, walk());
}
