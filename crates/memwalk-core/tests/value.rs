//! Tests for typed values

mod common;

use common::{addr, item, register_item_types, Fixture};
use memwalk_core::error::WalkError;
use memwalk_core::layout::{Field, FieldKind, TypeDescriptor};
use memwalk_core::memory::Scalar;
use memwalk_core::WalkConfig;

const CHANNEL: u64 = 0x1000;
const RINGS: u64 = 0x2000;
const NAME: u64 = 0x3000;

/// `kern_channel { int32 ch_fd; u16 ch_flags; pad; ring *ch_rings; char *ch_name;
/// char ch_tag[8]; u32 ch_counts[4]; }`, `ring { u64 r_id; u64 r_size; }`
fn fixture() -> Fixture
{
    let mut fx = Fixture::new();
    register_item_types(&mut fx.types);
    fx.types.insert_type(
        TypeDescriptor::new("kern_channel", 48)
            .with_field(Field::signed("ch_fd", 0, 4))
            .with_field(Field::unsigned("ch_flags", 4, 2))
            .with_field(Field::pointer("ch_rings", 8, Some("ring")))
            .with_field(Field::pointer("ch_name", 16, Some("char")))
            .with_field(Field::bytes("ch_tag", 24, 8))
            .with_field(Field::array("ch_counts", 32, FieldKind::Unsigned, 4, 4)),
    );
    fx.types.insert_type(
        TypeDescriptor::new("ring", 16)
            .with_field(Field::unsigned("r_id", 0, 8))
            .with_field(Field::unsigned("r_size", 8, 8)),
    );

    fx.map(CHANNEL, 48);
    fx.u32(CHANNEL, (-3i32) as u32);
    fx.image.store_u16(addr(CHANNEL + 4), 0x8001).unwrap();
    fx.ptr(CHANNEL + 8, RINGS);
    fx.ptr(CHANNEL + 16, NAME);
    fx.bytes(CHANNEL + 24, b"tag\0junk");
    for (i, count) in [5u32, 6, 7, 8].into_iter().enumerate() {
        fx.u32(CHANNEL + 32 + 4 * i as u64, count);
    }

    fx.map(RINGS, 48);
    for i in 0..3u64 {
        fx.u64(RINGS + 16 * i, 100 + i);
        fx.u64(RINGS + 16 * i + 8, 4096);
    }

    fx.map(NAME, 16);
    fx.bytes(NAME, b"en0 channel\0");
    fx
}

#[test]
fn test_scalar_fields()
{
    let fx = fixture();
    let channel = fx.target().value(addr(CHANNEL), "struct kern_channel *").unwrap();

    assert_eq!(channel.type_name(), Some("kern_channel"));
    assert_eq!(channel.size(), 48);
    assert_eq!(channel.field("ch_fd").unwrap().as_i64().unwrap(), -3);
    assert_eq!(channel.field("ch_fd").unwrap().as_integer().unwrap(), Scalar::Signed(-3));
    assert_eq!(channel.field("ch_flags").unwrap().as_u64().unwrap(), 0x8001);
}

#[test]
fn test_field_address_is_base_plus_offset()
{
    let fx = fixture();
    let channel = fx.target().value(addr(CHANNEL), "kern_channel").unwrap();

    assert_eq!(channel.field("ch_counts").unwrap().address(), addr(CHANNEL + 32));
}

#[test]
fn test_pointer_deref_and_index()
{
    let fx = fixture();
    let channel = fx.target().value(addr(CHANNEL), "kern_channel").unwrap();
    let rings = channel.field("ch_rings").unwrap();

    assert_eq!(rings.as_address().unwrap(), addr(RINGS));
    assert_eq!(rings.deref().unwrap().field("r_id").unwrap().as_u64().unwrap(), 100);
    assert_eq!(rings.index(2).unwrap().address(), addr(RINGS + 32));
    assert_eq!(rings.index(2).unwrap().field("r_id").unwrap().as_u64().unwrap(), 102);
}

#[test]
fn test_inline_array_index()
{
    let fx = fixture();
    let counts = fx.target().value(addr(CHANNEL), "kern_channel").unwrap().field("ch_counts").unwrap();

    assert_eq!(counts.index(0).unwrap().as_u64().unwrap(), 5);
    assert_eq!(counts.index(3).unwrap().as_u64().unwrap(), 8);
    assert!(matches!(counts.index(4), Err(WalkError::InvalidArgument(_))));
}

#[test]
fn test_element_range()
{
    let fx = fixture();
    let rings = fx.target().value(addr(CHANNEL), "kern_channel").unwrap().field("ch_rings").unwrap();

    let ids: Vec<u64> = rings
        .elements(1..3)
        .unwrap()
        .map(|ring| ring.unwrap().field("r_id").unwrap().as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![101, 102]);
    assert_eq!(rings.elements(2..2).unwrap().count(), 0);
    assert!(matches!(rings.elements(3..1), Err(WalkError::MalformedStructure { .. })));
}

#[test]
fn test_element_range_respects_node_budget()
{
    let fx = fixture();
    let target = fx.target_with(WalkConfig::default().with_max_nodes(2));
    let rings = target.value(addr(CHANNEL), "kern_channel").unwrap().field("ch_rings").unwrap();

    assert_eq!(rings.elements(0..2).unwrap().count(), 2);
    assert!(matches!(rings.elements(0..3), Err(WalkError::MalformedStructure { .. })));
}

#[test]
fn test_null_pointer()
{
    let mut fx = fixture();
    fx.ptr(CHANNEL + 8, 0);
    let rings = fx.target().value(addr(CHANNEL), "kern_channel").unwrap().field("ch_rings").unwrap();

    assert!(rings.pointee().unwrap().is_none());
    match rings.deref() {
        Err(WalkError::NullPointer { address }) => assert_eq!(address, addr(CHANNEL + 8)),
        other => panic!("expected NullPointer, got {other:?}"),
    }
}

#[test]
fn test_c_strings()
{
    let fx = fixture();
    let channel = fx.target().value(addr(CHANNEL), "kern_channel").unwrap();

    assert_eq!(channel.field("ch_tag").unwrap().as_c_string().unwrap(), "tag");
    assert_eq!(channel.field("ch_name").unwrap().as_c_string().unwrap(), "en0 channel");
}

#[test]
fn test_accessor_on_wrong_kind_is_type_mismatch()
{
    let fx = fixture();
    let channel = fx.target().value(addr(CHANNEL), "kern_channel").unwrap();

    assert!(matches!(channel.as_u64(), Err(WalkError::TypeMismatch { .. })));
    assert!(matches!(channel.as_address(), Err(WalkError::TypeMismatch { .. })));
    assert!(matches!(channel.deref(), Err(WalkError::TypeMismatch { .. })));
    assert!(matches!(
        channel.field("ch_fd").unwrap().field("anything"),
        Err(WalkError::TypeMismatch { .. })
    ));
    assert!(matches!(channel.field("ch_fd").unwrap().index(0), Err(WalkError::TypeMismatch { .. })));
}

#[test]
fn test_unknown_field_and_type()
{
    let fx = fixture();
    let target = fx.target();
    let channel = target.value(addr(CHANNEL), "kern_channel").unwrap();

    assert!(matches!(channel.field("ch_bogus"), Err(WalkError::UnknownField { .. })));
    assert!(matches!(target.value(addr(CHANNEL), "no_such_type"), Err(WalkError::UnknownType(_))));
}

#[test]
fn test_cast_and_container_of()
{
    let mut fx = fixture();
    fx.item(0x4000, 99);
    let target = fx.target();

    let link = target.value(addr(0x4000 + item::TQE), "item_tailq_entry").unwrap();
    let owner = link.container_of("item", "tqe").unwrap();
    assert_eq!(owner.address(), addr(0x4000));
    assert_eq!(owner.field("value").unwrap().as_u64().unwrap(), 99);

    let as_ring = owner.cast("ring").unwrap();
    assert_eq!(as_ring.address(), addr(0x4000));
    assert_eq!(as_ring.field("r_id").unwrap().as_u64().unwrap(), 99);

    let nested = target.value(addr(0x4000 + item::TQE + 8), "ring").unwrap();
    assert_eq!(nested.container_of("item", "tqe.tqe_prev").unwrap().address(), addr(0x4000));
}

#[test]
fn test_container_of_underflow()
{
    let fx = fixture();
    let low = fx.target().value(addr(8), "ring").unwrap();

    assert!(matches!(low.container_of("item", "tqe"), Err(WalkError::InvalidArgument(_))));
}

#[test]
fn test_values_read_live_memory()
{
    let mut fx = fixture();
    let before = {
        let channel = fx.target().value(addr(CHANNEL), "kern_channel").unwrap();
        channel.field("ch_flags").unwrap().as_u64().unwrap()
    };
    fx.image.store_u16(addr(CHANNEL + 4), 0x0002).unwrap();
    let channel = fx.target().value(addr(CHANNEL), "kern_channel").unwrap();

    assert_eq!(before, 0x8001);
    assert_eq!(channel.field("ch_flags").unwrap().as_u64().unwrap(), 0x0002);
}

#[test]
fn test_read_failure_names_address()
{
    let fx = fixture();
    let stray = fx.target().value(addr(0xdead_0000), "ring").unwrap();

    match stray.field("r_size").unwrap().as_u64() {
        Err(err) => assert_eq!(err.address(), Some(addr(0xdead_0008))),
        Ok(value) => panic!("expected a read failure, got {value}"),
    }
}
