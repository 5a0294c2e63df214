//! Shared fixtures: a sparse image plus xnu-shaped layouts

#![allow(dead_code)]

use memwalk_core::layout::{Field, FieldKind, TypeDescriptor, TypeRegistry};
use memwalk_core::memory::{MemoryAccessor, SparseMemory};
use memwalk_core::types::Address;
use memwalk_core::value::Target;
use memwalk_core::WalkConfig;

pub fn addr(value: u64) -> Address
{
    Address::new(value)
}

/// Offsets inside `item`, the element type used by the generic queue tests
pub mod item
{
    pub const SIZE: u64 = 0x50;
    pub const VALUE: u64 = 0;
    pub const SLE: u64 = 8;
    pub const LE: u64 = 16;
    pub const STQE: u64 = 32;
    pub const TQE: u64 = 40;
    pub const RBE: u64 = 56;
}

pub struct Fixture
{
    pub image: SparseMemory,
    pub types: TypeRegistry,
}

impl Fixture
{
    pub fn new() -> Self
    {
        Self {
            image: SparseMemory::new(),
            types: TypeRegistry::new(),
        }
    }

    pub fn target(&self) -> Target<'_>
    {
        Target::new(&self.image, &self.types)
    }

    pub fn target_with(&self, config: WalkConfig) -> Target<'_>
    {
        Target::new(&self.image, &self.types).with_config(config)
    }

    pub fn map(&mut self, at: u64, len: usize)
    {
        self.image.map_zeroed(addr(at), len).unwrap();
    }

    pub fn ptr(&mut self, at: u64, value: u64)
    {
        self.image.store_pointer(addr(at), addr(value)).unwrap();
    }

    pub fn u64(&mut self, at: u64, value: u64)
    {
        self.image.store_u64(addr(at), value).unwrap();
    }

    pub fn u32(&mut self, at: u64, value: u32)
    {
        self.image.store_u32(addr(at), value).unwrap();
    }

    pub fn pointer_at(&self, at: u64) -> u64
    {
        self.image.read_pointer(addr(at)).unwrap().value()
    }

    pub fn bytes(&mut self, at: u64, data: &[u8])
    {
        self.image.store_bytes(addr(at), data).unwrap();
    }

    /// Map one `item` at `at` carrying `value`.
    pub fn item(&mut self, at: u64, value: u64)
    {
        self.map(at, item::SIZE as usize);
        self.u64(at + item::VALUE, value);
    }

    /// Link `items` into a `TAILQ_HEAD` at `head` through the `tqe` member.
    pub fn link_tailq(&mut self, head: u64, items: &[u64])
    {
        self.link_tailq_at(head, item::TQE, items);
    }

    /// Link `items` into a `TAILQ_HEAD` at `head`; the entry sits at `link` in each node.
    pub fn link_tailq_at(&mut self, head: u64, link: u64, items: &[u64])
    {
        let mut prev_next_slot = head;
        for &node in items {
            self.ptr(prev_next_slot, node);
            self.ptr(node + link + 8, prev_next_slot);
            prev_next_slot = node + link;
        }
        self.ptr(prev_next_slot, 0);
        self.ptr(head + 8, prev_next_slot);
    }

    /// Link `items` into an `SLIST_HEAD` at `head` through the `sle` member.
    pub fn link_slist(&mut self, head: u64, items: &[u64])
    {
        self.link_slist_at(head, item::SLE, items);
    }

    pub fn link_slist_at(&mut self, head: u64, link: u64, items: &[u64])
    {
        let mut slot = head;
        for &node in items {
            self.ptr(slot, node);
            slot = node + link;
        }
        self.ptr(slot, 0);
    }
}

fn pointer(name: &str, offset: u64, pointee: &str) -> Field
{
    Field::pointer(name, offset, Some(pointee))
}

fn tailq_entry(name: &str, elem: &str) -> TypeDescriptor
{
    TypeDescriptor::new(name, 16)
        .with_field(pointer("tqe_next", 0, elem))
        .with_field(Field::pointer("tqe_prev", 8, None))
}

fn tailq_head(name: &str, elem: &str) -> TypeDescriptor
{
    TypeDescriptor::new(name, 16)
        .with_field(pointer("tqh_first", 0, elem))
        .with_field(Field::pointer("tqh_last", 8, None))
}

fn slist_entry(name: &str, elem: &str) -> TypeDescriptor
{
    TypeDescriptor::new(name, 8).with_field(pointer("sle_next", 0, elem))
}

fn slist_head(name: &str, elem: &str) -> TypeDescriptor
{
    TypeDescriptor::new(name, 8).with_field(pointer("slh_first", 0, elem))
}

/// `item` with one link member per queue kind plus a tree link, and one head
/// type per kind.
pub fn register_item_types(types: &mut TypeRegistry)
{
    types.insert_type(
        TypeDescriptor::new("item", item::SIZE)
            .with_field(Field::unsigned("value", item::VALUE, 8))
            .with_field(Field::structure("sle", item::SLE, 8, "item_slist_entry"))
            .with_field(Field::structure("le", item::LE, 16, "item_list_entry"))
            .with_field(Field::structure("stqe", item::STQE, 8, "item_stailq_entry"))
            .with_field(Field::structure("tqe", item::TQE, 16, "item_tailq_entry"))
            .with_field(Field::structure("rbe", item::RBE, 24, "item_rb_entry")),
    );
    types.insert_type(slist_entry("item_slist_entry", "item"));
    types.insert_type(
        TypeDescriptor::new("item_list_entry", 16)
            .with_field(pointer("le_next", 0, "item"))
            .with_field(Field::pointer("le_prev", 8, None)),
    );
    types.insert_type(TypeDescriptor::new("item_stailq_entry", 8).with_field(pointer("stqe_next", 0, "item")));
    types.insert_type(tailq_entry("item_tailq_entry", "item"));
    types.insert_type(
        TypeDescriptor::new("item_rb_entry", 24)
            .with_field(pointer("rbe_left", 0, "item"))
            .with_field(pointer("rbe_right", 8, "item"))
            .with_field(pointer("rbe_parent", 16, "item")),
    );

    types.insert_type(slist_head("item_slist", "item"));
    types.insert_type(TypeDescriptor::new("item_list", 8).with_field(pointer("lh_first", 0, "item")));
    types.insert_type(
        TypeDescriptor::new("item_stailq", 16)
            .with_field(pointer("stqh_first", 0, "item"))
            .with_field(Field::pointer("stqh_last", 8, None)),
    );
    types.insert_type(tailq_head("item_tailq", "item"));
    types.insert_type(TypeDescriptor::new("item_tree", 8).with_field(pointer("rbh_root", 0, "item")));
}

/// Offsets of the cuckoo fixture types
pub mod cuckoo
{
    pub const TABLE_SIZE: u64 = 32;
    pub const BUCKET_SIZE: u64 = 40;
    pub const SLOT_SIZE: u64 = 16;
    pub const IN_USE: u64 = 32;
}

/// `cuckoo_hashtable` with two slots per bucket.
pub fn register_cuckoo_types(types: &mut TypeRegistry)
{
    types.insert_type(
        TypeDescriptor::new("cuckoo_hashtable", cuckoo::TABLE_SIZE)
            .with_field(pointer("_buckets", 0, "_bucket"))
            .with_field(Field::unsigned("_n_buckets", 8, 8))
            .with_field(Field::unsigned("_n_entries", 16, 8))
            .with_field(Field::unsigned("_capacity", 24, 8)),
    );
    types.insert_type(
        TypeDescriptor::new("_bucket", cuckoo::BUCKET_SIZE)
            .with_field(Field::array(
                "_slots",
                0,
                FieldKind::Struct {
                    type_name: "_slot".to_string(),
                },
                cuckoo::SLOT_SIZE,
                2,
            ))
            .with_field(Field::unsigned("_inuse", cuckoo::IN_USE, 4)),
    );
    types.insert_type(
        TypeDescriptor::new("_slot", cuckoo::SLOT_SIZE)
            .with_field(pointer("_node", 0, "cuckoo_node"))
            .with_field(Field::unsigned("_hash", 8, 4)),
    );
    types.insert_type(TypeDescriptor::new("cuckoo_node", 8).with_field(pointer("next", 0, "cuckoo_node")));
}

/// Offsets of the skmem fixture types
pub mod skmem
{
    pub const CACHE_SIZE: u64 = 0x80;
    pub const SKM_SL_PARTIAL: u64 = 0;
    pub const SKM_SL_EMPTY: u64 = 16;
    pub const SKM_HASH_MASK: u64 = 32;
    pub const SKM_HASH_TABLE: u64 = 40;
    pub const SKM_LINK: u64 = 48;
    pub const SKM_MODE: u64 = 64;
    pub const SKM_NAME: u64 = 72;

    pub const SLAB_SIZE: u64 = 48;
    pub const SL_LINK: u64 = 0;
    pub const SL_HEAD: u64 = 16;
    pub const SL_REFCNT: u64 = 24;
    pub const SL_BASE: u64 = 32;
    pub const SL_BASEM: u64 = 40;

    pub const BUFCTL_SIZE: u64 = 24;
    pub const BC_LINK: u64 = 0;
    pub const BC_ADDR: u64 = 8;
    pub const BC_ADDRM: u64 = 16;

    /// Chain head sits behind a lock word
    pub const BUFCTL_BKT_SIZE: u64 = 16;
    pub const BCB_HEAD: u64 = 8;

    pub const REGION_SIZE: u64 = 80;
    pub const SKR_LINK: u64 = 0;
    pub const SKR_SEG_FREE: u64 = 16;
    pub const SKR_HASH_MASK: u64 = 32;
    pub const SKR_HASH_TABLE: u64 = 40;
    pub const SKR_NAME: u64 = 48;

    pub const SEG_SIZE: u64 = 40;
    pub const SG_LINK: u64 = 0;
    pub const SG_INDEX: u64 = 16;
    pub const SG_START: u64 = 24;
    pub const SG_END: u64 = 32;

    pub const SEG_BKT_SIZE: u64 = 16;
}

/// `skmem_cache`, `skmem_slab`, `skmem_bufctl`, `skmem_region`, `skmem_seg`
/// and their queue heads and hash buckets.
pub fn register_skmem_types(types: &mut TypeRegistry)
{
    use skmem::*;

    types.insert_type(tailq_head("skmem_slab_tailq", "skmem_slab"));
    types.insert_type(tailq_entry("skmem_slab_link", "skmem_slab"));
    types.insert_type(tailq_entry("skmem_cache_link", "skmem_cache"));
    types.insert_type(tailq_head("skmem_cache_tailq", "skmem_cache"));
    types.insert_type(slist_head("skmem_bufctl_slist", "skmem_bufctl"));
    types.insert_type(slist_entry("skmem_bufctl_link", "skmem_bufctl"));

    types.insert_type(
        TypeDescriptor::new("skmem_cache", CACHE_SIZE)
            .with_field(Field::structure("skm_sl_partial", SKM_SL_PARTIAL, 16, "skmem_slab_tailq"))
            .with_field(Field::structure("skm_sl_empty", SKM_SL_EMPTY, 16, "skmem_slab_tailq"))
            .with_field(Field::unsigned("skm_hash_mask", SKM_HASH_MASK, 8))
            .with_field(pointer("skm_hash_table", SKM_HASH_TABLE, "skmem_bufctl_bkt"))
            .with_field(Field::structure("skm_link", SKM_LINK, 16, "skmem_cache_link"))
            .with_field(Field::unsigned("skm_mode", SKM_MODE, 4))
            .with_field(Field::bytes("skm_name", SKM_NAME, 32)),
    );
    types.insert_type(
        TypeDescriptor::new("skmem_slab", SLAB_SIZE)
            .with_field(Field::structure("sl_link", SL_LINK, 16, "skmem_slab_link"))
            .with_field(Field::structure("sl_head", SL_HEAD, 8, "skmem_bufctl_slist"))
            .with_field(Field::unsigned("sl_refcnt", SL_REFCNT, 4))
            .with_field(Field::pointer("sl_base", SL_BASE, None))
            .with_field(Field::pointer("sl_basem", SL_BASEM, None)),
    );
    types.insert_type(
        TypeDescriptor::new("skmem_bufctl", BUFCTL_SIZE)
            .with_field(Field::structure("bc_link", BC_LINK, 8, "skmem_bufctl_link"))
            .with_field(Field::pointer("bc_addr", BC_ADDR, None))
            .with_field(Field::pointer("bc_addrm", BC_ADDRM, None)),
    );
    types.insert_type(
        TypeDescriptor::new("skmem_bufctl_bkt", BUFCTL_BKT_SIZE)
            .with_field(Field::unsigned("bcb_lock", 0, 8))
            .with_field(Field::structure("bcb_head", BCB_HEAD, 8, "skmem_bufctl_slist")),
    );

    types.insert_type(tailq_head("skmem_seg_tailq", "skmem_seg"));
    types.insert_type(tailq_entry("skmem_seg_link", "skmem_seg"));
    types.insert_type(tailq_entry("skmem_region_link", "skmem_region"));
    types.insert_type(
        TypeDescriptor::new("skmem_region", REGION_SIZE)
            .with_field(Field::structure("skr_link", SKR_LINK, 16, "skmem_region_link"))
            .with_field(Field::structure("skr_seg_free", SKR_SEG_FREE, 16, "skmem_seg_tailq"))
            .with_field(Field::unsigned("skr_hash_mask", SKR_HASH_MASK, 8))
            .with_field(pointer("skr_hash_table", SKR_HASH_TABLE, "skmem_seg_bkt"))
            .with_field(Field::bytes("skr_name", SKR_NAME, 32)),
    );
    types.insert_type(
        TypeDescriptor::new("skmem_seg", SEG_SIZE)
            .with_field(Field::structure("sg_link", SG_LINK, 16, "skmem_seg_link"))
            .with_field(Field::unsigned("sg_index", SG_INDEX, 4))
            .with_field(Field::pointer("sg_start", SG_START, None))
            .with_field(Field::pointer("sg_end", SG_END, None)),
    );
    types.insert_type(
        TypeDescriptor::new("skmem_seg_bkt", SEG_BKT_SIZE).with_field(Field::structure("sgb_head", 0, 16, "skmem_seg_tailq")),
    );
}
