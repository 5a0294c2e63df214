//! Text reports over walked structures.
//!
//! Every report writes line by line as the walk proceeds. When a walk fails
//! the lines already written stay written and the error is returned for the
//! caller to print last.

use std::fmt;
use std::io::{self, Write};
use std::net::{Ipv4Addr, Ipv6Addr};

use memwalk_core::error::{WalkError, WalkResult};
use memwalk_core::layout::FieldKind;
use memwalk_core::memory::MemoryAccessor;
use memwalk_core::types::Address;
use memwalk_core::walk::{
    free_allocated_overlap, BucketCount, CacheItem, EntryCount, HashIndexItem, HashIndexNames, QueueKind, RegionItem,
};
use memwalk_core::{Target, TypedValue};

const CACHE_HEAD: &str = "skmem_cache_head";
const ARENA_HEAD: &str = "skmem_arena_head";
const REGION_HEAD: &str = "skmem_region_head";
const NETNS_ALL_TOKENS: &str = "netns_all_tokens";
const NETNS_UNBOUND_TOKENS: &str = "netns_unbound_tokens";
const PROTONS_TOKENS: &str = "protons_tokens";

const KERN_CHANNEL_UPP_HTBL_SIZE: u64 = 256;
const IPPROTO_TCP: u64 = 6;
const IPPROTO_UDP: u64 = 17;

const FREE_RULE: &str = "\t========================= free =========================";
const ALLOCATED_RULE: &str = "\t====================== allocated =======================";

/// Failure while producing a report
#[derive(Debug, thiserror::Error)]
pub enum ReportError
{
    #[error(transparent)]
    Walk(#[from] WalkError),

    #[error("failed to write report: {0}")]
    Io(#[from] io::Error),
}

pub type ReportResult<T = ()> = Result<T, ReportError>;

/// Kind of a skywalk memory arena (`ar_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaType
{
    Nexus,
    Necp,
    System,
    Unknown(u64),
}

impl From<u64> for ArenaType
{
    fn from(raw: u64) -> Self
    {
        match raw {
            0 => ArenaType::Nexus,
            1 => ArenaType::Necp,
            2 => ArenaType::System,
            other => ArenaType::Unknown(other),
        }
    }
}

impl fmt::Display for ArenaType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            ArenaType::Nexus => "NEXUS",
            ArenaType::Necp => "NECP",
            ArenaType::System => "SYSTEM",
            ArenaType::Unknown(_) => "?",
        };
        f.pad(name)
    }
}

/// Ring set of a channel's nexus adapter, in `ch_first`/`ch_last` index order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingKind
{
    Rx,
    Tx,
    Alloc,
    Free,
}

impl RingKind
{
    pub const ALL: [RingKind; 4] = [RingKind::Rx, RingKind::Tx, RingKind::Alloc, RingKind::Free];

    /// Index into `ch_first` and `ch_last`.
    pub const fn index(self) -> u64
    {
        match self {
            RingKind::Rx => 0,
            RingKind::Tx => 1,
            RingKind::Alloc => 2,
            RingKind::Free => 3,
        }
    }

    /// Adapter member pointing at the ring array.
    pub const fn rings_field(self) -> &'static str
    {
        match self {
            RingKind::Rx => "na_rx_rings",
            RingKind::Tx => "na_tx_rings",
            RingKind::Alloc => "na_alloc_rings",
            RingKind::Free => "na_free_rings",
        }
    }
}

impl fmt::Display for RingKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            RingKind::Rx => "RX",
            RingKind::Tx => "TX",
            RingKind::Alloc => "ALLOC",
            RingKind::Free => "FREE",
        };
        f.pad(name)
    }
}

const NETNS_OWNER_MASK: u64 = 0x7;

/// Holder of a netns port reservation (low bits of `nt_flags`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind
{
    Listener,
    Skywalk,
    Bsd,
    Pf,
    Unknown(u64),
}

impl From<u64> for OwnerKind
{
    fn from(flags: u64) -> Self
    {
        match flags & NETNS_OWNER_MASK {
            0 => OwnerKind::Listener,
            1 => OwnerKind::Skywalk,
            2 => OwnerKind::Bsd,
            3 => OwnerKind::Pf,
            other => OwnerKind::Unknown(other),
        }
    }
}

impl OwnerKind
{
    /// Token member pointing at the owner, and the C type it points at.
    pub const fn parent(self) -> (&'static str, &'static str)
    {
        match self {
            OwnerKind::Skywalk => ("nt_parent_skywalk", "struct flow_entry"),
            OwnerKind::Bsd => ("nt_parent_bsd", "struct inpcb"),
            OwnerKind::Listener | OwnerKind::Pf | OwnerKind::Unknown(_) => ("nt_parent", "void"),
        }
    }
}

impl fmt::Display for OwnerKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            OwnerKind::Listener => "LISTENER",
            OwnerKind::Skywalk => "SKYWALK",
            OwnerKind::Bsd => "BSD",
            OwnerKind::Pf => "PF",
            OwnerKind::Unknown(_) => "?",
        };
        f.pad(name)
    }
}

/// Which netns token list to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenList
{
    /// Every token (`netns_all_tokens`)
    All,
    /// Tokens not bound to an interface
    Unbound,
    /// Tokens bound to one `struct ifnet`
    Interface(Address),
}

const SKM_MODE_NOCACHE: u64 = 0x1;
const SKM_MODE_AUDIT: u64 = 0x2;

/// Two-column rendering of `skm_mode`: `n` for no-cache, `a` for audit.
pub fn cache_mode(mode: u64) -> String
{
    let mut out = String::with_capacity(2);
    out.push(if mode & SKM_MODE_NOCACHE != 0 { 'n' } else { '-' });
    out.push(if mode & SKM_MODE_AUDIT != 0 { 'a' } else { '-' });
    out
}

/// Integer or pointer member as a plain number.
fn raw(value: &TypedValue<'_>) -> WalkResult<u64>
{
    match value.kind() {
        FieldKind::Pointer { .. } => value.as_address().map(Address::value),
        _ => value.as_u64(),
    }
}

fn member(value: &TypedValue<'_>, name: &str) -> WalkResult<u64>
{
    raw(&value.field(name)?)
}

fn member_name(value: &TypedValue<'_>, name: &str) -> WalkResult<String>
{
    value.field(name)?.as_c_string()
}

fn octets<const N: usize>(memory: &dyn MemoryAccessor, value: &TypedValue<'_>) -> WalkResult<[u8; N]>
{
    let bytes = memory.read(value.address(), N)?;
    bytes.as_slice().try_into().map_err(|_| WalkError::MalformedStructure {
        address: value.address(),
        reason: format!("expected {N} address bytes, read {}", bytes.len()),
    })
}

/// Reserved address of a netns token, by `nt_addr_len`.
fn token_address(memory: &dyn MemoryAccessor, token: &TypedValue<'_>) -> WalkResult<String>
{
    Ok(match member(token, "nt_addr_len")? {
        4 => Ipv4Addr::from(octets::<4>(memory, &token.field("nt_inaddr")?)?).to_string(),
        16 => Ipv6Addr::from(octets::<16>(memory, &token.field("nt_in6addr")?)?).to_string(),
        len => format!("bad len {len}"),
    })
}

fn protocol_name(proto: u64) -> String
{
    match proto {
        IPPROTO_TCP => "tcp".to_string(),
        IPPROTO_UDP => "udp".to_string(),
        other => other.to_string(),
    }
}

/// One-line rendering of any value, used by the generic commands.
pub fn render(value: &TypedValue<'_>) -> WalkResult<String>
{
    Ok(match value.kind() {
        FieldKind::Unsigned | FieldKind::Signed => value.as_integer()?.to_string(),
        FieldKind::Pointer { .. } => format!("{:#x}", value.as_address()?),
        FieldKind::Bytes => format!("\"{}\"", value.as_c_string()?),
        FieldKind::Struct { type_name } => format!("<{type_name} @ {:#x}>", value.address()),
        kind @ FieldKind::Array { .. } => format!("<{} @ {:#x}>", kind.describe(), value.address()),
    })
}

/// Resolve the root of a generic walk.
///
/// `root` is a symbol name, or an address when `type_name` is given. A type
/// given alongside a symbol overrides the symbol's declared type.
pub fn resolve_root<'a>(target: &Target<'a>, root: &str, type_name: Option<&str>) -> WalkResult<TypedValue<'a>>
{
    match (Address::parse(root), type_name) {
        (Ok(address), Some(type_name)) => target.value(address, type_name),
        (Ok(_), None) => Err(WalkError::InvalidArgument(format!(
            "a type is needed to walk from address {root}"
        ))),
        (Err(_), Some(type_name)) => target.symbol(root)?.cast(type_name),
        (Err(_), None) => target.symbol(root),
    }
}

/// Writes reports for one target
pub struct Reporter<'a, W>
{
    target: Target<'a>,
    out: W,
}

impl<'a, W: Write> Reporter<'a, W>
{
    pub fn new(target: Target<'a>, out: W) -> Self
    {
        Self { target, out }
    }

    pub fn into_inner(self) -> W
    {
        self.out
    }

    fn numbered<I>(&mut self, values: I, fields: &[String]) -> ReportResult
    where
        I: Iterator<Item = WalkResult<TypedValue<'a>>>,
    {
        for (index, value) in (1..).zip(values) {
            let value = value?;
            write!(self.out, "{index:>4}: {:#018x}", value.address())?;
            for name in fields {
                write!(self.out, " {name}={}", render(&value.field(name)?)?)?;
            }
            writeln!(self.out)?;
        }
        Ok(())
    }

    /// Generic walk over a `queue.h` list or queue.
    pub fn queue(&mut self, kind: QueueKind, head: &TypedValue<'a>, elem_type: &str, link: &str, fields: &[String]) -> ReportResult
    {
        if kind.last_field().is_some() {
            let snapshot = self.target.queue_head(kind, head, elem_type, link)?;
            let last = snapshot.last.unwrap_or(Address::ZERO);
            writeln!(self.out, "head {:#x} first {:#x} last {:#x}", snapshot.head, snapshot.first, last)?;
        }
        let values = self.target.queue(kind, head, elem_type, link)?;
        self.numbered(values, fields)
    }

    /// Generic in-order walk over a red-black tree.
    pub fn rbtree(
        &mut self,
        head: &TypedValue<'a>,
        elem_type: &str,
        link: &str,
        sentinel: Option<Address>,
        fields: &[String],
    ) -> ReportResult
    {
        let values = match sentinel {
            Some(sentinel) => self.target.rbtree_with_sentinel(head, elem_type, link, sentinel)?,
            None => self.target.rbtree(head, elem_type, link)?,
        };
        self.numbered(values, fields)
    }

    /// Every chained node of a cuckoo hash table with its slot hash.
    pub fn cuckoo(&mut self, table: Address) -> ReportResult
    {
        let mut scan = self.target.cuckoo(table)?;
        let header = *scan.table();
        let count = |value: Option<u64>| value.map_or_else(|| "?".to_string(), |n| n.to_string());
        writeln!(
            self.out,
            "(struct cuckoo_hashtable *){:<18} capacity {} entries {}",
            format!("{table:#x}"),
            count(header.capacity),
            count(header.n_entries)
        )?;

        for entry in scan.by_ref() {
            let entry = entry?;
            writeln!(self.out, "  node {:#x} hash 0x{:08x}", entry.node, entry.hash)?;
        }

        if let Some(EntryCount::Mismatch { expected, observed }) = scan.count_check() {
            writeln!(self.out, "  walked {observed} entries, table reports {expected}")?;
        }
        Ok(())
    }

    /// The global list of slab caches.
    pub fn caches(&mut self) -> ReportResult
    {
        writeln!(
            self.out,
            "{:<4}  {:<18} {:<4} {:<4} {:<4} {:<4} {:<4} {:<4} {:<4} {:<4} {:<4} {}",
            "", "ADDR", "BUFI", "BUFM", "RESC", "SLCR", "SLDE", "SLAL", "SLFR", "DECO", "MODE", "NAME"
        )?;

        let head = self.target.symbol(CACHE_HEAD)?;
        let caches = self.target.queue(QueueKind::Tailq, &head, "skmem_cache", "skm_link")?;
        for (index, cache) in (1u64..).zip(caches) {
            let cache = cache?;
            writeln!(
                self.out,
                "{:>4}: 0x{:08x} {:<4} {:<4} {:<4} {:<4} {:<4} {:<4} {:<4} {:<4} {:<4} \"{}\"",
                index,
                cache.address().value(),
                member(&cache, "skm_bufinuse")?,
                member(&cache, "skm_bufmax")?,
                member(&cache, "skm_rescale")?,
                member(&cache, "skm_sl_create")?,
                member(&cache, "skm_sl_destroy")?,
                member(&cache, "skm_sl_alloc")?,
                member(&cache, "skm_sl_free")?,
                member(&cache, "skm_depot_contention")?,
                cache_mode(member(&cache, "skm_mode")?),
                member_name(&cache, "skm_name")?
            )?;
        }
        Ok(())
    }

    fn bufctl_header(&mut self) -> io::Result<()>
    {
        writeln!(self.out, "\t{:<18} {:<18} {:<18}", "bufctl", "buf_addr", "buf_addrm")
    }

    fn bufctl_row(&mut self, bufctl: Address) -> ReportResult
    {
        let bufctl = self.target.value(bufctl, "skmem_bufctl")?;
        writeln!(
            self.out,
            "\t0x{:08x} 0x{:08x} 0x{:08x}",
            bufctl.address().value(),
            member(&bufctl, "bc_addr")?,
            member(&bufctl, "bc_addrm")?
        )?;
        Ok(())
    }

    fn bucket_rows(&mut self, index: u64, address: Address, rule: &str) -> io::Result<()>
    {
        writeln!(self.out, "{:<18}  {:<4}", "bucket", "idx")?;
        writeln!(self.out, "0x{:08x} {:<4}", address.value(), index)?;
        writeln!(self.out, "{rule}")
    }

    /// Slabs and bufctls of one cache.
    ///
    /// With `check_overlap` the cache is walked a second time and bufctls found
    /// on both a free list and an allocated chain are listed.
    pub fn slab(&mut self, cache: Address, check_overlap: bool) -> ReportResult
    {
        let mut in_buckets = false;
        for item in self.target.slab_cache(cache)? {
            match item? {
                CacheItem::Slab { slab, .. } => {
                    let slab = self.target.value(slab, "skmem_slab")?;
                    writeln!(self.out, "{:<18} {:<4} {:<18} {:<18}", "slab", "ref", "base", "basem")?;
                    writeln!(
                        self.out,
                        "0x{:08x} {:<4} 0x{:08x} 0x{:08x}",
                        slab.address().value(),
                        member(&slab, "sl_refcnt")?,
                        member(&slab, "sl_base")?,
                        member(&slab, "sl_basem")?
                    )?;
                    writeln!(self.out, "{FREE_RULE}")?;
                    self.bufctl_header()?;
                }
                CacheItem::FreeBufctl { bufctl, .. } | CacheItem::AllocatedBufctl { bufctl, .. } => {
                    self.bufctl_row(bufctl)?;
                }
                CacheItem::Bucket { index, address } => {
                    if !in_buckets {
                        writeln!(self.out, " ")?;
                        in_buckets = true;
                    }
                    self.bucket_rows(index, address, ALLOCATED_RULE)?;
                    self.bufctl_header()?;
                }
            }
        }

        if check_overlap {
            let overlap = free_allocated_overlap(self.target.slab_cache(cache)?)?;
            writeln!(self.out, "{} bufctl(s) on both free and allocated lists", overlap.len())?;
            for bufctl in overlap {
                writeln!(self.out, "\t0x{:08x}", bufctl.value())?;
            }
        }
        Ok(())
    }

    /// The global list of arenas.
    pub fn arenas(&mut self) -> ReportResult
    {
        let head = self.target.symbol(ARENA_HEAD)?;
        let arenas = self.target.queue(QueueKind::Tailq, &head, "skmem_arena", "ar_link")?;
        for (index, arena) in (1u64..).zip(arenas) {
            let arena = arena?;
            writeln!(
                self.out,
                "{:>4}: 0x{:08x} {:<6} {:>5} KB \"{}\"",
                index,
                arena.address().value(),
                ArenaType::from(member(&arena, "ar_type")?),
                member(&arena, "ar_mapsize")? >> 10,
                member_name(&arena, "ar_name")?
            )?;
        }
        Ok(())
    }

    /// The global list of regions.
    pub fn regions(&mut self) -> ReportResult
    {
        let head = self.target.symbol(REGION_HEAD)?;
        let regions = self.target.queue(QueueKind::Tailq, &head, "skmem_region", "skr_link")?;
        for (index, region) in (1u64..).zip(regions) {
            let region = region?;
            writeln!(
                self.out,
                "{:>4}: 0x{:08x} \"{}\"",
                index,
                region.address().value(),
                member_name(&region, "skr_name")?
            )?;
        }
        Ok(())
    }

    fn segment_row(&mut self, prefix: &str, segment: Address) -> ReportResult
    {
        let segment = self.target.value(segment, "skmem_seg")?;
        writeln!(
            self.out,
            "{prefix}0x{:08x} {:<4} 0x{:08x} 0x{:08x}",
            segment.address().value(),
            member(&segment, "sg_index")?,
            member(&segment, "sg_start")?,
            member(&segment, "sg_end")?
        )?;
        Ok(())
    }

    /// Free and allocated segments of one region.
    pub fn region(&mut self, region: Address) -> ReportResult
    {
        writeln!(self.out, "{FREE_RULE}")?;
        let mut in_buckets = false;
        for item in self.target.skmem_region(region)? {
            match item? {
                RegionItem::FreeSegment(segment) => {
                    writeln!(self.out, "{:<18} {:<4} {:<18} {:<18}", "segment", "idx", "start", "end")?;
                    self.segment_row("", segment)?;
                }
                RegionItem::Bucket { index, address } => {
                    if !in_buckets {
                        writeln!(self.out, " ")?;
                        in_buckets = true;
                    }
                    self.bucket_rows(index, address, ALLOCATED_RULE)?;
                    writeln!(self.out, "\t{:<18} {:<4} {:<18} {:<18}", "segment", "idx", "start", "end")?;
                }
                RegionItem::AllocatedSegment { segment, .. } => self.segment_row("\t", segment)?,
            }
        }
        Ok(())
    }

    fn ring_row(&mut self, ring: &TypedValue<'a>) -> ReportResult
    {
        let user = ring.field("ckr_ring")?.deref()?;
        writeln!(
            self.out,
            "{:<20} \"{:<63}\" {:>#10x} | {:<5} {:<5} | {:<5} {:<5} | {:<5} {:<5}",
            format!("{:#x}", ring.address()),
            member_name(ring, "ckr_name")?,
            member(ring, "ckr_flags")?,
            member(ring, "ckr_khead")?,
            member(ring, "ckr_ktail")?,
            member(ring, "ckr_rhead")?,
            member(ring, "ckr_rtail")?,
            member(&user, "ring_head")?,
            member(&user, "ring_tail")?
        )?;
        Ok(())
    }

    /// Every ring of a channel, grouped by [`RingKind`].
    pub fn channel_rings(&mut self, channel: Address) -> ReportResult
    {
        let channel = self.target.value(channel, "kern_channel")?;
        let adapter = channel.field("ch_na")?.deref()?;
        for kind in RingKind::ALL {
            writeln!(self.out, "{kind} rings:")?;
            writeln!(
                self.out,
                "{:<20} {:<65} {:>10} | {:<5} {:<5} | {:<5} {:<5} | {:<5} {:<5}",
                "kernchannelring", "name", "flags", "kh", "kt", "rh", "rt", "h", "t"
            )?;
            // ch_last is one past the last ring.
            let first = channel.field("ch_first")?.index(kind.index())?.as_u64()?;
            let last = channel.field("ch_last")?.index(kind.index())?.as_u64()?;
            for ring in adapter.field(kind.rings_field())?.elements(first..last)? {
                self.ring_row(&ring?)?;
            }
        }
        Ok(())
    }

    /// Packets parked in a channel's user packet pool hash.
    pub fn upp_hash(&mut self, channel: Address) -> ReportResult
    {
        let buckets = self.target.hash_index(
            channel,
            &HashIndexNames {
                owner_type: "kern_channel",
                buckets: BucketCount::Fixed(KERN_CHANNEL_UPP_HTBL_SIZE),
                table: "ch_upp_hash_table",
                bucket_head: "upp_head",
                chain: QueueKind::Slist,
                elem_type: "__kern_quantum",
                link_field: "qum_upp_link",
            },
        )?;
        for item in buckets {
            match item? {
                HashIndexItem::Bucket { index, address } => writeln!(self.out, "{index:>4} 0x{:08x}", address.value())?,
                HashIndexItem::Entry { address, .. } => writeln!(self.out, "0x{:08x}", address.value())?,
            }
        }
        Ok(())
    }

    fn channel_row(&mut self, index: u64, channel: &TypedValue<'a>) -> ReportResult
    {
        let bound = |name: &str, kind: RingKind| -> WalkResult<u64> { channel.field(name)?.index(kind.index())?.as_u64() };
        let mmap = channel.field("ch_mmap")?;
        writeln!(
            self.out,
            "{:>4}: 0x{:08x} {:>4} [{:2},{:2}] [{:2},{:2}] 0x{:08x} 0x{:08x} 0x{:016x} {:>8} {:>6} 0x{:08x} {:>4} {}({})",
            index,
            channel.address().value(),
            member(channel, "ch_refcnt")?,
            bound("ch_first", RingKind::Rx)?,
            bound("ch_last", RingKind::Rx)?,
            bound("ch_first", RingKind::Tx)?,
            bound("ch_last", RingKind::Tx)?,
            member(&mmap, "ami_arena")?,
            member(&mmap, "ami_mapref")?,
            member(&mmap, "ami_mapaddr")?,
            member(&mmap, "ami_mapsize")?,
            member(&mmap, "ami_redirect")?,
            member(channel, "ch_na")?,
            channel.field("ch_fd")?.as_i64()?,
            member_name(channel, "ch_name")?,
            channel.field("ch_pid")?.as_i64()?
        )?;
        Ok(())
    }

    /// Channels opened on a nexus; channels without a nexus reference follow
    /// the others and the numbering runs on.
    pub fn nexus_channels(&mut self, nexus: Address) -> ReportResult
    {
        writeln!(
            self.out,
            "{:>4}  {:<18} {:>4} {:<7} {:<7} {:<18} {:<18} {:<18} {:>8} {:<6} {:<18} {:>4} {}",
            "", "addr", "refs", "rxrings", "txrings", "arena", "ioskmap", "mapaddr", "mapsize", "maprdr", "na", "fd", "process"
        )?;

        let nexus = self.target.value(nexus, "kern_nexus")?;
        let mut index = 1u64;
        for head in ["nx_ch_head", "nx_ch_nonxref_head"] {
            let head = nexus.field(head)?;
            for channel in self.target.queue(QueueKind::Stailq, &head, "kern_channel", "ch_link")? {
                self.channel_row(index, &channel?)?;
                index += 1;
            }
        }
        Ok(())
    }

    fn token_row(&mut self, token: &TypedValue<'a>) -> ReportResult
    {
        let flags = member(token, "nt_flags")?;
        let owner = OwnerKind::from(flags);
        let (parent_field, parent_type) = owner.parent();
        writeln!(
            self.out,
            "{:#020x} {:<5} {:<48} {:<12} {:<8} {:<38} {:<38} {:#012x}",
            token.address().value(),
            protocol_name(member(token, "nt_proto")?),
            token_address(self.target.memory(), token)?,
            member(token, "nt_port")?,
            owner,
            format!("(struct ifnet *){:#x}", member(token, "nt_ifp")?),
            format!("({parent_type} *){:#x}", member(token, parent_field)?),
            flags
        )?;
        Ok(())
    }

    /// Netns port reservations on one of the token lists.
    pub fn netns_tokens(&mut self, list: TokenList) -> ReportResult
    {
        let (head, link) = match list {
            TokenList::All => (self.target.symbol(NETNS_ALL_TOKENS)?, "nt_all_link"),
            TokenList::Unbound => {
                writeln!(self.out, "No ifp given, showing unbound tokens")?;
                (self.target.symbol(NETNS_UNBOUND_TOKENS)?, "nt_ifp_link")
            }
            TokenList::Interface(ifp) => {
                writeln!(self.out, "Showing tokens for ifp {ifp:#x}")?;
                (self.target.value(ifp, "ifnet")?.field("if_netns_tokens")?, "nt_ifp_link")
            }
        };
        writeln!(
            self.out,
            "{:<20} {:<5} {:<48} {:<12} {:<8} {:<38} {:<38} {:<12}",
            "nt", "proto", "addr", "port", "owner", "ifp", "parent", "flags"
        )?;
        for token in self.target.queue(QueueKind::Slist, &head, "ns_token", link)? {
            self.token_row(&token?)?;
        }
        Ok(())
    }

    /// The protocol namespace reservation tree, in key order.
    pub fn protons(&mut self) -> ReportResult
    {
        let head = self.target.symbol(PROTONS_TOKENS)?;
        for token in self.target.rbtree(&head, "protons_token", "pt_link")? {
            let token = token?;
            writeln!(
                self.out,
                "(struct protons_token *){:#x} protocol {:3} pid {:5} epid {:5} ref {:2} flags {:#x}",
                token.address().value(),
                member(&token, "pt_protocol")?,
                token.field("pt_pid")?.as_i64()?,
                token.field("pt_epid")?.as_i64()?,
                member(&token.field("pt_refcnt")?, "ref_count")?,
                member(&token, "pt_flags")?
            )?;
        }
        Ok(())
    }
}
