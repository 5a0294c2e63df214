//! Queue heads with optional tail pointers (BSD `queue.h` and friends).

use super::link::LinkDescriptor;
use super::list::ListWalker;
use crate::error::{WalkError, WalkResult};
use crate::layout::{FieldKind, TypeResolver};
use crate::memory::MemoryAccessor;
use crate::types::Address;

/// The four `queue.h` shapes
///
/// Each names the head's first/last members and the entry's next member, so
/// a caller only has to say which entry field embeds the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind
{
    /// `LIST_HEAD` / `LIST_ENTRY`: doubly linked, head-only
    List,
    /// `SLIST_HEAD` / `SLIST_ENTRY`: singly linked, head-only
    Slist,
    /// `STAILQ_HEAD` / `STAILQ_ENTRY`: singly linked with tail pointer
    Stailq,
    /// `TAILQ_HEAD` / `TAILQ_ENTRY`: doubly linked with tail pointer
    Tailq,
}

impl QueueKind
{
    pub const fn first_field(self) -> &'static str
    {
        match self {
            QueueKind::List => "lh_first",
            QueueKind::Slist => "slh_first",
            QueueKind::Stailq => "stqh_first",
            QueueKind::Tailq => "tqh_first",
        }
    }

    pub const fn last_field(self) -> Option<&'static str>
    {
        match self {
            QueueKind::List | QueueKind::Slist => None,
            QueueKind::Stailq => Some("stqh_last"),
            QueueKind::Tailq => Some("tqh_last"),
        }
    }

    pub const fn next_field(self) -> &'static str
    {
        match self {
            QueueKind::List => "le_next",
            QueueKind::Slist => "sle_next",
            QueueKind::Stailq => "stqe_next",
            QueueKind::Tailq => "tqe_next",
        }
    }
}

/// What a head's tail pointer points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailConvention
{
    /// The last element itself (null when empty)
    Element,
    /// The last element's next slot, or the head's first slot when empty
    /// (`queue.h` `tqh_last` / `stqh_last`)
    LinkSlot,
}

/// Resolved layout of a queue: head members plus the entry link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLayout
{
    /// First pointer, relative to the head
    pub first: LinkDescriptor,
    /// Tail pointer, relative to the head
    pub last: Option<LinkDescriptor>,
    /// Next pointer, relative to an element
    pub next: LinkDescriptor,
    pub convention: TailConvention,
}

/// Snapshot of a queue head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueHead
{
    pub head: Address,
    /// First element, null if empty
    pub first: Address,
    /// Last element when the layout has a tail pointer and the queue is non-empty
    pub last: Option<Address>,
}

impl QueueLayout
{
    /// Head-only singly linked layout.
    pub const fn list(first: LinkDescriptor, next: LinkDescriptor) -> Self
    {
        Self {
            first,
            last: None,
            next,
            convention: TailConvention::Element,
        }
    }

    /// Layout with a tail pointer.
    pub const fn with_tail(first: LinkDescriptor, last: LinkDescriptor, next: LinkDescriptor, convention: TailConvention) -> Self
    {
        Self {
            first,
            last: Some(last),
            next,
            convention,
        }
    }

    /// Resolve a `queue.h` layout by member names.
    ///
    /// `link_field` is the entry member that embeds the link (`sl_link`,
    /// `bc_link`, ...).
    pub fn resolve(
        types: &dyn TypeResolver,
        kind: QueueKind,
        head_type: &str,
        elem_type: &str,
        link_field: &str,
    ) -> WalkResult<Self>
    {
        let first = LinkDescriptor::resolve(types, head_type, kind.first_field())?;
        let next = LinkDescriptor::resolve(types, elem_type, &format!("{link_field}.{}", kind.next_field()))?;
        match kind.last_field() {
            Some(last_field) => {
                let last = LinkDescriptor::resolve(types, head_type, last_field)?;
                Ok(Self::with_tail(first, last, next, TailConvention::LinkSlot))
            }
            None => Ok(Self::list(first, next)),
        }
    }

    /// Resolve a queue whose head is embedded at `head_member` inside `owner_type`.
    ///
    /// The head offsets are shifted so the layout is relative to the owner:
    /// `iter(memory, cache)` instead of `iter(memory, cache + offset)`.
    pub fn resolve_member(
        types: &dyn TypeResolver,
        kind: QueueKind,
        owner_type: &str,
        head_member: &str,
        elem_type: &str,
        link_field: &str,
    ) -> WalkResult<Self>
    {
        let member = types.resolve_path(owner_type, head_member)?;
        let head_type = match &member.field.kind {
            FieldKind::Struct { type_name } => type_name.clone(),
            other => {
                return Err(WalkError::TypeMismatch {
                    expected: format!("queue head struct at `{owner_type}.{head_member}`"),
                    found: other.describe(),
                })
            }
        };
        Ok(Self::resolve(types, kind, &head_type, elem_type, link_field)?.shifted(member.offset))
    }

    /// Same layout with head members moved by `offset` bytes.
    #[must_use]
    pub fn shifted(mut self, offset: u64) -> Self
    {
        self.first.offset = self.first.offset.wrapping_add(offset);
        if let Some(last) = self.last.as_mut() {
            last.offset = last.offset.wrapping_add(offset);
        }
        self
    }

    /// Read the head: first element and, when available, the last one.
    ///
    /// This is the O(1) access to the tail; forward iteration never needs it.
    pub fn read_head(&self, memory: &dyn MemoryAccessor, head: Address) -> WalkResult<QueueHead>
    {
        if head.is_null() {
            return Ok(QueueHead {
                head,
                first: Address::ZERO,
                last: None,
            });
        }
        let first = self.first.read(memory, head)?;
        let last = match self.last {
            None => None,
            Some(_) if first.is_null() => None,
            Some(last_link) => {
                let raw = last_link.read(memory, head)?;
                match self.convention {
                    TailConvention::Element => (!raw.is_null()).then_some(raw),
                    TailConvention::LinkSlot => {
                        if raw.is_null() || raw == self.first.slot(head) {
                            None
                        } else {
                            raw.checked_sub(self.next.offset)
                        }
                    }
                }
            }
        };
        Ok(QueueHead { head, first, last })
    }

    /// Lazy forward walk over the queue's elements.
    pub fn iter<'a>(&self, memory: &'a dyn MemoryAccessor, head: Address) -> ListWalker<'a>
    {
        ListWalker::from_head(memory, head, self.first, self.next)
    }
}
