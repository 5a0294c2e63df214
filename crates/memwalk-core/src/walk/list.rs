//! Singly linked list walker.

use std::iter::FusedIterator;

use tracing::trace;

use super::link::{LinkDescriptor, NodeBudget};
use crate::error::WalkResult;
use crate::memory::MemoryAccessor;
use crate::types::Address;

#[derive(Debug, Clone, Copy)]
enum State
{
    /// First pointer not read yet
    Head
    {
        head: Address,
        first: LinkDescriptor,
    },
    /// Node to yield next
    At(Address),
    /// Node already yielded; follow its link on the next call
    After(Address),
    Done,
}

/// Lazy walk over a null-terminated singly linked list
///
/// Yields node addresses in link order. Each call to `next` performs at most
/// one link read, so a consumer that stops early never touches the rest of
/// the list.
///
/// ## Failure
///
/// A failed read is yielded once as `Err` and the walker is exhausted from
/// then on. Nodes already yielded stay valid.
///
/// ## Cycles
///
/// The walk is bounded by its [`NodeBudget`]. With an unlimited budget a cycle
/// in the target produces an endless sequence.
///
/// ## Example
///
/// ```rust
/// use memwalk_core::memory::SparseMemory;
/// use memwalk_core::types::Address;
/// use memwalk_core::walk::{LinkDescriptor, ListWalker};
///
/// let mut image = SparseMemory::new();
/// image.map_zeroed(Address::new(0x1000), 16)?;
/// image.map_zeroed(Address::new(0x2000), 16)?;
/// image.store_u64(Address::new(0x1008), 0x2000)?;
///
/// let nodes: Vec<Address> = ListWalker::new(&image, Address::new(0x1000), LinkDescriptor::new(8))
///     .collect::<Result<_, _>>()?;
/// assert_eq!(nodes, vec![Address::new(0x1000), Address::new(0x2000)]);
/// # Ok::<(), memwalk_core::error::WalkError>(())
/// ```
#[derive(Clone)]
pub struct ListWalker<'a>
{
    memory: &'a dyn MemoryAccessor,
    next: LinkDescriptor,
    state: State,
    budget: NodeBudget,
}

impl<'a> ListWalker<'a>
{
    /// Walk starting at node `first` (null yields nothing).
    pub fn new(memory: &'a dyn MemoryAccessor, first: Address, next: LinkDescriptor) -> Self
    {
        Self {
            memory,
            next,
            state: at_or_done(first),
            budget: NodeBudget::unlimited(),
        }
    }

    /// Walk starting from a list head.
    ///
    /// The head's first pointer is read lazily, so a bad head shows up as the
    /// first item rather than at construction. A null head is an empty list.
    pub fn from_head(memory: &'a dyn MemoryAccessor, head: Address, first: LinkDescriptor, next: LinkDescriptor) -> Self
    {
        let state = if head.is_null() { State::Done } else { State::Head { head, first } };
        Self {
            memory,
            next,
            state,
            budget: NodeBudget::unlimited(),
        }
    }

    /// Bound the number of nodes this walk may visit.
    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: Option<usize>) -> Self
    {
        self.budget = NodeBudget::new(max_nodes);
        self
    }

    /// Nodes visited so far.
    pub fn visited(&self) -> usize
    {
        self.budget.used()
    }
}

fn at_or_done(node: Address) -> State
{
    if node.is_null() {
        State::Done
    } else {
        State::At(node)
    }
}

impl Iterator for ListWalker<'_>
{
    type Item = WalkResult<Address>;

    fn next(&mut self) -> Option<Self::Item>
    {
        loop {
            match std::mem::replace(&mut self.state, State::Done) {
                State::Done => return None,
                State::Head { head, first } => match first.read(self.memory, head) {
                    Ok(node) => self.state = at_or_done(node),
                    Err(err) => return Some(Err(err)),
                },
                State::At(node) => {
                    if let Err(err) = self.budget.charge(node) {
                        return Some(Err(err));
                    }
                    trace!(node = %node, "list node");
                    self.state = State::After(node);
                    return Some(Ok(node));
                }
                State::After(node) => match self.next.read(self.memory, node) {
                    Ok(next) => self.state = at_or_done(next),
                    Err(err) => return Some(Err(err)),
                },
            }
        }
    }
}

impl FusedIterator for ListWalker<'_> {}
