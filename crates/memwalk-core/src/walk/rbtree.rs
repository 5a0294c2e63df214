//! In-order walk of intrusive binary (red-black) trees.

use std::iter::FusedIterator;

use smallvec::SmallVec;
use tracing::trace;

use super::link::{LinkDescriptor, NodeBudget};
use crate::error::{WalkError, WalkResult};
use crate::layout::TypeResolver;
use crate::memory::MemoryAccessor;
use crate::types::Address;

/// Resolved layout of a tree: head root pointer plus the node child links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RbTreeLayout
{
    /// Root pointer, relative to the head
    pub root: LinkDescriptor,
    /// Left child, relative to a node
    pub left: LinkDescriptor,
    /// Right child, relative to a node
    pub right: LinkDescriptor,
}

impl RbTreeLayout
{
    /// Resolve a `tree.h` style layout (`rbh_root`, `<link>.rbe_left`, `<link>.rbe_right`).
    ///
    /// Parent pointers and colour bits are not needed for an in-order walk.
    pub fn resolve(types: &dyn TypeResolver, head_type: &str, elem_type: &str, link_field: &str) -> WalkResult<Self>
    {
        Ok(Self {
            root: LinkDescriptor::resolve(types, head_type, "rbh_root")?,
            left: LinkDescriptor::resolve(types, elem_type, &format!("{link_field}.rbe_left"))?,
            right: LinkDescriptor::resolve(types, elem_type, &format!("{link_field}.rbe_right"))?,
        })
    }

    pub fn iter<'a>(&self, memory: &'a dyn MemoryAccessor, head: Address) -> RbTreeWalker<'a>
    {
        RbTreeWalker::from_head(memory, head, self.root, self.left, self.right)
    }
}

/// Lazy in-order traversal
///
/// Visits the left subtree, yields the node, then visits the right subtree,
/// using an explicit stack. When the target's tree invariant holds the output
/// is ascending by key; the walker never compares keys itself.
///
/// A node's right child is read only after the node has been yielded, so a
/// bad right pointer still leaves the node in the consumer's hands.
///
/// Children equal to the null sentinel (host null by default, see
/// [`RbTreeWalker::with_null_sentinel`]) end a branch.
pub struct RbTreeWalker<'a>
{
    memory: &'a dyn MemoryAccessor,
    left: LinkDescriptor,
    right: LinkDescriptor,
    null: Address,
    head: Option<(Address, LinkDescriptor)>,
    descend: Option<Address>,
    pending_right: Option<Address>,
    stack: SmallVec<[Address; 32]>,
    budget: NodeBudget,
    done: bool,
}

impl<'a> RbTreeWalker<'a>
{
    /// Walk the subtree rooted at `root`.
    pub fn new(memory: &'a dyn MemoryAccessor, root: Address, left: LinkDescriptor, right: LinkDescriptor) -> Self
    {
        let mut walker = Self::empty(memory, left, right);
        walker.descend = walker.child(root);
        walker
    }

    /// Walk the tree whose root pointer lives at `head + root.offset`; a null
    /// head is an empty tree.
    pub fn from_head(
        memory: &'a dyn MemoryAccessor,
        head: Address,
        root: LinkDescriptor,
        left: LinkDescriptor,
        right: LinkDescriptor,
    ) -> Self
    {
        let mut walker = Self::empty(memory, left, right);
        walker.head = (!head.is_null()).then_some((head, root));
        walker
    }

    fn empty(memory: &'a dyn MemoryAccessor, left: LinkDescriptor, right: LinkDescriptor) -> Self
    {
        Self {
            memory,
            left,
            right,
            null: Address::ZERO,
            head: None,
            descend: None,
            pending_right: None,
            stack: SmallVec::new(),
            budget: NodeBudget::unlimited(),
            done: false,
        }
    }

    /// Treat `sentinel` as an empty child in addition to host null.
    #[must_use]
    pub fn with_null_sentinel(mut self, sentinel: Address) -> Self
    {
        self.null = sentinel;
        if self.descend == Some(sentinel) {
            self.descend = None;
        }
        self
    }

    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: Option<usize>) -> Self
    {
        self.budget = NodeBudget::new(max_nodes);
        self
    }

    fn is_null(&self, node: Address) -> bool
    {
        node.is_null() || node == self.null
    }

    fn child(&self, node: Address) -> Option<Address>
    {
        (!self.is_null(node)).then_some(node)
    }

    fn fail(&mut self, err: WalkError) -> Option<WalkResult<Address>>
    {
        self.done = true;
        self.stack.clear();
        self.descend = None;
        self.pending_right = None;
        Some(Err(err))
    }
}

impl Iterator for RbTreeWalker<'_>
{
    type Item = WalkResult<Address>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done {
            return None;
        }

        if let Some((head, root)) = self.head.take() {
            match root.read(self.memory, head) {
                Ok(node) => self.descend = self.child(node),
                Err(err) => return self.fail(err),
            }
        }

        if let Some(node) = self.pending_right.take() {
            match self.right.read(self.memory, node) {
                Ok(child) => self.descend = self.child(child),
                Err(err) => return self.fail(err),
            }
        }

        while let Some(node) = self.descend.take() {
            if let Err(err) = self.budget.charge(node) {
                return self.fail(err);
            }
            self.stack.push(node);
            match self.left.read(self.memory, node) {
                Ok(child) => self.descend = self.child(child),
                Err(err) => return self.fail(err),
            }
        }

        match self.stack.pop() {
            Some(node) => {
                trace!(node = %node, depth = self.stack.len(), "tree node");
                self.pending_right = Some(node);
                Some(Ok(node))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl FusedIterator for RbTreeWalker<'_> {}
