//! # memwalk-core
//!
//! Read-only traversal of intrusive data structures in another address space.
//!
//! This crate provides the pieces a debugger macro package needs to inspect
//! kernel-style C containers from outside the program that owns them:
//! - A read-only memory accessor over core files, raw dumps or live processes
//! - Typed values built from externally supplied layouts
//! - Lazy walkers for `queue.h` lists and tail queues, `tree.h` red-black
//!   trees, cuckoo hash tables, bucketed hash indexes and slab allocators
//!
//! ## Model
//!
//! The target is never stopped, locked or written. Every read may observe a
//! structure in the middle of an update, so every walker reports failures
//! instead of trusting pointers, and every traversal is bounded by a node
//! budget from [`WalkConfig`].
//!
//! Layout comes from a [`TypeResolver`]; nothing here guesses offsets.

pub mod config;
pub mod error;
pub mod layout;
pub mod memory;
pub mod prelude;
pub mod types;
pub mod value;
pub mod walk;

// Re-export commonly used types
pub use config::WalkConfig;
pub use error::{WalkError, WalkResult};
pub use layout::{TypeRegistry, TypeResolver};
pub use memory::MemoryAccessor;
pub use types::Address;
pub use value::{Target, TypedValue};
