//! Common module for library exports

pub use crate::config::WalkConfig;
pub use crate::error::{WalkError, WalkResult};
pub use crate::layout::{Field, FieldKind, TypeDescriptor, TypeRegistry, TypeResolver};
pub use crate::memory::{CachedMemory, MemoryAccessor, PointerWidth, Scalar, SparseMemory};
pub use crate::types::Address;
pub use crate::value::{Target, TypedValue};
pub use crate::walk::{CacheItem, QueueKind, RegionItem, SlabList};
