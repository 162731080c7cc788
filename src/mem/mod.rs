//! The layered allocator stack: memory sources at the leaves, composable
//! allocator fronts above them, and two ways to make the whole stack safe
//! to share across threads.
//!
//! ```text
//! MemorySource (MallocSource, SystemSource)
//!   -> Allocate/FreeSized (blanket Allocator ext: calloc/realloc)
//!     -> ConstrainedAllocator  -- byte budget
//!     -> BlockAllocator        -- block-size rounding
//!     -> GeneralPool           -- fixed-block free list
//!       -> AtomicAllocator     -- spin-lock serialized, thread-safe
//!         -> ThreadedAllocator -- per-thread cache over a thread-safe parent
//! ```
//!
//! Every layer from [`ConstrainedAllocator`] down to [`GeneralPool`]
//! implements [`Allocate`]/[`FreeSized`] and so gets `allocate_contiguous`
//! and `reallocate` for free via the [`Allocator`] blanket impl; layers
//! compose by generic parameter, not by trait object, except at the one
//! seam ([`ThreadedAllocator`]'s parent) that must hold a heterogeneous,
//! type-erased-at-the-edge shared allocator behind an `Arc`.

mod allocator;
mod atomic;
mod block;
mod constrained;
mod pool;
mod source;
mod thread_cache;

pub use allocator::{Allocate, Allocator, FreeSized};
pub use atomic::{AtomicAllocator, AtomicAllocatorType};
pub use block::BlockAllocator;
pub use constrained::ConstrainedAllocator;
pub use pool::GeneralPool;
pub use source::{MallocSource, MemorySource, SystemSource};
pub use thread_cache::ThreadedAllocator;
