//! Generational array arena with lock-free reads.
//!
//! Stores variable-length arrays of a scalar element type, grouped by
//! length into size classes. One writer adds and removes arrays; any number
//! of reader threads resolve [`EntryRef`](tessera_core::EntryRef)s without
//! locking. Freed memory is recycled only once no reader can still observe
//! it, and fragmented buffers are compacted by moving their live entries.
//!
//! # Architecture
//!
//! ```text
//! ArrayStore<T> (single writer)
//! ├── TypeMapper (array length → type id; type id 0 = large arrays)
//! ├── SizeClass<T> per type id (small inline / large out-of-line)
//! ├── Arc<StoreShared> (buffer table, read by StoreReader clones)
//! │   └── Buffer<T> per buffer id (offset 0 reserved as the empty entry)
//! ├── BufferMeta per buffer id (Free / Active / Hold + dead counts)
//! ├── free lists per type id
//! └── GenerationHoldList (removed entries, old allocations, payloads)
//!
//! GenerationHandler (shared) ── GenerationGuard per reader
//! RcuVector<T> (single writer) ── RcuReader clones
//! ```
//!
//! # Maintenance cycle
//!
//! After a batch of writes the owner calls, in order:
//!
//! 1. `assign_generation(handler.current_generation())`
//! 2. `handler.inc_generation()`
//! 3. `reclaim_memory(handler.oldest_used_generation())`
//!
//! # Safety
//!
//! All `unsafe` code lives in the private `raw` module: atomically
//! swappable owned pointers whose old values are released through the
//! generation hold lists.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod allocator;
pub(crate) mod buffer;
pub(crate) mod buffer_type;
pub mod compact;
pub mod config;
pub mod error;
pub mod generation;
pub mod hold;
mod raw;
pub mod rcu;
pub mod read;
pub mod store;
pub mod type_mapper;

// Public re-exports for the primary API surface.
pub use allocator::{Allocation, HeapAllocator, HugePageAllocator, MemoryAllocator};
pub use buffer::{BufferState, BufferStats, RESERVED_ENTRIES};
pub use compact::{CompactionReport, Compactor, RefRemapper};
pub use config::{AllocSpec, ArrayStoreConfig, HugePageSpec};
pub use error::ArenaError;
pub use generation::{GenerationGuard, GenerationHandler};
pub use hold::GenerationHoldList;
pub use rcu::{GrowStrategy, RcuReader, RcuVector, RcuView};
pub use read::{ArrayView, StoreReader, WritableArrayView};
pub use store::ArrayStore;
pub use type_mapper::{TypeMapper, LARGE_ARRAY_TYPE_ID};
