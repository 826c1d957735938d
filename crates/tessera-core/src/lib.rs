//! Core types for the tessera generational array arena.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! value types shared by the store and its owners: entry references and
//! their bit layout, element cells, generations, memory and address-space
//! accounting, and the compaction policy.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod compaction;
pub mod entry_ref;
pub mod error;
pub mod generation;
pub mod stats;
pub mod value;

pub use compaction::{CompactionSpec, CompactionStrategy};
pub use entry_ref::{EntryRef, RefLayout};
pub use error::LayoutError;
pub use generation::Generation;
pub use stats::{AddressSpace, MemoryUsage};
pub use value::{ArrayValue, Weighted};
