//! Tessera: a generational array arena with lock-free reads.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! tessera sub-crates. For most users, adding `tessera` as a single dependency
//! is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera::prelude::*;
//!
//! let handler = Arc::new(GenerationHandler::new());
//! let config = MappingConfig::new(ArrayStoreConfig::new(TypeMapper::simple(8)));
//! let mut mapping = MultiValueMapping::<u32>::new(config, handler).unwrap();
//! mapping.ensure_size(3).unwrap();
//! mapping.set(0, &[1, 2]).unwrap();
//! mapping.set(1, &[3]).unwrap();
//!
//! // Readers pin a generation; replaced arrays outlive the view.
//! let reader = mapping.reader();
//! let view = reader.make_read_view(mapping.size());
//! let old = view.get(0);
//! mapping.set(0, &[9]).unwrap();
//! mapping.commit();
//! assert_eq!(old.to_vec(), vec![1, 2]);
//! assert_eq!(view.get(0).to_vec(), vec![9]);
//! drop(view);
//!
//! // Periodic maintenance: reclaim, then compact when due.
//! mapping.commit();
//! mapping.consider_compact(&CompactionStrategy::default()).unwrap();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tessera-core` | Entry refs, element types, generations, usage, compaction policy |
//! | [`arena`] | `tessera-arena` | Array store, generation handler, RCU vector, allocators |
//! | [`attribute`] | `tessera-attribute` | Multi-value mapping and read views |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Value types shared across the stack (`tessera-core`).
///
/// Contains [`types::EntryRef`] and its [`types::RefLayout`], the
/// [`types::ArrayValue`] element trait, and the compaction policy.
pub use tessera_core as types;

/// Array store and reclamation machinery (`tessera-arena`).
///
/// [`arena::ArrayStore`] for size-classed arrays, [`arena::GenerationHandler`]
/// for reader tracking, and [`arena::RcuVector`] for growable indices.
pub use tessera_arena as arena;

/// Identifier-indexed multi-value storage (`tessera-attribute`).
pub use tessera_attribute as attribute;

/// Common imports for typical tessera usage.
///
/// ```rust
/// use tessera::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use tessera_core::{
        AddressSpace, ArrayValue, CompactionSpec, CompactionStrategy, EntryRef, Generation,
        MemoryUsage, RefLayout, Weighted,
    };

    // Arena
    pub use tessera_arena::{
        AllocSpec, ArenaError, ArrayStore, ArrayStoreConfig, ArrayView, GenerationGuard,
        GenerationHandler, MemoryAllocator, RcuVector, StoreReader, TypeMapper,
    };

    // Attribute
    pub use tessera_attribute::{MappingConfig, MappingReadView, MappingReader, MultiValueMapping};
}
