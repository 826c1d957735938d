//! Multi-value attribute storage over the tessera array arena.
//!
//! A [`MultiValueMapping`] maps dense `u32` identifiers (document ids) to
//! variable-length value arrays. Values live in an
//! [`ArrayStore`](tessera_arena::ArrayStore); an
//! [`RcuVector`](tessera_arena::RcuVector) of refs maps each identifier
//! to its array. Query threads read through [`MappingReader`] and
//! [`MappingReadView`] without taking locks.
//!
//! ```text
//! MultiValueMapping<T> (single writer)
//! ├── RcuVector<EntryRef>  id → ref
//! └── ArrayStore<T>        ref → values
//!
//! MappingReader<T> ── make_read_view(limit) ── MappingReadView<'_, T>
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod mapping;
pub mod read_view;

pub use config::MappingConfig;
pub use mapping::MultiValueMapping;
pub use read_view::{MappingReadView, MappingReader};
