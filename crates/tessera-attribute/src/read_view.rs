//! Reader handles and guard-owning read views of a mapping.

use std::fmt;

use tessera_arena::{ArrayView, GenerationGuard, RcuReader, StoreReader};
use tessera_core::{ArrayValue, EntryRef, Generation};

/// Shareable read handle to a [`MultiValueMapping`](crate::MultiValueMapping).
pub struct MappingReader<T: ArrayValue> {
    store: StoreReader<T>,
    indices: RcuReader<EntryRef>,
}

impl<T: ArrayValue> Clone for MappingReader<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            indices: self.indices.clone(),
        }
    }
}

impl<T: ArrayValue> MappingReader<T> {
    pub(crate) fn new(store: StoreReader<T>, indices: RcuReader<EntryRef>) -> Self {
        Self { store, indices }
    }

    /// Number of identifiers published so far.
    pub fn size(&self) -> usize {
        self.indices.len()
    }

    /// Pin the current generation and expose the first
    /// `min(read_size, size())` identifiers.
    ///
    /// Everything reachable through the view stays valid until it drops.
    /// Callers pass their committed identifier limit as `read_size` so
    /// identifiers still being populated are out of reach.
    pub fn make_read_view(&self, read_size: usize) -> MappingReadView<'_, T> {
        let guard = self.indices.take_guard();
        let limit = self.indices.view(&guard, read_size).len();
        MappingReadView {
            reader: self,
            guard,
            limit,
        }
    }
}

impl<T: ArrayValue> fmt::Debug for MappingReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingReader")
            .field("size", &self.size())
            .finish()
    }
}

/// Consistent snapshot of a bounded identifier range.
///
/// Owns a generation guard; arrays returned by [`get`](Self::get) borrow
/// the view and cannot outlive it.
pub struct MappingReadView<'a, T: ArrayValue> {
    reader: &'a MappingReader<T>,
    guard: GenerationGuard<'a>,
    limit: usize,
}

impl<'a, T: ArrayValue> MappingReadView<'a, T> {
    /// Number of identifiers visible through this view.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Values of `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id >= limit()`.
    pub fn get(&self, id: u32) -> ArrayView<'_, T> {
        let limit = self.limit;
        assert!(
            (id as usize) < limit,
            "id {id} out of range for read view of size {limit}"
        );
        self.load(id)
    }

    /// Values of `id`, or `None` past the limit.
    pub fn try_get(&self, id: u32) -> Option<ArrayView<'_, T>> {
        ((id as usize) < self.limit).then(|| self.load(id))
    }

    /// Values behind a ref obtained from the mapping.
    pub fn get_by_ref(&self, entry: EntryRef) -> ArrayView<'_, T> {
        self.reader.store.get(&self.guard, entry)
    }

    /// Generation pinned by this view.
    pub fn generation(&self) -> Generation {
        self.guard.generation()
    }

    fn load(&self, id: u32) -> ArrayView<'_, T> {
        let entry = self
            .reader
            .indices
            .load(&self.guard, id as usize)
            .unwrap_or(EntryRef::NULL);
        self.get_by_ref(entry)
    }
}

impl<T: ArrayValue> fmt::Debug for MappingReadView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingReadView")
            .field("limit", &self.limit)
            .field("generation", &self.guard.generation())
            .finish()
    }
}

// Compile-time assertion: readers are shared across threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<MappingReader<u32>>();
};
