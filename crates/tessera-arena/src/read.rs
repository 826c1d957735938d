//! Read-side access: array views and the shareable store reader.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tessera_core::{ArrayValue, EntryRef, RefLayout};

use crate::generation::{GenerationGuard, GenerationHandler};
use crate::raw::ReadAccess;
use crate::store::StoreShared;

/// Read-only view of one stored array.
///
/// Elements are loaded on access. The view borrows either the store (on
/// the writer side) or a [`GenerationGuard`] (on the reader side), which
/// keeps the underlying memory alive.
#[derive(Clone, Copy)]
pub struct ArrayView<'a, T: ArrayValue> {
    cells: &'a [T::Cell],
}

impl<'a, T: ArrayValue> ArrayView<'a, T> {
    pub(crate) fn new(cells: &'a [T::Cell]) -> Self {
        Self { cells }
    }

    pub(crate) fn cells(&self) -> &'a [T::Cell] {
        self.cells
    }

    /// The view of the shared empty array.
    pub fn empty() -> Self {
        Self { cells: &[] }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the array is empty.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Element at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<T> {
        self.cells.get(index).map(|c| T::load(c, Ordering::Relaxed))
    }

    /// Iterate over the elements.
    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let cells = self.cells;
        cells.iter().map(|c| T::load(c, Ordering::Relaxed))
    }

    /// Copy the elements out.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}

impl<T: ArrayValue> PartialEq<[T]> for ArrayView<'_, T> {
    fn eq(&self, other: &[T]) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a == *b)
    }
}

impl<T: ArrayValue> fmt::Debug for ArrayView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// In-place writable view of one stored array.
///
/// Each element update is a single atomic store, so concurrent readers see
/// every element either before or after the update. Obtained only through
/// the `get_writable` escape hatch used for index remapping.
pub struct WritableArrayView<'a, T: ArrayValue> {
    cells: &'a [T::Cell],
}

impl<'a, T: ArrayValue> WritableArrayView<'a, T> {
    pub(crate) fn new(cells: &'a [T::Cell]) -> Self {
        Self { cells }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the array is empty.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Element at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<T> {
        self.cells.get(index).map(|c| T::load(c, Ordering::Relaxed))
    }

    /// Overwrite the element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set(&mut self, index: usize, value: T) {
        T::store(&self.cells[index], value, Ordering::Relaxed);
    }

    /// Read-only view of the same array.
    pub fn as_view(&self) -> ArrayView<'_, T> {
        ArrayView::new(self.cells)
    }
}

/// Shareable read handle to an [`ArrayStore`](crate::ArrayStore).
///
/// Cloneable and `Send + Sync`. Reads take a [`GenerationGuard`] from the
/// store's generation handler; everything read through a guard stays valid
/// until the guard drops.
pub struct StoreReader<T: ArrayValue> {
    shared: Arc<StoreShared<T>>,
    handler: Arc<GenerationHandler>,
    layout: RefLayout,
}

impl<T: ArrayValue> Clone for StoreReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            handler: Arc::clone(&self.handler),
            layout: self.layout,
        }
    }
}

impl<T: ArrayValue> StoreReader<T> {
    pub(crate) fn new(
        shared: Arc<StoreShared<T>>,
        handler: Arc<GenerationHandler>,
        layout: RefLayout,
    ) -> Self {
        Self {
            shared,
            handler,
            layout,
        }
    }

    /// The generation handler gating this store.
    pub fn generation_handler(&self) -> &Arc<GenerationHandler> {
        &self.handler
    }

    /// Pin the current generation.
    pub fn take_guard(&self) -> GenerationGuard<'_> {
        self.handler.take_guard()
    }

    /// Resolve `entry` under `guard`.
    ///
    /// `entry` must have been obtained (e.g. acquire-loaded from an index
    /// the writer publishes to) while `guard` was held, or otherwise not yet
    /// be reclaimed. A stale ref yields reset or unrelated values.
    ///
    /// # Panics
    ///
    /// Panics if `guard` comes from a different handler, or if `entry`
    /// points into a buffer that has been released.
    pub fn get<'a>(&'a self, guard: &'a GenerationGuard<'_>, entry: EntryRef) -> ArrayView<'a, T> {
        assert!(
            guard.belongs_to(&self.handler),
            "guard was taken from a different generation handler"
        );
        if !entry.is_valid() {
            return ArrayView::empty();
        }
        let buffer_id = self.layout.buffer_id(entry);
        let offset = self.layout.offset(entry) as usize;
        let access = ReadAccess::Reader(guard);
        let buffer = self.shared.buffers[buffer_id as usize]
            .load_with(access)
            .unwrap_or_else(|| panic!("entry ref {entry} points into released buffer {buffer_id}"));
        buffer.view(offset, access)
    }
}

impl<T: ArrayValue> fmt::Debug for StoreReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreReader")
            .field("layout", &self.layout)
            .field("handler", &self.handler)
            .finish()
    }
}

// Compile-time assertion: StoreReader must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<StoreReader<u32>>();
};
