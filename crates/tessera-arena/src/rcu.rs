//! Growable vector readable concurrently with a single writer.
//!
//! Growth copies into a fresh array and publishes it atomically; the old
//! array goes on a generation hold list so readers that loaded it keep a
//! valid (if stale) snapshot. Element stores use release ordering and
//! reader loads use acquire ordering, so a reader that observes a value
//! also observes everything the writer did before storing it.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tessera_core::{ArrayValue, EntryRef, Generation, MemoryUsage};

use crate::compact::RefRemapper;
use crate::error::ArenaError;
use crate::generation::{GenerationGuard, GenerationHandler};
use crate::hold::GenerationHoldList;
use crate::raw::{AtomicBox, ReadAccess, Retired, WriterToken};

/// Capacity policy of an [`RcuVector`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GrowStrategy {
    /// Capacity of the first array.
    pub initial_capacity: usize,
    /// Fractional growth per resize.
    pub grow_factor: f64,
    /// Minimum number of slots added per resize.
    pub min_grow: usize,
}

impl GrowStrategy {
    /// Default initial capacity.
    pub const DEFAULT_INITIAL_CAPACITY: usize = 1024;

    /// Default growth factor.
    pub const DEFAULT_GROW_FACTOR: f64 = 0.5;

    /// Default minimum growth.
    pub const DEFAULT_MIN_GROW: usize = 1024;

    /// Capacity to resize to from `current` when `needed` slots are required.
    pub fn next_capacity(&self, current: usize, needed: usize) -> usize {
        let grown = current + ((current as f64 * self.grow_factor).ceil() as usize).max(self.min_grow.max(1));
        grown.max(needed)
    }

    /// Check the growth factor is usable.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if !self.grow_factor.is_finite() || self.grow_factor < 0.0 {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "grow_factor must be finite and non-negative, got {}",
                    self.grow_factor
                ),
            });
        }
        Ok(())
    }
}

impl Default for GrowStrategy {
    fn default() -> Self {
        Self {
            initial_capacity: Self::DEFAULT_INITIAL_CAPACITY,
            grow_factor: Self::DEFAULT_GROW_FACTOR,
            min_grow: Self::DEFAULT_MIN_GROW,
        }
    }
}

struct RcuArray<T: ArrayValue> {
    cells: Box<[T::Cell]>,
}

impl<T: ArrayValue> RcuArray<T> {
    fn with_capacity(capacity: usize, prefix: &[T::Cell], fill: T) -> Result<Self, ArenaError> {
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(capacity)
            .map_err(|_| ArenaError::AllocationFailed {
                requested_bytes: capacity.saturating_mul(mem::size_of::<T::Cell>()),
            })?;
        cells.extend(prefix.iter().map(|c| T::new_cell(T::load(c, Ordering::Relaxed))));
        cells.extend((prefix.len()..capacity).map(|_| T::new_cell(fill)));
        Ok(Self {
            cells: cells.into_boxed_slice(),
        })
    }

    fn byte_size(&self) -> usize {
        self.cells.len() * mem::size_of::<T::Cell>()
    }
}

struct RcuShared<T: ArrayValue> {
    array: AtomicBox<RcuArray<T>>,
    len: AtomicUsize,
    orphans: Mutex<Vec<Retired<RcuArray<T>>>>,
}

/// A vector with one writer and lock-free, guard-protected readers.
pub struct RcuVector<T: ArrayValue> {
    shared: Arc<RcuShared<T>>,
    handler: Arc<GenerationHandler>,
    grow: GrowStrategy,
    len: usize,
    holds: GenerationHoldList<Retired<RcuArray<T>>>,
    writer: WriterToken,
}

impl<T: ArrayValue> RcuVector<T> {
    /// Create an empty vector gated by `handler`.
    pub fn new(grow: GrowStrategy, handler: Arc<GenerationHandler>) -> Result<Self, ArenaError> {
        grow.validate()?;
        let array = RcuArray::with_capacity(grow.initial_capacity, &[], T::default())?;
        Ok(Self {
            shared: Arc::new(RcuShared {
                array: AtomicBox::new(Some(Box::new(array))),
                len: AtomicUsize::new(0),
                orphans: Mutex::new(Vec::new()),
            }),
            handler,
            grow,
            len: 0,
            holds: GenerationHoldList::new(),
            writer: WriterToken::new(),
        })
    }

    fn cells(&self) -> &[T::Cell] {
        self.shared
            .array
            .load_by_writer(&self.writer)
            .map_or(&[][..], |a| &a.cells[..])
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slots available before the next resize.
    pub fn capacity(&self) -> usize {
        self.cells().len()
    }

    /// Element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn get(&self, index: usize) -> T {
        assert!(index < self.len, "index {index} out of range for length {}", self.len);
        T::load(&self.cells()[index], Ordering::Relaxed)
    }

    /// Publish `value` at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn set(&mut self, index: usize, value: T) {
        assert!(index < self.len, "index {index} out of range for length {}", self.len);
        T::store(&self.cells()[index], value, Ordering::Release);
    }

    /// Append `value`.
    pub fn push(&mut self, value: T) -> Result<(), ArenaError> {
        self.reserve(self.len + 1)?;
        T::store(&self.cells()[self.len], value, Ordering::Release);
        self.len += 1;
        self.shared.len.store(self.len, Ordering::Release);
        Ok(())
    }

    /// Grow to at least `new_len` elements, filling new slots with `fill`.
    pub fn ensure_size(&mut self, new_len: usize, fill: T) -> Result<(), ArenaError> {
        if new_len <= self.len {
            return Ok(());
        }
        self.reserve(new_len)?;
        for cell in &self.cells()[self.len..new_len] {
            T::store(cell, fill, Ordering::Release);
        }
        self.len = new_len;
        self.shared.len.store(new_len, Ordering::Release);
        Ok(())
    }

    fn reserve(&mut self, needed: usize) -> Result<(), ArenaError> {
        let capacity = self.capacity();
        if needed <= capacity {
            return Ok(());
        }
        let new_capacity = self.grow.next_capacity(capacity, needed);
        let array = RcuArray::with_capacity(new_capacity, &self.cells()[..self.len], T::default())?;
        if let Some(old) = self
            .shared
            .array
            .replace(&mut self.writer, Some(Box::new(array)))
        {
            self.holds.insert(old);
        }
        tracing::trace!(old_capacity = capacity, new_capacity, "resized rcu vector");
        Ok(())
    }

    /// A read handle for other threads.
    pub fn reader(&self) -> RcuReader<T> {
        RcuReader {
            shared: Arc::clone(&self.shared),
            handler: Arc::clone(&self.handler),
        }
    }

    /// Stamp arrays replaced since the last call with `generation`.
    pub fn assign_generation(&mut self, generation: Generation) {
        let generation = generation.max(self.handler.current_generation());
        self.holds.assign_generation(generation);
    }

    /// Free replaced arrays stamped before `oldest_used`.
    pub fn reclaim_memory(&mut self, oldest_used: Generation) {
        let oldest = oldest_used.min(self.handler.oldest_used_generation());
        drop(self.holds.reclaim(oldest));
    }

    /// Memory held by the current array and by replaced arrays on hold.
    pub fn memory_usage(&self) -> MemoryUsage {
        let cell = mem::size_of::<T::Cell>();
        let held: usize = self.holds.iter().map(|a| a.get().byte_size()).sum();
        MemoryUsage::new(
            self.capacity() * cell + held,
            self.len * cell,
            0,
            held,
        )
    }
}

impl<T: ArrayValue> Drop for RcuVector<T> {
    fn drop(&mut self) {
        let held = self.holds.drain_all();
        if held.is_empty() {
            return;
        }
        self.shared
            .orphans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(held);
    }
}

impl<T: ArrayValue> fmt::Debug for RcuVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcuVector")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("held_arrays", &(self.holds.pending_len() + self.holds.held_len()))
            .finish()
    }
}

impl RefRemapper for RcuVector<EntryRef> {
    fn remap_refs(&mut self, remap: &mut dyn FnMut(EntryRef) -> EntryRef) {
        for index in 0..self.len {
            let old = self.get(index);
            let new = remap(old);
            if new != old {
                self.set(index, new);
            }
        }
    }
}

/// Shareable read handle to an [`RcuVector`].
pub struct RcuReader<T: ArrayValue> {
    shared: Arc<RcuShared<T>>,
    handler: Arc<GenerationHandler>,
}

impl<T: ArrayValue> Clone for RcuReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<T: ArrayValue> RcuReader<T> {
    /// Pin the current generation.
    pub fn take_guard(&self) -> GenerationGuard<'_> {
        self.handler.take_guard()
    }

    /// The generation handler gating the vector.
    pub fn generation_handler(&self) -> &Arc<GenerationHandler> {
        &self.handler
    }

    /// Published length.
    pub fn len(&self) -> usize {
        self.shared.len.load(Ordering::Acquire)
    }

    /// Whether nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, or `None` past the published length.
    pub fn load(&self, guard: &GenerationGuard<'_>, index: usize) -> Option<T> {
        self.view(guard, index.saturating_add(1)).get(index)
    }

    /// Snapshot of the first `min(read_size, len())` elements.
    ///
    /// # Panics
    ///
    /// Panics if `guard` comes from a different handler.
    pub fn view<'a>(&'a self, guard: &'a GenerationGuard<'_>, read_size: usize) -> RcuView<'a, T> {
        assert!(
            guard.belongs_to(&self.handler),
            "guard was taken from a different generation handler"
        );
        let len = self.len().min(read_size);
        let cells = self
            .shared
            .array
            .load_with(ReadAccess::Reader(guard))
            .map_or(&[][..], |a| &a.cells[..len]);
        RcuView { cells }
    }
}

impl<T: ArrayValue> fmt::Debug for RcuReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcuReader").field("len", &self.len()).finish()
    }
}

/// Guard-bound prefix of an [`RcuVector`].
#[derive(Clone, Copy)]
pub struct RcuView<'a, T: ArrayValue> {
    cells: &'a [T::Cell],
}

impl<'a, T: ArrayValue> RcuView<'a, T> {
    /// Number of visible elements.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Element at `index`, if visible.
    pub fn get(&self, index: usize) -> Option<T> {
        self.cells.get(index).map(|c| T::load(c, Ordering::Acquire))
    }

    /// Iterate over the visible elements.
    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let cells = self.cells;
        cells.iter().map(|c| T::load(c, Ordering::Acquire))
    }
}

// Compile-time assertion: vector and reader must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<RcuVector<EntryRef>>();
    assert::<RcuReader<EntryRef>>();
};

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> GrowStrategy {
        GrowStrategy {
            initial_capacity: 2,
            grow_factor: 0.5,
            min_grow: 1,
        }
    }

    fn vector(grow: GrowStrategy) -> RcuVector<u32> {
        RcuVector::new(grow, Arc::new(GenerationHandler::new())).unwrap()
    }

    #[test]
    fn push_and_get() {
        let mut v = vector(small());
        for i in 0..10 {
            v.push(i * 3).unwrap();
        }
        assert_eq!(v.len(), 10);
        assert!(v.capacity() >= 10);
        assert_eq!(v.get(4), 12);
        v.set(4, 99);
        assert_eq!(v.get(4), 99);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn get_past_len_panics() {
        let v = vector(small());
        v.get(0);
    }

    #[test]
    fn ensure_size_fills() {
        let mut v = vector(small());
        v.push(1).unwrap();
        v.ensure_size(5, 7).unwrap();
        assert_eq!((0..5).map(|i| v.get(i)).collect::<Vec<_>>(), vec![1, 7, 7, 7, 7]);
        v.ensure_size(3, 0).unwrap();
        assert_eq!(v.len(), 5);
    }

    #[test]
    fn next_capacity_policy() {
        let grow = GrowStrategy::default();
        assert_eq!(grow.next_capacity(1024, 1025), 2048);
        assert_eq!(grow.next_capacity(4096, 4097), 6144);
        assert_eq!(grow.next_capacity(0, 10), 1024);
        assert_eq!(grow.next_capacity(0, 5000), 5000);
    }

    #[test]
    fn rejects_bad_grow_factor() {
        let grow = GrowStrategy {
            grow_factor: f64::INFINITY,
            ..GrowStrategy::default()
        };
        assert!(RcuVector::<u32>::new(grow, Arc::new(GenerationHandler::new())).is_err());
    }

    #[test]
    fn reader_keeps_old_array_until_reclaimed() {
        let handler = Arc::new(GenerationHandler::new());
        let mut v = RcuVector::<u32>::new(small(), Arc::clone(&handler)).unwrap();
        v.push(5).unwrap();
        v.push(6).unwrap();
        let reader = v.reader();
        let guard = reader.take_guard();
        let snapshot = reader.view(&guard, usize::MAX);
        assert_eq!(snapshot.iter().collect::<Vec<_>>(), vec![5, 6]);

        v.push(7).unwrap();
        v.assign_generation(handler.current_generation());
        handler.inc_generation();
        v.reclaim_memory(handler.oldest_used_generation());
        assert!(v.memory_usage().allocated_bytes_on_hold > 0);
        assert_eq!(snapshot.get(1), Some(6));
        drop(guard);

        v.reclaim_memory(handler.oldest_used_generation());
        assert_eq!(v.memory_usage().allocated_bytes_on_hold, 0);
        let guard = reader.take_guard();
        assert_eq!(reader.load(&guard, 2), Some(7));
        assert_eq!(reader.load(&guard, 3), None);
    }

    #[test]
    fn view_is_clamped_to_read_size() {
        let mut v = vector(small());
        for i in 0..4 {
            v.push(i).unwrap();
        }
        let reader = v.reader();
        let guard = reader.take_guard();
        assert_eq!(reader.view(&guard, 2).len(), 2);
        assert_eq!(reader.view(&guard, 10).len(), 4);
    }

    #[test]
    fn remaps_entry_refs() {
        let mut v = RcuVector::<EntryRef>::new(small(), Arc::new(GenerationHandler::new())).unwrap();
        v.push(EntryRef::from_raw(3)).unwrap();
        v.push(EntryRef::NULL).unwrap();
        v.remap_refs(&mut |r| if r.is_valid() { EntryRef::from_raw(r.raw() + 1) } else { r });
        assert_eq!(v.get(0), EntryRef::from_raw(4));
        assert_eq!(v.get(1), EntryRef::NULL);
    }
}
