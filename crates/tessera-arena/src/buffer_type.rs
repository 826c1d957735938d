//! Per-class buffer behavior.
//!
//! A [`BufferType`] knows how the entries of one size class are laid out:
//! how many slots an entry spans, how reserved entries are initialized, how
//! a held entry is cleaned before reuse, and how entries are copied when a
//! buffer is grown.

use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tessera_core::ArrayValue;

use crate::allocator::{Allocation, MemoryAllocator};
use crate::buffer::{Buffer, BufferData, RESERVED_ENTRIES};
use crate::error::ArenaError;
use crate::raw::{AtomicBox, ReadAccess, Retired, WriterToken};
use crate::read::ArrayView;
use crate::type_mapper::{TypeMapper, LARGE_ARRAY_TYPE_ID};

/// Out-of-line payload of one large-array entry.
pub(crate) struct LargeArray<T: ArrayValue> {
    cells: Box<[T::Cell]>,
    allocation: Allocation,
    allocator: Arc<dyn MemoryAllocator>,
}

impl<T: ArrayValue> LargeArray<T> {
    pub(crate) fn cells(&self) -> &[T::Cell] {
        &self.cells
    }

    /// Bytes granted for this payload.
    pub(crate) fn byte_size(&self) -> usize {
        self.allocation.size()
    }
}

impl<T: ArrayValue> Drop for LargeArray<T> {
    fn drop(&mut self) {
        self.allocator.release(self.allocation);
    }
}

/// Results of cleaning held entries.
pub(crate) struct CleanContext<T: ArrayValue> {
    /// Out-of-line bytes the cleaned entries owned.
    pub(crate) extra_bytes_cleaned: usize,
    /// Payloads unlinked from their slots; readers may still hold them.
    pub(crate) detached: Vec<Retired<LargeArray<T>>>,
}

impl<T: ArrayValue> CleanContext<T> {
    pub(crate) fn new() -> Self {
        Self {
            extra_bytes_cleaned: 0,
            detached: Vec::new(),
        }
    }
}

/// Layout and lifecycle of entries in one size class.
pub(crate) trait BufferType<T: ArrayValue> {
    /// Storage unit of the class.
    type Slot;

    /// Slots one entry spans.
    fn entry_slots(&self) -> usize;

    /// Bytes one entry accounts for.
    fn entry_bytes(&self) -> usize;

    /// Put the reserved entries at the front of a fresh buffer into their
    /// empty state.
    fn initialize_reserved_entries(&self, slots: &mut [Self::Slot]);

    /// Release whatever the entries own. Returns the bytes released.
    fn destroy_entries(&self, slots: &mut [Self::Slot]) -> usize;

    /// Reset one held entry so it can be reused.
    fn clean_hold(&self, slots: &[Self::Slot], ctx: &mut CleanContext<T>, writer: &mut WriterToken);

    /// Copy entries into a freshly allocated buffer.
    fn fallback_copy(
        &self,
        dst: &mut [Self::Slot],
        src: &[Self::Slot],
        access: ReadAccess<'_>,
    ) -> Result<(), ArenaError>;

    /// Allocator backing this class.
    fn memory_allocator(&self) -> &Arc<dyn MemoryAllocator>;
}

/// Inline arrays of a fixed size.
pub(crate) struct SmallArrayBufferType<T: ArrayValue> {
    array_size: usize,
    dynamic: bool,
    allocator: Arc<dyn MemoryAllocator>,
    _values: PhantomData<fn() -> T>,
}

impl<T: ArrayValue> BufferType<T> for SmallArrayBufferType<T> {
    type Slot = T::Cell;

    fn entry_slots(&self) -> usize {
        self.array_size
    }

    fn entry_bytes(&self) -> usize {
        let elems = self.array_size * mem::size_of::<T::Cell>();
        if self.dynamic {
            elems + mem::size_of::<u32>()
        } else {
            elems
        }
    }

    fn initialize_reserved_entries(&self, slots: &mut [T::Cell]) {
        for cell in slots {
            T::store(cell, T::default(), Ordering::Relaxed);
        }
    }

    fn destroy_entries(&self, _slots: &mut [T::Cell]) -> usize {
        0
    }

    fn clean_hold(&self, slots: &[T::Cell], _ctx: &mut CleanContext<T>, _writer: &mut WriterToken) {
        for cell in slots {
            T::store(cell, T::default(), Ordering::Relaxed);
        }
    }

    fn fallback_copy(
        &self,
        dst: &mut [T::Cell],
        src: &[T::Cell],
        _access: ReadAccess<'_>,
    ) -> Result<(), ArenaError> {
        for (d, s) in dst.iter_mut().zip(src) {
            T::store(d, T::load(s, Ordering::Relaxed), Ordering::Relaxed);
        }
        Ok(())
    }

    fn memory_allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }
}

/// Arrays too long for any inline class, each in its own allocation.
pub(crate) struct LargeArrayBufferType<T: ArrayValue> {
    allocator: Arc<dyn MemoryAllocator>,
    _values: PhantomData<fn() -> T>,
}

impl<T: ArrayValue> LargeArrayBufferType<T> {
    /// Allocate a payload holding `values`.
    pub(crate) fn allocate_array(
        &self,
        values: impl ExactSizeIterator<Item = T>,
    ) -> Result<LargeArray<T>, ArenaError> {
        let len = values.len();
        let bytes = len.saturating_mul(mem::size_of::<T::Cell>());
        let allocation = self
            .allocator
            .allocate(bytes, mem::align_of::<T::Cell>())?;
        let cells = match try_collect(len, values.map(T::new_cell)) {
            Ok(cells) => cells,
            Err(e) => {
                self.allocator.release(allocation);
                return Err(e);
            }
        };
        Ok(LargeArray {
            cells,
            allocation,
            allocator: Arc::clone(&self.allocator),
        })
    }
}

impl<T: ArrayValue> BufferType<T> for LargeArrayBufferType<T> {
    type Slot = AtomicBox<LargeArray<T>>;

    fn entry_slots(&self) -> usize {
        1
    }

    fn entry_bytes(&self) -> usize {
        mem::size_of::<usize>()
    }

    fn initialize_reserved_entries(&self, _slots: &mut [Self::Slot]) {}

    fn destroy_entries(&self, slots: &mut [Self::Slot]) -> usize {
        slots
            .iter_mut()
            .filter_map(AtomicBox::take)
            .map(|payload| payload.byte_size())
            .sum()
    }

    fn clean_hold(&self, slots: &[Self::Slot], ctx: &mut CleanContext<T>, writer: &mut WriterToken) {
        for slot in slots {
            if let Some(old) = slot.replace(writer, None) {
                ctx.extra_bytes_cleaned += old.get().byte_size();
                ctx.detached.push(old);
            }
        }
    }

    fn fallback_copy(
        &self,
        dst: &mut [Self::Slot],
        src: &[Self::Slot],
        access: ReadAccess<'_>,
    ) -> Result<(), ArenaError> {
        for (d, s) in dst.iter_mut().zip(src) {
            let copy = match s.load_with(access) {
                Some(payload) => {
                    let values = payload.cells().iter().map(|c| T::load(c, Ordering::Relaxed));
                    Some(Box::new(self.allocate_array(values)?))
                }
                None => None,
            };
            *d = AtomicBox::new(copy);
        }
        Ok(())
    }

    fn memory_allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }
}

/// Buffer type of one type id.
pub(crate) enum SizeClass<T: ArrayValue> {
    Small(SmallArrayBufferType<T>),
    Large(LargeArrayBufferType<T>),
}

impl<T: ArrayValue> SizeClass<T> {
    pub(crate) fn new(mapper: &TypeMapper, type_id: u32, allocator: Arc<dyn MemoryAllocator>) -> Self {
        if type_id == LARGE_ARRAY_TYPE_ID {
            Self::Large(LargeArrayBufferType {
                allocator,
                _values: PhantomData,
            })
        } else {
            Self::Small(SmallArrayBufferType {
                array_size: mapper.array_size(type_id),
                dynamic: mapper.is_dynamic(type_id),
                allocator,
                _values: PhantomData,
            })
        }
    }

    pub(crate) fn entry_bytes(&self) -> usize {
        match self {
            Self::Small(t) => t.entry_bytes(),
            Self::Large(t) => t.entry_bytes(),
        }
    }

    pub(crate) fn memory_allocator(&self) -> &Arc<dyn MemoryAllocator> {
        match self {
            Self::Small(t) => t.memory_allocator(),
            Self::Large(t) => t.memory_allocator(),
        }
    }

    /// Allocate a buffer of at least `wanted` entries (at most `max`).
    pub(crate) fn allocate_buffer(
        &self,
        type_id: u32,
        wanted: usize,
        max: usize,
    ) -> Result<Buffer<T>, ArenaError> {
        let entry_bytes = self.entry_bytes();
        let requested = wanted
            .checked_mul(entry_bytes)
            .ok_or(ArenaError::AllocationFailed {
                requested_bytes: usize::MAX,
            })?;
        let allocator = self.memory_allocator();
        let allocation = allocator.allocate(requested, mem::align_of::<T::Cell>())?;
        let capacity = (allocation.size() / entry_bytes.max(1)).clamp(wanted, max.max(wanted));
        let data = match self.allocate_data(capacity) {
            Ok(data) => data,
            Err(e) => {
                allocator.release(allocation);
                tracing::warn!(type_id, capacity, "buffer allocation failed");
                return Err(e);
            }
        };
        Ok(Buffer::new(
            type_id,
            capacity,
            data,
            allocation,
            Arc::clone(allocator),
        ))
    }

    fn allocate_data(&self, capacity: usize) -> Result<BufferData<T>, ArenaError> {
        match self {
            Self::Small(t) => {
                let slots = capacity * t.entry_slots();
                let mut cells =
                    try_collect(slots, (0..slots).map(|_| T::new_cell(T::default())))?;
                t.initialize_reserved_entries(&mut cells[..RESERVED_ENTRIES * t.entry_slots()]);
                let lens = if t.dynamic {
                    Some(try_collect(capacity, (0..capacity).map(|_| AtomicU32::new(0)))?)
                } else {
                    None
                };
                Ok(BufferData::Small {
                    cells,
                    lens,
                    array_size: t.array_size,
                })
            }
            Self::Large(t) => {
                let mut slots = try_collect(capacity, (0..capacity).map(|_| AtomicBox::empty()))?;
                t.initialize_reserved_entries(&mut slots[..RESERVED_ENTRIES]);
                Ok(BufferData::Large { slots })
            }
        }
    }

    /// Allocate a larger buffer and copy the first `used` entries of `old`.
    pub(crate) fn grow_buffer(
        &self,
        old: &Buffer<T>,
        used: usize,
        wanted: usize,
        max: usize,
        access: ReadAccess<'_>,
    ) -> Result<Buffer<T>, ArenaError> {
        let mut grown = self.allocate_buffer(old.type_id(), wanted, max)?;
        match (self, grown.data_mut(), old.data()) {
            (
                Self::Small(t),
                BufferData::Small { cells, lens, .. },
                BufferData::Small {
                    cells: old_cells,
                    lens: old_lens,
                    ..
                },
            ) => {
                let range = RESERVED_ENTRIES * t.array_size..used * t.array_size;
                t.fallback_copy(&mut cells[range.clone()], &old_cells[range], access)?;
                if let (Some(lens), Some(old_lens)) = (lens, old_lens) {
                    for (d, s) in lens[..used].iter_mut().zip(&old_lens[..used]) {
                        *d.get_mut() = s.load(Ordering::Relaxed);
                    }
                }
            }
            (Self::Large(t), BufferData::Large { slots }, BufferData::Large { slots: old_slots }) => {
                t.fallback_copy(
                    &mut slots[RESERVED_ENTRIES..used],
                    &old_slots[RESERVED_ENTRIES..used],
                    access,
                )?;
            }
            _ => unreachable!("buffer layout does not match its size class"),
        }
        Ok(grown)
    }

    /// Reset the entry at `offset` of `buffer`.
    pub(crate) fn clean_entry(
        &self,
        buffer: &Buffer<T>,
        offset: usize,
        ctx: &mut CleanContext<T>,
        writer: &mut WriterToken,
    ) {
        match (self, buffer.data()) {
            (Self::Small(t), BufferData::Small { cells, lens, array_size }) => {
                let start = offset * array_size;
                t.clean_hold(&cells[start..start + array_size], ctx, writer);
                if let Some(lens) = lens {
                    lens[offset].store(0, Ordering::Relaxed);
                }
            }
            (Self::Large(t), BufferData::Large { slots }) => {
                t.clean_hold(&slots[offset..offset + t.entry_slots()], ctx, writer);
            }
            _ => unreachable!("buffer layout does not match its size class"),
        }
    }

    /// Release everything the entries of `buffer` own. Returns the bytes released.
    pub(crate) fn destroy_buffer(&self, buffer: &mut Buffer<T>) -> usize {
        match (self, buffer.data_mut()) {
            (Self::Small(t), BufferData::Small { cells, .. }) => t.destroy_entries(cells),
            (Self::Large(t), BufferData::Large { slots }) => t.destroy_entries(slots),
            _ => unreachable!("buffer layout does not match its size class"),
        }
    }

    /// Deep copy of a large array, for moving it during compaction.
    pub(crate) fn copy_large(&self, values: ArrayView<'_, T>) -> Result<Option<LargeArray<T>>, ArenaError> {
        match self {
            Self::Large(t) => {
                let copied: Vec<T> = values.to_vec();
                t.allocate_array(copied.into_iter()).map(Some)
            }
            Self::Small(_) => Ok(None),
        }
    }
}

/// Collect `len` items into a boxed slice, reporting reservation failure
/// instead of aborting.
fn try_collect<C>(len: usize, items: impl Iterator<Item = C>) -> Result<Box<[C]>, ArenaError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| ArenaError::AllocationFailed {
            requested_bytes: len.saturating_mul(mem::size_of::<C>()),
        })?;
    v.extend(items.take(len));
    Ok(v.into_boxed_slice())
}
