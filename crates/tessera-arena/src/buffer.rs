//! Buffers and their bookkeeping.
//!
//! A buffer is one allocation holding the entries of a single size class.
//! The store keeps a [`BufferMeta`] per buffer id on the writer side; the
//! buffer itself is published to readers through the store's buffer table.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tessera_core::ArrayValue;

use crate::allocator::{Allocation, MemoryAllocator};
use crate::buffer_type::LargeArray;
use crate::raw::{AtomicBox, ReadAccess};
use crate::read::ArrayView;

/// Entries at the front of every buffer that are never handed out.
///
/// Offset 0 holds the empty value, so a zero offset never names a live entry.
pub const RESERVED_ENTRIES: usize = 1;

/// Lifecycle state of a buffer id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// No allocation; the id may be handed to any class.
    Free,
    /// Accepting or holding live entries.
    Active,
    /// Compacted away; waiting for readers to drain.
    Hold,
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("free"),
            Self::Active => f.write_str("active"),
            Self::Hold => f.write_str("hold"),
        }
    }
}

/// Snapshot of one buffer's bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferStats {
    /// Lifecycle state.
    pub state: BufferState,
    /// Size class of the entries.
    pub type_id: u32,
    /// Entries the allocation can hold.
    pub capacity: usize,
    /// Entries handed out so far, including the reserved ones.
    pub used_entries: usize,
    /// Entries removed and not yet reused.
    pub dead_entries: usize,
    /// Dead entries still waiting on the generation barrier.
    pub hold_entries: usize,
    /// Out-of-line bytes owned by entries.
    pub extra_used_bytes: usize,
    /// Out-of-line bytes owned by held entries.
    pub extra_hold_bytes: usize,
    /// Selected by a compaction that has not finished.
    pub compacting: bool,
}

/// Writer-side bookkeeping of one buffer id.
#[derive(Clone, Debug)]
pub(crate) struct BufferMeta {
    pub(crate) state: BufferState,
    pub(crate) type_id: u32,
    pub(crate) capacity: usize,
    pub(crate) used_entries: usize,
    pub(crate) dead_entries: usize,
    pub(crate) hold_entries: usize,
    pub(crate) extra_used_bytes: usize,
    pub(crate) extra_hold_bytes: usize,
    pub(crate) compacting: bool,
}

impl BufferMeta {
    pub(crate) fn free() -> Self {
        Self {
            state: BufferState::Free,
            type_id: 0,
            capacity: 0,
            used_entries: 0,
            dead_entries: 0,
            hold_entries: 0,
            extra_used_bytes: 0,
            extra_hold_bytes: 0,
            compacting: false,
        }
    }

    pub(crate) fn active(type_id: u32, capacity: usize) -> Self {
        Self {
            state: BufferState::Active,
            type_id,
            capacity,
            used_entries: RESERVED_ENTRIES,
            ..Self::free()
        }
    }

    pub(crate) fn has_room(&self) -> bool {
        self.used_entries < self.capacity
    }

    pub(crate) fn stats(&self) -> BufferStats {
        BufferStats {
            state: self.state,
            type_id: self.type_id,
            capacity: self.capacity,
            used_entries: self.used_entries,
            dead_entries: self.dead_entries,
            hold_entries: self.hold_entries,
            extra_used_bytes: self.extra_used_bytes,
            extra_hold_bytes: self.extra_hold_bytes,
            compacting: self.compacting,
        }
    }
}

/// Entry storage of a buffer.
pub(crate) enum BufferData<T: ArrayValue> {
    /// `array_size` cells per entry, plus a length per entry for dynamic classes.
    Small {
        cells: Box<[T::Cell]>,
        lens: Option<Box<[AtomicU32]>>,
        array_size: usize,
    },
    /// One payload pointer per entry.
    Large {
        slots: Box<[AtomicBox<LargeArray<T>>]>,
    },
}

/// One allocation of a size class.
pub(crate) struct Buffer<T: ArrayValue> {
    type_id: u32,
    capacity: usize,
    data: BufferData<T>,
    allocation: Allocation,
    allocator: Arc<dyn MemoryAllocator>,
}

impl<T: ArrayValue> Buffer<T> {
    pub(crate) fn new(
        type_id: u32,
        capacity: usize,
        data: BufferData<T>,
        allocation: Allocation,
        allocator: Arc<dyn MemoryAllocator>,
    ) -> Self {
        Self {
            type_id,
            capacity,
            data,
            allocation,
            allocator,
        }
    }

    pub(crate) fn type_id(&self) -> u32 {
        self.type_id
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn data(&self) -> &BufferData<T> {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut BufferData<T> {
        &mut self.data
    }

    /// Bytes granted for the entry storage.
    pub(crate) fn byte_size(&self) -> usize {
        self.allocation.size()
    }

    /// The array at `offset`.
    pub(crate) fn view<'a>(&'a self, offset: usize, access: ReadAccess<'a>) -> ArrayView<'a, T> {
        match &self.data {
            BufferData::Small {
                cells,
                lens,
                array_size,
            } => {
                let start = offset * array_size;
                let len = match lens {
                    Some(lens) => (lens[offset].load(Ordering::Relaxed) as usize).min(*array_size),
                    None => *array_size,
                };
                ArrayView::new(&cells[start..start + len])
            }
            BufferData::Large { slots } => slots[offset]
                .load_with(access)
                .map_or_else(ArrayView::empty, |payload| ArrayView::new(payload.cells())),
        }
    }

    /// Write `values` into the inline entry at `offset`.
    ///
    /// # Panics
    ///
    /// Panics on a large-array buffer.
    pub(crate) fn write_small(&self, offset: usize, values: &[T]) {
        let BufferData::Small {
            cells,
            lens,
            array_size,
        } = &self.data
        else {
            panic!("inline write into large-array buffer of type id {}", self.type_id);
        };
        debug_assert!(values.len() <= *array_size);
        debug_assert!(lens.is_some() || values.len() == *array_size);
        let start = offset * array_size;
        for (cell, &v) in cells[start..start + values.len()].iter().zip(values) {
            T::store(cell, v, Ordering::Relaxed);
        }
        if let Some(lens) = lens {
            lens[offset].store(values.len() as u32, Ordering::Relaxed);
        }
    }

    /// Copy the inline entry at `src_offset` of `src` to `offset`.
    pub(crate) fn copy_small_from(&self, offset: usize, src: &Buffer<T>, src_offset: usize) {
        if let (
            BufferData::Small {
                cells, lens, array_size,
            },
            BufferData::Small {
                cells: src_cells,
                lens: src_lens,
                ..
            },
        ) = (&self.data, &src.data)
        {
            let dst = &cells[offset * array_size..(offset + 1) * array_size];
            let from = &src_cells[src_offset * array_size..(src_offset + 1) * array_size];
            for (d, s) in dst.iter().zip(from) {
                T::store(d, T::load(s, Ordering::Relaxed), Ordering::Relaxed);
            }
            if let (Some(lens), Some(src_lens)) = (lens, src_lens) {
                lens[offset].store(src_lens[src_offset].load(Ordering::Relaxed), Ordering::Relaxed);
            }
        }
    }

    /// Payload slot of the large-array entry at `offset`.
    ///
    /// # Panics
    ///
    /// Panics on an inline buffer.
    pub(crate) fn large_slot(&self, offset: usize) -> &AtomicBox<LargeArray<T>> {
        match &self.data {
            BufferData::Large { slots } => &slots[offset],
            BufferData::Small { .. } => {
                panic!("payload access into inline buffer of type id {}", self.type_id)
            }
        }
    }
}

impl<T: ArrayValue> Drop for Buffer<T> {
    fn drop(&mut self) {
        self.allocator.release(self.allocation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeapAllocator;
    use crate::buffer_type::SizeClass;
    use crate::raw::WriterToken;
    use crate::type_mapper::TypeMapper;

    fn small_buffer(mapper: &TypeMapper, type_id: u32) -> Buffer<u32> {
        SizeClass::<u32>::new(mapper, type_id, Arc::new(HeapAllocator::new()))
            .allocate_buffer(type_id, 8, 64)
            .unwrap()
    }

    #[test]
    fn active_meta_counts_reserved_entry() {
        let meta = BufferMeta::active(3, 16);
        assert_eq!(meta.used_entries, RESERVED_ENTRIES);
        assert!(meta.has_room());
        assert_eq!(meta.stats().state, BufferState::Active);
        assert_eq!(BufferMeta::free().stats().state, BufferState::Free);
    }

    #[test]
    fn reserved_entry_reads_default() {
        let mapper = TypeMapper::simple(4);
        let buffer = small_buffer(&mapper, 3);
        let writer = WriterToken::new();
        assert_eq!(buffer.view(0, ReadAccess::Writer(&writer)).to_vec(), vec![0, 0, 0]);
    }

    #[test]
    fn fixed_class_write_then_view() {
        let mapper = TypeMapper::simple(4);
        let buffer = small_buffer(&mapper, 2);
        let writer = WriterToken::new();
        buffer.write_small(1, &[10, 20]);
        assert_eq!(buffer.view(1, ReadAccess::Writer(&writer)).to_vec(), vec![10, 20]);
    }

    #[test]
    fn dynamic_class_records_length() {
        let mapper = TypeMapper::dynamic(10, 2.0, 64).unwrap();
        let type_id = mapper.type_id(5);
        assert!(mapper.is_dynamic(type_id));
        let buffer = small_buffer(&mapper, type_id);
        let writer = WriterToken::new();
        buffer.write_small(1, &[1, 2, 3, 4, 5]);
        assert_eq!(
            buffer.view(1, ReadAccess::Writer(&writer)).to_vec(),
            vec![1, 2, 3, 4, 5]
        );
        let other = small_buffer(&mapper, type_id);
        other.copy_small_from(2, &buffer, 1);
        assert_eq!(other.view(2, ReadAccess::Writer(&writer)).len(), 5);
    }

    #[test]
    fn state_display() {
        assert_eq!(BufferState::Hold.to_string(), "hold");
    }
}
