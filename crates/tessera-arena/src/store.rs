//! The array store: size-classed buffers addressed by [`EntryRef`].
//!
//! One writer owns the [`ArrayStore`]; any number of readers resolve refs
//! through cloned [`StoreReader`]s while holding a generation guard. Memory
//! that readers could still reach is never freed directly: removed entries,
//! detached payloads, replaced allocations and compacted buffers go on a
//! generation hold list and are released by [`ArrayStore::reclaim_memory`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use smallvec::SmallVec;
use tessera_core::{
    AddressSpace, ArrayValue, CompactionSpec, CompactionStrategy, EntryRef, Generation,
    MemoryUsage, RefLayout,
};

use crate::allocator::MemoryAllocator;
use crate::buffer::{Buffer, BufferData, BufferMeta, BufferState, BufferStats, RESERVED_ENTRIES};
use crate::buffer_type::{CleanContext, LargeArray, SizeClass};
use crate::compact::{buffer_limit, select_worst, Candidate, CompactionReport, Compactor, RefRemapper};
use crate::config::ArrayStoreConfig;
use crate::error::ArenaError;
use crate::generation::GenerationHandler;
use crate::hold::GenerationHoldList;
use crate::raw::{AtomicBox, ReadAccess, Retired, WriterToken};
use crate::read::{ArrayView, StoreReader, WritableArrayView};
use crate::type_mapper::LARGE_ARRAY_TYPE_ID;

/// State shared between the store and its readers.
pub(crate) struct StoreShared<T: ArrayValue> {
    pub(crate) buffers: Box<[AtomicBox<Buffer<T>>]>,
    /// Held items left over when the store dropped before its readers.
    orphans: Mutex<Vec<Held<T>>>,
}

/// Something waiting on the generation barrier.
pub(crate) enum Held<T: ArrayValue> {
    /// A removed entry; cleaned and recycled on reclaim.
    Entry(EntryRef),
    /// A compacted buffer; unlinked on reclaim.
    Buffer(u32),
    /// An allocation unlinked from the buffer table.
    Allocation(Retired<Buffer<T>>),
    /// A large-array payload unlinked from its entry.
    Payload(Retired<LargeArray<T>>),
}

impl<T: ArrayValue> Held<T> {
    fn retained_bytes(&self) -> usize {
        match self {
            Self::Allocation(buffer) => buffer.get().byte_size(),
            Self::Payload(payload) => payload.get().byte_size(),
            Self::Entry(_) | Self::Buffer(_) => 0,
        }
    }
}

/// Writer-side load of a buffer that must be linked.
fn linked_buffer<'a, T: ArrayValue>(
    shared: &'a StoreShared<T>,
    writer: &'a WriterToken,
    buffer_id: u32,
) -> &'a Buffer<T> {
    shared.buffers[buffer_id as usize]
        .load_by_writer(writer)
        .unwrap_or_else(|| panic!("buffer {buffer_id} is not allocated"))
}

/// Variable-length arrays of `T`, grouped into size-classed buffers.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tessera_arena::{ArrayStore, ArrayStoreConfig, GenerationHandler};
///
/// let handler = Arc::new(GenerationHandler::new());
/// let mut store = ArrayStore::<u32>::new(ArrayStoreConfig::default(), handler).unwrap();
/// let r = store.add(&[3, 1, 4]).unwrap();
/// assert_eq!(store.get(r).to_vec(), vec![3, 1, 4]);
/// ```
pub struct ArrayStore<T: ArrayValue> {
    shared: Arc<StoreShared<T>>,
    handler: Arc<GenerationHandler>,
    config: ArrayStoreConfig,
    classes: Vec<SizeClass<T>>,
    primary: Vec<Option<u32>>,
    metas: Vec<BufferMeta>,
    free_lists: Vec<Vec<EntryRef>>,
    /// Dead entries of compacting buffers, off the free lists until the
    /// compaction finishes or aborts.
    parked_free: Vec<EntryRef>,
    /// Removes of live entries in compacting buffers, replayed on abort.
    deferred_removes: Vec<EntryRef>,
    holds: GenerationHoldList<Held<T>>,
    table_writer: WriterToken,
    payload_writer: WriterToken,
    compaction_spec: CompactionSpec,
    initializing: bool,
}

impl<T: ArrayValue> ArrayStore<T> {
    /// Create an empty store gated by `handler`.
    pub fn new(config: ArrayStoreConfig, handler: Arc<GenerationHandler>) -> Result<Self, ArenaError> {
        config.validate()?;
        let type_count = config.type_mapper.max_type_id() as usize + 1;
        let classes = (0..type_count as u32)
            .map(|type_id| SizeClass::new(&config.type_mapper, type_id, Arc::clone(&config.allocator)))
            .collect();
        let buffers = (0..config.max_buffers).map(|_| AtomicBox::empty()).collect();
        tracing::debug!(
            max_type_id = type_count - 1,
            max_buffers = config.max_buffers,
            offset_bits = config.layout.offset_bits(),
            "created array store"
        );
        Ok(Self {
            shared: Arc::new(StoreShared {
                buffers,
                orphans: Mutex::new(Vec::new()),
            }),
            handler,
            classes,
            primary: vec![None; type_count],
            metas: Vec::new(),
            free_lists: vec![Vec::new(); type_count],
            parked_free: Vec::new(),
            deferred_removes: Vec::new(),
            holds: GenerationHoldList::new(),
            table_writer: WriterToken::new(),
            payload_writer: WriterToken::new(),
            compaction_spec: CompactionSpec::default(),
            initializing: false,
            config,
        })
    }

    /// The store's configuration.
    pub fn config(&self) -> &ArrayStoreConfig {
        &self.config
    }

    /// Bit split of the refs this store hands out.
    pub fn layout(&self) -> RefLayout {
        self.config.layout
    }

    /// The generation handler gating reclamation.
    pub fn generation_handler(&self) -> &Arc<GenerationHandler> {
        &self.handler
    }

    /// A read handle for other threads.
    pub fn reader(&self) -> StoreReader<T> {
        StoreReader::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.handler),
            self.config.layout,
        )
    }

    /// Allocator serving `type_id`.
    ///
    /// # Panics
    ///
    /// Panics if `type_id` exceeds the mapper's largest type id.
    pub fn memory_allocator(&self, type_id: u32) -> &Arc<dyn MemoryAllocator> {
        self.classes[type_id as usize].memory_allocator()
    }

    /// Size class `entry` belongs to; `None` for the null ref.
    pub fn type_id_of(&self, entry: EntryRef) -> Option<u32> {
        if !entry.is_valid() {
            return None;
        }
        let buffer_id = self.config.layout.buffer_id(entry);
        self.metas
            .get(buffer_id as usize)
            .map(|meta| meta.type_id)
    }

    /// Store a copy of `values`. The empty array maps to [`EntryRef::NULL`]
    /// without allocating.
    pub fn add(&mut self, values: &[T]) -> Result<EntryRef, ArenaError> {
        if values.is_empty() {
            return Ok(EntryRef::NULL);
        }
        let type_id = self.config.type_mapper.type_id(values.len());
        let payload = match &self.classes[type_id as usize] {
            SizeClass::Large(large) => Some(large.allocate_array(values.iter().copied())?),
            SizeClass::Small(_) => None,
        };
        let entry = self.reserve_entry(type_id)?;
        match payload {
            Some(payload) => self.install_payload(entry, payload),
            None => {
                let (buffer_id, offset) = self.decode(entry);
                linked_buffer(&self.shared, &self.table_writer, buffer_id).write_small(offset, values);
            }
        }
        Ok(entry)
    }

    /// Writer-side read of `entry`.
    ///
    /// # Panics
    ///
    /// Panics if `entry` points into a released buffer.
    pub fn get(&self, entry: EntryRef) -> ArrayView<'_, T> {
        if !entry.is_valid() {
            return ArrayView::empty();
        }
        let (buffer_id, offset) = self.decode(entry);
        linked_buffer(&self.shared, &self.table_writer, buffer_id)
            .view(offset, ReadAccess::Writer(&self.payload_writer))
    }

    /// In-place mutable view of `entry`.
    ///
    /// Concurrent readers may observe a mix of old and new elements; use
    /// only where that is acceptable, such as remapping enum indices.
    pub fn get_writable(&mut self, entry: EntryRef) -> WritableArrayView<'_, T> {
        WritableArrayView::new(self.get(entry).cells())
    }

    /// Drop `entry`. Its memory is recycled once no reader can observe it.
    ///
    /// Removing the null ref, or an entry of a buffer on hold, does
    /// nothing. Removing an entry of a buffer under compaction takes effect
    /// only if the compaction is aborted; otherwise the memory goes with
    /// the buffer.
    pub fn remove(&mut self, entry: EntryRef) {
        if !entry.is_valid() {
            return;
        }
        let (buffer_id, offset) = self.decode(entry);
        let meta = &mut self.metas[buffer_id as usize];
        if meta.state != BufferState::Active {
            return;
        }
        if meta.compacting {
            self.deferred_removes.push(entry);
            return;
        }
        debug_assert!(offset >= RESERVED_ENTRIES && offset < meta.used_entries);
        meta.dead_entries += 1;
        meta.hold_entries += 1;
        if meta.type_id == LARGE_ARRAY_TYPE_ID {
            let bytes = linked_buffer(&self.shared, &self.table_writer, buffer_id)
                .large_slot(offset)
                .load_by_writer(&self.payload_writer)
                .map_or(0, LargeArray::byte_size);
            meta.extra_hold_bytes += bytes;
        }
        if self.initializing {
            self.reclaim_entry(entry);
        } else {
            self.holds.insert(Held::Entry(entry));
        }
    }

    /// Switch bulk-load mode. While initializing, removed entries are
    /// recycled immediately instead of waiting on the generation barrier;
    /// no reader may be active.
    pub fn set_initializing(&mut self, initializing: bool) {
        self.initializing = initializing;
    }

    /// Stamp everything retired since the last call with `generation`.
    ///
    /// The stamp is clamped to the handler's current generation so it
    /// never runs behind readers that pinned a newer one.
    pub fn assign_generation(&mut self, generation: Generation) {
        let generation = generation.max(self.handler.current_generation());
        self.holds.assign_generation(generation);
    }

    /// Release everything stamped before `oldest_used`.
    ///
    /// The bound is clamped to the handler's oldest pinned generation.
    pub fn reclaim_memory(&mut self, oldest_used: Generation) {
        let oldest = oldest_used.min(self.handler.oldest_used_generation());
        let items = self.holds.reclaim(oldest);
        if items.is_empty() {
            return;
        }
        let count = items.len();
        for item in items {
            match item {
                Held::Entry(entry) => self.reclaim_entry(entry),
                Held::Buffer(buffer_id) => self.release_buffer(buffer_id),
                Held::Allocation(buffer) => self.destroy_allocation(buffer),
                Held::Payload(payload) => drop(payload),
            }
        }
        tracing::trace!(reclaimed = count, oldest_used = %oldest, "reclaimed held memory");
    }

    /// Memory accounting over every buffer and held allocation.
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::default();
        for meta in &self.metas {
            let entry_bytes = self.classes[meta.type_id as usize].entry_bytes();
            match meta.state {
                BufferState::Free => {}
                BufferState::Active => {
                    usage.allocated_bytes += meta.capacity * entry_bytes + meta.extra_used_bytes;
                    usage.used_bytes += meta.used_entries * entry_bytes + meta.extra_used_bytes;
                    usage.dead_bytes += meta.dead_entries * entry_bytes + meta.extra_hold_bytes;
                    usage.allocated_bytes_on_hold +=
                        meta.hold_entries * entry_bytes + meta.extra_hold_bytes;
                }
                BufferState::Hold => {
                    let bytes = meta.capacity * entry_bytes + meta.extra_used_bytes;
                    usage.allocated_bytes += bytes;
                    usage.allocated_bytes_on_hold += bytes;
                }
            }
        }
        for held in self.holds.iter() {
            let bytes = held.retained_bytes();
            usage.allocated_bytes += bytes;
            usage.allocated_bytes_on_hold += bytes;
        }
        usage
    }

    /// Entry-ref address space in use.
    ///
    /// Buffers on hold still occupy their ids, so their entries count as
    /// used but not dead.
    pub fn address_space_usage(&self) -> AddressSpace {
        let (used, dead) = self
            .metas
            .iter()
            .fold((0, 0), |(used, dead), meta| match meta.state {
                BufferState::Free => (used, dead),
                BufferState::Active => (used + meta.used_entries, dead + meta.dead_entries),
                BufferState::Hold => (used + meta.used_entries, dead),
            });
        let limit = self.config.max_buffers as usize * self.config.layout.offset_size();
        AddressSpace::new(used, dead, limit)
    }

    /// Recompute memory and address-space usage and decide which
    /// compactions are due.
    pub fn update_stat(&mut self, strategy: &CompactionStrategy) -> MemoryUsage {
        let usage = self.memory_usage();
        let address_space = self.address_space_usage();
        self.compaction_spec = strategy.should_compact(&usage, &address_space);
        usage
    }

    /// Compaction decision from the last [`update_stat`](Self::update_stat).
    pub fn compaction_spec(&self) -> CompactionSpec {
        self.compaction_spec
    }

    /// Refresh stats and, if due, compact the worst buffers.
    pub fn consider_compact<R: RefRemapper + ?Sized>(
        &mut self,
        strategy: &CompactionStrategy,
        refs: &mut R,
    ) -> Result<bool, ArenaError> {
        self.update_stat(strategy);
        if !self.compaction_spec.compact() {
            return Ok(false);
        }
        self.compact_worst(strategy, refs)?;
        Ok(true)
    }

    /// Compact the worst buffers, moving every entry `refs` points into
    /// them and rewriting `refs` in place.
    ///
    /// `refs` must reach every live entry of the store. On failure the pass
    /// is rolled back: refs already rewritten point at valid copies and the
    /// rest still point at their originals.
    pub fn compact_worst<R: RefRemapper + ?Sized>(
        &mut self,
        strategy: &CompactionStrategy,
        refs: &mut R,
    ) -> Result<CompactionReport, ArenaError> {
        let Some(mut compactor) = self.start_compact_worst(strategy) else {
            return Ok(CompactionReport::default());
        };
        let mut failure = None;
        refs.remap_refs(&mut |entry| {
            if failure.is_some() {
                return entry;
            }
            match compactor.move_entry(self, entry) {
                Ok(moved) => moved,
                Err(e) => {
                    failure = Some(e);
                    entry
                }
            }
        });
        match failure {
            Some(e) => {
                self.abort_compact(compactor);
                Err(e)
            }
            None => Ok(self.finish_compact(compactor)),
        }
    }

    /// Select the worst buffers for the due compaction reasons and mark
    /// them as compacting. Returns `None` when nothing qualifies.
    ///
    /// With no reason flagged by [`update_stat`](Self::update_stat), both
    /// reasons are considered.
    pub fn start_compact_worst(&mut self, strategy: &CompactionStrategy) -> Option<Compactor> {
        let spec = if self.compaction_spec.compact() {
            self.compaction_spec
        } else {
            CompactionSpec::new(true, true)
        };
        let mut by_memory = Vec::new();
        let mut by_address_space = Vec::new();
        for (buffer_id, meta) in self.metas.iter().enumerate() {
            if meta.state != BufferState::Active || meta.compacting {
                continue;
            }
            let entry_bytes = self.classes[meta.type_id as usize].entry_bytes();
            by_memory.push(Candidate {
                buffer_id: buffer_id as u32,
                used: meta.used_entries * entry_bytes + meta.extra_used_bytes,
                dead: meta.dead_entries * entry_bytes + meta.extra_hold_bytes,
            });
            by_address_space.push(Candidate {
                buffer_id: buffer_id as u32,
                used: meta.used_entries,
                dead: meta.dead_entries,
            });
        }
        let limit = buffer_limit(
            by_memory.len(),
            self.free_buffer_count(),
            strategy.max_buffers(),
            strategy.active_buffers_ratio(),
        );
        let mut selected: SmallVec<[u32; 4]> = SmallVec::new();
        if spec.compact_memory() {
            selected.extend(select_worst(
                by_memory,
                limit,
                strategy.max_dead_bytes_ratio(),
                strategy.dead_bytes_slack(),
            ));
        }
        if spec.compact_address_space() {
            let worst = select_worst(
                by_address_space,
                limit,
                strategy.max_dead_address_space_ratio(),
                strategy.dead_address_space_slack(),
            );
            for buffer_id in worst {
                if !selected.contains(&buffer_id) {
                    selected.push(buffer_id);
                }
            }
        }
        if selected.is_empty() {
            tracing::debug!(%strategy, "no buffer qualifies for compaction");
            return None;
        }
        let layout = self.config.layout;
        for &buffer_id in &selected {
            let meta = &mut self.metas[buffer_id as usize];
            meta.compacting = true;
            let type_id = meta.type_id as usize;
            if self.primary[type_id] == Some(buffer_id) {
                self.primary[type_id] = None;
            }
            let (parked, kept): (Vec<EntryRef>, Vec<EntryRef>) =
                std::mem::take(&mut self.free_lists[type_id])
                    .into_iter()
                    .partition(|r| layout.buffer_id(*r) == buffer_id);
            self.free_lists[type_id] = kept;
            self.parked_free.extend(parked);
        }
        tracing::info!(buffers = ?selected.as_slice(), %strategy, "compacting worst buffers");
        Some(Compactor::new(layout, selected))
    }

    /// Put the compacted buffers on hold.
    ///
    /// Every live entry of those buffers must have been moved; refs still
    /// pointing into them dangle once the hold is reclaimed.
    pub fn finish_compact(&mut self, compactor: Compactor) -> CompactionReport {
        let (buffers, moved, _) = compactor.into_parts();
        // Parked entries and deferred removes go with the buffers.
        self.take_parked(&buffers);
        for &buffer_id in &buffers {
            let meta = &mut self.metas[buffer_id as usize];
            meta.state = BufferState::Hold;
            meta.compacting = false;
            self.holds.insert(Held::Buffer(buffer_id));
        }
        let report = CompactionReport {
            moved_entries: moved.values().sum(),
            buffers: moved,
        };
        tracing::debug!(
            buffers = report.buffers.len(),
            moved = report.moved_entries,
            "finished compaction"
        );
        report
    }

    /// Return the selected buffers to service. Copies made so far are kept
    /// and their originals removed, so refs rewritten before the abort stay
    /// valid.
    ///
    /// Dead entries parked when the compaction started go back on the free
    /// lists, and removes skipped while it ran are applied.
    pub fn abort_compact(&mut self, compactor: Compactor) {
        let (buffers, _, moved_from) = compactor.into_parts();
        for &buffer_id in &buffers {
            self.metas[buffer_id as usize].compacting = false;
        }
        let (restored, removes) = self.take_parked(&buffers);
        let restored_count = restored.len();
        for entry in restored {
            let type_id = self.metas[self.config.layout.buffer_id(entry) as usize].type_id;
            self.free_lists[type_id as usize].push(entry);
        }
        let replayed = removes.len();
        for entry in removes.into_iter().chain(moved_from) {
            self.remove(entry);
        }
        tracing::warn!(
            buffers = ?buffers.as_slice(),
            restored = restored_count,
            replayed,
            "aborted compaction"
        );
    }

    /// Split off the parked free entries and deferred removes of `buffers`.
    fn take_parked(&mut self, buffers: &[u32]) -> (Vec<EntryRef>, Vec<EntryRef>) {
        let layout = self.config.layout;
        let in_buffers = |r: &EntryRef| buffers.contains(&layout.buffer_id(*r));
        let (free, parked_rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.parked_free).into_iter().partition(in_buffers);
        let (removes, removes_rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.deferred_removes).into_iter().partition(in_buffers);
        self.parked_free = parked_rest;
        self.deferred_removes = removes_rest;
        (free, removes)
    }

    /// Copy `entry` into a buffer that is not being compacted.
    pub(crate) fn move_entry(&mut self, entry: EntryRef) -> Result<EntryRef, ArenaError> {
        let (buffer_id, offset) = self.decode(entry);
        let type_id = self.metas[buffer_id as usize].type_id;
        let payload = self.classes[type_id as usize].copy_large(self.get(entry))?;
        let moved = self.reserve_entry(type_id)?;
        match payload {
            Some(payload) => self.install_payload(moved, payload),
            None => {
                let (to_buffer, to_offset) = self.decode(moved);
                let src = linked_buffer(&self.shared, &self.table_writer, buffer_id);
                let dst = linked_buffer(&self.shared, &self.table_writer, to_buffer);
                dst.copy_small_from(to_offset, src, offset);
            }
        }
        Ok(moved)
    }

    /// Bookkeeping snapshot of `buffer_id`.
    pub fn buffer_stats(&self, buffer_id: u32) -> Option<BufferStats> {
        self.metas.get(buffer_id as usize).map(BufferMeta::stats)
    }

    /// Buffer ids that have ever been used.
    pub fn buffer_ids(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.metas.len() as u32).filter(|&id| self.metas[id as usize].state != BufferState::Free)
    }

    /// Entries waiting for reuse in the free list of `type_id`.
    pub fn free_list_len(&self, type_id: u32) -> usize {
        self.free_lists[type_id as usize].len()
    }

    /// Items retired and not yet reclaimed.
    pub fn held_items(&self) -> usize {
        self.holds.pending_len() + self.holds.held_len()
    }

    fn decode(&self, entry: EntryRef) -> (u32, usize) {
        let layout = self.config.layout;
        (layout.buffer_id(entry), layout.offset(entry) as usize)
    }

    fn free_buffer_count(&self) -> usize {
        let unused = self.config.max_buffers as usize - self.metas.len();
        unused
            + self
                .metas
                .iter()
                .filter(|m| m.state == BufferState::Free)
                .count()
    }

    fn install_payload(&mut self, entry: EntryRef, payload: LargeArray<T>) {
        let (buffer_id, offset) = self.decode(entry);
        let bytes = payload.byte_size();
        let buffer = linked_buffer(&self.shared, &self.table_writer, buffer_id);
        if let Some(old) = buffer
            .large_slot(offset)
            .replace(&mut self.payload_writer, Some(Box::new(payload)))
        {
            self.holds.insert(Held::Payload(old));
        }
        self.metas[buffer_id as usize].extra_used_bytes += bytes;
    }

    fn reserve_entry(&mut self, type_id: u32) -> Result<EntryRef, ArenaError> {
        if self.config.enable_free_lists {
            if let Some(entry) = self.free_lists[type_id as usize].pop() {
                let (buffer_id, _) = self.decode(entry);
                self.metas[buffer_id as usize].dead_entries -= 1;
                return Ok(entry);
            }
        }
        let buffer_id = self.ensure_primary_room(type_id)?;
        let meta = &mut self.metas[buffer_id as usize];
        let offset = meta.used_entries;
        meta.used_entries += 1;
        Ok(self.config.layout.make(buffer_id, offset as u32))
    }

    fn ensure_primary_room(&mut self, type_id: u32) -> Result<u32, ArenaError> {
        let spec = self.config.specs[type_id as usize];
        if let Some(buffer_id) = self.primary[type_id as usize] {
            let meta = &self.metas[buffer_id as usize];
            if meta.has_room() {
                return Ok(buffer_id);
            }
            if meta.capacity < spec.num_entries_for_new_buffer
                && meta.capacity < spec.max_entries_in_buffer
            {
                self.grow_buffer(buffer_id)?;
                return Ok(buffer_id);
            }
        }
        self.switch_primary(type_id)
    }

    fn grow_buffer(&mut self, buffer_id: u32) -> Result<(), ArenaError> {
        let meta = &self.metas[buffer_id as usize];
        let type_id = meta.type_id;
        let spec = self.config.specs[type_id as usize];
        let old_capacity = meta.capacity;
        let wanted = spec.entries_to_alloc(meta.used_entries, 1, true);
        let grown = self.classes[type_id as usize].grow_buffer(
            linked_buffer(&self.shared, &self.table_writer, buffer_id),
            meta.used_entries,
            wanted,
            spec.max_entries_in_buffer,
            ReadAccess::Writer(&self.payload_writer),
        )?;
        let capacity = grown.capacity();
        let extra_bytes: usize = match grown.data() {
            BufferData::Large { slots } => slots
                .iter()
                .filter_map(|s| s.load_by_writer(&self.payload_writer))
                .map(LargeArray::byte_size)
                .sum(),
            BufferData::Small { .. } => 0,
        };
        if let Some(old) = self.shared.buffers[buffer_id as usize]
            .replace(&mut self.table_writer, Some(Box::new(grown)))
        {
            self.holds.insert(Held::Allocation(old));
        }
        let meta = &mut self.metas[buffer_id as usize];
        meta.capacity = capacity;
        // Payloads were deep-copied; the originals go with the held allocation.
        meta.extra_used_bytes = extra_bytes;
        tracing::debug!(buffer_id, type_id, old_capacity, capacity, "grew buffer in place");
        Ok(())
    }

    fn switch_primary(&mut self, type_id: u32) -> Result<u32, ArenaError> {
        let buffer_id = self
            .take_free_buffer_id()
            .ok_or(ArenaError::AddressSpaceExhausted {
                type_id,
                max_buffers: self.config.max_buffers,
            })?;
        let spec = self.config.specs[type_id as usize];
        let wanted = spec.entries_to_alloc(0, RESERVED_ENTRIES + 1, false);
        let buffer = self.classes[type_id as usize].allocate_buffer(
            type_id,
            wanted,
            spec.max_entries_in_buffer,
        )?;
        let capacity = buffer.capacity();
        if let Some(old) = self.shared.buffers[buffer_id as usize]
            .replace(&mut self.table_writer, Some(Box::new(buffer)))
        {
            self.holds.insert(Held::Allocation(old));
        }
        self.metas[buffer_id as usize] = BufferMeta::active(type_id, capacity);
        let previous = self.primary[type_id as usize].replace(buffer_id);
        tracing::debug!(type_id, buffer_id, ?previous, capacity, "switched primary buffer");
        Ok(buffer_id)
    }

    fn take_free_buffer_id(&mut self) -> Option<u32> {
        if let Some(id) = self.metas.iter().position(|m| m.state == BufferState::Free) {
            return Some(id as u32);
        }
        if self.metas.len() < self.config.max_buffers as usize {
            self.metas.push(BufferMeta::free());
            return Some(self.metas.len() as u32 - 1);
        }
        None
    }

    fn reclaim_entry(&mut self, entry: EntryRef) {
        let (buffer_id, offset) = self.decode(entry);
        let meta = &mut self.metas[buffer_id as usize];
        meta.hold_entries -= 1;
        if meta.state != BufferState::Active {
            return;
        }
        let type_id = meta.type_id;
        let compacting = meta.compacting;
        let mut ctx = CleanContext::new();
        self.classes[type_id as usize].clean_entry(
            linked_buffer(&self.shared, &self.table_writer, buffer_id),
            offset,
            &mut ctx,
            &mut self.payload_writer,
        );
        let meta = &mut self.metas[buffer_id as usize];
        meta.extra_used_bytes -= ctx.extra_bytes_cleaned;
        meta.extra_hold_bytes -= ctx.extra_bytes_cleaned;
        for payload in ctx.detached {
            if self.initializing {
                drop(payload);
            } else {
                self.holds.insert(Held::Payload(payload));
            }
        }
        if !self.config.enable_free_lists {
            return;
        }
        if compacting {
            self.parked_free.push(entry);
        } else {
            self.free_lists[type_id as usize].push(entry);
        }
    }

    fn release_buffer(&mut self, buffer_id: u32) {
        if let Some(allocation) = self.shared.buffers[buffer_id as usize].replace(&mut self.table_writer, None) {
            self.holds.insert(Held::Allocation(allocation));
        }
        self.metas[buffer_id as usize] = BufferMeta::free();
        tracing::debug!(buffer_id, "released compacted buffer");
    }

    fn destroy_allocation(&self, allocation: Retired<Buffer<T>>) {
        let mut buffer = allocation.into_box();
        let class = &self.classes[buffer.type_id() as usize];
        class.destroy_buffer(&mut buffer);
    }
}

impl<T: ArrayValue> Drop for ArrayStore<T> {
    fn drop(&mut self) {
        let items = self.holds.drain_all();
        if items.is_empty() {
            return;
        }
        self.shared
            .orphans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(items);
    }
}

impl<T: ArrayValue> fmt::Debug for ArrayStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayStore")
            .field("layout", &self.config.layout)
            .field("buffers", &self.buffer_ids().count())
            .field("held_items", &self.held_items())
            .field("initializing", &self.initializing)
            .finish_non_exhaustive()
    }
}

// Compile-time assertion: ArrayStore must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<ArrayStore<u32>>();
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocSpec;
    use crate::type_mapper::TypeMapper;

    fn small_store() -> ArrayStore<u32> {
        let spec = AllocSpec {
            min_entries_in_buffer: 4,
            max_entries_in_buffer: 16,
            num_entries_for_new_buffer: 8,
            grow_factor: 0.5,
        };
        let config = ArrayStoreConfig::new(TypeMapper::simple(4)).with_spec(spec);
        ArrayStore::new(config, Arc::new(GenerationHandler::new())).unwrap()
    }

    fn commit(store: &mut ArrayStore<u32>) {
        let handler = Arc::clone(store.generation_handler());
        store.assign_generation(handler.current_generation());
        handler.inc_generation();
        store.reclaim_memory(handler.oldest_used_generation());
    }

    /// Per-buffer counters agree with the free lists and the live refs.
    fn check_bookkeeping(store: &ArrayStore<u32>, refs: &[EntryRef]) {
        let mut free_by_type = vec![0usize; store.free_lists.len()];
        let mut live = 0;
        for meta in store.metas.iter().filter(|m| m.state == BufferState::Active) {
            assert!(!meta.compacting);
            assert!(meta.hold_entries <= meta.dead_entries);
            assert!(meta.dead_entries + RESERVED_ENTRIES <= meta.used_entries);
            assert!(meta.used_entries <= meta.capacity);
            free_by_type[meta.type_id as usize] += meta.dead_entries - meta.hold_entries;
            live += meta.used_entries - RESERVED_ENTRIES - meta.dead_entries;
        }
        for (type_id, expected) in free_by_type.iter().enumerate() {
            assert_eq!(store.free_list_len(type_id as u32), *expected, "type id {type_id}");
        }
        assert_eq!(refs.iter().filter(|r| r.is_valid()).count(), live);
        assert!(store.parked_free.is_empty());
        assert!(store.deferred_removes.is_empty());
    }

    #[test]
    fn removal_is_held_until_commit() {
        let mut store = small_store();
        let r = store.add(&[1, 2, 3]).unwrap();
        store.remove(r);
        let type_id = store.type_id_of(r).unwrap();
        assert_eq!(store.free_list_len(type_id), 0);
        assert_eq!(store.held_items(), 1);
        commit(&mut store);
        assert_eq!(store.free_list_len(type_id), 1);
        assert_eq!(store.add(&[4, 5, 6]).unwrap(), r);
        check_bookkeeping(&store, &[r]);
    }

    #[test]
    fn removing_in_hold_buffer_is_ignored() {
        let mut store = small_store();
        let mut refs: Vec<_> = (0..6u32).map(|i| store.add(&[i, i]).unwrap()).collect();
        store.remove(refs[0]);
        refs[0] = EntryRef::NULL;
        commit(&mut store);
        let old = refs[1];
        let strategy = CompactionStrategy::compact_all_active_buffers();
        store.compact_worst(&strategy, &mut refs).unwrap();
        let (buffer_id, _) = store.decode(old);
        assert_eq!(store.metas[buffer_id as usize].state, BufferState::Hold);
        store.remove(old);
        assert!(store.deferred_removes.is_empty());
        assert_eq!(store.metas[buffer_id as usize].hold_entries, 0);
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use tessera_test_utils::ReferenceModel;

        const SLOTS: usize = 16;

        #[derive(Clone, Debug)]
        enum Op {
            Set(usize, Vec<u32>),
            Remove(usize),
            Commit,
            Compact,
            AbortCompact(usize),
        }

        fn arb_op() -> impl Strategy<Value = Op> {
            let values = prop::collection::vec(any::<u32>(), 0..10);
            prop_oneof![
                5 => (0..SLOTS, values).prop_map(|(slot, v)| Op::Set(slot, v)),
                2 => (0..SLOTS).prop_map(Op::Remove),
                2 => Just(Op::Commit),
                1 => Just(Op::Compact),
                1 => (0..SLOTS).prop_map(Op::AbortCompact),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn bookkeeping_matches_model(ops in prop::collection::vec(arb_op(), 1..200)) {
                let mut store = small_store();
                let mut refs = vec![EntryRef::NULL; SLOTS];
                let mut model = ReferenceModel::new();
                let strategy = CompactionStrategy::compact_all_active_buffers();

                for op in ops {
                    match op {
                        Op::Set(slot, values) => {
                            store.remove(refs[slot]);
                            refs[slot] = store.add(&values).unwrap();
                            model.set(slot as u32, &values);
                        }
                        Op::Remove(slot) => {
                            store.remove(refs[slot]);
                            refs[slot] = EntryRef::NULL;
                            model.set(slot as u32, &[]);
                        }
                        Op::Commit => commit(&mut store),
                        Op::Compact => {
                            store.compact_worst(&strategy, &mut refs).unwrap();
                        }
                        Op::AbortCompact(slot) => {
                            if let Some(compactor) = store.start_compact_worst(&strategy) {
                                store.remove(refs[slot]);
                                refs[slot] = EntryRef::NULL;
                                model.set(slot as u32, &[]);
                                store.abort_compact(compactor);
                            }
                        }
                    }
                    for (slot, r) in refs.iter().enumerate() {
                        prop_assert_eq!(store.get(*r).to_vec(), model.get(slot as u32).to_vec());
                    }
                    check_bookkeeping(&store, &refs);
                }

                commit(&mut store);
                commit(&mut store);
                prop_assert_eq!(store.held_items(), 0);
                prop_assert!(store.metas.iter().all(|m| m.hold_entries == 0 || m.state == BufferState::Free));
                check_bookkeeping(&store, &refs);
            }
        }
    }
}
