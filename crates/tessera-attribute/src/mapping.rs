//! Identifier-indexed arrays: an index vector of refs over an array store.

use std::fmt;
use std::sync::Arc;

use tessera_arena::{
    ArenaError, ArrayStore, ArrayView, CompactionReport, GenerationHandler, RcuVector, TypeMapper,
    WritableArrayView,
};
use tessera_core::{AddressSpace, ArrayValue, CompactionStrategy, EntryRef, Generation, MemoryUsage};

use crate::config::MappingConfig;
use crate::read_view::MappingReader;

/// Variable-length value arrays keyed by a dense `u32` identifier.
///
/// One writer owns the mapping. Readers on other threads go through
/// [`MappingReader`]s and never block the writer. A `set` publishes the
/// new array with a single ref store, so a reader sees either the old
/// array or the new one, never a mix.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tessera_arena::GenerationHandler;
/// use tessera_attribute::{MappingConfig, MultiValueMapping};
///
/// let handler = Arc::new(GenerationHandler::new());
/// let mut mapping = MultiValueMapping::<i32>::new(MappingConfig::default(), handler).unwrap();
/// let doc = mapping.add_doc().unwrap();
/// mapping.set(doc, &[10, 20]).unwrap();
/// assert_eq!(mapping.get(doc).to_vec(), vec![10, 20]);
/// mapping.commit();
/// ```
pub struct MultiValueMapping<T: ArrayValue> {
    store: ArrayStore<T>,
    indices: RcuVector<EntryRef>,
    handler: Arc<GenerationHandler>,
    total_values: usize,
}

impl<T: ArrayValue> MultiValueMapping<T> {
    /// Create an empty mapping gated by `handler`.
    pub fn new(config: MappingConfig, handler: Arc<GenerationHandler>) -> Result<Self, ArenaError> {
        config.validate()?;
        let store = ArrayStore::new(config.store, Arc::clone(&handler))?;
        let indices = RcuVector::new(config.index_grow, Arc::clone(&handler))?;
        Ok(Self {
            store,
            indices,
            handler,
            total_values: 0,
        })
    }

    /// Values of `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id >= size()`.
    pub fn get(&self, id: u32) -> ArrayView<'_, T> {
        self.store.get(self.indices.get(id as usize))
    }

    /// Values behind `entry`, as stored in the index.
    pub fn get_by_ref(&self, entry: EntryRef) -> ArrayView<'_, T> {
        self.store.get(entry)
    }

    /// Ref currently stored for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id >= size()`.
    pub fn entry_ref(&self, id: u32) -> EntryRef {
        self.indices.get(id as usize)
    }

    /// Replace the values of `id`.
    ///
    /// The new array is stored first, then published in the index, then
    /// the old array is retired. On failure `id` keeps its old values.
    ///
    /// # Panics
    ///
    /// Panics if `id >= size()`.
    pub fn set(&mut self, id: u32, values: &[T]) -> Result<(), ArenaError> {
        self.replace(id, values).map(|_| ())
    }

    /// Like [`set`](Self::set), returning how many values `id` had before.
    pub fn replace(&mut self, id: u32, values: &[T]) -> Result<usize, ArenaError> {
        let index = id as usize;
        let old = self.indices.get(index);
        let fresh = self.store.add(values)?;
        let old_len = self.store.get(old).len();
        self.indices.set(index, fresh);
        self.store.remove(old);
        self.total_values = self.total_values - old_len + values.len();
        Ok(old_len)
    }

    /// In-place mutable view of the values of `id`.
    ///
    /// Readers may observe a partially rewritten array. Only meant for
    /// rewrites every reader tolerates, such as renumbering enum values
    /// after the owning dictionary was compacted.
    ///
    /// # Panics
    ///
    /// Panics if `id >= size()`.
    pub fn get_writable(&mut self, id: u32) -> WritableArrayView<'_, T> {
        let entry = self.indices.get(id as usize);
        self.store.get_writable(entry)
    }

    /// Append an identifier with no values and return it.
    pub fn add_doc(&mut self) -> Result<u32, ArenaError> {
        let id = self.indices.len() as u32;
        self.indices.push(EntryRef::NULL)?;
        Ok(id)
    }

    /// Grow to at least `size` identifiers; new ones have no values.
    pub fn ensure_size(&mut self, size: usize) -> Result<(), ArenaError> {
        self.indices.ensure_size(size, EntryRef::NULL)
    }

    /// Number of identifiers.
    pub fn size(&self) -> usize {
        self.indices.len()
    }

    /// Total number of values over all identifiers.
    pub fn total_values(&self) -> usize {
        self.total_values
    }

    /// A read handle for other threads.
    pub fn reader(&self) -> MappingReader<T> {
        MappingReader::new(self.store.reader(), self.indices.reader())
    }

    /// The generation handler gating reclamation.
    pub fn generation_handler(&self) -> &Arc<GenerationHandler> {
        &self.handler
    }

    /// Size classes of the underlying store.
    pub fn type_mapper(&self) -> &TypeMapper {
        &self.store.config().type_mapper
    }

    /// Whether reclaimed entries are reused through free lists.
    pub fn has_free_lists_enabled(&self) -> bool {
        self.store.config().enable_free_lists
    }

    /// Stamp everything retired since the last call with `generation`.
    pub fn assign_generation(&mut self, generation: Generation) {
        self.store.assign_generation(generation);
        self.indices.assign_generation(generation);
    }

    /// Release everything stamped before `oldest_used`.
    pub fn reclaim_memory(&mut self, oldest_used: Generation) {
        self.store.reclaim_memory(oldest_used);
        self.indices.reclaim_memory(oldest_used);
    }

    /// Run one maintenance cycle: stamp retired items with the current
    /// generation, advance it, and reclaim what no reader can see.
    pub fn commit(&mut self) {
        let current = self.handler.current_generation();
        self.assign_generation(current);
        self.handler.inc_generation();
        self.reclaim_memory(self.handler.oldest_used_generation());
    }

    /// Refresh the store's usage and compaction decision.
    ///
    /// Returns the memory usage of the whole mapping.
    pub fn update_stat(&mut self, strategy: &CompactionStrategy) -> MemoryUsage {
        let mut usage = self.store.update_stat(strategy);
        usage += self.indices.memory_usage();
        usage
    }

    /// Compact the store if [`update_stat`](Self::update_stat) finds it
    /// due. Returns whether a compaction ran.
    pub fn consider_compact(&mut self, strategy: &CompactionStrategy) -> Result<bool, ArenaError> {
        self.store.consider_compact(strategy, &mut self.indices)
    }

    /// Compact the worst buffers of the store, rewriting the index.
    pub fn compact_worst(
        &mut self,
        strategy: &CompactionStrategy,
    ) -> Result<CompactionReport, ArenaError> {
        let report = self.store.compact_worst(strategy, &mut self.indices)?;
        if !report.is_empty() {
            tracing::debug!(
                moved = report.moved_entries,
                docs = self.indices.len(),
                "compacted multi-value mapping"
            );
        }
        Ok(report)
    }

    /// Memory of the store and the index together.
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = self.store.memory_usage();
        usage += self.indices.memory_usage();
        usage
    }

    /// Memory of the store alone.
    pub fn array_store_memory_usage(&self) -> MemoryUsage {
        self.store.memory_usage()
    }

    /// Entry-ref address space used by the store.
    pub fn address_space_usage(&self) -> AddressSpace {
        self.store.address_space_usage()
    }

    /// Enter bulk-load mode: replaced arrays are recycled immediately.
    ///
    /// No reader may be active until
    /// [`done_load_from_multi_value`](Self::done_load_from_multi_value).
    pub fn prepare_load_from_multi_value(&mut self) {
        self.store.set_initializing(true);
    }

    /// Leave bulk-load mode.
    pub fn done_load_from_multi_value(&mut self) {
        self.store.set_initializing(false);
    }

    /// The underlying array store.
    pub fn store(&self) -> &ArrayStore<T> {
        &self.store
    }
}

impl<T: ArrayValue> fmt::Debug for MultiValueMapping<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiValueMapping")
            .field("size", &self.indices.len())
            .field("total_values", &self.total_values)
            .field("store", &self.store)
            .finish()
    }
}

// Compile-time assertion: the mapping must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<MultiValueMapping<u32>>();
};
