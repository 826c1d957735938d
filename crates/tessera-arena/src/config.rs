//! Array store configuration parameters.

use std::sync::Arc;

use tessera_core::{ArrayValue, RefLayout};

use crate::allocator::{HeapAllocator, MemoryAllocator};
use crate::error::ArenaError;
use crate::type_mapper::TypeMapper;

/// Buffer sizing policy for one size class.
///
/// A class's primary buffer grows in place while its capacity is below
/// `num_entries_for_new_buffer`; after that, a full primary buffer is
/// replaced by a fresh one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AllocSpec {
    /// Smallest capacity ever allocated, in entries.
    pub min_entries_in_buffer: usize,
    /// Largest capacity of one buffer, in entries. At most the ref layout's offset size.
    pub max_entries_in_buffer: usize,
    /// Capacity at which a full buffer is replaced instead of grown.
    pub num_entries_for_new_buffer: usize,
    /// Fractional growth applied when growing a buffer in place.
    pub grow_factor: f64,
}

impl AllocSpec {
    /// Default minimum buffer capacity.
    pub const DEFAULT_MIN_ENTRIES_IN_BUFFER: usize = 16;

    /// Default capacity threshold for opening new buffers.
    pub const DEFAULT_NUM_ENTRIES_FOR_NEW_BUFFER: usize = 8192;

    /// Default in-place growth factor.
    pub const DEFAULT_GROW_FACTOR: f64 = 0.2;

    /// Create a spec with default sizing capped at `max_entries_in_buffer`.
    pub fn new(max_entries_in_buffer: usize) -> Self {
        Self {
            min_entries_in_buffer: Self::DEFAULT_MIN_ENTRIES_IN_BUFFER.min(max_entries_in_buffer),
            max_entries_in_buffer,
            num_entries_for_new_buffer: Self::DEFAULT_NUM_ENTRIES_FOR_NEW_BUFFER
                .min(max_entries_in_buffer),
            grow_factor: Self::DEFAULT_GROW_FACTOR,
        }
    }

    /// Capacity to allocate for a buffer holding `used` entries that needs
    /// room for `needed` more.
    ///
    /// Fresh buffers (`resizing == false`) start at `min_entries_in_buffer`;
    /// resized ones grow by `grow_factor`. The result never exceeds
    /// `max_entries_in_buffer`, so callers check it covers `used + needed`.
    pub fn entries_to_alloc(&self, used: usize, needed: usize, resizing: bool) -> usize {
        let required = used + needed;
        let wanted = if resizing {
            let grown = used + (used as f64 * self.grow_factor).ceil() as usize;
            required.max(grown)
        } else {
            required.max(self.min_entries_in_buffer)
        };
        wanted.max(self.min_entries_in_buffer).min(self.max_entries_in_buffer)
    }

    fn validate(&self, type_id: usize, layout: RefLayout) -> Result<(), ArenaError> {
        let fail = |reason: String| {
            Err(ArenaError::InvalidConfig {
                reason: format!("type id {type_id}: {reason}"),
            })
        };
        if self.max_entries_in_buffer < 2 {
            return fail(format!(
                "max_entries_in_buffer must leave room past the reserved entry, got {}",
                self.max_entries_in_buffer
            ));
        }
        if self.max_entries_in_buffer > layout.offset_size() {
            return fail(format!(
                "max_entries_in_buffer {} exceeds ref offset size {}",
                self.max_entries_in_buffer,
                layout.offset_size()
            ));
        }
        if self.min_entries_in_buffer > self.max_entries_in_buffer {
            return fail(format!(
                "min_entries_in_buffer {} exceeds max_entries_in_buffer {}",
                self.min_entries_in_buffer, self.max_entries_in_buffer
            ));
        }
        if !self.grow_factor.is_finite() || self.grow_factor < 0.0 {
            return fail(format!(
                "grow_factor must be finite and non-negative, got {}",
                self.grow_factor
            ));
        }
        Ok(())
    }
}

/// Inputs to [`ArrayStoreConfig::optimize_for_huge_page`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HugePageSpec {
    /// Huge page size in bytes; new buffers aim to fill one.
    pub huge_page_size: usize,
    /// Small page size in bytes; the minimum buffer allocation.
    pub small_page_size: usize,
    /// Upper bound on one buffer's size in bytes.
    pub max_buffer_size: usize,
    /// Lower bound on `num_entries_for_new_buffer`.
    pub min_num_entries_for_new_buffer: usize,
    /// In-place growth factor.
    pub grow_factor: f64,
}

impl Default for HugePageSpec {
    fn default() -> Self {
        Self {
            huge_page_size: 2 * 1024 * 1024,
            small_page_size: 4 * 1024,
            max_buffer_size: 256 * 1024 * 1024,
            min_num_entries_for_new_buffer: 8 * 1024,
            grow_factor: AllocSpec::DEFAULT_GROW_FACTOR,
        }
    }
}

/// Configuration for an [`ArrayStore`](crate::ArrayStore).
///
/// Validated at construction; immutable afterwards.
#[derive(Clone, Debug)]
pub struct ArrayStoreConfig {
    /// Size classes.
    pub type_mapper: TypeMapper,
    /// Buffer sizing per type id (index 0 is the large-array class).
    pub specs: Vec<AllocSpec>,
    /// Bit split of entry refs.
    pub layout: RefLayout,
    /// Number of buffer ids the store may use. At most `layout.num_buffers()`.
    pub max_buffers: u32,
    /// Reuse reclaimed entries through per-class free lists.
    pub enable_free_lists: bool,
    /// Allocation backend for buffers and large-array payloads.
    pub allocator: Arc<dyn MemoryAllocator>,
}

impl ArrayStoreConfig {
    /// Default cap on buffer ids.
    pub const DEFAULT_MAX_BUFFERS: u32 = 8192;

    /// Default sizing for every class of `type_mapper`, default ref layout,
    /// heap allocation and free lists enabled.
    pub fn new(type_mapper: TypeMapper) -> Self {
        Self::with_layout(type_mapper, RefLayout::default())
    }

    /// Default sizing bounded by `layout`.
    pub fn with_layout(type_mapper: TypeMapper, layout: RefLayout) -> Self {
        let spec = AllocSpec::new(layout.offset_size());
        let specs = vec![spec; type_mapper.max_type_id() as usize + 1];
        Self {
            type_mapper,
            specs,
            layout,
            max_buffers: Self::DEFAULT_MAX_BUFFERS.min(layout.num_buffers() as u32),
            enable_free_lists: true,
            allocator: Arc::new(HeapAllocator::new()),
        }
    }

    /// Size every class so new buffers fill whole huge pages.
    ///
    /// Per type id, with `entry` the entry size for element type `T`:
    /// `num_entries_for_new_buffer = huge_page_size / entry` (at least
    /// `min_num_entries_for_new_buffer`), `min_entries_in_buffer =
    /// small_page_size / entry`, `max_entries_in_buffer = max_buffer_size /
    /// entry`, all clamped to the ref layout.
    pub fn optimize_for_huge_page<T: ArrayValue>(
        type_mapper: TypeMapper,
        layout: RefLayout,
        huge: &HugePageSpec,
        enable_free_lists: bool,
    ) -> Self {
        let mut config = Self::with_layout(type_mapper, layout);
        for (type_id, spec) in config.specs.iter_mut().enumerate() {
            let entry = config.type_mapper.entry_bytes::<T>(type_id as u32).max(1);
            let max_entries = (huge.max_buffer_size / entry).clamp(2, layout.offset_size());
            let num_for_new = (huge.huge_page_size / entry)
                .max(huge.min_num_entries_for_new_buffer)
                .min(max_entries);
            let min_entries = (huge.small_page_size / entry).clamp(1, max_entries);
            *spec = AllocSpec {
                min_entries_in_buffer: min_entries,
                max_entries_in_buffer: max_entries,
                num_entries_for_new_buffer: num_for_new,
                grow_factor: huge.grow_factor,
            };
        }
        config.enable_free_lists = enable_free_lists;
        config
    }

    /// Replace the allocation backend.
    pub fn with_allocator(mut self, allocator: Arc<dyn MemoryAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Apply `spec` to every type id.
    pub fn with_spec(mut self, spec: AllocSpec) -> Self {
        self.specs.iter_mut().for_each(|s| *s = spec);
        self
    }

    /// Replace the buffer-id cap.
    pub fn with_max_buffers(mut self, max_buffers: u32) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    /// Enable or disable free lists.
    pub fn with_free_lists(mut self, enable: bool) -> Self {
        self.enable_free_lists = enable;
        self
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ArenaError> {
        let expected = self.type_mapper.max_type_id() as usize + 1;
        if self.specs.len() != expected {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "expected {expected} alloc specs (one per type id), got {}",
                    self.specs.len()
                ),
            });
        }
        if self.max_buffers == 0 || self.max_buffers as usize > self.layout.num_buffers() {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "max_buffers must be in 1..={}, got {}",
                    self.layout.num_buffers(),
                    self.max_buffers
                ),
            });
        }
        for (type_id, spec) in self.specs.iter().enumerate() {
            spec.validate(type_id, self.layout)?;
        }
        Ok(())
    }
}

impl Default for ArrayStoreConfig {
    fn default() -> Self {
        Self::new(TypeMapper::default())
    }
}
