//! Memory allocation capabilities.
//!
//! Every buffer and every large-array payload asks a [`MemoryAllocator`]
//! for its byte budget before touching the heap. The allocator may round
//! the request up (e.g. to whole huge pages); the store then uses the
//! extra room as additional buffer capacity.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ArenaError;

/// A granted allocation: its size and alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    size: usize,
    alignment: usize,
}

impl Allocation {
    /// Describe an allocation of `size` bytes at `alignment`.
    pub fn new(size: usize, alignment: usize) -> Self {
        Self { size, alignment }
    }

    /// Granted size in bytes (at least the requested size).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment in bytes.
    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

/// Allocation backend consulted by the store.
pub trait MemoryAllocator: Send + Sync + fmt::Debug {
    /// Grant `size` bytes aligned to `alignment`, or refuse.
    fn allocate(&self, size: usize, alignment: usize) -> Result<Allocation, ArenaError>;

    /// Return a grant made by [`allocate`](Self::allocate).
    fn release(&self, allocation: Allocation);
}

fn check_request(size: usize, alignment: usize) -> Result<(), ArenaError> {
    if !alignment.is_power_of_two() || size > isize::MAX as usize - (alignment - 1) {
        return Err(ArenaError::AllocationFailed {
            requested_bytes: size,
        });
    }
    Ok(())
}

/// Plain heap allocation, granting exactly what is asked.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    allocated: AtomicUsize,
}

impl HeapAllocator {
    /// Create a heap allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently granted.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl MemoryAllocator for HeapAllocator {
    fn allocate(&self, size: usize, alignment: usize) -> Result<Allocation, ArenaError> {
        check_request(size, alignment)?;
        self.allocated.fetch_add(size, Ordering::Relaxed);
        Ok(Allocation::new(size, alignment))
    }

    fn release(&self, allocation: Allocation) {
        self.allocated.fetch_sub(allocation.size(), Ordering::Relaxed);
    }
}

/// Rounds grants up to whole pages: huge pages for large buffers, small
/// pages otherwise.
#[derive(Debug)]
pub struct HugePageAllocator {
    huge_page_size: usize,
    small_page_size: usize,
    allocated: AtomicUsize,
}

impl HugePageAllocator {
    /// Default huge page size: 2 MiB.
    pub const DEFAULT_HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

    /// Default small page size: 4 KiB.
    pub const DEFAULT_SMALL_PAGE_SIZE: usize = 4 * 1024;

    /// Create an allocator with the given page sizes (both powers of two).
    pub fn new(huge_page_size: usize, small_page_size: usize) -> Result<Self, ArenaError> {
        if !huge_page_size.is_power_of_two()
            || !small_page_size.is_power_of_two()
            || small_page_size > huge_page_size
        {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "page sizes must be powers of two with small <= huge, got small={small_page_size} huge={huge_page_size}"
                ),
            });
        }
        Ok(Self {
            huge_page_size,
            small_page_size,
            allocated: AtomicUsize::new(0),
        })
    }

    /// Size a request of `size` bytes is rounded to.
    pub fn rounded_size(&self, size: usize) -> usize {
        let page = if size >= self.huge_page_size {
            self.huge_page_size
        } else {
            self.small_page_size
        };
        size.div_ceil(page) * page
    }

    /// Bytes currently granted.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl Default for HugePageAllocator {
    fn default() -> Self {
        Self {
            huge_page_size: Self::DEFAULT_HUGE_PAGE_SIZE,
            small_page_size: Self::DEFAULT_SMALL_PAGE_SIZE,
            allocated: AtomicUsize::new(0),
        }
    }
}

impl MemoryAllocator for HugePageAllocator {
    fn allocate(&self, size: usize, alignment: usize) -> Result<Allocation, ArenaError> {
        check_request(size, alignment)?;
        let rounded = self.rounded_size(size);
        check_request(rounded, alignment)?;
        self.allocated.fetch_add(rounded, Ordering::Relaxed);
        Ok(Allocation::new(rounded, alignment))
    }

    fn release(&self, allocation: Allocation) {
        self.allocated.fetch_sub(allocation.size(), Ordering::Relaxed);
    }
}
