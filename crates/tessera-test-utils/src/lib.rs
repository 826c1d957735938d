//! Test utilities and mock allocators for tessera development.
//!
//! Provides [`MemoryAllocator`] implementations that refuse requests on
//! demand, a reference model to check stores against, and a helper that
//! runs the writer's generation maintenance cycle.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use tessera_arena::{Allocation, ArenaError, ArrayStore, MemoryAllocator};
use tessera_core::ArrayValue;

/// Allocator with a fixed byte budget.
///
/// Requests that would push the outstanding total past the budget are
/// refused with [`ArenaError::AllocationFailed`].
#[derive(Debug)]
pub struct LimitedAllocator {
    budget: AtomicUsize,
    allocated: AtomicUsize,
    refused: AtomicUsize,
}

impl LimitedAllocator {
    pub fn new(budget: usize) -> Self {
        Self {
            budget: AtomicUsize::new(budget),
            allocated: AtomicUsize::new(0),
            refused: AtomicUsize::new(0),
        }
    }

    /// Change the budget. Outstanding grants are unaffected.
    pub fn set_budget(&self, budget: usize) {
        self.budget.store(budget, Ordering::Relaxed);
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of refused requests so far.
    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::Relaxed)
    }
}

impl MemoryAllocator for LimitedAllocator {
    fn allocate(&self, size: usize, alignment: usize) -> Result<Allocation, ArenaError> {
        let budget = self.budget.load(Ordering::Relaxed);
        let granted = self
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_add(size).filter(|total| *total <= budget)
            });
        match granted {
            Ok(_) => Ok(Allocation::new(size, alignment)),
            Err(_) => {
                self.refused.fetch_add(1, Ordering::Relaxed);
                Err(ArenaError::AllocationFailed {
                    requested_bytes: size,
                })
            }
        }
    }

    fn release(&self, allocation: Allocation) {
        self.allocated.fetch_sub(allocation.size(), Ordering::Relaxed);
    }
}

/// Allocator that grants a fixed number of requests, then refuses all.
#[derive(Debug)]
pub struct FailAfterAllocator {
    remaining: AtomicUsize,
    allocated: AtomicUsize,
}

impl FailAfterAllocator {
    pub fn new(grants: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(grants),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Allow `grants` more requests.
    pub fn refill(&self, grants: usize) {
        self.remaining.store(grants, Ordering::Relaxed);
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl MemoryAllocator for FailAfterAllocator {
    fn allocate(&self, size: usize, alignment: usize) -> Result<Allocation, ArenaError> {
        self.remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .map_err(|_| ArenaError::AllocationFailed {
                requested_bytes: size,
            })?;
        self.allocated.fetch_add(size, Ordering::Relaxed);
        Ok(Allocation::new(size, alignment))
    }

    fn release(&self, allocation: Allocation) {
        self.allocated.fetch_sub(allocation.size(), Ordering::Relaxed);
    }
}

/// Run one maintenance cycle: stamp retired items, advance the
/// generation, and reclaim what no reader can see.
pub fn commit<T: ArrayValue>(store: &mut ArrayStore<T>) {
    let handler = store.generation_handler().clone();
    store.assign_generation(handler.current_generation());
    handler.inc_generation();
    store.reclaim_memory(handler.oldest_used_generation());
}

/// Plain map of key to array, used as the expected state in model tests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceModel<T> {
    arrays: BTreeMap<u32, Vec<T>>,
}

impl<T: Clone + PartialEq> ReferenceModel<T> {
    pub fn new() -> Self {
        Self {
            arrays: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: u32, values: &[T]) {
        if values.is_empty() {
            self.arrays.remove(&key);
        } else {
            self.arrays.insert(key, values.to_vec());
        }
    }

    /// Expected array for `key`; empty when never set.
    pub fn get(&self, key: u32) -> &[T] {
        self.arrays.get(&key).map_or(&[], Vec::as_slice)
    }

    /// Total number of stored elements.
    pub fn total_values(&self) -> usize {
        self.arrays.values().map(Vec::len).sum()
    }

    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.arrays.keys().copied()
    }
}
