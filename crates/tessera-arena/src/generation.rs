//! Generation tracking for deferred reclamation.
//!
//! Provides [`GenerationHandler`] (the current generation plus a growable
//! table of cache-padded reader slots) and [`GenerationGuard`] (a pinned
//! slot, released on drop). The writer stamps retired memory with the
//! current generation, advances it, and frees only what is older than
//! [`GenerationHandler::oldest_used_generation`].
//!
//! Protocol: a reader pins its slot, then issues a `SeqCst` fence before
//! touching shared data; the writer unlinks, issues a `SeqCst` fence, then
//! scans the slots. Either the scan sees the pin, or the reader sees the
//! unlink.
//!
//! Slots come in fixed-size chunks linked through set-once pointers. A
//! reader that finds every slot pinned appends a chunk instead of waiting,
//! so acquisition never blocks on other readers. Chunks are kept until the
//! handler drops.

use std::iter;
use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};

use crate::raw::OnceBox;

pub use tessera_core::Generation;

/// Sentinel stored in a reader slot that is not pinned.
pub const GENERATION_UNPINNED: u64 = u64::MAX;

/// One reader slot, padded to avoid false sharing.
///
/// 128-byte alignment covers both 64-byte (x86) and 128-byte (Apple
/// M-series) cache lines.
#[derive(Debug)]
#[repr(align(128))]
struct ReaderSlot {
    pinned: AtomicU64,
}

/// A run of reader slots and the link to the next run.
struct SlotChunk {
    slots: Box<[ReaderSlot]>,
    next: OnceBox<SlotChunk>,
}

impl SlotChunk {
    fn new(len: usize) -> Self {
        Self {
            slots: (0..len)
                .map(|_| ReaderSlot {
                    pinned: AtomicU64::new(GENERATION_UNPINNED),
                })
                .collect(),
            next: OnceBox::new(),
        }
    }

    /// Pin `generation` in a free slot of this chunk, starting at `start`.
    fn try_pin(&self, start: usize, current: &AtomicU64) -> Option<(&ReaderSlot, u64)> {
        let n = self.slots.len();
        (0..n).find_map(|i| {
            let slot = &self.slots[(start + i) % n];
            let generation = current.load(Ordering::SeqCst);
            slot.pinned
                .compare_exchange(
                    GENERATION_UNPINNED,
                    generation,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .ok()
                .map(|_| (slot, generation))
        })
    }
}

/// Tracks the current generation and the generations pinned by readers.
pub struct GenerationHandler {
    current: AtomicU64,
    head: SlotChunk,
    chunk_len: usize,
    next_slot: AtomicUsize,
}

// Compile-time assertion: GenerationHandler must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<GenerationHandler>();
};

impl GenerationHandler {
    /// Default number of reader slots per chunk.
    pub const DEFAULT_READER_SLOTS: usize = 64;

    /// Create a handler at generation 0 with the default chunk size.
    pub fn new() -> Self {
        Self::with_reader_slots(Self::DEFAULT_READER_SLOTS)
    }

    /// Create a handler whose slot table grows in chunks of `slots` (at
    /// least one).
    ///
    /// Any number of guards may be live at once; the chunk size only sets
    /// how often the table grows.
    pub fn with_reader_slots(slots: usize) -> Self {
        let chunk_len = slots.max(1);
        Self {
            current: AtomicU64::new(0),
            head: SlotChunk::new(chunk_len),
            chunk_len,
            next_slot: AtomicUsize::new(0),
        }
    }

    /// Pin the current generation for the lifetime of the returned guard.
    ///
    /// Never waits for other guards to be released.
    pub fn take_guard(&self) -> GenerationGuard<'_> {
        let start = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let mut chunk = &self.head;
        loop {
            if let Some((slot, generation)) = chunk.try_pin(start, &self.current) {
                fence(Ordering::SeqCst);
                return GenerationGuard {
                    handler: self,
                    slot,
                    generation: Generation(generation),
                };
            }
            chunk = chunk.next.get_or_init(|| {
                tracing::debug!(chunk_len = self.chunk_len, "reader slots full, adding a chunk");
                Box::new(SlotChunk::new(self.chunk_len))
            });
        }
    }

    fn slots(&self) -> impl Iterator<Item = &ReaderSlot> + '_ {
        iter::successors(Some(&self.head), |chunk| chunk.next.get())
            .flat_map(|chunk| chunk.slots.iter())
    }

    /// The current generation.
    pub fn current_generation(&self) -> Generation {
        Generation(self.current.load(Ordering::SeqCst))
    }

    /// Advance to the next generation and return it. Writer only.
    pub fn inc_generation(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The oldest generation any live guard may observe.
    ///
    /// Equals the current generation when no guard is held.
    pub fn oldest_used_generation(&self) -> Generation {
        let current = self.current.load(Ordering::SeqCst);
        fence(Ordering::SeqCst);
        let oldest = self
            .slots()
            .map(|s| s.pinned.load(Ordering::SeqCst))
            .fold(current, u64::min);
        Generation(oldest)
    }

    /// Number of live guards pinned at exactly `generation`.
    pub fn generation_ref_count(&self, generation: Generation) -> usize {
        self.slots()
            .filter(|s| s.pinned.load(Ordering::Acquire) == generation.0)
            .count()
    }

    /// Number of live guards.
    pub fn active_guards(&self) -> usize {
        self.slots()
            .filter(|s| s.pinned.load(Ordering::Acquire) != GENERATION_UNPINNED)
            .count()
    }

    /// Number of reader slots allocated so far.
    pub fn reader_slots(&self) -> usize {
        self.slots().count()
    }
}

impl Default for GenerationHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GenerationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationHandler")
            .field("current", &self.current_generation())
            .field("active_guards", &self.active_guards())
            .field("reader_slots", &self.reader_slots())
            .finish()
    }
}

/// A pinned reader slot. Dropping the guard unpins it, on every exit path.
///
/// While a guard is alive, nothing retired at or after its generation is
/// freed by a component gated on the same handler.
#[derive(Debug)]
pub struct GenerationGuard<'a> {
    handler: &'a GenerationHandler,
    slot: &'a ReaderSlot,
    generation: Generation,
}

impl GenerationGuard<'_> {
    /// The generation this guard pinned.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether this guard was taken from `handler`.
    pub fn belongs_to(&self, handler: &GenerationHandler) -> bool {
        std::ptr::eq(self.handler, handler)
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.slot.pinned.store(GENERATION_UNPINNED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_at_zero_with_no_guards() {
        let handler = GenerationHandler::new();
        assert_eq!(handler.current_generation(), Generation(0));
        assert_eq!(handler.oldest_used_generation(), Generation(0));
        assert_eq!(handler.active_guards(), 0);
        assert_eq!(handler.reader_slots(), GenerationHandler::DEFAULT_READER_SLOTS);
    }

    #[test]
    fn guard_pins_oldest_generation() {
        let handler = GenerationHandler::new();
        let guard = handler.take_guard();
        assert_eq!(guard.generation(), Generation(0));
        handler.inc_generation();
        handler.inc_generation();
        assert_eq!(handler.current_generation(), Generation(2));
        assert_eq!(handler.oldest_used_generation(), Generation(0));
        assert_eq!(handler.generation_ref_count(Generation(0)), 1);
        drop(guard);
        assert_eq!(handler.oldest_used_generation(), Generation(2));
        assert_eq!(handler.generation_ref_count(Generation(0)), 0);
    }

    #[test]
    fn oldest_is_minimum_over_guards() {
        let handler = GenerationHandler::new();
        handler.inc_generation();
        let g1 = handler.take_guard();
        handler.inc_generation();
        let g3 = handler.take_guard();
        handler.inc_generation();
        assert_eq!(handler.active_guards(), 2);
        assert_eq!(handler.oldest_used_generation(), Generation(1));
        drop(g1);
        assert_eq!(handler.oldest_used_generation(), Generation(2));
        drop(g3);
        assert_eq!(handler.oldest_used_generation(), Generation(3));
    }

    #[test]
    fn guard_released_on_unwind() {
        let handler = Arc::new(GenerationHandler::new());
        let h = Arc::clone(&handler);
        let result = std::panic::catch_unwind(move || {
            let _guard = h.take_guard();
            panic!("reader failed");
        });
        assert!(result.is_err());
        assert_eq!(handler.active_guards(), 0);
    }

    #[test]
    fn single_slot_handler_reuses_slot() {
        let handler = GenerationHandler::with_reader_slots(0);
        assert_eq!(handler.reader_slots(), 1);
        for _ in 0..3 {
            let guard = handler.take_guard();
            assert!(guard.belongs_to(&handler));
        }
        assert_eq!(handler.active_guards(), 0);
    }

    #[test]
    fn guard_from_other_handler_does_not_belong() {
        let a = GenerationHandler::new();
        let b = GenerationHandler::new();
        let guard = a.take_guard();
        assert!(guard.belongs_to(&a));
        assert!(!guard.belongs_to(&b));
    }

    #[test]
    fn pins_beyond_initial_slots_without_waiting() {
        let handler = GenerationHandler::new();
        let first = GenerationHandler::DEFAULT_READER_SLOTS;
        let guards: Vec<_> = (0..first).map(|_| handler.take_guard()).collect();
        handler.inc_generation();
        let extra: Vec<_> = (0..first * 2 + 1).map(|_| handler.take_guard()).collect();
        assert_eq!(handler.active_guards(), first * 3 + 1);
        assert!(handler.reader_slots() >= first * 3 + 1);
        assert_eq!(handler.oldest_used_generation(), Generation(0));
        assert!(extra.iter().all(|g| g.generation() == Generation(1)));
        drop(guards);
        assert_eq!(handler.oldest_used_generation(), Generation(1));
        drop(extra);
        assert_eq!(handler.active_guards(), 0);
    }

    #[test]
    fn full_table_does_not_block_other_threads() {
        let handler = Arc::new(GenerationHandler::with_reader_slots(2));
        let _held: Vec<_> = (0..2).map(|_| handler.take_guard()).collect();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let h = Arc::clone(&handler);
        let reader = std::thread::spawn(move || {
            let guard = h.take_guard();
            tx.send(guard.generation()).unwrap();
        });
        let got = rx.recv_timeout(std::time::Duration::from_secs(5));
        assert_eq!(got, Ok(Generation(0)));
        reader.join().unwrap();
        assert_eq!(handler.reader_slots(), 4);
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn oldest_never_exceeds_any_guard(
                ops in proptest::collection::vec(0u8..3, 1..60),
            ) {
                let handler = GenerationHandler::with_reader_slots(4);
                let mut guards = Vec::new();
                for op in ops {
                    match op {
                        0 => guards.push(handler.take_guard()),
                        1 => { guards.pop(); }
                        _ => { handler.inc_generation(); }
                    }
                    let oldest = handler.oldest_used_generation();
                    prop_assert!(oldest <= handler.current_generation());
                    for g in &guards {
                        prop_assert!(oldest <= g.generation());
                    }
                }
            }
        }
    }
}
