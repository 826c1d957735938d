//! Compaction: buffer selection, entry moving, and ref remapping.
//!
//! A compaction pass picks the worst buffers, moves every live entry out of
//! them while the owner rewrites its refs, then puts the emptied buffers on
//! hold. The owner drives the pass through [`Compactor`] or lets
//! [`ArrayStore::compact_worst`](crate::ArrayStore::compact_worst) walk a
//! [`RefRemapper`].

use indexmap::IndexMap;
use smallvec::SmallVec;

use tessera_core::{ArrayValue, EntryRef, RefLayout};

use crate::error::ArenaError;
use crate::store::ArrayStore;

/// Owner-side collection of entry refs that compaction can rewrite.
pub trait RefRemapper {
    /// Replace every ref `r` with `remap(r)`.
    fn remap_refs(&mut self, remap: &mut dyn FnMut(EntryRef) -> EntryRef);
}

impl RefRemapper for [EntryRef] {
    fn remap_refs(&mut self, remap: &mut dyn FnMut(EntryRef) -> EntryRef) {
        for r in self.iter_mut() {
            *r = remap(*r);
        }
    }
}

impl RefRemapper for Vec<EntryRef> {
    fn remap_refs(&mut self, remap: &mut dyn FnMut(EntryRef) -> EntryRef) {
        self.as_mut_slice().remap_refs(remap);
    }
}

/// Per-buffer figures compared against a compaction ratio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) buffer_id: u32,
    pub(crate) used: usize,
    pub(crate) dead: usize,
}

/// Pick the buffers worth compacting for one reason.
///
/// Worst buffers (most dead) first. At most `limit` buffers are chosen, and
/// selection stops once what is left would no longer trigger compaction.
pub(crate) fn select_worst(
    mut candidates: Vec<Candidate>,
    limit: usize,
    ratio: f64,
    slack: usize,
) -> SmallVec<[u32; 4]> {
    candidates.sort_by(|a, b| b.dead.cmp(&a.dead).then(a.buffer_id.cmp(&b.buffer_id)));
    let mut remaining_used: usize = candidates.iter().map(|c| c.used).sum();
    let mut remaining_dead: usize = candidates.iter().map(|c| c.dead).sum();
    let mut selected = SmallVec::new();
    for c in candidates {
        if selected.len() >= limit || c.dead == 0 {
            break;
        }
        selected.push(c.buffer_id);
        remaining_used -= c.used;
        remaining_dead -= c.dead;
        if remaining_dead < slack || remaining_dead as f64 <= remaining_used as f64 * ratio {
            break;
        }
    }
    selected
}

/// Cap on buffers compacted in one pass.
pub(crate) fn buffer_limit(
    active_buffers: usize,
    free_buffers: usize,
    max_buffers: u32,
    active_buffers_ratio: f64,
) -> usize {
    let by_ratio = (active_buffers as f64 * active_buffers_ratio.clamp(0.0001, 1.0)).ceil() as usize;
    let by_free = (free_buffers / 2).max(1);
    (max_buffers as usize).min(by_ratio).min(by_free).max(1)
}

/// Outcome of a compaction pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Entries moved out of each compacted buffer, in selection order.
    pub buffers: IndexMap<u32, usize>,
    /// Total entries moved.
    pub moved_entries: usize,
}

impl CompactionReport {
    /// Whether no buffer was compacted.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// An in-progress compaction of a set of buffers.
///
/// Obtained from [`ArrayStore::start_compact_worst`] and consumed by
/// [`ArrayStore::finish_compact`] or [`ArrayStore::abort_compact`].
#[derive(Debug)]
#[must_use = "a started compaction must be finished or aborted"]
pub struct Compactor {
    layout: RefLayout,
    buffers: SmallVec<[u32; 4]>,
    moved: IndexMap<u32, usize>,
    moved_from: Vec<EntryRef>,
}

impl Compactor {
    pub(crate) fn new(layout: RefLayout, buffers: SmallVec<[u32; 4]>) -> Self {
        let moved = buffers.iter().map(|&id| (id, 0)).collect();
        Self {
            layout,
            buffers,
            moved,
            moved_from: Vec::new(),
        }
    }

    /// Buffers being compacted.
    pub fn buffers(&self) -> &[u32] {
        &self.buffers
    }

    /// Whether `entry` lives in a buffer being compacted.
    pub fn has(&self, entry: EntryRef) -> bool {
        entry.is_valid() && self.buffers.contains(&self.layout.buffer_id(entry))
    }

    /// Copy `entry` out of its buffer if it is being compacted.
    ///
    /// Returns the ref the owner must store in place of `entry`; refs
    /// outside the compacted buffers come back unchanged.
    pub fn move_entry<T: ArrayValue>(
        &mut self,
        store: &mut ArrayStore<T>,
        entry: EntryRef,
    ) -> Result<EntryRef, ArenaError> {
        if !self.has(entry) {
            return Ok(entry);
        }
        let moved = store.move_entry(entry)?;
        *self.moved.entry(self.layout.buffer_id(entry)).or_insert(0) += 1;
        self.moved_from.push(entry);
        Ok(moved)
    }

    pub(crate) fn into_parts(self) -> (SmallVec<[u32; 4]>, IndexMap<u32, usize>, Vec<EntryRef>) {
        (self.buffers, self.moved, self.moved_from)
    }
}
