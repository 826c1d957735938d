//! Generation-stamped hold lists.
//!
//! Retirement is two-phase, mirroring the store's maintenance cycle:
//! - Items retired since the last [`assign_generation`] wait in `pending`
//!   (readers may still reach them through the structure they were
//!   unlinked from).
//! - [`assign_generation`] stamps them with the current generation and
//!   moves them to `held`, oldest first.
//! - [`reclaim`] releases every held item whose stamp is strictly older
//!   than the oldest generation a reader may still observe.
//!
//! [`assign_generation`]: GenerationHoldList::assign_generation
//! [`reclaim`]: GenerationHoldList::reclaim

use std::collections::VecDeque;

use tessera_core::Generation;

/// FIFO of retired items awaiting the generation barrier.
#[derive(Debug)]
pub struct GenerationHoldList<H> {
    pending: Vec<H>,
    held: VecDeque<(Generation, H)>,
}

impl<H> GenerationHoldList<H> {
    /// Create an empty hold list.
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            held: VecDeque::new(),
        }
    }

    /// Retire `item`. It is stamped at the next `assign_generation`.
    pub fn insert(&mut self, item: H) {
        self.pending.push(item);
    }

    /// Stamp all pending items with `generation`.
    ///
    /// Stamps must not decrease; callers clamp against their handler.
    pub fn assign_generation(&mut self, generation: Generation) {
        debug_assert!(
            self.held.back().is_none_or(|(g, _)| *g <= generation),
            "hold generation went backwards to {generation}"
        );
        self.held
            .extend(self.pending.drain(..).map(|item| (generation, item)));
    }

    /// Remove and return every held item stamped before `oldest_used`.
    pub fn reclaim(&mut self, oldest_used: Generation) -> Vec<H> {
        let count = self
            .held
            .iter()
            .take_while(|(g, _)| *g < oldest_used)
            .count();
        self.held.drain(..count).map(|(_, item)| item).collect()
    }

    /// Remove every item, pending or held, regardless of generation.
    pub fn drain_all(&mut self) -> Vec<H> {
        let mut items: Vec<H> = self.held.drain(..).map(|(_, item)| item).collect();
        items.append(&mut self.pending);
        items
    }

    /// Iterate over every item, pending and held.
    pub fn iter(&self) -> impl Iterator<Item = &H> {
        self.held.iter().map(|(_, item)| item).chain(&self.pending)
    }

    /// Number of items not yet stamped.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of stamped items.
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    /// Whether the list holds nothing.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.held.is_empty()
    }
}

impl<H> Default for GenerationHoldList<H> {
    fn default() -> Self {
        Self::new()
    }
}
