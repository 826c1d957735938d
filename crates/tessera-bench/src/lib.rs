//! Benchmark profiles and workload drivers for the tessera array arena.
//!
//! Provides pre-built [`MappingConfig`] profiles and a deterministic update
//! stream for benchmarks and examples:
//!
//! - [`reference_profile`]: dynamic size classes, huge-page sized buffers
//! - [`fragmenting_profile`]: small buffers that fragment quickly
//! - [`UpdateStream`]: `(doc, values)` pairs derived from a seed
//! - [`run_updates`]: drive a mapping with periodic commit and compaction

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

use tessera_arena::{
    AllocSpec, ArenaError, ArrayStoreConfig, GenerationHandler, HugePageSpec, TypeMapper,
};
use tessera_attribute::{MappingConfig, MultiValueMapping};
use tessera_core::CompactionStrategy;

/// Dynamic size classes up to type id 300, buffers filling 2 MiB pages.
pub fn reference_profile() -> Result<MappingConfig, ArenaError> {
    MappingConfig::optimize_for_huge_page::<u32>(
        TypeMapper::DEFAULT_MAX_TYPE_ID,
        &HugePageSpec::default(),
        true,
    )
}

/// One class per length up to 16, at most 256 entries per buffer.
///
/// Rewrites spread dead entries over many buffers, so compaction has
/// work to do after a few thousand updates.
pub fn fragmenting_profile() -> MappingConfig {
    let spec = AllocSpec {
        min_entries_in_buffer: 16,
        max_entries_in_buffer: 256,
        num_entries_for_new_buffer: 256,
        grow_factor: 0.5,
    };
    MappingConfig::new(ArrayStoreConfig::new(TypeMapper::simple(16)).with_spec(spec))
}

/// Build a mapping over `docs` identifiers with its own generation handler.
pub fn build_mapping(config: MappingConfig, docs: usize) -> Result<MultiValueMapping<u32>, ArenaError> {
    let mut mapping = MultiValueMapping::new(config, Arc::new(GenerationHandler::new()))?;
    mapping.ensure_size(docs)?;
    Ok(mapping)
}

/// Deterministic stream of `(doc, values)` updates.
///
/// Doc ids are uniform over `0..docs`; array lengths are uniform over
/// `0..=max_len`.
#[derive(Clone, Debug)]
pub struct UpdateStream {
    state: u64,
    docs: u32,
    max_len: usize,
}

impl UpdateStream {
    /// Stream over `docs` identifiers seeded by `seed`.
    pub fn new(seed: u64, docs: u32, max_len: usize) -> Self {
        Self {
            state: seed,
            docs: docs.max(1),
            max_len,
        }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state ^ (self.state >> 29)
    }
}

impl Iterator for UpdateStream {
    type Item = (u32, Vec<u32>);

    fn next(&mut self) -> Option<Self::Item> {
        let doc = (self.next_u64() % self.docs as u64) as u32;
        let len = (self.next_u64() % (self.max_len as u64 + 1)) as usize;
        let base = self.next_u64() as u32;
        Some((doc, (0..len as u32).map(|i| base.wrapping_add(i)).collect()))
    }
}

/// Counters from [`run_updates`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Number of `set` calls.
    pub sets: usize,
    /// Number of maintenance cycles.
    pub commits: usize,
    /// Number of compaction passes run.
    pub compactions: usize,
}

/// Apply `updates` to `mapping`, committing every `commit_every` sets and
/// considering compaction after each commit.
pub fn run_updates(
    mapping: &mut MultiValueMapping<u32>,
    updates: impl IntoIterator<Item = (u32, Vec<u32>)>,
    commit_every: usize,
    strategy: &CompactionStrategy,
) -> Result<UpdateStats, ArenaError> {
    let commit_every = commit_every.max(1);
    let mut stats = UpdateStats::default();
    for (doc, values) in updates {
        mapping.set(doc, &values)?;
        stats.sets += 1;
        if stats.sets % commit_every == 0 {
            mapping.commit();
            stats.commits += 1;
            if mapping.consider_compact(strategy)? {
                stats.compactions += 1;
            }
        }
    }
    mapping.commit();
    stats.commits += 1;
    Ok(stats)
}
