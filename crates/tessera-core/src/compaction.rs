//! Compaction policy: when and how much to compact.
//!
//! [`CompactionStrategy`] is a pure value object. It never touches a store;
//! the store feeds it [`MemoryUsage`] and [`AddressSpace`] figures and acts
//! on the returned [`CompactionSpec`].

use std::fmt;

use crate::stats::{AddressSpace, MemoryUsage};

/// Dead bytes tolerated before memory compaction is considered at all.
pub const DEAD_BYTES_SLACK: usize = 0x10000;

/// Dead entries tolerated before address-space compaction is considered at all.
pub const DEAD_ADDRESS_SPACE_SLACK: usize = 0x10000;

/// Which reasons for compaction currently apply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionSpec {
    compact_memory: bool,
    compact_address_space: bool,
}

impl CompactionSpec {
    /// Create a spec from its two flags.
    pub fn new(compact_memory: bool, compact_address_space: bool) -> Self {
        Self {
            compact_memory,
            compact_address_space,
        }
    }

    /// Whether any compaction is requested.
    pub fn compact(&self) -> bool {
        self.compact_memory || self.compact_address_space
    }

    /// Compact to reclaim dead bytes.
    pub fn compact_memory(&self) -> bool {
        self.compact_memory
    }

    /// Compact to reclaim dead address space.
    pub fn compact_address_space(&self) -> bool {
        self.compact_address_space
    }
}

/// Thresholds deciding whether a store should be compacted, and how many
/// buffers a single pass may touch.
///
/// Defaults tolerate 5% dead bytes and 20% dead address space, each with a
/// 64 KiB / 64 Ki-entry slack, and compact one buffer per pass out of at
/// most 10% of the active buffers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompactionStrategy {
    max_dead_bytes_ratio: f64,
    max_dead_address_space_ratio: f64,
    max_buffers: u32,
    active_buffers_ratio: f64,
    dead_bytes_slack: usize,
    dead_address_space_slack: usize,
}

impl CompactionStrategy {
    /// Default tolerated dead-bytes ratio.
    pub const DEFAULT_MAX_DEAD_BYTES_RATIO: f64 = 0.05;

    /// Default tolerated dead-address-space ratio.
    pub const DEFAULT_MAX_DEAD_ADDRESS_SPACE_RATIO: f64 = 0.2;

    /// Default number of buffers compacted per pass.
    pub const DEFAULT_MAX_BUFFERS: u32 = 1;

    /// Default fraction of active buffers eligible per pass.
    pub const DEFAULT_ACTIVE_BUFFERS_RATIO: f64 = 0.1;

    /// Create a strategy with the given ratios and default buffer limits.
    pub fn new(max_dead_bytes_ratio: f64, max_dead_address_space_ratio: f64) -> Self {
        Self::with_buffer_limits(
            max_dead_bytes_ratio,
            max_dead_address_space_ratio,
            Self::DEFAULT_MAX_BUFFERS,
            Self::DEFAULT_ACTIVE_BUFFERS_RATIO,
        )
    }

    /// Create a strategy with explicit per-pass buffer limits.
    pub fn with_buffer_limits(
        max_dead_bytes_ratio: f64,
        max_dead_address_space_ratio: f64,
        max_buffers: u32,
        active_buffers_ratio: f64,
    ) -> Self {
        Self {
            max_dead_bytes_ratio,
            max_dead_address_space_ratio,
            max_buffers,
            active_buffers_ratio,
            dead_bytes_slack: DEAD_BYTES_SLACK,
            dead_address_space_slack: DEAD_ADDRESS_SPACE_SLACK,
        }
    }

    /// Strategy that compacts every active buffer holding dead entries.
    ///
    /// Used for forced full compaction, e.g. before a checkpoint.
    pub fn compact_all_active_buffers() -> Self {
        Self::with_buffer_limits(0.0, 0.0, u32::MAX, 1.0).with_slack(0, 0)
    }

    /// Replace the absolute slack thresholds.
    pub fn with_slack(mut self, dead_bytes_slack: usize, dead_address_space_slack: usize) -> Self {
        self.dead_bytes_slack = dead_bytes_slack;
        self.dead_address_space_slack = dead_address_space_slack;
        self
    }

    /// Tolerated ratio of dead to used bytes.
    pub fn max_dead_bytes_ratio(&self) -> f64 {
        self.max_dead_bytes_ratio
    }

    /// Tolerated ratio of dead to used address space.
    pub fn max_dead_address_space_ratio(&self) -> f64 {
        self.max_dead_address_space_ratio
    }

    /// Maximum buffers compacted in one pass.
    pub fn max_buffers(&self) -> u32 {
        self.max_buffers
    }

    /// Fraction of active buffers eligible in one pass.
    pub fn active_buffers_ratio(&self) -> f64 {
        self.active_buffers_ratio
    }

    /// Absolute dead-bytes slack.
    pub fn dead_bytes_slack(&self) -> usize {
        self.dead_bytes_slack
    }

    /// Absolute dead-address-space slack.
    pub fn dead_address_space_slack(&self) -> usize {
        self.dead_address_space_slack
    }

    /// Whether `dead_bytes` out of `used_bytes` warrants memory compaction.
    pub fn should_compact_memory(&self, used_bytes: usize, dead_bytes: usize) -> bool {
        dead_bytes >= self.dead_bytes_slack
            && dead_bytes as f64 > used_bytes as f64 * self.max_dead_bytes_ratio
    }

    /// Whether `dead` out of `used` entries warrants address-space compaction.
    pub fn should_compact_address_space(&self, used: usize, dead: usize) -> bool {
        dead >= self.dead_address_space_slack
            && dead as f64 > used as f64 * self.max_dead_address_space_ratio
    }

    /// Evaluate both rules against a store's current figures.
    pub fn should_compact(
        &self,
        memory_usage: &MemoryUsage,
        address_space: &AddressSpace,
    ) -> CompactionSpec {
        CompactionSpec::new(
            self.should_compact_memory(memory_usage.used_bytes, memory_usage.dead_bytes),
            self.should_compact_address_space(address_space.used(), address_space.dead()),
        )
    }
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_DEAD_BYTES_RATIO,
            Self::DEFAULT_MAX_DEAD_ADDRESS_SPACE_RATIO,
        )
    }
}

impl fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{max_dead_bytes_ratio={}, max_dead_address_space_ratio={}, max_buffers={}, active_buffers_ratio={}}}",
            self.max_dead_bytes_ratio,
            self.max_dead_address_space_ratio,
            self.max_buffers,
            self.active_buffers_ratio
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let s = CompactionStrategy::default();
        assert_eq!(s.max_dead_bytes_ratio(), 0.05);
        assert_eq!(s.max_dead_address_space_ratio(), 0.2);
        assert_eq!(s.max_buffers(), 1);
        assert_eq!(s.active_buffers_ratio(), 0.1);
        assert_eq!(s.dead_bytes_slack(), 64 * 1024);
        assert_eq!(s.dead_address_space_slack(), 64 * 1024);
    }

    #[test]
    fn ratio_rule_without_slack() {
        let s = CompactionStrategy::new(0.05, 0.2).with_slack(0, 0);
        assert!(!s.should_compact_memory(1000, 40));
        assert!(!s.should_compact_memory(1000, 50));
        assert!(s.should_compact_memory(1000, 60));
    }

    #[test]
    fn slack_suppresses_small_dead_counts() {
        let s = CompactionStrategy::default();
        assert!(!s.should_compact_memory(1000, 900));
        assert!(s.should_compact_memory(1_000_000, DEAD_BYTES_SLACK));
        assert!(!s.should_compact_memory(10_000_000, DEAD_BYTES_SLACK));
    }

    #[test]
    fn address_space_rule_uses_its_own_ratio() {
        let s = CompactionStrategy::default();
        let used = 1_000_000;
        assert!(!s.should_compact_address_space(used, 150_000));
        assert!(s.should_compact_address_space(used, 250_000));
    }

    #[test]
    fn should_compact_combines_both_reasons() {
        let s = CompactionStrategy::default();
        let memory = MemoryUsage::new(0, 1_000_000, 100_000, 0);
        let space = AddressSpace::new(1_000, 10, 1 << 20);
        let spec = s.should_compact(&memory, &space);
        assert!(spec.compact_memory());
        assert!(!spec.compact_address_space());
        assert!(spec.compact());
        assert!(!CompactionSpec::default().compact());
    }

    #[test]
    fn compact_all_fires_on_any_dead_bytes() {
        let s = CompactionStrategy::compact_all_active_buffers();
        assert!(s.should_compact_memory(1000, 1));
        assert!(!s.should_compact_memory(1000, 0));
        assert_eq!(s.max_buffers(), u32::MAX);
        assert_eq!(s.active_buffers_ratio(), 1.0);
    }

    #[test]
    fn display_lists_ratios() {
        let text = CompactionStrategy::default().to_string();
        assert!(text.contains("max_dead_bytes_ratio=0.05"));
        assert!(text.contains("max_buffers=1"));
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn more_dead_bytes_never_cancels_compaction(
                used in 0usize..10_000_000,
                dead in 0usize..10_000_000,
                extra in 0usize..1_000_000,
            ) {
                let s = CompactionStrategy::default();
                if s.should_compact_memory(used, dead) {
                    prop_assert!(s.should_compact_memory(used, dead + extra));
                }
            }
        }
    }
}
