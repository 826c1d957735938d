//! Memory and address-space accounting.

use std::ops::AddAssign;

/// Byte accounting for a store or one of its components.
///
/// `dead_bytes` covers entries that are logically removed (including those
/// still on hold). `allocated_bytes_on_hold` covers memory that is retired
/// and waiting for the generation barrier before it can be freed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes currently allocated.
    pub allocated_bytes: usize,
    /// Bytes in use by committed entries, including reserved entries.
    pub used_bytes: usize,
    /// Bytes in use by removed entries.
    pub dead_bytes: usize,
    /// Bytes retired and awaiting reclamation.
    pub allocated_bytes_on_hold: usize,
}

impl MemoryUsage {
    /// Create a usage record from its four components.
    pub fn new(
        allocated_bytes: usize,
        used_bytes: usize,
        dead_bytes: usize,
        allocated_bytes_on_hold: usize,
    ) -> Self {
        Self {
            allocated_bytes,
            used_bytes,
            dead_bytes,
            allocated_bytes_on_hold,
        }
    }

    /// Fraction of used bytes that are dead, or `0.0` when nothing is used.
    pub fn dead_ratio(&self) -> f64 {
        if self.used_bytes == 0 {
            0.0
        } else {
            self.dead_bytes as f64 / self.used_bytes as f64
        }
    }
}

impl AddAssign for MemoryUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.allocated_bytes += rhs.allocated_bytes;
        self.used_bytes += rhs.used_bytes;
        self.dead_bytes += rhs.dead_bytes;
        self.allocated_bytes_on_hold += rhs.allocated_bytes_on_hold;
    }
}

/// Usage of the bounded ref namespace, counted in entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddressSpace {
    used: usize,
    dead: usize,
    limit: usize,
}

impl AddressSpace {
    /// Create an address-space record. `dead` is part of `used`.
    pub fn new(used: usize, dead: usize, limit: usize) -> Self {
        debug_assert!(dead <= used, "dead {dead} exceeds used {used}");
        Self { used, dead, limit }
    }

    /// Entries handed out, including dead ones.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Entries handed out and since removed.
    pub fn dead(&self) -> usize {
        self.dead
    }

    /// Total entries addressable.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Fraction of the namespace occupied by live entries.
    pub fn usage(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            (self.used - self.dead) as f64 / self.limit as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_assign_sums_fields() {
        let mut a = MemoryUsage::new(100, 50, 10, 5);
        a += MemoryUsage::new(1, 2, 3, 4);
        assert_eq!(a, MemoryUsage::new(101, 52, 13, 9));
    }

    #[test]
    fn dead_ratio_of_empty_usage_is_zero() {
        assert_eq!(MemoryUsage::default().dead_ratio(), 0.0);
        assert_eq!(MemoryUsage::new(0, 200, 50, 0).dead_ratio(), 0.25);
    }

    #[test]
    fn address_space_usage_counts_live_entries() {
        let space = AddressSpace::new(30, 10, 100);
        assert_eq!(space.usage(), 0.2);
        assert_eq!(AddressSpace::default().usage(), 0.0);
    }
}
