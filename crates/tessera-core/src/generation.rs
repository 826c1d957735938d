//! The [`Generation`] counter type.

use std::fmt;

/// A point in the store's mutation history.
///
/// Generations increase monotonically. Retired entries are stamped with the
/// generation current at retirement, and reclaimed only once every reader
/// guard is at a strictly newer generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

impl Generation {
    /// The first generation.
    pub const ZERO: Generation = Generation(0);

    /// The generation following this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Generation {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_increments() {
        assert_eq!(Generation::ZERO.next(), Generation(1));
        assert!(Generation(3) < Generation(4));
        assert_eq!(Generation::from(7).to_string(), "7");
    }
}
