//! Error types for core value construction.

use std::error::Error;
use std::fmt;

/// Errors from constructing a [`RefLayout`](crate::RefLayout).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutError {
    /// The requested offset width leaves no room for buffer ids or offsets.
    OffsetBitsOutOfRange {
        /// The rejected number of offset bits.
        offset_bits: u8,
        /// Smallest accepted value.
        min: u8,
        /// Largest accepted value.
        max: u8,
    },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OffsetBitsOutOfRange {
                offset_bits,
                min,
                max,
            } => write!(
                f,
                "offset bits {offset_bits} out of range, expected {min}..={max}"
            ),
        }
    }
}

impl Error for LayoutError {}
