//! Arena-specific error types.

use std::error::Error;
use std::fmt;

use tessera_core::LayoutError;

/// Errors that can occur during array store operations.
///
/// Contract violations (dereferencing a reclaimed ref, indexing past the
/// end of an index vector) are panics, not variants of this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// Configuration rejected at construction.
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },
    /// The memory allocator or the global heap refused a request.
    ///
    /// The operation is abandoned; entries committed before it stay valid.
    AllocationFailed {
        /// Number of bytes requested.
        requested_bytes: usize,
    },
    /// Every buffer id is in use, so no buffer can be opened for `type_id`.
    AddressSpaceExhausted {
        /// The size class that needed a buffer.
        type_id: u32,
        /// Number of buffer ids the store may use.
        max_buffers: u32,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid config: {reason}"),
            Self::AllocationFailed { requested_bytes } => {
                write!(f, "allocation of {requested_bytes} bytes failed")
            }
            Self::AddressSpaceExhausted {
                type_id,
                max_buffers,
            } => write!(
                f,
                "address space exhausted: all {max_buffers} buffer ids in use, type id {type_id} needs a new buffer"
            ),
        }
    }
}

impl Error for ArenaError {}

impl From<LayoutError> for ArenaError {
    fn from(e: LayoutError) -> Self {
        Self::InvalidConfig {
            reason: e.to_string(),
        }
    }
}
