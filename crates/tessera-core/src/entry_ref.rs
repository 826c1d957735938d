//! Compact 32-bit references into an array store.

use std::fmt;

use crate::error::LayoutError;

/// Handle addressing one stored array.
///
/// An `EntryRef` packs a buffer id and an in-buffer offset into a single
/// `u32`, split according to the store's [`RefLayout`]. It is a plain
/// location descriptor: copying it grants no ownership, and all access
/// goes through the owning store's decode step.
///
/// The raw value `0` is the null ref. Every empty array maps to it, so two
/// separate empty `add` calls return equal refs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryRef(u32);

impl EntryRef {
    /// The null ref, denoting an empty or unset array.
    pub const NULL: EntryRef = EntryRef(0);

    /// Rebuild a ref from its raw representation.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw packed value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this ref designates a stored entry (is not [`NULL`](Self::NULL)).
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:#010x}", self.0)
        } else {
            f.write_str("null")
        }
    }
}

impl From<EntryRef> for u32 {
    fn from(r: EntryRef) -> Self {
        r.0
    }
}

/// Split of an [`EntryRef`] between offset bits (low) and buffer-id bits (high).
///
/// The addressable namespace is deliberately small: with the default 19
/// offset bits a store can address 8192 buffers of 524288 entries each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RefLayout {
    offset_bits: u8,
}

impl RefLayout {
    /// Default number of offset bits.
    pub const DEFAULT_OFFSET_BITS: u8 = 19;

    /// Smallest accepted number of offset bits.
    pub const MIN_OFFSET_BITS: u8 = 1;

    /// Largest accepted number of offset bits (leaves at least two buffer-id bits).
    pub const MAX_OFFSET_BITS: u8 = 30;

    /// Create a layout with `offset_bits` low bits of offset.
    pub fn new(offset_bits: u8) -> Result<Self, LayoutError> {
        if !(Self::MIN_OFFSET_BITS..=Self::MAX_OFFSET_BITS).contains(&offset_bits) {
            return Err(LayoutError::OffsetBitsOutOfRange {
                offset_bits,
                min: Self::MIN_OFFSET_BITS,
                max: Self::MAX_OFFSET_BITS,
            });
        }
        Ok(Self { offset_bits })
    }

    /// Number of offset bits.
    pub const fn offset_bits(self) -> u8 {
        self.offset_bits
    }

    /// Number of buffer-id bits.
    pub const fn buffer_bits(self) -> u8 {
        32 - self.offset_bits
    }

    /// Maximum number of entries addressable within one buffer.
    pub const fn offset_size(self) -> usize {
        1usize << self.offset_bits
    }

    /// Maximum number of buffer ids.
    pub const fn num_buffers(self) -> usize {
        1usize << (32 - self.offset_bits)
    }

    /// Pack a buffer id and offset into a ref.
    ///
    /// # Panics
    ///
    /// Panics if either component does not fit its bit range.
    pub fn make(self, buffer_id: u32, offset: u32) -> EntryRef {
        assert!(
            (buffer_id as usize) < self.num_buffers(),
            "buffer id {buffer_id} exceeds {} buffer bits",
            self.buffer_bits()
        );
        assert!(
            (offset as usize) < self.offset_size(),
            "offset {offset} exceeds {} offset bits",
            self.offset_bits
        );
        EntryRef((buffer_id << self.offset_bits) | offset)
    }

    /// Buffer id component of `r`.
    pub const fn buffer_id(self, r: EntryRef) -> u32 {
        r.0 >> self.offset_bits
    }

    /// Offset component of `r`.
    pub const fn offset(self, r: EntryRef) -> u32 {
        r.0 & ((1u32 << self.offset_bits) - 1)
    }
}

impl Default for RefLayout {
    fn default() -> Self {
        Self {
            offset_bits: Self::DEFAULT_OFFSET_BITS,
        }
    }
}
