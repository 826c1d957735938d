//! Element types storable in an array store.
//!
//! Stored elements live in atomic cells. The writer fills cells with
//! relaxed stores and publishes the entry by storing its [`EntryRef`] with
//! release ordering; readers acquire the ref and then load cells relaxed.
//! Because every access is atomic, a reader holding a stale ref observes
//! stale or reset values rather than a data race.

use std::fmt;
use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicU16, AtomicU32, AtomicU64, AtomicU8,
    Ordering,
};

use crate::entry_ref::EntryRef;

/// A value that can be stored in an array store.
///
/// Implementors pick an atomic [`Cell`](ArrayValue::Cell) of the same size.
/// `Default` is the canonical empty value written into reserved and
/// reclaimed entries.
pub trait ArrayValue: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Atomic storage for one element.
    type Cell: Send + Sync;

    /// Create a cell holding `value`.
    fn new_cell(value: Self) -> Self::Cell;

    /// Load the value in `cell`.
    fn load(cell: &Self::Cell, order: Ordering) -> Self;

    /// Store `value` into `cell`.
    fn store(cell: &Self::Cell, value: Self, order: Ordering);
}

macro_rules! impl_array_value_int {
    ($($t:ty => $cell:ty),* $(,)?) => {
        $(
            impl ArrayValue for $t {
                type Cell = $cell;

                fn new_cell(value: Self) -> Self::Cell {
                    <$cell>::new(value)
                }

                fn load(cell: &Self::Cell, order: Ordering) -> Self {
                    cell.load(order)
                }

                fn store(cell: &Self::Cell, value: Self, order: Ordering) {
                    cell.store(value, order)
                }
            }
        )*
    };
}

impl_array_value_int!(
    u8 => AtomicU8,
    i8 => AtomicI8,
    u16 => AtomicU16,
    i16 => AtomicI16,
    u32 => AtomicU32,
    i32 => AtomicI32,
    u64 => AtomicU64,
    i64 => AtomicI64,
);

impl ArrayValue for f32 {
    type Cell = AtomicU32;

    fn new_cell(value: Self) -> Self::Cell {
        AtomicU32::new(value.to_bits())
    }

    fn load(cell: &Self::Cell, order: Ordering) -> Self {
        f32::from_bits(cell.load(order))
    }

    fn store(cell: &Self::Cell, value: Self, order: Ordering) {
        cell.store(value.to_bits(), order)
    }
}

impl ArrayValue for f64 {
    type Cell = AtomicU64;

    fn new_cell(value: Self) -> Self::Cell {
        AtomicU64::new(value.to_bits())
    }

    fn load(cell: &Self::Cell, order: Ordering) -> Self {
        f64::from_bits(cell.load(order))
    }

    fn store(cell: &Self::Cell, value: Self, order: Ordering) {
        cell.store(value.to_bits(), order)
    }
}

impl ArrayValue for EntryRef {
    type Cell = AtomicU32;

    fn new_cell(value: Self) -> Self::Cell {
        AtomicU32::new(value.raw())
    }

    fn load(cell: &Self::Cell, order: Ordering) -> Self {
        EntryRef::from_raw(cell.load(order))
    }

    fn store(cell: &Self::Cell, value: Self, order: Ordering) {
        cell.store(value.raw(), order)
    }
}

/// A value paired with an integer weight, as stored by weighted-set attributes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Weighted<V> {
    /// The stored value.
    pub value: V,
    /// Its weight.
    pub weight: i32,
}

impl<V> Weighted<V> {
    /// Pair `value` with `weight`.
    pub const fn new(value: V, weight: i32) -> Self {
        Self { value, weight }
    }
}

// Weighted 32-bit values pack into one u64: value bits high, weight low.
macro_rules! impl_weighted_32 {
    ($($t:ty: $to_bits:expr, $from_bits:expr);* $(;)?) => {
        $(
            impl Weighted<$t> {
                fn pack(self) -> u64 {
                    let bits: u32 = $to_bits(self.value);
                    ((bits as u64) << 32) | (self.weight as u32 as u64)
                }

                fn unpack(raw: u64) -> Self {
                    Self {
                        value: $from_bits((raw >> 32) as u32),
                        weight: raw as u32 as i32,
                    }
                }
            }

            impl ArrayValue for Weighted<$t> {
                type Cell = AtomicU64;

                fn new_cell(value: Self) -> Self::Cell {
                    AtomicU64::new(value.pack())
                }

                fn load(cell: &Self::Cell, order: Ordering) -> Self {
                    Self::unpack(cell.load(order))
                }

                fn store(cell: &Self::Cell, value: Self, order: Ordering) {
                    cell.store(value.pack(), order)
                }
            }
        )*
    };
}

impl_weighted_32!(
    i32: |v: i32| v as u32, |b: u32| b as i32;
    u32: |v: u32| v, |b: u32| b;
    f32: f32::to_bits, f32::from_bits;
);
