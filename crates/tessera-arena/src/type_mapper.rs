//! Mapping between array lengths and size-class type ids.
//!
//! Type id 0 is always the large-array class, whose entries own an
//! externally allocated payload. Type ids `1..=max_type_id` are small
//! classes stored inline, each with a fixed array size. A length is routed
//! to the smallest class whose size fits it; lengths beyond the largest
//! class go to type id 0.

use std::mem;

use tessera_core::ArrayValue;

use crate::error::ArenaError;

/// Type id of the large-array class.
pub const LARGE_ARRAY_TYPE_ID: u32 = 0;

/// Size classes of an array store.
///
/// A *simple* mapper has one class per length (`type_id == array_size`).
/// A *dynamic* mapper keeps exact classes for short arrays, then grows the
/// class size geometrically; entries of such classes record their actual
/// length next to the elements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeMapper {
    array_sizes: Vec<usize>,
    dynamic_from: u32,
}

impl TypeMapper {
    /// Default number of small classes.
    pub const DEFAULT_MAX_TYPE_ID: u32 = 300;

    /// Default growth factor between dynamic classes.
    pub const DEFAULT_GROW_FACTOR: f64 = 1.03;

    /// One class per array length up to `max_small_array_size`.
    pub fn simple(max_small_array_size: u32) -> Self {
        let array_sizes = (0..=max_small_array_size as usize).collect();
        Self {
            array_sizes,
            dynamic_from: max_small_array_size + 1,
        }
    }

    /// Up to `max_type_id` small classes growing by `grow_factor`, none
    /// larger than `max_array_size`.
    pub fn dynamic(
        max_type_id: u32,
        grow_factor: f64,
        max_array_size: usize,
    ) -> Result<Self, ArenaError> {
        if !grow_factor.is_finite() || grow_factor < 1.0 {
            return Err(ArenaError::InvalidConfig {
                reason: format!("type mapper grow factor must be finite and >= 1.0, got {grow_factor}"),
            });
        }
        let mut array_sizes = vec![0];
        let mut dynamic_from = None;
        let mut size = 0usize;
        for type_id in 1..=max_type_id {
            let next = ((size as f64 * grow_factor).floor() as usize).max(size + 1);
            if next > max_array_size {
                break;
            }
            if next > size + 1 && dynamic_from.is_none() {
                dynamic_from = Some(type_id);
            }
            array_sizes.push(next);
            size = next;
        }
        let dynamic_from = dynamic_from.unwrap_or(array_sizes.len() as u32);
        Ok(Self {
            array_sizes,
            dynamic_from,
        })
    }

    /// Class for an array of `array_size` elements (`array_size > 0`).
    pub fn type_id(&self, array_size: usize) -> u32 {
        if array_size == 0 || array_size > self.max_small_array_size() {
            return LARGE_ARRAY_TYPE_ID;
        }
        (self.array_sizes[1..].partition_point(|&s| s < array_size) + 1) as u32
    }

    /// Element capacity of `type_id`; 0 for the large class.
    pub fn array_size(&self, type_id: u32) -> usize {
        self.array_sizes[type_id as usize]
    }

    /// Whether entries of `type_id` record their own length.
    pub fn is_dynamic(&self, type_id: u32) -> bool {
        type_id != LARGE_ARRAY_TYPE_ID && type_id >= self.dynamic_from
    }

    /// Largest small type id.
    pub fn max_type_id(&self) -> u32 {
        (self.array_sizes.len() - 1) as u32
    }

    /// Longest array stored inline.
    pub fn max_small_array_size(&self) -> usize {
        self.array_sizes.last().copied().unwrap_or(0)
    }

    /// Bytes one entry of `type_id` occupies in its buffer for element type `T`.
    pub fn entry_bytes<T: ArrayValue>(&self, type_id: u32) -> usize {
        if type_id == LARGE_ARRAY_TYPE_ID {
            return mem::size_of::<usize>();
        }
        let elems = self.array_size(type_id) * mem::size_of::<T::Cell>();
        if self.is_dynamic(type_id) {
            elems + mem::size_of::<u32>()
        } else {
            elems
        }
    }
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::simple(Self::DEFAULT_MAX_TYPE_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_mapper_is_identity() {
        let m = TypeMapper::simple(8);
        assert_eq!(m.max_type_id(), 8);
        for len in 1..=8 {
            assert_eq!(m.type_id(len), len as u32);
            assert_eq!(m.array_size(len as u32), len);
            assert!(!m.is_dynamic(len as u32));
        }
        assert_eq!(m.type_id(9), LARGE_ARRAY_TYPE_ID);
        assert_eq!(m.array_size(0), 0);
    }

    #[test]
    fn simple_mapper_without_small_classes() {
        let m = TypeMapper::simple(0);
        assert_eq!(m.max_type_id(), 0);
        assert_eq!(m.type_id(1), LARGE_ARRAY_TYPE_ID);
    }

    #[test]
    fn dynamic_mapper_grows_past_exact_range() {
        let m = TypeMapper::dynamic(40, 1.5, 1000).unwrap();
        // 1, 2, 3, 4, then floor(4 * 1.5) = 6.
        assert_eq!(m.array_size(4), 4);
        assert_eq!(m.array_size(5), 6);
        assert!(!m.is_dynamic(4));
        assert!(m.is_dynamic(5));
        assert_eq!(m.type_id(5), 5);
        assert_eq!(m.type_id(6), 5);
        assert_eq!(m.type_id(7), 6);
        assert!(m.max_small_array_size() <= 1000);
        assert_eq!(m.type_id(1001), LARGE_ARRAY_TYPE_ID);
    }

    #[test]
    fn dynamic_mapper_caps_type_count() {
        let m = TypeMapper::dynamic(3, 2.0, usize::MAX).unwrap();
        assert_eq!(m.max_type_id(), 3);
        assert_eq!(m.array_size(3), 4);
    }

    #[test]
    fn dynamic_mapper_rejects_shrinking_factor() {
        assert!(TypeMapper::dynamic(10, 0.5, 100).is_err());
        assert!(TypeMapper::dynamic(10, f64::NAN, 100).is_err());
    }

    #[test]
    fn entry_bytes_includes_length_for_dynamic_classes() {
        let m = TypeMapper::dynamic(40, 1.5, 1000).unwrap();
        assert_eq!(m.entry_bytes::<u32>(4), 16);
        assert_eq!(m.entry_bytes::<u32>(5), 6 * 4 + 4);
        assert_eq!(m.entry_bytes::<u64>(0), std::mem::size_of::<usize>());
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn chosen_class_is_smallest_fit(len in 1usize..2000) {
                let m = TypeMapper::dynamic(300, 1.03, 1024).unwrap();
                let type_id = m.type_id(len);
                if type_id == LARGE_ARRAY_TYPE_ID {
                    prop_assert!(len > m.max_small_array_size());
                } else {
                    prop_assert!(m.array_size(type_id) >= len);
                    prop_assert!(m.array_size(type_id - 1) < len);
                }
            }
        }
    }
}
