//! Multi-value mapping configuration.

use std::mem;

use tessera_arena::{ArenaError, ArrayStoreConfig, GrowStrategy, HugePageSpec, TypeMapper};
use tessera_core::{ArrayValue, RefLayout};

/// Configuration for a [`MultiValueMapping`](crate::MultiValueMapping).
#[derive(Clone, Debug)]
pub struct MappingConfig {
    /// Configuration of the array store holding the values.
    pub store: ArrayStoreConfig,
    /// Growth policy of the identifier → ref index.
    pub index_grow: GrowStrategy,
}

impl MappingConfig {
    /// Mapping over a store built from `store`, default index growth.
    pub fn new(store: ArrayStoreConfig) -> Self {
        Self {
            store,
            index_grow: GrowStrategy::default(),
        }
    }

    /// Dynamic size classes up to `max_type_id`, with buffers sized to
    /// fill huge pages.
    ///
    /// No small class is larger than one buffer of `huge.max_buffer_size`
    /// bytes can hold.
    pub fn optimize_for_huge_page<T: ArrayValue>(
        max_type_id: u32,
        huge: &HugePageSpec,
        enable_free_lists: bool,
    ) -> Result<Self, ArenaError> {
        let max_array_size = huge.max_buffer_size / mem::size_of::<T>().max(1);
        let mapper = TypeMapper::dynamic(max_type_id, TypeMapper::DEFAULT_GROW_FACTOR, max_array_size)?;
        let store = ArrayStoreConfig::optimize_for_huge_page::<T>(
            mapper,
            RefLayout::default(),
            huge,
            enable_free_lists,
        );
        Ok(Self::new(store))
    }

    /// Replace the index growth policy.
    pub fn with_index_grow(mut self, index_grow: GrowStrategy) -> Self {
        self.index_grow = index_grow;
        self
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ArenaError> {
        self.store.validate()?;
        self.index_grow.validate()
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self::new(ArrayStoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates() {
        assert!(MappingConfig::default().validate().is_ok());
    }

    #[test]
    fn huge_page_config_uses_dynamic_classes() {
        let config =
            MappingConfig::optimize_for_huge_page::<u32>(300, &HugePageSpec::default(), true).unwrap();
        assert!(config.validate().is_ok());
        let mapper = &config.store.type_mapper;
        assert!(mapper.max_type_id() <= 300);
        assert!(mapper.max_small_array_size() > 300);
        assert!(config.store.enable_free_lists);
    }

    #[test]
    fn rejects_negative_index_growth() {
        let config = MappingConfig::default().with_index_grow(GrowStrategy {
            grow_factor: -1.0,
            ..GrowStrategy::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ArenaError::InvalidConfig { .. })
        ));
    }
}
