//! Allocator refusals abandon the operation and leave prior entries intact.

use std::sync::Arc;

use tessera_arena::{ArenaError, ArrayStore, ArrayStoreConfig, GenerationHandler, TypeMapper};
use tessera_core::EntryRef;
use tessera_test_utils::fixtures::{pattern, ramp};
use tessera_test_utils::{commit, FailAfterAllocator, LimitedAllocator};

#[test]
fn refused_growth_keeps_prior_entries() {
    let alloc = Arc::new(LimitedAllocator::new(64));
    let config = ArrayStoreConfig::new(TypeMapper::simple(4)).with_allocator(alloc.clone());
    let mut store = ArrayStore::<u32>::new(config, Arc::new(GenerationHandler::new())).unwrap();

    // One 16-entry buffer of 4-byte entries, one entry reserved.
    let refs: Vec<EntryRef> = (0..15u32).map(|i| store.add(&[i]).unwrap()).collect();
    assert_eq!(alloc.allocated_bytes(), 64);

    assert_eq!(
        store.add(&[99]),
        Err(ArenaError::AllocationFailed {
            requested_bytes: 80
        })
    );
    assert_eq!(alloc.refused(), 1);
    for (i, r) in refs.iter().enumerate() {
        assert_eq!(store.get(*r).to_vec(), vec![i as u32]);
    }

    alloc.set_budget(1024);
    let grown = store.add(&[99]).unwrap();
    assert_eq!(store.get(grown).to_vec(), vec![99]);
    // The replaced allocation stays on hold until the next cycle.
    assert_eq!(alloc.allocated_bytes(), 64 + 80);
    commit(&mut store);
    assert_eq!(alloc.allocated_bytes(), 80);
    assert_eq!(store.get(refs[3]).to_vec(), vec![3]);
}

#[test]
fn failed_large_add_releases_its_payload() {
    let alloc = Arc::new(FailAfterAllocator::new(1));
    let config = ArrayStoreConfig::new(TypeMapper::simple(4)).with_allocator(alloc.clone());
    let mut store = ArrayStore::<u32>::new(config, Arc::new(GenerationHandler::new())).unwrap();

    // The payload is granted, the buffer for type id 0 is not.
    let result = store.add(&pattern(1, 100));
    assert!(matches!(result, Err(ArenaError::AllocationFailed { .. })));
    assert_eq!(alloc.allocated_bytes(), 0);

    alloc.refill(usize::MAX);
    let r = store.add(&pattern(1, 100)).unwrap();
    assert_eq!(store.get(r).to_vec(), pattern(1, 100));
}

#[test]
fn refused_buffer_switch_is_recoverable() {
    let alloc = Arc::new(FailAfterAllocator::new(1));
    let config = ArrayStoreConfig::new(TypeMapper::simple(4)).with_allocator(alloc.clone());
    let mut store = ArrayStore::<u32>::new(config, Arc::new(GenerationHandler::new())).unwrap();

    let small = store.add(&ramp(5, 2)).unwrap();
    assert!(store.add(&ramp(5, 3)).is_err());
    assert_eq!(store.get(small).to_vec(), ramp(5, 2));

    alloc.refill(1);
    let other = store.add(&ramp(5, 3)).unwrap();
    assert_eq!(store.get(other).to_vec(), ramp(5, 3));
}
