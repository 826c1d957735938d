//! One writer mutating and compacting while readers resolve refs.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, TryRecvError};
use tessera_arena::{
    ArrayStore, ArrayStoreConfig, GenerationHandler, GrowStrategy, RcuVector, TypeMapper,
};
use tessera_core::{CompactionStrategy, EntryRef};
use tessera_test_utils::fixtures::{mix, ramp};

const KEYS: usize = 64;
const STEPS: u64 = 20_000;
const READERS: usize = 4;

/// Arrays are `ramp(first, 1 + first % 7)`; a torn read breaks the shape.
fn array_for(step: u64) -> Vec<u32> {
    let first = (mix(step) % 1_000_000) as u32;
    ramp(first, 1 + first as usize % 7)
}

fn is_well_formed(values: &[u32]) -> bool {
    match values.first() {
        None => true,
        Some(&first) => {
            values.len() == 1 + first as usize % 7
                && values.iter().zip(first..).all(|(v, expected)| *v == expected)
        }
    }
}

fn commit_both(store: &mut ArrayStore<u32>, index: &mut RcuVector<EntryRef>) {
    let handler = Arc::clone(store.generation_handler());
    let generation = handler.current_generation();
    store.assign_generation(generation);
    index.assign_generation(generation);
    handler.inc_generation();
    let oldest = handler.oldest_used_generation();
    store.reclaim_memory(oldest);
    index.reclaim_memory(oldest);
}

#[test]
fn readers_never_observe_torn_arrays() {
    let handler = Arc::new(GenerationHandler::new());
    let config = ArrayStoreConfig::new(TypeMapper::simple(4));
    let mut store = ArrayStore::<u32>::new(config, Arc::clone(&handler)).unwrap();
    let grow = GrowStrategy {
        initial_capacity: 8,
        grow_factor: 0.5,
        min_grow: 8,
    };
    let mut index = RcuVector::new(grow, Arc::clone(&handler)).unwrap();
    let strategy = CompactionStrategy::new(0.05, 0.2).with_slack(0, 0);

    let (stop_tx, stop_rx) = bounded::<()>(0);
    let (count_tx, count_rx) = bounded::<u64>(READERS);

    thread::scope(|s| {
        for _ in 0..READERS {
            let store_reader = store.reader();
            let index_reader = index.reader();
            let stop = stop_rx.clone();
            let counts = count_tx.clone();
            s.spawn(move || {
                let mut checked = 0u64;
                loop {
                    match stop.try_recv() {
                        Err(TryRecvError::Empty) => {}
                        _ => break,
                    }
                    let guard = index_reader.take_guard();
                    let view = index_reader.view(&guard, KEYS);
                    for entry in view.iter() {
                        let values = store_reader.get(&guard, entry).to_vec();
                        assert!(is_well_formed(&values), "torn read: {values:?}");
                        checked += 1;
                    }
                }
                counts.send(checked).unwrap();
            });
        }
        drop(count_tx);

        index.ensure_size(KEYS, EntryRef::NULL).unwrap();
        for step in 0..STEPS {
            let key = (mix(step ^ 0xabcd) % KEYS as u64) as usize;
            let fresh = store.add(&array_for(step)).unwrap();
            let old = index.get(key);
            index.set(key, fresh);
            store.remove(old);
            if step % 16 == 0 {
                commit_both(&mut store, &mut index);
            }
            if step % 512 == 0 {
                store.consider_compact(&strategy, &mut index).unwrap();
            }
        }
        drop(stop_tx);
    });

    let total: u64 = count_rx.iter().sum();
    assert!(total > 0, "readers made no progress");
    for key in 0..KEYS {
        assert!(is_well_formed(&store.get(index.get(key)).to_vec()));
    }
    commit_both(&mut store, &mut index);
    commit_both(&mut store, &mut index);
    assert_eq!(store.held_items(), 0);
}

#[test]
fn pinned_guard_holds_removed_entry_across_threads() {
    let handler = Arc::new(GenerationHandler::new());
    let mut store =
        ArrayStore::<u32>::new(ArrayStoreConfig::new(TypeMapper::simple(4)), handler).unwrap();
    let r = store.add(&[10, 11, 12]).unwrap();
    let reader = store.reader();

    let (pinned_tx, pinned_rx) = bounded::<()>(0);
    let (release_tx, release_rx) = bounded::<()>(0);

    thread::scope(|s| {
        let seen = s.spawn(move || {
            let guard = reader.take_guard();
            pinned_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            reader.get(&guard, r).to_vec()
        });

        pinned_rx.recv().unwrap();
        store.remove(r);
        tessera_test_utils::commit(&mut store);
        assert_eq!(store.held_items(), 1);
        assert_eq!(store.free_list_len(3), 0);
        release_tx.send(()).unwrap();
        assert_eq!(seen.join().unwrap(), vec![10, 11, 12]);
    });

    tessera_test_utils::commit(&mut store);
    assert_eq!(store.held_items(), 0);
    assert_eq!(store.free_list_len(3), 1);
}
