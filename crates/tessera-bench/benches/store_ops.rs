//! Criterion micro-benchmarks for array store add, read, and maintenance.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tessera_arena::{ArrayStore, ArrayStoreConfig, GenerationHandler, TypeMapper};
use tessera_core::{CompactionStrategy, EntryRef};
use tessera_test_utils::commit;
use tessera_test_utils::fixtures::{lengths, pattern};

fn new_store() -> ArrayStore<u32> {
    ArrayStore::new(
        ArrayStoreConfig::new(TypeMapper::simple(32)),
        Arc::new(GenerationHandler::new()),
    )
    .unwrap()
}

/// 10K arrays with lengths in `0..=40`, so some land in the large class.
fn arrays_10k() -> Vec<Vec<u32>> {
    lengths(11, 10_000, 40)
        .into_iter()
        .enumerate()
        .map(|(i, len)| pattern(i as u64, len))
        .collect()
}

/// Benchmark: add 10K mixed-length arrays into a fresh store.
fn bench_add_10k(c: &mut Criterion) {
    let arrays = arrays_10k();
    c.bench_function("store_add_10k", |b| {
        b.iter_batched(
            new_store,
            |mut store| {
                for a in &arrays {
                    black_box(store.add(a).unwrap());
                }
                store
            },
            BatchSize::LargeInput,
        );
    });
}

/// Benchmark: resolve 10K refs through a reader under one guard.
fn bench_read_10k(c: &mut Criterion) {
    let mut store = new_store();
    let refs: Vec<EntryRef> = arrays_10k().iter().map(|a| store.add(a).unwrap()).collect();
    let reader = store.reader();
    c.bench_function("store_read_10k", |b| {
        b.iter(|| {
            let guard = reader.take_guard();
            let mut sum = 0u64;
            for r in &refs {
                sum += reader.get(&guard, *r).iter().map(u64::from).sum::<u64>();
            }
            black_box(sum)
        });
    });
}

/// Benchmark: remove and re-add 1K arrays, then run one maintenance cycle.
fn bench_churn_1k(c: &mut Criterion) {
    let mut store = new_store();
    let arrays = arrays_10k();
    let mut refs: Vec<EntryRef> = arrays.iter().map(|a| store.add(a).unwrap()).collect();
    let mut cursor = 0usize;
    c.bench_function("store_churn_1k", |b| {
        b.iter(|| {
            for _ in 0..1_000 {
                let i = cursor % refs.len();
                store.remove(refs[i]);
                refs[i] = store.add(&arrays[(i * 7) % arrays.len()]).unwrap();
                cursor += 1;
            }
            commit(&mut store);
        });
    });
}

/// Benchmark: compact a store where half the entries are dead.
fn bench_compact_half_dead(c: &mut Criterion) {
    let arrays = arrays_10k();
    let strategy = CompactionStrategy::compact_all_active_buffers();
    c.bench_function("store_compact_half_dead", |b| {
        b.iter_batched(
            || {
                let mut store = new_store();
                let mut refs: Vec<EntryRef> =
                    arrays.iter().map(|a| store.add(a).unwrap()).collect();
                for r in refs.iter_mut().step_by(2) {
                    store.remove(*r);
                    *r = EntryRef::NULL;
                }
                commit(&mut store);
                (store, refs)
            },
            |(mut store, mut refs)| {
                let report = store.compact_worst(&strategy, &mut refs).unwrap();
                black_box(report.moved_entries);
                (store, refs)
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_add_10k,
    bench_read_10k,
    bench_churn_1k,
    bench_compact_half_dead
);
criterion_main!(benches);
