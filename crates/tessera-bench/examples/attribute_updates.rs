//! Multi-value attribute under a continuous update stream.
//!
//! Demonstrates: build mapping → apply update batches → commit → consider
//! compaction → read through a view pinned on another thread.

use std::thread;

use tessera_bench::{build_mapping, fragmenting_profile, run_updates, UpdateStream};
use tessera_core::CompactionStrategy;

fn main() {
    println!("=== Tessera Attribute Update Example ===\n");

    let docs = 20_000u32;
    let mut mapping = build_mapping(fragmenting_profile(), docs as usize).unwrap();
    let strategy = CompactionStrategy::new(0.05, 0.2).with_slack(0, 0);

    for batch in 0..10u64 {
        let stats = run_updates(
            &mut mapping,
            UpdateStream::new(batch, docs, 12).take(20_000),
            1_000,
            &strategy,
        )
        .unwrap();
        let usage = mapping.memory_usage();
        let space = mapping.address_space_usage();
        println!(
            "  batch {:>2}: sets={:>6} compactions={:>3} allocated={:>9}B dead_ratio={:>6.3} refs_used={:>7}/{}",
            batch + 1,
            stats.sets,
            stats.compactions,
            usage.allocated_bytes,
            usage.dead_ratio(),
            space.used(),
            space.limit(),
        );
    }

    // A reader on another thread sees one consistent array per doc.
    let reader = mapping.reader();
    let total = thread::spawn(move || {
        let view = reader.make_read_view(docs as usize);
        (0..view.limit() as u32).map(|doc| view.get(doc).len()).sum::<usize>()
    })
    .join()
    .unwrap();

    println!("\nValues seen by reader: {total}");
    println!("Values tracked by writer: {}", mapping.total_values());
    println!("Done.");
}
