//! Benchmarks for keel-storage table stores.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keel_core::schema::{TableBuilder, TableSchema};
use keel_core::{DataType, Value};
use keel_storage::{CellCache, MasterTableJournal, MasterTableStore, StoreOptions};
use std::sync::Arc;
use tempfile::TempDir;

fn schema() -> TableSchema {
    TableBuilder::new("quotes")
        .unwrap()
        .add_column("id", DataType::Int64)
        .unwrap()
        .add_column("price", DataType::Float64)
        .unwrap()
        .add_column("symbol", DataType::String)
        .unwrap()
        .build()
        .unwrap()
}

fn options() -> StoreOptions {
    StoreOptions {
        sync_writes: false,
        background_work: false,
        ..StoreOptions::default()
    }
}

fn row(i: u64) -> Vec<Value> {
    vec![
        Value::Int64(i as i64),
        Value::Float64(100.0 + ((i * 7919) % 1000) as f64 * 0.1),
        Value::String(format!("SYM{}", i % 97)),
    ]
}

fn populated(dir: &TempDir, count: u64, cache: usize) -> Arc<MasterTableStore> {
    let store =
        MasterTableStore::create(dir.path(), 1, schema(), Arc::new(CellCache::new(cache)), options())
            .unwrap();
    let mut journal = MasterTableJournal::new(1);
    for i in 0..count {
        journal.add(store.add_row(row(i)).unwrap());
    }
    let mut set = store.latest_index_set();
    store.replay_journal(&mut set, journal.entries()).unwrap();
    store.commit_transaction_change(1, journal, set).unwrap();
    store
}

fn table_store_commit_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_store_commit");
    group.sample_size(10);

    for size in [100u64, 1000, 5000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                black_box(populated(&dir, size, 64 * 1024));
            });
        });
    }

    group.finish();
}

fn table_store_read_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_store_read_uncached");

    for size in [1000u64, 10000].iter() {
        let dir = TempDir::new().unwrap();
        let store = populated(&dir, *size, 0);
        let rows = store.snapshot_index_set().rows();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                for r in &rows {
                    black_box(store.get_row(*r).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn table_store_derive_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_store_derive_subset");

    for size in [1000u64, 10000].iter() {
        let dir = TempDir::new().unwrap();
        let store = populated(&dir, *size, 64 * 1024);
        let rows: Vec<u64> = store.snapshot_index_set().rows().into_iter().step_by(2).collect();
        // Warm the rank cache so later iterations take the rank path.
        store.derive_subset_index(1, &rows).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(store.derive_subset_index(1, &rows).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    table_store_commit_benchmark,
    table_store_read_benchmark,
    table_store_derive_benchmark
);
criterion_main!(benches);
