//! Benchmarks for transaction commits.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keel_core::schema::{TableBuilder, TableSchema};
use keel_core::{DataType, Value};
use keel_database::{Conglomerate, DatabaseConfig};
use keel_storage::{IndexQuery, MutableRowSet};
use tempfile::TempDir;

fn schema() -> TableSchema {
    TableBuilder::new("orders")
        .unwrap()
        .add_column("id", DataType::Int64)
        .unwrap()
        .add_column("amount", DataType::Float64)
        .unwrap()
        .add_column("customer", DataType::String)
        .unwrap()
        .add_primary_key(&["id"])
        .unwrap()
        .build()
        .unwrap()
}

fn row(i: i64) -> Vec<Value> {
    vec![
        Value::Int64(i),
        Value::Float64((i % 500) as f64 * 1.25),
        Value::String(format!("customer-{}", i % 53)),
    ]
}

fn open(dir: &TempDir) -> Conglomerate {
    let config = DatabaseConfig::new(dir.path())
        .with_sync_writes(false)
        .with_background_work(false);
    let db = Conglomerate::create(config).unwrap();
    let mut txn = db.create_transaction().unwrap();
    txn.create_table(schema()).unwrap();
    txn.commit().unwrap();
    db
}

fn insert_commit_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_commit");
    group.sample_size(10);

    for size in [10i64, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let db = open(&dir);
            let mut next = 0i64;
            b.iter(|| {
                let mut txn = db.create_transaction().unwrap();
                let mut table = txn.get_table("orders").unwrap();
                for _ in 0..size {
                    table.add_row(row(next)).unwrap();
                    next += 1;
                }
                black_box(txn.commit().unwrap());
            });
        });
    }

    group.finish();
}

fn concurrent_commit_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("interleaved_commit");
    group.sample_size(10);

    // Transactions overlap, so each commit merges against journals of the
    // commits that happened since its snapshot.
    for open_count in [2usize, 8].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(open_count),
            open_count,
            |b, &open_count| {
                let dir = TempDir::new().unwrap();
                let db = open(&dir);
                let mut next = 0i64;
                b.iter(|| {
                    let mut txns: Vec<_> =
                        (0..open_count).map(|_| db.create_transaction().unwrap()).collect();
                    for txn in txns.iter_mut() {
                        let mut table = txn.get_table("orders").unwrap();
                        for _ in 0..50 {
                            table.add_row(row(next)).unwrap();
                            next += 1;
                        }
                    }
                    for txn in txns {
                        black_box(txn.commit().unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn point_lookup_benchmark(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let mut txn = db.create_transaction().unwrap();
    let mut table = txn.get_table("orders").unwrap();
    for i in 0..10_000 {
        table.add_row(row(i)).unwrap();
    }
    txn.commit().unwrap();

    c.bench_function("point_lookup", |b| {
        let mut txn = db.create_transaction().unwrap();
        let table = txn.get_table("orders").unwrap();
        let mut i = 0i64;
        b.iter(|| {
            i = (i + 7919) % 10_000;
            black_box(table.select_equal(0, &Value::Int64(i)).unwrap());
        });
    });
}

criterion_group!(
    benches,
    insert_commit_benchmark,
    concurrent_commit_benchmark,
    point_lookup_benchmark
);
criterion_main!(benches);
