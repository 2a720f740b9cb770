//! Performance benchmarks for sheetsync-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sheetsync_engine::{
    codec, reconcile, CacheSnapshot, ColumnDef, ColumnType, Filter, LogicalClock, Matches,
    PulledRow, Record, Schema,
};
use std::sync::Arc;

fn create_test_schema() -> Schema {
    Schema::new(vec![
        ColumnDef::required("id", ColumnType::Integer),
        ColumnDef::required("name", ColumnType::Text),
        ColumnDef::optional("email", ColumnType::Text),
        ColumnDef::optional("paid", ColumnType::Boolean),
    ])
    .unwrap()
    .with_key("id")
    .unwrap()
}

fn user(i: i64) -> Record {
    Record::new()
        .with("id", i)
        .with("name", format!("User {}", i))
        .with("email", format!("user{}@example.com", i))
        .with("paid", i % 2 == 0)
}

fn sheet(size: i64) -> Vec<PulledRow> {
    (0..size)
        .map(|i| PulledRow {
            position: i as u32 + 2,
            record: user(i),
        })
        .collect()
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let schema = create_test_schema();

    group.bench_function("encode", |b| {
        let record = user(42);
        b.iter(|| codec::encode(black_box(&record), black_box(&schema)))
    });

    group.bench_function("decode", |b| {
        let cells = codec::encode(&user(42), &schema).unwrap();
        b.iter(|| codec::decode(black_box(&cells), black_box(&schema)))
    });

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("decode_sheet", size), size, |b, &size| {
            let mut values = vec![schema.header()];
            values.extend((0..size).map(|i| codec::encode(&user(i), &schema).unwrap()));
            b.iter(|| codec::decode_sheet(black_box(&values), black_box(&schema)))
        });
    }

    group.finish();
}

fn bench_reconciliation(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconciliation");
    let schema = create_test_schema();

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("first_pull", size), size, |b, &size| {
            let ids = LogicalClock::new();
            let empty = CacheSnapshot::empty("Users");
            b.iter(|| {
                reconcile::reconcile_pull(black_box(&empty), sheet(size), &schema, &ids, 1000)
            })
        });

        group.bench_with_input(BenchmarkId::new("repeat_pull", size), size, |b, &size| {
            let ids = LogicalClock::new();
            let empty = CacheSnapshot::empty("Users");
            let (previous, _) = reconcile::reconcile_pull(&empty, sheet(size), &schema, &ids, 1000);
            b.iter(|| {
                reconcile::reconcile_pull(black_box(&previous), sheet(size), &schema, &ids, 2000)
            })
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let schema = create_test_schema();
    let ids = LogicalClock::new();
    let empty = CacheSnapshot::empty("Users");
    let (snapshot, _) = reconcile::reconcile_pull(&empty, sheet(1000), &schema, &ids, 1000);
    let snapshot = Arc::new(snapshot);

    group.bench_function("filter_eq", |b| {
        b.iter(|| {
            Matches::new(Arc::clone(&snapshot), Filter::new().eq("paid", true)).count()
        })
    });

    group.bench_function("find_by_key", |b| {
        b.iter(|| snapshot.find_by_key(black_box("500")).is_some())
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_reconciliation, bench_query);
criterion_main!(benches);
