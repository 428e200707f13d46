//! Transaction path benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use undolog_bench::{alloc_slots, bench_engine, random_data};
use undolog_core::{Engine, EngineConfig};
use undolog_pmem::{Heap, InMemoryRegion, PersistentMemory};

fn config() -> EngineConfig {
    EngineConfig::new()
        .pool_size(4)
        .initial_log_capacity(128)
        .large_pool_size(1)
        .large_log_capacity(4096)
}

/// Benchmark transaction overhead (empty transaction).
fn bench_transaction_overhead(c: &mut Criterion) {
    c.bench_function("transaction_overhead", |b| {
        let engine = bench_engine(config());
        let mut tx = engine.acquire().unwrap();

        b.iter(|| {
            tx.begin();
            black_box(tx.end().unwrap());
        });
    });
}

/// Benchmark committing transactions of increasing size.
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for writes in [1usize, 8, 64].iter() {
        group.throughput(Throughput::Elements(*writes as u64));
        group.bench_with_input(BenchmarkId::from_parameter(writes), writes, |b, &writes| {
            let engine = bench_engine(config());
            let slots = alloc_slots(&engine, writes);
            let mut tx = engine.acquire().unwrap();

            b.iter(|| {
                tx.begin();
                for (i, slot) in slots.iter().enumerate() {
                    tx.log_set(*slot, black_box(i as u64)).unwrap();
                }
                tx.end().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark logging byte ranges of increasing size.
fn bench_log_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_range");

    for size in [64usize, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let engine = bench_engine(config());
            let target = engine.heap().alloc(size).unwrap();
            let data = random_data(size);
            let mut tx = engine.acquire().unwrap();

            b.iter(|| {
                tx.begin();
                tx.log_copy(target, black_box(&data)).unwrap();
                tx.end().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark rolling back an abandoned transaction.
fn bench_abort(c: &mut Criterion) {
    let mut group = c.benchmark_group("abort");

    for writes in [1usize, 8, 64].iter() {
        group.throughput(Throughput::Elements(*writes as u64));
        group.bench_with_input(BenchmarkId::from_parameter(writes), writes, |b, &writes| {
            let engine = bench_engine(config());
            let slots = alloc_slots(&engine, writes);

            b.iter(|| {
                let mut tx = engine.acquire().unwrap();
                tx.begin();
                for slot in &slots {
                    tx.log_set(*slot, black_box(0)).unwrap();
                }
                engine.release(tx).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark a transaction that outgrows its initial log.
fn bench_log_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_growth");
    group.sample_size(20);

    group.bench_function("4_to_64", |b| {
        b.iter_batched(
            || {
                let heap = Heap::format(InMemoryRegion::new(1 << 20)).unwrap();
                let config = EngineConfig::new()
                    .pool_size(1)
                    .initial_log_capacity(4)
                    .large_pool_size(0);
                let engine = Engine::open(heap, config).unwrap();
                let slots = alloc_slots(&engine, 64);
                (engine, slots)
            },
            |(engine, slots)| {
                let mut tx = engine.acquire().unwrap();
                tx.begin();
                for slot in &slots {
                    tx.log_set(*slot, 1).unwrap();
                }
                tx.end().unwrap();
                black_box(tx.capacity());
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Benchmark nested Begin/End pairs inside one outer transaction.
fn bench_nested(c: &mut Criterion) {
    c.bench_function("nested_depth_8", |b| {
        let engine = bench_engine(config());
        let slot = alloc_slots(&engine, 1)[0];
        let mut tx = engine.acquire().unwrap();

        b.iter(|| {
            for _ in 0..8 {
                tx.begin();
            }
            tx.log_set(slot, 7).unwrap();
            for _ in 0..8 {
                tx.end().unwrap();
            }
        });
        black_box(engine.heap().memory().load(slot).unwrap());
    });
}

criterion_group!(
    benches,
    bench_transaction_overhead,
    bench_commit,
    bench_log_range,
    bench_abort,
    bench_log_growth,
    bench_nested,
);
criterion_main!(benches);
