use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::tempdir;

use silt::engine::LsmEngine;
use silt::{IsolationLevel, Lsm, LsmOptions};

fn bench_options() -> LsmOptions {
    let mut options = LsmOptions::default();
    options.memtable_size_limit = 4 * 1024 * 1024;
    options
}

fn bench_put(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = LsmEngine::open(dir.path(), bench_options()).unwrap();
    let mut i = 0u64;
    c.bench_function("engine_put", |b| {
        b.iter(|| {
            let key = format!("key_{i:012}");
            engine.put(key.as_bytes(), b"value-payload-64-bytes", 0).unwrap();
            i += 1;
        })
    });
}

fn bench_get_memtable(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = LsmEngine::open(dir.path(), bench_options()).unwrap();
    for i in 0..10_000u64 {
        engine
            .put(format!("key_{i:06}").as_bytes(), b"value", 0)
            .unwrap();
    }
    let mut i = 0u64;
    c.bench_function("engine_get_memtable", |b| {
        b.iter(|| {
            let key = format!("key_{:06}", i % 10_000);
            black_box(engine.get(key.as_bytes(), 0).unwrap());
            i += 1;
        })
    });
}

fn bench_get_sst(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = LsmEngine::open(dir.path(), bench_options()).unwrap();
    for i in 0..10_000u64 {
        engine
            .put(format!("key_{i:06}").as_bytes(), b"value", 0)
            .unwrap();
    }
    while engine.total_mem_size() > 0 {
        engine.flush().unwrap();
    }
    let mut i = 0u64;
    c.bench_function("engine_get_sst", |b| {
        b.iter(|| {
            let key = format!("key_{:06}", i % 10_000);
            black_box(engine.get(key.as_bytes(), 0).unwrap());
            i += 1;
        })
    });
}

fn bench_txn_commit(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = Lsm::open_with_options(dir.path(), bench_options()).unwrap();
    let mut i = 0u64;
    c.bench_function("txn_put_commit", |b| {
        b.iter_batched(
            || store.begin_transaction(IsolationLevel::ReadCommitted).unwrap(),
            |mut txn| {
                txn.put(format!("key_{i:012}").as_bytes(), b"value").unwrap();
                assert!(txn.commit().unwrap());
                i += 1;
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_put,
    bench_get_memtable,
    bench_get_sst,
    bench_txn_commit
);
criterion_main!(benches);
