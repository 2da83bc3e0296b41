use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use seglog::{Store, StoreOptions};

const BENCH_SEED: u64 = 0x5e6_109;
const KEY_SPACE: usize = 10_000;
const VALUE: &str = "sixty-four-bytes-of-payload-to-keep-record-sizes-comparable....";

fn bench_options() -> StoreOptions {
    StoreOptions {
        // Large enough that rollover cost does not dominate the put numbers.
        max_segment_size: 64 * 1024 * 1024,
        worker_pool_size: 32,
        ..StoreOptions::default()
    }
}

struct Fixture {
    _dir: TempDir,
    store: Store,
}

fn populated_fixture(keys: usize) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::open(dir.path(), bench_options()).expect("open");
    for i in 0..keys {
        store.put(&format!("key{:06}", i), VALUE).expect("put");
    }
    Fixture { _dir: dir, store }
}

fn bench_put(c: &mut Criterion) {
    let fixture = populated_fixture(0);
    let mut rng = StdRng::seed_from_u64(BENCH_SEED);

    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Elements(1));
    group.bench_function("random_key", |b| {
        b.iter(|| {
            let key = format!("key{:06}", rng.gen_range(0..KEY_SPACE));
            fixture.store.put(&key, VALUE).expect("put");
        })
    });
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let fixture = populated_fixture(KEY_SPACE);
    let mut rng = StdRng::seed_from_u64(BENCH_SEED);

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));
    group.bench_function("random_key", |b| {
        b.iter(|| {
            let key = format!("key{:06}", rng.gen_range(0..KEY_SPACE));
            fixture.store.get(&key).expect("get")
        })
    });
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.sample_size(10);
    group.bench_function("2k_live_keys", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().expect("tempdir");
                let store = Store::open(
                    dir.path(),
                    StoreOptions {
                        max_segment_size: 16 * 1024,
                        ..bench_options()
                    },
                )
                .expect("open");
                // Two passes so merge actually has superseded records to drop.
                for pass in 0..2 {
                    for i in 0..2_000 {
                        store
                            .put(&format!("key{:06}", i), &format!("{}-{}", VALUE, pass))
                            .expect("put");
                    }
                }
                Fixture { _dir: dir, store }
            },
            |fixture| fixture.store.merge().expect("merge"),
            BatchSize::PerIteration,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_merge);
criterion_main!(benches);
