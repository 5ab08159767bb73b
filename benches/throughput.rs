//! Read/write throughput under single- and multi-threaded load.
//!
//! These benchmarks exist to validate the engine's core claim (sustained
//! throughput under many concurrent readers); they are not part of the
//! cache's public contract.

use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flru::{Cache, CacheConfig};

fn bench_single_threaded_get_hit(c: &mut Criterion) {
    let cache: Cache<u64, u64> = Cache::new(CacheConfig::new(4096, 32, 32)).unwrap();
    for k in 0..4096u64 {
        cache.put(k, k).unwrap();
    }

    let mut group = c.benchmark_group("get_hit_single_thread");
    group.throughput(Throughput::Elements(1));
    group.bench_function("get", |b| {
        let mut key = 0u64;
        b.iter(|| {
            let v = cache.get(&key);
            key = (key + 1) % 4096;
            std::hint::black_box(v)
        });
    });
    group.finish();
}

fn bench_single_threaded_put(c: &mut Criterion) {
    let cache: Cache<u64, u64> = Cache::new(CacheConfig::new(4096, 32, 32)).unwrap();

    let mut group = c.benchmark_group("put_single_thread");
    group.throughput(Throughput::Elements(1));
    group.bench_function("put", |b| {
        let mut key = 0u64;
        b.iter(|| {
            cache.put(key, key).unwrap();
            key = (key + 1) % 4096;
        });
    });
    group.finish();
}

fn bench_concurrent_readers(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_hit_concurrent_readers");
    for reader_count in [1usize, 4, 8, 16] {
        group.throughput(Throughput::Elements(reader_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(reader_count),
            &reader_count,
            |b, &reader_count| {
                let cache: Arc<Cache<u64, u64>> =
                    Arc::new(Cache::new(CacheConfig::new(16384, 32, 32)).unwrap());
                for k in 0..16384u64 {
                    cache.put(k, k).unwrap();
                }

                b.iter(|| {
                    let handles: Vec<_> = (0..reader_count)
                        .map(|t| {
                            let cache = cache.clone();
                            thread::spawn(move || {
                                let mut key = t as u64;
                                for _ in 0..1000 {
                                    std::hint::black_box(cache.get(&key));
                                    key = (key + 1) % 16384;
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_threaded_get_hit,
    bench_single_threaded_put,
    bench_concurrent_readers
);
criterion_main!(benches);
