use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use unicorn_assets::{
    map::ConcurrentMap,
    model::{AssetKey, Priority},
    pool::Config,
    queue::{Task, TaskQueue},
    storage::Storage,
};
use std::{hint::black_box, sync::Arc, thread};

// Benchmark 1: запрос уникальных ассетов через пул
fn bench_request_unique(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_unique");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let storage = Storage::with_config(Config::cpu_bound());
                let handles: Vec<_> = (0..size)
                    .map(|i| storage.request(format!("asset_{}", i), move |_| Ok(black_box(i))))
                    .collect();
                for handle in handles {
                    black_box(handle.wait().unwrap());
                }
            });
        });
    }

    group.finish();
}

// Benchmark 2: повторные запросы одного ключа (кэш)
fn bench_request_cached(c: &mut Criterion) {
    let storage = Storage::new(2);
    storage.request("cached.png", |_| Ok(vec![0u8; 4096])).wait().unwrap();

    c.bench_function("request_cached", |b| {
        b.iter(|| black_box(storage.request("cached.png", |_| Ok(Vec::new())).wait().unwrap()));
    });
}

// Benchmark 3: очередь без воркеров
fn bench_queue_push_snatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_snatch");

    for priority in [Priority::Normal, Priority::High] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", priority)), &priority, |b, &priority| {
            let queue = TaskQueue::new();
            let key = AssetKey::from("bench");
            b.iter(|| {
                for _ in 0..1000 {
                    queue.push(Task::new(key.clone(), priority, |_| Ok(0u8))).unwrap();
                }
                while let Some(task) = queue.try_snatch() {
                    black_box(task);
                }
            });
        });
    }

    group.finish();
}

// Benchmark 4: конкурентный update в ConcurrentMap
fn bench_map_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_contention");

    for threads in [1, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let map = Arc::new(ConcurrentMap::new());
            for i in 0..64 {
                map.insert(i, 0u64);
            }
            b.iter(|| {
                let workers: Vec<_> = (0..threads)
                    .map(|t| {
                        let map = map.clone();
                        thread::spawn(move || {
                            for i in 0..1000 {
                                map.update(&((i + t) % 64), |v| *v += 1);
                            }
                        })
                    })
                    .collect();
                for w in workers {
                    w.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_request_unique,
    bench_request_cached,
    bench_queue_push_snatch,
    bench_map_contention,
);
criterion_main!(benches);
