//! Micro-benchmarks for the core LSM-tree operations.
//!
//! ```bash
//! cargo bench --bench micro
//! cargo bench --bench micro -- put
//! ```

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use lsmkv::compaction::CompactionThresholds;
use lsmkv::config::EngineConfig;
use lsmkv::LsmTree;

const VALUE_128B: &[u8; 128] = &[0xAB; 128];

fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

fn memtable_only_config() -> EngineConfig {
    EngineConfig {
        memtable_threshold: 10_000_000,
        ..EngineConfig::default()
    }
}

fn small_buffer_config() -> EngineConfig {
    EngineConfig {
        memtable_threshold: 64,
        ..EngineConfig::default()
    }
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    group.bench_function("memtable_only", |b| {
        let mut tree = LsmTree::new(memtable_only_config());
        let mut seq = 0u64;
        b.iter(|| {
            let key = make_key(seq);
            tree.put(black_box(key), black_box(VALUE_128B.to_vec())).unwrap();
            seq += 1;
        });
    });

    group.bench_function("sequential_with_flush", |b| {
        let mut tree = LsmTree::new(small_buffer_config());
        let mut seq = 0u64;
        b.iter(|| {
            let key = make_key(seq);
            tree.put(black_box(key), black_box(VALUE_128B.to_vec())).unwrap();
            seq += 1;
        });
    });

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    {
        let mut tree = LsmTree::new(memtable_only_config());
        let n = 10_000u64;
        for i in 0..n {
            tree.put(make_key(i), VALUE_128B.to_vec()).unwrap();
        }

        group.bench_function("memtable_hit", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(i % n);
                let _ = black_box(tree.get(black_box(&key)).unwrap());
                i += 1;
            });
        });

        group.bench_function("memtable_miss", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(n + i);
                let _ = black_box(tree.get(black_box(&key)).unwrap());
                i += 1;
            });
        });
    }

    {
        let mut tree = LsmTree::new(small_buffer_config());
        let n = 5_000u64;
        for i in 0..n {
            tree.put(make_key(i), VALUE_128B.to_vec()).unwrap();
        }

        group.bench_function("sstable_hit", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(i % n);
                let _ = black_box(tree.get(black_box(&key)).unwrap());
                i += 1;
            });
        });

        group.bench_function("sstable_miss", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(n + i);
                let _ = black_box(tree.get(black_box(&key)).unwrap());
                i += 1;
            });
        });
    }

    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete");

    group.bench_function("point", |b| {
        let mut tree = LsmTree::new(memtable_only_config());
        let mut seq = 0u64;
        b.iter(|| {
            let key = make_key(seq);
            tree.delete(black_box(key)).unwrap();
            seq += 1;
        });
    });

    group.finish();
}

fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");
    group.sample_size(10);

    for &count in &[1_000u64, 5_000] {
        group.bench_function(BenchmarkId::new("l0_to_l1", count), |b| {
            b.iter_batched(
                || {
                    let mut config = small_buffer_config();
                    config.level_compaction_thresholds = CompactionThresholds {
                        l0: 1_000_000,
                        ..CompactionThresholds::default()
                    };
                    let mut tree = LsmTree::new(config);
                    for i in 0..count {
                        tree.put(make_key(i), VALUE_128B.to_vec()).unwrap();
                    }
                    tree
                },
                |mut tree| {
                    let _ = black_box(tree.compact(0));
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn bench_value_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_size");

    let sizes: &[(&str, usize)] = &[("64B", 64), ("256B", 256), ("1K", 1024), ("4K", 4096)];

    for &(label, size) in sizes {
        let value = vec![0xEF_u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::new("put", label), |b| {
            let mut tree = LsmTree::new(memtable_only_config());
            let mut seq = 0u64;
            b.iter(|| {
                let key = make_key(seq);
                tree.put(black_box(key), black_box(value.clone())).unwrap();
                seq += 1;
            });
        });
    }

    group.finish();
}

fn bench_dataset_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("dataset_scaling");
    group.sample_size(10);

    for &count in &[1_000u64, 10_000, 50_000] {
        group.bench_function(BenchmarkId::new("get", count), |b| {
            let mut tree = LsmTree::new(small_buffer_config());
            for i in 0..count {
                tree.put(make_key(i), VALUE_128B.to_vec()).unwrap();
            }
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(i % count);
                let _ = black_box(tree.get(black_box(&key)).unwrap());
                i += 1;
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_put,
    bench_get,
    bench_delete,
    bench_compaction,
    bench_value_sizes,
    bench_dataset_scaling,
);
criterion_main!(benches);
