use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use file_cache::{CacheValue, LruIndex};

#[derive(Clone)]
struct Blob(u64);

impl CacheValue for Blob {
    fn size(&self) -> u64 {
        self.0
    }
}

fn key(i: u64) -> Vec<u8> {
    i.to_le_bytes().to_vec()
}

fn insert_under_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("lru_index_insert");
    for entry_size in [4096u64, 64 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(entry_size), &entry_size, |b, &entry_size| {
            let idx: LruIndex<Blob> = LruIndex::new(entry_size * 1024);
            let mut i = 0u64;
            b.iter(|| {
                idx.insert(key(i), Blob(entry_size)).unwrap();
                i += 1;
            });
            black_box(idx.current_bytes());
        });
    }
    group.finish();
}

fn lookup_hot_set(c: &mut Criterion) {
    let idx: LruIndex<Blob> = LruIndex::new(u64::MAX);
    for i in 0..10_000u64 {
        idx.insert(key(i), Blob(64)).unwrap();
    }

    c.bench_function("lru_index_lookup_promote", |b| {
        b.iter(|| {
            black_box(idx.lookup(&key(black_box(5_000))));
        });
    });

    c.bench_function("lru_index_lookup_peek", |b| {
        b.iter(|| {
            black_box(idx.lookup_peek(&key(black_box(5_000))));
        });
    });
}

criterion_group!(benches, insert_under_pressure, lookup_hot_set);
criterion_main!(benches);
