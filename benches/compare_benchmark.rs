//! Performance benchmarks for objsync
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use objsync::config::{Location, SyncArgs};
use objsync::fs::{Entry, VecLister};
use objsync::hash::md5_hex;
use objsync::storage::{MemoryStore, ObjectStore};
use objsync::sync::{compute_part_layout, Comparator, ComparePolicy, Tree};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

/// Sorted entries where every third key is missing and every fifth differs
fn entries(count: usize, offset: u64) -> (Vec<Entry>, Vec<Entry>) {
    let mut src = Vec::with_capacity(count);
    let mut dst = Vec::with_capacity(count);
    for i in 0..count {
        let key = format!("dir{:03}/file{:08}", i % 1000, i);
        let mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000 + i as u64);
        src.push(Entry::file(key.clone(), 4096, mtime));
        if i % 3 != 0 {
            let size = if i % 5 == 0 { 4096 + offset } else { 4096 };
            dst.push(Entry::file(key, size, mtime));
        }
    }
    (src, dst)
}

fn policy() -> ComparePolicy {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::with_buckets(&["bench"]));
    let mut args = SyncArgs::new(
        Location::Local(PathBuf::from("/bench/src")),
        Location::parse("s3://bench/dst").unwrap(),
    );
    args.delete = true;
    let src = Arc::new(Tree::root_of(&args.source, &store));
    let dst = Arc::new(Tree::root_of(&args.destination, &store));
    ComparePolicy::new(&args, src, dst).unwrap()
}

fn bench_comparator(c: &mut Criterion) {
    let mut group = c.benchmark_group("comparator");

    for count in [1_000usize, 10_000, 100_000].iter() {
        let (src, dst) = entries(*count, 1);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let comparator = Comparator::new(
                    VecLister::new(src.clone()),
                    VecLister::new(dst.clone()),
                    policy(),
                );
                black_box(comparator.filter(|d| d.is_ok()).count())
            });
        });
    }

    group.finish();
}

fn bench_part_layout(c: &mut Criterion) {
    c.bench_function("part_layout", |b| {
        b.iter(|| {
            let mut parts = 0u64;
            for gib in 1..=512u64 {
                let layout = compute_part_layout(black_box(gib << 30), 8 * 1024 * 1024);
                parts += layout.parts_num as u64;
            }
            parts
        });
    });
}

fn bench_record_names(c: &mut Criterion) {
    c.bench_function("breakpoint_record_name", |b| {
        b.iter(|| md5_hex(black_box(b"/data/photos/2024/img_0001.raw_s3://bucket/photos/2024/img_0001.raw")));
    });
}

criterion_group!(benches, bench_comparator, bench_part_layout, bench_record_names);
criterion_main!(benches);
