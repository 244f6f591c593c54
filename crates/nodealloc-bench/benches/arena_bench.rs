//! Node arena benchmarks against the system allocator.

use std::ptr::NonNull;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nodealloc_core::{Arena, ArenaConfig, FailureMode, LocalArena, StdHeap};

const SIZES: &[usize] = &[8, 24, 64, 128, 512];

fn error_config() -> ArenaConfig {
    ArenaConfig::new().with_failure_mode(FailureMode::Error)
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free_cycle");
    let arena = Arena::with_config(StdHeap::new(), error_config());
    let local = LocalArena::with_parts(StdHeap::new(), error_config());

    for &size in SIZES {
        group.bench_with_input(BenchmarkId::new("malloc", size), &size, |b, &sz| {
            b.iter(|| unsafe {
                let p = libc::malloc(sz);
                criterion::black_box(p);
                libc::free(p);
            });
        });
        group.bench_with_input(BenchmarkId::new("arena", size), &size, |b, &sz| {
            b.iter(|| {
                let p = arena.allocate(sz).unwrap();
                criterion::black_box(p);
                unsafe { arena.deallocate(p, sz) };
            });
        });
        group.bench_with_input(BenchmarkId::new("local_arena", size), &size, |b, &sz| {
            b.iter(|| {
                let p = local.allocate(sz).unwrap();
                criterion::black_box(p);
                unsafe { local.deallocate(p, sz) };
            });
        });
    }
    group.finish();
}

fn bench_node_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_burst");
    let arena = Arena::with_config(StdHeap::new(), error_config());

    group.bench_function("malloc_1000x32B", |b| {
        b.iter(|| unsafe {
            let ptrs: Vec<*mut libc::c_void> = (0..1000).map(|_| libc::malloc(32)).collect();
            for p in criterion::black_box(ptrs) {
                libc::free(p);
            }
        });
    });
    group.bench_function("arena_1000x32B", |b| {
        let mut ptrs: Vec<NonNull<u8>> = Vec::with_capacity(1000);
        b.iter(|| {
            ptrs.extend((0..1000).map(|_| arena.allocate(32).unwrap()));
            for p in criterion::black_box(&mut ptrs).drain(..) {
                unsafe { arena.deallocate(p, 32) };
            }
        });
    });
    group.finish();
}

fn bench_mixed_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_churn");
    let arena = Arena::with_config(StdHeap::new(), error_config());
    let sizes: Vec<usize> = (0..256).map(|i| (i * 37) % 160 + 1).collect();

    group.bench_function("malloc", |b| {
        b.iter(|| unsafe {
            let mut live: Vec<*mut libc::c_void> = Vec::with_capacity(64);
            for (i, &sz) in sizes.iter().enumerate() {
                live.push(libc::malloc(sz));
                if i % 3 == 2 {
                    libc::free(live.swap_remove(i % live.len()));
                }
            }
            for p in live {
                libc::free(p);
            }
        });
    });
    group.bench_function("arena", |b| {
        b.iter(|| {
            let mut live: Vec<(NonNull<u8>, usize)> = Vec::with_capacity(128);
            for (i, &sz) in sizes.iter().enumerate() {
                live.push((arena.allocate(sz).unwrap(), sz));
                if i % 3 == 2 {
                    let (p, n) = live.swap_remove(i % live.len());
                    unsafe { arena.deallocate(p, n) };
                }
            }
            for (p, n) in live {
                unsafe { arena.deallocate(p, n) };
            }
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_node_burst,
    bench_mixed_churn
);
criterion_main!(benches);
