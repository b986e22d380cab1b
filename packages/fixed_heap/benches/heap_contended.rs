//! Benchmarks for the locks and for a heap shared between threads.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use fixed_heap::{HeapAllocator, ReentrantLock, SpinLock};
use many_cpus::ProcessorSet;
use new_zealand::nz;
use par_bench::{Run, ThreadPool};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const HEAP_CAPACITY: usize = 1024 * 1024;
const SMALL_ALLOCATION: usize = 64;

fn entrypoint(c: &mut Criterion) {
    let mut one_thread = ThreadPool::new(&ProcessorSet::single());

    // Not every system is going to have enough processors, so only some can do these.
    let mut two_threads = ProcessorSet::builder()
        .take(nz!(2))
        .map(|x| ThreadPool::new(&x));
    let mut four_threads = ProcessorSet::builder()
        .take(nz!(4))
        .map(|x| ThreadPool::new(&x));

    let mut group = c.benchmark_group("locks");

    group.bench_function("spin_lock_uncontended", |b| {
        let lock = SpinLock::new();

        b.iter(|| {
            let _guard = black_box(&lock).lock_guard();
        });
    });

    group.bench_function("reentrant_lock_uncontended", |b| {
        let lock = ReentrantLock::new();

        b.iter(|| {
            let _guard = black_box(&lock).lock_guard();
        });
    });

    group.bench_function("reentrant_lock_nested", |b| {
        let lock = ReentrantLock::new();
        let _outer = lock.lock_guard();

        b.iter(|| {
            let _guard = black_box(&lock).lock_guard();
        });
    });

    let spin_lock = SpinLock::new();

    if let Some(ref mut thread_pool) = two_threads {
        Run::new()
            .iter(|_| {
                let _guard = black_box(&spin_lock).lock_guard();
            })
            .execute_criterion_on(thread_pool, &mut group, "spin_lock_contended_two");
    }

    group.finish();

    let mut group = c.benchmark_group("heap_contended");

    let heap = HeapAllocator::new(HEAP_CAPACITY);

    Run::new()
        .iter(|_| {
            let ptr = heap.allocate(black_box(SMALL_ALLOCATION)).unwrap();
            heap.release(black_box(ptr.as_ptr()));
        })
        .execute_criterion_on(&mut one_thread, &mut group, "allocate_release_one");

    if let Some(ref mut thread_pool) = two_threads {
        Run::new()
            .iter(|_| {
                let ptr = heap.allocate(black_box(SMALL_ALLOCATION)).unwrap();
                heap.release(black_box(ptr.as_ptr()));
            })
            .execute_criterion_on(thread_pool, &mut group, "allocate_release_two");
    }

    if let Some(ref mut thread_pool) = four_threads {
        Run::new()
            .iter(|_| {
                let ptr = heap.allocate(black_box(SMALL_ALLOCATION)).unwrap();
                heap.release(black_box(ptr.as_ptr()));
            })
            .execute_criterion_on(thread_pool, &mut group, "allocate_release_four");

        // Grow by moving, so every iteration holds the lock across a nested allocate + release.
        Run::new()
            .iter(|_| {
                let ptr = heap.allocate(black_box(SMALL_ALLOCATION)).unwrap();
                let ptr = heap
                    .resize(ptr.as_ptr(), black_box(SMALL_ALLOCATION * 4))
                    .unwrap();
                heap.release(black_box(ptr.as_ptr()));
            })
            .execute_criterion_on(thread_pool, &mut group, "resize_grow_four");
    }

    group.finish();
}
