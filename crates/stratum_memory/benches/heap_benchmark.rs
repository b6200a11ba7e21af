//! # Heap Strategy Benchmark
//!
//! Allocation throughput of each strategy over a pre-claimed block.
//!
//! Run with: `cargo bench --package stratum_memory`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stratum_memory::{
    BuildProfile, CircularHeap, FreeListHeap, Heap, LinearHeap, MemoryConfig, MemoryManager,
    MemorySize, RawHeap, SizeLiteral, StackHeap, TaggedHeap,
};

/// Bytes claimed per heap.
const HEAP_BYTES: usize = 1024 * 1024;

/// Allocations per iteration.
const ALLOCATIONS: usize = 1000;

fn raw() -> RawHeap {
    RawHeap::new(MemorySize::from_usize(HEAP_BYTES)).unwrap()
}

/// Benchmark: bump allocations followed by one reset.
fn bench_linear(c: &mut Criterion) {
    let mut base = raw();
    let mut heap = LinearHeap::new(base.carve(HEAP_BYTES).unwrap());

    c.bench_function("linear_1000_allocs_and_reset", |b| {
        b.iter(|| {
            for _ in 0..ALLOCATIONS {
                black_box(heap.allocate(64).unwrap());
            }
            heap.free();
        });
    });
}

/// Benchmark: push then pop in LIFO order.
fn bench_stack(c: &mut Criterion) {
    let mut base = raw();
    let mut heap = StackHeap::new(base.carve(HEAP_BYTES).unwrap());
    let mut live = Vec::with_capacity(ALLOCATIONS);

    c.bench_function("stack_1000_push_pop", |b| {
        b.iter(|| {
            for _ in 0..ALLOCATIONS {
                live.push(heap.allocate(64).unwrap());
            }
            while let Some(allocation) = live.pop() {
                heap.deallocate(allocation).unwrap();
            }
        });
    });
}

/// Benchmark: FIFO allocate/release through the ring.
fn bench_circular(c: &mut Criterion) {
    let mut base = raw();
    let mut heap = CircularHeap::new(base.carve(HEAP_BYTES).unwrap());

    c.bench_function("circular_1000_fifo", |b| {
        b.iter(|| {
            let mut previous = heap.allocate(64).unwrap();
            for _ in 1..ALLOCATIONS {
                let next = heap.allocate(64).unwrap();
                heap.deallocate(previous).unwrap();
                previous = next;
            }
            heap.deallocate(previous).unwrap();
        });
    });
}

/// Benchmark: interleaved release forcing splits and coalescing.
fn bench_free_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("free_list_alloc_release");

    for size in [16_usize, 128, 1024] {
        let mut base = raw();
        let mut heap = FreeListHeap::new(base.carve(HEAP_BYTES).unwrap()).unwrap();
        let mut live = Vec::with_capacity(256);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                for _ in 0..256 {
                    live.push(heap.allocate(size).unwrap());
                }
                // Evens first, then odds, so every release has a free neighbour.
                for allocation in live.iter().step_by(2) {
                    heap.deallocate(*allocation).unwrap();
                }
                for allocation in live.iter().skip(1).step_by(2) {
                    heap.deallocate(*allocation).unwrap();
                }
                live.clear();
            });
        });
    }

    group.finish();
}

/// Benchmark: allocate under several tags, free one tag at a time.
fn bench_tagged(c: &mut Criterion) {
    let mut base = raw();
    let mut heap = TaggedHeap::new(base.carve(HEAP_BYTES).unwrap(), 64 * 1024, 16).unwrap();

    c.bench_function("tagged_4_tags_bulk_free", |b| {
        b.iter(|| {
            for index in 0..ALLOCATIONS {
                black_box(heap.allocate((index % 4) as u32, 128).unwrap());
            }
            for tag in 0..4 {
                heap.free_blocks(tag);
            }
        });
    });
}

/// Benchmark: a full frame through the manager.
fn bench_manager_frame(c: &mut Criterion) {
    let mut memory = MemoryManager::from_config(&MemoryConfig::default(), BuildProfile::Development).unwrap();
    let mut frame = 0_u64;

    c.bench_function("manager_frame_with_tracking", |b| {
        b.iter(|| {
            memory.start_frame(frame);
            let heap = memory.get_transient_region_mut().frame_heap_mut();
            for _ in 0..ALLOCATIONS {
                black_box(heap.allocate(256).unwrap());
            }
            black_box(memory.end_frame());
            frame += 1;
        });
    });
    assert!(memory.usage().total() >= 1_i64.mb());
}

criterion_group!(
    benches,
    bench_linear,
    bench_stack,
    bench_circular,
    bench_free_list,
    bench_tagged,
    bench_manager_frame,
);
criterion_main!(benches);
