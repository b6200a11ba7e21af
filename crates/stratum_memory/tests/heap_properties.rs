//! # Heap Property Tests
//!
//! The contract each strategy promises, exercised through the public API.

use stratum_memory::{
    CircularHeap, DoubleBufferedHeap, FreeListHeap, Heap, LinearHeap, MemoryError, MemorySize, RawHeap,
    SizeLiteral, StackHeap, TaggedHeap,
};

fn raw(size: usize) -> RawHeap {
    RawHeap::new(MemorySize::from_usize(size)).unwrap()
}

/// Test: bump allocations stay in bounds, never overlap, and restart at the
/// same offset after a reset.
#[test]
fn test_linear_allocations_are_disjoint() {
    let mut base = raw(1024);
    let mut heap = LinearHeap::new(base.carve(1024).unwrap());

    let sizes = [1, 7, 64, 3, 200, 13, 512, 100];
    let mut taken = Vec::new();
    for size in sizes {
        let allocation = heap.allocate(size).unwrap();
        assert!(allocation.end() <= 1024);
        heap.write(&allocation, 0, &vec![size as u8; size]).unwrap();
        taken.push(allocation);
    }
    for pair in taken.windows(2) {
        assert!(pair[0].end() <= pair[1].offset());
    }
    // Writes did not bleed into neighbours.
    for allocation in &taken {
        let mut out = vec![0u8; allocation.size()];
        heap.read(allocation, 0, &mut out).unwrap();
        assert!(out.iter().all(|byte| *byte == allocation.size() as u8));
    }

    let first = taken[0];
    heap.free();
    assert_eq!(heap.current_memory(), MemorySize::ZERO);
    assert_eq!(heap.allocate(32).unwrap().offset(), first.offset());
}

/// Test: A(16), B(32), release B, C(32) puts C where B was.
#[test]
fn test_stack_reclaims_in_lifo_order() {
    let mut base = raw(512);
    let mut stack = StackHeap::new(base.carve(512).unwrap());

    let _a = stack.allocate(16).unwrap();
    let b = stack.allocate(32).unwrap();
    stack.deallocate(b).unwrap();
    let c = stack.allocate(32).unwrap();

    assert_eq!(c.offset(), b.offset());
}

/// Test: releasing A before B is caught instead of corrupting the stack.
#[test]
fn test_stack_out_of_order_release_is_an_error() {
    let mut base = raw(512);
    let mut stack = StackHeap::new(base.carve(512).unwrap());

    let a = stack.allocate(16).unwrap();
    let _b = stack.allocate(32).unwrap();
    assert!(matches!(
        stack.deallocate(a),
        Err(MemoryError::OutOfOrderRelease { .. })
    ));
}

/// Test: two adjacent freed blocks serve one request for their combined size.
#[test]
fn test_free_list_coalesces_adjacent_blocks() {
    let mut base = raw(4096);
    let mut heap = FreeListHeap::new(base.carve(4096).unwrap()).unwrap();

    let a = heap.allocate(512).unwrap();
    let b = heap.allocate(512).unwrap();
    let _fence = heap.allocate(16).unwrap();
    heap.deallocate(a).unwrap();
    heap.deallocate(b).unwrap();

    let joined = heap.allocate(1024).unwrap();
    assert_eq!(joined.offset(), a.offset());
}

/// Test: a freed large block is split for two smaller requests without
/// using more than the large block's span.
#[test]
fn test_free_list_splits_freed_block() {
    let mut base = raw(4096);
    let mut heap = FreeListHeap::new(base.carve(4096).unwrap()).unwrap();

    let large = heap.allocate(1024).unwrap();
    let span_of_large = heap.current_memory();
    heap.deallocate(large).unwrap();

    let x = heap.allocate(400).unwrap();
    let y = heap.allocate(400).unwrap();
    assert!(heap.current_memory() <= span_of_large);
    assert!(x.offset() >= large.offset() && y.end() <= large.end());
}

/// Test: a released free-list handle cannot free the block that reused its
/// space.
#[test]
fn test_free_list_rejects_release_after_reuse() {
    let mut base = raw(1024);
    let mut heap = FreeListHeap::new(base.carve(1024).unwrap()).unwrap();

    let a = heap.allocate(64).unwrap();
    heap.deallocate(a).unwrap();
    let c = heap.allocate(64).unwrap();
    assert_eq!(c.offset(), a.offset());

    assert_eq!(heap.deallocate(a), Err(MemoryError::DoubleFree { offset: a.offset() }));
    let d = heap.allocate(64).unwrap();
    assert_ne!(d.offset(), c.offset());
    heap.deallocate(c).unwrap();
    heap.deallocate(d).unwrap();
    assert_eq!(heap.free_block_count().unwrap(), 1);
}

/// Test: reads and writes through a released free-list handle fail, and
/// the free list survives the attempt.
#[test]
fn test_free_list_access_through_released_handle() {
    let mut base = raw(1024);
    let mut heap = FreeListHeap::new(base.carve(1024).unwrap()).unwrap();

    let big = heap.allocate(256).unwrap();
    heap.deallocate(big).unwrap();
    let small = heap.allocate(16).unwrap();

    assert!(matches!(
        heap.write(&big, 16, &[0xFF; 16]),
        Err(MemoryError::ReleasedAllocation { .. })
    ));
    assert!(matches!(
        heap.read(&big, 0, &mut [0u8; 8]),
        Err(MemoryError::ReleasedAllocation { .. })
    ));
    heap.allocate(32).unwrap();
    heap.deallocate(small).unwrap();
}

/// Test: a released ring handle cannot retire the entry that reused its
/// offset.
#[test]
fn test_ring_rejects_release_after_reuse() {
    let mut base = raw(256);
    let mut ring = CircularHeap::new(base.carve(256).unwrap());

    let a = ring.allocate(16).unwrap();
    ring.deallocate(a).unwrap();
    let c = ring.allocate(16).unwrap();
    assert_eq!(c.offset(), a.offset());

    assert_eq!(ring.deallocate(a), Err(MemoryError::DoubleFree { offset: a.offset() }));
    let d = ring.allocate(16).unwrap();
    assert_ne!(d.offset(), c.offset());
}

/// Test: a released stack handle cannot pop the allocation that reused its
/// space.
#[test]
fn test_stack_rejects_release_after_reuse() {
    let mut base = raw(512);
    let mut stack = StackHeap::new(base.carve(512).unwrap());

    let a = stack.allocate(16).unwrap();
    let b = stack.allocate(32).unwrap();
    stack.deallocate(b).unwrap();
    let c = stack.allocate(32).unwrap();
    assert_eq!(c.offset(), b.offset());

    assert_eq!(stack.deallocate(b), Err(MemoryError::DoubleFree { offset: b.offset() }));
    let d = stack.allocate(16).unwrap();
    assert!(d.offset() >= c.end());
    stack.deallocate(d).unwrap();
    stack.deallocate(c).unwrap();
    stack.deallocate(a).unwrap();
    assert_eq!(stack.current_memory().size_in_bytes(), 0);
}

/// Test: freeing tag 1 leaves tag 2's block and bytes untouched.
#[test]
fn test_tagged_free_is_scoped_to_tag() {
    let mut base = raw(4 * 256);
    let mut heap = TaggedHeap::new(base.carve(4 * 256).unwrap(), 256, 4).unwrap();

    heap.allocate(1, 200).unwrap();
    let kept = heap.allocate(2, 100).unwrap();
    heap.write(&kept, 0, &[0xC3; 100]).unwrap();
    let tag_two = heap.current_memory_for(2);

    heap.free_blocks(1);
    let fresh = heap.allocate(1, 256).unwrap();
    assert_eq!(fresh.offset(), 0);

    assert_eq!(heap.current_memory_for(2), tag_two);
    let mut out = [0u8; 100];
    heap.read(&kept, 0, &mut out).unwrap();
    assert!(out.iter().all(|byte| *byte == 0xC3));
}

/// Test: last frame's buffer stays readable for one present, then resets.
#[test]
fn test_double_buffer_ping_pong() {
    let mut base = raw(256);
    let mut heap = DoubleBufferedHeap::new(base.carve(256).unwrap()).unwrap();

    let a = heap.allocate(4).unwrap();
    heap.write(&a, 0, &[1, 2, 3, 4]).unwrap();
    heap.present();

    let b = heap.allocate(4).unwrap();
    heap.write(&b, 0, &[9, 9, 9, 9]).unwrap();
    let mut out = [0u8; 4];
    heap.read(&a, 0, &mut out).unwrap();
    assert_eq!(out, [1, 2, 3, 4]);

    heap.present();
    assert_eq!(heap.current_memory(), MemorySize::ZERO);
    assert_eq!(heap.allocate(4).unwrap().offset(), a.offset());
}

/// Test: unit conversions and unclamped subtraction.
#[test]
fn test_size_units() {
    assert_eq!(1_i64.mb().size_in_kb(), 1000);
    assert_eq!(1_i64.mib().size_in_kib(), 1024);
    assert_eq!((5_i64.kb() - 2_i64.kb()).size_in_bytes(), 3000);
    assert!((2_i64.kb() - 5_i64.kb()).is_negative());
}
