//! # Frame Lifecycle Integration Test
//!
//! Several frames of a manager shared by typed adapters, with the tracker
//! attributing every byte to the frame that allocated it.

use std::cell::RefCell;
use std::rc::Rc;

use stratum_memory::{
    BuildProfile, Frame, HeapAllocator, HeapVec, MemoryConfig, MemoryError, MemoryManager,
    PersistentRegion, ProfileConfig, RegionConfig, Scratch, SharedManager, Tagged,
    TrackerConfig, TransientRegion,
};

const IO_TAG: u32 = 7;

fn config() -> MemoryConfig {
    let region = RegionConfig {
        frame_heap_size: 16,
        tagged_heap_block_size: 4,
        tagged_heap_block_count: 4,
        scratch_heap_size: 8,
    };
    let profile = ProfileConfig {
        persistent: region,
        staging: region,
        debug: RegionConfig::default(),
    };
    MemoryConfig {
        development: profile,
        shipping: profile,
        tracker: TrackerConfig::default(),
    }
}

fn shared() -> SharedManager {
    Rc::new(RefCell::new(
        MemoryManager::from_config(&config(), BuildProfile::Development).unwrap(),
    ))
}

/// Test: allocated, churned and still-live bytes for a single frame.
#[test]
fn test_tracker_round_trip() {
    let memory = shared();
    let frame_bytes = HeapAllocator::<u8, Frame<TransientRegion>>::new(Rc::clone(&memory));
    let scratch = HeapAllocator::<u64, Scratch<TransientRegion>>::new(Rc::clone(&memory));

    memory.borrow().start_frame(5);
    frame_bytes.allocate(1000).unwrap();
    let temp = scratch.allocate(32).unwrap();
    scratch.deallocate(temp, 32).unwrap();
    let kept = scratch.allocate(4).unwrap();
    let report = memory.borrow_mut().end_frame().unwrap();

    assert_eq!(report.frame, 5);
    assert!(report.bytes_allocated >= 1000);
    // Frame heap reset plus the released scratch block.
    assert_eq!(report.bytes_churned, 1000 + 256);
    assert_eq!(report.still_live.len(), 1);
    assert_eq!(report.still_live[0].heap, kept.heap());
    assert_eq!(report.still_live_bytes(), 32);
}

/// Test: tagged staging memory survives frames until its tag is freed.
#[test]
fn test_tagged_staging_outlives_frames() {
    let memory = shared();
    let staging = HeapAllocator::<u32, Tagged<TransientRegion, IO_TAG>>::new(Rc::clone(&memory));
    let mut words = HeapVec::with_capacity(staging, 16).unwrap();

    for frame in 0..3_u32 {
        memory.borrow().start_frame(u64::from(frame));
        words.push(frame * 10).unwrap();
        let report = memory.borrow_mut().end_frame().unwrap();
        assert_eq!(report.bytes_churned, 0);
    }
    assert_eq!(words.to_vec().unwrap(), vec![0, 10, 20]);

    let freed = memory
        .borrow_mut()
        .get_transient_region_mut()
        .tagged_heap_mut()
        .free_blocks(IO_TAG);
    assert_eq!(freed, 1);
    assert!(matches!(
        words.get(0),
        Err(MemoryError::StaleAllocation { .. })
    ));
}

/// Test: frame memory is gone after end_frame, persistent frame heap too.
#[test]
fn test_frame_heaps_reset_every_frame() {
    let memory = shared();
    let transient = HeapAllocator::<f32, Frame<TransientRegion>>::new(Rc::clone(&memory));
    let persistent = HeapAllocator::<f32, Frame<PersistentRegion>>::new(Rc::clone(&memory));

    memory.borrow().start_frame(1);
    let a = transient.allocate(100).unwrap();
    let b = persistent.allocate(100).unwrap();
    transient.write(&a, 0, 2.5).unwrap();
    memory.borrow_mut().end_frame();

    assert!(transient.read(&a, 0).is_err());
    assert!(persistent.read(&b, 0).is_err());
    assert_eq!(memory.borrow().usage().current().size_in_bytes(), 0);

    memory.borrow().start_frame(2);
    let again = transient.allocate(100).unwrap();
    assert_eq!(again.raw().offset(), a.raw().offset());
}

/// Test: a released region rejects allocation, others keep working.
#[test]
fn test_released_region_rejects_allocation() {
    let memory = shared();
    let transient = HeapAllocator::<u8, Frame<TransientRegion>>::new(Rc::clone(&memory));
    let persistent = HeapAllocator::<u8, Frame<PersistentRegion>>::new(Rc::clone(&memory));

    memory.borrow_mut().free_staging();

    assert_eq!(
        transient.allocate(8).unwrap_err(),
        MemoryError::BackingReleased
    );
    persistent.allocate(8).unwrap();
    assert!(memory.borrow().get_transient_region().is_released());
}

/// Test: the shipping debug region is empty but constructible.
#[test]
fn test_shipping_debug_region_is_empty() {
    let manager = MemoryManager::from_config(&MemoryConfig::default(), BuildProfile::Shipping).unwrap();
    assert_eq!(manager.get_debug_region().total_memory().size_in_bytes(), 0);
    assert!(manager.get_persistent_region().total_memory().size_in_bytes() > 0);
}
