//! # STRATUM Memory
//!
//! Region, frame and tag scoped allocation for a frame-driven engine.
//!
//! Memory is claimed once per region at startup and reclaimed in bulk:
//! per frame (frame heaps), per category (tagged heaps), or oldest-first
//! (scratch rings). Per-object release exists where it is cheap (stack and
//! free-list heaps) but is never the main lifetime mechanism.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── MemoryManager ────────────────────────────┐
//! │  persistent region      transient region        debug region          │
//! │  ┌─────┬──────┬─────┐   ┌─────┬──────┬─────┐    ┌─────┬──────┬─────┐  │
//! │  │frame│tagged│ring │   │frame│tagged│ring │    │frame│tagged│ring │  │
//! │  └─────┴──────┴─────┘   └─────┴──────┴─────┘    └─────┴──────┴─────┘  │
//! └───────────────┬───────────────────────────────────────┬───────────────┘
//!                 │ HeapAllocator<T, Policy>               │ AllocationEvent
//!          typed containers                        AllocationTracker
//! ```
//!
//! ## Rules
//!
//! 1. **Handles, not pointers** - every allocation is an [`Allocation`]
//!    checked against its heap's identity and reset epoch
//! 2. **Typed errors** - exhaustion and misuse both surface as
//!    [`MemoryError`], never as silent corruption
//! 3. **No globals** - the [`MemoryManager`] is constructed and passed
//!    explicitly
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratum_memory::{BuildProfile, Heap, MemoryConfig, MemoryManager};
//!
//! let config = MemoryConfig::default();
//! let mut memory = MemoryManager::from_config(&config, BuildProfile::active())?;
//!
//! memory.start_frame(0);
//! let frame = memory.get_transient_region_mut().frame_heap_mut();
//! let scratch = frame.allocate(4096)?;
//! let report = memory.end_frame();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod adapter;
pub mod config;
pub mod error;
pub mod heap;
pub mod manager;
pub mod region;
pub mod size;
pub mod tagged;
pub mod tracker;

pub use adapter::{
    DebugRegion, Frame, HeapAllocator, HeapPolicy, HeapVec, PersistentRegion, RegionMarker,
    Scratch, SharedManager, Tagged, TransientRegion, TypedAllocation,
};
pub use config::{BuildProfile, MemoryConfig, ProfileConfig, RegionConfig, TrackerConfig};
pub use error::{MemoryError, MemoryResult};
pub use heap::{
    Allocation, CircularHeap, DoubleBufferedHeap, FreeListHeap, Heap, HeapId, HeapSpan,
    LinearHeap, RawHeap, StackHeap, MAX_ALIGN,
};
pub use manager::{MemoryManager, MemoryUsage, RegionUsage};
pub use region::{MemoryRegion, MemoryRequirements, RegionKind};
pub use size::{MemorySize, SizeLiteral};
pub use tagged::{TagView, TaggedHeap, TaggedHeapBlock};
pub use tracker::{AllocationEvent, AllocationTracker, EventSink, FrameReport, LiveAllocation};
