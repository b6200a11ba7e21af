//! # Memory Error Types
//!
//! All errors that can occur while allocating from, releasing to, or
//! configuring the heap hierarchy.

use thiserror::Error;

use crate::heap::HeapId;

/// Errors that can occur in the memory subsystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The heap cannot satisfy the request.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested by the caller.
        requested: usize,
        /// Bytes the heap could still hand out.
        available: usize,
    },

    /// Zero-byte allocations are rejected by every strategy.
    #[error("zero-sized allocation")]
    ZeroSized,

    /// A size computation overflowed `usize`.
    #[error("allocation size overflow")]
    SizeOverflow,

    /// The allocation handle was issued by a different heap.
    #[error("allocation belongs to heap {found}, not heap {expected}")]
    ForeignAllocation {
        /// The heap the operation was invoked on.
        expected: HeapId,
        /// The heap recorded in the handle.
        found: HeapId,
    },

    /// The heap was reset after the allocation was handed out.
    #[error("stale allocation on heap {heap}: issued in epoch {allocation_epoch}, heap is at {heap_epoch}")]
    StaleAllocation {
        /// The heap that rejected the handle.
        heap: HeapId,
        /// Epoch recorded in the handle.
        allocation_epoch: u32,
        /// Current heap epoch.
        heap_epoch: u32,
    },

    /// Stack heaps only release their most recent allocation.
    #[error("out-of-order stack release: top allocation ends at {expected_offset}, got one ending at {found_offset}")]
    OutOfOrderRelease {
        /// End offset of the most recent live allocation.
        expected_offset: usize,
        /// End offset of the allocation passed in.
        found_offset: usize,
    },

    /// The block was already returned to its heap.
    #[error("double free at offset {offset}")]
    DoubleFree {
        /// Offset of the user data.
        offset: usize,
    },

    /// Access through a handle whose allocation was already released.
    #[error("allocation at offset {offset} of heap {heap} was released")]
    ReleasedAllocation {
        /// The heap that rejected the handle.
        heap: HeapId,
        /// Offset of the user data.
        offset: usize,
    },

    /// An in-band header does not describe a valid block.
    #[error("corrupt block header at offset {offset}")]
    CorruptHeader {
        /// Offset of the header.
        offset: usize,
    },

    /// A read or write fell outside its allocation.
    #[error("access of {len} bytes at offset {offset} exceeds allocation of {capacity} bytes")]
    OutOfBounds {
        /// Offset within the allocation.
        offset: usize,
        /// Length of the access.
        len: usize,
        /// Size of the allocation.
        capacity: usize,
    },

    /// No tagged block carries this tag.
    #[error("tag not found: {0}")]
    TagNotFound(u32),

    /// The tagged heap has handed out all of its blocks.
    #[error("tagged heap block limit {limit} reached while allocating for tag {tag}")]
    BlockLimit {
        /// Tag that needed a fresh block.
        tag: u32,
        /// Configured block count.
        limit: usize,
    },

    /// The parent heap released its backing storage.
    #[error("backing storage has been released")]
    BackingReleased,

    /// The parent heap was reset after this span was carved.
    #[error("heap span outlived a reset of its parent heap")]
    StaleSpan,

    /// A typed release did not match the allocated element count.
    #[error("element count mismatch: allocated {expected}, released {found}")]
    CountMismatch {
        /// Count recorded at allocation.
        expected: usize,
        /// Count passed to the release.
        found: usize,
    },

    /// A negative byte count reached a heap boundary.
    #[error("negative memory size: {0} bytes")]
    NegativeSize(i64),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
