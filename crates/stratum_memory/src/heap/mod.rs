//! # Heaps
//!
//! Every strategy implements the same [`Heap`] contract over a borrowed
//! [`HeapSpan`] of some parent [`RawHeap`].
//!
//! ## Handles, not pointers
//!
//! An allocation is an [`Allocation`] handle: the issuing heap, an offset
//! into that heap's span, the requested size, and the heap epoch at the time
//! of the allocation, plus a per-heap serial number. Every `free()` bumps
//! the epoch, so a handle that survives a reset is rejected with
//! [`MemoryError::StaleAllocation`] instead of aliasing whatever was
//! allocated afterwards. Heaps that reuse space after a single release
//! (stack, ring, free-list) record the serial next to each live
//! allocation, so a released handle is rejected with
//! [`MemoryError::DoubleFree`] or [`MemoryError::ReleasedAllocation`] even
//! after its bytes were handed out again.
//!
//! ```text
//!   RawHeap (owns backing words)
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ frame span │      tagged span       │    scratch span    │
//!   └──────────────────────────────────────────────────────────┘
//!        ▲                 ▲                        ▲
//!   LinearHeap        TaggedHeap              CircularHeap
//!   (Weak back-reference, never extends the backing's lifetime)
//! ```

mod circular;
mod double_buffer;
mod free_list;
mod linear;
mod raw;
mod stack;

pub use circular::CircularHeap;
pub use double_buffer::DoubleBufferedHeap;
pub use free_list::FreeListHeap;
pub use linear::LinearHeap;
pub use raw::{HeapSpan, RawHeap};
pub use stack::StackHeap;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{MemoryError, MemoryResult};
use crate::size::MemorySize;
use crate::tracker::{AllocationEvent, EventSink};

/// Alignment used by the stack and free-list heaps (the largest natural
/// alignment of a primitive on supported targets).
pub const MAX_ALIGN: usize = 16;

/// Process-unique heap identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapId(u32);

impl HeapId {
    /// Returns a fresh identity.
    pub(crate) fn next() -> Self {
        static NEXT_HEAP_ID: AtomicU32 = AtomicU32::new(1);
        Self(NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a live allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Allocation {
    heap: HeapId,
    offset: usize,
    size: usize,
    epoch: u32,
    serial: u32,
}

impl Allocation {
    pub(crate) const fn new(heap: HeapId, offset: usize, size: usize, epoch: u32, serial: u32) -> Self {
        Self {
            heap,
            offset,
            size,
            epoch,
            serial,
        }
    }

    /// The heap that issued this allocation.
    #[inline]
    #[must_use]
    pub const fn heap(&self) -> HeapId {
        self.heap
    }

    /// Offset of the first byte within the issuing heap.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Requested size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// One past the last byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Heap epoch at allocation time.
    #[inline]
    #[must_use]
    pub const fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Issue number, unique among the heap's allocations.
    #[inline]
    #[must_use]
    pub const fn serial(&self) -> u32 {
        self.serial
    }
}

/// Hands out allocation serials. Zero is never issued.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SerialCounter(u32);

impl SerialCounter {
    pub(crate) fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(1).max(1);
        self.0
    }
}

/// The capability contract shared by every heap strategy.
///
/// Heaps are single-writer: nothing here synchronizes. Byte access goes
/// through [`Heap::write`] and [`Heap::read`], which are bounds-checked
/// against the allocation.
pub trait Heap {
    /// Identity used by allocator adapters and the tracker.
    ///
    /// Heaps built from inner heaps (the double-buffered heap, a tag view)
    /// report their own identity here, while the allocations they hand out
    /// carry the issuing inner heap's id.
    fn id(&self) -> HeapId;

    /// Reserves `size` bytes.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfMemory`] when the heap cannot fit the request,
    /// [`MemoryError::ZeroSized`] for empty requests.
    fn allocate(&mut self, size: usize) -> MemoryResult<Allocation>;

    /// Returns an allocation to the heap. What "returns" means is up to the
    /// strategy; a linear heap only validates the handle.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ForeignAllocation`] or
    /// [`MemoryError::StaleAllocation`] for handles from another heap or
    /// epoch, [`MemoryError::DoubleFree`] for a handle already released.
    fn deallocate(&mut self, allocation: Allocation) -> MemoryResult<()>;

    /// Releases every allocation at once and invalidates their handles.
    fn free(&mut self);

    /// Whether `allocate(size)` would succeed right now.
    fn can_alloc(&self, size: usize) -> bool;

    /// Bytes currently in use (including per-allocation overhead).
    fn current_memory(&self) -> MemorySize;

    /// Capacity of the heap.
    fn total_memory(&self) -> MemorySize;

    /// Number of resets this heap has gone through.
    fn epoch(&self) -> u32;

    /// Validates `allocation` and returns the span holding its bytes.
    ///
    /// # Errors
    ///
    /// Rejects foreign, stale and released handles.
    fn resolve(&self, allocation: &Allocation) -> MemoryResult<&HeapSpan>;

    /// Copies `data` into the allocation at byte offset `at`.
    ///
    /// # Errors
    ///
    /// Fails if the handle does not resolve or the range leaves the
    /// allocation.
    fn write(&self, allocation: &Allocation, at: usize, data: &[u8]) -> MemoryResult<()> {
        let span = self.resolve(allocation)?;
        check_range(allocation, at, data.len())?;
        span.write(allocation.offset() + at, data)
    }

    /// Copies bytes starting at offset `at` of the allocation into `out`.
    ///
    /// # Errors
    ///
    /// Fails if the handle does not resolve or the range leaves the
    /// allocation.
    fn read(&self, allocation: &Allocation, at: usize, out: &mut [u8]) -> MemoryResult<()> {
        let span = self.resolve(allocation)?;
        check_range(allocation, at, out.len())?;
        span.read(allocation.offset() + at, out)
    }

    /// Capacity not yet in use.
    fn remaining_memory(&self) -> MemorySize {
        self.total_memory() - self.current_memory()
    }
}

/// Rejects handles from other heaps or from before the last reset.
pub(crate) fn check_handle(id: HeapId, epoch: u32, allocation: &Allocation) -> MemoryResult<()> {
    if allocation.heap != id {
        return Err(MemoryError::ForeignAllocation {
            expected: id,
            found: allocation.heap,
        });
    }
    if allocation.epoch != epoch {
        return Err(MemoryError::StaleAllocation {
            heap: id,
            allocation_epoch: allocation.epoch,
            heap_epoch: epoch,
        });
    }
    Ok(())
}

fn check_range(allocation: &Allocation, at: usize, len: usize) -> MemoryResult<()> {
    match at.checked_add(len) {
        Some(end) if end <= allocation.size => Ok(()),
        _ => Err(MemoryError::OutOfBounds {
            offset: at,
            len,
            capacity: allocation.size,
        }),
    }
}

/// Rounds `value` up to a multiple of `align` (a power of two).
#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(bumped) => Some(bumped & !(align - 1)),
        None => None,
    }
}

#[inline]
pub(crate) fn notify(events: Option<&EventSink>, event: AllocationEvent) {
    if let Some(events) = events {
        events.emit(event);
    }
}
