//! # Double-Buffered Heap
//!
//! Two linear heaps, ping-ponged. The active one takes this frame's
//! allocations while the other keeps last frame's data readable.
//!
//! ```text
//!   frame N      frame N+1    frame N+2
//!   ┌───────┐    ┌───────┐    ┌───────┐
//!   │ A  W  │    │ A  R  │    │ A  W* │   W = written this frame
//!   │ B     │    │ B  W* │    │ B  R  │   R = still readable
//!   └───────┘    └───────┘    └───────┘   * = reset by present()
//! ```
//!
//! `present()` swaps the active buffer and resets the newly active one, so
//! data lives for exactly one extra frame.

use crate::error::{MemoryError, MemoryResult};
use crate::size::MemorySize;
use crate::tracker::EventSink;

use super::{Allocation, Heap, HeapId, HeapSpan, LinearHeap};

/// Two equal linear heaps over one span.
#[derive(Debug)]
pub struct DoubleBufferedHeap {
    id: HeapId,
    buffers: [LinearHeap; 2],
    active: usize,
    presents: u64,
}

impl DoubleBufferedHeap {
    /// Splits `span` into two halves. An odd trailing byte goes unused.
    ///
    /// # Errors
    ///
    /// Fails if the span's backing is no longer available.
    pub fn new(mut span: HeapSpan) -> MemoryResult<Self> {
        let half = span.len() / 2;
        let mut back = span.split_off(half)?;
        back.split_off(half)?;
        Ok(Self {
            id: HeapId::next(),
            buffers: [LinearHeap::new(span), LinearHeap::new(back)],
            active: 0,
            presents: 0,
        })
    }

    /// Reports allocation events from both buffers to `events`.
    #[must_use]
    pub fn with_events(self, events: EventSink) -> Self {
        let Self {
            id,
            buffers: [front, back],
            active,
            presents,
        } = self;
        Self {
            id,
            buffers: [front.with_events(events.clone()), back.with_events(events)],
            active,
            presents,
        }
    }

    /// Makes the other buffer active and resets it.
    pub fn present(&mut self) {
        self.active ^= 1;
        self.buffers[self.active].free();
        self.presents += 1;
    }

    /// Index (0 or 1) of the buffer taking allocations.
    #[inline]
    #[must_use]
    pub const fn frame_parity(&self) -> usize {
        self.active
    }

    /// Number of `present()` calls so far.
    #[inline]
    #[must_use]
    pub const fn presents(&self) -> u64 {
        self.presents
    }

    /// The buffer taking allocations.
    #[must_use]
    pub fn active(&self) -> &LinearHeap {
        &self.buffers[self.active]
    }

    /// The buffer holding last frame's data.
    #[must_use]
    pub fn previous(&self) -> &LinearHeap {
        &self.buffers[self.active ^ 1]
    }

    fn owner(&self, allocation: &Allocation) -> MemoryResult<usize> {
        self.buffers
            .iter()
            .position(|buffer| buffer.id() == allocation.heap())
            .ok_or(MemoryError::ForeignAllocation {
                expected: self.active().id(),
                found: allocation.heap(),
            })
    }
}

impl Heap for DoubleBufferedHeap {
    /// Names the pair. Allocations carry the id of the buffer that issued
    /// them, see [`DoubleBufferedHeap::active`].
    fn id(&self) -> HeapId {
        self.id
    }

    fn allocate(&mut self, size: usize) -> MemoryResult<Allocation> {
        self.buffers[self.active].allocate(size)
    }

    /// Releases into whichever buffer issued the allocation.
    fn deallocate(&mut self, allocation: Allocation) -> MemoryResult<()> {
        let owner = self.owner(&allocation)?;
        self.buffers[owner].deallocate(allocation)
    }

    /// Resets the active buffer only.
    fn free(&mut self) {
        self.buffers[self.active].free();
    }

    fn can_alloc(&self, size: usize) -> bool {
        self.active().can_alloc(size)
    }

    fn current_memory(&self) -> MemorySize {
        self.active().current_memory()
    }

    fn total_memory(&self) -> MemorySize {
        self.active().total_memory()
    }

    fn epoch(&self) -> u32 {
        self.active().epoch()
    }

    fn resolve(&self, allocation: &Allocation) -> MemoryResult<&HeapSpan> {
        let owner = self.owner(allocation)?;
        self.buffers[owner].resolve(allocation)
    }
}
