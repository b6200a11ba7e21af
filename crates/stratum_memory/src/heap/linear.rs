//! # Linear Heap
//!
//! A bump allocator for data that is reclaimed wholesale, typically once per
//! frame. No per-allocation metadata and no alignment padding: callers keep
//! their own sizes naturally aligned.

use crate::error::{MemoryError, MemoryResult};
use crate::size::MemorySize;
use crate::tracker::{AllocationEvent, EventSink};

use super::{check_handle, notify, Allocation, Heap, HeapId, HeapSpan, SerialCounter};

/// A bump-pointer heap over a borrowed span.
///
/// # Example
///
/// ```rust,ignore
/// let mut raw = RawHeap::new(1_i64.mib())?;
/// let mut frame = LinearHeap::new(raw.carve(64 * 1024)?);
///
/// let a = frame.allocate(256)?;
/// frame.write(&a, 0, &payload)?;
///
/// // End of frame: everything goes at once.
/// frame.free();
/// ```
#[derive(Debug)]
pub struct LinearHeap {
    id: HeapId,
    span: HeapSpan,
    offset: usize,
    epoch: u32,
    serials: SerialCounter,
    events: Option<EventSink>,
}

impl LinearHeap {
    /// Creates an empty heap over `span`.
    #[must_use]
    pub fn new(span: HeapSpan) -> Self {
        Self {
            id: HeapId::next(),
            span,
            offset: 0,
            epoch: 0,
            serials: SerialCounter::default(),
            events: None,
        }
    }

    /// Reports allocation events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Current bump offset.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    fn available(&self) -> usize {
        self.span.len() - self.offset
    }
}

impl Heap for LinearHeap {
    fn id(&self) -> HeapId {
        self.id
    }

    fn allocate(&mut self, size: usize) -> MemoryResult<Allocation> {
        if size == 0 {
            return Err(MemoryError::ZeroSized);
        }
        self.span.ensure_live()?;
        if size > self.available() {
            return Err(MemoryError::OutOfMemory {
                requested: size,
                available: self.available(),
            });
        }

        let allocation = Allocation::new(self.id, self.offset, size, self.epoch, self.serials.next());
        self.offset += size;
        notify(
            self.events.as_ref(),
            AllocationEvent::Allocated {
                heap: self.id,
                offset: allocation.offset(),
                size,
            },
        );
        Ok(allocation)
    }

    /// Validates the handle; the space itself is only reclaimed by `free()`,
    /// so nothing can alias a released handle before the epoch moves on.
    fn deallocate(&mut self, allocation: Allocation) -> MemoryResult<()> {
        check_handle(self.id, self.epoch, &allocation)?;
        notify(
            self.events.as_ref(),
            AllocationEvent::Deallocated {
                heap: self.id,
                offset: allocation.offset(),
                size: allocation.size(),
            },
        );
        Ok(())
    }

    fn free(&mut self) {
        self.offset = 0;
        self.epoch = self.epoch.wrapping_add(1);
        notify(self.events.as_ref(), AllocationEvent::Reset { heap: self.id });
    }

    fn can_alloc(&self, size: usize) -> bool {
        size != 0 && size <= self.available() && self.span.is_live()
    }

    fn current_memory(&self) -> MemorySize {
        MemorySize::from_usize(self.offset)
    }

    fn total_memory(&self) -> MemorySize {
        MemorySize::from_usize(self.span.len())
    }

    fn epoch(&self) -> u32 {
        self.epoch
    }

    fn resolve(&self, allocation: &Allocation) -> MemoryResult<&HeapSpan> {
        check_handle(self.id, self.epoch, allocation)?;
        Ok(&self.span)
    }
}
