//! # Circular Heap
//!
//! A ring of FIFO allocations. `head` is where the next allocation goes,
//! `tail` is the start of the oldest live allocation. Releasing an
//! allocation retires it; the tail slides forward over every retired entry
//! at the front of the ring, so space is reclaimed oldest-first.
//!
//! ```text
//!   not wrapped:   [ free | tail ... live ... head | free ]
//!   wrapped:       [ live ... head | free | tail ... live | waste ]
//! ```
//!
//! Allocations never straddle the end of the span: when the remainder after
//! `head` is too small the allocation restarts at offset zero, provided it
//! fits before `tail`.

use std::collections::VecDeque;

use crate::error::{MemoryError, MemoryResult};
use crate::size::MemorySize;
use crate::tracker::{AllocationEvent, EventSink};

use super::{check_handle, notify, Allocation, Heap, HeapId, HeapSpan, SerialCounter};

#[derive(Clone, Copy, Debug)]
struct RingEntry {
    offset: usize,
    size: usize,
    serial: u32,
    retired: bool,
}

impl RingEntry {
    fn issued(&self, allocation: &Allocation) -> bool {
        !self.retired && self.offset == allocation.offset() && self.serial == allocation.serial()
    }
}

/// A ring-buffer heap over a borrowed span.
#[derive(Debug)]
pub struct CircularHeap {
    id: HeapId,
    span: HeapSpan,
    head: usize,
    tail: usize,
    wrapped: bool,
    used: usize,
    entries: VecDeque<RingEntry>,
    epoch: u32,
    serials: SerialCounter,
    events: Option<EventSink>,
}

impl CircularHeap {
    /// Creates an empty ring over `span`.
    #[must_use]
    pub fn new(span: HeapSpan) -> Self {
        Self {
            id: HeapId::next(),
            span,
            head: 0,
            tail: 0,
            wrapped: false,
            used: 0,
            entries: VecDeque::new(),
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

    /// Offset of the next allocation.
    #[inline]
    #[must_use]
    pub const fn head(&self) -> usize {
        self.head
    }

    /// Offset of the oldest live allocation.
    #[inline]
    #[must_use]
    pub const fn tail(&self) -> usize {
        self.tail
    }

    /// Number of allocations not yet reclaimed (retired ones still waiting
    /// behind an older live entry included).
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Where an allocation of `size` would start, if it fits.
    fn has_space(&self, size: usize) -> Option<usize> {
        let total = self.span.len();
        if self.entries.is_empty() {
            return (size <= total).then_some(0);
        }
        if self.wrapped {
            return (size <= self.tail - self.head).then_some(self.head);
        }
        if size <= total - self.head {
            Some(self.head)
        } else if size <= self.tail {
            Some(0)
        } else {
            None
        }
    }

    fn available(&self) -> usize {
        let total = self.span.len();
        if self.entries.is_empty() {
            total
        } else if self.wrapped {
            self.tail - self.head
        } else {
            (total - self.head).max(self.tail)
        }
    }

    /// Pops retired entries off the front and moves `tail` after them.
    fn advance_tail(&mut self) {
        while let Some(front) = self.entries.front() {
            if !front.retired {
                break;
            }
            self.used -= front.size;
            self.entries.pop_front();
        }

        match self.entries.front() {
            None => {
                self.head = 0;
                self.tail = 0;
                self.wrapped = false;
            }
            Some(front) => {
                if front.offset < self.tail {
                    // The tail followed the head around the end of the span.
                    self.wrapped = false;
                }
                self.tail = front.offset;
            }
        }
    }
}

impl Heap for CircularHeap {
    fn id(&self) -> HeapId {
        self.id
    }

    fn allocate(&mut self, size: usize) -> MemoryResult<Allocation> {
        if size == 0 {
            return Err(MemoryError::ZeroSized);
        }
        self.span.ensure_live()?;
        let Some(offset) = self.has_space(size) else {
            return Err(MemoryError::OutOfMemory {
                requested: size,
                available: self.available(),
            });
        };

        if self.entries.is_empty() {
            self.tail = offset;
        } else if offset < self.head {
            self.wrapped = true;
        }
        self.head = offset + size;
        self.used += size;
        let serial = self.serials.next();
        self.entries.push_back(RingEntry {
            offset,
            size,
            serial,
            retired: false,
        });

        notify(
            self.events.as_ref(),
            AllocationEvent::Allocated {
                heap: self.id,
                offset,
                size,
            },
        );
        Ok(Allocation::new(self.id, offset, size, self.epoch, serial))
    }

    fn deallocate(&mut self, allocation: Allocation) -> MemoryResult<()> {
        check_handle(self.id, self.epoch, &allocation)?;
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.issued(&allocation))
            .ok_or(MemoryError::DoubleFree {
                offset: allocation.offset(),
            })?;
        entry.retired = true;
        self.advance_tail();

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
        self.head = 0;
        self.tail = 0;
        self.wrapped = false;
        self.used = 0;
        self.entries.clear();
        self.epoch = self.epoch.wrapping_add(1);
        notify(self.events.as_ref(), AllocationEvent::Reset { heap: self.id });
    }

    fn can_alloc(&self, size: usize) -> bool {
        size != 0 && self.has_space(size).is_some() && self.span.is_live()
    }

    fn current_memory(&self) -> MemorySize {
        MemorySize::from_usize(self.used)
    }

    fn total_memory(&self) -> MemorySize {
        MemorySize::from_usize(self.span.len())
    }

    fn epoch(&self) -> u32 {
        self.epoch
    }

    fn resolve(&self, allocation: &Allocation) -> MemoryResult<&HeapSpan> {
        check_handle(self.id, self.epoch, allocation)?;
        if !self.entries.iter().any(|entry| entry.issued(allocation)) {
            return Err(MemoryError::ReleasedAllocation {
                heap: self.id,
                offset: allocation.offset(),
            });
        }
        Ok(&self.span)
    }
}
