//! # Stack Heap
//!
//! LIFO allocation. Each allocation is aligned to [`MAX_ALIGN`] and preceded
//! by a 16-byte header: the offset to roll back to when it is released and
//! the allocation's serial, cleared on release.
//!
//! ```text
//!   prev offset
//!       │ padding  header          user bytes
//!       ▼ ┌──────┬──────┬────────┬─────────────┐
//!   ──────┤//////│ prev │ serial │ ...         │
//!         └──────┴──────┴────────┴─────────────┘
//!                                ▲             ▲
//!                          allocation.offset   new offset
//! ```

use crate::error::{MemoryError, MemoryResult};
use crate::size::MemorySize;
use crate::tracker::{AllocationEvent, EventSink};

use super::{
    align_up, check_handle, notify, Allocation, Heap, HeapId, HeapSpan, SerialCounter, MAX_ALIGN,
};

/// Bytes reserved in front of every allocation.
const HEADER_SIZE: usize = 16;

/// Position of the serial within the header.
const SERIAL_AT: usize = 8;

/// A LIFO heap over a borrowed span.
///
/// Only the most recent live allocation may be released; anything else is
/// rejected with [`MemoryError::OutOfOrderRelease`]. A handle that was
/// already released is rejected with [`MemoryError::DoubleFree`], even once
/// its bytes belong to a newer allocation.
#[derive(Debug)]
pub struct StackHeap {
    id: HeapId,
    span: HeapSpan,
    offset: usize,
    epoch: u32,
    depth: usize,
    serials: SerialCounter,
    events: Option<EventSink>,
}

impl StackHeap {
    /// Creates an empty stack over `span`.
    #[must_use]
    pub fn new(span: HeapSpan) -> Self {
        Self {
            id: HeapId::next(),
            span,
            offset: 0,
            epoch: 0,
            depth: 0,
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

    /// Number of live allocations.
    #[inline]
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Where an allocation of `size` would land: `(user offset, new offset)`.
    fn plan(&self, size: usize) -> Option<(usize, usize)> {
        let base = self.span.start();
        let header_end = base.checked_add(self.offset)?.checked_add(HEADER_SIZE)?;
        let user = align_up(header_end, MAX_ALIGN)? - base;
        let end = user.checked_add(size)?;
        (end <= self.span.len()).then_some((user, end))
    }

    /// Header offset of `allocation`, once it is known to lie below the
    /// current top and to still carry its own serial.
    fn live_header(&self, allocation: &Allocation) -> MemoryResult<Option<usize>> {
        let header = allocation
            .offset()
            .checked_sub(HEADER_SIZE)
            .ok_or(MemoryError::CorruptHeader {
                offset: allocation.offset(),
            })?;
        if allocation.end() > self.offset {
            return Ok(None);
        }
        let serial = self.span.read_u64(header + SERIAL_AT)?;
        Ok((serial == u64::from(allocation.serial())).then_some(header))
    }
}

impl Heap for StackHeap {
    fn id(&self) -> HeapId {
        self.id
    }

    fn allocate(&mut self, size: usize) -> MemoryResult<Allocation> {
        if size == 0 {
            return Err(MemoryError::ZeroSized);
        }
        self.span.ensure_live()?;
        let Some((user, end)) = self.plan(size) else {
            return Err(MemoryError::OutOfMemory {
                requested: size,
                available: self.span.len() - self.offset,
            });
        };

        let serial = self.serials.next();
        self.span.write_u64(user - HEADER_SIZE, self.offset as u64)?;
        self.span.write_u64(user - HEADER_SIZE + SERIAL_AT, u64::from(serial))?;
        self.offset = end;
        self.depth += 1;
        debug_assert!(self.offset <= self.span.len());

        notify(
            self.events.as_ref(),
            AllocationEvent::Allocated {
                heap: self.id,
                offset: user,
                size,
            },
        );
        Ok(Allocation::new(self.id, user, size, self.epoch, serial))
    }

    fn deallocate(&mut self, allocation: Allocation) -> MemoryResult<()> {
        check_handle(self.id, self.epoch, &allocation)?;
        let Some(header) = self.live_header(&allocation)? else {
            return Err(MemoryError::DoubleFree {
                offset: allocation.offset(),
            });
        };
        if allocation.end() != self.offset {
            return Err(MemoryError::OutOfOrderRelease {
                expected_offset: self.offset,
                found_offset: allocation.end(),
            });
        }

        let previous = self.span.read_u64(header)? as usize;
        if previous > header {
            return Err(MemoryError::CorruptHeader { offset: header });
        }

        self.span.write_u64(header + SERIAL_AT, 0)?;
        self.offset = previous;
        self.depth -= 1;
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
        self.depth = 0;
        self.epoch = self.epoch.wrapping_add(1);
        notify(self.events.as_ref(), AllocationEvent::Reset { heap: self.id });
    }

    fn can_alloc(&self, size: usize) -> bool {
        size != 0 && self.plan(size).is_some() && self.span.is_live()
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
        if self.live_header(allocation)?.is_none() {
            return Err(MemoryError::ReleasedAllocation {
                heap: self.id,
                offset: allocation.offset(),
            });
        }
        Ok(&self.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::RawHeap;

    fn stack(size: usize) -> (RawHeap, StackHeap) {
        let mut raw = RawHeap::new(MemorySize::from_usize(size)).unwrap();
        let span = raw.carve(size).unwrap();
        (raw, StackHeap::new(span))
    }

    #[test]
    fn test_stack_lifo_reuse() {
        let (_raw, mut stack) = stack(256);

        let _a = stack.allocate(16).unwrap();
        let b = stack.allocate(32).unwrap();
        let b_offset = b.offset();
        stack.deallocate(b).unwrap();
        let c = stack.allocate(32).unwrap();

        assert_eq!(c.offset(), b_offset);
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn test_stack_alignment_and_header() {
        let (_raw, mut stack) = stack(256);

        let a = stack.allocate(3).unwrap();
        let b = stack.allocate(5).unwrap();

        assert_eq!(a.offset() % MAX_ALIGN, 0);
        assert_eq!(b.offset() % MAX_ALIGN, 0);
        assert!(a.offset() >= HEADER_SIZE);
        assert!(b.offset() >= a.end() + HEADER_SIZE);
    }

    #[test]
    fn test_stack_rejects_out_of_order_release() {
        let (_raw, mut stack) = stack(256);

        let a = stack.allocate(16).unwrap();
        let b = stack.allocate(16).unwrap();

        assert!(matches!(
            stack.deallocate(a),
            Err(MemoryError::OutOfOrderRelease { .. })
        ));
        stack.deallocate(b).unwrap();
        stack.deallocate(a).unwrap();
        assert_eq!(stack.current_memory(), MemorySize::ZERO);
    }

    #[test]
    fn test_stack_can_alloc_matches_allocate() {
        let (_raw, mut stack) = stack(64);

        // The 16 header bytes push the first allocation to offset 16.
        assert!(stack.can_alloc(48));
        assert!(!stack.can_alloc(49));
        assert!(stack.allocate(49).is_err());
        stack.allocate(48).unwrap();
        assert!(!stack.can_alloc(1));
    }

    #[test]
    fn test_stack_double_release_of_top() {
        let (_raw, mut stack) = stack(128);
        let a = stack.allocate(16).unwrap();
        let b = stack.allocate(16).unwrap();
        stack.deallocate(b).unwrap();

        assert_eq!(stack.deallocate(b), Err(MemoryError::DoubleFree { offset: b.offset() }));
        assert_eq!(stack.depth(), 1);
        stack.deallocate(a).unwrap();
    }

    #[test]
    fn test_stack_released_handle_after_reuse() {
        let (_raw, mut stack) = stack(128);
        let _a = stack.allocate(16).unwrap();
        let b = stack.allocate(16).unwrap();
        stack.deallocate(b).unwrap();
        let c = stack.allocate(16).unwrap();
        assert_eq!(c.offset(), b.offset());

        assert_eq!(stack.deallocate(b), Err(MemoryError::DoubleFree { offset: b.offset() }));
        assert!(matches!(
            stack.write(&b, 0, &[1]),
            Err(MemoryError::ReleasedAllocation { .. })
        ));
        // The newer allocation is untouched and still on top.
        stack.write(&c, 0, &[7; 16]).unwrap();
        stack.deallocate(c).unwrap();
    }

    #[test]
    fn test_stack_free_resets() {
        let (_raw, mut stack) = stack(128);
        let a = stack.allocate(16).unwrap();
        stack.free();

        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.current_memory(), MemorySize::ZERO);
        assert!(matches!(stack.deallocate(a), Err(MemoryError::StaleAllocation { .. })));
    }
}
