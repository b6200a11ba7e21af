//! # Free-List Heap
//!
//! General-purpose allocation with per-object release, for long-lived,
//! irregularly sized data.
//!
//! Free blocks form a singly linked list threaded through the heap's own
//! bytes, kept in address order. Each block starts with a 16-byte header:
//!
//! ```text
//!   ┌──────────────┬──────────────┬─────────────────────┐
//!   │ size: u64 LE │ next: u64 LE │ payload ...         │
//!   └──────────────┴──────────────┴─────────────────────┘
//! ```
//!
//! `size` covers the header. For a free block `next` is the offset of the
//! next free block (or `NIL`); for an allocated block it holds the
//! `ALLOCATED` tag in the high half and the allocation serial in the low
//! half. A handle whose serial is not in its block header was released,
//! which is how double frees and use after release are caught.
//!
//! Allocation is first-fit and splits a block when the leftover exceeds one
//! header. Release re-inserts the block and merges it with any free block
//! directly before or after it.

use crate::error::{MemoryError, MemoryResult};
use crate::size::MemorySize;
use crate::tracker::{AllocationEvent, EventSink};

use super::{
    align_up, check_handle, notify, Allocation, Heap, HeapId, HeapSpan, SerialCounter, MAX_ALIGN,
};

const HEADER_SIZE: usize = 16;
const NEXT_AT: usize = 8;
const NIL: u64 = u64::MAX;
const ALLOCATED: u64 = 0xA110_CA7E << 32;

/// The `next` word of an allocated block.
const fn allocated(serial: u32) -> u64 {
    ALLOCATED | serial as u64
}

/// Header of one block, as stored in the span.
#[derive(Clone, Copy, Debug)]
struct BlockHeader {
    size: usize,
    next: u64,
}

impl BlockHeader {
    fn next_free(self) -> Option<usize> {
        (self.next != NIL).then_some(self.next as usize)
    }
}

/// A first-fit, coalescing free-list heap over a borrowed span.
#[derive(Debug)]
pub struct FreeListHeap {
    id: HeapId,
    span: HeapSpan,
    /// First usable offset (the span start rounded up to `MAX_ALIGN`).
    first: usize,
    /// Usable bytes from `first`, a multiple of `MAX_ALIGN`.
    usable: usize,
    head: Option<usize>,
    used: usize,
    epoch: u32,
    serials: SerialCounter,
    events: Option<EventSink>,
}

impl FreeListHeap {
    /// Creates a heap whose free list is one block covering `span`.
    ///
    /// # Errors
    ///
    /// Fails if the span's backing is no longer available.
    pub fn new(span: HeapSpan) -> MemoryResult<Self> {
        let base = span.start();
        let first = align_up(base, MAX_ALIGN).map_or(span.len(), |aligned| aligned - base);
        let usable = span.len().saturating_sub(first) / MAX_ALIGN * MAX_ALIGN;

        let mut heap = Self {
            id: HeapId::next(),
            span,
            first,
            usable,
            head: None,
            used: 0,
            epoch: 0,
            serials: SerialCounter::default(),
            events: None,
        };
        heap.head = heap.reset_list()?;
        Ok(heap)
    }

    /// Reports allocation events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Number of blocks on the free list.
    ///
    /// # Errors
    ///
    /// [`MemoryError::CorruptHeader`] if the list runs through a bad header.
    pub fn free_block_count(&self) -> MemoryResult<usize> {
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(block) = cursor {
            count += 1;
            cursor = self.header(block)?.next_free();
        }
        Ok(count)
    }

    /// Largest payload a single allocation could get right now.
    ///
    /// # Errors
    ///
    /// [`MemoryError::CorruptHeader`] if the list runs through a bad header.
    pub fn largest_free_block(&self) -> MemoryResult<usize> {
        let mut largest = 0;
        let mut cursor = self.head;
        while let Some(block) = cursor {
            let header = self.header(block)?;
            largest = largest.max(header.size - HEADER_SIZE);
            cursor = header.next_free();
        }
        Ok(largest)
    }

    fn reset_list(&self) -> MemoryResult<Option<usize>> {
        if self.usable < HEADER_SIZE * 2 {
            return Ok(None);
        }
        self.write_header(
            self.first,
            BlockHeader {
                size: self.usable,
                next: NIL,
            },
        )?;
        Ok(Some(self.first))
    }

    fn header(&self, block: usize) -> MemoryResult<BlockHeader> {
        let corrupt = MemoryError::CorruptHeader { offset: block };
        let size = usize::try_from(self.span.read_u64(block)?).map_err(|_| corrupt.clone())?;
        let next = self.span.read_u64(block.checked_add(NEXT_AT).ok_or(corrupt.clone())?)?;
        match block.checked_add(size) {
            Some(end) if size >= HEADER_SIZE && end <= self.first + self.usable => {
                Ok(BlockHeader { size, next })
            }
            _ => Err(corrupt),
        }
    }

    fn write_header(&self, block: usize, header: BlockHeader) -> MemoryResult<()> {
        self.span.write_u64(block, header.size as u64)?;
        self.span.write_u64(block + NEXT_AT, header.next)
    }

    /// Header offset of `allocation` if its block still carries the
    /// allocation's serial.
    fn issued_block(&self, allocation: &Allocation) -> MemoryResult<Option<usize>> {
        let block = allocation
            .offset()
            .checked_sub(HEADER_SIZE)
            .filter(|block| *block >= self.first && *block < self.first + self.usable)
            .ok_or(MemoryError::CorruptHeader {
                offset: allocation.offset(),
            })?;
        let next = self.span.read_u64(block + NEXT_AT)?;
        Ok((next == allocated(allocation.serial())).then_some(block))
    }

    /// Points `prev` (or the list head) at `target`.
    fn link(&mut self, prev: Option<usize>, target: Option<usize>) -> MemoryResult<()> {
        match prev {
            None => self.head = target,
            Some(prev) => self.span.write_u64(prev + NEXT_AT, target.map_or(NIL, |t| t as u64))?,
        }
        Ok(())
    }

    /// Header plus payload rounded up so every block stays aligned.
    fn block_size_for(size: usize) -> Option<usize> {
        align_up(size, MAX_ALIGN)?.checked_add(HEADER_SIZE)
    }

    fn first_fit(&self, need: usize) -> MemoryResult<Option<(Option<usize>, usize, BlockHeader)>> {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(block) = cursor {
            let header = self.header(block)?;
            if header.size >= need {
                return Ok(Some((prev, block, header)));
            }
            prev = Some(block);
            cursor = header.next_free();
        }
        Ok(None)
    }
}

impl Heap for FreeListHeap {
    fn id(&self) -> HeapId {
        self.id
    }

    fn allocate(&mut self, size: usize) -> MemoryResult<Allocation> {
        if size == 0 {
            return Err(MemoryError::ZeroSized);
        }
        self.span.ensure_live()?;
        let need = Self::block_size_for(size).ok_or(MemoryError::SizeOverflow)?;
        let Some((prev, block, header)) = self.first_fit(need)? else {
            return Err(MemoryError::OutOfMemory {
                requested: size,
                available: self.largest_free_block()?,
            });
        };

        let remainder = header.size - need;
        let taken = if remainder > HEADER_SIZE {
            let split = block + need;
            self.write_header(
                split,
                BlockHeader {
                    size: remainder,
                    next: header.next,
                },
            )?;
            self.link(prev, Some(split))?;
            need
        } else {
            self.link(prev, header.next_free())?;
            header.size
        };
        let serial = self.serials.next();
        self.write_header(
            block,
            BlockHeader {
                size: taken,
                next: allocated(serial),
            },
        )?;
        self.used += taken;

        let offset = block + HEADER_SIZE;
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
        let Some(block) = self.issued_block(&allocation)? else {
            return Err(MemoryError::DoubleFree {
                offset: allocation.offset(),
            });
        };
        let released = self.header(block)?.size;

        // Neighbours in address order.
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(free) = cursor {
            if free > block {
                break;
            }
            prev = Some(free);
            cursor = self.header(free)?.next_free();
        }

        // Merge forward.
        let mut merged = BlockHeader {
            size: released,
            next: cursor.map_or(NIL, |next| next as u64),
        };
        if let Some(next) = cursor {
            if block.checked_add(released) == Some(next) {
                let next_header = self.header(next)?;
                merged.size += next_header.size;
                merged.next = next_header.next;
            }
        }

        // Merge backward, or link in.
        let prev_size = match prev {
            Some(prev) => Some(self.header(prev)?.size),
            None => None,
        };
        match prev.zip(prev_size) {
            Some((prev, prev_size)) if prev.checked_add(prev_size) == Some(block) => {
                self.write_header(
                    prev,
                    BlockHeader {
                        size: prev_size + merged.size,
                        next: merged.next,
                    },
                )?;
                // Clear the serial so a second release is caught.
                self.span.write_u64(block + NEXT_AT, merged.next)?;
            }
            _ => {
                self.write_header(block, merged)?;
                self.link(prev, Some(block))?;
            }
        }

        self.used -= released;
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
        self.used = 0;
        self.epoch = self.epoch.wrapping_add(1);
        self.head = self.reset_list().ok().flatten();
        notify(self.events.as_ref(), AllocationEvent::Reset { heap: self.id });
    }

    fn can_alloc(&self, size: usize) -> bool {
        if size == 0 {
            return false;
        }
        Self::block_size_for(size)
            .and_then(|need| self.first_fit(need).ok().flatten())
            .is_some()
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
        if self.issued_block(allocation)?.is_none() {
            return Err(MemoryError::ReleasedAllocation {
                heap: self.id,
                offset: allocation.offset(),
            });
        }
        Ok(&self.span)
    }
}
