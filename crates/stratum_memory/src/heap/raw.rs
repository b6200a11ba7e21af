//! # Raw Heap
//!
//! The base arena every region is carved from. It owns one contiguous block,
//! bumps an offset, and hands sub-ranges to child heaps as [`HeapSpan`]s.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::{MemoryError, MemoryResult};
use crate::size::MemorySize;

use super::{check_handle, Allocation, Heap, HeapId, SerialCounter, MAX_ALIGN};

/// The owned block. Stored as 16-byte words so the base address is
/// `MAX_ALIGN`-aligned, viewed as bytes through `bytemuck`.
#[derive(Debug)]
struct Backing {
    words: Box<[u128]>,
    len: usize,
    generation: u32,
}

impl Backing {
    fn new(len: usize) -> Self {
        let words = vec![0u128; len.div_ceil(MAX_ALIGN)].into_boxed_slice();
        Self {
            words,
            len,
            generation: 0,
        }
    }

    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u128, u8>(&self.words)[..self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut::<u128, u8>(&mut self.words)[..len]
    }
}

/// A borrowed range of a [`RawHeap`]'s backing block.
///
/// Holds a `Weak` back-reference: a span never keeps the backing alive.
/// Access after the parent's `free()` fails with [`MemoryError::StaleSpan`],
/// after `release()` with [`MemoryError::BackingReleased`].
#[derive(Clone, Debug)]
pub struct HeapSpan {
    backing: Weak<RefCell<Backing>>,
    start: usize,
    len: usize,
    generation: u32,
}

impl HeapSpan {
    /// Length in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the span covers no bytes.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute offset of the span within the backing block. The backing
    /// base is `MAX_ALIGN`-aligned, so alignment math is done on this value.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Whether the backing is still present and the span still current.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.ensure_live().is_ok()
    }

    /// Fails if the backing was reset or released since this span was carved.
    ///
    /// # Errors
    ///
    /// [`MemoryError::StaleSpan`] after a reset of the parent,
    /// [`MemoryError::BackingReleased`] after its release.
    pub fn ensure_live(&self) -> MemoryResult<()> {
        self.with_bytes(|_| ())
    }

    /// Copies `data` into the span at `offset`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if the range leaves the span, or the
    /// errors of [`HeapSpan::ensure_live`].
    pub fn write(&self, offset: usize, data: &[u8]) -> MemoryResult<()> {
        let range = self.range(offset, data.len())?;
        self.with_bytes_mut(|bytes| bytes[range].copy_from_slice(data))
    }

    /// Copies `out.len()` bytes starting at `offset` into `out`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if the range leaves the span, or the
    /// errors of [`HeapSpan::ensure_live`].
    pub fn read(&self, offset: usize, out: &mut [u8]) -> MemoryResult<()> {
        let range = self.range(offset, out.len())?;
        self.with_bytes(|bytes| out.copy_from_slice(&bytes[range]))
    }

    /// Reads a little-endian `u64` at `offset`.
    pub(crate) fn read_u64(&self, offset: usize) -> MemoryResult<u64> {
        let mut word = [0u8; 8];
        self.read(offset, &mut word)?;
        Ok(u64::from_le_bytes(word))
    }

    /// Writes a little-endian `u64` at `offset`.
    pub(crate) fn write_u64(&self, offset: usize, value: u64) -> MemoryResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Returns the sub-range `[offset, offset + len)` as its own span.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if the range leaves the span.
    pub fn subspan(&self, offset: usize, len: usize) -> MemoryResult<Self> {
        let range = self.range(offset, len)?;
        Ok(Self {
            backing: self.backing.clone(),
            start: self.start + range.start,
            len,
            generation: self.generation,
        })
    }

    /// Splits the span at `at`: `self` keeps `[0, at)`, the tail is returned.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if `at` is past the end.
    pub fn split_off(&mut self, at: usize) -> MemoryResult<Self> {
        let tail = self.subspan(at, self.len - at.min(self.len))?;
        self.len = at;
        Ok(tail)
    }

    fn range(&self, offset: usize, len: usize) -> MemoryResult<std::ops::Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(offset..end),
            _ => Err(MemoryError::OutOfBounds {
                offset,
                len,
                capacity: self.len,
            }),
        }
    }

    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> MemoryResult<R> {
        let backing = self.backing.upgrade().ok_or(MemoryError::BackingReleased)?;
        let backing = backing.borrow();
        if backing.generation != self.generation {
            return Err(MemoryError::StaleSpan);
        }
        Ok(f(&backing.bytes()[self.start..self.start + self.len]))
    }

    fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> MemoryResult<R> {
        let backing = self.backing.upgrade().ok_or(MemoryError::BackingReleased)?;
        let mut backing = backing.borrow_mut();
        if backing.generation != self.generation {
            return Err(MemoryError::StaleSpan);
        }
        let (start, end) = (self.start, self.start + self.len);
        Ok(f(&mut backing.bytes_mut()[start..end]))
    }
}

/// The base arena: one owned block and a monotonic offset.
///
/// `free()` is the only way to reclaim space and it invalidates every
/// allocation and every span carved so far. `release()` drops the block.
#[derive(Debug)]
pub struct RawHeap {
    id: HeapId,
    storage: Option<Rc<RefCell<Backing>>>,
    root: HeapSpan,
    offset: usize,
    epoch: u32,
    serials: SerialCounter,
}

impl RawHeap {
    /// Allocates a zeroed backing block of `size` bytes.
    ///
    /// # Errors
    ///
    /// Fails for negative sizes.
    pub fn new(size: MemorySize) -> MemoryResult<Self> {
        let len = size.to_usize()?;
        let storage = Rc::new(RefCell::new(Backing::new(len)));
        let root = HeapSpan {
            backing: Rc::downgrade(&storage),
            start: 0,
            len,
            generation: 0,
        };
        Ok(Self {
            id: HeapId::next(),
            storage: Some(storage),
            root,
            offset: 0,
            epoch: 0,
            serials: SerialCounter::default(),
        })
    }

    /// Hands the next `size` bytes to a child heap.
    ///
    /// Unlike [`Heap::allocate`], zero-length spans are allowed so that
    /// zero-sized regions can still be assembled.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfMemory`] if fewer than `size` bytes are left, or
    /// the backing's liveness errors.
    pub fn carve(&mut self, size: usize) -> MemoryResult<HeapSpan> {
        self.root.ensure_live()?;
        let available = self.root.len() - self.offset;
        if size > available {
            return Err(MemoryError::OutOfMemory {
                requested: size,
                available,
            });
        }
        let span = self.root.subspan(self.offset, size)?;
        self.offset += size;
        Ok(span)
    }

    /// Drops the backing block. Every span and allocation becomes unusable.
    pub fn release(&mut self) {
        self.storage = None;
        self.offset = 0;
    }

    /// Whether [`RawHeap::release`] has been called.
    #[inline]
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.storage.is_none()
    }
}

impl Heap for RawHeap {
    fn id(&self) -> HeapId {
        self.id
    }

    fn allocate(&mut self, size: usize) -> MemoryResult<Allocation> {
        if size == 0 {
            return Err(MemoryError::ZeroSized);
        }
        let offset = self.offset;
        self.carve(size)?;
        Ok(Allocation::new(self.id, offset, size, self.epoch, self.serials.next()))
    }

    fn deallocate(&mut self, allocation: Allocation) -> MemoryResult<()> {
        check_handle(self.id, self.epoch, &allocation)
    }

    fn free(&mut self) {
        self.offset = 0;
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(storage) = &self.storage {
            let generation = {
                let mut backing = storage.borrow_mut();
                backing.generation = backing.generation.wrapping_add(1);
                backing.generation
            };
            self.root.generation = generation;
        }
    }

    fn can_alloc(&self, size: usize) -> bool {
        size != 0 && self.root.is_live() && size <= self.root.len() - self.offset
    }

    fn current_memory(&self) -> MemorySize {
        MemorySize::from_usize(self.offset)
    }

    fn total_memory(&self) -> MemorySize {
        MemorySize::from_usize(self.root.len())
    }

    fn epoch(&self) -> u32 {
        self.epoch
    }

    fn resolve(&self, allocation: &Allocation) -> MemoryResult<&HeapSpan> {
        check_handle(self.id, self.epoch, allocation)?;
        Ok(&self.root)
    }
}
