//! # Tagged Heap
//!
//! Bulk group-free by category. Allocations carry a caller-chosen tag; each
//! tag owns one or more fixed-size linear blocks, and `free_blocks(tag)`
//! resets all of them at once without enumerating individual allocations.
//!
//! ```text
//!   span: ┌─────────┬─────────┬─────────┬─────────┐
//!         │ tag 1   │ tag 2   │ tag 1   │ unused  │
//!         └─────────┴─────────┴─────────┴─────────┘
//!           block 0   block 1   block 2   (carved lazily)
//! ```
//!
//! Blocks are carved on demand, in order, up to the configured count. A
//! block keeps its tag for the heap's lifetime: after `free_blocks(1)` the
//! tag-1 blocks are empty again but only serve tag 1.

use crate::error::{MemoryError, MemoryResult};
use crate::heap::{Allocation, Heap, HeapId, HeapSpan, LinearHeap};
use crate::size::MemorySize;
use crate::tracker::EventSink;

/// One fixed-size linear block assigned to a tag.
#[derive(Debug)]
pub struct TaggedHeapBlock {
    tag: u32,
    heap: LinearHeap,
}

impl TaggedHeapBlock {
    /// The tag this block serves.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> u32 {
        self.tag
    }

    /// The block's linear heap.
    #[inline]
    #[must_use]
    pub const fn heap(&self) -> &LinearHeap {
        &self.heap
    }
}

/// A growable set of tagged blocks over one span.
#[derive(Debug)]
pub struct TaggedHeap {
    id: HeapId,
    span: HeapSpan,
    block_size: usize,
    block_limit: usize,
    blocks: Vec<TaggedHeapBlock>,
    events: Option<EventSink>,
    resets: u32,
}

impl TaggedHeap {
    /// Creates a heap of up to `block_count` blocks of `block_size` bytes.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfMemory`] if the blocks do not fit in `span`.
    pub fn new(span: HeapSpan, block_size: usize, block_count: usize) -> MemoryResult<Self> {
        let required = block_size
            .checked_mul(block_count)
            .ok_or(MemoryError::SizeOverflow)?;
        if required > span.len() {
            return Err(MemoryError::OutOfMemory {
                requested: required,
                available: span.len(),
            });
        }
        Ok(Self {
            id: HeapId::next(),
            span,
            block_size,
            block_limit: block_count,
            blocks: Vec::with_capacity(block_count),
            events: None,
            resets: 0,
        })
    }

    /// Reports allocation events from every block to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Identity of the tagged heap as a whole.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> HeapId {
        self.id
    }

    /// Allocates `size` bytes under `tag`, carving a new block if every
    /// block of that tag is full.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfMemory`] if `size` exceeds the block size,
    /// [`MemoryError::BlockLimit`] if a new block is needed and none is left.
    pub fn allocate(&mut self, tag: u32, size: usize) -> MemoryResult<Allocation> {
        if size == 0 {
            return Err(MemoryError::ZeroSized);
        }
        if size > self.block_size {
            return Err(MemoryError::OutOfMemory {
                requested: size,
                available: self.block_size,
            });
        }
        if let Some(block) = self
            .blocks
            .iter_mut()
            .find(|block| block.tag == tag && block.heap.can_alloc(size))
        {
            return block.heap.allocate(size);
        }

        let block = self.carve_block(tag)?;
        block.heap.allocate(size)
    }

    fn carve_block(&mut self, tag: u32) -> MemoryResult<&mut TaggedHeapBlock> {
        let index = self.blocks.len();
        if index >= self.block_limit {
            return Err(MemoryError::BlockLimit {
                tag,
                limit: self.block_limit,
            });
        }
        let span = self.span.subspan(index * self.block_size, self.block_size)?;
        let mut heap = LinearHeap::new(span);
        if let Some(events) = &self.events {
            heap = heap.with_events(events.clone());
        }
        tracing::debug!(tag, block = index, "tagged heap block assigned");
        self.blocks.push(TaggedHeapBlock { tag, heap });
        Ok(&mut self.blocks[index])
    }

    /// Releases one allocation made under `tag`. Linear blocks only
    /// validate the handle; space returns with `free_blocks(tag)`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::TagNotFound`] if no block carries `tag`.
    pub fn deallocate(&mut self, tag: u32, allocation: Allocation) -> MemoryResult<()> {
        let mut tagged = self.blocks.iter_mut().filter(|block| block.tag == tag).peekable();
        if tagged.peek().is_none() {
            return Err(MemoryError::TagNotFound(tag));
        }
        let block = tagged
            .find(|block| block.heap.id() == allocation.heap())
            .ok_or(MemoryError::ForeignAllocation {
                expected: self.id,
                found: allocation.heap(),
            })?;
        block.heap.deallocate(allocation)
    }

    /// Resets every block assigned to `tag`. Returns how many were reset.
    pub fn free_blocks(&mut self, tag: u32) -> usize {
        let mut count = 0;
        for block in self.blocks.iter_mut().filter(|block| block.tag == tag) {
            block.heap.free();
            count += 1;
        }
        self.resets = self.resets.wrapping_add(1);
        count
    }

    /// Resets every block regardless of tag.
    pub fn free(&mut self) {
        for block in &mut self.blocks {
            block.heap.free();
        }
        self.resets = self.resets.wrapping_add(1);
    }

    /// Whether `allocate(tag, size)` would succeed right now.
    #[must_use]
    pub fn can_alloc(&self, tag: u32, size: usize) -> bool {
        if size == 0 || size > self.block_size {
            return false;
        }
        self.blocks
            .iter()
            .any(|block| block.tag == tag && block.heap.can_alloc(size))
            || (self.blocks.len() < self.block_limit && self.span.is_live())
    }

    /// Copies `data` into an allocation from any block.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ForeignAllocation`] if no block issued the handle,
    /// otherwise the block's own checks.
    pub fn write(&self, allocation: &Allocation, at: usize, data: &[u8]) -> MemoryResult<()> {
        self.owner(allocation)?.heap.write(allocation, at, data)
    }

    /// Copies bytes out of an allocation from any block.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ForeignAllocation`] if no block issued the handle,
    /// otherwise the block's own checks.
    pub fn read(&self, allocation: &Allocation, at: usize, out: &mut [u8]) -> MemoryResult<()> {
        self.owner(allocation)?.heap.read(allocation, at, out)
    }

    /// Validates `allocation` and returns the span holding its bytes.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ForeignAllocation`] if no block issued the handle,
    /// [`MemoryError::StaleAllocation`] if its block was reset since.
    pub fn resolve(&self, allocation: &Allocation) -> MemoryResult<&HeapSpan> {
        self.owner(allocation)?.heap.resolve(allocation)
    }

    /// The blocks carved so far, in span order.
    #[must_use]
    pub fn blocks(&self) -> &[TaggedHeapBlock] {
        &self.blocks
    }

    /// Number of blocks assigned to `tag`.
    #[must_use]
    pub fn blocks_for(&self, tag: u32) -> usize {
        self.blocks.iter().filter(|block| block.tag == tag).count()
    }

    /// Number of blocks carved so far.
    #[inline]
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Maximum number of blocks.
    #[inline]
    #[must_use]
    pub const fn block_limit(&self) -> usize {
        self.block_limit
    }

    /// Size of each block in bytes.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes in use across the blocks of `tag`.
    #[must_use]
    pub fn current_memory_for(&self, tag: u32) -> MemorySize {
        self.blocks
            .iter()
            .filter(|block| block.tag == tag)
            .map(|block| block.heap.current_memory())
            .sum()
    }

    /// Bytes in use across every block.
    #[must_use]
    pub fn current_memory(&self) -> MemorySize {
        self.blocks.iter().map(|block| block.heap.current_memory()).sum()
    }

    /// Capacity of every block, carved or not.
    #[must_use]
    pub fn total_memory(&self) -> MemorySize {
        MemorySize::from_usize(self.block_size * self.block_limit)
    }

    /// A single-tag view implementing [`Heap`].
    #[must_use]
    pub fn view(&mut self, tag: u32) -> TagView<'_> {
        TagView { heap: self, tag }
    }

    fn owner(&self, allocation: &Allocation) -> MemoryResult<&TaggedHeapBlock> {
        self.blocks
            .iter()
            .find(|block| block.heap.id() == allocation.heap())
            .ok_or(MemoryError::ForeignAllocation {
                expected: self.id,
                found: allocation.heap(),
            })
    }
}

/// A [`TaggedHeap`] seen through one tag, so it can stand in wherever a
/// [`Heap`] is expected. `free()` frees only this tag's blocks.
#[derive(Debug)]
pub struct TagView<'a> {
    heap: &'a mut TaggedHeap,
    tag: u32,
}

impl TagView<'_> {
    /// The tag this view allocates under.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> u32 {
        self.tag
    }
}

impl Heap for TagView<'_> {
    fn id(&self) -> HeapId {
        self.heap.id
    }

    fn allocate(&mut self, size: usize) -> MemoryResult<Allocation> {
        self.heap.allocate(self.tag, size)
    }

    fn deallocate(&mut self, allocation: Allocation) -> MemoryResult<()> {
        self.heap.deallocate(self.tag, allocation)
    }

    fn free(&mut self) {
        self.heap.free_blocks(self.tag);
    }

    fn can_alloc(&self, size: usize) -> bool {
        self.heap.can_alloc(self.tag, size)
    }

    fn current_memory(&self) -> MemorySize {
        self.heap.current_memory_for(self.tag)
    }

    fn total_memory(&self) -> MemorySize {
        self.heap.total_memory()
    }

    fn epoch(&self) -> u32 {
        self.heap.resets
    }

    fn resolve(&self, allocation: &Allocation) -> MemoryResult<&HeapSpan> {
        self.heap.resolve(allocation)
    }
}
