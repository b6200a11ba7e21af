//! # Memory Regions
//!
//! A region is one lifetime domain: a single raw heap sized to exactly fit
//! a frame heap, a tagged heap and a scratch heap, carved in that order.
//!
//! ```text
//!   RawHeap (total_memory() bytes)
//!   ┌────────────────┬─────────────────────────────┬───────────────┐
//!   │  frame heap    │ tagged blocks (size × count)│ scratch heap  │
//!   │  LinearHeap    │ TaggedHeap                  │ CircularHeap  │
//!   └────────────────┴─────────────────────────────┴───────────────┘
//! ```

use std::fmt;

use crate::error::{MemoryError, MemoryResult};
use crate::heap::{CircularHeap, Heap, LinearHeap, RawHeap};
use crate::size::MemorySize;
use crate::tagged::TaggedHeap;
use crate::tracker::EventSink;

/// The three lifetime domains a manager owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Long-lived engine state.
    Persistent,
    /// Cross-frame scratch.
    Transient,
    /// Diagnostics.
    Debug,
}

impl RegionKind {
    /// Every kind, in construction order.
    pub const ALL: [Self; 3] = [Self::Persistent, Self::Transient, Self::Debug];

    /// Lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::Transient => "transient",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sizes of the sub-heaps of one region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// Frame (linear) heap size.
    pub frame_heap_size: MemorySize,
    /// Size of each tagged block.
    pub tagged_block_size: MemorySize,
    /// Number of tagged blocks.
    pub tagged_block_count: usize,
    /// Scratch (circular) heap size.
    pub scratch_heap_size: MemorySize,
}

impl MemoryRequirements {
    /// Exact sum of every sub-heap.
    #[must_use]
    pub fn total_memory(&self) -> MemorySize {
        self.frame_heap_size + self.tagged_block_size * self.tagged_block_count as i64 + self.scratch_heap_size
    }

    /// [`total_memory`](Self::total_memory) without overflowing.
    #[must_use]
    pub fn checked_total_memory(&self) -> Option<MemorySize> {
        let tagged = self
            .tagged_block_size
            .size_in_bytes()
            .checked_mul(i64::try_from(self.tagged_block_count).ok()?)?;
        self.frame_heap_size
            .size_in_bytes()
            .checked_add(tagged)?
            .checked_add(self.scratch_heap_size.size_in_bytes())
            .map(MemorySize::bytes)
    }
}

/// A raw heap plus the frame, tagged and scratch heaps carved from it.
#[derive(Debug)]
pub struct MemoryRegion {
    kind: RegionKind,
    requirements: MemoryRequirements,
    base: RawHeap,
    frame: LinearHeap,
    tagged: TaggedHeap,
    scratch: CircularHeap,
}

impl MemoryRegion {
    /// Allocates the base heap and carves the sub-heaps.
    ///
    /// # Errors
    ///
    /// Fails for negative or overflowing sizes.
    pub fn new(
        kind: RegionKind,
        requirements: MemoryRequirements,
        events: Option<EventSink>,
    ) -> MemoryResult<Self> {
        let total = requirements
            .checked_total_memory()
            .ok_or(MemoryError::SizeOverflow)?;
        let mut base = RawHeap::new(total)?;

        let frame_span = base.carve(requirements.frame_heap_size.to_usize()?)?;
        let block_size = requirements.tagged_block_size.to_usize()?;
        let tagged_span = base.carve(block_size * requirements.tagged_block_count)?;
        let scratch_span = base.carve(requirements.scratch_heap_size.to_usize()?)?;

        let mut frame = LinearHeap::new(frame_span);
        let mut tagged = TaggedHeap::new(tagged_span, block_size, requirements.tagged_block_count)?;
        let mut scratch = CircularHeap::new(scratch_span);
        if let Some(events) = events {
            frame = frame.with_events(events.clone());
            tagged = tagged.with_events(events.clone());
            scratch = scratch.with_events(events);
        }

        tracing::debug!(
            region = kind.name(),
            total = %total,
            frame = %requirements.frame_heap_size,
            tagged_blocks = requirements.tagged_block_count,
            scratch = %requirements.scratch_heap_size,
            "memory region created"
        );

        Ok(Self {
            kind,
            requirements,
            base,
            frame,
            tagged,
            scratch,
        })
    }

    /// Which lifetime domain this region serves.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Sizes the region was built from.
    #[inline]
    #[must_use]
    pub const fn requirements(&self) -> &MemoryRequirements {
        &self.requirements
    }

    /// The per-frame linear heap.
    #[inline]
    #[must_use]
    pub const fn frame_heap(&self) -> &LinearHeap {
        &self.frame
    }

    /// The per-frame linear heap.
    #[inline]
    pub fn frame_heap_mut(&mut self) -> &mut LinearHeap {
        &mut self.frame
    }

    /// The tagged heap.
    #[inline]
    #[must_use]
    pub const fn tagged_heap(&self) -> &TaggedHeap {
        &self.tagged
    }

    /// The tagged heap.
    #[inline]
    pub fn tagged_heap_mut(&mut self) -> &mut TaggedHeap {
        &mut self.tagged
    }

    /// The circular scratch heap.
    #[inline]
    #[must_use]
    pub const fn scratch_heap(&self) -> &CircularHeap {
        &self.scratch
    }

    /// The circular scratch heap.
    #[inline]
    pub fn scratch_heap_mut(&mut self) -> &mut CircularHeap {
        &mut self.scratch
    }

    /// Resets the frame heap.
    pub fn reset_frame(&mut self) {
        self.frame.free();
    }

    /// Bytes in use across the three sub-heaps.
    #[must_use]
    pub fn current_memory(&self) -> MemorySize {
        self.frame.current_memory() + self.tagged.current_memory() + self.scratch.current_memory()
    }

    /// Size of the base heap.
    #[must_use]
    pub fn total_memory(&self) -> MemorySize {
        self.base.total_memory()
    }

    /// Whether [`MemoryRegion::free`] has run.
    #[inline]
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.base.is_released()
    }

    /// Resets every sub-heap, then releases the base heap. The region is
    /// unusable afterwards.
    pub fn free(&mut self) {
        if self.is_released() {
            return;
        }
        self.frame.free();
        self.tagged.free();
        self.scratch.free();
        self.base.release();
        tracing::debug!(region = self.kind.name(), "memory region released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::SizeLiteral;

    fn requirements() -> MemoryRequirements {
        MemoryRequirements {
            frame_heap_size: 4_i64.kb(),
            tagged_block_size: 1_i64.kb(),
            tagged_block_count: 3,
            scratch_heap_size: 2_i64.kb(),
        }
    }

    #[test]
    fn test_total_memory_is_exact_sum() {
        let requirements = requirements();
        assert_eq!(requirements.total_memory().size_in_bytes(), 4000 + 3000 + 2000);
        assert_eq!(requirements.checked_total_memory(), Some(requirements.total_memory()));

        let region = MemoryRegion::new(RegionKind::Persistent, requirements, None).unwrap();
        assert_eq!(region.total_memory(), requirements.total_memory());
        assert_eq!(region.frame_heap().total_memory(), 4_i64.kb());
        assert_eq!(region.tagged_heap().total_memory(), 3_i64.kb());
        assert_eq!(region.scratch_heap().total_memory(), 2_i64.kb());
    }

    #[test]
    fn test_sub_heaps_do_not_alias() {
        let mut region = MemoryRegion::new(RegionKind::Transient, requirements(), None).unwrap();

        let frame = region.frame_heap_mut().allocate(4000).unwrap();
        region.frame_heap().write(&frame, 0, &[0xF0; 4000]).unwrap();
        let tagged = region.tagged_heap_mut().allocate(1, 1000).unwrap();
        region.tagged_heap().write(&tagged, 0, &[0x7A; 1000]).unwrap();
        let scratch = region.scratch_heap_mut().allocate(2000).unwrap();
        region.scratch_heap().write(&scratch, 0, &[0x5C; 2000]).unwrap();

        let mut out = [0u8; 4000];
        region.frame_heap().read(&frame, 0, &mut out).unwrap();
        assert!(out.iter().all(|byte| *byte == 0xF0));
        assert_eq!(region.current_memory(), 7_i64.kb());
    }

    #[test]
    fn test_reset_frame_keeps_tagged_data() {
        let mut region = MemoryRegion::new(RegionKind::Persistent, requirements(), None).unwrap();
        region.frame_heap_mut().allocate(100).unwrap();
        region.tagged_heap_mut().allocate(3, 10).unwrap();

        region.reset_frame();
        assert_eq!(region.frame_heap().current_memory(), MemorySize::ZERO);
        assert_eq!(region.tagged_heap().current_memory(), MemorySize::bytes(10));
    }

    #[test]
    fn test_free_releases_backing() {
        let mut region = MemoryRegion::new(RegionKind::Debug, requirements(), None).unwrap();
        let a = region.scratch_heap_mut().allocate(16).unwrap();

        region.free();
        assert!(region.is_released());
        assert_eq!(region.current_memory(), MemorySize::ZERO);
        assert_eq!(region.frame_heap_mut().allocate(8), Err(MemoryError::BackingReleased));
        assert!(matches!(
            region.scratch_heap().read(&a, 0, &mut [0u8; 1]),
            Err(MemoryError::StaleAllocation { .. })
        ));
    }

    #[test]
    fn test_zero_sized_region() {
        let mut region =
            MemoryRegion::new(RegionKind::Debug, MemoryRequirements::default(), None).unwrap();
        assert_eq!(region.total_memory(), MemorySize::ZERO);
        assert!(!region.frame_heap().can_alloc(1));
        assert!(matches!(
            region.tagged_heap_mut().allocate(1, 1),
            Err(MemoryError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_negative_requirements_rejected() {
        let requirements = MemoryRequirements {
            frame_heap_size: 1_i64.kb() - 2_i64.kb(),
            ..requirements()
        };
        assert!(matches!(
            MemoryRegion::new(RegionKind::Persistent, requirements, None),
            Err(MemoryError::NegativeSize(_))
        ));
    }
}
