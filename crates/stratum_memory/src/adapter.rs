//! # Allocator Adapters
//!
//! Typed allocation routed through a compile-time policy that picks the
//! region and sub-heap.
//!
//! ```rust,ignore
//! type FrameFloats = HeapAllocator<f32, Frame<TransientRegion>>;
//! type IoStaging   = HeapAllocator<u8, Tagged<TransientRegion, 7>>;
//!
//! let floats = FrameFloats::new(Rc::clone(&shared));
//! let samples = floats.allocate(256)?;
//! floats.write(&samples, 0, 1.5)?;
//!
//! // Same policy, other element type: compares equal.
//! let words = floats.rebind::<u32>();
//! assert!(floats == words);
//! ```
//!
//! Elements are `bytemuck::Pod`, so they go in and out of heap bytes by
//! copy without any unsafe code.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use bytemuck::Pod;

use crate::error::{MemoryError, MemoryResult};
use crate::heap::{Allocation, Heap, HeapId};
use crate::manager::MemoryManager;
use crate::region::RegionKind;

/// A manager shared by every adapter on one thread.
pub type SharedManager = Rc<RefCell<MemoryManager>>;

/// Names a region at the type level.
pub trait RegionMarker {
    /// The region selected.
    const KIND: RegionKind;
}

/// Selects the persistent region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersistentRegion;

/// Selects the transient region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransientRegion;

/// Selects the debug region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebugRegion;

impl RegionMarker for PersistentRegion {
    const KIND: RegionKind = RegionKind::Persistent;
}

impl RegionMarker for TransientRegion {
    const KIND: RegionKind = RegionKind::Transient;
}

impl RegionMarker for DebugRegion {
    const KIND: RegionKind = RegionKind::Debug;
}

/// Resolves the heap an adapter allocates from.
pub trait HeapPolicy {
    /// Runs `f` against the selected heap of `manager`.
    fn with_heap<R>(manager: &mut MemoryManager, f: impl FnOnce(&mut dyn Heap) -> R) -> R;
}

/// The region's frame (linear) heap. Reset at every `end_frame`.
#[derive(Debug)]
pub struct Frame<R>(PhantomData<R>);

/// The region's scratch (circular) heap.
#[derive(Debug)]
pub struct Scratch<R>(PhantomData<R>);

/// The region's tagged heap, under tag `TAG`.
#[derive(Debug)]
pub struct Tagged<R, const TAG: u32>(PhantomData<R>);

impl<R: RegionMarker> HeapPolicy for Frame<R> {
    fn with_heap<T>(manager: &mut MemoryManager, f: impl FnOnce(&mut dyn Heap) -> T) -> T {
        f(manager.region_mut(R::KIND).frame_heap_mut())
    }
}

impl<R: RegionMarker> HeapPolicy for Scratch<R> {
    fn with_heap<T>(manager: &mut MemoryManager, f: impl FnOnce(&mut dyn Heap) -> T) -> T {
        f(manager.region_mut(R::KIND).scratch_heap_mut())
    }
}

impl<R: RegionMarker, const TAG: u32> HeapPolicy for Tagged<R, TAG> {
    fn with_heap<T>(manager: &mut MemoryManager, f: impl FnOnce(&mut dyn Heap) -> T) -> T {
        f(&mut manager.region_mut(R::KIND).tagged_heap_mut().view(TAG))
    }
}

/// `count` elements of `T` in some heap.
pub struct TypedAllocation<T> {
    raw: Allocation,
    count: usize,
    /// Marker for T.
    _phantom: PhantomData<fn() -> T>,
}

impl<T> TypedAllocation<T> {
    /// The untyped handle.
    #[inline]
    #[must_use]
    pub const fn raw(&self) -> Allocation {
        self.raw
    }

    /// Number of elements.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Heap that issued the allocation.
    #[inline]
    #[must_use]
    pub const fn heap(&self) -> HeapId {
        self.raw.heap()
    }
}

impl<T> Clone for TypedAllocation<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TypedAllocation<T> {}

impl<T> PartialEq for TypedAllocation<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.count == other.count
    }
}

impl<T> Eq for TypedAllocation<T> {}

impl<T> fmt::Debug for TypedAllocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedAllocation")
            .field("element", &std::any::type_name::<T>())
            .field("count", &self.count)
            .field("raw", &self.raw)
            .finish()
    }
}

/// Allocates `T`s from the heap `P` selects.
///
/// Two adapters compare equal when their policies resolve to the same heap,
/// whatever their element types.
pub struct HeapAllocator<T, P> {
    manager: SharedManager,
    /// Marker for T and P.
    _phantom: PhantomData<fn() -> (T, P)>,
}

impl<T: Pod, P: HeapPolicy> HeapAllocator<T, P> {
    /// Creates an adapter over `manager`.
    #[must_use]
    pub fn new(manager: SharedManager) -> Self {
        Self {
            manager,
            _phantom: PhantomData,
        }
    }

    /// Identity of the heap the policy resolves to.
    #[must_use]
    pub fn heap_id(&self) -> HeapId {
        P::with_heap(&mut self.manager.borrow_mut(), |heap| heap.id())
    }

    /// The manager this adapter allocates through.
    #[must_use]
    pub fn manager(&self) -> &SharedManager {
        &self.manager
    }

    /// Reserves room for `count` elements.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ZeroSized`] for an empty request, otherwise whatever
    /// the heap reports.
    pub fn allocate(&self, count: usize) -> MemoryResult<TypedAllocation<T>> {
        let bytes = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(MemoryError::SizeOverflow)?;
        let raw = P::with_heap(&mut self.manager.borrow_mut(), |heap| heap.allocate(bytes))?;
        Ok(TypedAllocation {
            raw,
            count,
            _phantom: PhantomData,
        })
    }

    /// Releases an allocation of `count` elements.
    ///
    /// # Errors
    ///
    /// [`MemoryError::CountMismatch`] if `count` differs from the count
    /// allocated.
    pub fn deallocate(&self, allocation: TypedAllocation<T>, count: usize) -> MemoryResult<()> {
        if count != allocation.count {
            return Err(MemoryError::CountMismatch {
                expected: allocation.count,
                found: count,
            });
        }
        P::with_heap(&mut self.manager.borrow_mut(), |heap| {
            heap.deallocate(allocation.raw)
        })
    }

    /// Stores `value` at `index`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] past the element count, otherwise
    /// whatever the heap reports for the handle.
    pub fn write(&self, allocation: &TypedAllocation<T>, index: usize, value: T) -> MemoryResult<()> {
        let at = Self::byte_offset(allocation, index)?;
        P::with_heap(&mut self.manager.borrow_mut(), |heap| {
            heap.write(&allocation.raw, at, bytemuck::bytes_of(&value))
        })
    }

    /// Loads the element at `index`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] past the element count, otherwise
    /// whatever the heap reports for the handle.
    pub fn read(&self, allocation: &TypedAllocation<T>, index: usize) -> MemoryResult<T> {
        let at = Self::byte_offset(allocation, index)?;
        let mut value = T::zeroed();
        P::with_heap(&mut self.manager.borrow_mut(), |heap| {
            heap.read(&allocation.raw, at, bytemuck::bytes_of_mut(&mut value))
        })?;
        Ok(value)
    }

    /// The same policy for another element type.
    #[must_use]
    pub fn rebind<U: Pod>(&self) -> HeapAllocator<U, P> {
        HeapAllocator::new(Rc::clone(&self.manager))
    }

    fn byte_offset(allocation: &TypedAllocation<T>, index: usize) -> MemoryResult<usize> {
        if index >= allocation.count {
            return Err(MemoryError::OutOfBounds {
                offset: index,
                len: 1,
                capacity: allocation.count,
            });
        }
        Ok(index * std::mem::size_of::<T>())
    }
}

impl<T, P> Clone for HeapAllocator<T, P> {
    fn clone(&self) -> Self {
        Self {
            manager: Rc::clone(&self.manager),
            _phantom: PhantomData,
        }
    }
}

impl<T: Pod, P: HeapPolicy, U: Pod, Q: HeapPolicy> PartialEq<HeapAllocator<U, Q>> for HeapAllocator<T, P> {
    fn eq(&self, other: &HeapAllocator<U, Q>) -> bool {
        self.heap_id() == other.heap_id()
    }
}

impl<T: Pod, P: HeapPolicy> Eq for HeapAllocator<T, P> {}

impl<T, P> fmt::Debug for HeapAllocator<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("element", &std::any::type_name::<T>())
            .field("policy", &std::any::type_name::<P>())
            .finish_non_exhaustive()
    }
}

/// A fixed-capacity vector whose elements live in a policy-selected heap.
///
/// Capacity is reserved up front and never grows. The storage goes back to
/// the heap with [`HeapVec::release`]; frame-heap vectors are also reset
/// wholesale at frame end, after which every access fails with
/// [`MemoryError::StaleAllocation`].
#[derive(Debug)]
pub struct HeapVec<T, P> {
    allocator: HeapAllocator<T, P>,
    storage: TypedAllocation<T>,
    len: usize,
}

impl<T: Pod, P: HeapPolicy> HeapVec<T, P> {
    /// Reserves room for `capacity` elements.
    ///
    /// # Errors
    ///
    /// Whatever [`HeapAllocator::allocate`] reports.
    pub fn with_capacity(allocator: HeapAllocator<T, P>, capacity: usize) -> MemoryResult<Self> {
        let storage = allocator.allocate(capacity)?;
        Ok(Self {
            allocator,
            storage,
            len: 0,
        })
    }

    /// Appends `value`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfMemory`] when the vector is full.
    pub fn push(&mut self, value: T) -> MemoryResult<()> {
        if self.len == self.storage.count() {
            return Err(MemoryError::OutOfMemory {
                requested: std::mem::size_of::<T>(),
                available: 0,
            });
        }
        self.allocator.write(&self.storage, self.len, value)?;
        self.len += 1;
        Ok(())
    }

    /// The element at `index`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] past the length, or a stale handle
    /// after the heap was reset.
    pub fn get(&self, index: usize) -> MemoryResult<T> {
        self.check_index(index)?;
        self.allocator.read(&self.storage, index)
    }

    /// Overwrites the element at `index`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] past the length, or a stale handle
    /// after the heap was reset.
    pub fn set(&mut self, index: usize, value: T) -> MemoryResult<()> {
        self.check_index(index)?;
        self.allocator.write(&self.storage, index, value)
    }

    /// Number of elements pushed.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been pushed.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of elements.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.storage.count()
    }

    /// Copies the elements out.
    ///
    /// # Errors
    ///
    /// A stale handle after the heap was reset.
    pub fn to_vec(&self) -> MemoryResult<Vec<T>> {
        (0..self.len).map(|index| self.allocator.read(&self.storage, index)).collect()
    }

    /// Forgets every element. The storage is kept.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Returns the storage to its heap.
    ///
    /// # Errors
    ///
    /// Whatever [`HeapAllocator::deallocate`] reports.
    pub fn release(self) -> MemoryResult<()> {
        self.allocator.deallocate(self.storage, self.storage.count())
    }

    fn check_index(&self, index: usize) -> MemoryResult<()> {
        if index < self.len {
            Ok(())
        } else {
            Err(MemoryError::OutOfBounds {
                offset: index,
                len: 1,
                capacity: self.len,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildProfile, MemoryConfig, ProfileConfig, RegionConfig, TrackerConfig};

    fn shared() -> SharedManager {
        let region = RegionConfig {
            frame_heap_size: 4,
            tagged_heap_block_size: 1,
            tagged_heap_block_count: 4,
            scratch_heap_size: 2,
        };
        let profile = ProfileConfig {
            persistent: region,
            staging: region,
            debug: region,
        };
        let config = MemoryConfig {
            development: profile,
            shipping: profile,
            tracker: TrackerConfig::default(),
        };
        Rc::new(RefCell::new(
            MemoryManager::from_config(&config, BuildProfile::Development).unwrap(),
        ))
    }

    #[test]
    fn test_typed_round_trip() {
        let manager = shared();
        let floats = HeapAllocator::<f32, Frame<TransientRegion>>::new(Rc::clone(&manager));

        let samples = floats.allocate(4).unwrap();
        for index in 0..4 {
            floats.write(&samples, index, index as f32 * 0.5).unwrap();
        }
        assert_eq!(floats.read(&samples, 3).unwrap(), 1.5);
        assert!(matches!(
            floats.read(&samples, 4),
            Err(MemoryError::OutOfBounds { .. })
        ));
        assert_eq!(
            manager.borrow().get_transient_region().frame_heap().current_memory().size_in_bytes(),
            16
        );
    }

    #[test]
    fn test_equality_follows_heap_identity() {
        let manager = shared();
        let frame = HeapAllocator::<u32, Frame<PersistentRegion>>::new(Rc::clone(&manager));
        let rebound = frame.rebind::<u64>();
        let other_region = HeapAllocator::<u32, Frame<TransientRegion>>::new(Rc::clone(&manager));
        let tag_one = HeapAllocator::<u8, Tagged<PersistentRegion, 1>>::new(Rc::clone(&manager));
        let tag_two = HeapAllocator::<u8, Tagged<PersistentRegion, 2>>::new(Rc::clone(&manager));

        assert!(frame == rebound);
        assert!(frame.clone() == frame);
        assert!(frame != other_region);
        // Tags share one tagged heap.
        assert!(tag_one == tag_two);
        assert!(frame != tag_one);
    }

    #[test]
    fn test_deallocate_checks_count() {
        let manager = shared();
        let scratch = HeapAllocator::<u16, Scratch<DebugRegion>>::new(manager);
        let block = scratch.allocate(8).unwrap();

        assert_eq!(
            scratch.deallocate(block, 4),
            Err(MemoryError::CountMismatch { expected: 8, found: 4 })
        );
        scratch.deallocate(block, 8).unwrap();
    }

    #[test]
    fn test_tagged_policy_uses_its_tag() {
        let manager = shared();
        let io = HeapAllocator::<u8, Tagged<TransientRegion, 7>>::new(Rc::clone(&manager));
        io.allocate(100).unwrap();

        let mut manager = manager.borrow_mut();
        let tagged = manager.get_transient_region_mut().tagged_heap_mut();
        assert_eq!(tagged.blocks_for(7), 1);
        assert_eq!(tagged.free_blocks(7), 1);
    }

    #[test]
    fn test_heap_vec() {
        let manager = shared();
        let allocator = HeapAllocator::<u32, Tagged<PersistentRegion, 3>>::new(manager);
        let mut values = HeapVec::with_capacity(allocator, 3).unwrap();

        values.push(10).unwrap();
        values.push(20).unwrap();
        values.set(0, 11).unwrap();
        assert_eq!(values.get(1).unwrap(), 20);
        assert!(values.get(2).is_err());
        values.push(30).unwrap();
        assert!(matches!(values.push(40), Err(MemoryError::OutOfMemory { .. })));

        assert_eq!(values.to_vec().unwrap(), vec![11, 20, 30]);
        assert_eq!(values.capacity(), 3);
        values.clear();
        assert!(values.is_empty());
        values.release().unwrap();
    }

    #[test]
    fn test_frame_vec_goes_stale_after_end_frame() {
        let manager = shared();
        let allocator = HeapAllocator::<u8, Frame<TransientRegion>>::new(Rc::clone(&manager));
        let mut bytes = HeapVec::with_capacity(allocator, 8).unwrap();
        bytes.push(1).unwrap();

        manager.borrow().start_frame(1);
        manager.borrow_mut().end_frame();

        assert!(matches!(bytes.get(0), Err(MemoryError::StaleAllocation { .. })));
    }
}
