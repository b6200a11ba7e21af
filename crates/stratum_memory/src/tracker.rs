//! # Allocation Tracker
//!
//! Frame-scoped allocation diagnostics fed by an explicit event channel.
//!
//! ```text
//! ┌────────────┐  AllocationEvent   ┌──────────────────┐
//! │ LinearHeap │──────┐             │                  │
//! ├────────────┤      │  bounded    │ AllocationTracker│
//! │ TaggedHeap │──────┼───────────> │  (Mutex<State>)  │──> FrameReport
//! ├────────────┤      │  channel    │                  │
//! │ Circular   │──────┘             └──────────────────┘
//! └────────────┘
//! ```
//!
//! Heaps never block on the tracker: events go through `try_send`. The
//! tracker drains the channel whenever it is queried; when the channel is
//! full, the emitting sink drains it into the tracker state itself and then
//! applies its event, so no event is lost and order is kept.
//!
//! A `Reset` event retires every live allocation of that heap, so a frame
//! heap reset counts as "freed within the frame".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::config::TrackerConfig;
use crate::heap::HeapId;

/// What a heap reports to the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationEvent {
    /// `size` bytes were handed out at `offset`.
    Allocated {
        /// Issuing heap.
        heap: HeapId,
        /// Offset of the allocation within the heap.
        offset: usize,
        /// Requested size in bytes.
        size: usize,
    },
    /// A single allocation was returned.
    Deallocated {
        /// Issuing heap.
        heap: HeapId,
        /// Offset of the allocation within the heap.
        offset: usize,
        /// Requested size in bytes.
        size: usize,
    },
    /// The heap released everything at once.
    Reset {
        /// The heap that was reset.
        heap: HeapId,
    },
}

/// Producer side of the tracker channel. Cheap to clone, one per heap.
#[derive(Clone, Debug)]
pub struct EventSink {
    sender: Sender<AllocationEvent>,
    receiver: Receiver<AllocationEvent>,
    state: Arc<Mutex<TrackerState>>,
    enabled: Arc<AtomicBool>,
    spilled: Arc<AtomicU64>,
}

impl EventSink {
    /// Sends an event without blocking on the channel.
    ///
    /// Returns `false` if tracking is off.
    #[inline]
    pub fn emit(&self, event: AllocationEvent) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return false;
        }
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let mut state = self.state.lock();
                drain(&self.receiver, &mut state);
                state.apply(event);
                self.spilled.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Applies every queued event in channel order.
fn drain(receiver: &Receiver<AllocationEvent>, state: &mut TrackerState) {
    while let Ok(event) = receiver.try_recv() {
        state.apply(event);
    }
}

/// An allocation that has not been released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveAllocation {
    /// Issuing heap.
    pub heap: HeapId,
    /// Offset within the heap.
    pub offset: usize,
    /// Requested size in bytes.
    pub size: usize,
    /// Frame that was active when it was allocated.
    pub frame: Option<u64>,
}

/// Summary of one frame, produced by [`AllocationTracker::end_frame`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Frame id passed to `start_frame`.
    pub frame: u64,
    /// Bytes allocated during the frame.
    pub bytes_allocated: u64,
    /// Bytes both allocated and released during the frame.
    pub bytes_churned: u64,
    /// Number of allocations during the frame.
    pub allocation_count: u64,
    /// Allocations from this frame still live at its end.
    pub still_live: Vec<LiveAllocation>,
    /// Events applied inline because the channel was full, since the
    /// previous report.
    pub spilled_events: u64,
}

impl FrameReport {
    /// Total size of the still-live allocations.
    #[must_use]
    pub fn still_live_bytes(&self) -> u64 {
        self.still_live.iter().map(|live| live.size as u64).sum()
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    frame: Option<u64>,
    live: HashMap<(HeapId, usize), LiveAllocation>,
    bytes_allocated: u64,
    bytes_churned: u64,
    allocation_count: u64,
}

impl TrackerState {
    fn apply(&mut self, event: AllocationEvent) {
        match event {
            AllocationEvent::Allocated { heap, offset, size } => {
                if self.frame.is_some() {
                    self.bytes_allocated += size as u64;
                    self.allocation_count += 1;
                }
                self.live.insert(
                    (heap, offset),
                    LiveAllocation {
                        heap,
                        offset,
                        size,
                        frame: self.frame,
                    },
                );
            }
            AllocationEvent::Deallocated { heap, offset, .. } => {
                if let Some(live) = self.live.remove(&(heap, offset)) {
                    self.retire(live);
                }
            }
            AllocationEvent::Reset { heap } => {
                let retired: Vec<_> = self
                    .live
                    .iter()
                    .filter(|(key, _)| key.0 == heap)
                    .map(|(key, live)| (*key, *live))
                    .collect();
                for (key, live) in retired {
                    self.live.remove(&key);
                    self.retire(live);
                }
            }
        }
    }

    fn retire(&mut self, live: LiveAllocation) {
        if self.frame.is_some() && live.frame == self.frame {
            self.bytes_churned += live.size as u64;
        }
    }
}

/// Collects allocation events and reports per-frame statistics.
///
/// Shared behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct AllocationTracker {
    sender: Sender<AllocationEvent>,
    receiver: Receiver<AllocationEvent>,
    enabled: Arc<AtomicBool>,
    spilled: Arc<AtomicU64>,
    state: Arc<Mutex<TrackerState>>,
}

impl AllocationTracker {
    /// Creates a tracker with a channel of `config.event_capacity` events.
    #[must_use]
    pub fn new(config: &TrackerConfig) -> Self {
        let (sender, receiver) = bounded(config.event_capacity.max(1));
        Self {
            sender,
            receiver,
            enabled: Arc::new(AtomicBool::new(config.enabled)),
            spilled: Arc::new(AtomicU64::new(0)),
            state: Arc::new(Mutex::new(TrackerState::default())),
        }
    }

    /// A sink for one heap to report into.
    #[must_use]
    pub fn sink(&self) -> EventSink {
        EventSink {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            state: Arc::clone(&self.state),
            enabled: Arc::clone(&self.enabled),
            spilled: Arc::clone(&self.spilled),
        }
    }

    /// Turns event collection on or off for every sink.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether sinks currently emit events.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Starts attributing allocations to `frame`. Counters from an
    /// unfinished frame are discarded.
    pub fn start_frame(&self, frame: u64) {
        let mut state = self.state.lock();
        self.drain(&mut state);
        state.frame = Some(frame);
        state.bytes_allocated = 0;
        state.bytes_churned = 0;
        state.allocation_count = 0;
    }

    /// Closes the active frame and reports on it. `None` when no frame is
    /// active.
    pub fn end_frame(&self) -> Option<FrameReport> {
        let mut state = self.state.lock();
        self.drain(&mut state);
        let frame = state.frame.take()?;

        let mut still_live: Vec<_> = state
            .live
            .values()
            .filter(|live| live.frame == Some(frame))
            .copied()
            .collect();
        still_live.sort_by_key(|live| (live.heap, live.offset));

        for live in &still_live {
            tracing::warn!(
                frame,
                heap = %live.heap,
                offset = live.offset,
                size = live.size,
                "allocation still live at frame end"
            );
        }

        let spilled_events = self.spilled.swap(0, Ordering::Relaxed);
        if spilled_events > 0 {
            tracing::debug!(frame, spilled_events, "tracker channel filled, drained inline");
        }

        let report = FrameReport {
            frame,
            bytes_allocated: state.bytes_allocated,
            bytes_churned: state.bytes_churned,
            allocation_count: state.allocation_count,
            still_live,
            spilled_events,
        };
        state.bytes_allocated = 0;
        state.bytes_churned = 0;
        state.allocation_count = 0;
        Some(report)
    }

    /// The active frame, if any.
    #[must_use]
    pub fn current_frame(&self) -> Option<u64> {
        self.state.lock().frame
    }

    /// Every allocation not yet released, ordered by heap then offset.
    #[must_use]
    pub fn live_allocations(&self) -> Vec<LiveAllocation> {
        let mut state = self.state.lock();
        self.drain(&mut state);
        let mut live: Vec<_> = state.live.values().copied().collect();
        live.sort_by_key(|live| (live.heap, live.offset));
        live
    }

    /// Total size of every allocation not yet released.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        let mut state = self.state.lock();
        self.drain(&mut state);
        state.live.values().map(|live| live.size as u64).sum()
    }

    fn drain(&self, state: &mut TrackerState) {
        drain(&self.receiver, state);
    }
}

impl Default for AllocationTracker {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}
