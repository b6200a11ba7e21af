//! # Frame Loop
//!
//! ```text
//! Frame N:
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 1. BEGIN FRAME                                                      │
//! │    └─ tracker.start_frame(N)                                        │
//! │                                                                     │
//! │ 2. WORK                                                             │
//! │    ├─ Frame<_>    allocations (gone at step 3)                      │
//! │    ├─ Scratch<_>  allocations (released oldest-first)               │
//! │    └─ Tagged<_,T> allocations (released per tag)                    │
//! │                                                                     │
//! │ 3. END FRAME                                                        │
//! │    ├─ Reset every live region's frame heap                          │
//! │    ├─ tracker.end_frame() -> FrameReport                            │
//! │    └─ Fold the report into MemoryStatsAccumulator                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use stratum_memory::{FrameReport, MemoryManager, SharedManager};

/// Frame time above which a frame is logged as slow.
pub const MAX_FRAME_TIME: Duration = Duration::from_millis(33);

/// Handles for a single frame's work.
///
/// Created by [`FrameLoop::begin_frame`] and consumed by
/// [`FrameLoop::end_frame`].
#[derive(Debug)]
pub struct FrameContext {
    /// The manager to build allocators from.
    pub memory: SharedManager,
    /// Current frame number.
    pub frame: u64,
    /// Seconds since the previous frame began, clamped to 0.1.
    pub delta_time: f32,
    started: Instant,
}

/// Owns the memory manager and the frame lifecycle.
#[derive(Debug)]
pub struct FrameLoop {
    /// The manager, shared with every adapter.
    memory: SharedManager,
    /// Frame counter.
    frame_count: u64,
    /// Last frame start time.
    last_frame_time: Instant,
    /// Accumulated memory statistics.
    stats: MemoryStatsAccumulator,
}

impl FrameLoop {
    /// Takes ownership of `manager`.
    #[must_use]
    pub fn new(manager: MemoryManager) -> Self {
        Self {
            memory: Rc::new(RefCell::new(manager)),
            frame_count: 0,
            last_frame_time: Instant::now(),
            stats: MemoryStatsAccumulator::new(),
        }
    }

    /// The shared manager.
    #[must_use]
    pub fn memory(&self) -> &SharedManager {
        &self.memory
    }

    /// Starts attributing allocations to the next frame.
    ///
    /// # Panics
    ///
    /// Panics if the manager is mutably borrowed elsewhere.
    #[must_use]
    pub fn begin_frame(&mut self) -> FrameContext {
        let now = Instant::now();
        let delta_time = now.duration_since(self.last_frame_time).as_secs_f32().min(0.1);
        self.last_frame_time = now;

        self.memory.borrow().start_frame(self.frame_count);
        FrameContext {
            memory: Rc::clone(&self.memory),
            frame: self.frame_count,
            delta_time,
            started: now,
        }
    }

    /// Resets frame heaps, collects the tracker report and records it.
    ///
    /// # Panics
    ///
    /// Panics if the manager is borrowed elsewhere.
    pub fn end_frame(&mut self, ctx: FrameContext) -> FrameReport {
        let report = self
            .memory
            .borrow_mut()
            .end_frame()
            .unwrap_or_else(|| FrameReport {
                frame: ctx.frame,
                ..FrameReport::default()
            });

        let elapsed = ctx.started.elapsed();
        if elapsed > MAX_FRAME_TIME {
            tracing::warn!(
                frame = ctx.frame,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "frame exceeded budget"
            );
        }

        self.stats.record(&report, elapsed);
        self.frame_count += 1;
        report
    }

    /// Frames completed so far.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Returns the accumulated statistics.
    #[must_use]
    pub fn stats(&self) -> &MemoryStatsAccumulator {
        &self.stats
    }
}

/// Running totals over every [`FrameReport`].
#[derive(Clone, Debug)]
pub struct MemoryStatsAccumulator {
    /// Total frames recorded.
    pub frames_recorded: u64,
    /// Sum of bytes allocated.
    pub bytes_allocated_sum: u64,
    /// Sum of bytes allocated and released within their frame.
    pub bytes_churned_sum: u64,
    /// Fewest bytes allocated in one frame.
    pub min_bytes_per_frame: u64,
    /// Most bytes allocated in one frame.
    pub peak_bytes_per_frame: u64,
    /// Sum of allocation counts.
    pub allocation_count_sum: u64,
    /// Frames that ended with allocations still live.
    pub frames_with_live_allocations: u64,
    /// Sum of bytes still live at frame end.
    pub still_live_bytes_sum: u64,
    /// Tracker events applied inline because the channel was full.
    pub spilled_events_sum: u64,
    /// Slowest frame.
    pub max_frame_time: Duration,
}

impl MemoryStatsAccumulator {
    /// Creates a new accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames_recorded: 0,
            bytes_allocated_sum: 0,
            bytes_churned_sum: 0,
            min_bytes_per_frame: u64::MAX,
            peak_bytes_per_frame: 0,
            allocation_count_sum: 0,
            frames_with_live_allocations: 0,
            still_live_bytes_sum: 0,
            spilled_events_sum: 0,
            max_frame_time: Duration::ZERO,
        }
    }

    /// Records one frame.
    pub fn record(&mut self, report: &FrameReport, elapsed: Duration) {
        self.frames_recorded += 1;
        self.bytes_allocated_sum += report.bytes_allocated;
        self.bytes_churned_sum += report.bytes_churned;
        self.min_bytes_per_frame = self.min_bytes_per_frame.min(report.bytes_allocated);
        self.peak_bytes_per_frame = self.peak_bytes_per_frame.max(report.bytes_allocated);
        self.allocation_count_sum += report.allocation_count;
        self.still_live_bytes_sum += report.still_live_bytes();
        self.spilled_events_sum += report.spilled_events;
        self.max_frame_time = self.max_frame_time.max(elapsed);

        if !report.still_live.is_empty() {
            self.frames_with_live_allocations += 1;
        }
    }

    /// Average bytes allocated per frame.
    #[must_use]
    pub fn avg_bytes_per_frame(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        self.bytes_allocated_sum as f64 / self.frames_recorded as f64
    }

    /// Share of allocated bytes that were released within their frame.
    #[must_use]
    pub fn churn_ratio(&self) -> f64 {
        if self.bytes_allocated_sum == 0 {
            return 0.0;
        }
        self.bytes_churned_sum as f64 / self.bytes_allocated_sum as f64
    }

    /// Prints a summary of the statistics.
    pub fn print_summary(&self) {
        let min = if self.frames_recorded == 0 { 0 } else { self.min_bytes_per_frame };
        println!("╔══════════════════════════════════════════════════════════════════╗");
        println!("║                    MEMORY STATISTICS SUMMARY                     ║");
        println!("╚══════════════════════════════════════════════════════════════════╝");
        println!();
        println!("┌─ ALLOCATION ─────────────────────────────────────────────────────┐");
        println!("│ Frames Recorded:    {}", self.frames_recorded);
        println!("│ Allocations:        {}", self.allocation_count_sum);
        println!("│ Average / Frame:    {:.1} bytes", self.avg_bytes_per_frame());
        println!("│ Min / Frame:        {min} bytes");
        println!("│ Peak / Frame:       {} bytes", self.peak_bytes_per_frame);
        println!("└──────────────────────────────────────────────────────────────────┘");
        println!();
        println!("┌─ LIFETIME ───────────────────────────────────────────────────────┐");
        println!("│ Churned:            {} bytes ({:.1}%)", self.bytes_churned_sum, self.churn_ratio() * 100.0);
        println!("│ Live At Frame End:  {} bytes over {} frames", self.still_live_bytes_sum, self.frames_with_live_allocations);
        println!("│ Spilled Events:     {}", self.spilled_events_sum);
        println!("│ Slowest Frame:      {:.3} ms", self.max_frame_time.as_secs_f64() * 1000.0);
        println!("└──────────────────────────────────────────────────────────────────┘");
    }
}

impl Default for MemoryStatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
