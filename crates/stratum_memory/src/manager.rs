//! # Memory Manager
//!
//! Owns the persistent, transient and debug regions and drives the frame
//! lifecycle. There is no global instance: construct one at startup and
//! hand it (or a [`SharedManager`](crate::adapter::SharedManager)) to the
//! subsystems that allocate.
//!
//! ```rust,ignore
//! let config = MemoryConfig::load("memory.toml")?;
//! let mut memory = MemoryManager::from_config(&config, BuildProfile::active())?;
//!
//! loop {
//!     memory.start_frame(frame);
//!     // ... allocate from memory.get_transient_region_mut() ...
//!     let report = memory.end_frame();
//! }
//! ```

use std::sync::Arc;

use crate::config::{BuildProfile, MemoryConfig, ProfileConfig};
use crate::error::MemoryResult;
use crate::region::{MemoryRegion, RegionKind};
use crate::size::MemorySize;
use crate::tracker::{AllocationTracker, FrameReport};

/// Current and total bytes of one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionUsage {
    /// The region.
    pub kind: RegionKind,
    /// Bytes in use.
    pub current: MemorySize,
    /// Capacity.
    pub total: MemorySize,
    /// Whether the region was freed.
    pub released: bool,
}

/// Snapshot of every region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryUsage {
    /// One entry per region, in [`RegionKind::ALL`] order.
    pub regions: [RegionUsage; 3],
}

impl MemoryUsage {
    /// Bytes in use across every region.
    #[must_use]
    pub fn current(&self) -> MemorySize {
        self.regions.iter().map(|region| region.current).sum()
    }

    /// Capacity across every region.
    #[must_use]
    pub fn total(&self) -> MemorySize {
        self.regions.iter().map(|region| region.total).sum()
    }
}

/// The three regions plus the allocation tracker they report to.
#[derive(Debug)]
pub struct MemoryManager {
    profile: BuildProfile,
    persistent: MemoryRegion,
    transient: MemoryRegion,
    debug: MemoryRegion,
    tracker: Arc<AllocationTracker>,
}

impl MemoryManager {
    /// Builds every region from `config`.
    ///
    /// Tracking is suspended while the regions are built.
    ///
    /// # Errors
    ///
    /// Fails if any region's sizes are invalid.
    pub fn new(
        profile: BuildProfile,
        config: &ProfileConfig,
        tracker: Arc<AllocationTracker>,
    ) -> MemoryResult<Self> {
        let was_enabled = tracker.is_enabled();
        tracker.set_enabled(false);

        let built = Self::build_regions(config, &tracker);
        tracker.set_enabled(was_enabled);
        let (persistent, transient, debug) = built?;

        let manager = Self {
            profile,
            persistent,
            transient,
            debug,
            tracker,
        };
        tracing::info!(
            profile = profile.name(),
            total = %manager.usage().total(),
            tracking = was_enabled,
            "memory manager initialized"
        );
        Ok(manager)
    }

    fn build_regions(
        config: &ProfileConfig,
        tracker: &AllocationTracker,
    ) -> MemoryResult<(MemoryRegion, MemoryRegion, MemoryRegion)> {
        let persistent = MemoryRegion::new(
            RegionKind::Persistent,
            config.persistent.requirements()?,
            Some(tracker.sink()),
        )?;
        let transient = MemoryRegion::new(
            RegionKind::Transient,
            config.staging.requirements()?,
            Some(tracker.sink()),
        )?;
        let debug = MemoryRegion::new(
            RegionKind::Debug,
            config.debug.requirements()?,
            Some(tracker.sink()),
        )?;
        Ok((persistent, transient, debug))
    }

    /// Builds the manager for `profile` with a fresh tracker.
    ///
    /// # Errors
    ///
    /// Fails if any region's sizes are invalid.
    pub fn from_config(config: &MemoryConfig, profile: BuildProfile) -> MemoryResult<Self> {
        let tracker = Arc::new(AllocationTracker::new(&config.tracker));
        Self::new(profile, config.profile(profile), tracker)
    }

    /// The profile the regions were sized for.
    #[inline]
    #[must_use]
    pub const fn profile(&self) -> BuildProfile {
        self.profile
    }

    /// The tracker every region reports to.
    #[inline]
    #[must_use]
    pub fn tracker(&self) -> &Arc<AllocationTracker> {
        &self.tracker
    }

    /// Long-lived engine state.
    #[inline]
    #[must_use]
    pub const fn get_persistent_region(&self) -> &MemoryRegion {
        &self.persistent
    }

    /// Long-lived engine state.
    #[inline]
    pub fn get_persistent_region_mut(&mut self) -> &mut MemoryRegion {
        &mut self.persistent
    }

    /// Cross-frame scratch.
    #[inline]
    #[must_use]
    pub const fn get_transient_region(&self) -> &MemoryRegion {
        &self.transient
    }

    /// Cross-frame scratch.
    #[inline]
    pub fn get_transient_region_mut(&mut self) -> &mut MemoryRegion {
        &mut self.transient
    }

    /// Diagnostics. May be zero-sized in shipping builds.
    #[inline]
    #[must_use]
    pub const fn get_debug_region(&self) -> &MemoryRegion {
        &self.debug
    }

    /// Diagnostics. May be zero-sized in shipping builds.
    #[inline]
    pub fn get_debug_region_mut(&mut self) -> &mut MemoryRegion {
        &mut self.debug
    }

    /// The region of `kind`.
    #[must_use]
    pub const fn region(&self, kind: RegionKind) -> &MemoryRegion {
        match kind {
            RegionKind::Persistent => &self.persistent,
            RegionKind::Transient => &self.transient,
            RegionKind::Debug => &self.debug,
        }
    }

    /// The region of `kind`.
    pub fn region_mut(&mut self, kind: RegionKind) -> &mut MemoryRegion {
        match kind {
            RegionKind::Persistent => &mut self.persistent,
            RegionKind::Transient => &mut self.transient,
            RegionKind::Debug => &mut self.debug,
        }
    }

    /// Releases the persistent region.
    pub fn free_persistent(&mut self) {
        self.persistent.free();
    }

    /// Releases the transient (staging) region.
    pub fn free_staging(&mut self) {
        self.transient.free();
    }

    /// Releases the debug region.
    pub fn free_debug(&mut self) {
        self.debug.free();
    }

    /// Attributes subsequent allocations to `frame`.
    pub fn start_frame(&self, frame: u64) {
        self.tracker.start_frame(frame);
    }

    /// Resets the frame heap of every live region, then closes the tracker
    /// frame. `None` if no frame was started.
    pub fn end_frame(&mut self) -> Option<FrameReport> {
        for kind in RegionKind::ALL {
            let region = self.region_mut(kind);
            if !region.is_released() {
                region.reset_frame();
            }
        }
        self.tracker.end_frame()
    }

    /// Current and total bytes of every region.
    #[must_use]
    pub fn usage(&self) -> MemoryUsage {
        MemoryUsage {
            regions: RegionKind::ALL.map(|kind| {
                let region = self.region(kind);
                RegionUsage {
                    kind,
                    current: region.current_memory(),
                    total: region.total_memory(),
                    released: region.is_released(),
                }
            }),
        }
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        self.free_persistent();
        self.free_staging();
        self.free_debug();
    }
}
