//! # STRATUM
//!
//! Host side of the memory subsystem: the frame loop that owns the
//! [`MemoryManager`](stratum_memory::MemoryManager) and turns each frame's
//! tracker report into running statistics.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratum::FrameLoop;
//! use stratum_memory::{BuildProfile, MemoryConfig, MemoryManager};
//!
//! let manager = MemoryManager::from_config(&MemoryConfig::default(), BuildProfile::active())?;
//! let mut frames = FrameLoop::new(manager);
//!
//! let ctx = frames.begin_frame();
//! // ... allocate through adapters built from ctx.memory ...
//! let report = frames.end_frame(ctx);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod frame_loop;

/// Re-export of the memory crate.
pub use stratum_memory as memory;

pub use frame_loop::{FrameContext, FrameLoop, MemoryStatsAccumulator, MAX_FRAME_TIME};
