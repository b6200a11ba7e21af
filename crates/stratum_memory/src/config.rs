//! # Memory Configuration
//!
//! Region sizes per build profile, read once at startup from TOML.
//!
//! ```toml
//! [development.persistent]
//! frame_heap_size = 1024          # KB
//! tagged_heap_block_size = 256    # KB
//! tagged_heap_block_count = 8
//! scratch_heap_size = 512         # KB
//!
//! # ... development.staging, development.debug,
//! #     shipping.persistent, shipping.staging, shipping.debug
//!
//! [tracker]                       # optional
//! enabled = true
//! event_capacity = 65536
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};
use crate::region::MemoryRequirements;
use crate::size::MemorySize;

/// Which set of region sizes to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildProfile {
    /// Generous sizes, debug region populated.
    Development,
    /// Tight sizes, debug region usually empty.
    Shipping,
}

impl BuildProfile {
    /// `Development` when debug assertions are on, `Shipping` otherwise.
    #[must_use]
    pub const fn active() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Shipping
        }
    }

    /// Lowercase name as used in the config file.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Shipping => "shipping",
        }
    }
}

/// Sizes for one region. Byte sizes are in decimal kilobytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Frame (linear) heap size in KB.
    pub frame_heap_size: u64,
    /// Size of each tagged block in KB.
    pub tagged_heap_block_size: u64,
    /// Number of tagged blocks.
    pub tagged_heap_block_count: u64,
    /// Scratch (circular) heap size in KB.
    pub scratch_heap_size: u64,
}

impl RegionConfig {
    const fn new(frame_kb: u64, block_kb: u64, block_count: u64, scratch_kb: u64) -> Self {
        Self {
            frame_heap_size: frame_kb,
            tagged_heap_block_size: block_kb,
            tagged_heap_block_count: block_count,
            scratch_heap_size: scratch_kb,
        }
    }

    /// Converts the KB counts into byte sizes.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] if a size does not fit in 64 bits or
    /// the region as a whole does not fit in `usize`.
    pub fn requirements(&self) -> MemoryResult<MemoryRequirements> {
        let requirements = MemoryRequirements {
            frame_heap_size: kilobytes("frame_heap_size", self.frame_heap_size)?,
            tagged_block_size: kilobytes("tagged_heap_block_size", self.tagged_heap_block_size)?,
            tagged_block_count: usize::try_from(self.tagged_heap_block_count).map_err(|_| {
                MemoryError::InvalidConfig(format!(
                    "tagged_heap_block_count {} is too large",
                    self.tagged_heap_block_count
                ))
            })?,
            scratch_heap_size: kilobytes("scratch_heap_size", self.scratch_heap_size)?,
        };
        requirements
            .checked_total_memory()
            .and_then(|total| total.to_usize().ok())
            .ok_or_else(|| MemoryError::InvalidConfig("region does not fit in memory".into()))?;
        Ok(requirements)
    }
}

fn kilobytes(field: &str, kb: u64) -> MemoryResult<MemorySize> {
    i64::try_from(kb)
        .ok()
        .and_then(|kb| kb.checked_mul(1000))
        .map(MemorySize::bytes)
        .ok_or_else(|| MemoryError::InvalidConfig(format!("{field} = {kb} KB is too large")))
}

/// Sizes for the three regions of one build profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Long-lived engine state.
    pub persistent: RegionConfig,
    /// Cross-frame scratch (the transient region).
    pub staging: RegionConfig,
    /// Diagnostics.
    pub debug: RegionConfig,
}

/// Allocation tracker settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Whether heaps report events from the start.
    pub enabled: bool,
    /// Events buffered between tracker queries. A heap that finds the
    /// channel full drains it into the tracker itself.
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            event_capacity: 65_536,
        }
    }
}

/// Full memory configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Sizes used by development builds.
    pub development: ProfileConfig,
    /// Sizes used by shipping builds.
    pub shipping: ProfileConfig,
    /// Tracker settings.
    #[serde(default)]
    pub tracker: TrackerConfig,
}

impl MemoryConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] on malformed input.
    pub fn from_toml_str(content: &str) -> MemoryResult<Self> {
        toml::from_str(content).map_err(|err| MemoryError::InvalidConfig(err.to_string()))
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] if the file is missing, unreadable or
    /// malformed.
    pub fn load(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| MemoryError::InvalidConfig(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Serializes the configuration back to TOML.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] if serialization fails.
    pub fn to_toml_string(&self) -> MemoryResult<String> {
        toml::to_string(self).map_err(|err| MemoryError::InvalidConfig(err.to_string()))
    }

    /// Region sizes for `profile`.
    #[must_use]
    pub const fn profile(&self, profile: BuildProfile) -> &ProfileConfig {
        match profile {
            BuildProfile::Development => &self.development,
            BuildProfile::Shipping => &self.shipping,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            development: ProfileConfig {
                persistent: RegionConfig::new(1024, 256, 8, 512),
                staging: RegionConfig::new(2048, 512, 4, 1024),
                debug: RegionConfig::new(256, 64, 4, 256),
            },
            shipping: ProfileConfig {
                persistent: RegionConfig::new(1024, 256, 8, 512),
                staging: RegionConfig::new(2048, 512, 4, 1024),
                debug: RegionConfig::default(),
            },
            tracker: TrackerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[development.persistent]
frame_heap_size = 4
tagged_heap_block_size = 2
tagged_heap_block_count = 3
scratch_heap_size = 1

[development.staging]
frame_heap_size = 8
tagged_heap_block_size = 4
tagged_heap_block_count = 2
scratch_heap_size = 2

[development.debug]
frame_heap_size = 1
tagged_heap_block_size = 1
tagged_heap_block_count = 1
scratch_heap_size = 1

[shipping.persistent]
frame_heap_size = 4
tagged_heap_block_size = 2
tagged_heap_block_count = 3
scratch_heap_size = 1

[shipping.staging]
frame_heap_size = 8
tagged_heap_block_size = 4
tagged_heap_block_count = 2
scratch_heap_size = 2

[shipping.debug]
frame_heap_size = 0
tagged_heap_block_size = 0
tagged_heap_block_count = 0
scratch_heap_size = 0
"#;

    #[test]
    fn test_parse_sample() {
        let config = MemoryConfig::from_toml_str(SAMPLE).unwrap();
        let persistent = config.profile(BuildProfile::Development).persistent;

        assert_eq!(persistent.frame_heap_size, 4);
        assert_eq!(config.shipping.debug, RegionConfig::default());
        assert_eq!(config.tracker, TrackerConfig::default());
    }

    #[test]
    fn test_requirements_in_decimal_kb() {
        let config = MemoryConfig::from_toml_str(SAMPLE).unwrap();
        let requirements = config.development.persistent.requirements().unwrap();

        assert_eq!(requirements.frame_heap_size.size_in_bytes(), 4000);
        assert_eq!(requirements.tagged_block_size.size_in_bytes(), 2000);
        assert_eq!(requirements.tagged_block_count, 3);
        assert_eq!(requirements.total_memory().size_in_bytes(), 4000 + 6000 + 1000);
    }

    #[test]
    fn test_missing_section_is_invalid() {
        let err = MemoryConfig::from_toml_str("[development.persistent]\n").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }

    #[test]
    fn test_oversized_region_is_invalid() {
        let region = RegionConfig::new(u64::MAX, 0, 0, 0);
        assert!(matches!(region.requirements(), Err(MemoryError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let err = MemoryConfig::load("/nonexistent/stratum-memory.toml").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let config = MemoryConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(MemoryConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_active_profile_follows_debug_assertions() {
        let expected = if cfg!(debug_assertions) { "development" } else { "shipping" };
        assert_eq!(BuildProfile::active().name(), expected);
    }
}
