/// Runtime configuration handed to each task at startup.

use crate::defaults;

/// Accepted range and boot value for the channel dwell time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopBounds {
    pub default_ms: u32,
    pub min_ms: u32,
    pub max_ms: u32,
}

impl HopBounds {
    pub const fn new() -> Self {
        Self {
            default_ms: defaults::HOP_DEFAULT_MS,
            min_ms: defaults::HOP_MIN_MS,
            max_ms: defaults::HOP_MAX_MS,
        }
    }

    pub fn contains(&self, ms: u32) -> bool {
        (self.min_ms..=self.max_ms).contains(&ms)
    }
}

impl Default for HopBounds {
    fn default() -> Self {
        Self::new()
    }
}

/// Periods and thresholds for the aggregator/exporter pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CensusConfig {
    /// How often a snapshot is exported (ms)
    pub export_period_ms: u32,
    /// Maximum idle age before a record is purged at export time (ms)
    pub purge_after_ms: u32,
    /// How often the liveness marker is emitted (ms)
    pub heartbeat_period_ms: u32,
    pub hop: HopBounds,
}

impl CensusConfig {
    pub const fn new() -> Self {
        Self {
            export_period_ms: defaults::EXPORT_PERIOD_MS,
            purge_after_ms: defaults::PURGE_AFTER_MS,
            heartbeat_period_ms: defaults::HEARTBEAT_PERIOD_MS,
            hop: HopBounds::new(),
        }
    }
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = CensusConfig::new();
        assert!(config.heartbeat_period_ms > config.export_period_ms);
        assert!(config.purge_after_ms > config.export_period_ms);
        assert!(config.hop.contains(config.hop.default_ms));
    }

    #[test]
    fn hop_bounds_are_inclusive() {
        let bounds = HopBounds::new();
        assert!(bounds.contains(bounds.min_ms));
        assert!(bounds.contains(bounds.max_ms));
        assert!(!bounds.contains(bounds.min_ms - 1));
        assert!(!bounds.contains(bounds.max_ms + 1));
    }
}
