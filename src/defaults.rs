/// Compiled-in defaults for the census pipeline.
///
/// Every task receives these through [`crate::config::CensusConfig`] at
/// startup; nothing in the core logic reads them directly.

/// Snapshot export period
pub const EXPORT_PERIOD_MS: u32 = 500;

/// Records idle for longer than this are reported once more and then purged
pub const PURGE_AFTER_MS: u32 = 10_000;

/// Liveness marker period. Longer than the export period so a quiet
/// table and a dead link stay distinguishable.
pub const HEARTBEAT_PERIOD_MS: u32 = 5_000;

/// Ingestion channel slots between the capture callback and the aggregator
pub const INGEST_CAPACITY: usize = 32;

/// Default dwell time per WiFi channel.
/// Beacons go out every ~100ms, so 200ms catches at least one per AP.
pub const HOP_DEFAULT_MS: u32 = 200;

/// Lowest dwell time accepted by `HOP_SPEED`
pub const HOP_MIN_MS: u32 = 50;

/// Highest dwell time accepted by `HOP_SPEED`
pub const HOP_MAX_MS: u32 = 5_000;
