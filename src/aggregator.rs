/// Aggregator: drains the ingestion channel into the device table.

use crate::ingest::IngestChannel;
use crate::scanner::RawObservation;
use crate::table::{DeviceRecord, DeviceTable, InsertError, SharedTable};

/// What applying one observation did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
}

/// Fold one observation into the table. The caller holds the lock.
///
/// A full table on first sighting leaves the table unchanged and the
/// observation is lost.
pub fn apply<const N: usize>(
    table: &mut DeviceTable<N>,
    obs: &RawObservation,
    now: u64,
) -> Result<Applied, InsertError> {
    match table.get_mut(&obs.mac) {
        Some(record) => {
            record.rssi = obs.rssi;
            record.last_seen = record.last_seen.max(now);
            record.kind = record.kind.escalate(obs.kind);
            Ok(Applied::Updated)
        }
        None => {
            table.insert(DeviceRecord {
                mac: obs.mac,
                rssi: obs.rssi,
                last_seen: now,
                kind: obs.kind,
            })?;
            Ok(Applied::Inserted)
        }
    }
}

/// Aggregator loop. Waits on the channel with the lock released, then
/// takes the lock for exactly one update.
///
/// `now` returns milliseconds since boot.
pub async fn run<const Q: usize, const N: usize>(
    ingest: &IngestChannel<Q>,
    table: &SharedTable<N>,
    now: impl Fn() -> u64,
) {
    log::info!("Aggregator started ({} slots, {} devices max)", Q, N);

    loop {
        let obs = ingest.take().await;
        match table.lock(|t| apply(t, &obs, now())) {
            Ok(_) => {}
            Err(InsertError::Full) => log::debug!("Device table full, observation discarded"),
            Err(e) => log::warn!("Observation discarded: {}", e),
        }
    }
}
