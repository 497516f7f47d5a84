/// Exporter: periodic snapshot and purge of the device table.
///
/// One pass under the lock copies every record into a fixed-capacity
/// snapshot and removes the records that have outlived the purge
/// threshold, after they have been copied. A stale device is therefore
/// reported exactly once more before it disappears. Snapshot entries are
/// plain data; address formatting and JSON encoding run on the copy, after
/// the lock is released.

use heapless::Vec;

use crate::comm::serialize_message;
use crate::protocol::{DeviceEntry, SnapshotMessage};
use crate::table::{DeviceRecord, DeviceTable, SharedTable};

/// Point-in-time copy of the table, in table order
pub type Snapshot<const N: usize> = Vec<DeviceEntry, N>;

fn entry(record: &DeviceRecord, now: u64) -> DeviceEntry {
    DeviceEntry {
        mac: record.mac,
        rssi: record.rssi,
        kind: record.kind,
        seen_ms: u32::try_from(record.age(now)).unwrap_or(u32::MAX),
    }
}

/// Copy every record into `out` and purge those idle for longer than
/// `purge_after_ms`. The caller holds the lock. Returns the number of
/// records purged.
pub fn snapshot_and_purge<const N: usize>(
    table: &mut DeviceTable<N>,
    now: u64,
    purge_after_ms: u32,
    out: &mut Snapshot<N>,
) -> usize {
    out.clear();
    let before = table.len();
    table.sweep(|record| {
        // Capacity equals the table's, so this push always fits
        let _ = out.push(entry(record, now));
        record.age(now) <= purge_after_ms as u64
    });
    before - table.len()
}

/// One export cycle against the shared table, filling `out`.
///
/// `now` is read inside the lock so no record can be newer than the
/// export timestamp.
pub fn export_pass<const N: usize>(
    table: &SharedTable<N>,
    now: impl FnOnce() -> u64,
    purge_after_ms: u32,
    out: &mut Snapshot<N>,
) {
    let (purged, remaining) = table.lock(|t| {
        let purged = snapshot_and_purge(t, now(), purge_after_ms, out);
        (purged, t.len())
    });
    if purged > 0 {
        log::debug!("Purged {} stale devices, {} remain", purged, remaining);
    }
}

/// Encode a snapshot as one NDJSON line. Returns the line length.
pub fn serialize_snapshot(devices: &[DeviceEntry], buf: &mut [u8]) -> Option<usize> {
    serialize_message(&SnapshotMessage { devices }, buf)
}
