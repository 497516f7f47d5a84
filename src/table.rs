/// Device table: one record per hardware address seen inside the purge window.
///
/// `DeviceTable` is plain fixed-capacity storage with no locking of its own.
/// The aggregator and exporter share it through [`SharedTable`], whose only
/// access path is a closure run while the lock is held.

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::device::{DeviceKind, MacAddr};

/// Aggregated state for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRecord {
    pub mac: MacAddr,
    /// Signal strength of the latest observation (dBm)
    pub rssi: i8,
    /// Milliseconds since boot of the latest observation
    pub last_seen: u64,
    pub kind: DeviceKind,
}

impl DeviceRecord {
    /// Idle time at `now`, zero if `now` predates the last sighting
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_seen)
    }
}

/// Why an insert was refused. The table is unchanged in both cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// No free slot for a new address
    Full,
    /// The address already has a record
    Duplicate,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::Full => f.write_str("device table full"),
            InsertError::Duplicate => f.write_str("address already tracked"),
        }
    }
}

/// Fixed-capacity keyed store, insertion ordered.
pub struct DeviceTable<const N: usize> {
    records: Vec<DeviceRecord, N>,
}

impl<const N: usize> DeviceTable<N> {
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn get(&self, mac: &MacAddr) -> Option<&DeviceRecord> {
        self.records.iter().find(|r| r.mac == *mac)
    }

    pub fn get_mut(&mut self, mac: &MacAddr) -> Option<&mut DeviceRecord> {
        self.records.iter_mut().find(|r| r.mac == *mac)
    }

    /// Add a record for an address not yet in the table.
    ///
    /// Callers look the address up first; a duplicate key is a logic
    /// error and is refused without touching the existing record.
    pub fn insert(&mut self, record: DeviceRecord) -> Result<(), InsertError> {
        if self.get(&record.mac).is_some() {
            return Err(InsertError::Duplicate);
        }
        self.records.push(record).map_err(|_| InsertError::Full)
    }

    /// Visit every record once, in order, removing those for which `keep`
    /// returns false. Removal of the visited record does not disturb the
    /// rest of the pass. One compacting sweep, O(n).
    pub fn sweep(&mut self, mut keep: impl FnMut(&DeviceRecord) -> bool) {
        let len = self.records.len();
        let mut write = 0;
        for read in 0..len {
            if keep(&self.records[read]) {
                if write != read {
                    self.records[write] = self.records[read];
                }
                write += 1;
            }
        }
        self.records.truncate(write);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for DeviceTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Device table behind the single lock shared by aggregator, exporter and
/// the `CLEAR` command. Never hold the lock across an `.await`.
pub struct SharedTable<const N: usize> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<DeviceTable<N>>>,
}

impl<const N: usize> SharedTable<N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(DeviceTable::new())),
        }
    }

    /// Run `f` with exclusive access to the table.
    pub fn lock<R>(&self, f: impl FnOnce(&mut DeviceTable<N>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

impl<const N: usize> Default for SharedTable<N> {
    fn default() -> Self {
        Self::new()
    }
}
