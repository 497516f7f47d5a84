/// Ingestion channel between the capture callback and the aggregator.
///
/// Fixed capacity, no allocation. The producer side never waits: when the
/// channel is full the observation is dropped and only a counter records it.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::scanner::RawObservation;

pub struct IngestChannel<const N: usize> {
    channel: Channel<CriticalSectionRawMutex, RawObservation, N>,
    dropped: AtomicU32,
}

impl<const N: usize> IngestChannel<N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Non-blocking enqueue. Safe from ISR context.
    pub fn offer(&self, obs: RawObservation) {
        if self.channel.try_send(obs).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Wait for the next observation. No timeout.
    pub async fn take(&self) -> RawObservation {
        self.channel.receive().await
    }

    pub fn try_take(&self) -> Option<RawObservation> {
        self.channel.try_receive().ok()
    }

    /// Observations dropped on overflow since boot
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for IngestChannel<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;

    use std::thread;
    use std::time::Duration;

    fn obs(n: u8) -> RawObservation {
        RawObservation {
            mac: [0, 0, 0, 0, 0, n],
            rssi: -((n % 100) as i8),
            kind: DeviceKind::Station,
        }
    }

    #[test]
    fn fifo_order() {
        let ch: IngestChannel<4> = IngestChannel::new();
        for n in 1..=3 {
            ch.offer(obs(n));
        }
        for n in 1..=3 {
            assert_eq!(ch.try_take(), Some(obs(n)));
        }
        assert!(ch.is_empty());
    }

    #[test]
    fn overflow_drops_newest_without_blocking() {
        let ch: IngestChannel<4> = IngestChannel::new();
        for n in 1..=4 {
            ch.offer(obs(n));
        }
        assert_eq!(ch.len(), ch.capacity());

        ch.offer(obs(5));
        assert_eq!(ch.len(), 4);
        assert_eq!(ch.dropped(), 1);

        // Queued items are untouched and still in capture order
        for n in 1..=4 {
            assert_eq!(ch.try_take(), Some(obs(n)));
        }
        assert_eq!(ch.try_take(), None);
    }

    #[test]
    fn flood_only_counts() {
        let ch: IngestChannel<8> = IngestChannel::new();
        for n in 0..=255u8 {
            ch.offer(obs(n));
        }
        assert_eq!(ch.len(), 8);
        assert_eq!(ch.dropped(), 256 - 8);
    }

    #[test]
    fn take_waits_for_producer() {
        static CH: IngestChannel<2> = IngestChannel::new();

        let producer = thread::spawn(|| {
            thread::sleep(Duration::from_millis(20));
            CH.offer(obs(7));
        });

        let got = embassy_futures::block_on(CH.take());
        assert_eq!(got, obs(7));
        producer.join().unwrap();
    }
}
