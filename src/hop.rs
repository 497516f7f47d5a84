/// Channel scheduler state.
///
/// The hop task itself lives in the firmware (it needs the radio driver and
/// a timer); this module holds the cyclic channel counter and the dwell
/// time the task reads on every tick.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::comm::CommandError;
use crate::config::HopBounds;

/// Dwell time per channel, adjustable at runtime within fixed bounds.
pub struct HopPeriod {
    ms: AtomicU32,
    bounds: HopBounds,
}

impl HopPeriod {
    pub const fn new(bounds: HopBounds) -> Self {
        Self {
            ms: AtomicU32::new(bounds.default_ms),
            bounds,
        }
    }

    pub fn get(&self) -> u32 {
        self.ms.load(Ordering::Relaxed)
    }

    /// Set a new dwell time. Values outside the bounds are refused and
    /// leave the current period untouched.
    pub fn set(&self, ms: u32) -> Result<(), CommandError> {
        if !self.bounds.contains(ms) {
            return Err(CommandError::OutOfRange {
                min: self.bounds.min_ms,
                max: self.bounds.max_ms,
            });
        }
        self.ms.store(ms, Ordering::Relaxed);
        Ok(())
    }
}

/// Cycles through a fixed channel list.
pub struct ChannelHopper {
    channels: &'static [u8],
    next: usize,
}

impl ChannelHopper {
    pub const fn new(channels: &'static [u8]) -> Self {
        Self { channels, next: 0 }
    }

    /// Channel to tune to on this tick, wrapping after the last one.
    pub fn advance(&mut self) -> Option<u8> {
        let ch = *self.channels.get(self.next)?;
        self.next = (self.next + 1) % self.channels.len();
        Some(ch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::WIFI_CHANNELS;

    #[test]
    fn hopper_cycles_all_channels() {
        let mut hopper = ChannelHopper::new(WIFI_CHANNELS);
        for round in 0..3 {
            for &expected in WIFI_CHANNELS {
                assert_eq!(hopper.advance(), Some(expected), "round {round}");
            }
        }
    }

    #[test]
    fn hopper_with_no_channels_yields_nothing() {
        let mut hopper = ChannelHopper::new(&[]);
        assert_eq!(hopper.advance(), None);
    }

    #[test]
    fn period_starts_at_default() {
        let bounds = HopBounds::new();
        assert_eq!(HopPeriod::new(bounds).get(), bounds.default_ms);
    }

    #[test]
    fn period_rejects_out_of_range() {
        let bounds = HopBounds {
            default_ms: 100,
            min_ms: 50,
            max_ms: 1000,
        };
        let hop = HopPeriod::new(bounds);
        assert!(hop.set(49).is_err());
        assert!(hop.set(1001).is_err());
        assert_eq!(hop.get(), 100);
        assert!(hop.set(50).is_ok());
        assert_eq!(hop.get(), 50);
        assert!(hop.set(1000).is_ok());
        assert_eq!(hop.get(), 1000);
    }
}
