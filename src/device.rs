/// Device identity and classification.
///
/// A device's kind is a four-state machine: it only ever moves up the
/// priority order `Deauth > Router > Station > Unknown`, and once a device
/// has been seen sending deauthentication frames it stays `Deauth` until
/// the table is cleared.

use serde::Serialize;

use crate::protocol::MacString;

/// 6-byte 802.11 hardware address
pub type MacAddr = [u8; 6];

/// Coarse device classification derived from the frames it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceKind {
    #[serde(rename = "Unknown")]
    Unknown,
    #[serde(rename = "STATION")]
    Station,
    #[serde(rename = "ROUTER")]
    Router,
    #[serde(rename = "DEAUTH")]
    Deauth,
}

impl DeviceKind {
    /// Wire label, as used in the `type` field of a snapshot entry.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Unknown => "Unknown",
            DeviceKind::Station => "STATION",
            DeviceKind::Router => "ROUTER",
            DeviceKind::Deauth => "DEAUTH",
        }
    }

    /// Next classification for a known device after observing `seen`.
    pub fn escalate(self, seen: DeviceKind) -> DeviceKind {
        match (self, seen) {
            (_, DeviceKind::Deauth) => DeviceKind::Deauth,
            (DeviceKind::Deauth, _) => DeviceKind::Deauth,
            (DeviceKind::Unknown, seen) | (_, seen @ DeviceKind::Router) => seen,
            (current, _) => current,
        }
    }
}

/// Format a 6-byte MAC address into "aa:bb:cc:dd:ee:ff"
pub fn format_mac(mac: &MacAddr, buf: &mut MacString) {
    use core::fmt::Write;
    buf.clear();
    let _ = write!(
        buf,
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    use DeviceKind::*;

    const ALL: [DeviceKind; 4] = [Unknown, Station, Router, Deauth];

    fn rank(kind: DeviceKind) -> u8 {
        match kind {
            Unknown => 0,
            Station => 1,
            Router => 2,
            Deauth => 3,
        }
    }

    // ── Transition table ────────────────────────────────────────────

    #[test]
    fn deauth_always_wins() {
        for current in ALL {
            assert_eq!(current.escalate(Deauth), Deauth);
        }
    }

    #[test]
    fn deauth_is_sticky() {
        for seen in ALL {
            assert_eq!(Deauth.escalate(seen), Deauth);
        }
    }

    #[test]
    fn unknown_adopts_anything() {
        for seen in ALL {
            assert_eq!(Unknown.escalate(seen), seen);
        }
    }

    #[test]
    fn router_overrides_station() {
        assert_eq!(Station.escalate(Router), Router);
    }

    #[test]
    fn no_downgrade() {
        assert_eq!(Router.escalate(Station), Router);
        assert_eq!(Router.escalate(Unknown), Router);
        assert_eq!(Station.escalate(Unknown), Station);
        assert_eq!(Station.escalate(Station), Station);
    }

    // ── Order independence ──────────────────────────────────────────

    /// Every sequence of up to four observations ends at the highest
    /// ranked kind it contains.
    #[test]
    fn final_kind_is_maximum_for_all_sequences() {
        for len in 1..=4u32 {
            for code in 0..4u32.pow(len) {
                let mut seq = heapless::Vec::<DeviceKind, 4>::new();
                let mut c = code;
                for _ in 0..len {
                    let _ = seq.push(ALL[(c % 4) as usize]);
                    c /= 4;
                }

                let first = seq[0];
                let result = seq[1..].iter().fold(first, |k, &seen| k.escalate(seen));
                let expected = seq.iter().copied().max_by_key(|&k| rank(k)).unwrap();
                assert_eq!(result, expected, "sequence {seq:?}");
            }
        }
    }

    // ── Formatting ──────────────────────────────────────────────────

    #[test]
    fn wire_labels() {
        assert_eq!(Unknown.as_str(), "Unknown");
        assert_eq!(Station.as_str(), "STATION");
        assert_eq!(Router.as_str(), "ROUTER");
        assert_eq!(Deauth.as_str(), "DEAUTH");
    }

    #[test]
    fn format_mac_is_lowercase_colon_separated() {
        let mut s = MacString::new();
        format_mac(&[0xAA, 0xBB, 0xCC, 0x0D, 0xEE, 0xFF], &mut s);
        assert_eq!(s.as_str(), "aa:bb:cc:0d:ee:ff");
    }

    #[test]
    fn format_mac_reuses_buffer() {
        let mut s = MacString::new();
        format_mac(&[1, 2, 3, 4, 5, 6], &mut s);
        format_mac(&[0; 6], &mut s);
        assert_eq!(s.as_str(), "00:00:00:00:00:00");
    }
}
