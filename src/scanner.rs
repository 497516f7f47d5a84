/// WiFi frame classifier and capture-side producer.
///
/// The radio driver hands every promiscuous-mode frame to the capture
/// callback. The callback only classifies the frame from its frame-control
/// byte and offers the result to the ingestion channel; it never blocks or
/// allocates. Classification is a coarse heuristic, not a protocol decode.

use crate::device::{DeviceKind, MacAddr};
use crate::ingest::IngestChannel;

/// WiFi channels to scan (2.4 GHz only: ESP32/ESP32-S3 promiscuous mode is 2.4 GHz)
pub const WIFI_CHANNELS: &[u8] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13];

/// Frame-control byte of a management beacon (type 0, subtype 8)
const FC_BEACON: u8 = 0x80;
/// Frame-control byte of a management probe request (type 0, subtype 4)
const FC_PROBE_REQUEST: u8 = 0x40;
/// Frame-control byte of a management deauthentication (type 0, subtype 12)
const FC_DEAUTH: u8 = 0xC0;
/// Frame type field value for data frames
const TYPE_DATA: u8 = 2;

/// Address 2: transmitter address in management frames
const TRANSMITTER_ADDR_OFFSET: usize = 10;

/// Address used for data and unrecognised frames. Assumes a 3-address,
/// non-QoS data frame sent towards the DS, where Address 2 is the source.
const FALLBACK_ADDR_OFFSET: usize = 10;

/// Shortest frame the classifier accepts: frame control (2) + duration (2)
/// + Address 1 (6) + Address 2 (6)
pub const MIN_FRAME_LEN: usize = FALLBACK_ADDR_OFFSET + 6;

/// One classified capture, handed from the capture callback to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawObservation {
    pub mac: MacAddr,
    pub rssi: i8,
    pub kind: DeviceKind,
}

/// Classify a frame by its frame-control byte.
///
/// Returns the device kind and the offset of the address that identifies
/// the sending device. First match wins.
pub fn classify(frame_control: u8) -> (DeviceKind, usize) {
    match frame_control {
        FC_BEACON => (DeviceKind::Router, TRANSMITTER_ADDR_OFFSET),
        FC_PROBE_REQUEST => (DeviceKind::Station, TRANSMITTER_ADDR_OFFSET),
        FC_DEAUTH => (DeviceKind::Deauth, TRANSMITTER_ADDR_OFFSET),
        fc if (fc >> 2) & 0x3 == TYPE_DATA => (DeviceKind::Station, FALLBACK_ADDR_OFFSET),
        _ => (DeviceKind::Unknown, FALLBACK_ADDR_OFFSET),
    }
}

/// Parse a raw 802.11 frame into an observation.
///
/// Frames too short to hold the identifying address are rejected before
/// classification. Safe to call from ISR context (no allocation, no blocking).
pub fn parse_wifi_frame(frame: &[u8], rssi: i8) -> Option<RawObservation> {
    if frame.len() < MIN_FRAME_LEN {
        return None;
    }
    let (kind, offset) = classify(frame[0]);
    let mac: MacAddr = frame.get(offset..offset + 6)?.try_into().ok()?;
    Some(RawObservation { mac, rssi, kind })
}

/// Capture-context producer: classify the frame and offer it to the
/// ingestion channel. Undersized frames and overflow are dropped silently.
pub fn capture_frame<const N: usize>(ingest: &IngestChannel<N>, frame: &[u8], rssi: i8) {
    if let Some(obs) = parse_wifi_frame(frame, rssi) {
        ingest.offer(obs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a 24-byte header with the given frame-control byte,
    /// Address 2 = `ta` and Address 3 = `a3`.
    fn header(fc: u8, ta: MacAddr, a3: MacAddr) -> [u8; 24] {
        let mut f = [0u8; 24];
        f[0] = fc;
        f[4..10].copy_from_slice(&[0xFF; 6]);
        f[10..16].copy_from_slice(&ta);
        f[16..22].copy_from_slice(&a3);
        f
    }

    const TA: MacAddr = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
    const A3: MacAddr = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

    // ── Decision list ───────────────────────────────────────────────

    #[test]
    fn beacon_is_router() {
        let obs = parse_wifi_frame(&header(0x80, TA, A3), -40).unwrap();
        assert_eq!(obs.kind, DeviceKind::Router);
        assert_eq!(obs.mac, TA);
        assert_eq!(obs.rssi, -40);
    }

    #[test]
    fn management_subtype_4_is_station() {
        let obs = parse_wifi_frame(&header(0x40, TA, A3), -70).unwrap();
        assert_eq!(obs.kind, DeviceKind::Station);
        assert_eq!(obs.mac, TA);
    }

    #[test]
    fn deauth_is_deauth() {
        let obs = parse_wifi_frame(&header(0xC0, TA, A3), -20).unwrap();
        assert_eq!(obs.kind, DeviceKind::Deauth);
        assert_eq!(obs.mac, TA);
    }

    #[test]
    fn data_frames_are_stations() {
        // Plain data (0x08), QoS data (0x88), null data (0x48)
        for fc in [0x08, 0x88, 0x48] {
            let obs = parse_wifi_frame(&header(fc, TA, A3), -60).unwrap();
            assert_eq!(obs.kind, DeviceKind::Station, "fc {fc:#04x}");
            assert_eq!(obs.mac, TA);
        }
    }

    #[test]
    fn other_frames_are_unknown() {
        // Probe response, control ACK, authentication
        for fc in [0x50, 0xD4, 0xB0] {
            let obs = parse_wifi_frame(&header(fc, TA, A3), -60).unwrap();
            assert_eq!(obs.kind, DeviceKind::Unknown, "fc {fc:#04x}");
            assert_eq!(obs.mac, TA);
        }
    }

    #[test]
    fn flag_bits_in_first_byte_change_match() {
        // Beacon with protocol version bit set no longer matches the
        // beacon pattern and falls to the unknown path.
        assert_eq!(classify(0x81).0, DeviceKind::Unknown);
    }

    // ── Length guard ────────────────────────────────────────────────

    #[test]
    fn rejects_short_frames() {
        let f = header(0x80, TA, A3);
        assert!(parse_wifi_frame(&f[..MIN_FRAME_LEN - 1], -40).is_none());
        assert!(parse_wifi_frame(&[], -40).is_none());
    }

    #[test]
    fn accepts_minimum_length() {
        let f = header(0x80, TA, A3);
        let obs = parse_wifi_frame(&f[..MIN_FRAME_LEN], -40).unwrap();
        assert_eq!(obs.mac, TA);
    }

    // ── Producer ────────────────────────────────────────────────────

    #[test]
    fn capture_enqueues_classified_frame() {
        let ingest: IngestChannel<4> = IngestChannel::new();
        capture_frame(&ingest, &header(0x80, TA, A3), -33);
        let obs = ingest.try_take().unwrap();
        assert_eq!(obs.kind, DeviceKind::Router);
        assert_eq!(obs.rssi, -33);
    }

    #[test]
    fn capture_discards_short_frame_before_channel() {
        let ingest: IngestChannel<4> = IngestChannel::new();
        capture_frame(&ingest, &[0x80; 8], -33);
        assert!(ingest.try_take().is_none());
        assert_eq!(ingest.dropped(), 0);
    }

    #[test]
    fn wifi_channels_cover_2g4() {
        assert_eq!(WIFI_CHANNELS.first(), Some(&1));
        assert_eq!(WIFI_CHANNELS.last(), Some(&13));
    }
}
