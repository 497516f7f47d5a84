/// JSON message protocol between the device and host consumers.
///
/// All messages are newline-delimited JSON (NDJSON), one object per line.
/// Uses `heapless` types for no_std/no-alloc operation.
use heapless::{String, Vec};
use serde::{Serialize, Serializer};

use crate::board;
use crate::device::{format_mac, DeviceKind, MacAddr};

/// Maximum length for MAC address strings ("aa:bb:cc:dd:ee:ff")
pub type MacString = String<18>;

/// Literal carried by the liveness marker
pub const HEARTBEAT_TOKEN: &str = "heartbeat";

/// Writes a raw address as "aa:bb:cc:dd:ee:ff"
fn serialize_mac<S: Serializer>(mac: &MacAddr, serializer: S) -> Result<S::Ok, S::Error> {
    let mut text = MacString::new();
    format_mac(mac, &mut text);
    serializer.serialize_str(&text)
}

/// One device in an exported snapshot. Plain data: the address is only
/// turned into text when the entry is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceEntry {
    #[serde(serialize_with = "serialize_mac")]
    pub mac: MacAddr,
    pub rssi: i8,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    /// Milliseconds since the device was last observed, at export time
    pub seen_ms: u32,
}

/// A full table snapshot: `{"devices":[...]}`
#[derive(Debug, Serialize)]
pub struct SnapshotMessage<'a> {
    pub devices: &'a [DeviceEntry],
}

/// Liveness marker, emitted whatever the table holds: `{"msg":"heartbeat"}`
#[derive(Debug, Serialize)]
pub struct Heartbeat {
    pub msg: &'static str,
}

impl Heartbeat {
    pub const fn new() -> Self {
        Self {
            msg: HEARTBEAT_TOKEN,
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Acknowledgment for a control command
#[derive(Debug, Serialize)]
pub struct Ack<'a> {
    /// Command token being acknowledged
    pub ack: &'a str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<&'a str>,
}

/// Device status report, answered to `STATUS`
#[derive(Debug, Serialize)]
pub struct StatusMessage {
    /// Always "status"
    pub msg: &'static str,
    /// Uptime in seconds
    pub uptime: u32,
    /// Records currently in the device table
    pub tracked: u16,
    /// Observations dropped at the ingestion channel since boot
    pub dropped: u32,
    /// Current channel dwell time
    pub hop_ms: u32,
    /// Board identifier
    pub board: &'static str,
    /// Firmware version
    pub version: &'static str,
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized control/status message
pub const MAX_MSG_LEN: usize = 256;

/// Buffer type for serialized control/status messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

/// Upper bound on one serialized snapshot entry, trailing comma included:
/// `{"mac":"aa:bb:cc:dd:ee:ff","rssi":-128,"type":"STATION","seen_ms":4294967295},`
pub const ENTRY_MAX_LEN: usize = 80;

/// `{"devices":[]}` plus newline, rounded up
const SNAPSHOT_OVERHEAD: usize = 16;

/// Buffer size that holds a snapshot of `capacity` devices
pub const fn snapshot_len(capacity: usize) -> usize {
    SNAPSHOT_OVERHEAD + ENTRY_MAX_LEN * capacity
}

/// Maximum size of a serialized snapshot for this board's table
pub const SNAPSHOT_MAX_LEN: usize = snapshot_len(board::TABLE_CAPACITY);

#[cfg(test)]
mod tests {
    use super::*;

    fn to_json<'b, T: Serialize>(msg: &T, buf: &'b mut [u8]) -> &'b str {
        let len = serde_json_core::to_slice(msg, buf).unwrap();
        core::str::from_utf8(&buf[..len]).unwrap()
    }

    fn entry(mac: MacAddr, rssi: i8, kind: DeviceKind, seen_ms: u32) -> DeviceEntry {
        DeviceEntry {
            mac,
            rssi,
            kind,
            seen_ms,
        }
    }

    // ── Snapshot serialization ──────────────────────────────────────

    #[test]
    fn serialize_snapshot_message() {
        let devices = [
            entry([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF], -40, DeviceKind::Router, 120),
            entry([0x11, 0x22, 0x33, 0x44, 0x55, 0x66], -71, DeviceKind::Unknown, 0),
        ];
        let mut buf = [0u8; 256];
        let json = to_json(&SnapshotMessage { devices: &devices }, &mut buf);
        assert_eq!(
            json,
            r#"{"devices":[{"mac":"aa:bb:cc:dd:ee:ff","rssi":-40,"type":"ROUTER","seen_ms":120},{"mac":"11:22:33:44:55:66","rssi":-71,"type":"Unknown","seen_ms":0}]}"#
        );
    }

    #[test]
    fn serialize_empty_snapshot() {
        let mut buf = [0u8; 32];
        let json = to_json(&SnapshotMessage { devices: &[] }, &mut buf);
        assert_eq!(json, r#"{"devices":[]}"#);
    }

    #[test]
    fn type_labels_on_the_wire() {
        let mut buf = [0u8; 128];
        for (kind, label) in [
            (DeviceKind::Station, r#""type":"STATION""#),
            (DeviceKind::Deauth, r#""type":"DEAUTH""#),
        ] {
            let e = entry([0, 0, 0, 0, 0, 1], -1, kind, 1);
            assert!(to_json(&e, &mut buf).contains(label));
        }
    }

    #[test]
    fn widest_entry_fits_bound() {
        let e = entry([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF], -128, DeviceKind::Station, u32::MAX);
        let mut buf = [0u8; 128];
        let json = to_json(&e, &mut buf);
        // Separator comma is counted in the bound
        assert!(json.len() + 1 <= ENTRY_MAX_LEN, "{} bytes", json.len());
    }

    #[test]
    fn full_table_snapshot_fits_buffer() {
        let e = entry([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF], -128, DeviceKind::Station, u32::MAX);
        let devices: heapless::Vec<DeviceEntry, { board::TABLE_CAPACITY }> =
            core::iter::repeat(e).take(board::TABLE_CAPACITY).collect();
        let mut buf = [0u8; SNAPSHOT_MAX_LEN];
        let len = serde_json_core::to_slice(&SnapshotMessage { devices: &devices }, &mut buf).unwrap();
        assert!(len < SNAPSHOT_MAX_LEN);
    }

    // ── Control messages ────────────────────────────────────────────

    #[test]
    fn serialize_heartbeat() {
        let mut buf = [0u8; 32];
        assert_eq!(to_json(&Heartbeat::new(), &mut buf), r#"{"msg":"heartbeat"}"#);
    }

    #[test]
    fn serialize_ack_ok_omits_err() {
        let mut buf = [0u8; 64];
        let json = to_json(
            &Ack {
                ack: "CLEAR",
                ok: true,
                err: None,
            },
            &mut buf,
        );
        assert_eq!(json, r#"{"ack":"CLEAR","ok":true}"#);
    }

    #[test]
    fn serialize_ack_error() {
        let mut buf = [0u8; 64];
        let json = to_json(
            &Ack {
                ack: "HOP_SPEED",
                ok: false,
                err: Some("out of range"),
            },
            &mut buf,
        );
        assert_eq!(json, r#"{"ack":"HOP_SPEED","ok":false,"err":"out of range"}"#);
    }

    #[test]
    fn serialize_status_message() {
        let msg = StatusMessage {
            msg: "status",
            uptime: 120,
            tracked: 7,
            dropped: 3,
            hop_ms: 200,
            board: "test_board",
            version: "0.1.0",
        };
        let mut buf = [0u8; MAX_MSG_LEN];
        let json = to_json(&msg, &mut buf);
        assert!(json.contains(r#""msg":"status""#));
        assert!(json.contains(r#""tracked":7"#));
        assert!(json.contains(r#""dropped":3"#));
        assert!(json.contains(r#""hop_ms":200"#));
        assert!(json.contains(r#""board":"test_board""#));
    }

    // ── Version constant ────────────────────────────────────────────

    #[test]
    fn version_is_semver() {
        let parts: heapless::Vec<&str, 4> = VERSION.split('.').collect();
        assert_eq!(
            parts.len(),
            3,
            "VERSION should be semver (major.minor.patch)"
        );
        for part in &parts {
            assert!(part.parse::<u32>().is_ok(), "'{part}' is not a number");
        }
    }
}
