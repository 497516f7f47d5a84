/// Communication layer: NDJSON output helpers and the command surface.
///
/// Snapshots and heartbeats stream as newline-delimited JSON over serial
/// and, truncated to one notification, over BLE. Commands arrive as short
/// ASCII lines from either transport and are answered with an ack line.

use core::fmt;

use serde::Serialize;

use crate::hop::HopPeriod;
use crate::protocol::{Ack, StatusMessage};
use crate::table::SharedTable;

/// BLE GATT service UUIDs.
///
/// These duplicate the string literals in the `#[gatt_service]` and `#[characteristic]`
/// proc macro attributes in the firmware: Rust proc macros require string literals,
/// so we can't reference these constants there. Kept here as the canonical source of truth.
#[allow(dead_code)]
pub mod ble_uuids {
    /// Primary service UUID
    pub const SERVICE: &str = "6d770001-3f1e-4c8a-9b2d-5e0c7a41d2b6";
    /// TX characteristic: snapshots and acks, notify
    pub const TX_CHAR: &str = "6d770002-3f1e-4c8a-9b2d-5e0c7a41d2b6";
    /// RX characteristic: commands, write
    pub const RX_CHAR: &str = "6d770003-3f1e-4c8a-9b2d-5e0c7a41d2b6";
}

/// BLE advertising name
pub const BLE_ADV_NAME: &str = "macwatch";

/// Console baud rate the firmware sets for host tools
pub const SERIAL_BAUD: u32 = 921_600;

/// Notification payload ceiling. Longer messages are cut, not fragmented.
pub const BLE_MAX_NOTIFY: usize = 180;

/// Longest command line accepted
pub const MAX_LINE_LEN: usize = 32;

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a message to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message<T: Serialize>(msg: &T, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            // Append newline for NDJSON
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}

/// The part of a message that fits in one BLE notification.
pub fn notify_payload(msg: &[u8]) -> &[u8] {
    &msg[..msg.len().min(BLE_MAX_NOTIFY)]
}

// ── Commands ───────────────────────────────────────────────────────────

/// Commands accepted from a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Empty the device table
    Clear,
    /// Set the channel dwell time in milliseconds
    HopSpeed(u32),
    /// Report device status
    Status,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Clear => "CLEAR",
            Command::HopSpeed(_) => "HOP_SPEED",
            Command::Status => "STATUS",
        }
    }
}

/// Why a command was rejected. No state changes on rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    Unknown,
    MissingArgument,
    UnexpectedArgument,
    InvalidNumber,
    OutOfRange { min: u32, max: u32 },
}

impl CommandError {
    /// Short reason for the ack line
    pub fn reason(&self) -> &'static str {
        match self {
            CommandError::Unknown => "unknown command",
            CommandError::MissingArgument => "missing argument",
            CommandError::UnexpectedArgument => "unexpected argument",
            CommandError::InvalidNumber => "invalid number",
            CommandError::OutOfRange { .. } => "out of range",
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::OutOfRange { min, max } => {
                write!(f, "out of range ({}..={} ms)", min, max)
            }
            other => f.write_str(other.reason()),
        }
    }
}

/// First whitespace-separated word of a line, for acknowledging
/// commands that failed to parse.
pub fn command_token(line: &[u8]) -> &str {
    let line = core::str::from_utf8(line).unwrap_or("");
    line.split_ascii_whitespace().next().unwrap_or("")
}

/// Parse one command line (`CLEAR`, `HOP_SPEED <ms>`, `STATUS`).
/// Keywords are case-insensitive; surrounding whitespace is ignored.
pub fn parse_command(line: &[u8]) -> Result<Command, CommandError> {
    let text = core::str::from_utf8(line).map_err(|_| CommandError::Unknown)?;
    let mut words = text.split_ascii_whitespace();
    let keyword = words.next().ok_or(CommandError::Unknown)?;

    let cmd = if keyword.eq_ignore_ascii_case("CLEAR") {
        Command::Clear
    } else if keyword.eq_ignore_ascii_case("STATUS") {
        Command::Status
    } else if keyword.eq_ignore_ascii_case("HOP_SPEED") {
        let arg = words.next().ok_or(CommandError::MissingArgument)?;
        let ms = arg.parse::<u32>().map_err(|_| CommandError::InvalidNumber)?;
        Command::HopSpeed(ms)
    } else {
        return Err(CommandError::Unknown);
    };

    if words.next().is_some() {
        return Err(CommandError::UnexpectedArgument);
    }
    Ok(cmd)
}

/// What the caller must send back after a command was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Status,
}

/// Apply a command to shared state.
pub fn handle_command<const N: usize>(
    cmd: Command,
    table: &SharedTable<N>,
    hop: &HopPeriod,
) -> Result<Reply, CommandError> {
    match cmd {
        Command::Clear => {
            let cleared = table.lock(|t| {
                let n = t.len();
                t.clear();
                n
            });
            log::info!("Device table cleared by host command ({} records)", cleared);
            Ok(Reply::Ack)
        }
        Command::HopSpeed(ms) => {
            hop.set(ms)?;
            log::info!("Channel dwell set to {} ms", ms);
            Ok(Reply::Ack)
        }
        Command::Status => Ok(Reply::Status),
    }
}

/// Parse, apply and answer one command line. The reply is written to
/// `buf` as NDJSON; returns its length.
///
/// `status` is only called for `STATUS`, since uptime and heap figures
/// come from the platform.
pub fn respond<const N: usize>(
    line: &[u8],
    table: &SharedTable<N>,
    hop: &HopPeriod,
    status: impl FnOnce() -> StatusMessage,
    buf: &mut [u8],
) -> Option<usize> {
    let outcome = parse_command(line).and_then(|cmd| {
        handle_command(cmd, table, hop).map(|reply| (cmd.name(), reply))
    });

    match outcome {
        Ok((_, Reply::Status)) => serialize_message(&status(), buf),
        Ok((name, Reply::Ack)) => serialize_message(
            &Ack {
                ack: name,
                ok: true,
                err: None,
            },
            buf,
        ),
        Err(e) => {
            log::warn!("Rejected command '{}': {}", command_token(line), e);
            serialize_message(
                &Ack {
                    ack: command_token(line),
                    ok: false,
                    err: Some(e.reason()),
                },
                buf,
            )
        }
    }
}

// ── Line reader ────────────────────────────────────────────────────────

/// Command line reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
pub struct LineReader {
    buf: [u8; MAX_LINE_LEN],
    pos: usize,
    overflowed: bool,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_LINE_LEN],
            pos: 0,
            overflowed: false,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected. An over-long line is discarded whole.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' || byte == b'\r' {
            let overflowed = core::mem::replace(&mut self.overflowed, false);
            let len = core::mem::replace(&mut self.pos, 0);
            if len > 0 && !overflowed {
                Some(&self.buf[..len])
            } else {
                None
            }
        } else if self.overflowed {
            None
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            // Overflow: drop everything up to the next newline
            self.pos = 0;
            self.overflowed = true;
            None
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}
