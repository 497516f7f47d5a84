//! macwatch library: portable device census engine.
//!
//! Classifies promiscuous-mode WiFi frames by their sender, keeps a table of
//! recently seen devices, and exports snapshots of it as NDJSON. Everything
//! here is `no_std` with no allocator and testable on any host with
//! `cargo test --lib --no-default-features`. The firmware binaries (Embassy
//! in `src/main.rs`, ESP-IDF in `firmware-std/`) only provide the radio,
//! timers and output sinks.
//!
//! Data flows `scanner` → `ingest` → `aggregator` → `table` ← `export`;
//! `hop` holds channel scheduler state and `comm` the command surface.

#![cfg_attr(not(test), no_std)]

pub mod aggregator;
pub mod board;
pub mod comm;
pub mod config;
pub mod defaults;
pub mod device;
pub mod export;
pub mod hop;
pub mod ingest;
pub mod protocol;
pub mod scanner;
pub mod table;
