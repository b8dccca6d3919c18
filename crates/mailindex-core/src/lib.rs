//! Foundational low-level utilities shared across mailindex crates.
//!
//! Provides host configuration constants, atomic file replacement, size-rotated
//! log files, and timestamp helpers used by the store, updater, and host.

pub mod atomic_io;
pub mod config;
pub mod log_rotation;
pub mod time_utils;

pub use atomic_io::{write_bytes_atomic, AtomicWriteOptions};
pub use log_rotation::{LogRotationPolicy, RotatingLogFile};
pub use time_utils::{current_unix_timestamp_ms, format_unix_ms_rfc3339, parse_timestamp_ms};
