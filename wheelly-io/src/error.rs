//! Error types for the robot link layer.
//!
//! # Recovery strategies
//!
//! - **`Io`**: transport failure; the reliable socket reconnects with a
//!   bounded retry interval, the session continues.
//! - **`ProtocolFormat`**: malformed status line; reported and dropped, the
//!   session continues.
//! - **`ClockUnsynced`**: clock round trip timed out; the last known
//!   converter stays in use and the sync is retried.
//! - **`ConnectionClosed`**: the transport was closed; the session ends.

use thiserror::Error;

/// Errors that can occur in the robot link layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed line {line:?}: {reason}")]
    ProtocolFormat { line: String, reason: String },

    #[error("clock sync timed out")]
    ClockUnsynced,

    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Shorthand for a protocol format error.
    pub fn format(line: &str, reason: impl Into<String>) -> Self {
        Error::ProtocolFormat {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
