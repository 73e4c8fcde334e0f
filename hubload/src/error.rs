//! Error types for hubload.

use std::io;
use thiserror::Error;

use crate::upload::Phase;

/// Result type for hubload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for hubload operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bluetooth stack error.
    #[cfg(feature = "ble")]
    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No endpoint advertising a matching name was seen within the scan window.
    #[error("No hub matching '{prefix}' found")]
    EndpointNotFound {
        /// Name prefix that was searched for.
        prefix: String,
    },

    /// Connecting or resolving the command characteristic failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A command write failed during the given phase.
    #[error("Write failed while {phase} at offset {offset}: {reason}")]
    Write {
        /// Phase the driver was in when the write failed.
        phase: Phase,
        /// Program offset the failed write was carrying (0 outside streaming).
        offset: u32,
        /// Offset of the last chunk the transport accepted, if any.
        last_good_offset: Option<u32>,
        /// Underlying transport failure.
        reason: String,
    },

    /// Caller violated the chunking or framing contract.
    #[error("Protocol contract violated: {0}")]
    ProtocolContract(String),

    /// The operation was cancelled by the caller.
    #[error("Cancelled")]
    Cancelled,

    /// Operation timed out.
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Whether this error was caused by cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
