//! # hubload
//!
//! A library for uploading programs to robot hubs over Bluetooth LE and
//! starting them.
//!
//! This crate provides:
//!
//! - The hub command frames (`StopUserProgram`, `StartUserProgram`,
//!   `WriteUserProgramMeta`, `WriteUserRam`)
//! - Chunking of program images into RAM writes
//! - An upload driver that sequences and paces the writes
//! - A session controller that wraps discovery, connection and upload into
//!   one outcome plus a stream of progress lines
//!
//! ## Features
//!
//! - `ble` (default): Native Bluetooth LE transport via `btleplug`
//! - `serde`: Serialization support for endpoints
//!
//! ## Example
//!
//! ```rust,no_run
//! use hubload::{CancelToken, SessionConfig, SessionController};
//!
//! # #[cfg(feature = "ble")]
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cancel = CancelToken::new();
//!     let mut controller = SessionController::new(hubload::BleTransport::new()?)
//!         .with_config(SessionConfig::default())
//!         .with_cancel(cancel.clone());
//!
//!     let program = std::fs::read("main.mpy")?;
//!     let report = controller.upload("Pybricks Hub", &program, &mut |line| {
//!         println!("{line}");
//!     });
//!     println!("{}", report.outcome);
//!
//!     Ok(())
//! }
//! # #[cfg(not(feature = "ble"))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod upload;

// Re-exports for convenience
#[cfg(feature = "ble")]
pub use transport::ble::{BleCharacteristic, BleConnection, BleTransport};
pub use {
    cancel::CancelToken,
    error::{Error, Result},
    protocol::{CHUNK_SIZE, Chunk, Chunks, Command, Opcode, chunk_count},
    session::{
        Outcome, SCAN_TIMEOUT, SessionConfig, SessionController, SessionReport, SessionStatus,
        UploadSession,
    },
    transport::{COMMAND_CHAR_UUID, Endpoint, SERVICE_UUID, Transport, WriteMode},
    upload::{PACING_DELAY, Phase, UploadConfig, UploadDriver, UploadEvent, UploadState},
};
