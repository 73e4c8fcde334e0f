//! Program upload driver.
//!
//! The driver owns the command sequence for one upload over an already
//! resolved command characteristic:
//!
//! ```text
//! Idle -> Stopping -> SendingMeta -> Streaming(offset) -> Starting -> Done
//!   \________\______________\_____________\__________________\--> Failed
//! ```
//!
//! Writes are strictly serial. After every RAM chunk the driver sleeps for
//! the pacing delay before issuing the next write, because the hub's radio
//! link cannot absorb back-to-back writes. The sleep wakes early on
//! cancellation. A failed write is never retried:
//! the hub's program image is left in an unknown state and the whole upload
//! has to be restarted.

use std::fmt;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::protocol::{CHUNK_SIZE, Chunk, Chunks, Command, HEADER_LEN, chunk_count};
use crate::transport::{Transport, WriteMode};

/// Delay between consecutive RAM writes.
pub const PACING_DELAY: Duration = Duration::from_millis(20);

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Delay after each RAM chunk.
    pub pacing: Duration,
    /// Acknowledgement mode for every command write.
    pub write_mode: WriteMode,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            pacing: PACING_DELAY,
            write_mode: WriteMode::WithResponse,
        }
    }
}

impl UploadConfig {
    /// Set the inter-chunk pacing delay.
    #[must_use]
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Set the write acknowledgement mode.
    #[must_use]
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }
}

/// Phase of an upload in which a write can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Sending `StopUserProgram`.
    Stopping,
    /// Sending `WriteUserProgramMeta`.
    SendingMeta,
    /// Sending `WriteUserRam` chunks.
    Streaming,
    /// Sending `StartUserProgram`.
    Starting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopping => write!(f, "stopping user program"),
            Self::SendingMeta => write!(f, "sending program size"),
            Self::Streaming => write!(f, "writing program"),
            Self::Starting => write!(f, "starting user program"),
        }
    }
}

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Nothing sent yet.
    Idle,
    /// Stop command in flight.
    Stopping,
    /// Meta command in flight.
    SendingMeta,
    /// Writing the chunk at `offset`.
    Streaming {
        /// Offset of the chunk being written.
        offset: u32,
    },
    /// Start command in flight.
    Starting,
    /// Program uploaded and started.
    Done,
    /// A write failed or the upload was cancelled.
    Failed,
}

impl UploadState {
    /// Whether the driver can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Progress notifications emitted while uploading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadEvent {
    /// The driver entered a new phase.
    Phase(Phase),
    /// A chunk was accepted; `sent` bytes of `total` are on the hub.
    Progress {
        /// Bytes written so far.
        sent: usize,
        /// Program size.
        total: usize,
    },
}

/// Drives the upload command sequence over one characteristic.
///
/// The driver borrows the transport and characteristic for its whole
/// lifetime, so nothing else can write to the hub while it runs.
pub struct UploadDriver<'a, T: Transport> {
    transport: &'a mut T,
    characteristic: &'a T::Characteristic,
    config: UploadConfig,
    cancel: CancelToken,
    state: UploadState,
    next_offset: u32,
    last_good_offset: Option<u32>,
}

impl<'a, T: Transport> UploadDriver<'a, T> {
    /// Create a driver writing to `characteristic`.
    pub fn new(transport: &'a mut T, characteristic: &'a T::Characteristic) -> Self {
        Self {
            transport,
            characteristic,
            config: UploadConfig::default(),
            cancel: CancelToken::new(),
            state: UploadState::Idle,
            next_offset: 0,
            last_good_offset: None,
        }
    }

    /// Use a custom configuration.
    #[must_use]
    pub fn with_config(mut self, config: UploadConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe `cancel` at every suspension point.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current state.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Offset the next RAM chunk must start at.
    pub fn next_offset(&self) -> u32 {
        self.next_offset
    }

    /// Offset of the last chunk the transport accepted.
    pub fn last_good_offset(&self) -> Option<u32> {
        self.last_good_offset
    }

    /// Upload `program` and start it.
    ///
    /// `progress` is called on every phase change and after every chunk.
    pub fn upload<F>(&mut self, program: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(UploadEvent),
    {
        self.ensure_idle("upload")?;

        let result = self.run(program, &mut progress);
        match &result {
            Ok(()) => {
                self.state = UploadState::Done;
                info!("Upload complete ({} bytes)", program.len());
            },
            Err(e) => {
                self.state = UploadState::Failed;
                warn!("Upload failed: {e}");
            },
        }
        result
    }

    /// Send only `StopUserProgram`.
    pub fn stop_program(&mut self) -> Result<()> {
        self.single(Phase::Stopping, UploadState::Stopping, Command::StopUserProgram)
    }

    /// Send only `StartUserProgram`.
    pub fn start_program(&mut self) -> Result<()> {
        self.single(Phase::Starting, UploadState::Starting, Command::StartUserProgram)
    }

    /// Each driver sends one sequence; reuse is a caller bug.
    fn ensure_idle(&self, what: &str) -> Result<()> {
        if self.state == UploadState::Idle {
            Ok(())
        } else {
            Err(Error::ProtocolContract(format!(
                "{what} started from state {:?}",
                self.state
            )))
        }
    }

    fn single(&mut self, phase: Phase, state: UploadState, command: Command<'_>) -> Result<()> {
        self.ensure_idle(&phase.to_string())?;

        let result = self.cancel.check().and_then(|()| {
            self.state = state;
            self.send(phase, 0, &command)
        });
        self.state = if result.is_ok() {
            UploadState::Done
        } else {
            UploadState::Failed
        };
        result
    }

    fn run(&mut self, program: &[u8], progress: &mut dyn FnMut(UploadEvent)) -> Result<()> {
        let size = u32::try_from(program.len()).map_err(|_| {
            Error::ProtocolContract(format!(
                "program of {} bytes does not fit a 32-bit size",
                program.len()
            ))
        })?;

        let largest_frame = HEADER_LEN + program.len().min(CHUNK_SIZE);
        let max_write = self.transport.max_write_len();
        if largest_frame > max_write {
            return Err(Error::ProtocolContract(format!(
                "{largest_frame}-byte frames exceed the {max_write}-byte transport limit"
            )));
        }

        self.cancel.check()?;
        self.state = UploadState::Stopping;
        progress(UploadEvent::Phase(Phase::Stopping));
        self.send(Phase::Stopping, 0, &Command::StopUserProgram)?;

        self.cancel.check()?;
        self.state = UploadState::SendingMeta;
        progress(UploadEvent::Phase(Phase::SendingMeta));
        self.send(Phase::SendingMeta, 0, &Command::WriteUserProgramMeta { size })?;

        progress(UploadEvent::Phase(Phase::Streaming));
        debug!(
            "Writing {size} bytes in {} chunks",
            chunk_count(program.len())
        );
        for chunk in Chunks::new(program) {
            self.cancel.check()?;
            self.write_chunk(chunk)?;
            progress(UploadEvent::Progress {
                sent: chunk.end(),
                total: program.len(),
            });

            self.cancel.sleep(self.config.pacing)?;
        }

        if self.next_offset != size {
            return Err(Error::ProtocolContract(format!(
                "streamed {} of {size} bytes",
                self.next_offset
            )));
        }

        self.cancel.check()?;
        self.state = UploadState::Starting;
        progress(UploadEvent::Phase(Phase::Starting));
        self.send(Phase::Starting, 0, &Command::StartUserProgram)
    }

    /// Write one chunk, which must start exactly where the previous one ended.
    #[allow(clippy::cast_possible_truncation)]
    fn write_chunk(&mut self, chunk: Chunk<'_>) -> Result<()> {
        if chunk.offset != self.next_offset as usize {
            return Err(Error::ProtocolContract(format!(
                "chunk at offset {} but next offset is {}",
                chunk.offset, self.next_offset
            )));
        }
        if chunk.data.len() > CHUNK_SIZE {
            return Err(Error::ProtocolContract(format!(
                "chunk of {} bytes exceeds {CHUNK_SIZE}",
                chunk.data.len()
            )));
        }

        // Safe cast: offset equals next_offset, which is a u32
        let offset = chunk.offset as u32;
        let end = u32::try_from(chunk.end())
            .map_err(|_| Error::ProtocolContract("chunk ends past 4 GiB".into()))?;

        self.state = UploadState::Streaming { offset };
        self.send(
            Phase::Streaming,
            offset,
            &Command::WriteUserRam {
                offset,
                data: chunk.data,
            },
        )?;

        self.last_good_offset = Some(offset);
        self.next_offset = end;
        Ok(())
    }

    /// Encode and write one command.
    fn send(&mut self, phase: Phase, offset: u32, command: &Command<'_>) -> Result<()> {
        let frame = command.encode();
        let max_write = self.transport.max_write_len();
        if frame.len() > max_write {
            return Err(Error::ProtocolContract(format!(
                "{}-byte {} frame exceeds the {max_write}-byte transport limit",
                frame.len(),
                command.opcode()
            )));
        }

        debug!("Sending {} ({} bytes)", command.opcode(), frame.len());
        trace!("Frame: {frame:02X?}");

        self.transport
            .write(self.characteristic, &frame, self.config.write_mode)
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                e => Error::Write {
                    phase,
                    offset,
                    last_good_offset: self.last_good_offset,
                    reason: e.to_string(),
                },
            })
    }
}
