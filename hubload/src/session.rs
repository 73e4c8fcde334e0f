//! One discovery + connect + upload attempt, reduced to a single outcome.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hubload::{Outcome, SessionController};
//!
//! # #[cfg(feature = "ble")]
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = hubload::BleTransport::new()?;
//!     let mut controller = SessionController::new(transport);
//!
//!     let program = std::fs::read("program.mpy")?;
//!     let report = controller.upload("Pybricks Hub", &program, &mut |line| {
//!         println!("{line}");
//!     });
//!
//!     if let Outcome::Failure(e) = &report.outcome {
//!         eprintln!("upload failed: {e}");
//!     }
//!     Ok(())
//! }
//! # #[cfg(not(feature = "ble"))]
//! # fn main() {}
//! ```

use std::fmt;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::protocol::chunk_count;
use crate::transport::{COMMAND_CHAR_UUID, Endpoint, SERVICE_UUID, Transport};
use crate::upload::{Phase, UploadConfig, UploadDriver, UploadEvent};

/// Default discovery window.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to scan for a matching hub.
    pub scan_timeout: Duration,
    /// Upload driver settings.
    pub upload: UploadConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: SCAN_TIMEOUT,
            upload: UploadConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Set the discovery window.
    #[must_use]
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the upload driver configuration.
    #[must_use]
    pub fn with_upload(mut self, upload: UploadConfig) -> Self {
        self.upload = upload;
        self
    }
}

/// Terminal result of a session.
#[derive(Debug)]
pub enum Outcome {
    /// The program was uploaded and started (or the single command was sent).
    Success,
    /// Connecting or writing failed, or the session was cancelled.
    Failure(Error),
    /// No hub matched the requested name within the scan window.
    EndpointNotFound,
}

impl Outcome {
    /// Whether the session succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(Error::EndpointNotFound { .. }) => Self::EndpointNotFound,
            Err(e) => Self::Failure(e),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(e) => write!(f, "failure: {e}"),
            Self::EndpointNotFound => write!(f, "hub not found"),
        }
    }
}

/// Everything a session surfaces to its caller.
#[derive(Debug)]
pub struct SessionReport {
    /// Terminal outcome.
    pub outcome: Outcome,
    /// The hub the session talked to, if one was found.
    pub endpoint: Option<Endpoint>,
    /// Bytes of the program the hub accepted.
    pub bytes_sent: u32,
    /// Progress lines in the order they were emitted.
    pub log: Vec<String>,
}

/// Lifecycle of an [`UploadSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Not finished yet.
    Pending,
    /// Finished successfully.
    Succeeded,
    /// Finished with the given reason.
    Failed(String),
}

/// State of one upload: what is being sent where, and how far it got.
#[derive(Debug)]
pub struct UploadSession<'a> {
    identity: &'a str,
    program: &'a [u8],
    endpoint: Option<Endpoint>,
    next_offset: u32,
    status: SessionStatus,
}

impl<'a> UploadSession<'a> {
    /// Create a pending session for `program` and the hub named `identity`.
    pub fn new(identity: &'a str, program: &'a [u8]) -> Self {
        Self {
            identity,
            program,
            endpoint: None,
            next_offset: 0,
            status: SessionStatus::Pending,
        }
    }

    /// Name or name prefix of the target hub.
    pub fn identity(&self) -> &str {
        self.identity
    }

    /// Program being uploaded.
    pub fn program(&self) -> &[u8] {
        self.program
    }

    /// Endpoint selected by discovery.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Offset of the next byte to send.
    pub fn next_offset(&self) -> u32 {
        self.next_offset
    }

    /// Current status.
    pub fn status(&self) -> &SessionStatus {
        &self.status
    }
}

/// What a session does once connected.
#[derive(Debug, Clone, Copy)]
enum Action {
    Upload,
    Stop,
    Start,
}

/// Runs sessions against a transport.
///
/// The controller owns the transport, so only one session can use it at a
/// time and every session performs exactly one connect/disconnect cycle.
pub struct SessionController<T: Transport> {
    transport: T,
    config: SessionConfig,
    cancel: CancelToken,
}

impl<T: Transport> SessionController<T> {
    /// Create a controller with the default configuration.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: SessionConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Use a custom configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe `cancel` at every suspension point.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Consume the controller and return the underlying transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// List hubs advertising within the scan window.
    pub fn scan(&mut self) -> Result<Vec<Endpoint>> {
        self.transport.list_endpoints(self.config.scan_timeout)
    }

    /// Upload `program` to the first hub whose name starts with `identity`
    /// and start it.
    ///
    /// Every progress line is handed to `sink` as it happens and also kept
    /// in the returned report. Errors never escape; they become the
    /// report's [`Outcome`].
    pub fn upload(
        &mut self,
        identity: &str,
        program: &[u8],
        sink: &mut dyn FnMut(&str),
    ) -> SessionReport {
        let mut session = UploadSession::new(identity, program);
        self.run_upload(&mut session, sink, &mut |_, _| {})
    }

    /// Run a caller-owned upload session to completion.
    ///
    /// `progress` receives `(bytes_sent, program_len)` after every chunk.
    /// Afterwards the session holds the selected endpoint, how far the
    /// transfer got and its terminal status.
    pub fn run_upload(
        &mut self,
        session: &mut UploadSession<'_>,
        sink: &mut dyn FnMut(&str),
        progress: &mut dyn FnMut(usize, usize),
    ) -> SessionReport {
        self.run(session, Action::Upload, sink, progress)
    }

    /// Halt the program running on the hub.
    pub fn stop_program(&mut self, identity: &str, sink: &mut dyn FnMut(&str)) -> SessionReport {
        let mut session = UploadSession::new(identity, &[]);
        self.run(&mut session, Action::Stop, sink, &mut |_, _| {})
    }

    /// Start the program already held in the hub's RAM.
    pub fn start_program(&mut self, identity: &str, sink: &mut dyn FnMut(&str)) -> SessionReport {
        let mut session = UploadSession::new(identity, &[]);
        self.run(&mut session, Action::Start, sink, &mut |_, _| {})
    }

    fn run(
        &mut self,
        session: &mut UploadSession<'_>,
        action: Action,
        sink: &mut dyn FnMut(&str),
        progress: &mut dyn FnMut(usize, usize),
    ) -> SessionReport {
        let mut log = Vec::new();
        let mut emit = |line: String| {
            sink(&line);
            log.push(line);
        };

        let result = self.execute(session, action, &mut emit, progress);

        let outcome = Outcome::from_result(result);
        match &outcome {
            Outcome::Success => emit(match action {
                Action::Upload => format!(
                    "Program started ({} bytes uploaded)",
                    session.program.len()
                ),
                Action::Stop => "Program stopped".to_string(),
                Action::Start => "Program started".to_string(),
            }),
            Outcome::EndpointNotFound => emit(format!(
                "Error: no hub matching '{}' found within {}s",
                session.identity,
                self.config.scan_timeout.as_secs_f32()
            )),
            Outcome::Failure(Error::Cancelled) => emit("Cancelled".to_string()),
            Outcome::Failure(e) => emit(format!("Error: {e}")),
        }

        session.status = match &outcome {
            Outcome::Success => SessionStatus::Succeeded,
            other => SessionStatus::Failed(other.to_string()),
        };

        SessionReport {
            outcome,
            endpoint: session.endpoint.clone(),
            bytes_sent: session.next_offset,
            log,
        }
    }

    fn execute(
        &mut self,
        session: &mut UploadSession<'_>,
        action: Action,
        emit: &mut dyn FnMut(String),
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        self.cancel.check()?;
        emit(format!("Scanning for hub '{}'...", session.identity));
        let found = self
            .transport
            .scan(session.identity, self.config.scan_timeout, &self.cancel)?;
        // A cancelled scan must not read as a missing hub.
        self.cancel.check()?;
        let endpoint = found.ok_or_else(|| Error::EndpointNotFound {
            prefix: session.identity.to_string(),
        })?;
        info!("Found hub {endpoint}");
        emit(format!("Found hub {endpoint}"));
        session.endpoint = Some(endpoint.clone());

        self.cancel.check()?;
        emit(format!("Connecting to {}...", endpoint.name));
        let connection = self
            .transport
            .connect(&endpoint)
            .map_err(into_connection_error)?;

        let result = self.with_connection(&connection, session, action, emit, progress);

        debug!("Disconnecting from {}", endpoint.name);
        if let Err(e) = self.transport.disconnect(connection) {
            warn!("Disconnect from {} failed: {e}", endpoint.name);
        }
        emit(format!("Disconnected from {}", endpoint.name));
        result
    }

    fn with_connection(
        &mut self,
        connection: &T::Connection,
        session: &mut UploadSession<'_>,
        action: Action,
        emit: &mut dyn FnMut(String),
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        let characteristic = self
            .transport
            .characteristic(connection, SERVICE_UUID, COMMAND_CHAR_UUID)
            .map_err(into_connection_error)?;
        emit("Connected".to_string());

        let mut driver = UploadDriver::new(&mut self.transport, &characteristic)
            .with_config(self.config.upload.clone())
            .with_cancel(self.cancel.clone());

        let result = match action {
            Action::Upload => {
                let program = session.program;
                driver.upload(program, |event| match event {
                    UploadEvent::Phase(Phase::Streaming) => emit(format!(
                        "Writing program ({} bytes, {} chunks)...",
                        program.len(),
                        chunk_count(program.len())
                    )),
                    UploadEvent::Phase(Phase::SendingMeta) => {
                        emit(format!("Sending program size ({} bytes)...", program.len()));
                    },
                    UploadEvent::Phase(phase) => emit(format!("{}...", capitalize(phase))),
                    UploadEvent::Progress { sent, total } => {
                        trace!("{sent}/{total} bytes written");
                        progress(sent, total);
                    },
                })
            },
            Action::Stop => {
                emit(format!("{}...", capitalize(Phase::Stopping)));
                driver.stop_program()
            },
            Action::Start => {
                emit(format!("{}...", capitalize(Phase::Starting)));
                driver.start_program()
            },
        };

        session.next_offset = driver.next_offset();
        result
    }
}

/// Failures before any command is sent are connection errors.
fn into_connection_error(e: Error) -> Error {
    match e {
        Error::Connection(_) | Error::Cancelled => e,
        e => Error::Connection(e.to_string()),
    }
}

fn capitalize(phase: Phase) -> String {
    let text = phase.to_string();
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => text,
    }
}
