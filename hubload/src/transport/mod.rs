//! Transport abstraction for talking to a hub.
//!
//! The upload logic never touches a radio stack directly. It goes through the
//! [`Transport`] trait, which models a connection-oriented link exposing
//! GATT-style services and characteristics:
//!
//! ```text
//! +---------------------+
//! |  SessionController  |
//! +----------+----------+
//!            |
//! +----------v----------+
//! |    UploadDriver     |  STOP -> META -> RAM x N -> START
//! +----------+----------+
//!            |
//! +----------v----------+
//! |   Transport trait   |  scan / connect / characteristic / write
//! +----------+----------+
//!            |
//! +----------v----------+
//! |    BleTransport     |  btleplug (feature "ble")
//! +---------------------+
//! ```
//!
//! All methods block until the operation completes or fails. Implementations
//! are expected to bound every operation with a timeout so that an
//! unresponsive hub surfaces as [`Error::Timeout`](crate::Error::Timeout)
//! instead of hanging the session.

#[cfg(feature = "ble")]
pub mod ble;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::Result;

/// Service exposing the hub's command characteristic.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xc5f50001_8280_46da_89f4_6d8051e4aeef);

/// The single characteristic all commands are written to.
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0xc5f50002_8280_46da_89f4_6d8051e4aeef);

/// A discovered hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Endpoint {
    /// Advertised name.
    pub name: String,
    /// Platform-specific handle used to connect (e.g. a Bluetooth address).
    pub handle: String,
}

impl Endpoint {
    /// Create an endpoint from its advertised name and platform handle.
    pub fn new(name: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: handle.into(),
        }
    }

    /// Whether the advertised name starts with `prefix`.
    pub fn matches(&self, prefix: &str) -> bool {
        self.name.starts_with(prefix)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.handle)
    }
}

/// How a characteristic write is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Wait for the remote side to acknowledge the write.
    #[default]
    WithResponse,
    /// Return once the local stack accepted the write.
    WithoutResponse,
}

/// Blocking, connection-oriented link to hubs.
///
/// Writes on one characteristic must be delivered in the order they are
/// issued; implementations must not use any out-of-order or coalescing
/// delivery option.
pub trait Transport {
    /// An open connection to one endpoint.
    type Connection;

    /// A resolved, writable characteristic on an open connection.
    type Characteristic;

    /// Scan until an endpoint whose name starts with `name_prefix` is seen.
    ///
    /// The first matching endpoint wins. Returns `Ok(None)` when nothing
    /// matched within `timeout`, and `Err(Error::Cancelled)` as soon as
    /// `cancel` fires while waiting.
    fn scan(
        &mut self,
        name_prefix: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<Endpoint>>;

    /// List every named endpoint seen within `timeout`.
    fn list_endpoints(&mut self, timeout: Duration) -> Result<Vec<Endpoint>>;

    /// Connect to a previously scanned endpoint.
    fn connect(&mut self, endpoint: &Endpoint) -> Result<Self::Connection>;

    /// Resolve a characteristic on an open connection.
    fn characteristic(
        &mut self,
        connection: &Self::Connection,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Self::Characteristic>;

    /// Write `data` to a characteristic.
    fn write(
        &mut self,
        characteristic: &Self::Characteristic,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()>;

    /// Largest single write the link accepts.
    fn max_write_len(&self) -> usize;

    /// Close the connection and release its resources.
    fn disconnect(&mut self, connection: Self::Connection) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_prefix_match() {
        let hub = Endpoint::new("Pybricks Hub", "AA:BB:CC:DD:EE:FF");
        assert!(hub.matches("Pybricks"));
        assert!(hub.matches(""));
        assert!(!hub.matches("pybricks"));
        assert!(!hub.matches("Pybricks Hub 2"));
    }

    #[test]
    fn test_uuids_share_base() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "c5f50001-8280-46da-89f4-6d8051e4aeef"
        );
        assert_eq!(
            COMMAND_CHAR_UUID.to_string(),
            "c5f50002-8280-46da-89f4-6d8051e4aeef"
        );
    }
}
