//! Scriptable in-memory transport for tests.

use std::io;
use std::time::Duration;

use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::protocol::Opcode;
use crate::transport::{Endpoint, Transport, WriteMode};

/// One recorded characteristic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Write {
    pub(crate) service: Uuid,
    pub(crate) characteristic: Uuid,
    pub(crate) data: Vec<u8>,
    pub(crate) mode: WriteMode,
}

impl Write {
    pub(crate) fn opcode(&self) -> Option<Opcode> {
        self.data.first().copied().and_then(Opcode::from_byte)
    }

    /// Offset field of a RAM write.
    pub(crate) fn ram_offset(&self) -> Option<u32> {
        if self.opcode() != Some(Opcode::WriteUserRam) {
            return None;
        }
        let bytes: [u8; 4] = self.data.get(1..5)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

pub(crate) struct MockConnection {
    endpoint: Endpoint,
}

pub(crate) struct MockCharacteristic {
    service: Uuid,
    characteristic: Uuid,
}

/// Transport double that records every call.
pub(crate) struct MockTransport {
    pub(crate) endpoints: Vec<Endpoint>,
    pub(crate) refuse_connect: bool,
    pub(crate) missing_characteristic: bool,
    /// Index (0-based) of the write that should fail, and the error it fails with.
    pub(crate) fail_write_at: Option<(usize, Error)>,
    /// How long a scan waits before answering.
    pub(crate) scan_delay: Duration,
    /// Cancel this token at the end of a scan, then still report the match.
    pub(crate) cancel_during_scan: Option<CancelToken>,
    /// Cancel this token once the given number of writes succeeded.
    pub(crate) cancel_after: Option<(usize, CancelToken)>,
    pub(crate) max_write_len: usize,

    pub(crate) scans: Vec<String>,
    pub(crate) connects: Vec<Endpoint>,
    pub(crate) disconnects: usize,
    pub(crate) writes: Vec<Write>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            endpoints: vec![Endpoint::new("Pybricks Hub", "00:11:22:33:44:55")],
            refuse_connect: false,
            missing_characteristic: false,
            fail_write_at: None,
            scan_delay: Duration::ZERO,
            cancel_during_scan: None,
            cancel_after: None,
            max_write_len: 512,
            scans: Vec::new(),
            connects: Vec::new(),
            disconnects: 0,
            writes: Vec::new(),
        }
    }

    pub(crate) fn without_endpoints() -> Self {
        Self {
            endpoints: Vec::new(),
            ..Self::new()
        }
    }

    /// Fail the write at `index` as if the link dropped.
    pub(crate) fn failing_write(index: usize) -> Self {
        Self {
            fail_write_at: Some((index, link_lost())),
            ..Self::new()
        }
    }

    pub(crate) fn opcodes(&self) -> Vec<Opcode> {
        self.writes.iter().filter_map(Write::opcode).collect()
    }

    pub(crate) fn ram_writes(&self) -> Vec<&Write> {
        self.writes
            .iter()
            .filter(|w| w.opcode() == Some(Opcode::WriteUserRam))
            .collect()
    }
}

impl Transport for MockTransport {
    type Connection = MockConnection;
    type Characteristic = MockCharacteristic;

    fn scan(
        &mut self,
        name_prefix: &str,
        _timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<Endpoint>> {
        self.scans.push(name_prefix.to_string());
        cancel.sleep(self.scan_delay)?;
        if let Some(token) = &self.cancel_during_scan {
            token.cancel();
        }
        Ok(self.endpoints.iter().find(|e| e.matches(name_prefix)).cloned())
    }

    fn list_endpoints(&mut self, _timeout: Duration) -> Result<Vec<Endpoint>> {
        Ok(self.endpoints.clone())
    }

    fn connect(&mut self, endpoint: &Endpoint) -> Result<Self::Connection> {
        self.connects.push(endpoint.clone());
        if self.refuse_connect {
            return Err(Error::Connection("connection refused".into()));
        }
        Ok(MockConnection {
            endpoint: endpoint.clone(),
        })
    }

    fn characteristic(
        &mut self,
        connection: &Self::Connection,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Self::Characteristic> {
        if self.missing_characteristic {
            return Err(Error::Connection(format!(
                "{} has no characteristic {characteristic}",
                connection.endpoint.name
            )));
        }
        Ok(MockCharacteristic {
            service,
            characteristic,
        })
    }

    fn write(
        &mut self,
        characteristic: &Self::Characteristic,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        if self
            .fail_write_at
            .as_ref()
            .is_some_and(|(index, _)| *index == self.writes.len())
        {
            if let Some((_, error)) = self.fail_write_at.take() {
                return Err(error);
            }
        }

        self.writes.push(Write {
            service: characteristic.service,
            characteristic: characteristic.characteristic,
            data: data.to_vec(),
            mode,
        });

        if let Some((after, token)) = &self.cancel_after {
            if self.writes.len() == *after {
                token.cancel();
            }
        }
        Ok(())
    }

    fn max_write_len(&self) -> usize {
        self.max_write_len
    }

    fn disconnect(&mut self, _connection: Self::Connection) -> Result<()> {
        self.disconnects += 1;
        Ok(())
    }
}

/// Write failure of a dropped link.
pub(crate) fn link_lost() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "link lost"))
}

/// Write failure of an unresponsive hub.
pub(crate) fn write_timeout() -> Error {
    Error::Timeout("write did not complete within 5s".into())
}
