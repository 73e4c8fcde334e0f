//! Native Bluetooth LE transport using the `btleplug` crate.
//!
//! `btleplug` is async; this module drives it from a private `tokio`
//! runtime so that the rest of the crate can stay blocking. Every radio
//! operation is bounded by [`BleTransport::with_timeout`].

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, trace, warn};
use tokio::runtime::Runtime;
use uuid::Uuid;

use crate::cancel::{CANCEL_POLL, CancelToken};
use crate::error::{Error, Result};
use crate::transport::{Endpoint, Transport, WriteMode};

/// Default bound for connect, service discovery and each write.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest attribute value a single GATT write can carry.
///
/// btleplug does not report the negotiated MTU, so this is the fixed ATT
/// attribute limit rather than a per-link value. Long writes are split by
/// the platform stack; the largest hub frame is 105 bytes.
pub const MAX_ATTRIBUTE_LEN: usize = 512;

/// An open BLE connection.
pub struct BleConnection {
    peripheral: Peripheral,
    name: String,
}

/// A resolved GATT characteristic.
pub struct BleCharacteristic {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

/// Bluetooth LE transport on the first local adapter.
pub struct BleTransport {
    runtime: Runtime,
    adapter: Adapter,
    discovered: HashMap<String, Peripheral>,
    timeout: Duration,
}

impl BleTransport {
    /// Open the first Bluetooth adapter on this machine.
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;

        let adapter = runtime.block_on(async {
            let manager = Manager::new().await?;
            manager
                .adapters()
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| Error::Connection("No Bluetooth adapter found".into()))
        })?;

        Ok(Self {
            runtime,
            adapter,
            discovered: HashMap::new(),
            timeout: OPERATION_TIMEOUT,
        })
    }

    /// Set the bound for each connect, discovery and write operation.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `fut` on the private runtime, failing after the operation timeout.
    fn block_on_timeout<F, T>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.timeout;
        self.runtime
            .block_on(async { tokio::time::timeout(timeout, fut).await })
            .map_err(|_| Error::Timeout(format!("{what} did not complete within {timeout:?}")))?
    }

    fn remember(&mut self, found: Vec<(Endpoint, Peripheral)>) -> Vec<Endpoint> {
        found
            .into_iter()
            .map(|(endpoint, peripheral)| {
                self.discovered.insert(endpoint.handle.clone(), peripheral);
                endpoint
            })
            .collect()
    }
}

/// Stable string handle for a peripheral.
fn handle_of(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        // Some platforms hide the address; fall back to the platform id.
        format!("{:?}", peripheral.id())
    } else {
        address.to_string()
    }
}

/// Resolves once `cancel` fires.
async fn cancelled(cancel: &CancelToken) {
    while !cancel.is_cancelled() {
        tokio::time::sleep(CANCEL_POLL).await;
    }
}

async fn local_name(peripheral: &Peripheral) -> Result<Option<String>> {
    Ok(peripheral
        .properties()
        .await?
        .and_then(|props| props.local_name))
}

async fn named_endpoint(peripheral: Peripheral) -> Result<Option<(Endpoint, Peripheral)>> {
    Ok(local_name(&peripheral)
        .await?
        .map(|name| (Endpoint::new(name, handle_of(&peripheral)), peripheral)))
}

impl Transport for BleTransport {
    type Connection = BleConnection;
    type Characteristic = BleCharacteristic;

    fn scan(
        &mut self,
        name_prefix: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<Endpoint>> {
        debug!("Scanning for '{name_prefix}' ({timeout:?})");
        let adapter = self.adapter.clone();
        let prefix = name_prefix.to_owned();
        let cancel = cancel.clone();

        let found = self.runtime.block_on(async move {
            let mut events = adapter.events().await?;
            adapter.start_scan(ScanFilter::default()).await?;

            let search = async {
                // Peripherals the adapter already knows about come first.
                for peripheral in adapter.peripherals().await? {
                    if let Some((endpoint, p)) = named_endpoint(peripheral).await? {
                        if endpoint.matches(&prefix) {
                            return Ok(Some((endpoint, p)));
                        }
                    }
                }

                while let Some(event) = events.next().await {
                    let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) =
                        event
                    else {
                        continue;
                    };
                    let peripheral = adapter.peripheral(&id).await?;
                    if let Some((endpoint, p)) = named_endpoint(peripheral).await? {
                        trace!("Saw {endpoint}");
                        if endpoint.matches(&prefix) {
                            return Ok(Some((endpoint, p)));
                        }
                    }
                }
                Ok::<_, Error>(None)
            };

            let result = tokio::select! {
                found = tokio::time::timeout(timeout, search) => found.unwrap_or(Ok(None)),
                () = cancelled(&cancel) => Err(Error::Cancelled),
            };

            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {e}");
            }
            result
        })?;

        Ok(found.map(|hit| self.remember(vec![hit]).remove(0)))
    }

    fn list_endpoints(&mut self, timeout: Duration) -> Result<Vec<Endpoint>> {
        let adapter = self.adapter.clone();

        let found = self.runtime.block_on(async move {
            adapter.start_scan(ScanFilter::default()).await?;
            tokio::time::sleep(timeout).await;
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {e}");
            }

            let mut found = Vec::new();
            for peripheral in adapter.peripherals().await? {
                if let Some(hit) = named_endpoint(peripheral).await? {
                    found.push(hit);
                }
            }
            Ok::<_, Error>(found)
        })?;

        Ok(self.remember(found))
    }

    fn connect(&mut self, endpoint: &Endpoint) -> Result<Self::Connection> {
        let peripheral = self
            .discovered
            .get(&endpoint.handle)
            .cloned()
            .ok_or_else(|| Error::Connection(format!("{endpoint} was not found by a scan")))?;

        debug!("Connecting to {endpoint}");
        let p = peripheral.clone();
        let connected = self.block_on_timeout("connect", async move {
            if !p.is_connected().await? {
                p.connect().await?;
            }
            Ok(())
        });

        if let Err(e) = connected {
            // The link may have come up after the timeout fired.
            let p = peripheral.clone();
            if let Err(d) = self.block_on_timeout("disconnect", async move {
                p.disconnect().await?;
                Ok(())
            }) {
                warn!("Failed to release {endpoint} after connect error: {d}");
            }
            return Err(e);
        }

        Ok(BleConnection {
            peripheral,
            name: endpoint.name.clone(),
        })
    }

    fn characteristic(
        &mut self,
        connection: &Self::Connection,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Self::Characteristic> {
        // Discovery runs on an owned connection so a failure still ends in
        // `disconnect`.
        let peripheral = connection.peripheral.clone();
        self.block_on_timeout("service discovery", async move {
            peripheral.discover_services().await?;
            Ok(())
        })?;

        let found = connection
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| {
                Error::Connection(format!(
                    "{} has no characteristic {characteristic} in service {service}",
                    connection.name
                ))
            })?;

        Ok(BleCharacteristic {
            peripheral: connection.peripheral.clone(),
            characteristic: found,
        })
    }

    fn write(
        &mut self,
        characteristic: &Self::Characteristic,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };

        self.block_on_timeout("write", async {
            characteristic
                .peripheral
                .write(&characteristic.characteristic, data, write_type)
                .await?;
            Ok(())
        })
    }

    fn max_write_len(&self) -> usize {
        MAX_ATTRIBUTE_LEN
    }

    fn disconnect(&mut self, connection: Self::Connection) -> Result<()> {
        debug!("Disconnecting from {}", connection.name);
        let peripheral = connection.peripheral;
        self.block_on_timeout("disconnect", async move {
            peripheral.disconnect().await?;
            Ok(())
        })
    }
}
