use std::collections::BTreeSet;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use uuid::Uuid;

use crate::error::DeskError;

use super::controller::DeskTransport;
use super::protocol::{COMMAND_UUID, HEIGHT_UUID, REFERENCE_INPUT_UUID};

/// How long `connect` waits for the configured desk to show up in a scan.
const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECT_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A desk seen during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredDesk {
    pub name: String,
    pub address: String,
}

/// BLE transport for one connected desk.
pub struct BleTransport {
    peripheral: Peripheral,
    characteristics: BTreeSet<Characteristic>,
}

impl BleTransport {
    /// Connect to the desk with the given address, discover its services
    /// and verify the Linak control characteristics are present.
    pub async fn connect(address: &str) -> Result<Self, DeskError> {
        let adapter = default_adapter().await?;

        log::info!("scanning for desk {address}");
        adapter.start_scan(ScanFilter::default()).await?;
        let found = wait_for_address(&adapter, address, SCAN_TIMEOUT).await;
        adapter.stop_scan().await?;
        let peripheral = found?.ok_or_else(|| DeskError::DeskNotFound(address.to_string()))?;

        // Let the BLE stack settle after scanning before we connect.
        sleep(Duration::from_millis(500)).await;

        for attempt in 1..CONNECT_ATTEMPTS {
            match Self::try_connect(&peripheral).await {
                Ok(transport) => return Ok(transport),
                Err(err) => {
                    log::warn!("connection attempt {attempt} failed: {err}");
                    // Tear down a half-open connection before retrying.
                    if let Ok(true) = peripheral.is_connected().await {
                        let _ = peripheral.disconnect().await;
                    }
                    sleep(RETRY_BACKOFF).await;
                }
            }
        }
        Self::try_connect(&peripheral).await
    }

    async fn try_connect(peripheral: &Peripheral) -> Result<Self, DeskError> {
        let connected = timeout(STATUS_TIMEOUT, peripheral.is_connected())
            .await
            .map_err(|_| btleplug::Error::TimedOut(STATUS_TIMEOUT))??;

        if !connected {
            log::info!("establishing connection...");
            timeout(CONNECT_TIMEOUT, peripheral.connect())
                .await
                .map_err(|_| btleplug::Error::TimedOut(CONNECT_TIMEOUT))??;
        }

        log::info!("discovering services...");
        timeout(DISCOVERY_TIMEOUT, peripheral.discover_services())
            .await
            .map_err(|_| btleplug::Error::TimedOut(DISCOVERY_TIMEOUT))??;

        let characteristics = peripheral.characteristics();
        for required in [COMMAND_UUID, HEIGHT_UUID, REFERENCE_INPUT_UUID] {
            if !characteristics.iter().any(|c| c.uuid == required) {
                return Err(DeskError::MissingCharacteristic(required));
            }
        }
        log::info!("desk ready ({} characteristics)", characteristics.len());

        Ok(Self {
            peripheral: peripheral.clone(),
            characteristics,
        })
    }

    /// Disconnect from the desk. Idempotent; teardown failures are logged,
    /// not propagated.
    pub async fn disconnect(&self) {
        match self.peripheral.is_connected().await {
            Ok(true) => {
                if let Err(err) = self.peripheral.disconnect().await {
                    log::warn!("failed to disconnect from desk: {err}");
                } else {
                    log::info!("disconnected from desk");
                }
            }
            Ok(false) => {}
            Err(err) => log::warn!("could not check connection state: {err}"),
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic, DeskError> {
        self.characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .ok_or(DeskError::MissingCharacteristic(uuid))
    }
}

impl DeskTransport for BleTransport {
    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, DeskError> {
        let characteristic = self.characteristic(uuid)?;
        Ok(self.peripheral.read(characteristic).await?)
    }

    async fn write_characteristic(&self, uuid: Uuid, payload: &[u8]) -> Result<(), DeskError> {
        let characteristic = self.characteristic(uuid)?;
        Ok(self
            .peripheral
            .write(characteristic, payload, WriteType::WithoutResponse)
            .await?)
    }
}

/// Scan for the first peripheral that advertises like a Linak desk.
pub async fn discover_desk(scan_timeout: Duration) -> Result<Option<DiscoveredDesk>, DeskError> {
    let adapter = default_adapter().await?;

    log::info!("scanning for Linak desks ({}s)", scan_timeout.as_secs());
    adapter.start_scan(ScanFilter::default()).await?;
    let found = wait_for_desk(&adapter, scan_timeout).await;
    adapter.stop_scan().await?;
    found
}

async fn default_adapter() -> Result<Adapter, DeskError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(DeskError::NoAdapter)
}

async fn wait_for_desk(
    adapter: &Adapter,
    scan_timeout: Duration,
) -> Result<Option<DiscoveredDesk>, DeskError> {
    // Desks the adapter already knows about from an earlier scan.
    for peripheral in adapter.peripherals().await? {
        if let Some(desk) = desk_identity(&peripheral).await {
            return Ok(Some(desk));
        }
    }

    let mut events = adapter.events().await?;
    let deadline = Instant::now() + scan_timeout;
    while let Ok(Some(event)) = timeout_at(deadline, events.next()).await {
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => continue,
        };
        let peripheral = match skip_vanished(adapter.peripheral(&id).await) {
            Some(peripheral) => peripheral,
            None => continue,
        };
        if let Some(desk) = desk_identity(&peripheral).await {
            return Ok(Some(desk));
        }
    }
    Ok(None)
}

async fn wait_for_address(
    adapter: &Adapter,
    address: &str,
    wait: Duration,
) -> Result<Option<Peripheral>, DeskError> {
    for peripheral in adapter.peripherals().await? {
        if matches_address(&peripheral, address) {
            return Ok(Some(peripheral));
        }
    }

    let mut events = adapter.events().await?;
    let deadline = Instant::now() + wait;
    while let Ok(Some(event)) = timeout_at(deadline, events.next()).await {
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => continue,
        };
        let peripheral = match skip_vanished(adapter.peripheral(&id).await) {
            Some(peripheral) => peripheral,
            None => continue,
        };
        if matches_address(&peripheral, address) {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

/// Name and address, if this peripheral advertises like a Linak desk.
async fn desk_identity(peripheral: &Peripheral) -> Option<DiscoveredDesk> {
    let props = peripheral.properties().await.ok()??;
    let name = props.local_name?;
    if !looks_like_desk(&name) {
        return None;
    }
    log::info!("found desk candidate: {name}");
    Some(DiscoveredDesk {
        name,
        address: peripheral.address().to_string(),
    })
}

fn matches_address(peripheral: &Peripheral, address: &str) -> bool {
    peripheral
        .address()
        .to_string()
        .eq_ignore_ascii_case(address)
}

/// Peripherals can disappear between their discovery event and the lookup;
/// a failed lookup skips that peripheral rather than ending the scan.
fn skip_vanished<T>(lookup: Result<T, btleplug::Error>) -> Option<T> {
    match lookup {
        Ok(value) => Some(value),
        Err(err) => {
            log::debug!("peripheral lookup failed during scan: {err}");
            None
        }
    }
}

/// Linak desks advertise names like "Desk 7743", "DPG1C" or "LINAK A/S".
fn looks_like_desk(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("desk") || name.contains("dpg") || name.contains("linak")
}
