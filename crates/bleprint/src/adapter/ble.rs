//! BLE adapter backed by btleplug.
//!
//! Resolves a known peripheral by id or advertised name, connects, picks the
//! write characteristic and performs one GATT write per [`Adapter::write`].
//! Unsolicited disconnects from the platform are forwarded to registered
//! state callbacks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter as PlatformAdapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::ble_init::{init_with_retry, retry_on_this_platform};
use super::{Adapter, AdapterError, ConnectionState, StateCallback};
use crate::options::AdapterOptions;

/// How long to let the platform refresh its peripheral list when the
/// requested device is not cached yet.
const REFRESH_WINDOW: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the peripheral list to refresh.
const REFRESH_POLL: Duration = Duration::from_millis(250);

/// An open link to one peripheral.
#[derive(Clone)]
struct Link {
    peripheral: Peripheral,
    tx_char: Characteristic,
    write_type: WriteType,
}

type Links = Arc<Mutex<HashMap<String, Link>>>;

/// Adapter driving the first platform Bluetooth adapter.
pub struct BleAdapter {
    central: PlatformAdapter,
    tx_uuid: Option<Uuid>,
    links: Links,
    callbacks: Arc<Mutex<Vec<StateCallback>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl BleAdapter {
    /// Initialise the platform BLE stack (first available adapter).
    ///
    /// Retries transient start-up failures of the platform central manager.
    pub async fn new() -> Result<Self, AdapterError> {
        let central = init_with_retry(Self::first_central, retry_on_this_platform).await?;

        Ok(Self {
            central,
            tx_uuid: None,
            links: Arc::default(),
            callbacks: Arc::default(),
            watcher: Mutex::new(None),
        })
    }

    /// Builder: write to this characteristic instead of the first writable one.
    pub fn with_tx_characteristic(mut self, uuid: Uuid) -> Self {
        self.tx_uuid = Some(uuid);
        self
    }

    async fn first_central() -> Result<PlatformAdapter, AdapterError> {
        let manager = Manager::new()
            .await
            .map_err(|e| AdapterError::Init(e.to_string()))?;

        manager
            .adapters()
            .await
            .map_err(|e| AdapterError::Init(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Init("No BLE adapter found".into()))
    }

    /// Find a peripheral the platform already knows, letting it refresh its
    /// list for a short window if needed.
    async fn resolve(&self, device_id: &str) -> Result<Peripheral, AdapterError> {
        if let Some(found) = self.find_known(device_id).await? {
            return Ok(found);
        }

        tracing::debug!(device = %device_id, "Device not cached, refreshing peripheral list");
        self.central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + REFRESH_WINDOW;
        let found = loop {
            if let Some(found) = self.find_known(device_id).await? {
                break Some(found);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(REFRESH_POLL).await;
        };

        if let Err(e) = self.central.stop_scan().await {
            tracing::warn!(error = %e, "Failed to stop BLE scan");
        }

        found.ok_or_else(|| AdapterError::DeviceNotFound(device_id.to_string()))
    }

    async fn find_known(&self, device_id: &str) -> Result<Option<Peripheral>, AdapterError> {
        let peripherals = self
            .central
            .peripherals()
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;

        for peripheral in peripherals {
            let id = peripheral.id().to_string();
            let name = match peripheral.properties().await {
                Ok(Some(props)) => props.local_name.unwrap_or_default(),
                _ => String::new(),
            };
            if device_matches(&id, &name, device_id) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    /// Start forwarding platform disconnect events once.
    async fn ensure_watcher(&self) -> Result<(), AdapterError> {
        if self.watcher.lock().is_some() {
            return Ok(());
        }

        let mut events = self
            .central
            .events()
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;
        let links = self.links.clone();
        let callbacks = self.callbacks.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    forward_disconnect(&links, &callbacks, &id);
                }
            }
        });

        let mut slot = self.watcher.lock();
        if slot.is_some() {
            handle.abort();
        } else {
            *slot = Some(handle);
        }
        Ok(())
    }

    fn link(&self, device_id: &str) -> Result<Link, AdapterError> {
        self.links
            .lock()
            .get(device_id)
            .cloned()
            .ok_or_else(|| AdapterError::NotConnected(device_id.to_string()))
    }
}

impl Drop for BleAdapter {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}

/// Drop the link for a disconnected peripheral and notify callbacks.
fn forward_disconnect(links: &Links, callbacks: &Mutex<Vec<StateCallback>>, id: &PeripheralId) {
    let device_id = {
        let mut links = links.lock();
        let key = links
            .iter()
            .find(|(_, link)| link.peripheral.id() == *id)
            .map(|(key, _)| key.clone());
        key.inspect(|key| {
            links.remove(key);
        })
    };

    let Some(device_id) = device_id else {
        return;
    };
    tracing::warn!(device = %device_id, "BLE peripheral disconnected");
    let callbacks = callbacks.lock().clone();
    for cb in callbacks {
        cb(&device_id, ConnectionState::Disconnected);
    }
}

/// Whether a peripheral with platform `id` and advertised `name` is the
/// device the caller asked for.
fn device_matches(id: &str, name: &str, target: &str) -> bool {
    id.eq_ignore_ascii_case(target)
        || normalize_device_id(id) == normalize_device_id(target)
        || (!name.is_empty() && name.eq_ignore_ascii_case(target))
}

fn normalize_device_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Pick the characteristic to write print data to.
fn select_tx_characteristic<'a>(
    chars: impl IntoIterator<Item = &'a Characteristic>,
    wanted: Option<Uuid>,
) -> Option<&'a Characteristic> {
    let writable = CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE;
    let mut chars = chars.into_iter();
    match wanted {
        Some(uuid) => chars.find(|c| c.uuid == uuid),
        None => chars.find(|c| c.properties.intersects(writable)),
    }
}

fn write_type_for(c: &Characteristic) -> WriteType {
    if c.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        WriteType::WithoutResponse
    } else {
        WriteType::WithResponse
    }
}

#[async_trait]
impl Adapter for BleAdapter {
    fn name(&self) -> &str {
        "btleplug"
    }

    #[tracing::instrument(skip(self))]
    async fn connect(&self, device_id: &str) -> Result<(), AdapterError> {
        let peripheral = self.resolve(device_id).await?;
        tracing::info!(id = %peripheral.id(), "Connecting to device");

        peripheral
            .connect()
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;

        let chars = peripheral.characteristics();
        let tx_char = select_tx_characteristic(&chars, self.tx_uuid)
            .cloned()
            .ok_or(AdapterError::MissingCharacteristic)?;
        let write_type = write_type_for(&tx_char);

        self.ensure_watcher().await?;
        self.links.lock().insert(
            device_id.to_string(),
            Link {
                peripheral,
                tx_char: tx_char.clone(),
                write_type,
            },
        );

        tracing::info!(
            characteristic = %tx_char.uuid,
            ?write_type,
            "Connected and discovered characteristic"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn disconnect(&self, device_id: &str) -> Result<(), AdapterError> {
        let Some(link) = self.links.lock().remove(device_id) else {
            return Ok(());
        };
        tracing::info!("Disconnecting BLE device");
        link.peripheral
            .disconnect()
            .await
            .map_err(|e| AdapterError::Disconnect(e.to_string()))
    }

    async fn write(
        &self,
        device_id: &str,
        data: &[u8],
        _options: &AdapterOptions,
    ) -> Result<(), AdapterError> {
        let link = self.link(device_id)?;
        link.peripheral
            .write(&link.tx_char, data, link.write_type)
            .await
            .map_err(|e| AdapterError::Write(e.to_string()))
    }

    fn on_state_change(&self, callback: StateCallback) {
        self.callbacks.lock().push(callback);
    }
}
