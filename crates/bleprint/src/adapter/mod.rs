//! Platform adapter abstraction.
//!
//! An adapter owns the platform BLE calls for one or more devices. The print
//! engine treats every [`Adapter::write`] as exactly one physical write of an
//! already-chunked piece; chunking, pacing and retries live in
//! [`crate::transport`].

#[cfg(feature = "ble")]
pub mod ble;
#[cfg(feature = "ble")]
mod ble_init;
pub mod dry_run;

use std::sync::Arc;

use async_trait::async_trait;

use crate::options::AdapterOptions;

/// Errors reported by an adapter implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("BLE adapter initialization failed: {0}")]
    Init(String),

    #[error("BLE connection error: {0}")]
    Connect(String),

    #[error("BLE disconnect error: {0}")]
    Disconnect(String),

    #[error("BLE write error: {0}")]
    Write(String),

    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Missing writable characteristic on connected device")]
    MissingCharacteristic,

    #[error("Device '{0}' is not connected")]
    NotConnected(String),

    #[error("Injected failure: {0}")]
    Injected(String),
}

/// Connection state reported by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Callback invoked with `(device_id, state)` on unsolicited state changes.
pub type StateCallback = Arc<dyn Fn(&str, ConnectionState) + Send + Sync>;

/// Interface implemented by each platform's BLE layer.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Human-readable adapter name for logs (e.g. "btleplug", "dry-run").
    fn name(&self) -> &str;

    /// Open a connection to `device_id`.
    async fn connect(&self, device_id: &str) -> Result<(), AdapterError>;

    /// Close the connection to `device_id`.
    async fn disconnect(&self, device_id: &str) -> Result<(), AdapterError>;

    /// Perform one write of `data` to the device's write characteristic.
    async fn write(
        &self,
        device_id: &str,
        data: &[u8],
        options: &AdapterOptions,
    ) -> Result<(), AdapterError>;

    /// Register a callback for state changes the adapter did not initiate,
    /// such as the peripheral dropping the link.
    ///
    /// Adapters without such notifications keep the default no-op.
    fn on_state_change(&self, callback: StateCallback) {
        let _ = callback;
    }
}
