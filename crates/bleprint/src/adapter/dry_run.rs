//! Dry-run adapter.
//!
//! Accepts every connection and records each write instead of sending it.
//! Failures, write latency and unsolicited disconnects can be scripted, which
//! makes it the adapter of choice for tests and for `--dry-run` printing.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Adapter, AdapterError, ConnectionState, StateCallback};
use crate::options::AdapterOptions;

type FailurePolicy = Box<dyn Fn(usize, &[u8]) -> bool + Send + Sync>;

/// One recorded write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub device_id: String,
    pub data: Vec<u8>,
    pub ok: bool,
}

#[derive(Default)]
struct DryRunState {
    connected: HashSet<String>,
    records: Vec<WriteRecord>,
    fail_next: usize,
    callbacks: Vec<StateCallback>,
}

/// Adapter that logs and records writes without touching any radio.
#[derive(Default)]
pub struct DryRunAdapter {
    state: Mutex<DryRunState>,
    policy: Option<FailurePolicy>,
    latency: Option<Duration>,
    refuse_connect: bool,
    refuse_disconnect: bool,
}

impl DryRunAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: decide per attempt whether a write fails.
    ///
    /// The policy receives the zero-based index of the write call across the
    /// adapter's lifetime and the bytes being written.
    pub fn with_failure_policy(
        mut self,
        policy: impl Fn(usize, &[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Builder: make every write take `latency` before it settles.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Builder: make `connect` fail.
    pub fn refusing_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    /// Builder: make `disconnect` fail.
    pub fn refusing_disconnect(mut self) -> Self {
        self.refuse_disconnect = true;
        self
    }

    /// Fail the next `count` writes regardless of the failure policy.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Report an unsolicited disconnect of `device_id` to registered callbacks.
    pub fn simulate_disconnect(&self, device_id: &str) {
        let callbacks = {
            let mut state = self.state.lock();
            state.connected.remove(device_id);
            state.callbacks.clone()
        };
        tracing::info!(device = %device_id, "Dry run: simulated disconnect");
        for cb in callbacks {
            cb(device_id, ConnectionState::Disconnected);
        }
    }

    /// Every write attempt so far, in call order.
    pub fn records(&self) -> Vec<WriteRecord> {
        self.state.lock().records.clone()
    }

    /// Bytes of the successful writes, in call order.
    pub fn written_chunks(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|r| r.ok)
            .map(|r| r.data.clone())
            .collect()
    }

    /// Concatenation of all successful writes.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.written_chunks().concat()
    }

    /// Total number of write calls, failed ones included.
    pub fn write_calls(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.state.lock().connected.contains(device_id)
    }
}

#[async_trait]
impl Adapter for DryRunAdapter {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn connect(&self, device_id: &str) -> Result<(), AdapterError> {
        if self.refuse_connect {
            return Err(AdapterError::Injected(format!("connect to {device_id}")));
        }
        tracing::info!(device = %device_id, "Dry run: connected");
        self.state.lock().connected.insert(device_id.to_string());
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), AdapterError> {
        self.state.lock().connected.remove(device_id);
        if self.refuse_disconnect {
            return Err(AdapterError::Injected(format!("disconnect from {device_id}")));
        }
        tracing::info!(device = %device_id, "Dry run: disconnected");
        Ok(())
    }

    async fn write(
        &self,
        device_id: &str,
        data: &[u8],
        _options: &AdapterOptions,
    ) -> Result<(), AdapterError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if !state.connected.contains(device_id) {
            return Err(AdapterError::NotConnected(device_id.to_string()));
        }

        let index = state.records.len();
        let fail = if state.fail_next > 0 {
            state.fail_next -= 1;
            true
        } else {
            self.policy.as_ref().is_some_and(|policy| policy(index, data))
        };

        state.records.push(WriteRecord {
            device_id: device_id.to_string(),
            data: data.to_vec(),
            ok: !fail,
        });

        if fail {
            tracing::debug!(index, len = data.len(), "Dry run: write failed");
            Err(AdapterError::Injected(format!("write #{index}")))
        } else {
            tracing::debug!(index, len = data.len(), "Dry run: write");
            Ok(())
        }
    }

    fn on_state_change(&self, callback: StateCallback) {
        self.state.lock().callbacks.push(callback);
    }
}
