//! Printer lifecycle events.
//!
//! Each event kind has its own broadcast channel so payloads are typed.
//! Channels belong to one [`crate::Printer`]; there is no global registry.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::PrinterError;

/// Capacity of each event channel. Slow subscribers observe `Lagged`.
const CHANNEL_CAPACITY: usize = 64;

/// Logical printer state published on the state-change channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterState {
    Disconnected,
    Connected,
    Printing,
    Paused,
}

/// Bytes acknowledged so far for the running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub sent: usize,
    pub total: usize,
}

/// Typed event channels of one printer.
#[derive(Debug, Clone)]
pub struct PrinterEvents {
    state_change: broadcast::Sender<PrinterState>,
    progress: broadcast::Sender<Progress>,
    error: broadcast::Sender<PrinterError>,
    connected: broadcast::Sender<String>,
    disconnected: broadcast::Sender<String>,
    print_complete: broadcast::Sender<()>,
}

impl Default for PrinterEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl PrinterEvents {
    pub fn new() -> Self {
        Self {
            state_change: broadcast::channel(CHANNEL_CAPACITY).0,
            progress: broadcast::channel(CHANNEL_CAPACITY).0,
            error: broadcast::channel(CHANNEL_CAPACITY).0,
            connected: broadcast::channel(CHANNEL_CAPACITY).0,
            disconnected: broadcast::channel(CHANNEL_CAPACITY).0,
            print_complete: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe_state_change(&self) -> broadcast::Receiver<PrinterState> {
        self.state_change.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn subscribe_error(&self) -> broadcast::Receiver<PrinterError> {
        self.error.subscribe()
    }

    pub fn subscribe_connected(&self) -> broadcast::Receiver<String> {
        self.connected.subscribe()
    }

    pub fn subscribe_disconnected(&self) -> broadcast::Receiver<String> {
        self.disconnected.subscribe()
    }

    pub fn subscribe_print_complete(&self) -> broadcast::Receiver<()> {
        self.print_complete.subscribe()
    }

    // Sends fail only when nobody is subscribed, which is not an error here.

    pub(crate) fn emit_state(&self, state: PrinterState) {
        tracing::debug!(?state, "Printer state changed");
        let _ = self.state_change.send(state);
    }

    /// Publish progress when someone listens; skipping it changes nothing else.
    pub(crate) fn emit_progress(&self, sent: usize, total: usize) {
        if self.progress.receiver_count() > 0 {
            let _ = self.progress.send(Progress { sent, total });
        }
    }

    pub(crate) fn emit_error(&self, err: PrinterError) {
        let _ = self.error.send(err);
    }

    pub(crate) fn emit_connected(&self, device_id: &str) {
        let _ = self.connected.send(device_id.to_string());
    }

    pub(crate) fn emit_disconnected(&self, device_id: &str) {
        let _ = self.disconnected.send(device_id.to_string());
    }

    pub(crate) fn emit_print_complete(&self) {
        let _ = self.print_complete.send(());
    }
}
