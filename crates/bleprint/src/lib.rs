//! Bluetooth thermal printer client.
//!
//! Queues high-level print operations through a [`CommandDriver`], freezes
//! them into one job buffer on [`Printer::print`], and streams the buffer to
//! a BLE peripheral through an [`Adapter`] in small, paced, retried chunks
//! that can be paused, resumed and cancelled between chunk boundaries.

pub mod adapter;
pub mod buffer;
pub mod driver;
pub mod events;
pub mod job;
pub mod options;
pub mod printer;
pub mod transport;

// Re-exports for convenience
pub use adapter::dry_run::DryRunAdapter;
pub use adapter::{Adapter, AdapterError, ConnectionState};
pub use driver::{CommandDriver, DriverError, EscPosDriver, QrOptions, TextEncoding};
pub use events::{PrinterEvents, PrinterState, Progress};
pub use job::{JobOutcome, JobState};
pub use options::AdapterOptions;
pub use printer::Printer;

#[cfg(feature = "ble")]
pub use adapter::ble::BleAdapter;

/// Errors surfaced by [`Printer`] operations and on its error channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PrinterError {
    #[error("Not connected to any device")]
    NotConnected,

    #[error("A print job is already in progress")]
    PrintJobAlreadyInProgress,

    #[error("Write failed on chunk {chunk}/{chunks}: {source}")]
    WriteFailed {
        /// 1-based index of the chunk that exhausted its retries.
        chunk: usize,
        /// Total number of chunks in the job.
        chunks: usize,
        source: AdapterError,
    },

    #[error("Device disconnected while a print job was active")]
    DeviceDisconnectedDuringJob,

    #[error("Connection failed: {0}")]
    ConnectionFailed(AdapterError),

    #[error("Disconnect failed: {0}")]
    DisconnectFailed(AdapterError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Result type alias for printer operations.
pub type Result<T> = std::result::Result<T, PrinterError>;
