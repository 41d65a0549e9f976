//! Transmission options.
//!
//! These options control how a job buffer is split into BLE writes, how long
//! to wait between writes, and how often a failed write is retried.

use std::time::Duration;

/// Smallest accepted chunk size in bytes.
pub const MIN_CHUNK_SIZE: usize = 1;
/// Largest accepted chunk size in bytes.
pub const MAX_CHUNK_SIZE: usize = 256;
/// Default chunk size (BLE 4.0 minimum ATT payload).
pub const DEFAULT_CHUNK_SIZE: usize = 20;

pub const MIN_DELAY: Duration = Duration::from_millis(10);
pub const MAX_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_DELAY: Duration = Duration::from_millis(20);

pub const MIN_RETRIES: u32 = 1;
pub const MAX_RETRIES: u32 = 10;
pub const DEFAULT_RETRIES: u32 = 3;

/// Configuration for chunked writes to the adapter.
///
/// Every field is kept within its bounds; the `with_*` builders clamp
/// out-of-range values instead of rejecting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterOptions {
    /// Maximum number of bytes handed to a single adapter write.
    pub chunk_size: usize,

    /// Pause between two successful chunk writes. Also the base unit of the
    /// retry backoff.
    pub delay: Duration,

    /// Additional attempts for a chunk after its first write failed.
    pub retries: u32,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            delay: DEFAULT_DELAY,
            retries: DEFAULT_RETRIES,
        }
    }
}

impl AdapterOptions {
    /// Create options with the BLE-safe defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the chunk size, clamped to `1..=256`.
    pub fn with_chunk_size(mut self, val: usize) -> Self {
        let clamped = val.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        if clamped != val {
            tracing::warn!(requested = val, used = clamped, "chunk_size out of range");
        }
        self.chunk_size = clamped;
        self
    }

    /// Builder: set the inter-chunk delay, clamped to `10ms..=100ms`.
    pub fn with_delay(mut self, val: Duration) -> Self {
        let clamped = val.clamp(MIN_DELAY, MAX_DELAY);
        if clamped != val {
            tracing::warn!(
                requested_ms = val.as_millis() as u64,
                used_ms = clamped.as_millis() as u64,
                "delay out of range"
            );
        }
        self.delay = clamped;
        self
    }

    /// Builder: set the inter-chunk delay in milliseconds.
    pub fn with_delay_ms(self, ms: u64) -> Self {
        self.with_delay(Duration::from_millis(ms))
    }

    /// Builder: set the retry count, clamped to `1..=10`.
    pub fn with_retries(mut self, val: u32) -> Self {
        let clamped = val.clamp(MIN_RETRIES, MAX_RETRIES);
        if clamped != val {
            tracing::warn!(requested = val, used = clamped, "retries out of range");
        }
        self.retries = clamped;
        self
    }

    /// Re-apply the bounds to options built by struct literal.
    pub fn normalized(self) -> Self {
        Self::new()
            .with_chunk_size(self.chunk_size)
            .with_delay(self.delay)
            .with_retries(self.retries)
    }

    /// Number of chunks needed for `total` bytes.
    pub fn chunk_count(&self, total: usize) -> usize {
        total.div_ceil(self.chunk_size)
    }

    /// Wait before retry number `retry` (1-based) of a failed chunk.
    ///
    /// Grows linearly with the retry number so each wait is strictly longer
    /// than the previous one.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.delay * (retry + 1)
    }
}
