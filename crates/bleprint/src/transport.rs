//! Chunked transmission protocol.
//!
//! Splits a buffer into `chunk_size` pieces and writes them one by one,
//! waiting `delay` between chunks and retrying a failed chunk with a growing
//! backoff. The loop yields only at two kinds of points: while a write is
//! outstanding and while a timer runs. Pause and cancellation are observed
//! through [`JobControl`] between chunks, so a chunk that has been handed to
//! the adapter always settles (or exhausts its retries) before the loop stops.

use crate::adapter::Adapter;
use crate::options::AdapterOptions;
use crate::{PrinterError, Result};

/// Decision taken at the top of every loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Send the next chunk.
    Continue,
    /// Stop here; the job stays resumable from the current offset.
    Suspend,
    /// The job no longer exists; stop without touching anything.
    Detached,
}

/// How a transmission loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Every byte was acknowledged.
    Finished,
    /// Stopped at a checkpoint with `offset` bytes acknowledged.
    Suspended { offset: usize },
    /// The job went away; `offset` is the last offset this loop committed.
    Detached { offset: usize },
}

/// Link between the transmission loop and whoever owns the job.
pub trait JobControl: Send + Sync {
    /// Called before each chunk.
    fn checkpoint(&self) -> Checkpoint;

    /// Whether the job still exists. Consulted before each retry.
    fn is_live(&self) -> bool;

    /// Record that all bytes before `end` were acknowledged.
    ///
    /// Returns `false` when the job no longer exists, in which case the
    /// loop must not treat the bytes as delivered.
    fn commit(&self, end: usize) -> bool;
}

/// Control for one-off transfers with no pause or cancellation.
struct Unattended;

impl JobControl for Unattended {
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint::Continue
    }

    fn is_live(&self) -> bool {
        true
    }

    fn commit(&self, _end: usize) -> bool {
        true
    }
}

/// Send `data[start..]` to `device_id` chunk by chunk.
///
/// Returns [`PrinterError::WriteFailed`] when one chunk fails `1 + retries`
/// times; no later chunk is attempted in that case.
pub async fn transmit(
    adapter: &dyn Adapter,
    device_id: &str,
    data: &[u8],
    start: usize,
    options: &AdapterOptions,
    control: &dyn JobControl,
) -> Result<Transfer> {
    let total = data.len();
    let chunks = options.chunk_count(total);
    let mut offset = start.min(total);

    tracing::debug!(
        adapter = adapter.name(),
        start = offset,
        total,
        chunk_count = chunks,
        chunk_size = options.chunk_size,
        "Transmitting buffer in chunks"
    );

    while offset < total {
        match control.checkpoint() {
            Checkpoint::Continue => {}
            Checkpoint::Suspend => return Ok(Transfer::Suspended { offset }),
            Checkpoint::Detached => return Ok(Transfer::Detached { offset }),
        }

        let end = (offset + options.chunk_size).min(total);
        let index = offset / options.chunk_size + 1;

        let delivered = write_chunk(
            adapter,
            device_id,
            &data[offset..end],
            options,
            control,
            (index, chunks),
        )
        .await?;
        if !delivered || !control.commit(end) {
            return Ok(Transfer::Detached { offset });
        }

        tracing::trace!(chunk = index, chunks, sent = end, total, "Chunk acknowledged");
        offset = end;

        if offset < total {
            tokio::time::sleep(options.delay).await;
        }
    }

    Ok(Transfer::Finished)
}

/// Write one chunk, retrying up to `options.retries` times.
///
/// Returns `Ok(false)` if the job disappeared between attempts.
async fn write_chunk(
    adapter: &dyn Adapter,
    device_id: &str,
    chunk: &[u8],
    options: &AdapterOptions,
    control: &dyn JobControl,
    (index, chunks): (usize, usize),
) -> Result<bool> {
    let mut retry = 0;
    loop {
        match adapter.write(device_id, chunk, options).await {
            Ok(()) => return Ok(true),
            Err(source) if retry >= options.retries => {
                tracing::error!(
                    chunk = index,
                    chunks,
                    attempts = retry + 1,
                    error = %source,
                    "Chunk write failed, giving up"
                );
                return Err(PrinterError::WriteFailed {
                    chunk: index,
                    chunks,
                    source,
                });
            }
            Err(err) => {
                retry += 1;
                let wait = options.backoff(retry);
                tracing::warn!(
                    chunk = index,
                    chunks,
                    retry,
                    max_retries = options.retries,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "Chunk write failed, retrying"
                );
                tokio::time::sleep(wait).await;
                if !control.is_live() {
                    return Ok(false);
                }
            }
        }
    }
}

/// Send a whole buffer with the chunk/retry/pacing protocol and no job
/// control.
pub async fn write_chunked(
    adapter: &dyn Adapter,
    device_id: &str,
    data: &[u8],
    options: &AdapterOptions,
) -> Result<()> {
    transmit(adapter, device_id, data, 0, options, &Unattended)
        .await
        .map(|_| ())
}
