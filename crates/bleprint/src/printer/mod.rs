//! Print job controller.
//!
//! [`Printer`] owns the connection to one device, the queue of command
//! fragments and at most one live print job. `print()` and `resume()` drive
//! the chunked transmission on the caller's task; `pause()`, `cancel()` and
//! `remaining()` are synchronous and may be called from any task while a
//! transmission is pending.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::adapter::{Adapter, ConnectionState};
use crate::buffer::{CommandBuffer, JobBuffer};
use crate::driver::{CommandDriver, EscPosDriver, QrOptions, TextEncoding};
use crate::events::{PrinterEvents, PrinterState};
use crate::job::{ActiveJob, JobOutcome, JobSlot, JobState, Phase};
use crate::options::AdapterOptions;
use crate::transport::{self, Checkpoint, JobControl, Transfer};
use crate::{PrinterError, Result};

#[cfg(test)]
mod tests;

/// Mutable printer state. The lock is never held across an `.await`.
#[derive(Debug)]
struct Inner {
    device_id: Option<String>,
    fragments: CommandBuffer,
    options: AdapterOptions,
    encoding: TextEncoding,
    job: JobSlot,
    next_job_id: u64,
    /// Jobs aborted by an adapter-reported disconnect whose loops have not
    /// yet observed it.
    aborted: HashSet<u64>,
    state: PrinterState,
    /// Whether the adapter state callback has been installed.
    watching: bool,
}

impl Inner {
    /// Record a logical state transition; returns it only when it changed.
    fn transition(&mut self, next: PrinterState) -> Option<PrinterState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

/// Shared half of a printer, reachable from adapter callbacks.
struct Shared {
    inner: Mutex<Inner>,
    events: PrinterEvents,
}

impl Shared {
    fn emit_transition(&self, changed: Option<PrinterState>) {
        if let Some(state) = changed {
            self.events.emit_state(state);
        }
    }

    /// Handle a disconnect the adapter reported on its own.
    fn on_adapter_state(&self, device_id: &str, state: ConnectionState) {
        if state != ConnectionState::Disconnected {
            return;
        }

        let (aborted, changed) = {
            let mut inner = self.inner.lock();
            if inner.device_id.as_deref() != Some(device_id) {
                return;
            }
            inner.device_id = None;
            let aborted = inner.job.take();
            if let Some(job) = &aborted {
                if job.driving {
                    inner.aborted.insert(job.id);
                }
            }
            (aborted, inner.transition(PrinterState::Disconnected))
        };

        tracing::warn!(device = %device_id, "Device disconnected unexpectedly");
        if let Some(job) = aborted {
            tracing::error!(
                job = job.id,
                sent = job.cursor.offset(),
                total = job.cursor.total(),
                "Print job aborted by disconnect"
            );
            self.events
                .emit_error(PrinterError::DeviceDisconnectedDuringJob);
        }
        self.emit_transition(changed);
        self.events.emit_disconnected(device_id);
    }
}

/// Ties one transmission loop to one job id.
struct Driving<'a> {
    shared: &'a Shared,
    job_id: u64,
}

impl JobControl for Driving<'_> {
    fn checkpoint(&self) -> Checkpoint {
        let mut inner = self.shared.inner.lock();
        match inner.job.get_mut(self.job_id) {
            None => Checkpoint::Detached,
            Some(job) if job.phase == Phase::Paused => {
                job.driving = false;
                Checkpoint::Suspend
            }
            Some(_) => Checkpoint::Continue,
        }
    }

    fn is_live(&self) -> bool {
        self.shared.inner.lock().job.get_mut(self.job_id).is_some()
    }

    fn commit(&self, end: usize) -> bool {
        let total = {
            let mut inner = self.shared.inner.lock();
            let Some(job) = inner.job.get_mut(self.job_id) else {
                return false;
            };
            job.cursor.advance_to(end);
            job.cursor.total()
        };
        self.shared.events.emit_progress(end, total);
        true
    }
}

/// A Bluetooth thermal printer: connection, command queue and print jobs.
pub struct Printer {
    adapter: Arc<dyn Adapter>,
    driver: Box<dyn CommandDriver>,
    shared: Arc<Shared>,
}

impl Printer {
    /// Create a printer using the ESC/POS driver.
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self::with_driver(adapter, Box::new(EscPosDriver::new()))
    }

    /// Create a printer with a custom command driver.
    pub fn with_driver(adapter: Arc<dyn Adapter>, driver: Box<dyn CommandDriver>) -> Self {
        let inner = Inner {
            device_id: None,
            fragments: CommandBuffer::new(),
            options: AdapterOptions::default(),
            encoding: TextEncoding::default(),
            job: JobSlot::Idle,
            next_job_id: 1,
            aborted: HashSet::new(),
            state: PrinterState::Disconnected,
            watching: false,
        };
        Self {
            adapter,
            driver,
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                events: PrinterEvents::new(),
            }),
        }
    }

    /// Event channels of this printer.
    pub fn events(&self) -> &PrinterEvents {
        &self.shared.events
    }

    /// Current logical printer state.
    pub fn state(&self) -> PrinterState {
        self.shared.inner.lock().state
    }

    /// State of the current job.
    pub fn job_state(&self) -> JobState {
        self.shared.inner.lock().job.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.inner.lock().device_id.is_some()
    }

    pub fn device_id(&self) -> Option<String> {
        self.shared.inner.lock().device_id.clone()
    }

    /// Bytes of the live job not yet acknowledged; `0` without a job.
    pub fn remaining(&self) -> usize {
        self.shared.inner.lock().job.remaining()
    }

    /// Number of fragments queued for the next `print()`.
    pub fn pending_fragments(&self) -> usize {
        self.shared.inner.lock().fragments.len()
    }

    pub fn options(&self) -> AdapterOptions {
        self.shared.inner.lock().options
    }

    /// Set the transmission options used by later jobs.
    pub fn set_options(&self, options: AdapterOptions) -> &Self {
        self.shared.inner.lock().options = options.normalized();
        self
    }

    /// Set the encoding used by [`Printer::text`].
    pub fn set_encoding(&self, encoding: TextEncoding) -> &Self {
        self.shared.inner.lock().encoding = encoding;
        self
    }

    /// Return `err` to the caller after publishing it on the error channel.
    fn fail<T>(&self, err: PrinterError) -> Result<T> {
        self.shared.events.emit_error(err.clone());
        Err(err)
    }

    // -- Connection --

    /// Connect to `device_id` through the adapter.
    pub async fn connect(&self, device_id: &str) -> Result<&Self> {
        tracing::info!(device = %device_id, adapter = self.adapter.name(), "Connecting to printer");

        if let Err(e) = self.adapter.connect(device_id).await {
            tracing::error!(device = %device_id, error = %e, "Connection failed");
            return self.fail(PrinterError::ConnectionFailed(e));
        }

        let install_watch = {
            let mut inner = self.shared.inner.lock();
            !std::mem::replace(&mut inner.watching, true)
        };
        if install_watch {
            let weak: Weak<Shared> = Arc::downgrade(&self.shared);
            self.adapter.on_state_change(Arc::new(move |id: &str, state: ConnectionState| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_adapter_state(id, state);
                }
            }));
        }

        let changed = {
            let mut inner = self.shared.inner.lock();
            inner.device_id = Some(device_id.to_string());
            let next = inner.job.state().printer_state();
            inner.transition(next)
        };
        self.shared.emit_transition(changed);
        self.shared.events.emit_connected(device_id);

        tracing::info!(device = %device_id, "Printer connected");
        Ok(self)
    }

    /// Disconnect from the current device.
    ///
    /// A live job is dropped as if cancelled. Adapter failures are logged and
    /// published on the error channel, but local state still becomes
    /// disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let (device_id, dropped) = {
            let mut inner = self.shared.inner.lock();
            let Some(device_id) = inner.device_id.take() else {
                return Ok(());
            };
            (device_id, inner.job.take())
        };

        if let Some(job) = dropped {
            tracing::info!(job = job.id, "Dropping print job on disconnect");
        }

        tracing::info!(device = %device_id, "Disconnecting printer");
        if let Err(e) = self.adapter.disconnect(&device_id).await {
            tracing::warn!(device = %device_id, error = %e, "Adapter disconnect failed; continuing");
            self.shared
                .events
                .emit_error(PrinterError::DisconnectFailed(e));
        }

        let changed = self.shared.inner.lock().transition(PrinterState::Disconnected);
        self.shared.emit_transition(changed);
        self.shared.events.emit_disconnected(&device_id);
        Ok(())
    }

    // -- Command queue --

    fn queue(&self, fragments: Vec<Vec<u8>>) -> Result<&Self> {
        let mut inner = self.shared.inner.lock();
        if inner.device_id.is_none() {
            drop(inner);
            return self.fail(PrinterError::NotConnected);
        }
        inner.fragments.extend(fragments);
        Ok(self)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            self.fail(PrinterError::NotConnected)
        }
    }

    /// Queue a printer reset.
    pub fn init(&self) -> Result<&Self> {
        self.queue(self.driver.init())
    }

    /// Queue a line of text in the printer's configured encoding.
    pub fn text(&self, content: &str) -> Result<&Self> {
        let encoding = self.shared.inner.lock().encoding;
        self.text_with(content, encoding)
    }

    /// Queue a line of text in an explicit encoding.
    pub fn text_with(&self, content: &str, encoding: TextEncoding) -> Result<&Self> {
        self.queue(self.driver.text(content, encoding))
    }

    pub fn feed(&self, lines: u32) -> Result<&Self> {
        self.queue(self.driver.feed(lines))
    }

    pub fn cut(&self) -> Result<&Self> {
        self.queue(self.driver.cut())
    }

    /// Queue an RGBA image (4 bytes per pixel).
    pub fn image(&self, rgba: &[u8], width: u32, height: u32) -> Result<&Self> {
        self.ensure_connected()?;
        match self.driver.image(rgba, width, height) {
            Ok(fragments) => self.queue(fragments),
            Err(e) => self.fail(e.into()),
        }
    }

    pub fn qr(&self, content: &str, options: &QrOptions) -> Result<&Self> {
        self.queue(self.driver.qr(content, options))
    }

    /// Queue bytes that bypass the driver.
    pub fn raw(&self, bytes: impl Into<Vec<u8>>) -> Result<&Self> {
        self.queue(vec![bytes.into()])
    }

    // -- Jobs --

    /// Send everything queued since the last `print()` as one job.
    pub async fn print(&self) -> Result<JobOutcome> {
        let options = self.options();
        self.print_with_options(options).await
    }

    /// Like [`Printer::print`] with options for this job only.
    pub async fn print_with_options(&self, options: AdapterOptions) -> Result<JobOutcome> {
        let options = options.normalized();
        let started = {
            let mut inner = self.shared.inner.lock();
            match inner.device_id.clone() {
                None => Err(PrinterError::NotConnected),
                Some(_) if inner.job.is_active() => Err(PrinterError::PrintJobAlreadyInProgress),
                Some(device_id) => {
                    let id = inner.next_job_id;
                    inner.next_job_id += 1;
                    let buffer = inner.fragments.freeze();
                    inner.job = JobSlot::Active(ActiveJob::new(id, buffer.clone(), options));
                    Ok((id, device_id, buffer, inner.transition(PrinterState::Printing)))
                }
            }
        };

        let (job_id, device_id, buffer, changed) = match started {
            Ok(started) => started,
            Err(e) => {
                tracing::warn!(error = %e, "Print rejected");
                return self.fail(e);
            }
        };

        tracing::info!(
            job = job_id,
            bytes = buffer.len(),
            chunks = options.chunk_count(buffer.len()),
            chunk_size = options.chunk_size,
            "Print job started"
        );
        self.shared.emit_transition(changed);

        self.drive(job_id, &device_id, buffer, 0, options).await
    }

    /// Request a pause at the next chunk boundary. No-op unless printing.
    pub fn pause(&self) {
        let changed = {
            let mut inner = self.shared.inner.lock();
            let Some(job) = inner.job.current_mut() else {
                return;
            };
            if job.phase != Phase::Printing {
                return;
            }
            job.phase = Phase::Paused;
            tracing::info!(job = job.id, sent = job.cursor.offset(), "Print job pausing");
            inner.transition(PrinterState::Paused)
        };
        self.shared.emit_transition(changed);
    }

    /// Continue a paused job from its last acknowledged byte.
    ///
    /// Returns `Ok(None)` when there is no paused job.
    pub async fn resume(&self) -> Result<Option<JobOutcome>> {
        let resumed = {
            let mut inner = self.shared.inner.lock();
            let Some(device_id) = inner.device_id.clone() else {
                return Ok(None);
            };
            let Some(job) = inner.job.current_mut() else {
                return Ok(None);
            };
            if job.phase != Phase::Paused {
                return Ok(None);
            }
            job.phase = Phase::Printing;
            tracing::info!(job = job.id, sent = job.cursor.offset(), "Print job resuming");

            let restart = (!job.driving).then(|| {
                job.driving = true;
                (job.id, job.buffer.clone(), job.cursor.offset(), job.options)
            });
            (device_id, restart, inner.transition(PrinterState::Printing))
        };

        let (device_id, restart, changed) = resumed;
        self.shared.emit_transition(changed);

        match restart {
            Some((job_id, buffer, offset, options)) => self
                .drive(job_id, &device_id, buffer, offset, options)
                .await
                .map(Some),
            None => Ok(Some(JobOutcome::Continuing)),
        }
    }

    /// Drop the live job immediately. No-op without a job.
    ///
    /// A write already handed to the adapter may still settle afterwards;
    /// its result is ignored.
    pub fn cancel(&self) {
        let changed = {
            let mut inner = self.shared.inner.lock();
            let Some(job) = inner.job.take() else {
                return;
            };
            tracing::info!(
                job = job.id,
                sent = job.cursor.offset(),
                total = job.cursor.total(),
                "Print job cancelled"
            );
            inner.transition(PrinterState::Connected)
        };
        self.shared.emit_transition(changed);
    }

    /// Run the transmission loop for `job_id` and settle the job afterwards.
    async fn drive(
        &self,
        job_id: u64,
        device_id: &str,
        buffer: JobBuffer,
        offset: usize,
        options: AdapterOptions,
    ) -> Result<JobOutcome> {
        let control = Driving {
            shared: &self.shared,
            job_id,
        };
        let result = transport::transmit(
            self.adapter.as_ref(),
            device_id,
            &buffer,
            offset,
            &options,
            &control,
        )
        .await;

        match result {
            Ok(Transfer::Finished) => {
                let changed = {
                    let mut inner = self.shared.inner.lock();
                    match inner.job.take_if(job_id) {
                        Some(_) => Some(inner.transition(PrinterState::Connected)),
                        None => None,
                    }
                };
                let Some(changed) = changed else {
                    // Cancelled while the last chunk was in flight.
                    return self.detached(job_id);
                };
                tracing::info!(job = job_id, bytes = buffer.len(), "Print job completed");
                self.shared.emit_transition(changed);
                self.shared.events.emit_print_complete();
                Ok(JobOutcome::Completed)
            }
            Ok(Transfer::Suspended { offset }) => {
                tracing::info!(job = job_id, sent = offset, total = buffer.len(), "Print job paused");
                Ok(JobOutcome::Paused)
            }
            Ok(Transfer::Detached { .. }) => self.detached(job_id),
            Err(err) => {
                let changed = {
                    let mut inner = self.shared.inner.lock();
                    match inner.job.take_if(job_id) {
                        Some(_) => Some(inner.transition(PrinterState::Connected)),
                        None => None,
                    }
                };
                let Some(changed) = changed else {
                    return self.detached(job_id);
                };
                tracing::error!(job = job_id, error = %err, "Print job failed");
                self.shared.emit_transition(changed);
                self.fail(err)
            }
        }
    }

    /// Outcome for a loop whose job vanished under it.
    fn detached(&self, job_id: u64) -> Result<JobOutcome> {
        let aborted = self.shared.inner.lock().aborted.remove(&job_id);
        if aborted {
            // Already published on the error channel by the disconnect handler.
            Err(PrinterError::DeviceDisconnectedDuringJob)
        } else {
            tracing::debug!(job = job_id, "Transmission stopped for cancelled job");
            Ok(JobOutcome::Cancelled)
        }
    }
}

impl std::fmt::Debug for Printer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Printer")
            .field("adapter", &self.adapter.name())
            .field("driver", &self.driver.name())
            .field("device_id", &inner.device_id)
            .field("state", &inner.state)
            .field("job", &inner.job.state())
            .finish()
    }
}
