//! Print job bookkeeping.
//!
//! A printer holds at most one live job. [`JobSlot`] makes "no job" and
//! "job in flight" distinct variants instead of an optional buffer.

use crate::buffer::JobBuffer;
use crate::events::PrinterState;
use crate::options::AdapterOptions;

/// Lifecycle state of the current print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NoJob,
    Printing,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    /// Whether a job buffer exists in this state.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Printing | Self::Paused)
    }

    /// Logical printer state of a connected printer in this job state.
    pub fn printer_state(self) -> PrinterState {
        match self {
            Self::Printing => PrinterState::Printing,
            Self::Paused => PrinterState::Paused,
            Self::NoJob | Self::Completed | Self::Cancelled | Self::Failed => {
                PrinterState::Connected
            }
        }
    }
}

/// How a `print()` or `resume()` call handed control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every byte was acknowledged.
    Completed,
    /// Stopped at a chunk boundary; `resume()` continues from there.
    Paused,
    /// The job was dropped by `cancel()` or a local `disconnect()`.
    Cancelled,
    /// The pause was lifted before the running transmission reached its next
    /// chunk boundary, so that transmission carries on and reports the end
    /// of the job to its own caller.
    Continuing,
}

/// Send position within a job buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCursor {
    offset: usize,
    total: usize,
}

impl JobCursor {
    pub fn new(total: usize) -> Self {
        Self { offset: 0, total }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.total - self.offset
    }

    /// Move the offset forward to `end`. Never moves backwards or past the end.
    pub(crate) fn advance_to(&mut self, end: usize) {
        debug_assert!(end >= self.offset && end <= self.total);
        self.offset = end.clamp(self.offset, self.total);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Printing,
    Paused,
}

/// The live job: its buffer, cursor and transmission bookkeeping.
#[derive(Debug)]
pub(crate) struct ActiveJob {
    pub id: u64,
    pub buffer: JobBuffer,
    pub cursor: JobCursor,
    pub phase: Phase,
    pub options: AdapterOptions,
    /// A transmission loop is currently attached to this job.
    pub driving: bool,
}

impl ActiveJob {
    pub fn new(id: u64, buffer: JobBuffer, options: AdapterOptions) -> Self {
        let cursor = JobCursor::new(buffer.len());
        Self {
            id,
            buffer,
            cursor,
            phase: Phase::Printing,
            options,
            driving: true,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) enum JobSlot {
    #[default]
    Idle,
    Active(ActiveJob),
}

impl JobSlot {
    pub fn state(&self) -> JobState {
        match self {
            Self::Idle => JobState::NoJob,
            Self::Active(job) => match job.phase {
                Phase::Printing => JobState::Printing,
                Phase::Paused => JobState::Paused,
            },
        }
    }

    pub fn is_active(&self) -> bool {
        self.state().is_live()
    }

    /// The live job, if it is the job with `id`.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut ActiveJob> {
        match self {
            Self::Active(job) if job.id == id => Some(job),
            _ => None,
        }
    }

    /// Any live job.
    pub fn current_mut(&mut self) -> Option<&mut ActiveJob> {
        match self {
            Self::Active(job) => Some(job),
            Self::Idle => None,
        }
    }

    pub fn remaining(&self) -> usize {
        match self {
            Self::Active(job) => job.cursor.remaining(),
            Self::Idle => 0,
        }
    }

    /// Release the live job, returning it.
    pub fn take(&mut self) -> Option<ActiveJob> {
        match std::mem::take(self) {
            Self::Active(job) => Some(job),
            Self::Idle => None,
        }
    }

    /// Release the live job only if it is the job with `id`.
    pub fn take_if(&mut self, id: u64) -> Option<ActiveJob> {
        if self.get_mut(id).is_some() {
            self.take()
        } else {
            None
        }
    }
}
