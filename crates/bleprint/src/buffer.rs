//! Command fragment accumulation and job buffer assembly.

use std::ops::Deref;
use std::sync::Arc;

/// Immutable byte buffer of one print job.
///
/// Cloning is cheap; the transmission loop keeps its own handle while the
/// controller retains the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBuffer(Arc<[u8]>);

impl JobBuffer {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for JobBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for JobBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

/// Ordered list of driver fragments queued since the last `print()`.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    fragments: Vec<Vec<u8>>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append fragments in order. Empty fragments are kept out of the list.
    pub fn extend(&mut self, fragments: impl IntoIterator<Item = Vec<u8>>) {
        self.fragments
            .extend(fragments.into_iter().filter(|f| !f.is_empty()));
    }

    /// Number of queued fragments.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Concatenate all fragments into a job buffer and start a new round.
    pub fn freeze(&mut self) -> JobBuffer {
        let fragments = std::mem::take(&mut self.fragments);
        let mut bytes = Vec::with_capacity(fragments.iter().map(Vec::len).sum());
        for fragment in fragments {
            bytes.extend_from_slice(&fragment);
        }
        JobBuffer::from(bytes)
    }
}
