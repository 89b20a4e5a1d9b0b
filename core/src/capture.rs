//! Bounded, truncation-aware stream capture
//!
//! A [`CaptureBuffer`] retains a bounded prefix of the bytes a relay moves
//! and keeps an exact count of everything it saw, so callers can always
//! tell retained bytes apart from produced bytes. It is owned by exactly
//! one relay task and read only after that relay has finished.

use crate::spec::CaptureLimit;

/// Accumulates raw bytes up to a configured limit while counting every
/// byte produced.
///
/// Truncation is strict: a stream whose produced length equals the limit
/// is not truncated.
#[derive(Debug)]
pub(crate) struct CaptureBuffer {
    limit: CaptureLimit,
    bytes: Vec<u8>,
    produced: u64,
}

impl CaptureBuffer {
    pub(crate) fn new(limit: CaptureLimit) -> Self {
        Self {
            limit,
            bytes: Vec::new(),
            produced: 0,
        }
    }

    /// Grow the retained prefix up to the limit. Bytes beyond the limit are
    /// counted but not stored, so the truncation flag stays accurate.
    pub(crate) fn append(&mut self, chunk: &[u8]) {
        self.produced += chunk.len() as u64;
        match self.limit {
            CaptureLimit::Unbounded => self.bytes.extend_from_slice(chunk),
            CaptureLimit::Bytes(limit) => {
                let room = limit.saturating_sub(self.bytes.len());
                if room > 0 {
                    let take = room.min(chunk.len());
                    self.bytes.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }

    fn truncated(&self) -> bool {
        match self.limit {
            CaptureLimit::Unbounded => false,
            CaptureLimit::Bytes(limit) => self.produced > limit as u64,
        }
    }

    pub(crate) fn into_output(self, io_error: Option<String>) -> StreamOutput {
        let truncated = self.truncated();
        StreamOutput {
            bytes: self.bytes,
            produced: self.produced,
            truncated,
            io_error,
        }
    }
}

/// Immutable capture result for one stream of one finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutput {
    bytes: Vec<u8>,
    produced: u64,
    truncated: bool,
    io_error: Option<String>,
}

impl StreamOutput {
    /// The retained prefix of the stream.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The retained prefix decoded as text, lossily.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Total number of bytes the child actually produced on this stream.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Whether bytes beyond the capture limit were discarded.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Whether nothing was retained.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// First mirror-file or console-echo write failure, if any. Recorded
    /// while draining continued; never fatal to the execution.
    pub fn io_error(&self) -> Option<&str> {
        self.io_error.as_deref()
    }
}
