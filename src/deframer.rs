//! Stream deframer: turns an unbounded sequence of raw reads into complete
//! frames, regardless of how the link chops the byte stream.
//!
//! Serial links deliver data in bursts at arbitrary boundaries, so a single
//! read may hold a fraction of a frame or several frames plus a tail. The
//! deframer accumulates bytes across reads and yields exactly one validated
//! frame per [`Deframer::next_frame`] call.

use std::io;

use log::warn;

use crate::errors::{AcquireError, Result};
use crate::frame::{DecodeOutcome, FrameCodec, RawFrame};
use crate::session::CancelToken;

/// Bytes requested from the source per refill.
const READ_CHUNK: usize = 1024;

/// Abstraction over a byte source that can be called repeatedly and may
/// return `0..N` bytes per call.
///
/// A read of 0 bytes means the link is idle, not closed; the deframer
/// retries. An `io::Error` is fatal to the session and surfaces as
/// [`AcquireError::SourceUnavailable`]. Implementors bind to a real serial
/// port, a simulated double, or a captured byte log.
pub trait StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// What to do with a frame that fails structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePolicy {
    /// Abort the session on the first malformed frame.
    #[default]
    Strict,
    /// Discard one frame's worth of bytes, log a warning, and resynchronize.
    SkipMalformed,
}

/// Accumulates bytes from a [`StreamReader`] and yields complete frames.
///
/// The accumulator is private to one session and never shared across
/// threads; the serial handle behind the reader must have exactly one owner.
pub struct Deframer<R: StreamReader> {
    reader: R,
    codec: FrameCodec,
    policy: FramePolicy,
    cancel: Option<CancelToken>,
    acc: Vec<u8>,
    bytes_read: u64,
}

impl<R: StreamReader> Deframer<R> {
    pub fn new(reader: R, codec: FrameCodec) -> Self {
        Deframer {
            reader,
            codec,
            policy: FramePolicy::Strict,
            cancel: None,
            acc: Vec::with_capacity(READ_CHUNK),
            bytes_read: 0,
        }
    }

    pub fn with_policy(mut self, policy: FramePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Honour `token` while waiting on an idle link, so an unbounded
    /// acquisition can be stopped without killing the I/O resource.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Total bytes pulled from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Stream offset of the first unconsumed byte in the accumulator.
    fn stream_offset(&self) -> u64 {
        self.bytes_read - self.acc.len() as u64
    }

    /// Pull the next complete frame, reading from the source as needed.
    ///
    /// Returns `Ok(None)` if the cancel token fired while waiting for data.
    /// The sequence is infinite until the caller stops pulling or the source
    /// faults; on a source error, partial bytes already accumulated are
    /// discarded rather than salvaged across the error boundary.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            // Drain whatever the accumulator already holds.
            loop {
                match self.codec.try_decode(&self.acc) {
                    Ok((DecodeOutcome::Frame(frame), consumed)) => {
                        self.acc.drain(..consumed);
                        return Ok(Some(frame));
                    }
                    Ok((DecodeOutcome::NeedMoreBytes, _)) => break,
                    Err(AcquireError::MalformedFrame { reason, .. }) => {
                        let offset = self.stream_offset();
                        match self.policy {
                            FramePolicy::Strict => {
                                self.acc.clear();
                                return Err(AcquireError::MalformedFrame { offset, reason });
                            }
                            FramePolicy::SkipMalformed => {
                                warn!(
                                    "skipping malformed frame at stream offset {offset}: {reason}"
                                );
                                self.acc.drain(..self.codec.frame_size());
                            }
                        }
                    }
                    Err(other) => return Err(other),
                }
            }

            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    return Ok(None);
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            match self.reader.read(&mut chunk) {
                Ok(0) => continue, // idle link, retry
                Ok(n) => {
                    self.acc.extend_from_slice(&chunk[..n]);
                    self.bytes_read += n as u64;
                }
                Err(source) => {
                    self.acc.clear();
                    return Err(AcquireError::SourceUnavailable {
                        source,
                        bytes_consumed: self.bytes_read,
                    });
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
