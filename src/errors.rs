use std::io;

use thiserror::Error;

use crate::session::CaptureResult;

/// Faults surfaced by the acquisition core.
///
/// Nothing is retried automatically: retry policy is link-specific and
/// belongs to the collaborator that owns the port.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Both the sample-count ceiling and the rate-derived ceiling resolved
    /// to unbounded. Checked before the byte source is touched.
    #[error("invalid budget: max_samples and duration*sample_rate are both unbounded")]
    InvalidBudget,

    /// I/O fault on the byte source. Fatal to the current session.
    #[error("byte source unavailable after {bytes_consumed} bytes: {source}")]
    SourceUnavailable {
        #[source]
        source: io::Error,
        /// Bytes consumed from the source before the fault.
        bytes_consumed: u64,
    },

    /// Decoded bytes failed structural validation.
    #[error("malformed frame at stream offset {offset}: {reason}")]
    MalformedFrame { offset: u64, reason: String },

    /// A device-control collaborator call failed.
    #[error("device control command '{command}' failed: {cause}")]
    DeviceControl {
        command: &'static str,
        cause: anyhow::Error,
    },
}

/// A session abort that still carries everything decoded before the fault.
///
/// Frames already collected are never silently lost; the caller decides
/// whether the partial capture is usable or the run should be repeated.
#[derive(Debug, Error)]
#[error("acquisition aborted after {} samples: {error}", .partial.sample_count)]
pub struct SessionFailure {
    #[source]
    pub error: AcquireError,
    pub partial: CaptureResult,
}

pub type Result<T> = std::result::Result<T, AcquireError>;
