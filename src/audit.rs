//! Post-hoc dropped-sample detection.
//!
//! The device assigns each frame a monotonically increasing sample number,
//! but the protocol does not guarantee lossless delivery. After a capture,
//! the auditor reconciles the observed sequence numbers against the expected
//! contiguous range and reports what is missing. Dropped samples are a
//! reporting result, never an error.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::frame::DecodedSample;
use crate::session::CaptureResult;

/// Which sample numbers never arrived, out of an expected contiguous run.
///
/// Recomputable at any time from a [`CaptureResult`]; nothing is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingSampleReport {
    pub expected_total: u64,
    /// Missing sequence numbers, ascending.
    pub missing: Vec<u64>,
}

impl MissingSampleReport {
    pub fn dropped_count(&self) -> usize {
        self.missing.len()
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Reconcile observed sequence numbers against the expected range
/// `[0, expected_total)`.
///
/// Membership is hashed, so the whole audit is O(n). Duplicate sequence
/// numbers coalesce silently; they are not counted as errors.
pub fn find_missing(samples: &[DecodedSample], expected_total: u64) -> MissingSampleReport {
    let observed: HashSet<u64> = samples.iter().map(|s| s.sequence_number).collect();
    let missing: Vec<u64> = (0..expected_total)
        .filter(|n| !observed.contains(n))
        .collect();
    MissingSampleReport {
        expected_total,
        missing,
    }
}

/// Audit a finished capture against the number of samples it was expected
/// to contain.
pub fn audit(capture: &CaptureResult, expected_total: u64) -> MissingSampleReport {
    find_missing(&capture.samples, expected_total)
}

// ============================================================================
// Tests
// ============================================================================
