//! Acquisition loop: budgets, timing, and the capture result.
//!
//! One session owns one deframer (and through it, the serial handle) plus a
//! device-control collaborator. `run()` puts the device in continuous-read
//! mode, pulls frames until a budget is exhausted, and hands back the
//! ordered capture. Frames are counted and appended in strict arrival order;
//! sequence numbers are never used to reorder — the auditor detects gaps
//! after the fact instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::deframer::{Deframer, StreamReader};
use crate::device::DeviceControl;
use crate::errors::{AcquireError, SessionFailure};
use crate::frame::DecodedSample;

/// How long the pre-loop buffer flush may take before escalating.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Escalation levels for the flush handshake (drain, then stop-and-restart,
/// then give up).
const FLUSH_LEVELS: u8 = 3;

// ============================================================================
// Budget
// ============================================================================

/// Bounds for one acquisition run. A zero-valued field means unbounded and
/// is replaced by the session default when one is configured.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AcquisitionBudget {
    /// Sample-count ceiling (0 = unbounded).
    pub max_samples: u64,
    /// Acquisition duration in seconds (0 = unbounded).
    pub duration: f64,
    /// Device sample rate in samples per second.
    pub sample_rate: f64,
}

impl AcquisitionBudget {
    /// Explicit override-or-default merge: each zero field takes the value
    /// from `defaults`. Never ambient object state.
    pub fn resolve(self, defaults: &AcquisitionBudget) -> AcquisitionBudget {
        AcquisitionBudget {
            max_samples: if self.max_samples == 0 {
                defaults.max_samples
            } else {
                self.max_samples
            },
            duration: if self.duration == 0.0 {
                defaults.duration
            } else {
                self.duration
            },
            sample_rate: if self.sample_rate == 0.0 {
                defaults.sample_rate
            } else {
                self.sample_rate
            },
        }
    }

    /// `duration * sample_rate`, truncated.
    ///
    /// Deliberately a *sample-count* ceiling, not a wall-clock one: the
    /// device paces the stream at `sample_rate`, so capping the count caps
    /// the time. Comparing elapsed wall-clock time instead would change
    /// observable behavior on a lagging link.
    pub fn rate_derived_sample_ceiling(&self) -> u64 {
        (self.duration * self.sample_rate) as u64
    }

    /// The effective sample-count ceiling for the loop, or `InvalidBudget`
    /// when both bounds are unbounded.
    pub fn effective_ceiling(&self) -> Result<u64, AcquireError> {
        let by_count = match self.max_samples {
            0 => None,
            n => Some(n),
        };
        let by_rate = match self.rate_derived_sample_ceiling() {
            0 => None,
            n => Some(n),
        };
        match (by_count, by_rate) {
            (None, None) => Err(AcquireError::InvalidBudget),
            (Some(a), None) => Ok(a),
            (None, Some(b)) => Ok(b),
            (Some(a), Some(b)) => Ok(a.min(b)),
        }
    }
}

// ============================================================================
// Capture result
// ============================================================================

/// The complete output of one acquisition run. Immutable after return; the
/// caller owns it.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// Decoded samples in on-wire arrival order.
    pub samples: Vec<DecodedSample>,
    pub sample_count: u64,
    /// Wall-clock time from before the first pull to after the last
    /// successful pull (time-to-last-sample, not time-to-loop-exit).
    pub elapsed: Duration,
}

impl CaptureResult {
    pub(crate) fn empty() -> Self {
        CaptureResult {
            samples: Vec::new(),
            sample_count: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Average observed sample rate, if any time elapsed.
    pub fn observed_rate(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| self.sample_count as f64 / secs)
    }
}

// ============================================================================
// Consumers and cancellation
// ============================================================================

/// Per-sample strategy invoked synchronously inside the loop.
///
/// The two historical acquisition modes — store the packed frame untouched
/// vs. process each sample as it arrives — are just two consumers of the
/// same deframer output. Display is a consumer too, never embedded logic.
pub trait FrameConsumer {
    fn consume(&mut self, sample: &DecodedSample);
}

impl<F: FnMut(&DecodedSample)> FrameConsumer for F {
    fn consume(&mut self, sample: &DecodedSample) {
        self(sample)
    }
}

/// Cooperative cancellation flag, checked once per loop iteration and while
/// the deframer waits on an idle link. Cancelling stops the loop without
/// killing the underlying I/O resource; it is not an error.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Orchestrates one acquisition: mode switch, flush, pull loop, timing.
pub struct AcquisitionSession<R: StreamReader, D: DeviceControl> {
    deframer: Deframer<R>,
    device: D,
    defaults: AcquisitionBudget,
    cancel: CancelToken,
}

impl<R: StreamReader, D: DeviceControl> AcquisitionSession<R, D> {
    pub fn new(deframer: Deframer<R>, device: D) -> Self {
        let cancel = CancelToken::new();
        AcquisitionSession {
            deframer: deframer.with_cancel(cancel.clone()),
            device,
            defaults: AcquisitionBudget::default(),
            cancel,
        }
    }

    /// Session-scoped defaults substituted for zero-valued budget fields.
    pub fn with_defaults(mut self, defaults: AcquisitionBudget) -> Self {
        self.defaults = defaults;
        self
    }

    /// A handle another thread can use to stop the loop cooperatively.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Single caller-facing entry point: bound by `max_samples` and
    /// `duration * sample_rate`, optionally observing each sample.
    pub fn acquire(
        &mut self,
        max_samples: u64,
        duration: f64,
        sample_rate: f64,
        consumer: Option<&mut dyn FrameConsumer>,
    ) -> Result<CaptureResult, SessionFailure> {
        self.run(
            AcquisitionBudget {
                max_samples,
                duration,
                sample_rate,
            },
            consumer,
        )
    }

    /// Run one acquisition under `budget`.
    ///
    /// The budget is validated before the byte source is touched; device
    /// mode switches happen before and after the loop. On a mid-stream
    /// fault, the returned [`SessionFailure`] still carries every sample
    /// decoded up to that point.
    pub fn run(
        &mut self,
        budget: AcquisitionBudget,
        mut consumer: Option<&mut dyn FrameConsumer>,
    ) -> Result<CaptureResult, SessionFailure> {
        let budget = budget.resolve(&self.defaults);
        let ceiling = budget.effective_ceiling().map_err(Self::fail_empty)?;
        debug!(
            "acquisition budget: max_samples={} duration={}s rate={}sps -> ceiling={}",
            budget.max_samples, budget.duration, budget.sample_rate, ceiling
        );

        self.device
            .enter_continuous_mode()
            .map_err(|cause| Self::fail_device("rdatac", cause))?;
        self.device
            .flush(FLUSH_TIMEOUT, FLUSH_LEVELS)
            .map_err(|cause| Self::fail_device("flush", cause))?;

        let mut samples: Vec<DecodedSample> = Vec::new();
        let start = Instant::now();
        let mut last = start;
        let mut abort: Option<AcquireError> = None;

        while (samples.len() as u64) < ceiling {
            if self.cancel.is_cancelled() {
                debug!("acquisition cancelled after {} samples", samples.len());
                break;
            }
            match self.deframer.next_frame() {
                Ok(Some(frame)) => {
                    last = Instant::now();
                    let sample = self.deframer.codec().decode_sample(frame);
                    samples.push(sample);
                    if let Some(c) = consumer.as_deref_mut() {
                        if let Some(latest) = samples.last() {
                            c.consume(latest);
                        }
                    }
                }
                Ok(None) => break, // cancelled while waiting on the link
                Err(e) => {
                    abort = Some(e);
                    break;
                }
            }
        }

        let elapsed = last.duration_since(start);
        // Leave continuous mode even after a fault, on a best-effort basis.
        let exit = self.device.exit_continuous_mode();

        let capture = CaptureResult {
            sample_count: samples.len() as u64,
            samples,
            elapsed,
        };
        if let Some(error) = abort {
            return Err(SessionFailure {
                error,
                partial: capture,
            });
        }
        if let Err(cause) = exit {
            return Err(SessionFailure {
                error: AcquireError::DeviceControl {
                    command: "sdatac",
                    cause,
                },
                partial: capture,
            });
        }
        debug!(
            "capture complete: {} samples in {:?}",
            capture.sample_count, capture.elapsed
        );
        Ok(capture)
    }

    fn fail_empty(error: AcquireError) -> SessionFailure {
        SessionFailure {
            error,
            partial: CaptureResult::empty(),
        }
    }

    fn fail_device(command: &'static str, cause: anyhow::Error) -> SessionFailure {
        Self::fail_empty(AcquireError::DeviceControl { command, cause })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameCodec, FrameLayout};
    use crate::test_support::{frame_stream, RecordingDevice, ScriptedReader};
    use std::io;

    fn codec() -> FrameCodec {
        FrameCodec::new(FrameLayout::hackeeg()).unwrap()
    }

    fn session_over(
        reader: ScriptedReader,
        device: RecordingDevice,
    ) -> AcquisitionSession<ScriptedReader, RecordingDevice> {
        AcquisitionSession::new(Deframer::new(reader, codec()), device)
    }

    #[test]
    fn resolve_replaces_only_zero_fields() {
        let defaults = AcquisitionBudget {
            max_samples: 100_000,
            duration: 1.0,
            sample_rate: 16_000.0,
        };
        let budget = AcquisitionBudget {
            max_samples: 0,
            duration: 2.5,
            sample_rate: 0.0,
        };
        let resolved = budget.resolve(&defaults);
        assert_eq!(resolved.max_samples, 100_000);
        assert_eq!(resolved.duration, 2.5);
        assert_eq!(resolved.sample_rate, 16_000.0);
    }

    #[test]
    fn rate_derived_ceiling_is_a_sample_count() {
        let budget = AcquisitionBudget {
            max_samples: 0,
            duration: 0.5,
            sample_rate: 16_000.0,
        };
        assert_eq!(budget.rate_derived_sample_ceiling(), 8_000);
        assert_eq!(budget.effective_ceiling().unwrap(), 8_000);
    }

    #[test]
    fn unbounded_budget_fails_before_any_read() {
        let reader = ScriptedReader::single(frame_stream(&codec(), 0..4));
        let mut session = session_over(reader, RecordingDevice::default());
        let failure = session.acquire(0, 0.0, 0.0, None).unwrap_err();
        assert!(matches!(failure.error, AcquireError::InvalidBudget));
        assert_eq!(failure.partial.sample_count, 0);
        // Neither the byte source nor the device was touched.
        assert!(session.device.calls.is_empty());
        assert_eq!(session.deframer.bytes_read(), 0);
    }

    #[test]
    fn max_samples_budget_collects_exactly_that_many() {
        let reader = ScriptedReader::chunked(frame_stream(&codec(), 0..10), 17);
        let mut session = session_over(reader, RecordingDevice::default());
        let capture = session.acquire(5, 0.0, 0.0, None).unwrap();
        assert_eq!(capture.sample_count, 5);
        let seqs: Vec<u64> = capture.samples.iter().map(|s| s.sequence_number).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert_eq!(session.device.calls, vec!["rdatac", "flush", "sdatac"]);
    }

    #[test]
    fn rate_derived_ceiling_binds_when_smaller() {
        let reader = ScriptedReader::single(frame_stream(&codec(), 0..10));
        let mut session = session_over(reader, RecordingDevice::default());
        // 1 second at 4 sps caps the run at 4 samples despite max_samples=100.
        let capture = session.acquire(100, 1.0, 4.0, None).unwrap();
        assert_eq!(capture.sample_count, 4);
    }

    #[test]
    fn session_defaults_fill_an_all_zero_budget() {
        let reader = ScriptedReader::single(frame_stream(&codec(), 0..10));
        let mut session = session_over(reader, RecordingDevice::default()).with_defaults(
            AcquisitionBudget {
                max_samples: 2,
                duration: 0.0,
                sample_rate: 0.0,
            },
        );
        let capture = session.acquire(0, 0.0, 0.0, None).unwrap();
        assert_eq!(capture.sample_count, 2);
    }

    #[test]
    fn consumer_sees_every_sample_in_arrival_order() {
        let reader = ScriptedReader::chunked(frame_stream(&codec(), 0..3), 7);
        let mut session = session_over(reader, RecordingDevice::default());
        let mut seen = Vec::new();
        let mut observer = |s: &DecodedSample| seen.push(s.sequence_number);
        let capture = session.acquire(3, 0.0, 0.0, Some(&mut observer)).unwrap();
        assert_eq!(capture.sample_count, 3);
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn source_fault_keeps_already_decoded_samples() {
        let mut reader = ScriptedReader::single(frame_stream(&codec(), 0..3));
        reader.push_error(io::ErrorKind::BrokenPipe, "link dropped");
        let mut session = session_over(reader, RecordingDevice::default());
        let failure = session.acquire(10, 0.0, 0.0, None).unwrap_err();
        assert!(matches!(
            failure.error,
            AcquireError::SourceUnavailable { .. }
        ));
        assert_eq!(failure.partial.sample_count, 3);
        // The device is still taken out of continuous mode.
        assert_eq!(session.device.calls, vec!["rdatac", "flush", "sdatac"]);
    }

    #[test]
    fn device_control_failure_aborts_before_any_frame() {
        let reader = ScriptedReader::single(frame_stream(&codec(), 0..3));
        let device = RecordingDevice {
            fail_on: Some("rdatac"),
            ..Default::default()
        };
        let mut session = session_over(reader, device);
        let failure = session.acquire(3, 0.0, 0.0, None).unwrap_err();
        match failure.error {
            AcquireError::DeviceControl { command, .. } => assert_eq!(command, "rdatac"),
            other => panic!("expected DeviceControl, got {other}"),
        }
        assert_eq!(failure.partial.sample_count, 0);
        assert_eq!(session.deframer.bytes_read(), 0);
    }

    #[test]
    fn cancellation_stops_the_loop_without_an_error() {
        let mut reader = ScriptedReader::single(frame_stream(&codec(), 0..2));
        reader.idle_forever();
        let mut session = session_over(reader, RecordingDevice::default());
        let token = session.cancel_token();

        // First pull two frames normally, then cancel mid-run via the
        // consumer to stop an otherwise larger budget.
        let mut stop_after_two = |s: &DecodedSample| {
            if s.sequence_number == 1 {
                token.cancel();
            }
        };
        let capture = session
            .acquire(100, 0.0, 0.0, Some(&mut stop_after_two))
            .unwrap();
        assert_eq!(capture.sample_count, 2);
        assert_eq!(session.device.calls, vec!["rdatac", "flush", "sdatac"]);
    }
}
