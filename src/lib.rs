//! HackEEG serial acquisition driver.
//!
//! This crate drives a HackEEG board (an ADS1299 EEG front-end on an Arduino
//! Due) streaming fixed-size binary sample frames over a serial link. It
//! deframes the byte stream into validated frames, bounds a run by a
//! sample-count budget and a rate-derived budget, and reconciles the
//! embedded sample numbers against the expected range to report drops.
//!
//! # Timing
//!
//! The board paces the stream with its own clock; the host only timestamps
//! the loop. `CaptureResult::elapsed` measures start-of-loop to the last
//! successful pull, so `sample_count / elapsed` approximates the effective
//! rate. Dropped frames are detected from sample numbers, never from timing.
//!
//! ```ignore
//! let port = hackeeg_rs::open_port("/dev/ttyACM0", hackeeg_rs::DEFAULT_BAUD)?;
//! let control = hackeeg_rs::JsonLinesControl::new(port.try_clone()?);
//! let codec = hackeeg_rs::FrameCodec::new(hackeeg_rs::FrameLayout::hackeeg())?;
//! let deframer = hackeeg_rs::Deframer::new(hackeeg_rs::SerialStream::new(port), codec);
//! let mut session = hackeeg_rs::AcquisitionSession::new(deframer, control);
//!
//! let capture = session.acquire(10_000, 1.0, 16_000.0, None)?;
//! let report = hackeeg_rs::audit(&capture, capture.sample_count);
//! println!("{} samples, {} dropped", capture.sample_count, report.dropped_count());
//! ```

mod audit;
mod deframer;
mod device;
mod errors;
mod frame;
mod logging;
mod serial;
mod session;

#[cfg(test)]
mod test_support;

pub use audit::{audit, find_missing, MissingSampleReport};
pub use deframer::{Deframer, FramePolicy, StreamReader};
pub use device::{DeviceControl, JsonLinesControl, NoopDeviceControl};
pub use errors::{AcquireError, Result, SessionFailure};
pub use frame::{
    DecodeOutcome, DecodedSample, Endianness, FrameCodec, FrameLayout, FrameMarker, RawFrame,
    HACKEEG_FRAME_SIZE,
};
pub use logging::init_logging;
pub use serial::{locate_port, open_port, SerialStream, DEFAULT_BAUD};
pub use session::{
    AcquisitionBudget, AcquisitionSession, CancelToken, CaptureResult, FrameConsumer,
};
