//! Fixed-length frame codec for the HackEEG wire protocol.
//!
//! The device streams one binary frame per sample. Only the frame boundary
//! and the embedded sequence number are interpreted here; the rest of the
//! frame is carried through as an opaque payload. The byte layout (size,
//! sequence offset/width/endianness, marker) is a versioned constant of the
//! codec, exposed as [`FrameLayout`] so tests and alternate firmware builds
//! can target different layouts.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::errors::AcquireError;

// ============================================================================
// Constants (HackEEG / ADS1299 on Arduino Due, MessagePack firmware)
// ============================================================================

/// Wire size of one sample frame in bytes.
pub const HACKEEG_FRAME_SIZE: usize = 38;

/// Byte offset of the 32-bit sample number (after the 32-bit timestamp).
const HACKEEG_SEQUENCE_OFFSET: usize = 4;

/// The sample number is a little-endian u32.
const HACKEEG_SEQUENCE_WIDTH: usize = 4;

/// The ADS1299 status word starts with the fixed bit pattern `1100` in the
/// high nibble of its first byte (datasheet p. 36).
const HACKEEG_MARKER: FrameMarker = FrameMarker {
    offset: 8,
    mask: 0xF0,
    value: 0xC0,
};

// ============================================================================
// Layout configuration
// ============================================================================

/// Byte order of the embedded sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// A mandatory fixed bit pattern somewhere in the frame.
///
/// A frame whose `offset` byte does not match `value` under `mask` fails
/// structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMarker {
    pub offset: usize,
    pub mask: u8,
    pub value: u8,
}

/// Binary layout of one sample frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLayout {
    /// Total frame size in bytes.
    pub frame_size: usize,
    /// Byte offset of the sequence number within the frame.
    pub sequence_offset: usize,
    /// Width of the sequence number in bytes (1–8).
    pub sequence_width: usize,
    /// Byte order of the sequence number.
    pub sequence_endianness: Endianness,
    /// Optional structural marker checked on every frame.
    pub marker: Option<FrameMarker>,
}

impl FrameLayout {
    /// The layout spoken by HackEEG firmware in continuous-read mode.
    pub fn hackeeg() -> Self {
        FrameLayout {
            frame_size: HACKEEG_FRAME_SIZE,
            sequence_offset: HACKEEG_SEQUENCE_OFFSET,
            sequence_width: HACKEEG_SEQUENCE_WIDTH,
            sequence_endianness: Endianness::Little,
            marker: Some(HACKEEG_MARKER),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            anyhow::bail!("frame_size must be non-zero");
        }
        if self.sequence_width == 0 || self.sequence_width > 8 {
            anyhow::bail!(
                "sequence_width was {}, but must be 1-8 bytes",
                self.sequence_width
            );
        }
        if self.sequence_offset + self.sequence_width > self.frame_size {
            anyhow::bail!(
                "sequence field at {}..{} does not fit in a {}-byte frame",
                self.sequence_offset,
                self.sequence_offset + self.sequence_width,
                self.frame_size
            );
        }
        if let Some(marker) = &self.marker {
            if marker.offset >= self.frame_size {
                anyhow::bail!(
                    "marker offset {} outside {}-byte frame",
                    marker.offset,
                    self.frame_size
                );
            }
        }
        Ok(())
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        FrameLayout::hackeeg()
    }
}

// ============================================================================
// Frame types
// ============================================================================

/// One complete wire frame. Always exactly `frame_size` bytes; partial
/// frames are never surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(Box<[u8]>);

impl RawFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A structured view over a [`RawFrame`]: the sequence number plus the frame
/// bytes passed through uninterpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSample {
    pub sequence_number: u64,
    raw: RawFrame,
}

impl DecodedSample {
    /// The opaque frame bytes, including the sequence field.
    pub fn payload(&self) -> &[u8] {
        self.raw.as_bytes()
    }

    pub fn into_raw(self) -> RawFrame {
        self.raw
    }
}

/// Outcome of one decode attempt against a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete frame; the reported byte count was consumed from the front
    /// of the buffer.
    Frame(RawFrame),
    /// The buffer is shorter than one frame; nothing was consumed and the
    /// caller must retain the buffer and append more data.
    NeedMoreBytes,
}

// ============================================================================
// Codec
// ============================================================================

/// Decodes fixed-length frames from byte buffers. Pure, no I/O.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    layout: FrameLayout,
}

impl FrameCodec {
    pub fn new(layout: FrameLayout) -> Result<Self> {
        layout.validate()?;
        Ok(FrameCodec { layout })
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn frame_size(&self) -> usize {
        self.layout.frame_size
    }

    /// Try to decode one frame from the front of `buf`.
    ///
    /// Returns the outcome and the number of bytes consumed. Framing is
    /// fixed-length, so a buffer holding at least `frame_size` bytes always
    /// consumes exactly `frame_size`; remaining bytes are left for the next
    /// call. A marker violation is reported as `MalformedFrame` with the
    /// offset relative to the buffer start.
    pub fn try_decode(&self, buf: &[u8]) -> crate::errors::Result<(DecodeOutcome, usize)> {
        let size = self.layout.frame_size;
        if buf.len() < size {
            return Ok((DecodeOutcome::NeedMoreBytes, 0));
        }
        let frame = &buf[..size];
        if let Some(marker) = &self.layout.marker {
            let found = frame[marker.offset] & marker.mask;
            let expected = marker.value & marker.mask;
            if found != expected {
                return Err(AcquireError::MalformedFrame {
                    offset: 0,
                    reason: format!(
                        "marker byte {}: expected {:#04x}, found {:#04x} under mask {:#04x}",
                        marker.offset, expected, found, marker.mask
                    ),
                });
            }
        }
        Ok((DecodeOutcome::Frame(RawFrame(frame.into())), size))
    }

    /// Extract the sequence number and wrap the frame as a sample.
    pub fn decode_sample(&self, raw: RawFrame) -> DecodedSample {
        let start = self.layout.sequence_offset;
        let field = &raw.as_bytes()[start..start + self.layout.sequence_width];
        let mut sequence: u64 = 0;
        match self.layout.sequence_endianness {
            Endianness::Little => {
                for &byte in field.iter().rev() {
                    sequence = (sequence << 8) | u64::from(byte);
                }
            }
            Endianness::Big => {
                for &byte in field {
                    sequence = (sequence << 8) | u64::from(byte);
                }
            }
        }
        DecodedSample {
            sequence_number: sequence,
            raw,
        }
    }

    /// Synthesize a wire frame carrying `sequence`, with a valid marker and a
    /// zeroed payload. Used by simulators and capture replay.
    pub fn encode_sample(&self, sequence: u64) -> Vec<u8> {
        let mut frame = vec![0u8; self.layout.frame_size];
        if let Some(marker) = &self.layout.marker {
            frame[marker.offset] = marker.value & marker.mask;
        }
        let start = self.layout.sequence_offset;
        let width = self.layout.sequence_width;
        match self.layout.sequence_endianness {
            Endianness::Little => {
                for i in 0..width {
                    frame[start + i] = (sequence >> (8 * i)) as u8;
                }
            }
            Endianness::Big => {
                for i in 0..width {
                    frame[start + i] = (sequence >> (8 * (width - 1 - i))) as u8;
                }
            }
        }
        frame
    }
}

// ============================================================================
// Tests
// ============================================================================
