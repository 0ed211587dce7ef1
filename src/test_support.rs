//! Shared doubles for driver tests: scripted byte sources and a recording
//! device-control collaborator.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::deframer::StreamReader;
use crate::device::DeviceControl;
use crate::frame::FrameCodec;

enum Step {
    Data(Vec<u8>),
    Idle,
    Error(io::Error),
}

/// A [`StreamReader`] that replays a fixed script of reads.
///
/// An exhausted script fails the read loudly instead of spinning, so a test
/// that over-pulls hangs nowhere.
pub(crate) struct ScriptedReader {
    script: VecDeque<Step>,
    idle_when_exhausted: bool,
}

impl ScriptedReader {
    /// Deliver all bytes in one read.
    pub fn single(bytes: Vec<u8>) -> Self {
        let mut script = VecDeque::new();
        if !bytes.is_empty() {
            script.push_back(Step::Data(bytes));
        }
        ScriptedReader {
            script,
            idle_when_exhausted: false,
        }
    }

    /// Deliver the bytes in chunks of `chunk` bytes, exercising arbitrary
    /// read-boundary misalignment.
    pub fn chunked(bytes: Vec<u8>, chunk: usize) -> Self {
        let mut script = VecDeque::new();
        for piece in bytes.chunks(chunk.max(1)) {
            script.push_back(Step::Data(piece.to_vec()));
        }
        ScriptedReader {
            script,
            idle_when_exhausted: false,
        }
    }

    /// Insert a burst of 0-byte reads after every `every` scripted steps.
    pub fn interleave_idle_reads(&mut self, every: usize) {
        let every = every.max(1);
        let mut rebuilt = VecDeque::new();
        let mut since_idle = 0;
        for step in self.script.drain(..) {
            rebuilt.push_back(step);
            since_idle += 1;
            if since_idle == every {
                rebuilt.push_back(Step::Idle);
                since_idle = 0;
            }
        }
        self.script = rebuilt;
    }

    /// Append an I/O fault to the end of the script.
    pub fn push_error(&mut self, kind: io::ErrorKind, message: &str) {
        self.script
            .push_back(Step::Error(io::Error::new(kind, message.to_string())));
    }

    /// Report an idle link forever once the script runs out.
    pub fn idle_forever(&mut self) {
        self.idle_when_exhausted = true;
    }
}

impl StreamReader for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.script.pop_front() {
            Some(Step::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.script.push_front(Step::Data(bytes[n..].to_vec()));
                }
                Ok(n)
            }
            Some(Step::Idle) => Ok(0),
            Some(Step::Error(e)) => Err(e),
            None if self.idle_when_exhausted => Ok(0),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "scripted reader exhausted",
            )),
        }
    }
}

/// Concatenated wire frames for the given sequence numbers.
pub(crate) fn frame_stream(
    codec: &FrameCodec,
    sequences: impl IntoIterator<Item = u64>,
) -> Vec<u8> {
    let mut bytes = Vec::new();
    for seq in sequences {
        bytes.extend_from_slice(&codec.encode_sample(seq));
    }
    bytes
}

/// A [`DeviceControl`] that records the calls it receives and can be told to
/// fail a specific command.
#[derive(Default)]
pub(crate) struct RecordingDevice {
    pub calls: Vec<&'static str>,
    pub fail_on: Option<&'static str>,
}

impl RecordingDevice {
    fn call(&mut self, command: &'static str) -> anyhow::Result<()> {
        self.calls.push(command);
        if self.fail_on == Some(command) {
            anyhow::bail!("injected {command} failure");
        }
        Ok(())
    }
}

impl DeviceControl for RecordingDevice {
    fn enter_continuous_mode(&mut self) -> anyhow::Result<()> {
        self.call("rdatac")
    }

    fn exit_continuous_mode(&mut self) -> anyhow::Result<()> {
        self.call("sdatac")
    }

    fn flush(&mut self, _timeout: Duration, _levels: u8) -> anyhow::Result<()> {
        self.call("flush")
    }
}
