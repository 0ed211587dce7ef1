//! Device-control collaborator for the acquisition session.
//!
//! The core never interprets device commands; it only needs the device put
//! into continuous-read mode before the loop, taken out of it after, and the
//! link flushed of stale bytes in between. Anything that can do those three
//! things can drive a session — the real JSON Lines command channel below, or
//! a no-op for pre-configured links and tests.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, warn};

/// Drain buffer size while flushing stale input.
const DRAIN_CHUNK: usize = 256;

/// Device mode switches and buffer-flush handshaking around one session.
pub trait DeviceControl {
    /// Put the device into continuous sample streaming (`rdatac`).
    fn enter_continuous_mode(&mut self) -> Result<()>;

    /// Stop streaming and return to command mode (`stop` + `sdatac`).
    fn exit_continuous_mode(&mut self) -> Result<()>;

    /// Discard stale bytes buffered on the link before acquisition.
    ///
    /// `levels` escalates: 1 drains, 2 additionally stops and restarts the
    /// command channel when draining stalls, 3 fails if it still stalls.
    fn flush(&mut self, timeout: Duration, levels: u8) -> Result<()>;
}

/// For links that are already streaming and need no command channel
/// (captured byte logs, simulators).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDeviceControl;

impl DeviceControl for NoopDeviceControl {
    fn enter_continuous_mode(&mut self) -> Result<()> {
        Ok(())
    }

    fn exit_continuous_mode(&mut self) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self, _timeout: Duration, _levels: u8) -> Result<()> {
        Ok(())
    }
}

/// Speaks the HackEEG JSON Lines command protocol over a command handle.
///
/// Commands are single objects, one per line:
/// `{"COMMAND": "rdatac", "PARAMETERS": []}`. The handle is typically a
/// clone of the serial port whose read side feeds the deframer.
pub struct JsonLinesControl<P: Read + Write> {
    port: P,
}

impl<P: Read + Write> JsonLinesControl<P> {
    pub fn new(port: P) -> Self {
        JsonLinesControl { port }
    }

    fn send_command(&mut self, command: &str) -> Result<()> {
        let message = serde_json::json!({ "COMMAND": command, "PARAMETERS": [] });
        let mut line =
            serde_json::to_vec(&message).with_context(|| format!("encoding '{command}'"))?;
        line.push(b'\n');
        self.port
            .write_all(&line)
            .with_context(|| format!("sending '{command}'"))?;
        self.port.flush().context("flushing command channel")?;
        debug!("sent device command: {command}");
        Ok(())
    }

    /// Read and discard input until the link goes quiet or `deadline`
    /// passes. Returns whether it went quiet.
    fn drain_until_quiet(&mut self, deadline: Instant) -> Result<bool> {
        let mut buf = [0u8; DRAIN_CHUNK];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => debug!("flushed {n} stale bytes"),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(true),
                Err(e) => return Err(e).context("draining stale input"),
            }
            if Instant::now() > deadline {
                return Ok(false);
            }
        }
    }
}

impl<P: Read + Write> DeviceControl for JsonLinesControl<P> {
    fn enter_continuous_mode(&mut self) -> Result<()> {
        self.send_command("rdatac")
    }

    fn exit_continuous_mode(&mut self) -> Result<()> {
        // stop, sdatac, nop in sequence settles the firmware out of
        // streaming without tripping over a half-sent frame.
        self.send_command("stop")?;
        self.send_command("sdatac")?;
        self.send_command("nop")?;
        let _ = self.port.read(&mut [0u8; DRAIN_CHUNK]);
        Ok(())
    }

    fn flush(&mut self, timeout: Duration, levels: u8) -> Result<()> {
        let deadline = Instant::now() + timeout;
        if self.drain_until_quiet(deadline)? {
            return Ok(());
        }
        if levels > 1 {
            warn!("flush taking too long, stopping and restarting the command channel");
            self.exit_continuous_mode()?;
            let retry_deadline = Instant::now() + timeout;
            if self.drain_until_quiet(retry_deadline)? {
                return Ok(());
            }
        }
        anyhow::bail!("flushing the input buffer failed; the device keeps streaming")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Read side replays scripted chunks; write side records everything.
    struct FakePort {
        input: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl FakePort {
        fn quiet() -> Self {
            FakePort {
                input: VecDeque::new(),
                written: Vec::new(),
            }
        }

        fn with_input(chunks: &[&[u8]]) -> Self {
            FakePort {
                input: chunks.iter().map(|c| c.to_vec()).collect(),
                written: Vec::new(),
            }
        }

        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.written.clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.input.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn enter_continuous_mode_sends_rdatac_line() {
        let mut control = JsonLinesControl::new(FakePort::quiet());
        control.enter_continuous_mode().unwrap();
        let lines = control.port.lines();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed["COMMAND"], "rdatac");
        assert!(parsed["PARAMETERS"].as_array().unwrap().is_empty());
    }

    #[test]
    fn exit_continuous_mode_settles_with_stop_sdatac_nop() {
        let mut control = JsonLinesControl::new(FakePort::quiet());
        control.exit_continuous_mode().unwrap();
        let commands: Vec<String> = control
            .port
            .lines()
            .iter()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["COMMAND"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(commands, vec!["stop", "sdatac", "nop"]);
    }

    #[test]
    fn flush_drains_stale_bytes_then_goes_quiet() {
        let port = FakePort::with_input(&[b"stale".as_slice(), b"bytes".as_slice()]);
        let mut control = JsonLinesControl::new(port);
        control.flush(Duration::from_secs(1), 3).unwrap();
        assert!(control.port.written.is_empty());
    }
}
