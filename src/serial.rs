//! Serial-port binding for the [`StreamReader`] seam.
//!
//! The port handle is exclusively owned by one [`SerialStream`] for the
//! lifetime of a session; serial devices are not safely multiplexable at the
//! byte level. The command channel gets its own cloned handle instead.

use std::io::{self, Read};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use serialport::{SerialPort, SerialPortType};

use crate::deframer::StreamReader;

/// Serial baud rate of the HackEEG firmware.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Per-read timeout; expiry means an idle link, not a fault.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Open a serial port with the timeout the deframer expects.
pub fn open_port(path: &str, baud: u32) -> Result<Box<dyn SerialPort>> {
    let port = serialport::new(path, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .with_context(|| format!("failed to open serial port at {path}"))?;
    debug!("opened serial port {path} at {baud} baud");
    Ok(port)
}

/// Find the board by USB product description.
///
/// Errors if no candidate is attached; picks the first with a warning when
/// several are.
pub fn locate_port() -> Result<String> {
    let ports = serialport::available_ports().context("listing serial ports")?;
    let mut candidates: Vec<String> = ports
        .into_iter()
        .filter(|p| match &p.port_type {
            SerialPortType::UsbPort(info) => info
                .product
                .as_deref()
                .is_some_and(|product| product.contains("Arduino")),
            _ => false,
        })
        .map(|p| p.port_name)
        .collect();
    if candidates.is_empty() {
        anyhow::bail!("no Arduino serial port found; pass --port explicitly");
    }
    if candidates.len() > 1 {
        warn!("multiple Arduino ports found, using the first: {candidates:?}");
    }
    Ok(candidates.remove(0))
}

/// [`StreamReader`] over a live serial port.
pub struct SerialStream {
    port: Box<dyn SerialPort>,
}

impl SerialStream {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        SerialStream { port }
    }
}

impl StreamReader for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // Timeout just means no bytes arrived yet.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}
