//! Byte transport between the driver and the pump.
//!
//! [`Transport`] is the seam that lets the driver run against the real serial
//! port in production and against [`SimulatedPump`](crate::simulator::SimulatedPump)
//! in tests. A transport only moves bytes: it knows nothing about commands or
//! replies.

use crate::error::{PumpError, PumpResult};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Baud rate the pump ships with.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Read timeout for one reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Blocking byte transport for one pump.
pub trait Transport {
    /// Write one complete command frame.
    fn write_frame(&mut self, frame: &[u8]) -> PumpResult<()>;

    /// Fill `buffer` with reply bytes.
    ///
    /// Returns once the buffer is full or the read timeout elapses, with the
    /// number of bytes received. Zero means nothing arrived in time.
    fn read_response(&mut self, buffer: &mut [u8]) -> PumpResult<usize>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_frame(&mut self, frame: &[u8]) -> PumpResult<()> {
        (**self).write_frame(frame)
    }

    fn read_response(&mut self, buffer: &mut [u8]) -> PumpResult<usize> {
        (**self).read_response(buffer)
    }
}

/// Serial line parameters.
///
/// Framing is fixed by the pump (8 data bits, no parity, 2 stop bits); only the
/// port, speed and timeout vary between installations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM2")
    pub port: String,
    /// Line speed
    pub baud_rate: u32,
    /// Upper bound on a single reply read
    pub timeout: Duration,
}

impl SerialSettings {
    /// Settings for `port` at the pump's default speed and timeout.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the line speed.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Transport over a real serial port.
///
/// The port is opened in [`SerialTransport::open`] and closed when the
/// transport is dropped.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
    timeout: Duration,
}

impl SerialTransport {
    /// Open and configure the port.
    ///
    /// # Errors
    /// Returns [`PumpError::SerialPort`] if the port cannot be opened.
    pub fn open(settings: &SerialSettings) -> PumpResult<Self> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .flow_control(FlowControl::None)
            .timeout(settings.timeout)
            .open()?;

        info!(
            port = %settings.port,
            baud_rate = settings.baud_rate,
            "Opened Pump 33 serial port"
        );

        Ok(Self {
            port,
            name: settings.port.clone(),
            timeout: settings.timeout,
        })
    }

    /// Port path this transport was opened on.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn write_frame(&mut self, frame: &[u8]) -> PumpResult<()> {
        // Leftovers from a reply longer than the last read would be taken as
        // the answer to this command.
        self.port.clear(ClearBuffer::Input)?;
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_response(&mut self, buffer: &mut [u8]) -> PumpResult<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut filled = 0;

        while filled < buffer.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port.set_timeout(remaining)?;

            match self.port.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PumpError::Io(e)),
            }
        }

        Ok(filled)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!(port = %self.name, "Closing Pump 33 serial port");
    }
}
