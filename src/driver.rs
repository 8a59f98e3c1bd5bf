//! Harvard Apparatus Pump 33 Syringe Pump Driver
//!
//! Reference: Pump 33 User's Manual, RS-232 command set
//!
//! Protocol Overview:
//! - Format: `[<address>]<COMMAND>[ <ARG>[ <UNIT>]]\r`
//! - Baud: 9600, 8 data bits, no parity, 2 stop bits
//! - Replies: up to 64 bytes, value line then `<address><marker>` prompt
//! - Commands: RAT (rate), DIA (diameter), MOD (mode), DIR (direction),
//!   PAR (parallel), RUN, STP, VER
//!
//! # Important Notes
//!
//! - Every operation is one blocking write-then-read round trip
//! - Rates are always sent in µl/min (`UM`)
//! - The diameter is only changed with the pump stopped; `set_diameter`
//!   sends `STP` first
//! - Nothing is retried. Errors go straight back to the caller
//!
//! # Example Usage
//!
//! ```no_run
//! use pump33::driver::Pump33;
//! use pump33::protocol::{PumpDirection, PumpMode};
//! use pump33::transport::SerialSettings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut pump = Pump33::open(&SerialSettings::new("/dev/ttyUSB0"))?;
//!
//!     pump.set_diameter(14.5)?;
//!     pump.set_rate(250.0)?;
//!     pump.set_mode(PumpMode::Continuous)?;
//!     pump.set_direction(PumpDirection::Infuse)?;
//!     pump.run()?;
//!
//!     println!("State: {}", pump.status()?);
//!     Ok(())
//! }
//! ```

use crate::error::{Parameter, PumpError, PumpResult};
use crate::protocol::{
    self, decode_response, format_significant, frame_command, PumpAddress, PumpDirection,
    PumpMode, PumpState, RATE_UNIT, RESPONSE_BUFFER_LEN, SIGNIFICANT_DIGITS,
};
use crate::transport::{SerialSettings, SerialTransport, Transport};
use serde::Serialize;
use tracing::{debug, warn};

/// Everything the pump reports about itself, read in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PumpSnapshot {
    /// Identification string
    pub version: String,
    /// Operating state
    pub state: PumpState,
    /// Flow rate in µl/min
    pub rate_ul_per_min: f64,
    /// Syringe inner diameter in mm
    pub diameter_mm: f64,
    /// Pumping mode
    pub mode: PumpMode,
    /// Direction as reported ("INFUSE" or "REFILL")
    pub direction: String,
}

/// Driver for one Pump 33 on an exclusively owned connection.
///
/// Keeps no state besides the connection and the address; every getter asks
/// the pump.
pub struct Pump33<T: Transport> {
    transport: T,
    address: Option<PumpAddress>,
}

impl Pump33<SerialTransport> {
    /// Open the serial port and talk to the pump at the default address.
    ///
    /// # Errors
    /// Returns error if the serial port cannot be opened
    pub fn open(settings: &SerialSettings) -> PumpResult<Self> {
        Ok(Self::new(SerialTransport::open(settings)?))
    }
}

impl<T: Transport> Pump33<T> {
    /// Wrap an already open transport. Commands are prefixed with address 1.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            address: Some(PumpAddress::default()),
        }
    }

    /// Use another address, or `None` to send commands without a prefix.
    pub fn with_address(mut self, address: Option<PumpAddress>) -> Self {
        self.address = address;
        self
    }

    /// Address prefixed onto commands, if any.
    pub fn address(&self) -> Option<PumpAddress> {
        self.address
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Give the transport back, closing the driver.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Set the flow rate in µl/min.
    ///
    /// # Errors
    /// [`PumpError::OutOfRange`] if the pump refuses the rate,
    /// [`PumpError::InvalidValue`] for NaN or infinity
    pub fn set_rate(&mut self, rate: f64) -> PumpResult<()> {
        ensure_finite(Parameter::Rate, rate)?;
        let command = format!(
            "RAT {} {}",
            format_significant(rate, SIGNIFICANT_DIGITS),
            RATE_UNIT
        );
        self.set_value(&command, Parameter::Rate, rate)
    }

    /// Current flow rate in µl/min.
    pub fn rate(&mut self) -> PumpResult<f64> {
        let response = self.write_and_read("RAT")?;
        Ok(protocol::parse_number(&response, "rate")?)
    }

    /// Set the syringe inner diameter in mm.
    ///
    /// Stops the pump first so the geometry never changes mid-run.
    ///
    /// # Errors
    /// [`PumpError::OutOfRange`] if the pump refuses the diameter,
    /// [`PumpError::InvalidValue`] for NaN or infinity
    pub fn set_diameter(&mut self, diameter: f64) -> PumpResult<()> {
        ensure_finite(Parameter::Diameter, diameter)?;
        self.stop()?;
        let command = format!("DIA {}", format_significant(diameter, SIGNIFICANT_DIGITS));
        self.set_value(&command, Parameter::Diameter, diameter)
    }

    /// Current syringe diameter in mm.
    pub fn diameter(&mut self) -> PumpResult<f64> {
        let response = self.write_and_read("DIA")?;
        Ok(protocol::parse_number(&response, "diameter")?)
    }

    /// Select auto-stop, proportional or continuous pumping.
    pub fn set_mode(&mut self, mode: PumpMode) -> PumpResult<()> {
        self.send(&format!("MOD {}", mode.code()))
    }

    /// Current pumping mode.
    pub fn mode(&mut self) -> PumpResult<PumpMode> {
        let response = self.write_and_read("MOD")?;
        Ok(protocol::parse_mode(&response)?)
    }

    /// Set the pumping direction.
    pub fn set_direction(&mut self, direction: PumpDirection) -> PumpResult<()> {
        self.send(&format!("DIR {}", direction.code()))
    }

    /// Current direction as the pump spells it: `INFUSE` or `REFILL`.
    ///
    /// # Errors
    /// [`PumpError::Parse`] for any other reply, including a timeout
    pub fn direction(&mut self) -> PumpResult<String> {
        let response = self.write_and_read("DIR")?;
        check_rejection("DIR", &response)?;
        Ok(protocol::parse_direction(&response)?.to_string())
    }

    /// Swap infuse and refill.
    pub fn reverse(&mut self) -> PumpResult<()> {
        self.set_direction(PumpDirection::Reverse)
    }

    /// Drive both syringes in parallel (`true`) or reciprocal (`false`) mode.
    pub fn set_parallel(&mut self, enabled: bool) -> PumpResult<()> {
        self.send(if enabled { "PAR ON" } else { "PAR OFF" })
    }

    /// Start pumping with the configured direction and mode.
    pub fn run(&mut self) -> PumpResult<()> {
        self.send("RUN")
    }

    /// Stop pumping immediately.
    pub fn stop(&mut self) -> PumpResult<()> {
        self.send("STP")
    }

    /// Operating state from the prompt marker.
    ///
    /// Sends an empty command, which the pump answers with its prompt alone.
    ///
    /// # Errors
    /// [`PumpError::Parse`] when the reply holds no marker, e.g. after a timeout
    pub fn status(&mut self) -> PumpResult<PumpState> {
        let response = self.write_and_read("")?;
        Ok(protocol::parse_state(&response)?)
    }

    /// Identification string, e.g. `33V1.0`.
    pub fn pump_version(&mut self) -> PumpResult<String> {
        let response = self.write_and_read("VER")?;
        check_rejection("VER", &response)?;
        Ok(protocol::parse_text(&response, "pump version")?.to_string())
    }

    /// Read version, state, rate, diameter, mode and direction.
    pub fn snapshot(&mut self) -> PumpResult<PumpSnapshot> {
        Ok(PumpSnapshot {
            version: self.pump_version()?,
            state: self.status()?,
            rate_ul_per_min: self.rate()?,
            diameter_mm: self.diameter()?,
            mode: self.mode()?,
            direction: self.direction()?,
        })
    }

    /// One round trip: frame `command`, write it, read one reply.
    ///
    /// Returns the decoded reply untouched, prompt and control characters
    /// included. An empty string means nothing arrived before the timeout.
    pub fn write_and_read(&mut self, command: &str) -> PumpResult<String> {
        let frame = frame_command(self.address, command);
        self.transport.write_frame(frame.as_bytes())?;

        let mut buffer = [0u8; RESPONSE_BUFFER_LEN];
        let n = self.transport.read_response(&mut buffer)?;
        let response = decode_response(&buffer[..n]);

        debug!(
            command = %frame.escape_default(),
            response = %response.escape_default(),
            "Pump 33 exchange"
        );
        Ok(response)
    }

    // Command whose reply only needs checking for a refusal.
    fn send(&mut self, command: &str) -> PumpResult<()> {
        let response = self.write_and_read(command)?;
        check_rejection(command, &response)
    }

    fn set_value(&mut self, command: &str, parameter: Parameter, value: f64) -> PumpResult<()> {
        let response = self.write_and_read(command)?;
        if protocol::is_out_of_range(&response) {
            warn!(%parameter, value, "Pump 33 rejected value as out of range");
            return Err(PumpError::OutOfRange { parameter, value });
        }
        check_rejection(command, &response)
    }
}

fn ensure_finite(parameter: Parameter, value: f64) -> PumpResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PumpError::InvalidValue { parameter, value })
    }
}

fn check_rejection(command: &str, response: &str) -> PumpResult<()> {
    match protocol::rejection(response) {
        Some(reply) => Err(PumpError::CommandRejected {
            command: command.to_string(),
            reply: reply.to_string(),
        }),
        None => Ok(()),
    }
}
