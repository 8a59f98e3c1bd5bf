//! Error types for the Pump 33 driver.
//!
//! `PumpError` is the single error type returned by every driver operation. It
//! separates the three ways an exchange with the pump can fail:
//!
//! - **`OutOfRange`**: the pump answered `OOR` to a rate or diameter setting. The
//!   rejected value is carried so the caller can clamp or pick another value.
//! - **`Parse`**: a response could not be mapped to the expected type (unknown mode
//!   code, non-numeric rate, no status marker).
//! - **`SerialPort`** / **`Io`**: the serial layer failed to open, write or read.
//!   These are propagated unchanged from `serialport` and `std::io`.
//!
//! Configuration failures (`Config`, `Configuration`) share the same enum so the
//! CLI can use `?` from loading the config file through to the last command.

use crate::protocol::ParseError;
use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type PumpResult<T> = std::result::Result<T, PumpError>;

/// Numeric pump parameter that the device can reject as out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    /// Flow rate in µl/min.
    Rate,
    /// Syringe inner diameter in mm.
    Diameter,
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Rate => f.write_str("rate"),
            Parameter::Diameter => f.write_str("diameter"),
        }
    }
}

/// Errors produced by the driver, its transport and its configuration.
#[derive(Error, Debug)]
pub enum PumpError {
    /// The pump answered `OOR` to a setting.
    #[error("Pump rejected {parameter} {value} as out of range")]
    OutOfRange {
        /// Which setting was rejected.
        parameter: Parameter,
        /// The value that was sent.
        value: f64,
    },

    /// A setting that cannot be written to the pump (NaN or infinite).
    #[error("Cannot send non-finite {parameter} {value} to the pump")]
    InvalidValue {
        /// Which setting was refused.
        parameter: Parameter,
        /// The value that was passed in.
        value: f64,
    },

    /// The pump did not recognise the command or it is not applicable right now.
    #[error("Pump rejected command '{command}' (reply: '{reply}')")]
    CommandRejected {
        /// Command without address prefix or terminator.
        command: String,
        /// First line of the pump's reply (`?` or `NA`).
        reply: String,
    },

    /// A response could not be interpreted.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Opening or configuring the serial port failed.
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// Writing to or reading from the connection failed.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file or environment could not be read.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration parsed but holds an invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl PumpError {
    /// Returns true for failures of the underlying serial connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, PumpError::SerialPort(_) | PumpError::Io(_))
    }
}

impl From<figment::Error> for PumpError {
    fn from(value: figment::Error) -> Self {
        PumpError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_message_names_parameter_and_value() {
        let err = PumpError::OutOfRange {
            parameter: Parameter::Diameter,
            value: 80.5,
        };
        assert_eq!(
            err.to_string(),
            "Pump rejected diameter 80.5 as out of range"
        );
        assert!(!err.is_connection_error());
    }

    #[test]
    fn invalid_value_is_not_a_connection_error() {
        let err = PumpError::InvalidValue {
            parameter: Parameter::Rate,
            value: f64::NAN,
        };
        assert_eq!(err.to_string(), "Cannot send non-finite rate NaN to the pump");
        assert!(!err.is_connection_error());
    }

    #[test]
    fn io_errors_are_connection_errors() {
        let err: PumpError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged").into();
        assert!(err.is_connection_error());
        assert!(err.to_string().contains("unplugged"));
    }

    #[test]
    fn parse_error_is_transparent() {
        let err: PumpError = ParseError::new("pump mode", "XYZ\r\n1:").into();
        assert!(err.to_string().contains("pump mode"));
        assert!(matches!(err, PumpError::Parse(_)));
    }
}
