//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. `config/pump33.toml` (or another file) as the base
//! 2. Environment variables prefixed with `PUMP33_`, nested keys split on `__`
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration for a pump at address 1 on the platform's usual port.
//!
//! # Example
//! ```no_run
//! use pump33::config::Pump33Config;
//!
//! let config = Pump33Config::load()?;
//! config.validate()?;
//! println!("Pump port: {}", config.pump.port);
//! # Ok::<(), pump33::error::PumpError>(())
//! ```
//!
//! Environment override: `PUMP33_PUMP__PORT=/dev/ttyS1`

use crate::error::{PumpError, PumpResult};
use crate::logging::{parse_log_level, OutputFormat};
use crate::protocol::{PumpAddress, MAX_ADDRESS};
use crate::transport::{SerialSettings, DEFAULT_BAUD_RATE};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/pump33.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PUMP33_";

/// Line speeds the Pump 33 can be set to.
pub const SUPPORTED_BAUD_RATES: [u32; 4] = [1200, 2400, 9600, 19200];

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Pump33Config {
    /// Application settings
    pub application: ApplicationConfig,
    /// Connection to the pump
    pub pump: PumpConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "pump33".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Serial connection and addressing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Serial port path
    pub port: String,
    /// Bus address (0-99)
    pub address: u8,
    /// Prefix commands with the address
    pub use_address: bool,
    /// Line speed
    pub baud_rate: u32,
    /// Reply read timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            address: PumpAddress::default().get(),
            use_address: true,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: 500,
        }
    }
}

fn default_port() -> &'static str {
    if cfg!(windows) {
        "COM2"
    } else {
        "/dev/ttyUSB0"
    }
}

impl PumpConfig {
    /// Serial parameters for opening the port.
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings::new(self.port.clone())
            .with_baud_rate(self.baud_rate)
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }

    /// Address to prefix commands with, `None` when addressing is off.
    pub fn pump_address(&self) -> PumpResult<Option<PumpAddress>> {
        if !self.use_address {
            return Ok(None);
        }
        let address = PumpAddress::new(self.address)
            .map_err(|e| PumpError::Configuration(e.to_string()))?;
        Ok(Some(address))
    }
}

impl Pump33Config {
    /// Load from `config/pump33.toml` and the environment.
    pub fn load() -> PumpResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults fill every field.
    pub fn load_from<P: AsRef<Path>>(path: P) -> PumpResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> PumpResult<()> {
        parse_log_level(&self.application.log_level).map_err(PumpError::Configuration)?;
        self.application
            .log_format
            .parse::<OutputFormat>()
            .map_err(PumpError::Configuration)?;

        if self.pump.port.trim().is_empty() {
            return Err(PumpError::Configuration(
                "pump.port must not be empty".to_string(),
            ));
        }

        if self.pump.address > MAX_ADDRESS {
            return Err(PumpError::Configuration(format!(
                "Invalid pump.address {}. Must be 0-{}",
                self.pump.address, MAX_ADDRESS
            )));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.pump.baud_rate) {
            return Err(PumpError::Configuration(format!(
                "Invalid pump.baud_rate {}. Must be one of: {}",
                self.pump.baud_rate,
                SUPPORTED_BAUD_RATES
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        if self.pump.timeout_ms == 0 {
            return Err(PumpError::Configuration(
                "pump.timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> PumpResult<String> {
        toml::to_string_pretty(self).map_err(|e| PumpError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Pump33Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pump.address, 1);
        assert!(config.pump.use_address);
        assert_eq!(config.pump.baud_rate, 9600);
        assert_eq!(config.pump.timeout_ms, 500);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Pump33Config::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(PumpError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_pump_settings() {
        let mut config = Pump33Config::default();
        config.pump.address = 100;
        assert!(config.validate().is_err());

        let mut config = Pump33Config::default();
        config.pump.baud_rate = 115200;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("1200, 2400, 9600, 19200"));

        let mut config = Pump33Config::default();
        config.pump.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pump_address() {
        let mut config = PumpConfig::default();
        assert_eq!(config.pump_address().unwrap(), Some(PumpAddress::default()));

        config.use_address = false;
        assert_eq!(config.pump_address().unwrap(), None);

        config.use_address = true;
        config.address = 120;
        assert!(config.pump_address().is_err());
    }

    #[test]
    fn test_serial_settings() {
        let config = PumpConfig {
            port: "/dev/ttyS3".to_string(),
            baud_rate: 19200,
            timeout_ms: 750,
            ..PumpConfig::default()
        };
        let settings = config.serial_settings();
        assert_eq!(settings.port, "/dev/ttyS3");
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Pump33Config::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[pump]"));
        let parsed: Pump33Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
