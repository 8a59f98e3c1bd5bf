//! Simulated Pump 33
//!
//! Provides an in-process pump that speaks the same wire protocol as the real
//! device, for testing and for running the CLI without hardware.
//!
//! The simulated pump:
//! - answers only frames carrying its address (when it has one)
//! - replies `OOR` to rates or diameters outside its limits
//! - replies `NA` to a diameter change while running
//! - replies `?` to anything it does not understand
//! - ends every reply with its address and a state marker prompt
//!
//! Clones share one device, so a test can keep a handle for inspection after
//! moving another into the driver.
//!
//! # Example
//!
//! ```rust
//! use pump33::driver::Pump33;
//! use pump33::simulator::SimulatedPump;
//!
//! let pump = SimulatedPump::new();
//! let mut driver = Pump33::new(pump.clone());
//! driver.set_rate(5000.0).unwrap();
//! assert_eq!(pump.commands(), vec!["1RAT 5000 UM\r"]);
//! ```

use crate::error::PumpResult;
use crate::protocol::{
    decode_response, format_significant, PumpAddress, PumpDirection, PumpMode, PumpState,
    RATE_UNIT, SIGNIFICANT_DIGITS,
};
use crate::transport::Transport;
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Rates the simulated pump accepts, in µl/min.
pub const RATE_LIMITS: RangeInclusive<f64> = 0.0001..=55_000.0;

/// Syringe diameters the simulated pump accepts, in mm.
pub const DIAMETER_LIMITS: RangeInclusive<f64> = 0.1..=50.0;

/// Identification string reported by `VER`.
pub const DEFAULT_VERSION: &str = "33V1.0";

#[derive(Debug)]
struct SimState {
    address: Option<PumpAddress>,
    version: String,
    rate: f64,
    diameter: f64,
    mode: PumpMode,
    infusing: bool,
    parallel: bool,
    running: bool,
    stalled: bool,
    silent: bool,
    commands: Vec<String>,
    canned: VecDeque<String>,
    pending: Vec<u8>,
}

impl SimState {
    fn prompt(&self) -> String {
        let state = if self.stalled {
            PumpState::Stalled
        } else if !self.running {
            PumpState::Stopped
        } else if self.infusing {
            PumpState::Infusing
        } else {
            PumpState::Refilling
        };

        match self.address {
            Some(address) => format!("{}{}", address, state.marker()),
            None => state.marker().to_string(),
        }
    }

    fn reply(&self, data: Option<&str>) -> String {
        match data {
            Some(data) => format!("\r\n{}\r\n{}", data, self.prompt()),
            None => format!("\r\n{}", self.prompt()),
        }
    }

    // Split the address prefix off a frame. None when the frame is for another pump.
    fn strip_address<'a>(&self, frame: &'a str) -> Option<&'a str> {
        let digits = frame.chars().take_while(char::is_ascii_digit).count();
        let (prefix, command) = frame.split_at(digits);
        match self.address {
            Some(address) if prefix.parse::<u8>().ok() != Some(address.get()) => None,
            _ => Some(command),
        }
    }

    fn execute(&mut self, command: &str) -> String {
        let mut parts = command.split_whitespace();
        let verb = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        match (verb, args.as_slice()) {
            ("", []) => self.reply(None),
            ("RAT", []) => {
                let rate = format_significant(self.rate, SIGNIFICANT_DIGITS);
                self.reply(Some(&rate))
            }
            ("RAT", [value, unit]) if *unit == RATE_UNIT => match value.parse::<f64>() {
                Ok(rate) if RATE_LIMITS.contains(&rate) => {
                    self.rate = rate;
                    self.reply(None)
                }
                Ok(_) => self.reply(Some("OOR")),
                Err(_) => self.reply(Some("?")),
            },
            ("DIA", []) => {
                let diameter = format_significant(self.diameter, SIGNIFICANT_DIGITS);
                self.reply(Some(&diameter))
            }
            ("DIA", [_]) if self.running => self.reply(Some("NA")),
            ("DIA", [value]) => match value.parse::<f64>() {
                Ok(diameter) if DIAMETER_LIMITS.contains(&diameter) => {
                    self.diameter = diameter;
                    self.reply(None)
                }
                Ok(_) => self.reply(Some("OOR")),
                Err(_) => self.reply(Some("?")),
            },
            ("MOD", []) => self.reply(Some(self.mode.code())),
            ("MOD", [code]) => match code.parse::<PumpMode>() {
                Ok(mode) if mode.code() == *code => {
                    self.mode = mode;
                    self.reply(None)
                }
                _ => self.reply(Some("?")),
            },
            ("DIR", []) => {
                let direction = if self.infusing { "INFUSE" } else { "REFILL" };
                self.reply(Some(direction))
            }
            ("DIR", [code]) => match code.parse::<PumpDirection>() {
                Ok(direction) if direction.code() == *code => {
                    self.infusing = match direction {
                        PumpDirection::Infuse => true,
                        PumpDirection::Refill => false,
                        PumpDirection::Reverse => !self.infusing,
                    };
                    self.reply(None)
                }
                _ => self.reply(Some("?")),
            },
            ("PAR", []) => self.reply(Some(if self.parallel { "ON" } else { "OFF" })),
            ("PAR", ["ON"]) => {
                self.parallel = true;
                self.reply(None)
            }
            ("PAR", ["OFF"]) => {
                self.parallel = false;
                self.reply(None)
            }
            ("RUN", []) => {
                self.running = true;
                self.stalled = false;
                self.reply(None)
            }
            ("STP", []) => {
                self.running = false;
                self.stalled = false;
                self.reply(None)
            }
            ("VER", []) => self.reply(Some(self.version.as_str())),
            _ => self.reply(Some("?")),
        }
    }
}

/// In-process Pump 33 implementing [`Transport`].
#[derive(Debug, Clone)]
pub struct SimulatedPump {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedPump {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPump {
    /// Stopped pump at address 1, infusing, auto-stop mode.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                address: Some(PumpAddress::default()),
                version: DEFAULT_VERSION.to_string(),
                rate: 1.0,
                diameter: 10.0,
                mode: PumpMode::AutoStop,
                infusing: true,
                parallel: false,
                running: false,
                stalled: false,
                silent: false,
                commands: Vec::new(),
                canned: VecDeque::new(),
                pending: Vec::new(),
            })),
        }
    }

    /// Give the pump a different address, or none to accept unprefixed frames.
    pub fn with_address(self, address: Option<PumpAddress>) -> Self {
        self.lock().address = address;
        self
    }

    /// Report a different identification string.
    pub fn with_version(self, version: &str) -> Self {
        self.lock().version = version.to_string();
        self
    }

    /// Queue a raw reply that replaces the next computed one.
    ///
    /// The command is still recorded but has no effect on the pump.
    pub fn push_response(&self, raw: impl Into<String>) {
        self.lock().canned.push_back(raw.into());
    }

    /// Mark the pump stalled, as after a motor overload.
    pub fn stall(&self) {
        self.lock().stalled = true;
    }

    /// Stop answering, as if unplugged. Reads then return no bytes.
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Every frame received so far, exactly as written.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Forget the received frames.
    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    /// Current rate in µl/min.
    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    /// Current syringe diameter in mm.
    pub fn diameter(&self) -> f64 {
        self.lock().diameter
    }

    /// Current pumping mode.
    pub fn mode(&self) -> PumpMode {
        self.lock().mode
    }

    /// Whether the plunger is moving.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Whether parallel mode is on.
    pub fn is_parallel(&self) -> bool {
        self.lock().parallel
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for SimulatedPump {
    fn write_frame(&mut self, frame: &[u8]) -> PumpResult<()> {
        let text = decode_response(frame);
        trace!(frame = %text.escape_default(), "Simulated pump received frame");

        let mut state = self.lock();
        state.commands.push(text.clone());
        state.pending.clear();

        if state.silent {
            return Ok(());
        }
        let Some(command) = text.strip_suffix('\r') else {
            return Ok(());
        };
        let Some(command) = state.strip_address(command) else {
            return Ok(());
        };

        let reply = match state.canned.pop_front() {
            Some(canned) => canned,
            None => state.execute(command),
        };
        state.pending = reply.into_bytes();
        Ok(())
    }

    fn read_response(&mut self, buffer: &mut [u8]) -> PumpResult<usize> {
        let mut state = self.lock();
        let n = state.pending.len().min(buffer.len());
        buffer[..n].copy_from_slice(&state.pending[..n]);
        state.pending.drain(..n);
        Ok(n)
    }
}
