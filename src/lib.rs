//! # Pump 33 Driver Library
//!
//! Serial command driver for the Harvard Apparatus Pump 33 syringe pump. Each
//! high-level operation (set rate, set diameter, choose mode and direction,
//! run/stop, query state) becomes one ASCII command and one blocking read of the
//! pump's reply, parsed back into a typed value.
//!
//! ## Crate Structure
//!
//! - **`driver`**: The `Pump33` driver with one method per pump command.
//! - **`protocol`**: Command codes, frame building, `%g`-style number formatting
//!   and the reply parser.
//! - **`transport`**: The `Transport` trait and its serial port implementation.
//! - **`simulator`**: An in-process pump speaking the same protocol, for tests
//!   and hardware-free runs.
//! - **`error`**: The `PumpError` enum shared by every operation.
//! - **`config`**: Figment-based configuration from TOML and the environment.
//! - **`logging`**: `tracing-subscriber` initialization for binaries.

pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod simulator;
pub mod transport;

pub use driver::{Pump33, PumpSnapshot};
pub use error::{PumpError, PumpResult};
pub use protocol::{PumpAddress, PumpDirection, PumpMode, PumpState};
