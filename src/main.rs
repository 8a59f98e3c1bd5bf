//! CLI Entry Point for pump33
//!
//! Sends one command to a Harvard Apparatus Pump 33 and prints the result.
//!
//! # Usage
//!
//! Query the pump:
//! ```bash
//! pump33 --port /dev/ttyUSB0 status
//! pump33 snapshot --json
//! ```
//!
//! Configure and start it:
//! ```bash
//! pump33 diameter 14.5
//! pump33 rate 250
//! pump33 mode CON
//! pump33 run
//! ```
//!
//! Try it without hardware:
//! ```bash
//! pump33 --simulate snapshot
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pump33::config::{Pump33Config, DEFAULT_CONFIG_PATH};
use pump33::logging;
use pump33::simulator::SimulatedPump;
use pump33::transport::{SerialTransport, Transport};
use pump33::{Pump33, PumpDirection, PumpMode};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "pump33")]
#[command(about = "Control a Harvard Apparatus Pump 33 over RS-232", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overriding the configuration
    #[arg(long, global = true)]
    port: Option<String>,

    /// Pump address, overriding the configuration (turns addressing on)
    #[arg(long, global = true)]
    address: Option<u8>,

    /// Talk to a simulated pump instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Log level, overriding the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the operating state
    Status,

    /// Print the pump identification string
    Version,

    /// Print or set the flow rate in µl/min
    Rate {
        /// New rate
        #[arg(allow_negative_numbers = true)]
        value: Option<f64>,
    },

    /// Print or set the syringe diameter in mm (stops the pump)
    Diameter {
        /// New diameter
        #[arg(allow_negative_numbers = true)]
        value: Option<f64>,
    },

    /// Print or set the pumping mode (AUT, PRO, CON)
    Mode {
        /// New mode
        mode: Option<PumpMode>,
    },

    /// Print or set the direction (INF, REF, REV)
    Direction {
        /// New direction
        direction: Option<PumpDirection>,
    },

    /// Swap infuse and refill
    Reverse,

    /// Switch parallel mode on or off
    Parallel {
        /// on or off
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },

    /// Start pumping
    Run,

    /// Stop pumping
    Stop,

    /// Print everything the pump reports
    Snapshot {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Pump33Config::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    apply_overrides(&mut config, &cli);
    config.validate().context("Invalid configuration")?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    if let Commands::ShowConfig = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let address = config.pump.pump_address()?;
    let transport: Box<dyn Transport> = if cli.simulate {
        info!("Using simulated pump");
        Box::new(SimulatedPump::new().with_address(address))
    } else {
        open_serial(&config)?
    };
    let mut pump = Pump33::new(transport).with_address(address);

    execute(&mut pump, cli.command)
}

fn apply_overrides(config: &mut Pump33Config, cli: &Cli) {
    if let Some(port) = &cli.port {
        config.pump.port = port.clone();
    }
    if let Some(address) = cli.address {
        config.pump.address = address;
        config.pump.use_address = true;
    }
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
}

fn open_serial(config: &Pump33Config) -> Result<Box<dyn Transport>> {
    let transport = SerialTransport::open(&config.pump.serial_settings())
        .with_context(|| format!("Failed to open pump on {}", config.pump.port))?;
    Ok(Box::new(transport))
}

fn execute(pump: &mut Pump33<Box<dyn Transport>>, command: Commands) -> Result<()> {
    match command {
        Commands::Status => println!("{}", pump.status()?),
        Commands::Version => println!("{}", pump.pump_version()?),
        Commands::Rate { value: Some(rate) } => pump.set_rate(rate)?,
        Commands::Rate { value: None } => println!("{} µl/min", pump.rate()?),
        Commands::Diameter {
            value: Some(diameter),
        } => pump.set_diameter(diameter)?,
        Commands::Diameter { value: None } => println!("{} mm", pump.diameter()?),
        Commands::Mode { mode: Some(mode) } => pump.set_mode(mode)?,
        Commands::Mode { mode: None } => println!("{}", pump.mode()?),
        Commands::Direction {
            direction: Some(direction),
        } => pump.set_direction(direction)?,
        Commands::Direction { direction: None } => println!("{}", pump.direction()?),
        Commands::Reverse => pump.reverse()?,
        Commands::Parallel { state } => pump.set_parallel(state == "on")?,
        Commands::Run => pump.run()?,
        Commands::Stop => pump.stop()?,
        Commands::Snapshot { json } => {
            let snapshot = pump.snapshot()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("Version:   {}", snapshot.version);
                println!("State:     {}", snapshot.state);
                println!("Rate:      {} µl/min", snapshot.rate_ul_per_min);
                println!("Diameter:  {} mm", snapshot.diameter_mm);
                println!("Mode:      {}", snapshot.mode);
                println!("Direction: {}", snapshot.direction);
            }
        }
        // Handled before the pump is opened
        Commands::ShowConfig => {}
    }
    Ok(())
}
