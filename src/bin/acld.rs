//! ACL Daemon - serial command mediator
//!
//! Reads ACL commands from stdin, sends them to the robot controller one at
//! a time and prints an annotated summary of each reply. Diagnostics go to
//! stderr so stdout stays clean for the summaries.

use acld::{simulator, transport, CommandStream, DaemonConfig, DeviceController, OutputFormat};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "acld")]
#[command(about = "ACL Daemon - serial command mediator for ACL robot controllers")]
#[command(version)]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Serial port to open (overrides the configuration file)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (overrides the configuration file)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Talk to the built-in controller simulator instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Output format for command summaries
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("DEFAULT_CONFIG_PATH").ok())
            .unwrap_or_else(|| acld::config::DEFAULT_CONFIG_PATH.to_string())
    }

    fn load_config(&self) -> Result<DaemonConfig> {
        let config_path = self.get_config_path();
        let mut config = if Path::new(&config_path).exists() {
            info!("Using config: {}", config_path);
            DaemonConfig::load_from_path(&config_path)
                .with_context(|| format!("Failed to load config from {}", config_path))?
        } else if self.config.is_some() {
            anyhow::bail!("Config file not found: {}", config_path);
        } else {
            warn!("Config file {} not found, using built-in defaults", config_path);
            DaemonConfig::default()
        };

        let mut serial = config.serial();
        if let Some(port) = &self.port {
            serial.port = Some(port.clone());
        }
        if let Some(baud) = self.baud {
            serial.baud_rate = baud;
        }
        config.serial = Some(serial);

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    if args.list_ports {
        let ports = transport::list_ports().context("Failed to enumerate serial ports")?;
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    info!("ACL Daemon");
    info!("{}", "=".repeat(50));

    let config = args.load_config()?;

    let handles = if args.simulate {
        info!("Using built-in controller simulator");
        simulator::connect()
    } else {
        match transport::open_serial(&config.serial()) {
            Ok(handles) => handles,
            Err(e) => {
                error!("Could not connect to the controller: {}", e);
                error!("Make sure:");
                error!("   - The controller is powered and the cable is attached");
                error!("   - The port name is right (see --list-ports)");
                error!("   - No other program holds the port open");
                return Err(e.into());
            }
        }
    };

    let controller = DeviceController::connect(config, handles)
        .context("Failed to start device controller")?;

    let mut stream = CommandStream::new(controller, args.format);
    let result = stream.run().await;

    info!("Performing graceful shutdown");
    stream.shutdown();

    match result {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Command stream error: {}", e);
            Err(e)
        }
    }
}
