//! dutlink - command line host for DUT control
//!
//! Stands in for a test executive: connects to a DUT over TCP or a serial
//! line, runs one operation and disconnects. `simulate` runs a virtual DUT.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

use dutlink_core::config::{ConnectionConfig, TransportConfig};
use dutlink_core::dut::DutSession;
use dutlink_core::protocol::{list_ports, DEFAULT_BAUD_RATE, DEFAULT_TCP_PORT};
use dutlink_core::sim::{self, VirtualDut};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dutlink")]
#[command(about = "Drive a Device Under Test and read its bit error counters")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON connection config
    #[arg(short = 'c', long, global = true, env = "DUTLINK_CONFIG")]
    config: Option<PathBuf>,

    /// DUT host (selects the TCP transport)
    #[arg(long, global = true, conflicts_with = "device")]
    host: Option<String>,

    /// DUT TCP port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Serial device (selects the serial transport)
    #[arg(long, global = true)]
    device: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Response timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,
    /// List DUT locations
    Locations,
    /// List DUT device modes
    Modes,
    /// Apply a device mode
    SetMode { mode: String },
    /// Initialize a location
    Init { location: String, arg: String },
    /// Synchronize a location to the received pattern
    Sync { location: String },
    /// Poll bit error counters of a location
    Ber {
        location: String,
        /// Number of polls
        #[arg(short = 'n', long, default_value_t = 1)]
        polls: u32,
        /// Delay between polls in milliseconds
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,
        /// One JSON reading per line
        #[arg(long)]
        json: bool,
    },
    /// Set the error ratio of a simulated DUT
    SetErrorRatio { ratio: f64 },
    /// Run a virtual DUT on a TCP port
    Simulate {
        /// Listen port
        #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
        listen: u16,
        /// Seed for reproducible error patterns
        #[arg(long)]
        seed: Option<u64>,
        /// Initial error ratio
        #[arg(long)]
        error_ratio: Option<f64>,
    },
}

/// Config file (or defaults) with command line overrides applied
fn build_config(cli: &Cli) -> Result<ConnectionConfig> {
    let mut config = match &cli.config {
        Some(path) => ConnectionConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ConnectionConfig::default(),
    };

    if let Some(device) = &cli.device {
        config.transport = TransportConfig::Serial {
            device: device.clone(),
            baud_rate: cli.baud.unwrap_or(DEFAULT_BAUD_RATE),
        };
    } else if cli.host.is_some() || cli.port.is_some() {
        let (host, port) = match &config.transport {
            TransportConfig::Tcp { host, port } => (host.clone(), *port),
            TransportConfig::Serial { .. } => ("127.0.0.1".to_string(), DEFAULT_TCP_PORT),
        };
        config.transport = TransportConfig::Tcp {
            host: cli.host.clone().unwrap_or(host),
            port: cli.port.unwrap_or(port),
        };
    } else if let (Some(baud), TransportConfig::Serial { baud_rate, .. }) =
        (cli.baud, &mut config.transport)
    {
        *baud_rate = baud;
    }

    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }

    config.validate()?;
    Ok(config)
}

fn run_session(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;
    let session = DutSession::new(config);

    match &cli.command {
        Commands::Locations => {
            for location in session.get_locations() {
                println!("{}", location);
            }
            return Ok(());
        }
        Commands::Modes => {
            for mode in session.get_device_modes() {
                println!("{}", mode);
            }
            return Ok(());
        }
        _ => {}
    }

    session
        .connect()
        .with_context(|| format!("connecting to {}", session.connection().config().transport))?;

    let result = run_operation(&session, &cli.command);
    session.disconnect();
    result
}

fn run_operation(session: &DutSession, command: &Commands) -> Result<()> {
    match command {
        Commands::SetMode { mode } => session.set_device_mode(mode)?,
        Commands::Init { location, arg } => session.init(location, arg)?,
        Commands::Sync { location } => session.sync_pattern(location)?,
        Commands::SetErrorRatio { ratio } => session.set_simulated_error_ratio(*ratio)?,
        Commands::Ber {
            location,
            polls,
            interval_ms,
            json,
        } => {
            for poll in 0..*polls {
                if poll > 0 {
                    std::thread::sleep(Duration::from_millis(*interval_ms));
                }
                let reading = session.poll_ber(location)?;
                if *json {
                    println!("{}", serde_json::to_string(&reading)?);
                } else {
                    let ratio = reading
                        .total
                        .error_ratio()
                        .map(|r| format!("{:.3e}", r))
                        .unwrap_or_else(|| "n/a".to_string());
                    println!(
                        "{} {}: delta [{}] total [{}] BER {}",
                        reading.timestamp.format("%H:%M:%S"),
                        reading.location,
                        reading.delta,
                        reading.total,
                        ratio
                    );
                }
            }
        }
        Commands::Ports | Commands::Locations | Commands::Modes | Commands::Simulate { .. } => {}
    }
    Ok(())
}

fn simulate(listen: u16, seed: Option<u64>, error_ratio: Option<f64>) -> Result<()> {
    let mut dut = match seed {
        Some(seed) => VirtualDut::with_seed(seed),
        None => VirtualDut::new(),
    };
    if let Some(ratio) = error_ratio {
        dut = dut.with_error_ratio(ratio);
    }
    let listener = TcpListener::bind(("0.0.0.0", listen))
        .with_context(|| format!("binding port {}", listen))?;
    info!("Simulating DUT with error ratio {:e}", dut.error_ratio());
    sim::serve(listener, dut)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Ports => {
            for port in list_ports() {
                match &port.product {
                    Some(product) => println!("{}\t{}", port.name, product),
                    None => println!("{}", port.name),
                }
            }
            Ok(())
        }
        Commands::Simulate {
            listen,
            seed,
            error_ratio,
        } => simulate(*listen, *seed, *error_ratio),
        _ => run_session(&cli),
    }
}
