//! mbctl - Modbus TCP command line client
//!
//! One-shot reads and writes, or periodic polling, against a single
//! Modbus TCP server through the queued client.

mod shutdown;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use voltage_modbus_client::{ClientConfig, ModbusClientTcp, ModbusError, ModbusMessage, TcpTransport};

#[derive(Parser)]
#[command(name = "mbctl")]
#[command(about = "Modbus TCP command line client")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "MBCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Server host (overrides the configured target)
    #[arg(long, env = "MBCTL_HOST")]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Response timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u32>,

    /// Minimum gap between requests in milliseconds
    #[arg(long)]
    interval_ms: Option<u32>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read holding (FC03) or input (FC04) registers
    Read {
        #[arg(short, long, default_value_t = 1)]
        unit: u8,
        /// Function code: 3 or 4
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(3..=4))]
        fc: u8,
        #[arg(short, long)]
        address: u16,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u16,
    },
    /// Write a single holding register (FC06)
    Write {
        #[arg(short, long, default_value_t = 1)]
        unit: u8,
        #[arg(short, long)]
        address: u16,
        #[arg(short, long)]
        value: u16,
    },
    /// Read holding registers repeatedly until interrupted
    Poll {
        #[arg(short, long, default_value_t = 1)]
        unit: u8,
        #[arg(short, long)]
        address: u16,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u16,
        /// Poll period in milliseconds
        #[arg(long, default_value_t = 1000)]
        every_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = load_config(&cli)?;
    let client = ModbusClientTcp::from_config(TcpTransport::new(), &config)
        .context("Invalid client configuration")?;
    if !client.begin() {
        bail!("Client worker did not start");
    }
    info!("Target: {}", client.target());

    let result = match cli.command {
        Commands::Read {
            unit,
            fc,
            address,
            count,
        } => read(&client, ModbusMessage::read_registers(unit, fc, address, count), address).await,
        Commands::Write {
            unit,
            address,
            value,
        } => write(&client, unit, address, value).await,
        Commands::Poll {
            unit,
            address,
            count,
            every_ms,
        } => poll(&client, unit, address, count, every_ms).await,
    };

    client.shutdown().await;
    result
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// File or environment configuration with command line overrides
fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ClientConfig::load().context("Failed to load configuration")?,
    };

    let mut target = config.target.take().unwrap_or_default();
    if let Some(host) = &cli.host {
        target.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        target.port = port;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        target.timeout_ms = timeout_ms;
    }
    if let Some(interval_ms) = cli.interval_ms {
        target.interval_ms = interval_ms;
    }
    if target.host.trim().is_empty() {
        bail!("No target host: pass --host or set target.host in the configuration");
    }
    config.target = Some(target);

    debug!("Effective config: {:?}", config);
    Ok(config)
}

async fn read(client: &ModbusClientTcp, request: ModbusMessage, address: u16) -> Result<()> {
    let response = client.sync_request(request, 1).await;
    check(&response)?;

    let values = response.registers().context("Malformed register response")?;
    print_registers(address, &values);
    Ok(())
}

async fn write(client: &ModbusClientTcp, unit: u8, address: u16, value: u16) -> Result<()> {
    let response = client
        .sync_request(ModbusMessage::write_single_register(unit, address, value), 1)
        .await;
    check(&response)?;

    println!(
        "{} register {} = {}",
        "✓".green(),
        address.to_string().cyan(),
        format!("{value} (0x{value:04X})").bold()
    );
    Ok(())
}

async fn poll(
    client: &ModbusClientTcp,
    unit: u8,
    address: u16,
    count: u16,
    every_ms: u64,
) -> Result<()> {
    let request = ModbusMessage::read_registers(unit, 0x03, address, count);
    let rc = request.error();
    if !rc.is_success() {
        bail!("Invalid request: {}", rc);
    }

    client.on_data_handler(move |response, token| match response.registers() {
        Ok(values) => {
            println!("{}", format!("#{token}").dimmed());
            print_registers(address, &values);
        },
        Err(e) => eprintln!("{} #{}: {}", "✗".red(), token, e),
    });
    client.on_error_handler(|error, token| {
        eprintln!("{} #{}: {} ({:#04X})", "✗".red(), token, error, error.code());
    });

    let cycle = async {
        let mut token: u32 = 0;
        let mut ticker = tokio::time::interval(Duration::from_millis(every_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            token = token.wrapping_add(1);
            match client.add_request(request.clone(), token) {
                ModbusError::Success => {},
                rc => eprintln!("{} #{}: {}", "✗".red(), token, rc),
            }
        }
    };

    tokio::select! {
        _ = cycle => {},
        _ = shutdown::wait_for_shutdown() => {
            info!("Polling stopped");
        },
    }

    println!(
        "{} requests, {} errors",
        client.message_count().to_string().bold(),
        client.error_count().to_string().red()
    );
    Ok(())
}

fn check(response: &ModbusMessage) -> Result<()> {
    let error = response.error();
    if error.is_success() {
        return Ok(());
    }
    bail!("{} ({:#04X})", error, error.code());
}

fn print_registers(address: u16, values: &[u16]) {
    for (offset, value) in values.iter().enumerate() {
        println!(
            "  {:>5}  {:>5}  0x{:04X}",
            (address as usize + offset).to_string().cyan(),
            value,
            value
        );
    }
}
