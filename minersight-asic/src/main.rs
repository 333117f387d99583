//! ASIC miner collector.
//!
//! Discovers miners on the local network and polls their cgminer-style API,
//! writing scan records and cycle reports as JSON lines or CBOR.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use minersight_asic::config::AsicCollectorConfig;
use minersight_asic::{Command, DeviceRegistry, DiscoverySink, OutputSink, PollingOrchestrator};
use minersight_common::{Address, OutputConfig};
use minersight_framework::{
    CollectorArgs, CollectorConfig, CollectorHealth, CollectorRunner, FrameworkError,
};

const DEFAULT_CONFIG: &str = "minersight.json5";

/// Discovers ASIC miners and polls their telemetry.
#[derive(Parser, Debug)]
#[command(name = "minersight-asic")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CollectorArgs,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Scan an address range once and print the discovered devices
    Scan {
        /// CIDR block to scan (default: scan.cidr from the config)
        #[arg(long)]
        cidr: Option<String>,
    },
    /// Send one command to a device and print the raw response
    Query {
        /// Device address, host or host:port
        address: String,
        /// summary, stats, pools or devs
        #[arg(default_value = "summary")]
        command: Command,
    },
    /// Poll the configured devices until Ctrl+C
    Poll,
    /// Discover and poll until Ctrl+C
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, from_file) = load_config(&cli.common)?;
    let runner = CollectorRunner::init("asic", config, Some(&cli.common))
        .context("Failed to initialize collector")?;

    if from_file {
        tracing::info!(path = ?cli.common.config, "Loaded configuration");
    } else {
        tracing::info!("No configuration file found, using defaults");
    }

    match cli.mode {
        Mode::Scan { cidr } => scan_once(runner.config(), cidr).await,
        Mode::Query { address, command } => query_once(runner.config(), &address, command).await,
        Mode::Poll => poll(runner).await,
        Mode::Run => run(runner).await,
    }
}

/// Load the config file. A missing default file means defaults; a missing
/// explicitly named file is an error.
fn load_config(args: &CollectorArgs) -> Result<(AsicCollectorConfig, bool)> {
    match AsicCollectorConfig::load(&args.config) {
        Ok(config) => Ok((config, true)),
        Err(FrameworkError::ConfigNotFound { .. }) if args.config == Path::new(DEFAULT_CONFIG) => {
            Ok((AsicCollectorConfig::default(), false))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load config from {:?}", args.config)),
    }
}

fn open_output(output: &OutputConfig) -> Result<OutputSink> {
    OutputSink::open(output)
        .with_context(|| format!("Failed to open output file {:?}", output.path))
}

async fn scan_once(config: &AsicCollectorConfig, cidr: Option<String>) -> Result<()> {
    let Some(cidr) = cidr.or_else(|| config.scan.cidr.clone()) else {
        bail!("No CIDR block given (use --cidr or set scan.cidr)");
    };

    let records = config
        .scanner()
        .scan(&cidr)
        .await
        .with_context(|| format!("Cannot scan {}", cidr))?;

    open_output(&config.output)?
        .deliver_devices(&records)
        .context("Failed to write scan results")?;
    Ok(())
}

async fn query_once(config: &AsicCollectorConfig, address: &str, command: Command) -> Result<()> {
    let address = Address::parse_with_default_port(address, config.network.port)?;

    let response = config
        .client()
        .query(&address, command)
        .await
        .with_context(|| format!("{} {} failed", address, command))?;

    if let Some(status) = response.status().filter(|s| s.is_refusal()) {
        tracing::warn!(
            device = %address,
            command = %command,
            reason = status.message.as_deref().unwrap_or("-"),
            "Device refused the command"
        );
    }

    println!("{}", serde_json::to_string_pretty(response.payload())?);
    Ok(())
}

async fn poll(mut runner: CollectorRunner<AsicCollectorConfig>) -> Result<()> {
    let config = runner.config().clone();
    let devices = config.device_addresses()?;
    if devices.is_empty() {
        bail!("No devices configured; add entries under `devices` or use `run` with scan.cidr");
    }

    tracing::info!(devices = devices.len(), "Polling configured devices");

    let registry = Arc::new(DeviceRegistry::with_devices(devices));
    let sink = Arc::new(open_output(&config.output)?);
    let health = Arc::new(CollectorHealth::new(runner.name()));

    let orchestrator =
        PollingOrchestrator::new(registry, sink, config.client(), config.poll_options())
            .with_health(health);

    let shutdown = runner.shutdown_signal();
    runner.spawn(async move { orchestrator.run(shutdown).await });

    runner.run().await?;
    Ok(())
}

async fn run(mut runner: CollectorRunner<AsicCollectorConfig>) -> Result<()> {
    let config = runner.config().clone();
    let registry = Arc::new(DeviceRegistry::with_devices(config.device_addresses()?));
    let sink = Arc::new(open_output(&config.output)?);

    let discovery = match (&config.scan.cidr, config.scan.enabled) {
        (Some(cidr), true) => Some(cidr.clone()),
        _ => None,
    };

    if discovery.is_none() && registry.is_empty() {
        bail!("Nothing to do: configure `devices` or enable scanning with scan.cidr");
    }

    if let Some(cidr) = discovery {
        let scanner = config.scanner();
        let targets = (registry.clone(), sink.clone());
        let interval = Duration::from_secs(config.scan.interval_secs);
        let recovery = Duration::from_secs(config.scan.recovery_delay_secs);
        let shutdown = runner.shutdown_signal();

        runner.spawn_with_error("discovery", async move {
            scanner
                .run(&cidr, interval, recovery, &targets, shutdown)
                .await
        });
    }

    let health = Arc::new(CollectorHealth::new(runner.name()));
    let orchestrator =
        PollingOrchestrator::new(registry, sink, config.client(), config.poll_options())
            .with_health(health);

    let shutdown = runner.shutdown_signal();
    runner.spawn(async move { orchestrator.run(shutdown).await });

    runner.run().await?;
    Ok(())
}
