/*!
 * Sensus CLI
 *
 * Runs a protocol from a TOML configuration against the simulated probe
 * capabilities and a console remote sink, until Ctrl-C.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sensus::{
    config::SensusConfig,
    context::ServiceContext,
    health::HealthMonitor,
    logging,
    probe::simulated::simulated_catalog,
    protocol::Protocol,
    store::ConsoleSink,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sensus")]
#[command(version, about = "Sensor-data collection agent with buffered remote sync and self-healing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured protocol until interrupted
    Run {
        /// Configuration file
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: PathBuf,

        /// Force debug logging
        #[arg(short = 'v', long)]
        verbose: bool,
    },

    /// Validate a configuration file and list the probes it resolves to
    Check {
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: PathBuf,
    },

    /// Write a default configuration (stdout when no output is given)
    Init {
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, verbose } => run(&config, verbose).await,
        Commands::Check { config } => check(&config),
        Commands::Init { output } => init(output.as_deref()),
    }
}

async fn run(path: &Path, verbose: bool) -> anyhow::Result<()> {
    let mut config = SensusConfig::from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config.logging.verbose |= verbose;
    logging::init_logging(&config.logging)?;

    let ctx = Arc::new(ServiceContext::with_defaults());
    let protocol = Arc::new(Protocol::from_config(
        &config,
        &simulated_catalog(),
        Arc::new(ConsoleSink::new()),
        Arc::clone(&ctx),
    )?);

    if let Err(e) = protocol.start().await {
        // The health monitor keeps trying
        warn!(protocol = protocol.name(), error = %e, "Initial start failed");
    }

    let cancel = CancellationToken::new();
    let monitor = HealthMonitor::new(Arc::clone(&protocol), config.health.test_interval())
        .spawn(cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupt received, shutting down");

    cancel.cancel();
    if let Err(e) = monitor.await {
        warn!(error = %e, "Health monitor ended abnormally");
    }
    protocol.shutdown().await;

    println!(
        "{} stopped, participation {:.2}",
        protocol.name(),
        protocol.participation()
    );
    Ok(())
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = SensusConfig::from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config.validate()?;

    let catalog = simulated_catalog();
    println!("✓ {} is valid (protocol \"{}\")", path.display(), config.protocol.name);
    for probe in &config.probes {
        let status = match (catalog.contains(&probe.probe_type), probe.enabled) {
            (false, _) => "unknown type, ignored",
            (true, true) => "enabled",
            (true, false) => "disabled",
        };
        println!("  {} - {}", probe.probe_type, status);
    }
    for entry in &config.anonymization {
        let anonymizer = entry
            .anonymizer
            .map(|a| a.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!("  anonymize {}.{} with {}", entry.datum, entry.field, anonymizer);
    }
    Ok(())
}

fn init(output: Option<&Path>) -> anyhow::Result<()> {
    let config = SensusConfig::default();
    match output {
        Some(path) => {
            config
                .to_file(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Wrote default configuration to {}", path.display());
        }
        None => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}
