//! otel-distro - OpenTelemetry distro command line
//!
//! Validates distro configuration files, runs a heartbeat workload through
//! the configured pipelines and writes initialization status files.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use opentelemetry::{global, KeyValue};
use otel_distro::config::{ConfigLoader, DistroConfig};
use otel_distro::status::StatusReporter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, info_span, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// otel-distro - Batteries-included OpenTelemetry setup
#[derive(Parser, Debug)]
#[command(name = "otel-distro")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate a configuration file, then print it as JSON
    Validate {
        /// Path to configuration file
        config: PathBuf,
    },

    /// Configure telemetry and emit a heartbeat span, log and metric
    Run {
        /// Path to configuration file
        config: PathBuf,

        /// Seconds to keep emitting heartbeats (until Ctrl-C when omitted)
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Write a status file using the hosting environment settings
    Status {
        /// Record a failed initialization
        #[arg(long)]
        failed: bool,

        /// Failure reason stored in the record
        #[arg(long, requires = "failed")]
        reason: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Validate { config } => {
            init_console();
            validate(config)
        }
        Command::Run {
            config,
            duration_secs,
        } => run(config, duration_secs).await,
        Command::Status { failed, reason } => {
            init_console();
            write_status(!failed, reason.as_deref())
        }
    }
}

/// Plain console logging for the commands that do not configure telemetry
fn init_console() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install console logging: {}", e);
    }
}

fn validate(path: PathBuf) -> anyhow::Result<()> {
    let config = ConfigLoader::load(&path)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;
    info!("Configuration {:?} is valid", path);

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn write_status(success: bool, reason: Option<&str>) -> anyhow::Result<()> {
    match StatusReporter::from_env().log_status(success, reason)? {
        Some(path) => info!(path = %path.display(), "Status file written"),
        None => info!("Diagnostics disabled, no status file written"),
    }
    Ok(())
}

async fn run(path: PathBuf, duration_secs: Option<u64>) -> anyhow::Result<()> {
    let reporter = StatusReporter::from_env();

    let telemetry = match load_and_configure(&path) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            if let Err(status_err) = reporter.log_status(false, Some(&format!("{:#}", e))) {
                eprintln!("Failed to write status file: {}", status_err);
            }
            return Err(e);
        }
    };

    if let Err(e) = reporter.log_status(true, None) {
        warn!(error = %e, "Failed to write status file");
    }

    info!(
        "Starting otel-distro v{} heartbeat for {}",
        otel_distro::VERSION,
        telemetry.resource().service_name
    );

    let heartbeats = global::meter("otel-distro")
        .u64_counter("otel_distro.heartbeats")
        .with_description("Heartbeats emitted by the otel-distro CLI")
        .build();
    let service = KeyValue::new("service.name", telemetry.resource().service_name.clone());

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut beat: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }

        if duration_secs.is_some_and(|limit| beat >= limit) {
            break;
        }

        let span = info_span!("heartbeat", beat);
        let _entered = span.enter();
        info!(beat, "heartbeat");
        heartbeats.add(1, &[service.clone()]);
        beat += 1;
    }

    telemetry
        .shutdown()
        .context("Failed to flush telemetry on shutdown")?;
    Ok(())
}

fn load_and_configure(path: &Path) -> anyhow::Result<otel_distro::Telemetry> {
    let config: DistroConfig = ConfigLoader::load(path)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;
    let telemetry = otel_distro::configure(&config).context("Failed to configure telemetry")?;
    Ok(telemetry)
}
