//! Prometheus exporter for ISC Kea.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kea_exporter::config::LogFormat;
use kea_exporter::{ExporterConfig, Service};

/// Prometheus exporter for ISC Kea.
#[derive(Parser, Debug)]
#[command(name = "kea-exporter")]
#[command(about = "Export ISC Kea DHCP statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Target address and port of the Kea Control Agent, e.g. http://kea.example.com:8000.
    #[arg(short, long, required_unless_present = "config")]
    target: Option<String>,

    /// Port on which to expose metrics (default: 9547).
    #[arg(long)]
    port: Option<u16>,

    /// Metrics update interval in seconds (default: 10).
    #[arg(long)]
    interval: Option<u64>,

    /// Kea request timeout in seconds (default: 10).
    #[arg(long)]
    timeout: Option<u64>,

    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Apply command line overrides on top of the file configuration.
    fn apply(self, config: &mut ExporterConfig) {
        if let Some(target) = self.target {
            config.kea.target = Some(target);
        }
        if let Some(port) = self.port {
            config.prometheus.port = port;
        }
        if let Some(interval) = self.interval {
            config.kea.interval_secs = interval;
        }
        if let Some(timeout) = self.timeout {
            config.kea.timeout_secs = timeout;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

fn init_logging(config: &ExporterConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kea_exporter={}", config.logging.level)));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)?,
        None => ExporterConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    init_logging(&config);

    info!(target_url = %config.target()?, "Starting Kea exporter");

    // Bootstrap, bind and initial update; a failure here exits non-zero
    let service = Service::start(&config).await?;

    info!(
        addr = %service.local_addr(),
        modules = ?service.exporter().modules(),
        "Exporter running"
    );

    wait_for_signal().await?;

    let series_count = service.exporter().registry().series_count();
    let stats = service.shutdown().await;
    info!(
        cycles = stats.cycles,
        module_failures = stats.module_failures,
        keys_set = stats.keys_set,
        key_failures = stats.key_failures,
        series_count,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}
