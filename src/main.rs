//! mbeanpoll Binary Entry Point
//!
//! Polls the hosts of a configuration file and writes every sample to
//! stdout as one JSON object per line. Core functionality is provided by
//! the `mbeanpoll` library crate.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mbeanpoll::{
    MemoryTransportFactory, PollEngine, PollRegistry, SampleWriter,
    config::{AppConfig, Fixtures, parse_duration},
    pipeline::SampleOutput,
    poller::MIN_INTERVAL,
    protocol::TransportFactory,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// mbeanpoll - Managed Resource Metric Poller
#[derive(Parser, Debug)]
#[command(name = "mbeanpoll", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "MBEANPOLL_CONFIG"
    )]
    config: String,

    /// Poll interval (overrides config file), e.g. "30s"
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Run one discovery and sweep, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mbeanpoll=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    tracing::info!(path = %cli.config, "Loading configuration");
    let mut config = AppConfig::load(&cli.config)?;

    if let Some(interval) = cli.interval {
        if interval < MIN_INTERVAL {
            tracing::warn!(?interval, min = ?MIN_INTERVAL, "Poll interval below minimum, clamping");
        }
        config.interval = interval.max(MIN_INTERVAL);
    }

    let factory: Arc<dyn TransportFactory> = match &config.fixtures {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading server fixtures");
            Arc::new(Fixtures::load(path)?.build_factory())
        }
        None => Arc::new(MemoryTransportFactory::new()),
    };

    let schedule = config.schedule()?;
    let (writer, samples) = SampleWriter::channel(config.channel_capacity);
    let output = SampleOutput::spawn(samples, std::io::stdout())?;

    let queries = config.resolved_queries();
    let mut engine = PollEngine::new(writer, config.interval, config.pool_size);
    for host in &config.hosts {
        let bound = host
            .collect
            .iter()
            .filter_map(|name| queries.get(name).cloned())
            .collect();
        engine.add_host(host.to_remote_host()?, Arc::clone(&factory), bound);
    }

    tracing::info!(
        hosts = config.hosts.len(),
        queries = queries.len(),
        interval = ?config.interval,
        %schedule,
        pool_size = config.pool_size,
        "Poll engine ready"
    );

    if cli.once {
        let report = engine.sweep().await;
        tracing::info!(
            scheduled = report.scheduled,
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            samples = report.samples,
            "Single sweep complete"
        );
        engine.close().await;
        drop(engine);
        finish_output(output).await;
        return Ok(());
    }

    let registry = PollRegistry::new().await?;
    registry.spawn("main", Arc::new(engine), &schedule).await?;
    registry.start().await?;

    tracing::info!("Press Ctrl+C to shutdown");
    shutdown_signal().await;

    tracing::info!("Shutting down poller...");
    if let Err(e) = registry.shutdown().await {
        tracing::error!(error = %e, "Failed to shutdown poller");
    }
    finish_output(output).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Flush queued samples and wait for the output thread.
async fn finish_output(output: SampleOutput<std::io::Stdout>) {
    match tokio::task::spawn_blocking(move || output.shutdown()).await {
        Ok(Ok(_)) => tracing::debug!("Sample output flushed"),
        Ok(Err(e)) => tracing::error!(error = %e, "Sample output failed"),
        Err(e) => tracing::error!(error = %e, "Sample output join failed"),
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
