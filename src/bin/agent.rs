//! Agent entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use runmetrics::agent::{Agent, DeliveryMode, HostSampler, HttpTransport, RuntimeSampler, Sampler};
use runmetrics::config::{AgentFileConfig, parse_duration};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// runmetrics agent
#[derive(Parser, Debug)]
#[command(name = "runmetrics-agent", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "RUNMETRICS_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Collector address (overrides config file)
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Poll period, seconds or humantime
    #[arg(short = 'p', long, env = "POLL_INTERVAL", value_parser = parse_duration)]
    poll_interval: Option<Duration>,

    /// Report period, seconds or humantime
    #[arg(short = 'r', long, env = "REPORT_INTERVAL", value_parser = parse_duration)]
    report_interval: Option<Duration>,

    /// Streamed sends per second; 0 disables limiting
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    rate_limit: Option<f64>,

    /// Delivery mode: streamed, batch or both
    #[arg(long, env = "DELIVERY_MODE")]
    delivery: Option<DeliveryMode>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,runmetrics=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            AgentFileConfig::load(path)?
        }
        None => AgentFileConfig::default(),
    };

    // CLI > ENV > config file
    if let Some(address) = cli.address {
        config.server_url = address;
    }
    if let Some(interval) = cli.poll_interval {
        config.poll_interval = interval;
    }
    if let Some(interval) = cli.report_interval {
        config.report_interval = interval;
    }
    if let Some(rate) = cli.rate_limit {
        config.rate_limit = rate;
    }
    if let Some(delivery) = cli.delivery {
        config.delivery = delivery;
    }
    config.validate()?;

    let server_url = config.server_url();
    tracing::info!(server = %server_url, delivery = %config.delivery, "Agent configured");

    let transport = Arc::new(HttpTransport::new(
        &server_url,
        config.request_timeout,
        config.compress,
    )?);
    let samplers: Vec<Arc<dyn Sampler>> =
        vec![Arc::new(RuntimeSampler::new()), Arc::new(HostSampler::new())];
    let agent = Agent::new(config.to_options(), samplers, transport);

    let cancel = CancellationToken::new();
    let run = tokio::spawn(agent.run(cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();
    run.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
}
