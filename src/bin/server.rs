//! Collector server entry point.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use runmetrics::config::{ServerFileConfig, parse_duration};
use runmetrics::server;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// runmetrics collector
#[derive(Parser, Debug)]
#[command(name = "runmetrics-server", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "RUNMETRICS_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address as host:port (overrides config file)
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// SQLite database URL; enables the durable backend
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Snapshot save period, seconds or humantime (0 saves on shutdown only)
    #[arg(short = 'i', long, env = "STORE_INTERVAL", value_parser = parse_duration)]
    store_interval: Option<Duration>,

    /// Snapshot file path
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<PathBuf>,

    /// Load the snapshot file on start
    #[arg(short = 'r', long, env = "RESTORE")]
    restore: Option<bool>,
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
            ServerFileConfig::load(path)?
        }
        None => ServerFileConfig::default(),
    };

    // CLI > ENV > config file
    if let Some(address) = &cli.address {
        config.set_address(address)?;
    }
    if let Some(dsn) = cli.database_dsn {
        config.storage.database_url = Some(dsn);
    }
    if let Some(interval) = cli.store_interval {
        config.storage.snapshot.interval = interval;
    }
    if let Some(path) = cli.file_storage_path {
        config.storage.snapshot.path = path;
    }
    if let Some(restore) = cli.restore {
        config.storage.snapshot.restore = restore;
    }
    config.validate()?;

    let addr = config.socket_addr()?;
    let manager = config.storage_builder().build().await?;
    tracing::info!(backend = %manager.backend(), "Storage initialized");
    manager.saver_run().await?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on: http://{}", addr);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let served = server::serve(listener, manager.store(), shutdown).await;

    tracing::info!("Shutting down storage...");
    if let Err(e) = manager.saver_stop().await {
        tracing::error!(error = %e, "Final snapshot failed");
    }
    manager.close().await;

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
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
    token.cancel();
}
