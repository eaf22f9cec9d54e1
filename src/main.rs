//! popularity-sync - Resumable popularity score synchronization
//!
//! This is the main entry point for the popularity-sync application.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

use popularity_sync::config::Config;
use popularity_sync::database::{RecordStore, SqliteRecordStore};
use popularity_sync::otel::{init_tracing, OtelProvider, SyncMetrics};
use popularity_sync::sync::{SyncOrchestrator, SyncScheduler};

/// popularity-sync - Resumable popularity score synchronization
#[derive(Parser, Debug)]
#[command(name = "popularity-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "POPULARITY_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run one full synchronization pass (default)
    UpdateMetrics,
    /// Run synchronization passes periodically until interrupted
    Watch,
    /// Print the stored resume state of every partition
    Progress,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::UpdateMetrics);

    // Load configuration
    let config = load_config(&args)?;

    // Initialize OpenTelemetry provider
    let otel_provider = OtelProvider::new(&config.otel)?;

    // Initialize tracing/logging
    init_tracing(&otel_provider, &config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?command,
        "Starting popularity-sync"
    );

    // Initialize record store
    let store = Arc::new(SqliteRecordStore::new(&config.database.path).await?);
    info!(path = %config.database.path, "Record store initialized");

    if command == Command::Progress {
        return print_progress(store.as_ref()).await;
    }

    // Shutdown is relayed to the orchestrator, which stops at a page boundary
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = cancel_tx.send(true);
        let _ = shutdown_tx.send(());
    });

    let metrics = Arc::new(SyncMetrics::new(&otel_provider.meter()));
    let orchestrator = SyncOrchestrator::from_config(store, &config)?
        .with_metrics(metrics)
        .with_cancellation(cancel_rx);

    let result = match command {
        Command::Watch => {
            let scheduler = SyncScheduler::new(
                config.scheduler.clone(),
                Arc::new(orchestrator),
                shutdown_rx,
            );
            scheduler.run().await;
            Ok(())
        }
        _ => orchestrator.update_metrics().await.map(|report| {
            info!(
                partitions = report.partitions.len(),
                records_updated = report.records_updated(),
                "Synchronization pass complete"
            );
        }),
    };

    // Shutdown OpenTelemetry
    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("popularity-sync finished");

    result.map_err(Into::into)
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

async fn print_progress(store: &SqliteRecordStore) -> anyhow::Result<()> {
    for progress in store.list_progress().await? {
        println!(
            "{}\t{}\t{}\t{}",
            progress.key,
            progress.status,
            progress.cursor.as_deref().unwrap_or("-"),
            progress.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Resolve when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping at the next page boundary");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping at the next page boundary");
        }
    }
}
