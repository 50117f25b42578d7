//! Carousel Relay - Entry Point
//!
//! Bootstraps the proxy pool from the snapshot and configured list, then
//! runs the relay, the health scheduler, and the status server until a
//! shutdown signal arrives.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carousel::config::Config;
use carousel::error::Result;
use carousel::pool::{self, HealthScheduler, ProxyPool, SnapshotStore};
use carousel::relay::RelayServer;
use carousel::stats::ActiveRequests;
use carousel::status::StatusServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carousel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Carousel relay");

    let config = Config::from_env()?;
    info!("Configuration loaded");

    // A corrupt snapshot aborts startup; a missing one is an empty pool.
    let store = Arc::new(SnapshotStore::new(config.pool.snapshot_path.as_str()));
    let snapshot = store.load().await?;
    let configured = pool::read_proxy_list(&config.pool.proxy_file).await?;
    let proxy_pool = Arc::new(ProxyPool::bootstrap(pool::merge_records(
        &configured,
        &snapshot,
    )));
    info!(
        "Loaded {} proxies, {} healthy",
        proxy_pool.registry_len(),
        proxy_pool.healthy.len()
    );

    let stats = Arc::new(ActiveRequests::new());

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start health scheduler
    let scheduler = HealthScheduler::new(
        proxy_pool.clone(),
        store,
        stats.clone(),
        config.checker.clone(),
    );
    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    // Start status server
    let status_server = StatusServer::bind(&config.status.listen_addr, stats.clone()).await?;
    let status_shutdown = shutdown_tx.subscribe();
    let status_task = tokio::spawn(async move {
        if let Err(e) = status_server.run(status_shutdown).await {
            error!("Status server error: {}", e);
        }
    });

    // Start relay server
    let relay_server =
        RelayServer::bind(&config.relay.listen_addr, proxy_pool.clone(), stats.clone()).await?;
    let relay_shutdown = shutdown_tx.subscribe();
    let relay_task = tokio::spawn(async move {
        if let Err(e) = relay_server.run(relay_shutdown).await {
            error!("Relay server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(relay_task, status_task, scheduler_task);

    info!("Carousel stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
