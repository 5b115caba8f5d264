// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `stock-sync` daemon: runs the availability event consumer.
//!
//! Configuration comes from the JSON file named by `STOCK_SYNC_CONFIG`
//! (defaults otherwise), then `STOCK_SYNC_*` environment overrides.

use stock_sync::{RedisStockService, StockSyncConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, kind = e.kind(), "stock-sync exited with error");
        std::process::exit(1);
    }
}

async fn run() -> stock_sync::Result<()> {
    let mut config = match std::env::var("STOCK_SYNC_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            StockSyncConfig::from_file(&path)?
        }
        Err(_) => StockSyncConfig::default(),
    };
    config.apply_env_overrides();
    config.validate()?;

    let mut service = RedisStockService::connect(config).await?;
    service.start().await?;

    shutdown_signal().await;
    info!("Shutdown signal received");

    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => error!(error = %e, "Cannot install SIGTERM handler, waiting for Ctrl-C only"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C");
    }
}
