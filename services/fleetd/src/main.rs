//! dockfleet fleet controller
//!
//! Serves the CI server's elastic-agent requests over HTTP and manages the
//! Docker containers behind them. Reconciliation is driven by those
//! requests and by the server's periodic ping; there is no timer of its own.

use std::sync::Arc;

use anyhow::Result;
use dockfleet_fleetd::{
    api,
    clock::SystemClock,
    config,
    reconciler::ReconciliationEngine,
    runtime::DockerConnector,
    state::AppState,
    FleetController,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to DOCKFLEET_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting dockfleet fleetd");
    info!(
        listen_addr = %config.listen_addr,
        provisioning_grace_secs = config.provisioning_grace.as_secs(),
        "Configuration loaded"
    );

    let controller = FleetController::new(
        Arc::new(DockerConnector::new()),
        Arc::new(SystemClock),
        ReconciliationEngine::new(config.provisioning_grace),
    );
    let app = api::create_router(AppState::new(controller));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            if let Ok(Err(e)) = server_handle.await {
                error!(error = %e, "Server error during shutdown");
            }
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    info!("fleetd shutdown complete");
    Ok(())
}
