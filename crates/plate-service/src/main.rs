use anyhow::{Context, Result};
use plate_service::{api, PlateServiceConfig, PlateServiceState, SqliteHistoryStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Held until exit so buffered file logs are flushed
    let _log_guard = telemetry::init_with_service("plate-service");

    info!("Starting plate recognition service...");

    let config = PlateServiceConfig::from_env()?;
    info!(
        "Plate service configuration: bind={}, engine={:?}, instances={}, timeout={:?}",
        config.bind_addr, config.engine, config.model_instances, config.processing_timeout
    );
    if let Some(static_dir) = &config.static_dir {
        info!("Serving dashboard from {}", static_dir);
    }

    let history = SqliteHistoryStore::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open history database {}", config.database_url))?;

    let bind_addr = config.bind_addr.clone();
    let state = PlateServiceState::from_config(config, Arc::new(history.clone()))
        .context("Failed to initialize recognition models")?;

    let app = api::router(state);

    info!("Binding to {}", bind_addr);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Plate service listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    history.close().await;
    info!("Plate service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
