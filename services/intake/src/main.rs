use anyhow::{Context, Result};
use beacon_intake::api::{start_api_server, AppState};
use beacon_intake::{Config, FileStorage, IngestionService};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Beacon intake service"
    );

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    let storage = FileStorage::open(&config.storage)
        .await
        .context("Failed to open file storage")?;

    info!(
        address = %config.listen_addr(),
        messages = %storage.messages().path().display(),
        analytics = %storage.analytics().path().display(),
        "Intake API configured"
    );

    let state = AppState {
        ingestion: IngestionService::new(Arc::new(storage)),
    };

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Intake service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
