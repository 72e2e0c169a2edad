//! AgriPal server binary: bridges the MQTT telemetry broker to REST and
//! live WebSocket/SSE clients.
//!
//! Starts the broker link, the ingest pipeline and an axum HTTP server with
//! structured logging, and shuts all of them down in order on SIGTERM/SIGINT.

use agripal_broker::{BrokerLink, SettingsError};
use agripal_server::config::{self, Config, ConfigError, LoggingConfig};
use agripal_server::hub::DistributionHub;
use agripal_server::{app, ingest, AppState};
use agripal_store::TelemetryStore;
use std::net::SocketAddr;
use std::process::ExitCode;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Failures that stop the server from starting or serving.
#[derive(Debug, Error)]
enum StartupError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("invalid broker settings: {0}")]
    Broker(#[from] SettingsError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("AGRIPAL_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().unwrap_or("config.toml");

    let config = match config::load_config(Some(selected_config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("agripal-server: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging);
    tracing::info!(
        source = config_source,
        path = selected_config_path,
        "resolved startup configuration path"
    );

    match run(config).await {
        Ok(()) => {
            tracing::info!("agripal server shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    config.validate()?;

    let store = TelemetryStore::with_capacity(config.store.history_capacity);
    let hub = DistributionHub::new(store, config.hub.settings());
    let link = BrokerLink::new(config.broker.settings())?;
    let state = AppState::new(hub.clone(), link.status());
    let sessions = state.sessions.clone();

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    let shutdown = CancellationToken::new();
    let (ingest_tx, ingest_rx) = mpsc::channel(config.broker.ingest_queue);
    let broker_task = tokio::spawn(link.run(ingest_tx, shutdown.clone()));
    let ingest_task = tokio::spawn(ingest::run(ingest_rx, hub.clone()));

    tracing::info!(%addr, "starting agripal server");

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(agripal_server::shutdown::drain(
        shutdown_signal(),
        shutdown,
        broker_task,
        hub,
    ))
    .await
    .map_err(StartupError::Serve)?;

    if let Err(e) = ingest_task.await {
        tracing::error!("ingest pipeline failed: {}", e);
    }

    sessions.close();
    tracing::info!(sessions = sessions.len(), "waiting for live sessions to close");
    sessions.wait().await;
    Ok(())
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
