use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gatekeeper::{AppState, Config, build_router, handlers, metrics, utils};

/// Log filter used when configuration cannot be loaded.
const FALLBACK_LOG_LEVEL: &str = "info";

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration is read first so `.env` can set the log filter
    let config = Config::from_env();
    init_tracing(
        config
            .as_ref()
            .map_or(FALLBACK_LOG_LEVEL, |config| config.log_level.as_str()),
    );

    info!("Starting gatekeeper v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Install the global subscriber with the given `RUST_LOG`-style filter.
fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|e| {
        eprintln!("Invalid log filter '{filter}' ({e}), using '{FALLBACK_LOG_LEVEL}'");
        EnvFilter::new(FALLBACK_LOG_LEVEL)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        rate_limit_enabled = config.rate_limit_enabled,
        chain_order = %config.chain_order,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;

    // Build application state and router
    let state = AppState::new(config).map_err(|e| {
        error!("Failed to initialize application state: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone());

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    for endpoint in handlers::ENDPOINTS {
        info!(
            "  {:<4} {:<12} - {}",
            endpoint.method, endpoint.path, endpoint.description
        );
    }

    // Peer addresses feed the client key fallback
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await;

    // Stop eviction tasks whether or not the server exited cleanly
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    served.map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("Server shutdown complete");
    Ok(())
}
