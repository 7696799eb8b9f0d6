use std::sync::Arc;

use ride_dispatch::api;
use ride_dispatch::config::Config;
use ride_dispatch::engine::refresher::run_pool_refresher;
use ride_dispatch::error::AppError;
use ride_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let shared_state = Arc::new(AppState::from_config(&config)?);
    shared_state.lifecycle.restore().await;

    match &config.routing_endpoint {
        Some(endpoint) => tracing::info!(endpoint = %endpoint, "routing provider configured"),
        None => tracing::warn!("no routing provider configured; routes will be straight-line"),
    }

    if config.pool_refresh_interval.is_zero() {
        tracing::info!("pool refresher disabled");
    } else {
        tokio::spawn(run_pool_refresher(
            shared_state.clone(),
            config.pool_refresh_interval,
        ));
    }

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    shared_state.lifecycle.flush_snapshots().await;
    tracing::info!("ride snapshots flushed; shutting down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
