pub mod drivers;
pub mod rides;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::models::ride::RideStatus;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(rides::router())
        .merge(drivers::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    active_ride: Option<RideStatus>,
    rides_in_history: usize,
    pool_size: usize,
    available_rides: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.lifecycle.snapshot().await;

    Json(HealthResponse {
        status: "ok",
        active_ride: snapshot.active.map(|ride| ride.status),
        rides_in_history: snapshot.history.len(),
        pool_size: state.matching.candidates().await.len(),
        available_rides: state.available_rides.len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
