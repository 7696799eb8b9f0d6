use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::matching::rank_candidates;
use crate::error::AppError;
use crate::geo::validate_coordinate;
use crate::models::driver::{DriverCandidate, DriverProfile, TrafficLevel};
use crate::models::location::Coordinate;
use crate::models::ride::Ride;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers/pool", post(refresh_pool).get(list_pool))
        .route("/drivers/pool/:id", delete(remove_candidate))
        .route("/available-rides", get(list_available_rides))
        .route("/available-rides/:id/claim", post(claim_ride))
}

#[derive(Deserialize)]
pub struct RefreshPoolRequest {
    pub pickup: Coordinate,
    #[serde(default)]
    pub traffic: TrafficLevel,
}

#[derive(Deserialize)]
pub struct ClaimRideRequest {
    pub driver: DriverProfile,
    #[serde(default)]
    pub traffic: TrafficLevel,
}

async fn refresh_pool(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RefreshPoolRequest>,
) -> Result<Json<Vec<DriverCandidate>>, AppError> {
    validate_coordinate("pickup", &payload.pickup)?;

    let pool = state
        .matching
        .refresh_pool(&payload.pickup, payload.traffic)
        .await;
    Ok(Json(pool))
}

async fn list_pool(State(state): State<Arc<AppState>>) -> Json<Vec<DriverCandidate>> {
    Json(state.matching.candidates().await)
}

async fn remove_candidate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<DriverCandidate>> {
    Json(state.matching.remove(id).await)
}

async fn list_available_rides(State(state): State<Arc<AppState>>) -> Json<Vec<Ride>> {
    Json(state.available_rides.list())
}

async fn claim_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClaimRideRequest>,
) -> Result<Json<Ride>, AppError> {
    validate_coordinate("driver location", &payload.driver.location)?;

    let pickup = state
        .available_rides
        .get(id)
        .map(|ride| ride.pickup)
        .ok_or_else(|| AppError::NotFound(format!("ride {id} is not available")))?;

    let driver = rank_candidates(&pickup, vec![payload.driver], payload.traffic)
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Internal("failed to rank claiming driver".to_string()))?;

    let ride = state.lifecycle.claim_ride(id, driver).await?;
    Ok(Json(ride))
}
