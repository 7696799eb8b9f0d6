use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::fare::priced_distance_km;
use crate::engine::lifecycle::{RideRequest, TransitionOutcome};
use crate::error::AppError;
use crate::geo::validate_coordinate;
use crate::models::fare::FareQuote;
use crate::models::location::{Coordinate, Stop};
use crate::models::ride::{waypoints, Ride, RideClass, RideHistoryEntry, RideStatus};
use crate::models::route::{Route, RouteSource};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/estimates", post(estimate))
        .route("/rides", post(book_ride))
        .route("/rides/active", get(active_ride))
        .route("/rides/history", get(ride_history))
        .route("/rides/:id/driver", post(assign_driver))
        .route("/rides/:id/status", patch(update_status))
        .route("/rides/:id/complete", post(complete_ride))
        .route("/rides/:id/cancel", post(cancel_ride))
}

#[derive(Deserialize)]
pub struct EstimateRequest {
    pub pickup: Coordinate,
    pub destination: Coordinate,
    #[serde(default)]
    pub stops: Vec<Stop>,
}

#[derive(Serialize)]
pub struct EstimateResponse {
    pub route: Route,
    pub eta_minutes: u32,
    pub quotes: Vec<FareQuote>,
}

#[derive(Deserialize)]
pub struct BookRideRequest {
    #[serde(flatten)]
    pub ride: RideRequest,
    /// A driver the rider picked from the pool.
    #[serde(default)]
    pub driver_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct AssignDriverRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: RideStatus,
}

#[derive(Serialize)]
pub struct TransitionResponse {
    pub applied: bool,
    pub ride: Option<Ride>,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            applied: outcome.is_applied(),
            ride: outcome.into_ride(),
        }
    }
}

async fn estimate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EstimateRequest>,
) -> Result<Json<EstimateResponse>, AppError> {
    validate_coordinate("pickup", &payload.pickup)?;
    validate_coordinate("destination", &payload.destination)?;
    for stop in &payload.stops {
        validate_coordinate("stop", &stop.coordinate)?;
    }

    let mut stops = payload.stops;
    stops.sort_by_key(|stop| stop.order);

    let route = state
        .resolver
        .resolve(&waypoints(&payload.pickup, &stops, &payload.destination))
        .await?;
    // a synthesized route only gets the rough display figure
    let distance_km = match route.source {
        RouteSource::Provider => Some(priced_distance_km(&route)),
        RouteSource::Fallback => None,
    };

    let quotes = RideClass::ALL
        .iter()
        .map(|class| {
            state.fares.estimate(
                &payload.pickup,
                &payload.destination,
                &stops,
                *class,
                distance_km,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(EstimateResponse {
        eta_minutes: route.eta_minutes(),
        route,
        quotes,
    }))
}

async fn book_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BookRideRequest>,
) -> Result<Json<Ride>, AppError> {
    let driver = match payload.driver_id {
        Some(id) => Some(state.matching.select(id).await?),
        None => None,
    };

    let ride = state.lifecycle.request_ride(payload.ride, driver).await?;
    Ok(Json(ride))
}

async fn active_ride(State(state): State<Arc<AppState>>) -> Json<Option<Ride>> {
    Json(state.lifecycle.active_ride().await)
}

async fn ride_history(State(state): State<Arc<AppState>>) -> Json<Vec<RideHistoryEntry>> {
    Json(state.lifecycle.history().await)
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignDriverRequest>,
) -> Result<Json<TransitionResponse>, AppError> {
    let driver = state.matching.select(payload.driver_id).await?;
    let outcome = state.lifecycle.assign_driver(id, driver).await;
    Ok(Json(outcome.into()))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = state
        .lifecycle
        .update_ride_status(id, payload.status)
        .await?;
    Ok(Json(outcome.into()))
}

async fn complete_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = state.lifecycle.complete_ride(id).await?;
    Ok(Json(outcome.into()))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<TransitionResponse> {
    Json(state.lifecycle.cancel_ride(id).await.into())
}
