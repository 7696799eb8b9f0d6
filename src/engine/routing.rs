use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::fare::MAX_TRIP_DISTANCE_KM;
use crate::error::AppError;
use crate::geo::path_length_km;
use crate::models::location::Coordinate;
use crate::models::route::{Route, RouteSource};
use crate::observability::metrics::Metrics;

/// Nominal speed used to time a synthesized straight-line route.
pub const FALLBACK_SPEED_KMH: f64 = 40.0;

/// A `(longitude, latitude)` pair, the order routing providers speak.
pub type LonLat = (f64, f64);

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRoute {
    pub geometry: Vec<LonLat>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// Why the routing provider could not be used. Never leaves the resolver.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("routing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("routing provider answered with status {0}")]
    Status(u16),

    #[error("routing provider rejected the request: {0}")]
    Rejected(String),

    #[error("malformed routing response: {0}")]
    Malformed(String),

    #[error("routing provider timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn route(&self, waypoints: &[LonLat]) -> Result<ProviderRoute, RoutingError>;
}

pub struct RouteResolver {
    provider: Option<Arc<dyn RoutingProvider>>,
    timeout: Duration,
    metrics: Option<Metrics>,
}

impl RouteResolver {
    pub fn new(provider: Arc<dyn RoutingProvider>, timeout: Duration) -> Self {
        Self {
            provider: Some(provider),
            timeout,
            metrics: None,
        }
    }

    /// A resolver that never calls out and always synthesizes the route.
    pub fn fallback_only() -> Self {
        Self {
            provider: None,
            timeout: Duration::ZERO,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolves `[pickup, ...stops, destination]` into a drivable route.
    ///
    /// Provider failures of any kind fall back to a straight-line route with the
    /// same shape; only a list of fewer than two waypoints is an error.
    pub async fn resolve(&self, waypoints: &[Coordinate]) -> Result<Route, AppError> {
        if waypoints.len() < 2 {
            return Err(AppError::InvalidWaypoints(waypoints.len()));
        }

        let start = Instant::now();
        let route = match self.try_provider(waypoints).await {
            Ok(route) => route,
            Err(err) => {
                warn!(error = %err, waypoints = waypoints.len(), "routing provider unavailable; using straight-line route");
                fallback_route(waypoints)
            }
        };

        if let Some(metrics) = &self.metrics {
            let source = route.source.as_str();
            metrics
                .route_resolutions_total
                .with_label_values(&[source])
                .inc();
            metrics
                .route_resolution_seconds
                .with_label_values(&[source])
                .observe(start.elapsed().as_secs_f64());
        }

        debug!(
            source = route.source.as_str(),
            distance_m = route.distance_meters,
            duration_s = route.duration_seconds,
            "route resolved"
        );

        Ok(route)
    }

    async fn try_provider(&self, waypoints: &[Coordinate]) -> Result<Route, RoutingError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| RoutingError::Rejected("no routing provider configured".to_string()))?;

        let request: Vec<LonLat> = waypoints
            .iter()
            .map(|point| (point.longitude, point.latitude))
            .collect();

        let response = tokio::time::timeout(self.timeout, provider.route(&request))
            .await
            .map_err(|_| RoutingError::Timeout(self.timeout))??;

        into_route(response)
    }
}

fn into_route(response: ProviderRoute) -> Result<Route, RoutingError> {
    if response.geometry.len() < 2 {
        return Err(RoutingError::Malformed(format!(
            "geometry has {} points",
            response.geometry.len()
        )));
    }

    if !response.distance_meters.is_finite()
        || response.distance_meters < 0.0
        || response.distance_meters > MAX_TRIP_DISTANCE_KM * 1_000.0
    {
        return Err(RoutingError::Malformed(format!(
            "distance {}",
            response.distance_meters
        )));
    }

    if !response.duration_seconds.is_finite() || response.duration_seconds < 0.0 {
        return Err(RoutingError::Malformed(format!(
            "duration {}",
            response.duration_seconds
        )));
    }

    let polyline = response
        .geometry
        .iter()
        .map(|&(longitude, latitude)| {
            let point = Coordinate::new(latitude, longitude);
            if point.is_valid() {
                Ok(point)
            } else {
                Err(RoutingError::Malformed(format!(
                    "geometry point out of range: ({longitude}, {latitude})"
                )))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Route {
        polyline,
        distance_meters: response.distance_meters,
        duration_seconds: response.duration_seconds,
        source: RouteSource::Provider,
    })
}

/// Straight segments through the waypoints, timed at [`FALLBACK_SPEED_KMH`].
pub fn fallback_route(waypoints: &[Coordinate]) -> Route {
    let distance_meters = path_length_km(waypoints) * 1_000.0;
    let duration_seconds = distance_meters / (FALLBACK_SPEED_KMH / 3.6);

    Route {
        polyline: waypoints.to_vec(),
        distance_meters,
        duration_seconds,
        source: RouteSource::Fallback,
    }
}

/// Routes through an OSRM-compatible `/route/v1/driving` endpoint.
pub struct OsrmRoutingProvider {
    client: Client,
    endpoint: String,
}

impl OsrmRoutingProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build routing client: {err}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn route_url(&self, waypoints: &[LonLat]) -> String {
        let coordinates = waypoints
            .iter()
            .map(|(lon, lat)| format!("{lon},{lat}"))
            .collect::<Vec<_>>()
            .join(";");

        format!(
            "{}/route/v1/driving/{}?overview=full&geometries=geojson",
            self.endpoint, coordinates
        )
    }
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<Vec<f64>>,
}

#[async_trait]
impl RoutingProvider for OsrmRoutingProvider {
    async fn route(&self, waypoints: &[LonLat]) -> Result<ProviderRoute, RoutingError> {
        let response = self.client.get(self.route_url(waypoints)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RoutingError::Status(status.as_u16()));
        }

        let body: OsrmResponse = response
            .json()
            .await
            .map_err(|err| RoutingError::Malformed(err.to_string()))?;

        parse_osrm_response(body)
    }
}

fn parse_osrm_response(body: OsrmResponse) -> Result<ProviderRoute, RoutingError> {
    if body.code != "Ok" {
        return Err(RoutingError::Rejected(
            body.message.unwrap_or(body.code),
        ));
    }

    let route = body
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| RoutingError::Malformed("no routes in response".to_string()))?;

    let geometry = route
        .geometry
        .coordinates
        .into_iter()
        .map(|pair| match pair.as_slice() {
            [lon, lat, ..] => Ok((*lon, *lat)),
            _ => Err(RoutingError::Malformed(
                "geometry point with fewer than 2 values".to_string(),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ProviderRoute {
        geometry,
        distance_meters: route.distance,
        duration_seconds: route.duration,
    })
}
