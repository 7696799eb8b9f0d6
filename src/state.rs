use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::engine::broadcast::AvailableRides;
use crate::engine::fare::{FareEstimator, Tariff};
use crate::engine::lifecycle::{DwellIntervals, LifecycleDeps, RideLifecycle};
use crate::engine::matching::{CandidateGenerator, MatchingEngine, RandomCandidateGenerator};
use crate::engine::routing::{OsrmRoutingProvider, RouteResolver, RoutingProvider};
use crate::error::AppError;
use crate::models::ride::RideEvent;
use crate::observability::metrics::Metrics;
use crate::persistence::{JsonFileRideStore, MemoryRideStore, RideStore};

pub struct AppState {
    pub lifecycle: Arc<RideLifecycle>,
    pub matching: Arc<MatchingEngine>,
    pub resolver: Arc<RouteResolver>,
    pub fares: Arc<FareEstimator>,
    pub available_rides: Arc<AvailableRides>,
    pub ride_events_tx: broadcast::Sender<RideEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        config: &Config,
        routing: Option<Arc<dyn RoutingProvider>>,
        generator: Arc<dyn CandidateGenerator>,
        store: Arc<dyn RideStore>,
    ) -> Self {
        let metrics = Metrics::new();
        let (ride_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));

        let resolver = match routing {
            Some(provider) => RouteResolver::new(provider, config.routing_timeout),
            None => RouteResolver::fallback_only(),
        };
        let resolver = Arc::new(resolver.with_metrics(metrics.clone()));

        let matching = Arc::new(
            MatchingEngine::new(
                generator,
                config.driver_pool_size,
                config.driver_search_radius_km,
            )
            .with_metrics(metrics.clone()),
        );
        let fares = Arc::new(FareEstimator::new(Tariff::default(), config.matching_seed));
        let available_rides = Arc::new(AvailableRides::new().with_metrics(metrics.clone()));

        let lifecycle = Arc::new(RideLifecycle::new(LifecycleDeps {
            matching: matching.clone(),
            resolver: resolver.clone(),
            fares: fares.clone(),
            available_rides: available_rides.clone(),
            store,
            events_tx: ride_events_tx.clone(),
            metrics: metrics.clone(),
            dwell: DwellIntervals {
                driver_arriving: config.driver_arriving_dwell,
                trip_start: config.trip_start_dwell,
            },
        }));

        Self {
            lifecycle,
            matching,
            resolver,
            fares,
            available_rides,
            ride_events_tx,
            metrics,
        }
    }

    /// Wires the production collaborators described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let routing: Option<Arc<dyn RoutingProvider>> = match &config.routing_endpoint {
            Some(endpoint) => Some(Arc::new(OsrmRoutingProvider::new(
                endpoint,
                config.routing_timeout,
            )?)),
            None => None,
        };

        let store: Arc<dyn RideStore> = match &config.ride_store_path {
            Some(path) => Arc::new(JsonFileRideStore::new(path.clone())),
            None => Arc::new(MemoryRideStore::new()),
        };

        Ok(Self::new(
            config,
            routing,
            Arc::new(RandomCandidateGenerator::new(config.matching_seed)),
            store,
        ))
    }
}
