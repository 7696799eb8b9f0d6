use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::models::driver::TrafficLevel;
use crate::models::ride::RideStatus;
use crate::state::AppState;

/// Keeps the candidate pool fresh around the active ride's pickup while the
/// ride is still searching. Each tick replaces the pool wholesale.
pub async fn run_pool_refresher(state: Arc<AppState>, every: Duration) {
    info!(interval_ms = every.as_millis() as u64, "pool refresher started");

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        refresh_once(&state).await;
    }
}

/// Returns whether a refresh happened.
pub async fn refresh_once(state: &AppState) -> bool {
    let Some(ride) = state.lifecycle.active_ride().await else {
        return false;
    };

    if ride.status != RideStatus::Searching {
        return false;
    }

    let pool = state
        .matching
        .refresh_pool(&ride.pickup, TrafficLevel::default())
        .await;
    debug!(ride_id = %ride.id, candidates = pool.len(), "pool refreshed for searching ride");
    true
}
