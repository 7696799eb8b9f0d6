use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::broadcast::AvailableRides;
use crate::engine::fare::{priced_distance_km, FareEstimator, MAX_TRIP_DISTANCE_KM};
use crate::engine::matching::MatchingEngine;
use crate::engine::routing::RouteResolver;
use crate::engine::scheduler::Scheduler;
use crate::error::AppError;
use crate::geo::validate_coordinate;
use crate::models::driver::DriverCandidate;
use crate::models::location::{Coordinate, Stop};
use crate::models::ride::{
    waypoints, Ride, RideClass, RideEvent, RideHistoryEntry, RideSnapshot, RideStatus,
};
use crate::observability::metrics::Metrics;
use crate::persistence::{RideStore, SnapshotWriter};

#[derive(Debug, Clone, Copy)]
pub struct DwellIntervals {
    /// DriverAssigned -> DriverArriving
    pub driver_arriving: Duration,
    /// DriverArriving -> InProgress
    pub trip_start: Duration,
}

impl Default for DwellIntervals {
    fn default() -> Self {
        Self {
            driver_arriving: Duration::from_secs(5),
            trip_start: Duration::from_secs(8),
        }
    }
}

pub struct LifecycleDeps {
    pub matching: Arc<MatchingEngine>,
    pub resolver: Arc<RouteResolver>,
    pub fares: Arc<FareEstimator>,
    pub available_rides: Arc<AvailableRides>,
    pub store: Arc<dyn RideStore>,
    pub events_tx: broadcast::Sender<RideEvent>,
    pub metrics: Metrics,
    pub dwell: DwellIntervals,
}

/// A rider's draft, ready to be booked.
#[derive(Debug, Clone, Deserialize)]
pub struct RideRequest {
    pub pickup: Coordinate,
    #[serde(default)]
    pub pickup_address: String,
    pub destination: Coordinate,
    #[serde(default)]
    pub destination_address: String,
    #[serde(default)]
    pub stops: Vec<Stop>,
    pub ride_class: RideClass,
    /// Trip distance to price with, usually taken from a route the rider was
    /// already shown.
    #[serde(default)]
    pub distance_km_override: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Ride),
    /// The ride id is not the active ride (or no longer in a state the
    /// operation applies to). Nothing changed.
    Stale,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    pub fn into_ride(self) -> Option<Ride> {
        match self {
            TransitionOutcome::Applied(ride) => Some(ride),
            TransitionOutcome::Stale => None,
        }
    }
}

#[derive(Default)]
struct Slots {
    active: Option<Ride>,
    /// Most recent first.
    history: VecDeque<RideHistoryEntry>,
}

impl Slots {
    fn active_mut(&mut self, ride_id: Uuid) -> Option<&mut Ride> {
        self.active.as_mut().filter(|ride| ride.id == ride_id)
    }

    fn snapshot(&self) -> RideSnapshot {
        RideSnapshot {
            active: self.active.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }
}

/// Owns the active ride and the ride history. Every mutation goes through the
/// one lock in here, so transitions for a ride never interleave.
pub struct RideLifecycle {
    slots: Mutex<Slots>,
    scheduler: Scheduler,
    matching: Arc<MatchingEngine>,
    resolver: Arc<RouteResolver>,
    fares: Arc<FareEstimator>,
    available_rides: Arc<AvailableRides>,
    store: Arc<dyn RideStore>,
    writer: SnapshotWriter,
    events_tx: broadcast::Sender<RideEvent>,
    metrics: Metrics,
    dwell: DwellIntervals,
}

impl RideLifecycle {
    /// Starts the snapshot writer, so this needs a tokio runtime.
    pub fn new(deps: LifecycleDeps) -> Self {
        Self {
            writer: SnapshotWriter::spawn(deps.store.clone()),
            slots: Mutex::new(Slots::default()),
            scheduler: Scheduler::new(),
            matching: deps.matching,
            resolver: deps.resolver,
            fares: deps.fares,
            available_rides: deps.available_rides,
            store: deps.store,
            events_tx: deps.events_tx,
            metrics: deps.metrics,
            dwell: deps.dwell,
        }
    }

    /// Loads the last saved state and picks the active ride back up where it
    /// left off, re-arming any dwell timer it was waiting on.
    pub async fn restore(self: &Arc<Self>) {
        let snapshot = match self.store.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "failed to load ride snapshot; starting empty");
                return;
            }
        };

        let mut slots = self.slots.lock().await;
        slots.history = snapshot.history.into_iter().collect();
        slots.active = snapshot.active.filter(|ride| !ride.status.is_terminal());

        if let Some(ride) = &slots.active {
            info!(ride_id = %ride.id, status = ?ride.status, "restored active ride");
            match ride.status {
                RideStatus::Searching => self.available_rides.publish(ride.clone()),
                RideStatus::DriverAssigned => self.schedule_advance(
                    ride.id,
                    RideStatus::DriverAssigned,
                    RideStatus::DriverArriving,
                    self.dwell.driver_arriving,
                ),
                RideStatus::DriverArriving => self.schedule_advance(
                    ride.id,
                    RideStatus::DriverArriving,
                    RideStatus::InProgress,
                    self.dwell.trip_start,
                ),
                _ => {}
            }
        }
    }

    pub async fn active_ride(&self) -> Option<Ride> {
        self.slots.lock().await.active.clone()
    }

    pub async fn history(&self) -> Vec<RideHistoryEntry> {
        self.slots.lock().await.history.iter().cloned().collect()
    }

    pub async fn snapshot(&self) -> RideSnapshot {
        self.slots.lock().await.snapshot()
    }

    /// Waits until every snapshot taken so far has reached the store.
    pub async fn flush_snapshots(&self) {
        self.writer.flush().await;
    }

    /// Books a ride. With `driver` the rider picked someone from the pool and
    /// the ride starts out assigned; otherwise it is searching and offered to
    /// drivers.
    ///
    /// Fails before anything changes when the input is invalid, when a ride is
    /// already active, or when the candidate pool is empty.
    pub async fn request_ride(
        self: &Arc<Self>,
        request: RideRequest,
        driver: Option<DriverCandidate>,
    ) -> Result<Ride, AppError> {
        validate_request(&request)?;

        if self.slots.lock().await.active.is_some() {
            return Err(self.reject("conflict", AppError::Conflict("a ride is already active".to_string())));
        }

        if self.matching.is_empty().await {
            return Err(self.reject("no_drivers", AppError::NoDriversAvailable));
        }

        let mut stops = request.stops;
        stops.sort_by_key(|stop| stop.order);

        let route = self
            .resolver
            .resolve(&waypoints(&request.pickup, &stops, &request.destination))
            .await?;
        let distance_km = request
            .distance_km_override
            .unwrap_or_else(|| priced_distance_km(&route));
        let fare = self.fares.estimate(
            &request.pickup,
            &request.destination,
            &stops,
            request.ride_class,
            Some(distance_km),
        )?;

        let mut slots = self.slots.lock().await;
        if slots.active.is_some() {
            return Err(self.reject("conflict", AppError::Conflict("a ride is already active".to_string())));
        }

        let now = Utc::now();
        let status = if driver.is_some() {
            RideStatus::DriverAssigned
        } else {
            RideStatus::Searching
        };
        let ride = Ride {
            id: Uuid::new_v4(),
            pickup: request.pickup,
            pickup_address: request.pickup_address,
            destination: request.destination,
            destination_address: request.destination_address,
            stops,
            ride_class: request.ride_class,
            assigned_at: driver.as_ref().map(|_| now),
            driver,
            fare,
            route,
            status,
            created_at: now,
            completed_at: None,
            cancelled_at: None,
        };

        slots.active = Some(ride.clone());
        self.persist(&slots);
        self.emit(&ride);
        self.metrics
            .rides_requested_total
            .with_label_values(&["booked"])
            .inc();

        match &ride.driver {
            Some(driver) => {
                self.matching.remove(driver.id).await;
                self.schedule_advance(
                    ride.id,
                    RideStatus::DriverAssigned,
                    RideStatus::DriverArriving,
                    self.dwell.driver_arriving,
                );
            }
            None => self.available_rides.publish(ride.clone()),
        }

        info!(
            ride_id = %ride.id,
            status = ?ride.status,
            amount = %ride.fare.amount,
            stops = ride.stops.len(),
            "ride booked"
        );

        Ok(ride)
    }

    /// Attaches a driver to a searching ride.
    pub async fn assign_driver(
        self: &Arc<Self>,
        ride_id: Uuid,
        driver: DriverCandidate,
    ) -> TransitionOutcome {
        let mut slots = self.slots.lock().await;
        let Some(ride) = slots
            .active_mut(ride_id)
            .filter(|ride| ride.status == RideStatus::Searching)
        else {
            return stale(ride_id, "assign_driver");
        };

        let driver_id = driver.id;
        ride.driver = Some(driver);
        ride.status = RideStatus::DriverAssigned;
        ride.assigned_at = Some(Utc::now());
        let ride = ride.clone();

        self.available_rides.withdraw(ride_id);
        self.matching.remove(driver_id).await;
        self.persist(&slots);
        self.emit(&ride);
        self.schedule_advance(
            ride_id,
            RideStatus::DriverAssigned,
            RideStatus::DriverArriving,
            self.dwell.driver_arriving,
        );

        info!(ride_id = %ride_id, driver_id = %driver_id, "driver assigned");
        TransitionOutcome::Applied(ride)
    }

    /// Driver-side accept. Whoever takes the ride off the available queue
    /// first wins; a ride the rider already matched is gone from the queue.
    pub async fn claim_ride(
        self: &Arc<Self>,
        ride_id: Uuid,
        driver: DriverCandidate,
    ) -> Result<Ride, AppError> {
        self.available_rides.claim(ride_id)?;

        self.assign_driver(ride_id, driver)
            .await
            .into_ride()
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} is no longer available")))
    }

    /// Moves the active ride along manually. Terminal targets go through
    /// [`Self::complete_ride`] and [`Self::cancel_ride`]; driver assignment
    /// goes through [`Self::assign_driver`].
    pub async fn update_ride_status(
        self: &Arc<Self>,
        ride_id: Uuid,
        status: RideStatus,
    ) -> Result<TransitionOutcome, AppError> {
        match status {
            RideStatus::Completed => return self.complete_ride(ride_id).await,
            RideStatus::Cancelled => return Ok(self.cancel_ride(ride_id).await),
            _ => {}
        }

        let mut slots = self.slots.lock().await;
        let Some(ride) = slots.active_mut(ride_id) else {
            return Ok(stale(ride_id, "update_ride_status"));
        };

        let current = ride.status;
        let automatic_step = matches!(
            (current, status),
            (RideStatus::DriverAssigned, RideStatus::DriverArriving)
                | (RideStatus::DriverArriving, RideStatus::InProgress)
        );
        if !automatic_step {
            return Err(AppError::Conflict(format!(
                "ride {ride_id} cannot move from {} to {}",
                current.as_str(),
                status.as_str()
            )));
        }

        self.scheduler.cancel(ride_id);
        let ride = self.advance(&mut slots, ride_id, current, status);
        Ok(ride.map_or(TransitionOutcome::Stale, TransitionOutcome::Applied))
    }

    /// Ends the ride and files it into history. A ride that already has a
    /// driver may be completed early; a ride still searching may not.
    pub async fn complete_ride(&self, ride_id: Uuid) -> Result<TransitionOutcome, AppError> {
        let mut slots = self.slots.lock().await;
        let Some(ride) = slots.active_mut(ride_id) else {
            return Ok(stale(ride_id, "complete_ride"));
        };

        if ride.driver.is_none() || ride.status == RideStatus::Searching {
            return Err(AppError::Conflict(format!(
                "ride {ride_id} has no driver yet and cannot be completed"
            )));
        }

        let ride = self.finish(&mut slots, RideStatus::Completed);
        info!(ride_id = %ride_id, "ride completed");
        Ok(ride.map_or(TransitionOutcome::Stale, TransitionOutcome::Applied))
    }

    pub async fn cancel_ride(&self, ride_id: Uuid) -> TransitionOutcome {
        let mut slots = self.slots.lock().await;
        let cancellable = slots
            .active_mut(ride_id)
            .is_some_and(|ride| ride.status.can_cancel());
        if !cancellable {
            return stale(ride_id, "cancel_ride");
        }

        let ride = self.finish(&mut slots, RideStatus::Cancelled);
        info!(ride_id = %ride_id, "ride cancelled");
        ride.map_or(TransitionOutcome::Stale, TransitionOutcome::Applied)
    }

    /// Fire-time half of a scheduled transition. Applies only if the ride is
    /// still active and still where the timer expected it to be.
    pub(crate) async fn apply_scheduled(
        self: &Arc<Self>,
        ride_id: Uuid,
        from: RideStatus,
        to: RideStatus,
    ) -> bool {
        let mut slots = self.slots.lock().await;
        let applied = self.advance(&mut slots, ride_id, from, to).is_some();
        if !applied {
            debug!(ride_id = %ride_id, from = ?from, to = ?to, "scheduled transition skipped");
        }
        applied
    }

    fn schedule_advance(
        self: &Arc<Self>,
        ride_id: Uuid,
        from: RideStatus,
        to: RideStatus,
        delay: Duration,
    ) {
        let lifecycle = Arc::clone(self);
        self.scheduler.schedule(ride_id, delay, async move {
            lifecycle.apply_scheduled(ride_id, from, to).await;
        });
    }

    /// One step along the automatic part of the lifecycle.
    fn advance(
        self: &Arc<Self>,
        slots: &mut Slots,
        ride_id: Uuid,
        from: RideStatus,
        to: RideStatus,
    ) -> Option<Ride> {
        let ride = slots
            .active_mut(ride_id)
            .filter(|ride| ride.status == from)?;
        ride.status = to;
        let ride = ride.clone();

        self.persist(slots);
        self.emit(&ride);
        info!(ride_id = %ride_id, status = ?to, "ride advanced");

        if to == RideStatus::DriverArriving {
            self.schedule_advance(
                ride_id,
                RideStatus::DriverArriving,
                RideStatus::InProgress,
                self.dwell.trip_start,
            );
        }

        Some(ride)
    }

    /// Terminal transition for the active ride. Clears its timers, pulls it
    /// from the driver queue, and files it into history.
    fn finish(&self, slots: &mut Slots, status: RideStatus) -> Option<Ride> {
        let mut ride = slots.active.take()?;
        let now = Utc::now();
        ride.status = status;
        match status {
            RideStatus::Completed => ride.completed_at = Some(now),
            _ => ride.cancelled_at = Some(now),
        }

        self.scheduler.cancel(ride.id);
        self.available_rides.withdraw(ride.id);
        slots
            .history
            .push_front(RideHistoryEntry::freeze(ride.clone()));

        self.persist(slots);
        self.emit(&ride);
        Some(ride)
    }

    /// Queues the snapshot; the write happens off the lock.
    fn persist(&self, slots: &Slots) {
        self.writer.save(slots.snapshot());
    }

    fn emit(&self, ride: &Ride) {
        self.metrics
            .ride_transitions_total
            .with_label_values(&[ride.status.as_str()])
            .inc();
        let _ = self.events_tx.send(RideEvent::from_ride(ride));
    }

    fn reject(&self, outcome: &str, err: AppError) -> AppError {
        self.metrics
            .rides_requested_total
            .with_label_values(&[outcome])
            .inc();
        warn!(error = %err, "ride request rejected");
        err
    }
}

fn stale(ride_id: Uuid, operation: &str) -> TransitionOutcome {
    debug!(ride_id = %ride_id, operation, "stale ride reference ignored");
    TransitionOutcome::Stale
}

fn validate_request(request: &RideRequest) -> Result<(), AppError> {
    validate_coordinate("pickup", &request.pickup)?;
    validate_coordinate("destination", &request.destination)?;
    for stop in &request.stops {
        validate_coordinate(&format!("stop {}", stop.order), &stop.coordinate)?;
    }

    if let Some(distance_km) = request.distance_km_override {
        if !distance_km.is_finite() || distance_km < 0.0 {
            return Err(AppError::BadRequest(format!(
                "distance_km_override must be a non-negative number, got {distance_km}"
            )));
        }
        if distance_km > MAX_TRIP_DISTANCE_KM {
            return Err(AppError::BadRequest(format!(
                "distance_km_override must be at most {MAX_TRIP_DISTANCE_KM} km, got {distance_km}"
            )));
        }
    }

    Ok(())
}
