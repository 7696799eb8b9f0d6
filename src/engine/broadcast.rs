use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ride::Ride;
use crate::observability::metrics::Metrics;

/// Rides open to any driver. A ride leaves the queue exactly once: withdrawn
/// by the rider side or claimed by one driver.
pub struct AvailableRides {
    rides: DashMap<Uuid, (DateTime<Utc>, Ride)>,
    metrics: Option<Metrics>,
}

impl AvailableRides {
    pub fn new() -> Self {
        Self {
            rides: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn publish(&self, ride: Ride) {
        info!(ride_id = %ride.id, "ride published to drivers");
        self.rides.insert(ride.id, (Utc::now(), ride));
        self.record_depth();
    }

    pub fn withdraw(&self, ride_id: Uuid) -> bool {
        let removed = self.rides.remove(&ride_id).is_some();
        if removed {
            debug!(ride_id = %ride_id, "ride withdrawn from drivers");
            self.record_depth();
        }
        removed
    }

    /// Takes the ride off the queue. Only one caller can win a given ride.
    pub fn claim(&self, ride_id: Uuid) -> Result<Ride, AppError> {
        let (_, (_, ride)) = self
            .rides
            .remove(&ride_id)
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} is not available")))?;

        info!(ride_id = %ride_id, "ride claimed");
        self.record_depth();
        Ok(ride)
    }

    pub fn get(&self, ride_id: Uuid) -> Option<Ride> {
        self.rides.get(&ride_id).map(|entry| entry.value().1.clone())
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<Ride> {
        let mut entries: Vec<(DateTime<Utc>, Ride)> = self
            .rides
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        entries.into_iter().map(|(_, ride)| ride).collect()
    }

    pub fn len(&self) -> usize {
        self.rides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rides.is_empty()
    }

    fn record_depth(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.available_rides.set(self.rides.len() as i64);
        }
    }
}

impl Default for AvailableRides {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::AvailableRides;
    use crate::error::AppError;
    use crate::models::fare::{FareBreakdown, FareQuote};
    use crate::models::location::Coordinate;
    use crate::models::ride::{Ride, RideClass, RideStatus};
    use crate::models::route::{Route, RouteSource};

    fn ride(id_seed: u128) -> Ride {
        let pickup = Coordinate::new(52.52, 13.405);
        let destination = Coordinate::new(52.50, 13.45);
        Ride {
            id: Uuid::from_u128(id_seed),
            pickup,
            pickup_address: String::new(),
            destination,
            destination_address: String::new(),
            stops: Vec::new(),
            ride_class: RideClass::Standard,
            driver: None,
            fare: FareQuote {
                ride_class: RideClass::Standard,
                distance_km: 4.0,
                amount: Decimal::new(1800, 2),
                breakdown: FareBreakdown {
                    base: Decimal::new(1000, 2),
                    distance_cost: Decimal::new(800, 2),
                    stops_fee: Decimal::ZERO,
                },
            },
            route: Route {
                polyline: vec![pickup, destination],
                distance_meters: 4_000.0,
                duration_seconds: 360.0,
                source: RouteSource::Fallback,
            },
            status: RideStatus::Searching,
            created_at: Utc::now(),
            assigned_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn a_ride_can_only_be_claimed_once() {
        let rides = AvailableRides::new();
        rides.publish(ride(1));

        assert_eq!(rides.claim(Uuid::from_u128(1)).unwrap().id, Uuid::from_u128(1));
        assert!(matches!(
            rides.claim(Uuid::from_u128(1)),
            Err(AppError::NotFound(_))
        ));
        assert!(rides.is_empty());
    }

    #[test]
    fn withdrawn_rides_cannot_be_claimed() {
        let rides = AvailableRides::new();
        rides.publish(ride(1));
        rides.publish(ride(2));

        assert!(rides.withdraw(Uuid::from_u128(1)));
        assert!(!rides.withdraw(Uuid::from_u128(1)));
        assert!(rides.claim(Uuid::from_u128(1)).is_err());
        assert_eq!(rides.len(), 1);
        assert!(rides.get(Uuid::from_u128(2)).is_some());
    }

    #[test]
    fn list_returns_every_published_ride() {
        let rides = AvailableRides::new();
        for seed in 1..=3 {
            rides.publish(ride(seed));
        }

        let mut ids: Vec<u128> = rides.list().iter().map(|r| r.id.as_u128()).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
