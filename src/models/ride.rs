use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::DriverCandidate;
use crate::models::fare::FareQuote;
use crate::models::location::{Coordinate, Stop};
use crate::models::route::Route;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RideClass {
    Standard,
    Premium,
}

impl RideClass {
    pub const ALL: [RideClass; 2] = [RideClass::Standard, RideClass::Premium];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RideStatus {
    Draft,
    Searching,
    DriverAssigned,
    DriverArriving,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    pub fn can_cancel(self) -> bool {
        matches!(
            self,
            RideStatus::Searching
                | RideStatus::DriverAssigned
                | RideStatus::DriverArriving
                | RideStatus::InProgress
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Draft => "draft",
            RideStatus::Searching => "searching",
            RideStatus::DriverAssigned => "driver_assigned",
            RideStatus::DriverArriving => "driver_arriving",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub pickup: Coordinate,
    pub pickup_address: String,
    pub destination: Coordinate,
    pub destination_address: String,
    pub stops: Vec<Stop>,
    pub ride_class: RideClass,
    pub driver: Option<DriverCandidate>,
    pub fare: FareQuote,
    pub route: Route,
    pub status: RideStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// `[pickup, ...stops, destination]` in the order the stops are listed.
pub fn waypoints(pickup: &Coordinate, stops: &[Stop], destination: &Coordinate) -> Vec<Coordinate> {
    let mut points = Vec::with_capacity(stops.len() + 2);
    points.push(*pickup);
    points.extend(stops.iter().map(|stop| stop.coordinate));
    points.push(*destination);
    points
}

/// A ride as it was when it left the active slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideHistoryEntry {
    ride: Ride,
}

impl RideHistoryEntry {
    pub(crate) fn freeze(ride: Ride) -> Self {
        Self { ride }
    }

    pub fn ride(&self) -> &Ride {
        &self.ride
    }

    pub fn status(&self) -> RideStatus {
        self.ride.status
    }
}

/// Everything the lifecycle hands to the persistence collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RideSnapshot {
    pub active: Option<Ride>,
    pub history: Vec<RideHistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideEvent {
    pub ride_id: Uuid,
    pub status: RideStatus,
    pub driver_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

impl RideEvent {
    pub fn from_ride(ride: &Ride) -> Self {
        Self {
            ride_id: ride.id,
            status: ride.status,
            driver_id: ride.driver.as_ref().map(|driver| driver.id),
            at: Utc::now(),
        }
    }
}
