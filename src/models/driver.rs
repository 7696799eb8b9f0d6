use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::Coordinate;
use crate::models::ride::RideClass;

/// What a candidate generator knows about a nearby driver before it is ranked
/// against a pickup point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverProfile {
    pub id: Uuid,
    pub name: String,
    pub rating: f64,
    pub location: Coordinate,
    pub vehicle_class: RideClass,
    pub vehicle_label: String,
    pub trip_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverCandidate {
    pub id: Uuid,
    pub name: String,
    pub rating: f64,
    pub location: Coordinate,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub vehicle_class: RideClass,
    pub vehicle_label: String,
    pub trip_count: u32,
    pub top_rated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrafficLevel {
    Light,
    #[default]
    Moderate,
    Heavy,
}

impl TrafficLevel {
    pub fn average_speed_kmh(self) -> f64 {
        match self {
            TrafficLevel::Light => 40.0,
            TrafficLevel::Moderate => 25.0,
            TrafficLevel::Heavy => 15.0,
        }
    }
}
