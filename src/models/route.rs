use serde::{Deserialize, Serialize};

use crate::models::location::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteSource {
    Provider,
    Fallback,
}

impl RouteSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteSource::Provider => "provider",
            RouteSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub polyline: Vec<Coordinate>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub source: RouteSource,
}

impl Route {
    pub fn distance_km(&self) -> f64 {
        self.distance_meters / 1_000.0
    }

    pub fn eta_minutes(&self) -> u32 {
        (self.duration_seconds.max(0.0) / 60.0).ceil() as u32
    }
}
