use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

const DEFAULT_ROUTING_ENDPOINT: &str = "https://router.project-osrm.org";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    /// `None` disables the routing provider; every route is then a fallback route.
    pub routing_endpoint: Option<String>,
    pub routing_timeout: Duration,
    pub driver_pool_size: usize,
    pub driver_search_radius_km: f64,
    pub matching_seed: Option<u64>,
    pub pool_refresh_interval: Duration,
    pub driver_arriving_dwell: Duration,
    pub trip_start_dwell: Duration,
    pub ride_store_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            routing_endpoint: Some(DEFAULT_ROUTING_ENDPOINT.to_string()),
            routing_timeout: Duration::from_millis(4_000),
            driver_pool_size: 8,
            driver_search_radius_km: 1.5,
            matching_seed: None,
            pool_refresh_interval: Duration::from_secs(10),
            driver_arriving_dwell: Duration::from_millis(5_000),
            trip_start_dwell: Duration::from_millis(8_000),
            ride_store_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let routing_endpoint = match env::var("ROUTING_ENDPOINT") {
            Ok(raw) if raw.trim().is_empty() => None,
            Ok(raw) => Some(raw.trim().to_string()),
            Err(_) => defaults.routing_endpoint,
        };

        let driver_search_radius_km: f64 =
            parse_or_default("DRIVER_SEARCH_RADIUS_KM", defaults.driver_search_radius_km)?;
        if !driver_search_radius_km.is_finite() || driver_search_radius_km <= 0.0 {
            return Err(AppError::Internal(
                "invalid DRIVER_SEARCH_RADIUS_KM: must be > 0".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            routing_endpoint,
            routing_timeout: Duration::from_millis(parse_or_default("ROUTING_TIMEOUT_MS", 4_000)?),
            driver_pool_size: parse_or_default("DRIVER_POOL_SIZE", defaults.driver_pool_size)?,
            driver_search_radius_km,
            matching_seed: parse_optional("MATCHING_SEED")?,
            pool_refresh_interval: Duration::from_secs(parse_or_default("POOL_REFRESH_SECS", 10)?),
            driver_arriving_dwell: Duration::from_millis(parse_or_default(
                "DRIVER_ARRIVING_DWELL_MS",
                5_000,
            )?),
            trip_start_dwell: Duration::from_millis(parse_or_default("TRIP_START_DWELL_MS", 8_000)?),
            ride_store_path: parse_optional::<String>("RIDE_STORE_PATH")?.map(PathBuf::from),
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional(key)?.unwrap_or(default))
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(None),
    }
}
