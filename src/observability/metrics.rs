use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub rides_requested_total: IntCounterVec,
    pub ride_transitions_total: IntCounterVec,
    pub route_resolutions_total: IntCounterVec,
    pub route_resolution_seconds: HistogramVec,
    pub driver_pool_size: IntGauge,
    pub available_rides: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let rides_requested_total = IntCounterVec::new(
            Opts::new("rides_requested_total", "Ride requests by outcome"),
            &["outcome"],
        )
        .expect("valid rides_requested_total metric");

        let ride_transitions_total = IntCounterVec::new(
            Opts::new("ride_transitions_total", "Applied ride transitions by target status"),
            &["status"],
        )
        .expect("valid ride_transitions_total metric");

        let route_resolutions_total = IntCounterVec::new(
            Opts::new("route_resolutions_total", "Resolved routes by source"),
            &["source"],
        )
        .expect("valid route_resolutions_total metric");

        let route_resolution_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "route_resolution_seconds",
                "Latency of route resolution in seconds",
            ),
            &["source"],
        )
        .expect("valid route_resolution_seconds metric");

        let driver_pool_size = IntGauge::new("driver_pool_size", "Candidates in the current pool")
            .expect("valid driver_pool_size metric");

        let available_rides = IntGauge::new("available_rides", "Rides open to any driver")
            .expect("valid available_rides metric");

        registry
            .register(Box::new(rides_requested_total.clone()))
            .expect("register rides_requested_total");
        registry
            .register(Box::new(ride_transitions_total.clone()))
            .expect("register ride_transitions_total");
        registry
            .register(Box::new(route_resolutions_total.clone()))
            .expect("register route_resolutions_total");
        registry
            .register(Box::new(route_resolution_seconds.clone()))
            .expect("register route_resolution_seconds");
        registry
            .register(Box::new(driver_pool_size.clone()))
            .expect("register driver_pool_size");
        registry
            .register(Box::new(available_rides.clone()))
            .expect("register available_rides");

        Self {
            registry,
            rides_requested_total,
            ride_transitions_total,
            route_resolutions_total,
            route_resolution_seconds,
            driver_pool_size,
            available_rides,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
