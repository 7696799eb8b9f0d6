use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::AppError;
use crate::geo::path_length_km;
use crate::models::fare::{FareBreakdown, FareQuote};
use crate::models::location::{Coordinate, Stop};
use crate::models::ride::{waypoints, RideClass};
use crate::models::route::{Route, RouteSource};

/// Straight-line legs are shorter than roads; this stretches them toward a
/// plausible driving distance.
pub const ROAD_FACTOR: f64 = 1.3;

/// Longest trip that can be priced. Anything past one lap of the equator is
/// not a ride.
pub const MAX_TRIP_DISTANCE_KM: f64 = 40_075.0;

const PLACEHOLDER_JITTER_MAX: f64 = 1.15;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassRate {
    pub base_fare: Decimal,
    pub per_km_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tariff {
    pub standard: ClassRate,
    pub premium: ClassRate,
    pub per_stop_fee: Decimal,
}

impl Default for Tariff {
    fn default() -> Self {
        Self {
            standard: ClassRate {
                base_fare: Decimal::from(10),
                per_km_rate: Decimal::from(2),
            },
            premium: ClassRate {
                base_fare: Decimal::from(15),
                per_km_rate: Decimal::from(3),
            },
            per_stop_fee: Decimal::from(3),
        }
    }
}

impl Tariff {
    pub fn rate(&self, class: RideClass) -> &ClassRate {
        match class {
            RideClass::Standard => &self.standard,
            RideClass::Premium => &self.premium,
        }
    }
}

pub struct FareEstimator {
    tariff: Tariff,
    rng: Mutex<StdRng>,
}

impl FareEstimator {
    pub fn new(tariff: Tariff, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            tariff,
            rng: Mutex::new(rng),
        }
    }

    /// Quotes a trip. Without `distance_km_override` the distance is a rough
    /// placeholder meant for pre-booking display only.
    pub fn estimate(
        &self,
        pickup: &Coordinate,
        destination: &Coordinate,
        stops: &[Stop],
        ride_class: RideClass,
        distance_km_override: Option<f64>,
    ) -> Result<FareQuote, AppError> {
        let distance_km = match distance_km_override {
            Some(distance_km) => distance_km,
            None => self.placeholder_distance_km(pickup, destination, stops),
        };

        quote(&self.tariff, ride_class, distance_km, stops.len())
    }

    fn placeholder_distance_km(
        &self,
        pickup: &Coordinate,
        destination: &Coordinate,
        stops: &[Stop],
    ) -> f64 {
        let straight_line = path_length_km(&waypoints(pickup, stops, destination));
        let jitter = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen_range(1.0..=PLACEHOLDER_JITTER_MAX)
        };

        straight_line * ROAD_FACTOR * jitter
    }
}

/// `base + distance * rate + stops * stop_fee`. Each part is rounded half-up to
/// cents before summing so the breakdown always adds up to the amount.
///
/// Negative or non-finite distances price as zero. Distances past
/// [`MAX_TRIP_DISTANCE_KM`] are rejected.
pub fn quote(
    tariff: &Tariff,
    ride_class: RideClass,
    distance_km: f64,
    stop_count: usize,
) -> Result<FareQuote, AppError> {
    let distance_km = if distance_km.is_finite() {
        distance_km.max(0.0)
    } else {
        0.0
    };
    if distance_km > MAX_TRIP_DISTANCE_KM {
        return Err(AppError::BadRequest(format!(
            "trip distance {distance_km} km exceeds {MAX_TRIP_DISTANCE_KM} km"
        )));
    }

    let rate = tariff.rate(ride_class);
    let distance = Decimal::from_f64(distance_km)
        .ok_or_else(|| AppError::BadRequest(format!("trip distance {distance_km} km cannot be priced")))?;
    let stops = Decimal::from(u64::try_from(stop_count).unwrap_or(u64::MAX));

    let distance_cost = distance.checked_mul(rate.per_km_rate).ok_or_else(overflow)?;
    let stops_fee = stops.checked_mul(tariff.per_stop_fee).ok_or_else(overflow)?;
    let breakdown = FareBreakdown {
        base: to_cents(rate.base_fare),
        distance_cost: to_cents(distance_cost),
        stops_fee: to_cents(stops_fee),
    };
    let amount = breakdown
        .base
        .checked_add(breakdown.distance_cost)
        .and_then(|sum| sum.checked_add(breakdown.stops_fee))
        .ok_or_else(overflow)?;

    Ok(FareQuote {
        ride_class,
        distance_km,
        amount: to_cents(amount),
        breakdown,
    })
}

fn overflow() -> AppError {
    AppError::BadRequest("fare is out of range".to_string())
}

/// Distance to price a route with. A synthesized route is straight-line, so it
/// is stretched by the road factor to stay on the conservative side.
pub fn priced_distance_km(route: &Route) -> f64 {
    match route.source {
        RouteSource::Provider => route.distance_km(),
        RouteSource::Fallback => route.distance_km() * ROAD_FACTOR,
    }
}

fn to_cents(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{quote, FareEstimator, Tariff, MAX_TRIP_DISTANCE_KM, ROAD_FACTOR};
    use crate::error::AppError;
    use crate::geo::haversine_km;
    use crate::models::location::{Coordinate, Stop};
    use crate::models::ride::RideClass;

    fn stop(order: u32, lat: f64, lng: f64) -> Stop {
        Stop {
            coordinate: Coordinate::new(lat, lng),
            address: format!("stop {order}"),
            order,
        }
    }

    fn cents(value: i64) -> Decimal {
        Decimal::new(value, 2)
    }

    #[test]
    fn standard_ten_km_costs_thirty() {
        let estimator = FareEstimator::new(Tariff::default(), Some(7));
        let fare = estimator
            .estimate(
                &Coordinate::new(0.0, 0.0),
                &Coordinate::new(0.0, 0.09),
                &[],
                RideClass::Standard,
                Some(10.0),
            )
            .unwrap();

        assert_eq!(fare.amount, cents(3000));
        assert_eq!(fare.amount.to_string(), "30.00");
        assert_eq!(fare.breakdown.stops_fee, Decimal::ZERO);
    }

    #[test]
    fn two_stops_add_the_stop_fee() {
        let estimator = FareEstimator::new(Tariff::default(), Some(7));
        let stops = vec![stop(0, 0.0, 0.03), stop(1, 0.0, 0.06)];
        let fare = estimator
            .estimate(
                &Coordinate::new(0.0, 0.0),
                &Coordinate::new(0.0, 0.09),
                &stops,
                RideClass::Standard,
                Some(10.0),
            )
            .unwrap();

        assert_eq!(fare.amount, cents(3600));
        assert_eq!(fare.breakdown.stops_fee, cents(600));
    }

    #[test]
    fn premium_uses_its_own_rate() {
        let fare = quote(&Tariff::default(), RideClass::Premium, 10.0, 0).unwrap();
        assert_eq!(fare.amount, cents(4500));
    }

    #[test]
    fn same_inputs_give_the_same_amount() {
        let estimator = FareEstimator::new(Tariff::default(), None);
        let pickup = Coordinate::new(52.52, 13.405);
        let destination = Coordinate::new(52.50, 13.45);
        let stops = vec![stop(0, 52.51, 13.42)];

        let first = estimator
            .estimate(&pickup, &destination, &stops, RideClass::Premium, Some(7.349))
            .unwrap();
        for _ in 0..10 {
            let again = estimator
                .estimate(&pickup, &destination, &stops, RideClass::Premium, Some(7.349))
                .unwrap();
            assert_eq!(again.amount, first.amount);
        }
    }

    #[test]
    fn breakdown_sums_to_amount_to_the_cent() {
        for distance in [0.0, 0.001, 0.005, 1.115, 3.333_333, 12.345, 99.995] {
            for stops in 0..4 {
                let fare = quote(&Tariff::default(), RideClass::Standard, distance, stops).unwrap();
                let sum = fare.breakdown.base + fare.breakdown.distance_cost + fare.breakdown.stops_fee;
                assert_eq!(sum, fare.amount);
                assert_eq!(fare.amount.scale(), 2);
            }
        }
    }

    #[test]
    fn half_cent_rounds_up() {
        // 0.0025 km * 2/km = 0.005
        let fare = quote(&Tariff::default(), RideClass::Standard, 0.0025, 0).unwrap();
        assert_eq!(fare.breakdown.distance_cost, cents(1));
    }

    #[test]
    fn bad_distances_are_clamped_to_zero() {
        let negative = quote(&Tariff::default(), RideClass::Standard, -4.0, 0).unwrap();
        let nan = quote(&Tariff::default(), RideClass::Standard, f64::NAN, 0).unwrap();
        assert_eq!(negative.amount, cents(1000));
        assert_eq!(nan.amount, cents(1000));
    }

    #[test]
    fn placeholder_distance_is_bounded() {
        let estimator = FareEstimator::new(Tariff::default(), Some(42));
        let pickup = Coordinate::new(0.0, 0.0);
        let destination = Coordinate::new(0.0, 0.09);
        let straight_line = haversine_km(&pickup, &destination);

        for _ in 0..20 {
            let fare = estimator
                .estimate(&pickup, &destination, &[], RideClass::Standard, None)
                .unwrap();
            assert!(fare.distance_km >= straight_line * ROAD_FACTOR - 1e-9);
            assert!(fare.distance_km <= straight_line * ROAD_FACTOR * 1.15 + 1e-9);
        }
    }

    #[test]
    fn distances_past_any_real_trip_are_rejected() {
        for distance in [MAX_TRIP_DISTANCE_KM + 1.0, 5e28, 1e30, f64::MAX] {
            for class in [RideClass::Standard, RideClass::Premium] {
                let result = quote(&Tariff::default(), class, distance, 0);
                assert!(matches!(result, Err(AppError::BadRequest(_))), "{distance}");
            }
        }
    }

    #[test]
    fn longest_trip_still_prices_exactly() {
        let fare = quote(&Tariff::default(), RideClass::Premium, MAX_TRIP_DISTANCE_KM, 2).unwrap();
        // 15 + 40075 * 3 + 2 * 3
        assert_eq!(fare.amount, cents(12_024_600));
    }

    #[test]
    fn oversized_tariff_reports_overflow_instead_of_panicking() {
        let mut tariff = Tariff::default();
        tariff.standard.per_km_rate = Decimal::MAX;

        let result = quote(&tariff, RideClass::Standard, 10.0, 0);
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
