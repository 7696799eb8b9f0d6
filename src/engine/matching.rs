use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{eta_minutes, haversine_km, offset_km};
use crate::models::driver::{DriverCandidate, DriverProfile, TrafficLevel};
use crate::models::location::Coordinate;
use crate::models::ride::RideClass;
use crate::observability::metrics::Metrics;

pub const TOP_RATED_LIMIT: usize = 2;
pub const TOP_RATED_THRESHOLD: f64 = 4.8;

/// Source of drivers near a pickup. The random generator stands in for a live
/// fleet feed; tests plug in fixed profiles.
pub trait CandidateGenerator: Send + Sync {
    fn generate(&self, pickup: &Coordinate, count: usize, radius_km: f64) -> Vec<DriverProfile>;
}

const DRIVER_NAMES: [&str; 12] = [
    "Amara", "Bilal", "Chen", "Dana", "Emeka", "Farah", "Goran", "Hana", "Ivo", "Jonas", "Kemi",
    "Lena",
];

const STANDARD_VEHICLES: [&str; 4] = [
    "Toyota Corolla",
    "Honda Civic",
    "Hyundai Elantra",
    "Skoda Octavia",
];

const PREMIUM_VEHICLES: [&str; 3] = ["Mercedes E-Class", "BMW 5 Series", "Audi A6"];

const PREMIUM_SHARE: f64 = 0.25;

pub struct RandomCandidateGenerator {
    rng: Mutex<StdRng>,
}

impl RandomCandidateGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl CandidateGenerator for RandomCandidateGenerator {
    fn generate(&self, pickup: &Coordinate, count: usize, radius_km: f64) -> Vec<DriverProfile> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        (0..count)
            .map(|_| {
                // sqrt keeps the scatter uniform over the disc instead of bunching at the centre
                let distance = radius_km * rng.gen_range(0.0_f64..=1.0).sqrt();
                let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
                let location = offset_km(pickup, distance * bearing.cos(), distance * bearing.sin());

                let vehicle_class = if rng.gen_bool(PREMIUM_SHARE) {
                    RideClass::Premium
                } else {
                    RideClass::Standard
                };
                let vehicles: &[&str] = match vehicle_class {
                    RideClass::Standard => &STANDARD_VEHICLES,
                    RideClass::Premium => &PREMIUM_VEHICLES,
                };

                DriverProfile {
                    id: Uuid::from_u128(rng.r#gen()),
                    name: DRIVER_NAMES.choose(&mut *rng).copied().unwrap_or("Driver").to_string(),
                    rating: (rng.gen_range(4.0_f64..=5.0) * 10.0).round() / 10.0,
                    location,
                    vehicle_class,
                    vehicle_label: vehicles.choose(&mut *rng).copied().unwrap_or("Sedan").to_string(),
                    trip_count: rng.gen_range(20..3_000),
                }
            })
            .collect()
    }
}

/// Holds the candidate pool visible to a searching rider.
pub struct MatchingEngine {
    generator: Arc<dyn CandidateGenerator>,
    pool: RwLock<Arc<Vec<DriverCandidate>>>,
    pool_size: usize,
    radius_km: f64,
    metrics: Option<Metrics>,
}

impl MatchingEngine {
    pub fn new(generator: Arc<dyn CandidateGenerator>, pool_size: usize, radius_km: f64) -> Self {
        Self {
            generator,
            pool: RwLock::new(Arc::new(Vec::new())),
            pool_size,
            radius_km,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replaces the pool with freshly ranked candidates around `pickup`.
    pub async fn refresh_pool(
        &self,
        pickup: &Coordinate,
        traffic: TrafficLevel,
    ) -> Vec<DriverCandidate> {
        let profiles = self.generator.generate(pickup, self.pool_size, self.radius_km);
        let ranked = rank_candidates(pickup, profiles, traffic);

        *self.pool.write().await = Arc::new(ranked.clone());
        self.record_size(ranked.len());

        info!(
            candidates = ranked.len(),
            traffic = ?traffic,
            "driver pool refreshed"
        );

        ranked
    }

    pub async fn candidates(&self) -> Vec<DriverCandidate> {
        self.pool.read().await.to_vec()
    }

    pub async fn is_empty(&self) -> bool {
        self.pool.read().await.is_empty()
    }

    pub async fn select(&self, id: Uuid) -> Result<DriverCandidate, AppError> {
        select_candidate(&self.pool.read().await, id)
    }

    /// Drops a claimed candidate from the visible pool. Unknown ids are ignored.
    pub async fn remove(&self, id: Uuid) -> Vec<DriverCandidate> {
        let mut pool = self.pool.write().await;
        let remaining = remove_candidate(&pool, id);
        if remaining.len() != pool.len() {
            debug!(driver_id = %id, "candidate removed from pool");
        }
        *pool = Arc::new(remaining.clone());
        self.record_size(remaining.len());
        remaining
    }

    fn record_size(&self, size: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.driver_pool_size.set(size as i64);
        }
    }
}

/// Computes distance and ETA from `pickup`, sorts nearest first (ties by id),
/// and flags the best rated few.
pub fn rank_candidates(
    pickup: &Coordinate,
    profiles: Vec<DriverProfile>,
    traffic: TrafficLevel,
) -> Vec<DriverCandidate> {
    let speed_kmh = traffic.average_speed_kmh();

    let mut candidates: Vec<DriverCandidate> = profiles
        .into_iter()
        .map(|profile| {
            let distance_km = haversine_km(pickup, &profile.location);
            DriverCandidate {
                id: profile.id,
                name: profile.name,
                rating: profile.rating.clamp(0.0, 5.0),
                location: profile.location,
                distance_km,
                eta_minutes: eta_minutes(distance_km, speed_kmh),
                vehicle_class: profile.vehicle_class,
                vehicle_label: profile.vehicle_label,
                trip_count: profile.trip_count,
                top_rated: false,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut by_rating: Vec<usize> = (0..candidates.len()).collect();
    by_rating.sort_by(|&a, &b| {
        candidates[b]
            .rating
            .partial_cmp(&candidates[a].rating)
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    for index in by_rating.into_iter().take(TOP_RATED_LIMIT) {
        if candidates[index].rating >= TOP_RATED_THRESHOLD {
            candidates[index].top_rated = true;
        }
    }

    candidates
}

pub fn select_candidate(pool: &[DriverCandidate], id: Uuid) -> Result<DriverCandidate, AppError> {
    pool.iter()
        .find(|candidate| candidate.id == id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found in pool")))
}

pub fn remove_candidate(pool: &[DriverCandidate], id: Uuid) -> Vec<DriverCandidate> {
    pool.iter()
        .filter(|candidate| candidate.id != id)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::{
        rank_candidates, remove_candidate, select_candidate, CandidateGenerator, MatchingEngine,
        RandomCandidateGenerator,
    };
    use crate::error::AppError;
    use crate::geo::haversine_km;
    use crate::models::driver::{DriverProfile, TrafficLevel};
    use crate::models::location::Coordinate;
    use crate::models::ride::RideClass;

    fn pickup() -> Coordinate {
        Coordinate::new(52.52, 13.405)
    }

    fn profile(id_seed: u128, lat: f64, lng: f64, rating: f64) -> DriverProfile {
        DriverProfile {
            id: Uuid::from_u128(id_seed),
            name: format!("driver-{id_seed}"),
            rating,
            location: Coordinate::new(lat, lng),
            vehicle_class: RideClass::Standard,
            vehicle_label: "Toyota Corolla".to_string(),
            trip_count: 100,
        }
    }

    struct EmptyGenerator;

    impl CandidateGenerator for EmptyGenerator {
        fn generate(&self, _pickup: &Coordinate, _count: usize, _radius_km: f64) -> Vec<DriverProfile> {
            Vec::new()
        }
    }

    #[test]
    fn ranking_sorts_by_distance_then_id() {
        let ranked = rank_candidates(
            &pickup(),
            vec![
                profile(3, 52.53, 13.405, 4.5),
                profile(2, 52.521, 13.405, 4.5),
                profile(1, 52.521, 13.405, 4.5),
            ],
            TrafficLevel::Moderate,
        );

        let ids: Vec<u128> = ranked.iter().map(|c| c.id.as_u128()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(ranked.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
    }

    #[test]
    fn eta_depends_on_traffic() {
        let near = vec![profile(1, 52.53, 13.405, 4.5)];
        let light = rank_candidates(&pickup(), near.clone(), TrafficLevel::Light);
        let heavy = rank_candidates(&pickup(), near, TrafficLevel::Heavy);

        assert!(heavy[0].eta_minutes > light[0].eta_minutes);
        assert_eq!(light[0].distance_km, heavy[0].distance_km);
    }

    #[test]
    fn only_the_best_rated_few_are_top_rated() {
        let ranked = rank_candidates(
            &pickup(),
            vec![
                profile(1, 52.521, 13.405, 4.9),
                profile(2, 52.522, 13.405, 5.0),
                profile(3, 52.523, 13.405, 4.95),
                profile(4, 52.524, 13.405, 4.2),
            ],
            TrafficLevel::Light,
        );

        let flagged: Vec<u128> = ranked
            .iter()
            .filter(|c| c.top_rated)
            .map(|c| c.id.as_u128())
            .collect();
        assert_eq!(flagged, vec![2, 3]);
    }

    #[test]
    fn low_ratings_are_never_top_rated() {
        let ranked = rank_candidates(
            &pickup(),
            vec![profile(1, 52.521, 13.405, 4.1), profile(2, 52.522, 13.405, 4.7)],
            TrafficLevel::Light,
        );
        assert!(ranked.iter().all(|c| !c.top_rated));
    }

    #[test]
    fn select_and_remove_by_id() {
        let pool = rank_candidates(
            &pickup(),
            vec![profile(1, 52.521, 13.405, 4.5), profile(2, 52.53, 13.405, 4.5)],
            TrafficLevel::Moderate,
        );

        let chosen = select_candidate(&pool, Uuid::from_u128(2)).unwrap();
        assert_eq!(chosen.name, "driver-2");

        let remaining = remove_candidate(&pool, chosen.id);
        assert_eq!(remaining.len(), 1);
        assert!(matches!(
            select_candidate(&remaining, chosen.id),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn seeded_generator_is_deterministic_and_stays_in_radius() {
        let first = RandomCandidateGenerator::new(Some(11)).generate(&pickup(), 8, 1.5);
        let second = RandomCandidateGenerator::new(Some(11)).generate(&pickup(), 8, 1.5);

        assert_eq!(first.len(), 8);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.location, b.location);
            assert!(haversine_km(&pickup(), &a.location) <= 1.5 + 0.01);
            assert!((4.0..=5.0).contains(&a.rating));
        }
    }

    #[tokio::test]
    async fn refreshed_pool_is_sorted_and_removal_sticks() {
        let engine = MatchingEngine::new(Arc::new(RandomCandidateGenerator::new(Some(5))), 6, 1.5);
        let pool = engine.refresh_pool(&pickup(), TrafficLevel::Heavy).await;

        assert_eq!(pool.len(), 6);
        assert!(pool.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));

        let removed = pool[0].id;
        engine.remove(removed).await;
        assert!(engine.candidates().await.iter().all(|c| c.id != removed));
        assert!(engine.select(removed).await.is_err());
    }

    #[tokio::test]
    async fn empty_refresh_is_a_valid_pool() {
        let engine = MatchingEngine::new(Arc::new(EmptyGenerator), 6, 1.5);
        let pool = engine.refresh_pool(&pickup(), TrafficLevel::Light).await;

        assert!(pool.is_empty());
        assert!(engine.is_empty().await);
    }
}
