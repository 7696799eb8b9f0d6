use crate::error::AppError;
use crate::models::location::Coordinate;

const EARTH_RADIUS_KM: f64 = 6_371.0;
const KM_PER_DEGREE_LAT: f64 = 111.32;

pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lng = (b.longitude - a.longitude).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Sum of great-circle legs between consecutive points.
pub fn path_length_km(points: &[Coordinate]) -> f64 {
    points
        .windows(2)
        .map(|leg| haversine_km(&leg[0], &leg[1]))
        .sum()
}

/// Travel time in whole minutes, rounded up. A non-positive speed never arrives.
pub fn eta_minutes(distance_km: f64, speed_kmh: f64) -> u32 {
    if speed_kmh <= 0.0 || !speed_kmh.is_finite() {
        return u32::MAX;
    }

    let minutes = (distance_km.max(0.0) / speed_kmh * 60.0).ceil();
    if minutes >= u32::MAX as f64 {
        u32::MAX
    } else {
        minutes as u32
    }
}

/// Moves a point by the given number of kilometres north and east. Good enough
/// for the short distances used when scattering candidates around a pickup.
pub fn offset_km(origin: &Coordinate, north_km: f64, east_km: f64) -> Coordinate {
    let lat_scale = origin.latitude.to_radians().cos().abs().max(1e-6);
    let latitude = (origin.latitude + north_km / KM_PER_DEGREE_LAT).clamp(-90.0, 90.0);
    let mut longitude = origin.longitude + east_km / (KM_PER_DEGREE_LAT * lat_scale);
    if longitude > 180.0 {
        longitude -= 360.0;
    } else if longitude < -180.0 {
        longitude += 360.0;
    }

    Coordinate {
        latitude,
        longitude,
    }
}

pub fn validate_coordinate(field: &str, point: &Coordinate) -> Result<(), AppError> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "{field} is out of range: ({}, {})",
            point.latitude, point.longitude
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{eta_minutes, haversine_km, offset_km, path_length_km, validate_coordinate};
    use crate::models::location::Coordinate;

    #[test]
    fn zero_distance_for_same_point() {
        let p = Coordinate::new(53.5511, 9.9937);
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = Coordinate::new(51.5074, -0.1278);
        let paris = Coordinate::new(48.8566, 2.3522);
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn path_length_adds_up_legs() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.05);
        let c = Coordinate::new(0.0, 0.09);
        let direct = haversine_km(&a, &c);
        assert!((path_length_km(&[a, b, c]) - direct).abs() < 1e-9);
        assert_eq!(path_length_km(&[a]), 0.0);
    }

    #[test]
    fn eta_rounds_up() {
        assert_eq!(eta_minutes(0.0, 25.0), 0);
        assert_eq!(eta_minutes(1.0, 60.0), 1);
        assert_eq!(eta_minutes(1.01, 60.0), 2);
        assert_eq!(eta_minutes(1.5, 15.0), 6);
        assert_eq!(eta_minutes(1.0, 0.0), u32::MAX);
    }

    #[test]
    fn offset_moves_roughly_the_requested_distance() {
        let origin = Coordinate::new(52.52, 13.405);
        let moved = offset_km(&origin, 0.6, 0.8);
        assert!((haversine_km(&origin, &moved) - 1.0).abs() < 0.01);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(validate_coordinate("pickup", &Coordinate::new(91.0, 0.0)).is_err());
        assert!(validate_coordinate("pickup", &Coordinate::new(0.0, f64::NAN)).is_err());
        assert!(validate_coordinate("pickup", &Coordinate::new(-90.0, 180.0)).is_ok());
    }
}
