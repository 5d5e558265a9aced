//! Great-circle distance and derived speed.
//!
//! Every distance in the workspace goes through [`distance_meters`], so the
//! classifier's hysteresis checks and trip distances always agree.

use crate::types::LocationSample;

/// Spherical earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two coordinates, in meters.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Distance between two fixes, in meters.
pub fn distance_meters(a: &LocationSample, b: &LocationSample) -> f64 {
    haversine_meters(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Average speed between two fixes in m/s.
///
/// Returns `None` when the fixes are not strictly ordered in time.
pub fn speed_mps(from: &LocationSample, to: &LocationSample) -> Option<f64> {
    let elapsed_ms = to.timestamp_ms - from.timestamp_ms;
    if elapsed_ms <= 0 {
        return None;
    }
    #[expect(
        clippy::cast_precision_loss,
        reason = "millisecond spans between fixes are far below 2^52"
    )]
    let elapsed_s = elapsed_ms as f64 / 1000.0;
    Some(distance_meters(from, to) / elapsed_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_identical_points() {
        let p = LocationSample::new(51.5074, -0.1278, 5.0, 0);
        assert!(distance_meters(&p, &p).abs() < f64::EPSILON);
    }

    #[test]
    fn beijing_neighbours_are_about_fourteen_meters_apart() {
        let anchor = LocationSample::new(39.9042, 116.4074, 5.0, 0);
        let current = LocationSample::new(39.9043, 116.4075, 5.0, 0);
        let d = distance_meters(&anchor, &current);
        assert!((d - 14.01).abs() < 0.05, "got {d}");
    }

    #[test]
    fn one_millidegree_of_latitude_is_about_111_meters() {
        let d = haversine_meters(0.0, 0.0, 0.001, 0.0);
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let a = LocationSample::new(48.8566, 2.3522, 5.0, 0);
        let b = LocationSample::new(52.5200, 13.4050, 5.0, 0);
        assert!((distance_meters(&a, &b) - distance_meters(&b, &a)).abs() < 1e-6);
    }

    #[test]
    fn speed_over_ten_seconds() {
        let a = LocationSample::new(0.0, 0.0, 5.0, 0);
        let b = LocationSample::new(0.001, 0.0, 5.0, 10_000);
        let speed = speed_mps(&a, &b).unwrap();
        assert!((speed - 11.1195).abs() < 0.001, "got {speed}");
    }

    #[test]
    fn speed_requires_forward_time() {
        let a = LocationSample::new(0.0, 0.0, 5.0, 1_000);
        let b = LocationSample::new(0.001, 0.0, 5.0, 1_000);
        assert!(speed_mps(&a, &b).is_none());
        assert!(speed_mps(&b, &a).is_none());
    }
}
