use geo::{point, HaversineDestination, HaversineDistance};

use crate::constants::METERS_PER_MILE;

/// Great-circle distance in meters between two (lat, lon) pairs
pub fn haversine_meters(from: (f64, f64), to: (f64, f64)) -> f64 {
    let a = point!(x: from.1, y: from.0);
    let b = point!(x: to.1, y: to.0);
    a.haversine_distance(&b)
}

pub fn haversine_miles(from: (f64, f64), to: (f64, f64)) -> f64 {
    haversine_meters(from, to) / METERS_PER_MILE
}

/// Point reached travelling `distance_m` from `origin` on `bearing_deg`
pub fn destination(origin: (f64, f64), bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let p = point!(x: origin.1, y: origin.0).haversine_destination(bearing_deg, distance_m);
    (p.y(), p.x())
}

/// Rounds a coordinate to the precision published in stage files
pub fn round_coordinate(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_city_hall_to_independence_hall() {
        let city_hall = (39.9526, -75.1652);
        let independence_hall = (39.9489, -75.1500);
        let miles = haversine_miles(city_hall, independence_hall);
        assert!(miles > 0.8 && miles < 0.9, "got {}", miles);
    }

    #[test]
    fn test_destination_round_trips_distance() {
        let origin = (39.95, -75.16);
        let moved = destination(origin, 45.0, 250.0);
        let d = haversine_meters(origin, moved);
        assert!((d - 250.0).abs() < 0.5, "got {}", d);
    }
}
