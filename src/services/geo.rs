//! Geographic calculations

use crate::types::Coordinates;

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Road distance coefficient (straight line to road)
pub const ROAD_COEFFICIENT: f64 = 1.3;

/// Calculate Haversine distance between two points in kilometers
pub fn haversine_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lon - from.lon).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Squared planar distance in degree space. Good enough for matching a
/// waypoint to the nearest geometry vertex at city scale.
pub fn planar_distance_sq(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_seoul_suwon() {
        let seoul = Coordinates { lon: 126.9780, lat: 37.5665 };
        let suwon = Coordinates { lon: 127.0286, lat: 37.2636 };

        let distance = haversine_distance(&seoul, &suwon);

        // Seoul to Suwon is approximately 34 km
        assert!((distance - 34.0).abs() < 3.0, "got {distance} km");
    }

    #[test]
    fn haversine_same_point() {
        let point = Coordinates { lon: 127.0, lat: 37.5 };
        let distance = haversine_distance(&point, &point);
        assert!(distance.abs() < 0.001);
    }

    #[test]
    fn planar_distance_orders_candidates() {
        let target = [127.0, 37.5];
        let near = [127.0001, 37.5];
        let far = [127.01, 37.5];
        assert!(planar_distance_sq(target, near) < planar_distance_sq(target, far));
    }
}
