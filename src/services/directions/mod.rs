//! Directions provider abstraction.
//!
//! The provider turns an ordered (start, vias, end) request into road
//! geometry with per-segment timing. Production uses the T-map
//! sequential-route API; tests use the mock, which fabricates plausible
//! geometry from haversine distances.

mod tmap;

pub use tmap::{TmapClient, TmapConfig};

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Coordinates, MaterializeParams};

/// One waypoint of a provider request.
#[derive(Debug, Clone)]
pub struct RoutePoint {
    pub id: String,
    pub name: String,
    pub coordinates: Coordinates,
}

/// A single vehicle's route request: start, ordered vias, end.
#[derive(Debug, Clone)]
pub struct DirectionsRequest {
    pub start: RoutePoint,
    pub vias: Vec<RoutePoint>,
    pub end: RoutePoint,
    pub params: MaterializeParams,
}

impl DirectionsRequest {
    /// Waypoints in visit order.
    pub fn waypoints(&self) -> Vec<&RoutePoint> {
        let mut points = Vec::with_capacity(self.vias.len() + 2);
        points.push(&self.start);
        points.extend(self.vias.iter());
        points.push(&self.end);
        points
    }
}

/// One feature of the provider response, already normalized to seconds
/// and meters.
#[derive(Debug, Clone)]
pub enum RouteFeature {
    /// A road segment with its own travel time and length.
    Line {
        coordinates: Vec<[f64; 2]>,
        time_s: f64,
        distance_m: f64,
    },
    /// A waypoint echo; when the provider reports cumulative values here
    /// they override the walked accumulation at that vertex.
    Point {
        coordinate: [f64; 2],
        cumulative_time_s: Option<f64>,
        cumulative_distance_m: Option<f64>,
    },
}

/// Normalized provider response.
#[derive(Debug, Clone)]
pub struct DirectionsRoute {
    pub features: Vec<RouteFeature>,
    /// Totals as reported for the fetched geometry; stored as metadata,
    /// waypoint cumulatives stay authoritative.
    pub total_time_s: f64,
    pub total_distance_m: f64,
}

/// Error type for provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level failure after bounded retries.
    #[error("provider unreachable: {0}")]
    Unavailable(String),
    /// The provider answered with an error or an unparseable body.
    #[error("provider error: {0}")]
    BadResponse(String),
    /// The per-call or per-vehicle timeout elapsed.
    #[error("provider timeout")]
    Timeout,
}

/// Directions provider trait (T-map, mock, etc.)
#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    /// Fetch road geometry and timing for one vehicle's route.
    async fn fetch_route(&self, request: &DirectionsRequest)
        -> Result<DirectionsRoute, ProviderError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Mock provider for tests: straight-line legs with a midpoint vertex,
/// haversine-estimated road timing, dwell added after each via.
pub struct MockDirectionsProvider {
    /// Straight-line to road-distance coefficient
    road_coefficient: f64,
    /// Average speed in km/h for time estimation
    average_speed_kmh: f64,
}

impl Default for MockDirectionsProvider {
    fn default() -> Self {
        Self { road_coefficient: crate::services::geo::ROAD_COEFFICIENT, average_speed_kmh: 40.0 }
    }
}

impl MockDirectionsProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DirectionsProvider for MockDirectionsProvider {
    async fn fetch_route(
        &self,
        request: &DirectionsRequest,
    ) -> Result<DirectionsRoute, ProviderError> {
        use crate::services::geo::haversine_distance;

        let waypoints = request.waypoints();
        let dwell = request.params.via_dwell_seconds as f64;
        let mut features = Vec::new();
        let mut total_time = 0.0;
        let mut total_distance = 0.0;

        for (leg, pair) in waypoints.windows(2).enumerate() {
            let (from, to) = (&pair[0].coordinates, &pair[1].coordinates);
            let km = haversine_distance(from, to) * self.road_coefficient;
            let distance_m = km * 1000.0;
            let mut time_s = km / self.average_speed_kmh * 3600.0;
            // Dwell before departing a via (every leg after the first).
            if leg > 0 {
                time_s += dwell;
            }

            let mid = [(from.lon + to.lon) / 2.0, (from.lat + to.lat) / 2.0];
            features.push(RouteFeature::Line {
                coordinates: vec![[from.lon, from.lat], mid, [to.lon, to.lat]],
                time_s,
                distance_m,
            });
            total_time += time_s;
            total_distance += distance_m;
        }

        Ok(DirectionsRoute { features, total_time_s: total_time, total_distance_m: total_distance })
    }

    fn name(&self) -> &str {
        "MockDirections"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SearchOption, VehicleClass};
    use chrono::NaiveDate;

    fn point(id: &str, lon: f64, lat: f64) -> RoutePoint {
        RoutePoint {
            id: id.to_string(),
            name: id.to_string(),
            coordinates: Coordinates { lon, lat },
        }
    }

    fn params() -> MaterializeParams {
        MaterializeParams {
            search_option: SearchOption::Recommended,
            vehicle_class: VehicleClass::LargeVan,
            depart_at: NaiveDate::from_ymd_opt(2026, 8, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            via_dwell_seconds: 60,
        }
    }

    #[tokio::test]
    async fn mock_builds_one_line_per_leg() {
        let provider = MockDirectionsProvider::new();
        let request = DirectionsRequest {
            start: point("depot", 127.0, 37.5),
            vias: vec![point("a", 127.1, 37.5)],
            end: point("depot", 127.0, 37.5),
            params: params(),
        };

        let route = provider.fetch_route(&request).await.unwrap();
        assert_eq!(route.features.len(), 2);
        assert!(route.total_time_s > 0.0);
        assert!(route.total_distance_m > 0.0);
    }

    #[tokio::test]
    async fn mock_includes_dwell_after_via() {
        let provider = MockDirectionsProvider::new();
        let mut p = params();
        p.via_dwell_seconds = 600;
        let with_dwell = DirectionsRequest {
            start: point("depot", 127.0, 37.5),
            vias: vec![point("a", 127.1, 37.5)],
            end: point("depot", 127.0, 37.5),
            params: p,
        };
        let mut p0 = params();
        p0.via_dwell_seconds = 0;
        let without_dwell = DirectionsRequest { params: p0, ..with_dwell.clone() };

        let slow = provider.fetch_route(&with_dwell).await.unwrap();
        let fast = provider.fetch_route(&without_dwell).await.unwrap();
        assert!((slow.total_time_s - fast.total_time_s - 600.0).abs() < 1e-6);
    }

    #[test]
    fn waypoints_preserve_order() {
        let request = DirectionsRequest {
            start: point("depot", 127.0, 37.5),
            vias: vec![point("a", 127.1, 37.5), point("b", 127.2, 37.5)],
            end: point("c", 127.3, 37.5),
            params: params(),
        };
        let ids: Vec<&str> = request.waypoints().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["depot", "a", "b", "c"]);
    }
}
