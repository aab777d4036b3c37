//! T-map sequential-route client
//!
//! Speaks the documented routeSequential100 schema: integer codes for
//! `searchOption` and `carType`, `totalValue` dwell seconds per via,
//! WGS84GEO coordinates as strings, `startTime` as `YYYYMMDDHHMM`.
//! All response values are normalized to seconds and meters on ingress.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{DirectionsProvider, DirectionsRequest, DirectionsRoute, ProviderError, RouteFeature};
use crate::defaults::PROVIDER_RETRY_ATTEMPTS;

/// T-map client configuration
#[derive(Debug, Clone)]
pub struct TmapConfig {
    /// Base URL of the API gateway (e.g. "https://apis.openapi.sk.com")
    pub base_url: String,
    /// Application key sent in the `appKey` header
    pub app_key: String,
    /// Per-call timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for TmapConfig {
    fn default() -> Self {
        Self {
            base_url: "https://apis.openapi.sk.com".to_string(),
            app_key: String::new(),
            timeout_seconds: 15,
        }
    }
}

impl TmapConfig {
    pub fn new(base_url: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), app_key: app_key.into(), ..Default::default() }
    }
}

/// T-map directions client
pub struct TmapClient {
    client: Client,
    config: TmapConfig,
}

impl TmapClient {
    pub fn new(config: TmapConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Build the routeSequential100 request body
    fn build_request(&self, request: &DirectionsRequest) -> SequentialRouteBody {
        let params = &request.params;
        let via_points = request
            .vias
            .iter()
            .map(|via| ViaPoint {
                via_point_id: via.id.clone(),
                via_point_name: via.name.clone(),
                via_x: format!("{}", via.coordinates.lon),
                via_y: format!("{}", via.coordinates.lat),
            })
            .collect();

        SequentialRouteBody {
            req_coord_type: "WGS84GEO".to_string(),
            res_coord_type: "WGS84GEO".to_string(),
            start_name: request.start.name.clone(),
            start_x: format!("{}", request.start.coordinates.lon),
            start_y: format!("{}", request.start.coordinates.lat),
            start_time: params.depart_at.format("%Y%m%d%H%M").to_string(),
            end_name: request.end.name.clone(),
            end_x: format!("{}", request.end.coordinates.lon),
            end_y: format!("{}", request.end.coordinates.lat),
            search_option: params.search_option.code(),
            car_type: params.vehicle_class.code(),
            total_value: params.via_dwell_seconds,
            via_points,
        }
    }

    async fn post_once(&self, body: &SequentialRouteBody) -> Result<SequentialRouteResponse, ProviderError> {
        let url = format!("{}/tmap/routes/routeSequential100?version=1", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .header("accept", "application/json")
            .header("appKey", &self.config.app_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!("HTTP {status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::BadResponse(format!("HTTP {status}: {text}")));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::BadResponse(format!("invalid JSON: {e}")))?;
        if let Some(err) = raw.get("error") {
            return Err(ProviderError::BadResponse(format!("provider error: {err}")));
        }
        serde_json::from_value(raw)
            .map_err(|e| ProviderError::BadResponse(format!("unexpected schema: {e}")))
    }

    /// Call with bounded retries and exponential backoff. Only transient
    /// failures (network, timeout, 5xx, rate-limit) are retried.
    async fn post_with_retry(
        &self,
        body: &SequentialRouteBody,
    ) -> Result<SequentialRouteResponse, ProviderError> {
        let started = std::time::Instant::now();
        let mut backoff = Duration::from_millis(500);
        let mut last_err = ProviderError::Unavailable("no attempt made".to_string());

        for attempt in 1..=PROVIDER_RETRY_ATTEMPTS {
            match self.post_once(body).await {
                Ok(response) => {
                    debug!(
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "provider call succeeded"
                    );
                    return Ok(response);
                }
                Err(err @ ProviderError::BadResponse(_)) => return Err(err),
                Err(err) => {
                    warn!(attempt, "provider call failed: {err}");
                    last_err = err;
                    if attempt < PROVIDER_RETRY_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last_err)
    }
}

#[async_trait::async_trait]
impl DirectionsProvider for TmapClient {
    async fn fetch_route(
        &self,
        request: &DirectionsRequest,
    ) -> Result<DirectionsRoute, ProviderError> {
        let body = self.build_request(request);
        debug!(vias = body.via_points.len(), "requesting sequential route");

        let response = self.post_with_retry(&body).await?;
        Ok(normalize_response(response))
    }

    fn name(&self) -> &str {
        "Tmap"
    }
}

/// Flatten the feature collection into normalized features and resolve
/// the totals, following the provider's precedence: top-level properties,
/// then the first feature carrying totals, then per-feature sums.
fn normalize_response(response: SequentialRouteResponse) -> DirectionsRoute {
    let mut features = Vec::with_capacity(response.features.len());
    let mut feature_time_sum = 0.0;
    let mut feature_distance_sum = 0.0;
    let mut first_feature_totals: Option<(f64, f64)> = None;

    for feature in response.features {
        let props = feature.properties;
        match feature.geometry {
            Geometry::LineString { coordinates } => {
                let time_s = props.time.unwrap_or(0.0);
                let distance_m = props.distance.unwrap_or(0.0);
                feature_time_sum += time_s;
                feature_distance_sum += distance_m;
                features.push(RouteFeature::Line { coordinates, time_s, distance_m });
            }
            Geometry::Point { coordinates } => {
                if first_feature_totals.is_none() {
                    if let (Some(t), Some(d)) = (props.total_time, props.total_distance) {
                        first_feature_totals = Some((t, d));
                    }
                }
                features.push(RouteFeature::Point {
                    coordinate: coordinates,
                    cumulative_time_s: props.total_time,
                    cumulative_distance_m: props.total_distance,
                });
            }
        }
    }

    let top = response.properties.unwrap_or_default();
    let total_time_s = top
        .total_time
        .or(first_feature_totals.map(|(t, _)| t))
        .unwrap_or(feature_time_sum);
    let total_distance_m = top
        .total_distance
        .or(first_feature_totals.map(|(_, d)| d))
        .unwrap_or(feature_distance_sum);

    DirectionsRoute { features, total_time_s, total_distance_m }
}

// T-map API types

#[derive(Debug, Serialize)]
struct SequentialRouteBody {
    #[serde(rename = "reqCoordType")]
    req_coord_type: String,
    #[serde(rename = "resCoordType")]
    res_coord_type: String,
    #[serde(rename = "startName")]
    start_name: String,
    #[serde(rename = "startX")]
    start_x: String,
    #[serde(rename = "startY")]
    start_y: String,
    #[serde(rename = "startTime")]
    start_time: String,
    #[serde(rename = "endName")]
    end_name: String,
    #[serde(rename = "endX")]
    end_x: String,
    #[serde(rename = "endY")]
    end_y: String,
    #[serde(rename = "searchOption")]
    search_option: u8,
    #[serde(rename = "carType")]
    car_type: u8,
    #[serde(rename = "totalValue")]
    total_value: u32,
    #[serde(rename = "viaPoints")]
    via_points: Vec<ViaPoint>,
}

#[derive(Debug, Serialize)]
struct ViaPoint {
    #[serde(rename = "viaPointId")]
    via_point_id: String,
    #[serde(rename = "viaPointName")]
    via_point_name: String,
    #[serde(rename = "viaX")]
    via_x: String,
    #[serde(rename = "viaY")]
    via_y: String,
}

#[derive(Debug, Deserialize)]
struct SequentialRouteResponse {
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default)]
    properties: Option<TopProperties>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
    #[serde(default)]
    properties: FeatureProperties,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    LineString { coordinates: Vec<[f64; 2]> },
    Point { coordinates: [f64; 2] },
}

#[derive(Debug, Default, Deserialize)]
struct FeatureProperties {
    #[serde(default)]
    time: Option<f64>,
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default, rename = "totalTime")]
    total_time: Option<f64>,
    #[serde(default, rename = "totalDistance")]
    total_distance: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct TopProperties {
    #[serde(default, rename = "totalTime")]
    total_time: Option<f64>,
    #[serde(default, rename = "totalDistance")]
    total_distance: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::directions::RoutePoint;
    use crate::types::{Coordinates, MaterializeParams, SearchOption, VehicleClass};
    use chrono::NaiveDate;

    fn request() -> DirectionsRequest {
        DirectionsRequest {
            start: RoutePoint {
                id: "depot".into(),
                name: "Depot".into(),
                coordinates: Coordinates { lon: 127.0, lat: 37.5 },
            },
            vias: vec![RoutePoint {
                id: "a".into(),
                name: "Stop A".into(),
                coordinates: Coordinates { lon: 127.1, lat: 37.5 },
            }],
            end: RoutePoint {
                id: "depot".into(),
                name: "Depot".into(),
                coordinates: Coordinates { lon: 127.0, lat: 37.5 },
            },
            params: MaterializeParams {
                search_option: SearchOption::Truck,
                vehicle_class: VehicleClass::LargeTruck,
                depart_at: NaiveDate::from_ymd_opt(2026, 8, 1)
                    .unwrap()
                    .and_hms_opt(9, 30, 0)
                    .unwrap(),
                via_dwell_seconds: 120,
            },
        }
    }

    #[test]
    fn request_body_uses_documented_field_names_and_codes() {
        let client = TmapClient::new(TmapConfig::default());
        let body = client.build_request(&request());
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["reqCoordType"], "WGS84GEO");
        assert_eq!(json["resCoordType"], "WGS84GEO");
        assert_eq!(json["searchOption"], 17);
        assert_eq!(json["carType"], 4);
        assert_eq!(json["totalValue"], 120);
        assert_eq!(json["startTime"], "202608010930");
        assert_eq!(json["startX"], "127");
        assert_eq!(json["viaPoints"][0]["viaPointId"], "a");
        assert_eq!(json["viaPoints"][0]["viaX"], "127.1");
        assert_eq!(json["viaPoints"][0]["viaY"], "37.5");
        assert_eq!(json["endName"], "Depot");
    }

    #[test]
    fn normalize_prefers_top_level_totals() {
        let response: SequentialRouteResponse = serde_json::from_str(
            r#"{
                "features": [
                    {"geometry": {"type": "Point", "coordinates": [127.0, 37.5]},
                     "properties": {"totalTime": 0, "totalDistance": 0}},
                    {"geometry": {"type": "LineString",
                                  "coordinates": [[127.0, 37.5], [127.05, 37.5]]},
                     "properties": {"time": 300, "distance": 4000}}
                ],
                "properties": {"totalTime": 301, "totalDistance": 4005}
            }"#,
        )
        .unwrap();
        let route = normalize_response(response);
        assert_eq!(route.total_time_s, 301.0);
        assert_eq!(route.total_distance_m, 4005.0);
        assert_eq!(route.features.len(), 2);
    }

    #[test]
    fn normalize_falls_back_to_feature_sums() {
        let response: SequentialRouteResponse = serde_json::from_str(
            r#"{
                "features": [
                    {"geometry": {"type": "LineString",
                                  "coordinates": [[127.0, 37.5], [127.05, 37.5]]},
                     "properties": {"time": 300, "distance": 4000}},
                    {"geometry": {"type": "LineString",
                                  "coordinates": [[127.05, 37.5], [127.1, 37.5]]},
                     "properties": {"time": 200, "distance": 3000}}
                ]
            }"#,
        )
        .unwrap();
        let route = normalize_response(response);
        assert_eq!(route.total_time_s, 500.0);
        assert_eq!(route.total_distance_m, 7000.0);
    }

    #[test]
    fn point_feature_carries_cumulative_override() {
        let response: SequentialRouteResponse = serde_json::from_str(
            r#"{
                "features": [
                    {"geometry": {"type": "Point", "coordinates": [127.05, 37.5]},
                     "properties": {"totalTime": 150, "totalDistance": 2000}}
                ]
            }"#,
        )
        .unwrap();
        let route = normalize_response(response);
        match &route.features[0] {
            RouteFeature::Point { cumulative_time_s, cumulative_distance_m, .. } => {
                assert_eq!(*cumulative_time_s, Some(150.0));
                assert_eq!(*cumulative_distance_m, Some(2000.0));
            }
            other => panic!("expected point feature, got {other:?}"),
        }
    }
}
