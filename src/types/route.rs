//! Materialized route and plan artifact types.
//!
//! Everything here is provider-grounded: cumulative time/distance come
//! from real road geometry, never from interpolation across via counts.
//! Waypoint cumulatives are the authoritative totals for downstream
//! consumers; the provider's own totals are kept as geometry metadata.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PlanError;
use crate::types::Coordinates;

/// Provider route search option, wire code in parentheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchOption {
    Recommended,
    FreeRoads,
    Fastest,
    Beginner,
    Truck,
}

impl SearchOption {
    /// Integer code used on the provider wire.
    pub fn code(&self) -> u8 {
        match self {
            SearchOption::Recommended => 0,
            SearchOption::FreeRoads => 1,
            SearchOption::Fastest => 2,
            SearchOption::Beginner => 3,
            SearchOption::Truck => 17,
        }
    }
}

impl Default for SearchOption {
    fn default() -> Self {
        SearchOption::Recommended
    }
}

/// Provider vehicle class, wire code in parentheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VehicleClass {
    Passenger,
    MidVan,
    LargeVan,
    LargeTruck,
    SpecialTruck,
}

impl VehicleClass {
    pub fn code(&self) -> u8 {
        match self {
            VehicleClass::Passenger => 1,
            VehicleClass::MidVan => 2,
            VehicleClass::LargeVan => 3,
            VehicleClass::LargeTruck => 4,
            VehicleClass::SpecialTruck => 5,
        }
    }
}

impl Default for VehicleClass {
    fn default() -> Self {
        VehicleClass::LargeVan
    }
}

/// Parameters of a materialization pass. Part of every vehicle
/// fingerprint: changing any of them forces re-materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializeParams {
    #[serde(default)]
    pub search_option: SearchOption,
    #[serde(default)]
    pub vehicle_class: VehicleClass,
    /// Departure wall-clock time, minute precision.
    pub depart_at: NaiveDateTime,
    /// Dwell applied at each via point, seconds.
    #[serde(default = "default_via_dwell")]
    pub via_dwell_seconds: u32,
}

fn default_via_dwell() -> u32 {
    crate::defaults::DEFAULT_VIA_DWELL_SECONDS
}

/// Per-vehicle materialization outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeStatus {
    Ok,
    ProviderError,
    NoMatch,
}

/// A stop bound to the fetched road geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waypoint {
    pub stop_id: String,
    pub name: String,
    pub coordinates: Coordinates,
    pub demand: u32,
    /// Seconds elapsed from the route start along the road geometry.
    pub cumulative_time_s: f64,
    /// Meters travelled from the route start along the road geometry.
    pub cumulative_distance_m: f64,
    /// `depart_at` + cumulative time, second precision. Absent on failed
    /// vehicles.
    pub arrival_time: Option<NaiveDateTime>,
}

/// GeoJSON-style LineString of [lon, lat] pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineString {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<[f64; 2]>,
}

impl LineString {
    pub fn new(coordinates: Vec<[f64; 2]>) -> Self {
        Self { kind: "LineString".to_string(), coordinates }
    }
}

/// One vehicle's materialized route. On failure the ordered waypoint list
/// is preserved but geometry and totals are explicitly absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleRoute {
    pub vehicle_id: u32,
    pub status: MaterializeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ordered: start point, vias, end point.
    pub waypoints: Vec<Waypoint>,
    pub route_geometry: Option<LineString>,
    /// Total reported by the provider for the fetched geometry. May exceed
    /// the last waypoint's cumulative when the geometry overshoots the
    /// final stop; downstream consumers must prefer waypoint cumulatives.
    pub geometry_total_time_s: Option<f64>,
    pub geometry_total_distance_m: Option<f64>,
    /// Sum of non-depot demands along the route.
    pub route_load: u32,
}

impl VehicleRoute {
    pub fn start_point(&self) -> Option<&Waypoint> {
        self.waypoints.first()
    }

    pub fn end_point(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }

    pub fn via_points(&self) -> &[Waypoint] {
        if self.waypoints.len() <= 2 {
            &[]
        } else {
            &self.waypoints[1..self.waypoints.len() - 1]
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == MaterializeStatus::Ok
    }
}

/// Totals over the successfully materialized vehicles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactStatistics {
    pub total_distance_m: f64,
    pub total_time_s: f64,
    pub route_count: usize,
}

/// A materialized plan: vehicle routes in ascending vehicle-id order plus
/// the matrix snapshot and materialization parameters they were built
/// from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanArtifact {
    pub project_id: String,
    /// `baseline` or an edit scenario id.
    pub scenario: String,
    pub snapshot: Uuid,
    pub params: MaterializeParams,
    pub generated_at: DateTime<Utc>,
    pub vehicles: Vec<VehicleRoute>,
    pub statistics: ArtifactStatistics,
}

impl PlanArtifact {
    pub fn vehicle(&self, vehicle_id: u32) -> Option<&VehicleRoute> {
        self.vehicles.iter().find(|v| v.vehicle_id == vehicle_id)
    }

    /// Recompute the statistics block from the vehicle list.
    pub fn recompute_statistics(&mut self) {
        let ok: Vec<&VehicleRoute> = self.vehicles.iter().filter(|v| v.is_ok()).collect();
        self.statistics = ArtifactStatistics {
            total_distance_m: ok
                .iter()
                .filter_map(|v| v.end_point())
                .map(|w| w.cumulative_distance_m)
                .sum(),
            total_time_s: ok
                .iter()
                .filter_map(|v| v.end_point())
                .map(|w| w.cumulative_time_s)
                .sum(),
            route_count: ok.len(),
        };
    }
}

/// Parse a search option integer code (external adapters normalize to the
/// enum on ingress).
pub fn search_option_from_code(code: u8) -> Result<SearchOption, PlanError> {
    match code {
        0 => Ok(SearchOption::Recommended),
        1 => Ok(SearchOption::FreeRoads),
        2 => Ok(SearchOption::Fastest),
        3 => Ok(SearchOption::Beginner),
        17 => Ok(SearchOption::Truck),
        other => Err(PlanError::BadInput(format!("unknown search option code {other}"))),
    }
}

pub fn vehicle_class_from_code(code: u8) -> Result<VehicleClass, PlanError> {
    match code {
        1 => Ok(VehicleClass::Passenger),
        2 => Ok(VehicleClass::MidVan),
        3 => Ok(VehicleClass::LargeVan),
        4 => Ok(VehicleClass::LargeTruck),
        5 => Ok(VehicleClass::SpecialTruck),
        other => Err(PlanError::BadInput(format!("unknown vehicle class code {other}"))),
    }
}
