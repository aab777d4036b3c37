//! Edit scenario types.

use serde::{Deserialize, Serialize};

use crate::types::MaterializeParams;

/// Reserved scenario id of the implicit baseline.
pub const BASELINE_SCENARIO: &str = "baseline";

/// One row of a scenario's tabular edit plan: the user-intended ordering
/// and assignment of a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditPlanRow {
    pub vehicle_id: u32,
    /// 1-based position within the vehicle's route.
    pub stop_order: u32,
    pub stop_id: String,
}

/// Per-scenario stop coordinate override, created when the user moves a
/// stop inside an edit scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOverride {
    pub stop_id: String,
    pub lon: f64,
    pub lat: f64,
}

/// Summary of a stored edit scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditScenarioInfo {
    pub edit_id: String,
    pub has_materialized: bool,
    pub vehicle_count: usize,
    pub stop_count: usize,
}

/// Statistics emitted by an edit-delta run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaStats {
    pub regenerated: usize,
    pub reused: usize,
    pub deleted: usize,
    pub failed: usize,
    pub failed_vehicle_ids: Vec<u32>,
}

/// Cache key of the delta engine: the ordered waypoint tuple plus the
/// materialization parameters. Coordinates compare bit-exactly at full
/// stored precision.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleFingerprint {
    points: Vec<(String, u64, u64)>,
    params: MaterializeParams,
}

impl VehicleFingerprint {
    pub fn new(
        points: impl IntoIterator<Item = (String, f64, f64)>,
        params: MaterializeParams,
    ) -> Self {
        Self {
            points: points
                .into_iter()
                .map(|(id, lon, lat)| (id, lon.to_bits(), lat.to_bits()))
                .collect(),
            params,
        }
    }
}

/// Validate a scenario id against the allowed charset.
pub fn is_valid_edit_id(id: &str) -> bool {
    !id.is_empty()
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MaterializeParams, SearchOption, VehicleClass};
    use chrono::NaiveDate;

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

    #[test]
    fn edit_id_charset() {
        assert!(is_valid_edit_id("e1"));
        assert!(is_valid_edit_id("scenario_2-b"));
        assert!(!is_valid_edit_id(""));
        assert!(!is_valid_edit_id("has space"));
        assert!(!is_valid_edit_id("dots.bad"));
        assert!(!is_valid_edit_id("../escape"));
    }

    #[test]
    fn fingerprint_equality_is_exact() {
        let a = VehicleFingerprint::new(
            vec![("s1".to_string(), 127.123456789, 37.5)],
            params(),
        );
        let b = VehicleFingerprint::new(
            vec![("s1".to_string(), 127.123456789, 37.5)],
            params(),
        );
        assert_eq!(a, b);

        let moved = VehicleFingerprint::new(
            vec![("s1".to_string(), 127.123456788, 37.5)],
            params(),
        );
        assert_ne!(a, moved);
    }

    #[test]
    fn fingerprint_sensitive_to_params() {
        let points = vec![("s1".to_string(), 127.0, 37.5)];
        let a = VehicleFingerprint::new(points.clone(), params());
        let mut other = params();
        other.via_dwell_seconds = 120;
        let b = VehicleFingerprint::new(points, other);
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_sensitive_to_order() {
        let a = VehicleFingerprint::new(
            vec![("s1".to_string(), 1.0, 1.0), ("s2".to_string(), 2.0, 2.0)],
            params(),
        );
        let b = VehicleFingerprint::new(
            vec![("s2".to_string(), 2.0, 2.0), ("s1".to_string(), 1.0, 1.0)],
            params(),
        );
        assert_ne!(a, b);
    }
}
