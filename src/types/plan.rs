//! Ordered plan and objective specification types.

use serde::{Deserialize, Serialize};

/// Whether vehicle routes return to the depot or end at their last stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Depot start, depot end.
    ClosedTour,
    /// Depot start, route ends at the last non-depot stop.
    OpenEnd,
}

impl Default for RouteMode {
    fn default() -> Self {
        RouteMode::ClosedTour
    }
}

/// Objectives usable as primary or tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Distance,
    Time,
    Vehicles,
    Cost,
    Makespan,
}

/// Additional weighted penalty terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraTerm {
    TimeWindowViolation,
    WaitTime,
    WorkloadBalance,
    Overtime,
    Co2Proxy,
    FixedCost,
    UtilizationPenalty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightedTerm {
    pub term: ExtraTerm,
    pub weight: f64,
}

/// Full objective specification: one primary, up to two ordered
/// tie-breakers, and any number of weighted penalty terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveSpec {
    pub primary: Objective,
    #[serde(default)]
    pub tiebreakers: Vec<Objective>,
    #[serde(default)]
    pub extra_terms: Vec<WeightedTerm>,
    /// Optional route duration bound, used by the overtime and wait-time
    /// penalty terms (seconds).
    #[serde(default)]
    pub route_duration_limit_s: Option<f64>,
}

impl ObjectiveSpec {
    pub fn distance() -> Self {
        Self {
            primary: Objective::Distance,
            tiebreakers: vec![],
            extra_terms: vec![],
            route_duration_limit_s: None,
        }
    }
}

/// One visit in a vehicle's ordered route, with provisional cumulative
/// values derived from the matrices. These are replaced by
/// provider-grounded values during materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStop {
    pub stop_id: String,
    pub stop_name: String,
    /// 1-based position along the route.
    pub stop_order: u32,
    pub is_depot: bool,
    /// Demand delivered at this stop (0 for depot).
    pub load: u32,
    /// Prefix sum of demands up to and including this stop.
    pub cumulative_load: u32,
    /// Matrix-derived estimate, seconds from route start.
    pub est_time_s: f64,
    /// Matrix-derived estimate, meters from route start.
    pub est_distance_m: f64,
}

/// One used vehicle's ordered stop sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedVehicle {
    /// 1-based vehicle identifier.
    pub vehicle_id: u32,
    pub stops: Vec<PlannedStop>,
    pub route_load: u32,
    pub route_time_s: f64,
    pub route_distance_m: f64,
}

impl PlannedVehicle {
    /// Non-depot stop ids along the route, in visit order.
    pub fn stop_ids(&self) -> Vec<&str> {
        self.stops
            .iter()
            .filter(|s| !s.is_depot)
            .map(|s| s.stop_id.as_str())
            .collect()
    }
}

/// Metadata attached to an optimizer result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeMeta {
    /// Objective actually pursued (after any fallback).
    pub objective: Objective,
    /// True when a cost/makespan solve failed and the optimizer re-ran
    /// with a distance-primary objective.
    pub fallback_used: bool,
    pub solve_time_ms: u64,
    pub solver_log: Vec<String>,
}

/// The optimizer's output: per-vehicle ordered stop sequences plus run
/// metadata. Vehicles are numbered 1..=used; unused vehicles produce no
/// entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderedPlan {
    pub route_mode: RouteMode,
    pub vehicles: Vec<PlannedVehicle>,
    pub total_distance_m: f64,
    pub total_time_s: f64,
    pub total_load: u32,
    pub meta: OptimizeMeta,
}
