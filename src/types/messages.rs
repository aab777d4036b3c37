//! NATS message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    DeltaStats, EditScenarioInfo, ObjectiveSpec, OrderedPlan, PlanArtifact, RouteMode,
};

/// Generic request wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> Request<T> {
    pub fn new(payload: T) -> Self {
        Self { id: Uuid::new_v4(), timestamp: Utc::now(), payload }
    }
}

/// Generic success response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(request_id: Uuid, payload: T) -> Self {
        Self { id: request_id, timestamp: Utc::now(), payload }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(request_id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            error: ErrorDetail { code: code.into(), message: message.into() },
        }
    }
}

// ==========================================================================
// Operation payloads
// ==========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    pub project_id: String,
    /// When omitted, estimated from total demand and capacity.
    #[serde(default)]
    pub vehicle_count: Option<u32>,
    pub vehicle_capacity: u32,
    #[serde(default)]
    pub route_mode: RouteMode,
    pub objective: ObjectiveSpec,
    #[serde(default = "default_time_budget")]
    pub time_budget_seconds: u32,
    /// Caller's view of the matrix snapshot; a mismatch fails with
    /// STALE_MATRIX.
    #[serde(default)]
    pub stops_snapshot: Option<Uuid>,
}

fn default_time_budget() -> u32 {
    crate::defaults::DEFAULT_TIME_BUDGET_SECONDS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    pub plan: OrderedPlan,
    pub snapshot: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeRequest {
    pub project_id: String,
    pub params: MaterializeParamsRequest,
}

/// Materialization parameters as received on the wire; `depart_at` is
/// optional and defaults to the current minute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeParamsRequest {
    #[serde(default)]
    pub search_option: Option<u8>,
    #[serde(default)]
    pub vehicle_class: Option<u8>,
    /// `YYYYMMDDHHMM`.
    #[serde(default)]
    pub depart_at: Option<String>,
    #[serde(default)]
    pub via_dwell_seconds: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeResponse {
    pub artifact: PlanArtifact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRequest {
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditListResponse {
    pub edits: Vec<EditScenarioInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditCreateRequest {
    pub project_id: String,
    pub edit_id: String,
    /// Scenario to copy from; baseline when absent.
    #[serde(default)]
    pub source_edit_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub project_id: String,
    pub edit_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditReloadRequest {
    pub project_id: String,
    pub edit_id: String,
    #[serde(default)]
    pub params: MaterializeParamsRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditReloadResponse {
    pub stats: DeltaStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMoveRequest {
    pub project_id: String,
    pub edit_id: String,
    pub stop_id: String,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderVehicle {
    pub vehicle_id: u32,
    /// Ordered non-depot stop ids.
    pub stop_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub project_id: String,
    pub edit_id: String,
    pub vehicles: Vec<ReorderVehicle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub message: String,
}
