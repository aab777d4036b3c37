//! Plan store: per-project artifact directories and edit scenarios.
//!
//! Layout under the data directory:
//!
//! ```text
//! <project>/stops.csv               stop set (external input, read-only)
//! <project>/time_matrix.csv         seconds matrix (external input)
//! <project>/distance_matrix.csv     meters matrix (external input)
//! <project>/plan.csv                optimization output table
//! <project>/plan_summary.csv        one-row run summary
//! <project>/baseline.json           baseline materialized artifact
//! <project>/edits/<id>/plan.csv     tabular edit plan
//! <project>/edits/<id>/stops.csv    per-scenario coordinate overrides
//! <project>/edits/<id>/materialized.json
//! ```
//!
//! Artifact writes are atomic (temp file + rename). Writes to a single
//! scenario are serialized through per-(project, scenario) locks; reads
//! of distinct scenarios proceed independently.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::error::PlanError;
use crate::types::{
    is_valid_edit_id, Coordinates, EditPlanRow, EditScenarioInfo, MatrixPair, OrderedPlan,
    PlanArtifact, Stop, StopOverride, StopSet, BASELINE_SCENARIO,
};

const STOPS_FILE: &str = "stops.csv";
const TIME_MATRIX_FILE: &str = "time_matrix.csv";
const DISTANCE_MATRIX_FILE: &str = "distance_matrix.csv";
const PLAN_FILE: &str = "plan.csv";
const PLAN_SUMMARY_FILE: &str = "plan_summary.csv";
const BASELINE_ARTIFACT_FILE: &str = "baseline.json";
const EDITS_DIR: &str = "edits";
const EDIT_PLAN_FILE: &str = "plan.csv";
const EDIT_OVERRIDES_FILE: &str = "stops.csv";
const EDIT_ARTIFACT_FILE: &str = "materialized.json";

/// Filesystem-backed plan store.
pub struct PlanStore {
    data_dir: PathBuf,
    locks: Mutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlanCsvRow {
    vehicle_id: u32,
    stop_order: u32,
    stop_id: String,
    stop_name: String,
    location_type: String,
    load: u32,
    cumulative_load: u32,
    est_time_s: f64,
    est_distance_m: f64,
}

#[derive(Debug, Serialize)]
struct PlanSummaryRow {
    total_distance_m: f64,
    total_time_s: f64,
    total_load: u32,
    objective: String,
    fallback_used: bool,
    vehicle_count: u32,
    vehicle_capacity: u32,
    solve_time_ms: u64,
}

#[derive(Debug, Deserialize)]
struct StopCsvRow {
    id: String,
    name: String,
    lon: f64,
    lat: f64,
    demand: u32,
}

impl PlanStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), locks: Mutex::new(HashMap::new()) }
    }

    /// Per-(project, scenario) write lock. Holding the guard serializes
    /// every mutation of that scenario; distinct scenarios do not contend.
    pub fn scenario_lock(&self, project_id: &str, scenario: &str) -> Arc<AsyncMutex<()>> {
        let key = (project_id.to_string(), scenario.to_string());
        self.locks.lock().entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    // ======================================================================
    // Project inputs
    // ======================================================================

    fn project_dir(&self, project_id: &str) -> Result<PathBuf, PlanError> {
        if !is_valid_edit_id(project_id) {
            return Err(PlanError::BadInput(format!("invalid project id '{project_id}'")));
        }
        Ok(self.data_dir.join(project_id))
    }

    fn existing_project_dir(&self, project_id: &str) -> Result<PathBuf, PlanError> {
        let dir = self.project_dir(project_id)?;
        if !dir.is_dir() {
            return Err(PlanError::NotFound(format!("project '{project_id}'")));
        }
        Ok(dir)
    }

    /// Read the current stop set snapshot. The first row must be the
    /// depot with demand 0.
    pub fn load_stops(&self, project_id: &str) -> Result<StopSet, PlanError> {
        let path = self.existing_project_dir(project_id)?.join(STOPS_FILE);
        if !path.is_file() {
            return Err(PlanError::BadInput(format!(
                "{STOPS_FILE} not found for project '{project_id}'; add stops first"
            )));
        }
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| PlanError::CorruptArtifact(format!("{}: {e}", path.display())))?;

        let mut stops = Vec::new();
        for record in reader.deserialize::<StopCsvRow>() {
            let row =
                record.map_err(|e| PlanError::CorruptArtifact(format!("{STOPS_FILE}: {e}")))?;
            stops.push(Stop {
                id: row.id,
                name: row.name,
                coordinates: Coordinates { lon: row.lon, lat: row.lat },
                demand: row.demand,
            });
        }
        if stops.is_empty() {
            return Err(PlanError::BadInput("stop set is empty".to_string()));
        }
        if stops[0].demand != 0 {
            return Err(PlanError::BadInput(format!(
                "first stop '{}' must be the depot with demand 0",
                stops[0].id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for stop in &stops {
            if !seen.insert(stop.id.clone()) {
                return Err(PlanError::BadInput(format!("duplicate stop id '{}'", stop.id)));
            }
        }
        Ok(StopSet { stops })
    }

    /// Read the matrix pair snapshot produced by the matrix store.
    pub fn load_matrices(&self, project_id: &str) -> Result<MatrixPair, PlanError> {
        let dir = self.existing_project_dir(project_id)?;
        let time = read_matrix_csv(&dir.join(TIME_MATRIX_FILE))?;
        let distance = read_matrix_csv(&dir.join(DISTANCE_MATRIX_FILE))?;
        if time.len() != distance.len() {
            return Err(PlanError::BadInput(format!(
                "time matrix is {}x{} but distance matrix is {}x{}",
                time.len(),
                time.len(),
                distance.len(),
                distance.len()
            )));
        }
        let size = time.len();
        Ok(MatrixPair { time, distance, size })
    }

    // ======================================================================
    // Optimization output
    // ======================================================================

    /// Persist the ordered plan as the tabular optimization output plus
    /// the one-row summary.
    pub fn write_plan(
        &self,
        project_id: &str,
        plan: &OrderedPlan,
        vehicle_count: u32,
        vehicle_capacity: u32,
    ) -> Result<(), PlanError> {
        let dir = self.project_dir(project_id)?;
        fs::create_dir_all(&dir)?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        for vehicle in &plan.vehicles {
            for stop in &vehicle.stops {
                writer
                    .serialize(PlanCsvRow {
                        vehicle_id: vehicle.vehicle_id,
                        stop_order: stop.stop_order,
                        stop_id: stop.stop_id.clone(),
                        stop_name: stop.stop_name.clone(),
                        location_type: if stop.is_depot { "depot" } else { "waypoint" }.to_string(),
                        load: stop.load,
                        cumulative_load: stop.cumulative_load,
                        est_time_s: stop.est_time_s,
                        est_distance_m: stop.est_distance_m,
                    })
                    .map_err(|e| PlanError::CorruptArtifact(format!("{PLAN_FILE}: {e}")))?;
            }
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PlanError::CorruptArtifact(format!("{PLAN_FILE}: {e}")))?;
        write_atomic(&dir.join(PLAN_FILE), &bytes)?;

        let mut summary = csv::Writer::from_writer(Vec::new());
        summary
            .serialize(PlanSummaryRow {
                total_distance_m: plan.total_distance_m,
                total_time_s: plan.total_time_s,
                total_load: plan.total_load,
                objective: format!("{:?}", plan.meta.objective).to_lowercase(),
                fallback_used: plan.meta.fallback_used,
                vehicle_count,
                vehicle_capacity,
                solve_time_ms: plan.meta.solve_time_ms,
            })
            .map_err(|e| PlanError::CorruptArtifact(format!("{PLAN_SUMMARY_FILE}: {e}")))?;
        let bytes = summary
            .into_inner()
            .map_err(|e| PlanError::CorruptArtifact(format!("{PLAN_SUMMARY_FILE}: {e}")))?;
        write_atomic(&dir.join(PLAN_SUMMARY_FILE), &bytes)?;

        info!(project = project_id, vehicles = plan.vehicles.len(), "plan written");
        Ok(())
    }

    /// Read a scenario's tabular plan: the optimization output for the
    /// baseline, the scenario's own edit plan otherwise.
    pub fn read_scenario_plan(
        &self,
        project_id: &str,
        scenario: &str,
    ) -> Result<Vec<EditPlanRow>, PlanError> {
        if scenario == BASELINE_SCENARIO {
            let path = self.existing_project_dir(project_id)?.join(PLAN_FILE);
            if !path.is_file() {
                return Err(PlanError::NotFound(format!(
                    "no optimization output for project '{project_id}'"
                )));
            }
            let mut reader = csv::Reader::from_path(&path)
                .map_err(|e| PlanError::CorruptArtifact(format!("{PLAN_FILE}: {e}")))?;
            let mut rows = Vec::new();
            for record in reader.deserialize::<PlanCsvRow>() {
                let row =
                    record.map_err(|e| PlanError::CorruptArtifact(format!("{PLAN_FILE}: {e}")))?;
                rows.push(EditPlanRow {
                    vehicle_id: row.vehicle_id,
                    stop_order: row.stop_order,
                    stop_id: row.stop_id,
                });
            }
            return Ok(rows);
        }

        let path = self.scenario_dir(project_id, scenario)?.join(EDIT_PLAN_FILE);
        if !path.is_file() {
            return Err(PlanError::NotFound(format!("edit scenario '{scenario}'")));
        }
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| PlanError::CorruptArtifact(format!("{EDIT_PLAN_FILE}: {e}")))?;
        let mut rows = Vec::new();
        for record in reader.deserialize::<EditPlanRow>() {
            rows.push(
                record.map_err(|e| PlanError::CorruptArtifact(format!("{EDIT_PLAN_FILE}: {e}")))?,
            );
        }
        Ok(rows)
    }

    // ======================================================================
    // Materialized artifacts
    // ======================================================================

    fn artifact_path(&self, project_id: &str, scenario: &str) -> Result<PathBuf, PlanError> {
        if scenario == BASELINE_SCENARIO {
            Ok(self.existing_project_dir(project_id)?.join(BASELINE_ARTIFACT_FILE))
        } else {
            Ok(self.scenario_dir(project_id, scenario)?.join(EDIT_ARTIFACT_FILE))
        }
    }

    /// Read a scenario's cached materialized artifact, if any.
    pub fn read_artifact(
        &self,
        project_id: &str,
        scenario: &str,
    ) -> Result<Option<PlanArtifact>, PlanError> {
        let path = self.artifact_path(project_id, scenario)?;
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let artifact = serde_json::from_slice(&bytes)
            .map_err(|e| PlanError::CorruptArtifact(format!("{}: {e}", path.display())))?;
        Ok(Some(artifact))
    }

    /// Atomically replace a scenario's materialized artifact.
    pub fn write_artifact(&self, artifact: &PlanArtifact) -> Result<(), PlanError> {
        let path = self.artifact_path(&artifact.project_id, &artifact.scenario)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(artifact)
            .map_err(|e| PlanError::CorruptArtifact(format!("serialize artifact: {e}")))?;
        write_atomic(&path, &bytes)?;
        debug!(
            project = artifact.project_id.as_str(),
            scenario = artifact.scenario.as_str(),
            vehicles = artifact.vehicles.len(),
            "artifact written"
        );
        Ok(())
    }

    /// Drop the baseline materialization cache (used when a fresh
    /// optimization supersedes it).
    pub fn clear_baseline_artifact(&self, project_id: &str) -> Result<(), PlanError> {
        let path = self.existing_project_dir(project_id)?.join(BASELINE_ARTIFACT_FILE);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Stop-set mutation hook: strip geometry, cumulatives and totals
    /// from every cached materialization, keeping the tabular order.
    pub fn invalidate_materializations(&self, project_id: &str) -> Result<usize, PlanError> {
        let mut cleared = 0;
        let mut scenarios = vec![BASELINE_SCENARIO.to_string()];
        scenarios.extend(self.list_edits(project_id)?.into_iter().map(|e| e.edit_id));

        for scenario in scenarios {
            if let Some(mut artifact) = self.read_artifact(project_id, &scenario)? {
                for vehicle in &mut artifact.vehicles {
                    vehicle.route_geometry = None;
                    vehicle.geometry_total_time_s = None;
                    vehicle.geometry_total_distance_m = None;
                    for waypoint in &mut vehicle.waypoints {
                        waypoint.cumulative_time_s = 0.0;
                        waypoint.cumulative_distance_m = 0.0;
                        waypoint.arrival_time = None;
                    }
                }
                artifact.statistics = Default::default();
                self.write_artifact(&artifact)?;
                cleared += 1;
            }
        }
        info!(project = project_id, cleared, "materializations invalidated");
        Ok(cleared)
    }

    // ======================================================================
    // Edit scenarios
    // ======================================================================

    fn scenario_dir(&self, project_id: &str, edit_id: &str) -> Result<PathBuf, PlanError> {
        if !is_valid_edit_id(edit_id) {
            return Err(PlanError::BadInput(format!("invalid edit id '{edit_id}'")));
        }
        Ok(self.existing_project_dir(project_id)?.join(EDITS_DIR).join(edit_id))
    }

    pub fn list_edits(&self, project_id: &str) -> Result<Vec<EditScenarioInfo>, PlanError> {
        let edits_dir = self.existing_project_dir(project_id)?.join(EDITS_DIR);
        let mut infos = Vec::new();
        if !edits_dir.is_dir() {
            return Ok(infos);
        }
        let mut entries: Vec<_> =
            fs::read_dir(&edits_dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            if !entry.path().is_dir() {
                continue;
            }
            let edit_id = entry.file_name().to_string_lossy().to_string();
            let rows = self.read_scenario_plan(project_id, &edit_id).unwrap_or_default();
            let vehicles: std::collections::HashSet<u32> =
                rows.iter().map(|r| r.vehicle_id).collect();
            infos.push(EditScenarioInfo {
                edit_id: edit_id.clone(),
                has_materialized: entry.path().join(EDIT_ARTIFACT_FILE).is_file(),
                vehicle_count: vehicles.len(),
                stop_count: rows.len(),
            });
        }
        Ok(infos)
    }

    /// Create a scenario as a deep copy of `source` (baseline when
    /// absent): tabular plan, coordinate overrides, and the cached
    /// materialized artifact.
    pub fn create_edit(
        &self,
        project_id: &str,
        edit_id: &str,
        source: Option<&str>,
    ) -> Result<(), PlanError> {
        if !is_valid_edit_id(edit_id) || edit_id == BASELINE_SCENARIO {
            return Err(PlanError::BadInput(format!("invalid edit id '{edit_id}'")));
        }
        let dir = self.scenario_dir(project_id, edit_id)?;
        if dir.exists() {
            return Err(PlanError::BadInput(format!("edit scenario '{edit_id}' already exists")));
        }

        let source = source.unwrap_or(BASELINE_SCENARIO);
        let rows = self.read_scenario_plan(project_id, source)?;
        let artifact = self.read_artifact(project_id, source)?;

        fs::create_dir_all(&dir)?;
        self.write_edit_rows(project_id, edit_id, &rows)?;

        if source != BASELINE_SCENARIO {
            let overrides = self.read_overrides(project_id, source)?;
            if !overrides.is_empty() {
                self.write_overrides(project_id, edit_id, &overrides)?;
            }
        }

        if let Some(mut artifact) = artifact {
            artifact.scenario = edit_id.to_string();
            self.write_artifact(&artifact)?;
        }

        info!(project = project_id, edit = edit_id, from = source, "edit scenario created");
        Ok(())
    }

    pub fn delete_edit(&self, project_id: &str, edit_id: &str) -> Result<(), PlanError> {
        if edit_id == BASELINE_SCENARIO {
            return Err(PlanError::BadInput("the baseline cannot be deleted".to_string()));
        }
        let dir = self.scenario_dir(project_id, edit_id)?;
        if !dir.is_dir() {
            return Err(PlanError::NotFound(format!("edit scenario '{edit_id}'")));
        }
        fs::remove_dir_all(&dir)?;
        info!(project = project_id, edit = edit_id, "edit scenario deleted");
        Ok(())
    }

    fn require_edit_dir(&self, project_id: &str, edit_id: &str) -> Result<PathBuf, PlanError> {
        let dir = self.scenario_dir(project_id, edit_id)?;
        if !dir.is_dir() {
            return Err(PlanError::NotFound(format!("edit scenario '{edit_id}'")));
        }
        Ok(dir)
    }

    /// Rewrite a scenario's tabular edit plan.
    pub fn write_edit_rows(
        &self,
        project_id: &str,
        edit_id: &str,
        rows: &[EditPlanRow],
    ) -> Result<(), PlanError> {
        let dir = self.scenario_dir(project_id, edit_id)?;
        fs::create_dir_all(&dir)?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| PlanError::CorruptArtifact(format!("{EDIT_PLAN_FILE}: {e}")))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PlanError::CorruptArtifact(format!("{EDIT_PLAN_FILE}: {e}")))?;
        write_atomic(&dir.join(EDIT_PLAN_FILE), &bytes)
    }

    /// Persist a timeline reorder: replace each listed vehicle's non-depot
    /// sequence, keeping the existing depot framing. Provider calls are
    /// not made here.
    pub fn reorder_edit_plan(
        &self,
        project_id: &str,
        edit_id: &str,
        vehicles: &[(u32, Vec<String>)],
    ) -> Result<(), PlanError> {
        self.require_edit_dir(project_id, edit_id)?;
        let rows = self.read_scenario_plan(project_id, edit_id)?;
        let stops = self.load_stops(project_id)?;
        let depot_id = stops.depot().id.clone();

        let mut by_vehicle: std::collections::BTreeMap<u32, Vec<EditPlanRow>> =
            std::collections::BTreeMap::new();
        for row in rows {
            by_vehicle.entry(row.vehicle_id).or_default().push(row);
        }

        for (vehicle_id, stop_ids) in vehicles {
            let existing = by_vehicle.get(vehicle_id);
            let ends_at_depot = existing
                .and_then(|rows| rows.last())
                .map(|r| r.stop_id == depot_id)
                .unwrap_or(true);

            for stop_id in stop_ids {
                if stops.get(stop_id).is_none() {
                    return Err(PlanError::StaleReference(format!(
                        "stop '{stop_id}' is not in the stop set"
                    )));
                }
            }

            let mut rebuilt = Vec::with_capacity(stop_ids.len() + 2);
            let mut order = 1u32;
            rebuilt.push(EditPlanRow {
                vehicle_id: *vehicle_id,
                stop_order: order,
                stop_id: depot_id.clone(),
            });
            for stop_id in stop_ids {
                order += 1;
                rebuilt.push(EditPlanRow {
                    vehicle_id: *vehicle_id,
                    stop_order: order,
                    stop_id: stop_id.clone(),
                });
            }
            if ends_at_depot {
                order += 1;
                rebuilt.push(EditPlanRow {
                    vehicle_id: *vehicle_id,
                    stop_order: order,
                    stop_id: depot_id.clone(),
                });
            }
            by_vehicle.insert(*vehicle_id, rebuilt);
        }

        // Vehicles emptied of non-depot stops drop out of the plan.
        let rows: Vec<EditPlanRow> = by_vehicle
            .into_values()
            .filter(|rows| rows.iter().any(|r| r.stop_id != depot_id))
            .flatten()
            .collect();
        self.write_edit_rows(project_id, edit_id, &rows)
    }

    // ======================================================================
    // Per-scenario stop overrides
    // ======================================================================

    pub fn read_overrides(
        &self,
        project_id: &str,
        edit_id: &str,
    ) -> Result<Vec<StopOverride>, PlanError> {
        let path = self.scenario_dir(project_id, edit_id)?.join(EDIT_OVERRIDES_FILE);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| PlanError::CorruptArtifact(format!("{EDIT_OVERRIDES_FILE}: {e}")))?;
        let mut overrides = Vec::new();
        for record in reader.deserialize::<StopOverride>() {
            overrides.push(
                record
                    .map_err(|e| PlanError::CorruptArtifact(format!("{EDIT_OVERRIDES_FILE}: {e}")))?,
            );
        }
        Ok(overrides)
    }

    fn write_overrides(
        &self,
        project_id: &str,
        edit_id: &str,
        overrides: &[StopOverride],
    ) -> Result<(), PlanError> {
        let dir = self.scenario_dir(project_id, edit_id)?;
        fs::create_dir_all(&dir)?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in overrides {
            writer
                .serialize(row)
                .map_err(|e| PlanError::CorruptArtifact(format!("{EDIT_OVERRIDES_FILE}: {e}")))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PlanError::CorruptArtifact(format!("{EDIT_OVERRIDES_FILE}: {e}")))?;
        write_atomic(&dir.join(EDIT_OVERRIDES_FILE), &bytes)
    }

    /// Move a stop within one scenario. The baseline stop set is not
    /// touched; re-materialization happens on the next delta run through
    /// the fingerprint change.
    pub fn update_scenario_stop(
        &self,
        project_id: &str,
        edit_id: &str,
        stop_id: &str,
        lon: f64,
        lat: f64,
    ) -> Result<(), PlanError> {
        self.require_edit_dir(project_id, edit_id)?;
        let stops = self.load_stops(project_id)?;
        if stops.get(stop_id).is_none() {
            return Err(PlanError::StaleReference(format!(
                "stop '{stop_id}' is not in the stop set"
            )));
        }

        let mut overrides = self.read_overrides(project_id, edit_id)?;
        match overrides.iter_mut().find(|o| o.stop_id == stop_id) {
            Some(existing) => {
                existing.lon = lon;
                existing.lat = lat;
            }
            None => overrides.push(StopOverride { stop_id: stop_id.to_string(), lon, lat }),
        }
        self.write_overrides(project_id, edit_id, &overrides)
    }

    /// The stop set as one scenario sees it: project stops with the
    /// scenario's coordinate overrides applied.
    pub fn scenario_stops(&self, project_id: &str, scenario: &str) -> Result<StopSet, PlanError> {
        let mut stops = self.load_stops(project_id)?;
        if scenario != BASELINE_SCENARIO {
            for o in self.read_overrides(project_id, scenario)? {
                if let Some(stop) = stops.stops.iter_mut().find(|s| s.id == o.stop_id) {
                    stop.coordinates = Coordinates { lon: o.lon, lat: o.lat };
                }
            }
        }
        Ok(stops)
    }
}

fn read_matrix_csv(path: &Path) -> Result<Vec<Vec<f64>>, PlanError> {
    if !path.is_file() {
        return Err(PlanError::BadInput(format!(
            "{} not found; create the matrix first",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("matrix file")
        )));
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| PlanError::CorruptArtifact(format!("{}: {e}", path.display())))?;

    let mut matrix = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| PlanError::CorruptArtifact(format!("{}: {e}", path.display())))?;
        // First column is the row label.
        let row: Result<Vec<f64>, _> = record.iter().skip(1).map(str::parse::<f64>).collect();
        let row = row.map_err(|e| {
            PlanError::CorruptArtifact(format!("{}: bad value: {e}", path.display()))
        })?;
        matrix.push(row);
    }
    let n = matrix.len();
    for (i, row) in matrix.iter().enumerate() {
        if row.len() != n {
            return Err(PlanError::BadInput(format!(
                "{} row {i} has {} columns, expected {n}",
                path.display(),
                row.len()
            )));
        }
    }
    Ok(matrix)
}

/// Write via a sibling temp file and rename, so readers never observe a
/// half-written artifact.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PlanError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ArtifactStatistics, LineString, MaterializeParams, MaterializeStatus, Objective,
        OptimizeMeta, PlannedStop, PlannedVehicle, RouteMode, SearchOption, VehicleClass,
        VehicleRoute, Waypoint,
    };
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn seed_project(dir: &TempDir, project: &str) {
        let p = dir.path().join(project);
        fs::create_dir_all(&p).unwrap();
        fs::write(
            p.join("stops.csv"),
            "id,name,lon,lat,demand\n\
             depot,Depot,127.0,37.5,0\n\
             a,Stop A,127.1,37.5,3\n\
             b,Stop B,127.2,37.5,4\n",
        )
        .unwrap();
        fs::write(
            p.join("time_matrix.csv"),
            "id,depot,a,b\n\
             depot,0,600,1200\n\
             a,600,0,600\n\
             b,1200,600,0\n",
        )
        .unwrap();
        fs::write(
            p.join("distance_matrix.csv"),
            "id,depot,a,b\n\
             depot,0,8000,16000\n\
             a,8000,0,8000\n\
             b,16000,8000,0\n",
        )
        .unwrap();
    }

    fn store(dir: &TempDir) -> PlanStore {
        PlanStore::new(dir.path())
    }

    fn sample_plan() -> OrderedPlan {
        let depot = |order| PlannedStop {
            stop_id: "depot".into(),
            stop_name: "Depot".into(),
            stop_order: order,
            is_depot: true,
            load: 0,
            cumulative_load: if order == 1 { 0 } else { 3 },
            est_time_s: if order == 1 { 0.0 } else { 1200.0 },
            est_distance_m: if order == 1 { 0.0 } else { 16000.0 },
        };
        OrderedPlan {
            route_mode: RouteMode::ClosedTour,
            vehicles: vec![PlannedVehicle {
                vehicle_id: 1,
                stops: vec![
                    depot(1),
                    PlannedStop {
                        stop_id: "a".into(),
                        stop_name: "Stop A".into(),
                        stop_order: 2,
                        is_depot: false,
                        load: 3,
                        cumulative_load: 3,
                        est_time_s: 600.0,
                        est_distance_m: 8000.0,
                    },
                    depot(3),
                ],
                route_load: 3,
                route_time_s: 1200.0,
                route_distance_m: 16000.0,
            }],
            total_distance_m: 16000.0,
            total_time_s: 1200.0,
            total_load: 3,
            meta: OptimizeMeta {
                objective: Objective::Distance,
                fallback_used: false,
                solve_time_ms: 42,
                solver_log: vec![],
            },
        }
    }

    fn sample_artifact(project: &str, scenario: &str) -> PlanArtifact {
        PlanArtifact {
            project_id: project.to_string(),
            scenario: scenario.to_string(),
            snapshot: Uuid::nil(),
            params: MaterializeParams {
                search_option: SearchOption::Recommended,
                vehicle_class: VehicleClass::LargeVan,
                depart_at: NaiveDate::from_ymd_opt(2026, 8, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
                via_dwell_seconds: 60,
            },
            generated_at: Utc::now(),
            vehicles: vec![VehicleRoute {
                vehicle_id: 1,
                status: MaterializeStatus::Ok,
                error: None,
                waypoints: vec![Waypoint {
                    stop_id: "depot".into(),
                    name: "Depot".into(),
                    coordinates: Coordinates { lon: 127.0, lat: 37.5 },
                    demand: 0,
                    cumulative_time_s: 0.0,
                    cumulative_distance_m: 0.0,
                    arrival_time: None,
                }],
                route_geometry: Some(LineString::new(vec![[127.0, 37.5], [127.1, 37.5]])),
                geometry_total_time_s: Some(600.0),
                geometry_total_distance_m: Some(8000.0),
                route_load: 3,
            }],
            statistics: ArtifactStatistics::default(),
        }
    }

    #[test]
    fn loads_stops_and_matrices() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);

        let stops = store.load_stops("p1").unwrap();
        assert_eq!(stops.len(), 3);
        assert_eq!(stops.depot().id, "depot");
        assert_eq!(stops.total_demand(), 7);

        let matrices = store.load_matrices("p1").unwrap();
        assert_eq!(matrices.size, 3);
        assert!(matrices.validate(3).is_ok());
        assert_eq!(matrices.time_s(0, 1), 600.0);
        assert_eq!(matrices.distance_m(0, 2), 16000.0);
    }

    #[test]
    fn missing_matrix_is_bad_input() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("p1");
        fs::create_dir_all(&p).unwrap();
        fs::write(p.join("stops.csv"), "id,name,lon,lat,demand\ndepot,D,127.0,37.5,0\n").unwrap();
        let store = store(&dir);
        assert!(matches!(store.load_matrices("p1"), Err(PlanError::BadInput(_))));
    }

    #[test]
    fn unknown_project_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(matches!(store.load_stops("nope"), Err(PlanError::NotFound(_))));
    }

    #[test]
    fn depot_with_demand_is_rejected() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("p1");
        fs::create_dir_all(&p).unwrap();
        fs::write(p.join("stops.csv"), "id,name,lon,lat,demand\ndepot,D,127.0,37.5,5\n").unwrap();
        let store = store(&dir);
        assert!(matches!(store.load_stops("p1"), Err(PlanError::BadInput(_))));
    }

    #[test]
    fn plan_round_trips_through_csv() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);

        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();
        let rows = store.read_scenario_plan("p1", BASELINE_SCENARIO).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].stop_id, "depot");
        assert_eq!(rows[1].stop_id, "a");
        assert_eq!(rows[1].stop_order, 2);
        assert_eq!(rows[2].stop_id, "depot");
    }

    #[test]
    fn artifact_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);

        assert!(store.read_artifact("p1", BASELINE_SCENARIO).unwrap().is_none());
        store.write_artifact(&sample_artifact("p1", BASELINE_SCENARIO)).unwrap();
        let back = store.read_artifact("p1", BASELINE_SCENARIO).unwrap().unwrap();
        assert_eq!(back.vehicles.len(), 1);
        // No leftover temp file from the atomic write.
        assert!(!dir.path().join("p1").join("baseline.tmp").exists());
    }

    #[test]
    fn corrupt_artifact_is_fatal() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        fs::write(dir.path().join("p1").join("baseline.json"), b"{not json").unwrap();
        let store = store(&dir);
        assert!(matches!(
            store.read_artifact("p1", BASELINE_SCENARIO),
            Err(PlanError::CorruptArtifact(_))
        ));
    }

    #[test]
    fn create_edit_copies_baseline() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);
        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();
        store.write_artifact(&sample_artifact("p1", BASELINE_SCENARIO)).unwrap();

        store.create_edit("p1", "e1", None).unwrap();

        let rows = store.read_scenario_plan("p1", "e1").unwrap();
        assert_eq!(rows.len(), 3);
        let artifact = store.read_artifact("p1", "e1").unwrap().unwrap();
        assert_eq!(artifact.scenario, "e1");

        let edits = store.list_edits("p1").unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].edit_id, "e1");
        assert!(edits[0].has_materialized);
    }

    #[test]
    fn create_edit_from_another_edit() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);
        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();
        store.create_edit("p1", "e1", None).unwrap();
        store.update_scenario_stop("p1", "e1", "a", 127.15, 37.52).unwrap();

        store.create_edit("p1", "e2", Some("e1")).unwrap();
        let overrides = store.read_overrides("p1", "e2").unwrap();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].stop_id, "a");
        assert_eq!(overrides[0].lon, 127.15);
    }

    #[test]
    fn duplicate_or_invalid_edit_ids_rejected() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);
        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();

        store.create_edit("p1", "e1", None).unwrap();
        assert!(matches!(store.create_edit("p1", "e1", None), Err(PlanError::BadInput(_))));
        assert!(matches!(store.create_edit("p1", "has space", None), Err(PlanError::BadInput(_))));
        assert!(matches!(store.create_edit("p1", "baseline", None), Err(PlanError::BadInput(_))));
    }

    #[test]
    fn delete_edit_removes_everything_but_not_baseline() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);
        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();
        store.create_edit("p1", "e1", None).unwrap();

        store.delete_edit("p1", "e1").unwrap();
        assert!(store.list_edits("p1").unwrap().is_empty());
        assert!(matches!(store.delete_edit("p1", "e1"), Err(PlanError::NotFound(_))));
        assert!(matches!(store.delete_edit("p1", "baseline"), Err(PlanError::BadInput(_))));
    }

    #[test]
    fn scenario_stops_apply_overrides() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);
        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();
        store.create_edit("p1", "e1", None).unwrap();
        store.update_scenario_stop("p1", "e1", "a", 127.19, 37.51).unwrap();

        let baseline = store.scenario_stops("p1", BASELINE_SCENARIO).unwrap();
        assert_eq!(baseline.get("a").unwrap().coordinates.lon, 127.1);

        let edited = store.scenario_stops("p1", "e1").unwrap();
        assert_eq!(edited.get("a").unwrap().coordinates.lon, 127.19);
        assert_eq!(edited.get("a").unwrap().coordinates.lat, 37.51);
    }

    #[test]
    fn moving_unknown_stop_is_stale_reference() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);
        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();
        store.create_edit("p1", "e1", None).unwrap();
        assert!(matches!(
            store.update_scenario_stop("p1", "e1", "ghost", 127.0, 37.0),
            Err(PlanError::StaleReference(_))
        ));
    }

    #[test]
    fn invalidation_clears_geometry_keeps_order() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);
        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();
        store.write_artifact(&sample_artifact("p1", BASELINE_SCENARIO)).unwrap();
        store.create_edit("p1", "e1", None).unwrap();

        let cleared = store.invalidate_materializations("p1").unwrap();
        assert_eq!(cleared, 2);

        for scenario in ["baseline", "e1"] {
            let artifact = store.read_artifact("p1", scenario).unwrap().unwrap();
            let vehicle = &artifact.vehicles[0];
            assert!(vehicle.route_geometry.is_none());
            assert!(vehicle.geometry_total_time_s.is_none());
            assert_eq!(vehicle.waypoints.len(), 1);
            assert_eq!(vehicle.waypoints[0].cumulative_time_s, 0.0);
        }
    }

    #[test]
    fn reorder_rewrites_vehicle_rows() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);
        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();
        store.create_edit("p1", "e1", None).unwrap();

        store
            .reorder_edit_plan("p1", "e1", &[(1, vec!["b".to_string(), "a".to_string()])])
            .unwrap();
        let rows = store.read_scenario_plan("p1", "e1").unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.stop_id.as_str()).collect();
        assert_eq!(ids, vec!["depot", "b", "a", "depot"]);
        let orders: Vec<u32> = rows.iter().map(|r| r.stop_order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4]);
    }

    #[test]
    fn reorder_with_unknown_stop_is_stale() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);
        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();
        store.create_edit("p1", "e1", None).unwrap();
        assert!(matches!(
            store.reorder_edit_plan("p1", "e1", &[(1, vec!["ghost".to_string()])]),
            Err(PlanError::StaleReference(_))
        ));
    }

    #[test]
    fn reorder_emptied_vehicle_drops_out() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let store = store(&dir);
        store.write_plan("p1", &sample_plan(), 1, 10).unwrap();
        store.create_edit("p1", "e1", None).unwrap();

        store.reorder_edit_plan("p1", "e1", &[(1, vec![])]).unwrap();
        let rows = store.read_scenario_plan("p1", "e1").unwrap();
        assert!(rows.is_empty());
    }
}
