//! Plan lifecycle service: optimize and baseline materialization.

use std::sync::Arc;

use chrono::{NaiveDateTime, Timelike, Utc};
use tracing::info;
use uuid::Uuid;

use crate::defaults::DEFAULT_VIA_DWELL_SECONDS;
use crate::error::PlanError;
use crate::services::delta::desired_vehicles;
use crate::services::materializer::{Materializer, VehicleSpec};
use crate::services::optimizer::{estimate_vehicle_count, OptimizeProblem, Optimizer};
use crate::store::PlanStore;
use crate::types::{
    snapshot_id, ArtifactStatistics, MaterializeParams, MaterializeParamsRequest,
    OptimizeRequest, OptimizeResponse, PlanArtifact, SearchOption, VehicleClass,
    search_option_from_code, vehicle_class_from_code, BASELINE_SCENARIO,
};

/// Optimize and materialize against the plan store.
pub struct PlanService {
    store: Arc<PlanStore>,
    materializer: Arc<Materializer>,
}

impl PlanService {
    pub fn new(store: Arc<PlanStore>, materializer: Arc<Materializer>) -> Self {
        Self { store, materializer }
    }

    /// Run the optimizer over the project's current stop and matrix
    /// snapshot, persist the tabular plan, and drop stale materialization
    /// caches.
    pub async fn optimize(
        &self,
        request: &OptimizeRequest,
        job_id: Uuid,
    ) -> Result<OptimizeResponse, PlanError> {
        let project_id = &request.project_id;
        let stops = self.store.load_stops(project_id)?;
        let matrices = self.store.load_matrices(project_id)?;
        matrices.validate(stops.len())?;

        let snapshot = snapshot_id(&stops, &matrices);
        if let Some(expected) = request.stops_snapshot {
            if expected != snapshot {
                return Err(PlanError::StaleMatrix(format!(
                    "caller expects snapshot {expected}, current is {snapshot}"
                )));
            }
        }

        let vehicle_count = request
            .vehicle_count
            .unwrap_or_else(|| estimate_vehicle_count(stops.total_demand(), request.vehicle_capacity));

        let problem = OptimizeProblem {
            stops,
            matrices,
            vehicle_count,
            capacity: request.vehicle_capacity,
            route_mode: request.route_mode,
            objective: request.objective.clone(),
            time_budget: std::time::Duration::from_secs(request.time_budget_seconds.max(1) as u64),
        };

        let plan = Optimizer::solve(problem, job_id).await?;

        let lock = self.store.scenario_lock(project_id, BASELINE_SCENARIO);
        let _guard = lock.lock().await;
        self.store.write_plan(project_id, &plan, vehicle_count, request.vehicle_capacity)?;
        // A fresh plan supersedes every cached materialization.
        self.store.clear_baseline_artifact(project_id)?;
        self.store.invalidate_materializations(project_id)?;

        info!(
            project = project_id.as_str(),
            vehicles = plan.vehicles.len(),
            fallback = plan.meta.fallback_used,
            "optimization stored"
        );
        Ok(OptimizeResponse { plan, snapshot })
    }

    /// Materialize the baseline plan: fetch geometry for every used
    /// vehicle and persist the artifact. Failed vehicle ids are returned
    /// alongside; the caller surfaces `PartialMaterialization`.
    pub async fn materialize_baseline(
        &self,
        project_id: &str,
        params: MaterializeParams,
    ) -> Result<(PlanArtifact, Vec<u32>), PlanError> {
        let lock = self.store.scenario_lock(project_id, BASELINE_SCENARIO);
        let _guard = lock.lock().await;

        let rows = self.store.read_scenario_plan(project_id, BASELINE_SCENARIO)?;
        let stops = self.store.load_stops(project_id)?;
        let matrices = self.store.load_matrices(project_id)?;
        let snapshot = snapshot_id(&stops, &matrices);

        let desired = desired_vehicles(&rows, &stops)?;
        let specs: Vec<VehicleSpec> = desired
            .into_iter()
            .map(|(vehicle_id, stops)| VehicleSpec { vehicle_id, stops })
            .collect();

        let vehicles = self.materializer.materialize(specs, &params).await;
        let failed: Vec<u32> =
            vehicles.iter().filter(|v| !v.is_ok()).map(|v| v.vehicle_id).collect();

        let mut artifact = PlanArtifact {
            project_id: project_id.to_string(),
            scenario: BASELINE_SCENARIO.to_string(),
            snapshot,
            params,
            generated_at: Utc::now(),
            vehicles,
            statistics: ArtifactStatistics::default(),
        };
        artifact.recompute_statistics();
        self.store.write_artifact(&artifact)?;

        info!(
            project = project_id,
            vehicles = artifact.vehicles.len(),
            failed = failed.len(),
            "baseline materialized"
        );
        Ok((artifact, failed))
    }
}

/// Resolve wire-level materialization parameters: integer codes to enums,
/// `YYYYMMDDHHMM` to an instant, defaults where omitted. The default
/// departure is the current minute.
pub fn resolve_params(request: &MaterializeParamsRequest) -> Result<MaterializeParams, PlanError> {
    let search_option = match request.search_option {
        Some(code) => search_option_from_code(code)?,
        None => SearchOption::default(),
    };
    let vehicle_class = match request.vehicle_class {
        Some(code) => vehicle_class_from_code(code)?,
        None => VehicleClass::default(),
    };
    let depart_at = match &request.depart_at {
        Some(raw) => NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M").map_err(|e| {
            PlanError::BadInput(format!("depart_at '{raw}' is not YYYYMMDDHHMM: {e}"))
        })?,
        None => current_minute(),
    };
    Ok(MaterializeParams {
        search_option,
        vehicle_class,
        depart_at,
        via_dwell_seconds: request.via_dwell_seconds.unwrap_or(DEFAULT_VIA_DWELL_SECONDS),
    })
}

fn current_minute() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::directions::{DirectionsProvider, MockDirectionsProvider};
    use crate::types::{ObjectiveSpec, RouteMode};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn seed_project(dir: &TempDir, project: &str) {
        let p = dir.path().join(project);
        fs::create_dir_all(&p).unwrap();
        fs::write(
            p.join("stops.csv"),
            "id,name,lon,lat,demand\n\
             depot,Depot,127.00,37.50,0\n\
             a,Stop A,127.10,37.50,3\n",
        )
        .unwrap();
        fs::write(p.join("time_matrix.csv"), "id,depot,a\ndepot,0,600\na,600,0\n").unwrap();
        fs::write(p.join("distance_matrix.csv"), "id,depot,a\ndepot,0,8000\na,8000,0\n").unwrap();
    }

    fn service(dir: &TempDir) -> (Arc<PlanStore>, PlanService) {
        let store = Arc::new(PlanStore::new(dir.path()));
        let materializer = Arc::new(Materializer::new(
            Arc::new(MockDirectionsProvider::new()) as Arc<dyn DirectionsProvider>,
            4,
            Duration::from_secs(10),
        ));
        let service = PlanService::new(Arc::clone(&store), materializer);
        (store, service)
    }

    fn optimize_request(project: &str) -> OptimizeRequest {
        OptimizeRequest {
            project_id: project.to_string(),
            vehicle_count: Some(1),
            vehicle_capacity: 10,
            route_mode: RouteMode::ClosedTour,
            objective: ObjectiveSpec::distance(),
            time_budget_seconds: 5,
            stops_snapshot: None,
        }
    }

    #[tokio::test]
    async fn optimize_then_materialize_end_to_end() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let (store, service) = service(&dir);

        let response = service.optimize(&optimize_request("p1"), Uuid::new_v4()).await.unwrap();
        assert_eq!(response.plan.vehicles.len(), 1);
        assert_eq!(response.plan.vehicles[0].route_load, 3);

        let params = resolve_params(&MaterializeParamsRequest {
            depart_at: Some("202608010900".to_string()),
            ..Default::default()
        })
        .unwrap();
        let (artifact, failed) = service.materialize_baseline("p1", params).await.unwrap();
        assert!(failed.is_empty());
        assert_eq!(artifact.vehicles.len(), 1);

        let route = &artifact.vehicles[0];
        assert_eq!(route.waypoints.first().unwrap().cumulative_time_s, 0.0);
        assert!(route.waypoints.last().unwrap().cumulative_time_s > 0.0);
        assert_eq!(store.read_artifact("p1", BASELINE_SCENARIO).unwrap().unwrap().vehicles.len(), 1);
    }

    #[tokio::test]
    async fn optimize_rejects_stale_snapshot() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let (_, service) = service(&dir);

        let mut request = optimize_request("p1");
        request.stops_snapshot = Some(Uuid::new_v4());
        assert!(matches!(
            service.optimize(&request, Uuid::new_v4()).await,
            Err(PlanError::StaleMatrix(_))
        ));
    }

    #[tokio::test]
    async fn optimize_clears_previous_baseline_artifact() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let (store, service) = service(&dir);

        service.optimize(&optimize_request("p1"), Uuid::new_v4()).await.unwrap();
        let params = resolve_params(&MaterializeParamsRequest::default()).unwrap();
        service.materialize_baseline("p1", params).await.unwrap();
        assert!(store.read_artifact("p1", BASELINE_SCENARIO).unwrap().is_some());

        service.optimize(&optimize_request("p1"), Uuid::new_v4()).await.unwrap();
        assert!(store.read_artifact("p1", BASELINE_SCENARIO).unwrap().is_none());
    }

    #[tokio::test]
    async fn materialize_without_plan_is_not_found() {
        let dir = TempDir::new().unwrap();
        seed_project(&dir, "p1");
        let (_, service) = service(&dir);
        let params = resolve_params(&MaterializeParamsRequest::default()).unwrap();
        assert!(matches!(
            service.materialize_baseline("p1", params).await,
            Err(PlanError::NotFound(_))
        ));
    }

    #[test]
    fn resolve_params_defaults() {
        let params = resolve_params(&MaterializeParamsRequest::default()).unwrap();
        assert_eq!(params.search_option, SearchOption::Recommended);
        assert_eq!(params.vehicle_class, VehicleClass::LargeVan);
        assert_eq!(params.via_dwell_seconds, 60);
        assert_eq!(params.depart_at.second(), 0);
    }

    #[test]
    fn resolve_params_parses_codes_and_time() {
        let params = resolve_params(&MaterializeParamsRequest {
            search_option: Some(17),
            vehicle_class: Some(4),
            depart_at: Some("202608011230".to_string()),
            via_dwell_seconds: Some(120),
        })
        .unwrap();
        assert_eq!(params.search_option, SearchOption::Truck);
        assert_eq!(params.vehicle_class, VehicleClass::LargeTruck);
        assert_eq!(params.via_dwell_seconds, 120);
        assert_eq!(params.depart_at.hour(), 12);
        assert_eq!(params.depart_at.minute(), 30);
    }

    #[test]
    fn resolve_params_rejects_bad_values() {
        assert!(resolve_params(&MaterializeParamsRequest {
            search_option: Some(9),
            ..Default::default()
        })
        .is_err());
        assert!(resolve_params(&MaterializeParamsRequest {
            depart_at: Some("tomorrow".to_string()),
            ..Default::default()
        })
        .is_err());
    }
}
