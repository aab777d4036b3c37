//! Edit-delta engine.
//!
//! Re-materializes an edit scenario with the minimum number of provider
//! calls: per-vehicle fingerprints (ordered stop id + coordinates tuple
//! plus materialization parameters) decide what can be reused from the
//! cached artifact and what must be fetched again. When nothing changed,
//! the provider is not called at all and the cached artifact is returned
//! untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PlanError;
use crate::services::cancellation::CANCELLATION;
use crate::services::materializer::{Materializer, VehicleSpec};
use crate::store::PlanStore;
use crate::types::{
    snapshot_id, ArtifactStatistics, DeltaStats, MaterializeParams, PlanArtifact, Stop, StopSet,
    VehicleFingerprint, VehicleRoute,
};

pub struct EditDeltaEngine {
    store: Arc<PlanStore>,
    materializer: Arc<Materializer>,
}

impl EditDeltaEngine {
    pub fn new(store: Arc<PlanStore>, materializer: Arc<Materializer>) -> Self {
        Self { store, materializer }
    }

    /// Reload one edit scenario. Returns the written artifact and the run
    /// statistics; failed vehicles are reported in the stats and the
    /// caller surfaces `PartialMaterialization` when any are present.
    pub async fn reload(
        &self,
        project_id: &str,
        edit_id: &str,
        params: MaterializeParams,
        job_id: Uuid,
    ) -> Result<(PlanArtifact, DeltaStats), PlanError> {
        // Delta runs on the same scenario are linearized; the second
        // caller observes the first one's artifact.
        let lock = self.store.scenario_lock(project_id, edit_id);
        let _guard = lock.lock().await;

        let rows = self.store.read_scenario_plan(project_id, edit_id)?;
        let stops = self.store.scenario_stops(project_id, edit_id)?;
        let desired = desired_vehicles(&rows, &stops)?;
        let cached = self.store.read_artifact(project_id, edit_id)?;

        let mut stats = DeltaStats::default();
        let mut reused: Vec<VehicleRoute> = Vec::new();
        let mut queue: Vec<VehicleSpec> = Vec::new();

        for (vehicle_id, stops) in &desired {
            let wanted = fingerprint_of_stops(stops, &params);
            let cached_route = cached.as_ref().and_then(|a| a.vehicle(*vehicle_id));
            let matches = cached_route
                .filter(|route| route.is_ok())
                .map(|route| {
                    let cached_params = &cached.as_ref().expect("route implies artifact").params;
                    fingerprint_of_route(route, cached_params) == wanted
                })
                .unwrap_or(false);

            if matches {
                debug!(vehicle = *vehicle_id, "fingerprint unchanged, reusing cached route");
                reused.push(cached_route.expect("matched route exists").clone());
                stats.reused += 1;
            } else {
                queue.push(VehicleSpec { vehicle_id: *vehicle_id, stops: stops.clone() });
            }
        }

        // Vehicles cached but no longer in the desired plan are dropped.
        if let Some(cached) = &cached {
            for route in &cached.vehicles {
                if !desired.contains_key(&route.vehicle_id) {
                    stats.deleted += 1;
                }
            }
        }

        // Unchanged scenario: do not rewrite the artifact, so repeated
        // reloads stay byte-identical on disk.
        if queue.is_empty() && stats.deleted == 0 {
            if let Some(artifact) = &cached {
                info!(project = project_id, edit = edit_id, reused = stats.reused, "nothing to do");
                return Ok((artifact.clone(), stats));
            }
        }

        // Cooperative cancellation boundary: nothing dispatched yet.
        if CANCELLATION.is_cancelled(&job_id) {
            return Err(PlanError::Cancelled);
        }

        let queued_ids: Vec<u32> = queue.iter().map(|s| s.vehicle_id).collect();
        debug!(project = project_id, edit = edit_id, ?queued_ids, "materializing changed vehicles");

        let fresh = self.materializer.materialize(queue, &params).await;
        for route in &fresh {
            if route.is_ok() {
                stats.regenerated += 1;
            } else {
                stats.failed += 1;
                stats.failed_vehicle_ids.push(route.vehicle_id);
            }
        }

        let mut vehicles = reused;
        vehicles.extend(fresh);
        vehicles.sort_by_key(|r| r.vehicle_id);

        let snapshot = match cached.as_ref() {
            Some(artifact) => artifact.snapshot,
            None => self.current_snapshot(project_id, &stops),
        };

        let mut artifact = PlanArtifact {
            project_id: project_id.to_string(),
            scenario: edit_id.to_string(),
            snapshot,
            params,
            generated_at: Utc::now(),
            vehicles,
            statistics: ArtifactStatistics::default(),
        };
        artifact.recompute_statistics();

        // Written only after every queued call settled.
        self.store.write_artifact(&artifact)?;

        info!(
            project = project_id,
            edit = edit_id,
            regenerated = stats.regenerated,
            reused = stats.reused,
            deleted = stats.deleted,
            failed = stats.failed,
            "edit scenario reloaded"
        );
        Ok((artifact, stats))
    }

    fn current_snapshot(&self, project_id: &str, stops: &StopSet) -> Uuid {
        match self.store.load_matrices(project_id) {
            Ok(matrices) => snapshot_id(stops, &matrices),
            Err(_) => Uuid::nil(),
        }
    }
}

/// Build each vehicle's desired ordered stop list from the tabular edit
/// plan joined with the (override-adjusted) stop set. Vehicles without a
/// non-depot stop are omitted entirely.
pub(crate) fn desired_vehicles(
    rows: &[crate::types::EditPlanRow],
    stops: &StopSet,
) -> Result<BTreeMap<u32, Vec<Stop>>, PlanError> {
    let depot_id = stops.depot().id.clone();
    let mut grouped: BTreeMap<u32, Vec<&crate::types::EditPlanRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.vehicle_id).or_default().push(row);
    }

    let mut desired = BTreeMap::new();
    for (vehicle_id, mut rows) in grouped {
        rows.sort_by_key(|r| r.stop_order);
        let mut resolved = Vec::with_capacity(rows.len());
        for row in rows {
            let stop = stops.get(&row.stop_id).ok_or_else(|| {
                PlanError::StaleReference(format!(
                    "edit plan references unknown stop '{}'",
                    row.stop_id
                ))
            })?;
            resolved.push(stop.clone());
        }
        if resolved.iter().any(|s| s.id != depot_id) {
            desired.insert(vehicle_id, resolved);
        }
    }
    Ok(desired)
}

fn fingerprint_of_stops(stops: &[Stop], params: &MaterializeParams) -> VehicleFingerprint {
    VehicleFingerprint::new(
        stops.iter().map(|s| (s.id.clone(), s.coordinates.lon, s.coordinates.lat)),
        params.clone(),
    )
}

fn fingerprint_of_route(route: &VehicleRoute, params: &MaterializeParams) -> VehicleFingerprint {
    VehicleFingerprint::new(
        route.waypoints.iter().map(|w| (w.stop_id.clone(), w.coordinates.lon, w.coordinates.lat)),
        params.clone(),
    )
}
