//! Route materializer.
//!
//! Turns an ordered plan into per-vehicle road geometry with cumulative
//! time and distance at every waypoint. Vehicles are fetched concurrently
//! behind the shared request limiter; one vehicle's failure never blocks
//! the others.
//!
//! Cumulatives are strictly provider-grounded: the walk accumulates real
//! segment values vertex by vertex and binds each waypoint to the first
//! matching vertex with a monotone scan. A via that cannot be located on
//! the geometry inherits the nearest later vertex's cumulatives; totals
//! are never spread evenly across via counts.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::services::directions::{
    DirectionsProvider, DirectionsRequest, DirectionsRoute, ProviderError, RouteFeature,
    RoutePoint,
};
use crate::services::geo::planar_distance_sq;
use crate::types::{
    LineString, MaterializeParams, MaterializeStatus, Stop, VehicleRoute, Waypoint,
};

/// Position-match tolerance in degrees (~5 m at mid latitudes).
const COORD_MATCH_EPS: f64 = 5e-5;

/// One vehicle to materialize: ordered stops, first = start, last = end.
#[derive(Debug, Clone)]
pub struct VehicleSpec {
    pub vehicle_id: u32,
    pub stops: Vec<Stop>,
}

impl VehicleSpec {
    fn route_load(&self) -> u32 {
        self.stops.iter().map(|s| s.demand).sum()
    }
}

/// Build vehicle specs from an ordered plan joined with the stop set.
/// Vehicles without a non-depot stop are excluded.
pub fn specs_from_plan(
    plan: &crate::types::OrderedPlan,
    stops: &crate::types::StopSet,
) -> Result<Vec<VehicleSpec>, crate::error::PlanError> {
    let mut specs = Vec::new();
    for vehicle in &plan.vehicles {
        if vehicle.stop_ids().is_empty() {
            continue;
        }
        let mut resolved = Vec::with_capacity(vehicle.stops.len());
        for planned in &vehicle.stops {
            let stop = stops.get(&planned.stop_id).ok_or_else(|| {
                crate::error::PlanError::StaleReference(format!(
                    "stop '{}' is no longer in the stop set",
                    planned.stop_id
                ))
            })?;
            resolved.push(stop.clone());
        }
        specs.push(VehicleSpec { vehicle_id: vehicle.vehicle_id, stops: resolved });
    }
    Ok(specs)
}

/// Concurrent, failure-isolated materializer.
pub struct Materializer {
    provider: Arc<dyn DirectionsProvider>,
    limiter: Arc<Semaphore>,
    vehicle_timeout: Duration,
}

impl Materializer {
    pub fn new(
        provider: Arc<dyn DirectionsProvider>,
        max_inflight: usize,
        vehicle_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            limiter: Arc::new(Semaphore::new(max_inflight.max(1))),
            vehicle_timeout,
        }
    }

    /// Materialize every vehicle spec. Results come back in ascending
    /// vehicle-id order regardless of completion order.
    pub async fn materialize(
        &self,
        specs: Vec<VehicleSpec>,
        params: &MaterializeParams,
    ) -> Vec<VehicleRoute> {
        let mut handles = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.stops.len() < 2 {
                debug!(vehicle = spec.vehicle_id, "skipping vehicle without route legs");
                continue;
            }
            let provider = Arc::clone(&self.provider);
            let limiter = Arc::clone(&self.limiter);
            let params = params.clone();
            let timeout = self.vehicle_timeout;
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire_owned().await.expect("limiter never closes");
                materialize_vehicle(provider.as_ref(), spec, &params, timeout).await
            }));
        }

        let mut routes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(route) => routes.push(route),
                Err(join_err) => warn!("materialization task panicked: {join_err}"),
            }
        }
        routes.sort_by_key(|r| r.vehicle_id);

        let failed = routes.iter().filter(|r| !r.is_ok()).count();
        info!(vehicles = routes.len(), failed, "materialization pass finished");
        routes
    }
}

async fn materialize_vehicle(
    provider: &dyn DirectionsProvider,
    spec: VehicleSpec,
    params: &MaterializeParams,
    timeout: Duration,
) -> VehicleRoute {
    let request = build_request(&spec, params);
    let started = std::time::Instant::now();

    let outcome = tokio::time::timeout(timeout, provider.fetch_route(&request)).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(route)) => {
            debug!(vehicle = spec.vehicle_id, latency_ms, "provider returned geometry");
            bind_route(&spec, &request, &route, params)
        }
        Ok(Err(err)) => {
            warn!(vehicle = spec.vehicle_id, latency_ms, "provider failed: {err}");
            failed_route(&spec, params, MaterializeStatus::ProviderError, err.to_string())
        }
        Err(_elapsed) => {
            warn!(vehicle = spec.vehicle_id, latency_ms, "per-vehicle timeout exceeded");
            failed_route(
                &spec,
                params,
                MaterializeStatus::ProviderError,
                format!("timeout after {}s", timeout.as_secs()),
            )
        }
    }
}

fn build_request(spec: &VehicleSpec, params: &MaterializeParams) -> DirectionsRequest {
    // The ordered stop list already encodes the route mode: closed tours
    // end on the depot, open-end routes on their last stop.
    let as_point = |stop: &Stop| RoutePoint {
        id: stop.id.clone(),
        name: stop.name.clone(),
        coordinates: stop.coordinates,
    };
    let start = as_point(&spec.stops[0]);
    let end = as_point(spec.stops.last().expect("spec has at least two stops"));
    let vias = spec.stops[1..spec.stops.len() - 1].iter().map(as_point).collect();
    DirectionsRequest { start, vias, end, params: params.clone() }
}

/// A polyline vertex with the accumulated time/distance at arrival.
#[derive(Debug, Clone, Copy)]
struct TracedVertex {
    coord: [f64; 2],
    time_s: f64,
    distance_m: f64,
}

/// Walk the provider features in order, accumulating time and distance
/// per vertex. Segment values are spread linearly inside a feature;
/// point-feature cumulatives override the accumulation. Consecutive
/// coincident vertices are dropped.
fn trace_route(route: &DirectionsRoute) -> Vec<TracedVertex> {
    let mut vertices: Vec<TracedVertex> = Vec::new();
    let mut cum_time = 0.0f64;
    let mut cum_dist = 0.0f64;

    let push = |vertices: &mut Vec<TracedVertex>, coord: [f64; 2], t: f64, d: f64| {
        if let Some(last) = vertices.last() {
            if last.coord == coord {
                return;
            }
        }
        vertices.push(TracedVertex { coord, time_s: t, distance_m: d });
    };

    for feature in &route.features {
        match feature {
            RouteFeature::Line { coordinates, time_s, distance_m } => {
                if coordinates.is_empty() {
                    continue;
                }
                let segments = (coordinates.len() - 1).max(1) as f64;
                let per_seg_t = time_s / segments;
                let per_seg_d = distance_m / segments;
                for (k, &coord) in coordinates.iter().enumerate() {
                    if k > 0 {
                        cum_time += per_seg_t;
                        cum_dist += per_seg_d;
                    }
                    push(&mut vertices, coord, cum_time, cum_dist);
                }
            }
            RouteFeature::Point { coordinate, cumulative_time_s, cumulative_distance_m } => {
                if let (Some(t), Some(d)) = (cumulative_time_s, cumulative_distance_m) {
                    // Provider-supplied cumulatives are ground truth, but
                    // never allowed to run backwards.
                    cum_time = t.max(cum_time);
                    cum_dist = d.max(cum_dist);
                    if let Some(last) = vertices.last_mut() {
                        if last.coord == *coordinate {
                            last.time_s = cum_time;
                            last.distance_m = cum_dist;
                            continue;
                        }
                    }
                }
                push(&mut vertices, *coordinate, cum_time, cum_dist);
            }
        }
    }
    vertices
}

/// Bind each waypoint to the first vertex at or after the scan pointer
/// that matches its position within epsilon; fall back to the nearest
/// later vertex by planar distance. The pointer never moves backward.
fn bind_waypoints(trace: &[TracedVertex], points: &[RoutePoint]) -> Option<Vec<(f64, f64)>> {
    if trace.is_empty() {
        return None;
    }
    let eps_sq = COORD_MATCH_EPS * COORD_MATCH_EPS;
    let mut bound = Vec::with_capacity(points.len());
    let mut pointer = 0usize;
    let mut floor = (0.0f64, 0.0f64);

    for (i, point) in points.iter().enumerate() {
        let target = [point.coordinates.lon, point.coordinates.lat];
        let matched = trace[pointer..]
            .iter()
            .position(|v| planar_distance_sq(v.coord, target) <= eps_sq)
            .map(|offset| pointer + offset);

        let index = match matched {
            Some(idx) => idx,
            None => {
                // Nearest vertex at or after the pointer.
                let (idx, _) = trace[pointer..]
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| {
                        planar_distance_sq(a.coord, target)
                            .partial_cmp(&planar_distance_sq(b.coord, target))
                            .expect("distances are finite")
                    })?;
                pointer + idx
            }
        };

        let vertex = trace[index];
        let values = if i == 0 {
            (0.0, 0.0)
        } else {
            (vertex.time_s.max(floor.0), vertex.distance_m.max(floor.1))
        };
        floor = values;
        bound.push(values);
        pointer = index;
    }
    Some(bound)
}

fn bind_route(
    spec: &VehicleSpec,
    request: &DirectionsRequest,
    route: &DirectionsRoute,
    params: &MaterializeParams,
) -> VehicleRoute {
    let trace = trace_route(route);
    let ordered: Vec<RoutePoint> = request.waypoints().into_iter().cloned().collect();

    let bound = match bind_waypoints(&trace, &ordered) {
        Some(bound) => bound,
        None => {
            return failed_route(
                spec,
                params,
                MaterializeStatus::NoMatch,
                "provider returned no usable geometry".to_string(),
            );
        }
    };

    let waypoints = spec
        .stops
        .iter()
        .zip(bound.iter())
        .map(|(stop, &(time_s, distance_m))| Waypoint {
            stop_id: stop.id.clone(),
            name: stop.name.clone(),
            coordinates: stop.coordinates,
            demand: stop.demand,
            cumulative_time_s: time_s,
            cumulative_distance_m: distance_m,
            arrival_time: Some(arrival_at(params.depart_at, time_s)),
        })
        .collect();

    VehicleRoute {
        vehicle_id: spec.vehicle_id,
        status: MaterializeStatus::Ok,
        error: None,
        waypoints,
        route_geometry: Some(LineString::new(trace.iter().map(|v| v.coord).collect())),
        geometry_total_time_s: Some(route.total_time_s),
        geometry_total_distance_m: Some(route.total_distance_m),
        route_load: spec.route_load(),
    }
}

fn failed_route(
    spec: &VehicleSpec,
    _params: &MaterializeParams,
    status: MaterializeStatus,
    reason: String,
) -> VehicleRoute {
    let waypoints = spec
        .stops
        .iter()
        .map(|stop| Waypoint {
            stop_id: stop.id.clone(),
            name: stop.name.clone(),
            coordinates: stop.coordinates,
            demand: stop.demand,
            cumulative_time_s: 0.0,
            cumulative_distance_m: 0.0,
            arrival_time: None,
        })
        .collect();

    VehicleRoute {
        vehicle_id: spec.vehicle_id,
        status,
        error: Some(reason),
        waypoints,
        route_geometry: None,
        geometry_total_time_s: None,
        geometry_total_distance_m: None,
        route_load: spec.route_load(),
    }
}

fn arrival_at(depart_at: NaiveDateTime, cumulative_s: f64) -> NaiveDateTime {
    depart_at + chrono::Duration::seconds(cumulative_s.round() as i64)
}
