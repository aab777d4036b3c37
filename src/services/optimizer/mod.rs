//! Constrained route optimizer.
//!
//! Produces an ordered plan from the matrix pair: validation, a savings
//! first solution, then local search under a hard time budget. Cost and
//! makespan primaries automatically fall back to distance when the
//! scalarization fails, with the fallback recorded in the result
//! metadata.

mod local_search;
mod objective;
mod savings;

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PlanError;
use crate::services::cancellation::CANCELLATION;
use crate::types::{
    MatrixPair, Objective, ObjectiveSpec, OptimizeMeta, OrderedPlan, PlannedStop, PlannedVehicle,
    RouteMode, StopSet,
};
use objective::{CostModel, ObjectiveError};
pub use local_search::SearchLimits;

/// One optimization request, owned so the solve can run on a blocking
/// thread.
#[derive(Debug, Clone)]
pub struct OptimizeProblem {
    pub stops: StopSet,
    pub matrices: MatrixPair,
    pub vehicle_count: u32,
    pub capacity: u32,
    pub route_mode: RouteMode,
    pub objective: ObjectiveSpec,
    pub time_budget: Duration,
}

/// Estimate a workable fleet size when the caller does not supply one.
pub fn estimate_vehicle_count(total_demand: u64, capacity: u32) -> u32 {
    ((total_demand / capacity.max(1) as u64) + 1).max(1) as u32
}

pub struct Optimizer;

impl Optimizer {
    /// Solve with the budget as a hard deadline. The CPU-bound search runs
    /// on a blocking thread; `job_id` registers the run for cooperative
    /// cancellation.
    pub async fn solve(problem: OptimizeProblem, job_id: Uuid) -> Result<OrderedPlan, PlanError> {
        let guard = CANCELLATION.register(job_id);
        let cancel = guard.token();

        // Grace on top of the budget: the inner deadline ends the search,
        // the outer timeout only catches a wedged solve.
        let outer = problem.time_budget + Duration::from_secs(5);
        let stops = problem.stops.len();

        info!(stops, vehicles = problem.vehicle_count, "solving plan");

        let result = tokio::time::timeout(
            outer,
            tokio::task::spawn_blocking(move || solve_sync(&problem, cancel)),
        )
        .await;

        match result {
            Ok(Ok(inner)) => inner,
            Ok(Err(join_err)) => {
                warn!("optimizer task failed: {}", join_err);
                Err(PlanError::NoSolution(format!("solver aborted: {join_err}")))
            }
            Err(_elapsed) => {
                warn!("optimizer exceeded its grace window");
                Err(PlanError::NoSolution("solver did not finish within the time budget".into()))
            }
        }
    }
}

/// Synchronous solve: validation, seed, improvement, fallback.
pub fn solve_sync(
    problem: &OptimizeProblem,
    cancel: CancellationToken,
) -> Result<OrderedPlan, PlanError> {
    let started_at = Instant::now();

    if problem.vehicle_count < 1 {
        return Err(PlanError::BadInput("vehicle_count must be at least 1".into()));
    }
    if problem.capacity < 1 {
        return Err(PlanError::BadInput("capacity must be at least 1".into()));
    }
    if problem.stops.len() < 2 {
        return Err(PlanError::BadInput("at least one non-depot stop is required".into()));
    }
    problem.matrices.validate(problem.stops.len())?;

    let demands: Vec<u32> = problem.stops.stops.iter().map(|s| s.demand).collect();
    if demands[0] != 0 {
        return Err(PlanError::BadInput("depot demand must be 0".into()));
    }

    // Infeasibility is decided before any solve is attempted.
    let total_demand: u64 = demands.iter().skip(1).map(|&d| d as u64).sum();
    let fleet_capacity = problem.vehicle_count as u64 * problem.capacity as u64;
    if total_demand > fleet_capacity {
        return Err(PlanError::Infeasible(format!(
            "total demand {total_demand} exceeds fleet capacity {fleet_capacity} \
             ({} vehicles x {})",
            problem.vehicle_count, problem.capacity
        )));
    }
    if let Some(stop) = problem.stops.stops.iter().skip(1).find(|s| s.demand > problem.capacity) {
        return Err(PlanError::Infeasible(format!(
            "demand {} of stop '{}' exceeds vehicle capacity {}",
            stop.demand, stop.id, problem.capacity
        )));
    }

    let deadline = started_at + problem.time_budget;

    match attempt(problem, &problem.objective, &demands, deadline, cancel.clone(), started_at, false)
    {
        Ok(plan) => Ok(plan),
        Err(AttemptError::Unstable(msg))
            if matches!(problem.objective.primary, Objective::Cost | Objective::Makespan) =>
        {
            warn!("objective setup failed ({msg}), falling back to distance");
            let fallback = ObjectiveSpec {
                primary: Objective::Distance,
                tiebreakers: problem.objective.tiebreakers.clone(),
                extra_terms: problem
                    .objective
                    .extra_terms
                    .iter()
                    .filter(|t| t.weight.is_finite())
                    .cloned()
                    .collect(),
                route_duration_limit_s: problem.objective.route_duration_limit_s,
            };
            attempt(problem, &fallback, &demands, deadline, cancel, started_at, true)
                .map_err(AttemptError::into_plan_error)
        }
        Err(other) => Err(other.into_plan_error()),
    }
}

enum AttemptError {
    Plan(PlanError),
    Unstable(String),
}

impl AttemptError {
    fn into_plan_error(self) -> PlanError {
        match self {
            AttemptError::Plan(e) => e,
            AttemptError::Unstable(msg) => {
                PlanError::BadInput(format!("objective setup failed: {msg}"))
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn attempt(
    problem: &OptimizeProblem,
    spec: &ObjectiveSpec,
    demands: &[u32],
    deadline: Instant,
    cancel: CancellationToken,
    started_at: Instant,
    fallback_used: bool,
) -> Result<OrderedPlan, AttemptError> {
    let model = CostModel::try_new(
        &problem.matrices,
        spec,
        problem.route_mode,
        problem.capacity,
        demands,
    )
    .map_err(|e| match e {
        ObjectiveError::InvalidCombination(_) => AttemptError::Plan(e.into_plan_error()),
        ObjectiveError::Unstable(msg) => AttemptError::Unstable(msg),
    })?;

    let mut routes = match savings::savings_seed(
        model.primary_matrix(),
        demands,
        problem.capacity,
        problem.vehicle_count as usize,
    ) {
        Some(routes) => routes,
        None => {
            // Savings plus first-fit found no packing; try harder within
            // what remains of the budget before declaring failure.
            match exact_pack(demands, problem.capacity, problem.vehicle_count as usize, deadline) {
                Some(mut bins) => {
                    for bin in bins.iter_mut() {
                        savings::order_nearest_neighbor(bin, model.primary_matrix());
                    }
                    bins.resize(problem.vehicle_count as usize, Vec::new());
                    bins
                }
                None => {
                    return Err(AttemptError::Plan(PlanError::NoSolution(diagnose(
                        problem, demands,
                    ))));
                }
            }
        }
    };

    let limits = SearchLimits { deadline, cancel };
    let stats = local_search::improve(
        &mut routes,
        &model,
        demands,
        problem.capacity,
        &limits,
    );

    let final_cost = model.evaluate(&routes);
    if !final_cost.is_finite() {
        return Err(AttemptError::Unstable(format!("non-finite solution cost {final_cost}")));
    }

    debug!(
        passes = stats.passes,
        moves = stats.moves_accepted,
        deadline_hit = stats.deadline_hit,
        "local search finished"
    );

    let mut solver_log = vec![
        format!("algorithm=savings+local-search passes={} moves={}", stats.passes, stats.moves_accepted),
        format!("objective={:?} cost={final_cost:.6}", spec.primary),
    ];
    if stats.deadline_hit {
        solver_log.push("budget_exhausted=true".to_string());
    }
    if fallback_used {
        solver_log.push("fallback=distance".to_string());
    }

    let meta = OptimizeMeta {
        objective: spec.primary,
        fallback_used,
        solve_time_ms: started_at.elapsed().as_millis() as u64,
        solver_log,
    };
    Ok(build_plan(problem, &routes, meta))
}

/// Bounded exact packing search, used when first-fit fails. Depth-first
/// over stops in decreasing-demand order with symmetry breaking on empty
/// bins; gives up at the deadline.
fn exact_pack(
    demands: &[u32],
    capacity: u32,
    max_vehicles: usize,
    deadline: Instant,
) -> Option<Vec<Vec<usize>>> {
    let mut stops: Vec<usize> = (1..demands.len()).collect();
    stops.sort_by(|&a, &b| demands[b].cmp(&demands[a]));

    let mut bins: Vec<Vec<usize>> = vec![Vec::new(); max_vehicles];
    let mut loads = vec![0u32; max_vehicles];

    fn place(
        idx: usize,
        stops: &[usize],
        demands: &[u32],
        capacity: u32,
        bins: &mut Vec<Vec<usize>>,
        loads: &mut [u32],
        deadline: Instant,
    ) -> bool {
        if idx == stops.len() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        let stop = stops[idx];
        let mut tried_empty = false;
        for b in 0..bins.len() {
            if bins[b].is_empty() {
                if tried_empty {
                    continue;
                }
                tried_empty = true;
            }
            if loads[b] + demands[stop] > capacity {
                continue;
            }
            bins[b].push(stop);
            loads[b] += demands[stop];
            if place(idx + 1, stops, demands, capacity, bins, loads, deadline) {
                return true;
            }
            bins[b].pop();
            loads[b] -= demands[stop];
        }
        false
    }

    if place(0, &stops, demands, capacity, &mut bins, &mut loads, deadline) {
        Some(bins)
    } else {
        None
    }
}

/// Human-readable failure diagnosis appended to `NoSolution` errors.
fn diagnose(problem: &OptimizeProblem, demands: &[u32]) -> String {
    let total: u64 = demands.iter().skip(1).map(|&d| d as u64).sum();
    let fleet = problem.vehicle_count as u64 * problem.capacity as u64;
    if total as f64 > fleet as f64 * 0.95 {
        return format!(
            "no feasible assignment: demand {total} uses over 95% of fleet capacity {fleet}; \
             add vehicles or raise capacity"
        );
    }
    let max_arc = problem
        .matrices
        .distance
        .iter()
        .flat_map(|r| r.iter().cloned())
        .fold(0.0f64, f64::max);
    if max_arc > 500_000.0 {
        return format!(
            "no feasible assignment: maximum arc distance {max_arc:.0} m suggests unreachable \
             stops; regenerate the matrices"
        );
    }
    if problem.stops.len() > 100 {
        return format!(
            "no feasible assignment within the budget for {} stops; reduce the instance or \
             raise the time budget",
            problem.stops.len()
        );
    }
    "no feasible assignment found within the time budget".to_string()
}

/// Assemble the ordered plan with provisional matrix-derived cumulatives.
fn build_plan(problem: &OptimizeProblem, routes: &[Vec<usize>], meta: OptimizeMeta) -> OrderedPlan {
    let closed = problem.route_mode == RouteMode::ClosedTour;
    let t = &problem.matrices.time;
    let d = &problem.matrices.distance;
    let depot = &problem.stops.stops[0];

    let mut vehicles = Vec::new();
    let mut total_distance = 0.0;
    let mut total_time = 0.0;
    let mut total_load = 0u32;

    for route in routes.iter().filter(|r| !r.is_empty()) {
        let vehicle_id = vehicles.len() as u32 + 1;
        let mut stops = Vec::with_capacity(route.len() + 2);
        let mut cum_time = 0.0;
        let mut cum_dist = 0.0;
        let mut cum_load = 0u32;
        let mut order = 1u32;
        let mut prev = 0usize;

        stops.push(PlannedStop {
            stop_id: depot.id.clone(),
            stop_name: depot.name.clone(),
            stop_order: order,
            is_depot: true,
            load: 0,
            cumulative_load: 0,
            est_time_s: 0.0,
            est_distance_m: 0.0,
        });

        for &idx in route {
            let stop = &problem.stops.stops[idx];
            cum_time += t[prev][idx];
            cum_dist += d[prev][idx];
            cum_load += stop.demand;
            order += 1;
            stops.push(PlannedStop {
                stop_id: stop.id.clone(),
                stop_name: stop.name.clone(),
                stop_order: order,
                is_depot: false,
                load: stop.demand,
                cumulative_load: cum_load,
                est_time_s: cum_time,
                est_distance_m: cum_dist,
            });
            prev = idx;
        }

        if closed {
            cum_time += t[prev][0];
            cum_dist += d[prev][0];
            order += 1;
            stops.push(PlannedStop {
                stop_id: depot.id.clone(),
                stop_name: depot.name.clone(),
                stop_order: order,
                is_depot: true,
                load: 0,
                cumulative_load: cum_load,
                est_time_s: cum_time,
                est_distance_m: cum_dist,
            });
        }

        total_distance += cum_dist;
        total_time += cum_time;
        total_load += cum_load;
        vehicles.push(PlannedVehicle {
            vehicle_id,
            stops,
            route_load: cum_load,
            route_time_s: cum_time,
            route_distance_m: cum_dist,
        });
    }

    OrderedPlan {
        route_mode: problem.route_mode,
        vehicles,
        total_distance_m: total_distance,
        total_time_s: total_time,
        total_load,
        meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinates, Stop};
    use std::collections::HashSet;

    fn stop(id: &str, lon: f64, lat: f64, demand: u32) -> Stop {
        Stop {
            id: id.to_string(),
            name: id.to_string(),
            coordinates: Coordinates { lon, lat },
            demand,
        }
    }

    fn line_problem(demands: &[u32], vehicles: u32, capacity: u32) -> OptimizeProblem {
        let n = demands.len();
        let stops: Vec<Stop> = demands
            .iter()
            .enumerate()
            .map(|(i, &dem)| stop(&format!("s{i}"), 127.0 + i as f64 * 0.1, 37.5, dem))
            .collect();
        let d: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..n).map(|j| ((i as f64) - (j as f64)).abs() * 1000.0).collect())
            .collect();
        let t = d.iter().map(|row| row.iter().map(|v| v / 10.0).collect()).collect();
        OptimizeProblem {
            stops: StopSet { stops },
            matrices: MatrixPair { time: t, distance: d, size: n },
            vehicle_count: vehicles,
            capacity,
            route_mode: RouteMode::ClosedTour,
            objective: ObjectiveSpec::distance(),
            time_budget: Duration::from_secs(5),
        }
    }

    fn solve(problem: &OptimizeProblem) -> Result<OrderedPlan, PlanError> {
        solve_sync(problem, CancellationToken::new())
    }

    #[test]
    fn single_vehicle_tour() {
        // Two stops, one vehicle, closed tour: depot -> A -> depot.
        let problem = line_problem(&[0, 3], 1, 10);
        let plan = solve(&problem).unwrap();

        assert_eq!(plan.vehicles.len(), 1);
        let vehicle = &plan.vehicles[0];
        assert_eq!(vehicle.route_load, 3);
        let ids: Vec<&str> = vehicle.stops.iter().map(|s| s.stop_id.as_str()).collect();
        assert_eq!(ids, vec!["s0", "s1", "s0"]);
        assert!(vehicle.stops.last().unwrap().est_time_s > 0.0);
    }

    #[test]
    fn every_stop_exactly_once() {
        let problem = line_problem(&[0, 2, 3, 4, 5, 1, 2], 3, 9);
        let plan = solve(&problem).unwrap();

        let mut seen = HashSet::new();
        for vehicle in &plan.vehicles {
            for id in vehicle.stop_ids() {
                assert!(seen.insert(id.to_string()), "stop {id} appears twice");
            }
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn capacity_respected() {
        let problem = line_problem(&[0, 2, 3, 4, 5, 1, 2], 3, 9);
        let plan = solve(&problem).unwrap();
        for vehicle in &plan.vehicles {
            assert!(vehicle.route_load <= 9, "vehicle over capacity: {}", vehicle.route_load);
        }
    }

    #[test]
    fn capacity_split_never_overloads() {
        // Three demand-6 stops across two capacity-12 vehicles: one vehicle
        // takes two stops, never all three.
        let problem = line_problem(&[0, 6, 6, 6], 2, 12);
        let plan = solve(&problem).unwrap();
        assert_eq!(plan.vehicles.len(), 2);
        for vehicle in &plan.vehicles {
            assert!(vehicle.route_load <= 12);
            assert!(vehicle.stop_ids().len() <= 2);
        }
    }

    #[test]
    fn infeasible_before_solve() {
        // Total 18 > 2 x 5.
        let problem = line_problem(&[0, 6, 6, 6], 2, 5);
        match solve(&problem) {
            Err(PlanError::Infeasible(_)) => {}
            other => panic!("expected Infeasible, got {other:?}"),
        }
    }

    #[test]
    fn oversized_single_demand_is_infeasible() {
        let problem = line_problem(&[0, 11, 1], 4, 10);
        assert!(matches!(solve(&problem), Err(PlanError::Infeasible(_))));
    }

    #[test]
    fn unpackable_instance_is_no_solution() {
        // Pairwise 6+6 > 10: no 2-vehicle packing even though 18 <= 20.
        let problem = line_problem(&[0, 6, 6, 6], 2, 10);
        assert!(matches!(solve(&problem), Err(PlanError::NoSolution(_))));
    }

    #[test]
    fn one_second_budget_small_instance() {
        let mut problem = line_problem(&[0, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1], 4, 10);
        problem.time_budget = Duration::from_secs(1);
        let plan = solve(&problem).unwrap();
        let served: usize = plan.vehicles.iter().map(|v| v.stop_ids().len()).sum();
        assert_eq!(served, 19);
    }

    #[test]
    fn open_end_routes_do_not_return_to_depot() {
        let mut problem = line_problem(&[0, 2, 2, 2], 1, 10);
        problem.route_mode = RouteMode::OpenEnd;
        let plan = solve(&problem).unwrap();
        let vehicle = &plan.vehicles[0];
        assert!(vehicle.stops.first().unwrap().is_depot);
        assert!(!vehicle.stops.last().unwrap().is_depot);
    }

    #[test]
    fn bad_matrix_is_rejected() {
        let mut problem = line_problem(&[0, 1], 1, 10);
        problem.matrices.distance[0][1] = -5.0;
        assert!(matches!(solve(&problem), Err(PlanError::BadInput(_))));
    }

    #[test]
    fn duplicate_tiebreaker_is_bad_input() {
        let mut problem = line_problem(&[0, 1, 2], 1, 10);
        problem.objective.tiebreakers = vec![Objective::Distance];
        assert!(matches!(solve(&problem), Err(PlanError::BadInput(_))));
    }

    #[test]
    fn vehicles_primary_consolidates_fleet() {
        let mut problem = line_problem(&[0, 1, 1, 1, 1], 4, 10);
        problem.objective = ObjectiveSpec {
            primary: Objective::Vehicles,
            tiebreakers: vec![Objective::Distance],
            extra_terms: vec![],
            route_duration_limit_s: None,
        };
        let plan = solve(&problem).unwrap();
        assert_eq!(plan.vehicles.len(), 1);
        assert!(!plan.meta.fallback_used);
    }

    #[test]
    fn provisional_cumulatives_are_monotone() {
        let problem = line_problem(&[0, 2, 3, 4, 5], 2, 10);
        let plan = solve(&problem).unwrap();
        for vehicle in &plan.vehicles {
            let mut last_t = -1.0;
            let mut last_d = -1.0;
            for stop in &vehicle.stops {
                assert!(stop.est_time_s >= last_t);
                assert!(stop.est_distance_m >= last_d);
                last_t = stop.est_time_s;
                last_d = stop.est_distance_m;
            }
        }
    }

    #[test]
    fn makespan_setup_failure_falls_back_to_distance() {
        use crate::types::{ExtraTerm, WeightedTerm};
        let mut problem = line_problem(&[0, 1, 2, 3], 2, 10);
        problem.objective = ObjectiveSpec {
            primary: Objective::Makespan,
            tiebreakers: vec![],
            extra_terms: vec![WeightedTerm { term: ExtraTerm::Co2Proxy, weight: f64::NAN }],
            route_duration_limit_s: None,
        };
        let plan = solve(&problem).unwrap();
        assert!(plan.meta.fallback_used);
        assert_eq!(plan.meta.objective, Objective::Distance);
        assert!(plan.meta.solver_log.iter().any(|l| l.contains("fallback=distance")));
    }

    #[test]
    fn distance_primary_setup_failure_propagates() {
        use crate::types::{ExtraTerm, WeightedTerm};
        let mut problem = line_problem(&[0, 1, 2], 1, 10);
        problem.objective.extra_terms =
            vec![WeightedTerm { term: ExtraTerm::Co2Proxy, weight: f64::INFINITY }];
        assert!(matches!(solve(&problem), Err(PlanError::BadInput(_))));
    }

    #[test]
    fn estimate_vehicle_count_covers_demand() {
        assert_eq!(estimate_vehicle_count(0, 10), 1);
        assert_eq!(estimate_vehicle_count(25, 10), 3);
        assert_eq!(estimate_vehicle_count(30, 10), 4);
    }
}
