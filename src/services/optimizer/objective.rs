//! Objective scalarization.
//!
//! The primary objective sets the dominant cost term. Tie-breakers are
//! folded in as normalized secondary terms scaled by a dominance factor
//! per tier, so any primary improvement strictly dominates every
//! tie-breaker change. Additional terms are weighted penalties on top.

use crate::error::PlanError;
use crate::types::{ExtraTerm, MatrixPair, Objective, ObjectiveSpec, RouteMode};

/// Dominance factor between consecutive objective tiers.
const TIER_DOMINANCE: f64 = 1e-6;

/// Fixed-cost multipliers, in units of the maximum arc distance. Large
/// magnitudes flatten the cost surface and stall the search.
const VEHICLES_FIXED_ARC_FACTOR: f64 = 4.0;
const COST_FIXED_ARC_FACTOR: f64 = 0.1;

/// Errors raised while building the cost model.
#[derive(Debug)]
pub enum ObjectiveError {
    /// Caller supplied an invalid combination; surfaced as `BadInput`.
    InvalidCombination(String),
    /// The scalarization degenerated numerically; triggers the distance
    /// fallback for cost/makespan primaries.
    Unstable(String),
}

impl ObjectiveError {
    pub fn into_plan_error(self) -> PlanError {
        match self {
            ObjectiveError::InvalidCombination(msg) => PlanError::BadInput(msg),
            ObjectiveError::Unstable(msg) => {
                PlanError::BadInput(format!("objective setup failed: {msg}"))
            }
        }
    }
}

/// Scalarized cost model over candidate solutions.
///
/// A candidate solution is a slice of routes, each a sequence of non-depot
/// matrix indices; index 0 is always the depot.
pub struct CostModel<'a> {
    matrices: &'a MatrixPair,
    spec: &'a ObjectiveSpec,
    closed: bool,
    capacity: u32,
    demands: &'a [u32],
    /// Normalization scale per tier: primary first, then tie-breakers.
    tier_scales: Vec<f64>,
    max_arc_distance: f64,
}

impl<'a> CostModel<'a> {
    pub fn try_new(
        matrices: &'a MatrixPair,
        spec: &'a ObjectiveSpec,
        route_mode: RouteMode,
        capacity: u32,
        demands: &'a [u32],
    ) -> Result<Self, ObjectiveError> {
        let mut seen = vec![spec.primary];
        for tie in &spec.tiebreakers {
            if seen.contains(tie) {
                return Err(ObjectiveError::InvalidCombination(format!(
                    "tie-breaker {tie:?} duplicates an earlier objective"
                )));
            }
            seen.push(*tie);
        }
        if spec.tiebreakers.len() > 2 {
            return Err(ObjectiveError::InvalidCombination(
                "at most two tie-breakers are supported".to_string(),
            ));
        }
        for term in &spec.extra_terms {
            if !term.weight.is_finite() {
                return Err(ObjectiveError::Unstable(format!(
                    "non-finite weight {} for term {:?}",
                    term.weight, term.term
                )));
            }
        }

        let max_arc_distance = max_arc(&matrices.distance);
        let mut model = Self {
            matrices,
            spec,
            closed: route_mode == RouteMode::ClosedTour,
            capacity,
            demands,
            tier_scales: Vec::new(),
            max_arc_distance,
        };
        for obj in std::iter::once(&spec.primary).chain(spec.tiebreakers.iter()) {
            let scale = model.scale_for(*obj);
            if !scale.is_finite() || scale <= 0.0 {
                return Err(ObjectiveError::Unstable(format!(
                    "degenerate normalization scale {scale} for {obj:?}"
                )));
            }
            model.tier_scales.push(scale);
        }
        Ok(model)
    }

    /// Upper bound used to normalize one objective's raw value to ~[0, 1],
    /// so the per-tier dominance factor actually dominates.
    fn scale_for(&self, objective: Objective) -> f64 {
        let n = self.matrices.size.max(2) as f64;
        match objective {
            Objective::Distance => (self.max_arc_distance * n).max(1.0),
            Objective::Time | Objective::Makespan => (max_arc(&self.matrices.time) * n).max(1.0),
            // Raw value includes per-vehicle fixed costs on top of the
            // distance total; bound accordingly.
            Objective::Vehicles => {
                (self.max_arc_distance * n * (1.0 + VEHICLES_FIXED_ARC_FACTOR)).max(1.0)
            }
            Objective::Cost => {
                (self.max_arc_distance * n * (1.0 + COST_FIXED_ARC_FACTOR)).max(1.0)
            }
        }
    }

    /// Raw (unnormalized) value of one objective over a solution.
    fn raw_value(&self, objective: Objective, routes: &[Vec<usize>]) -> f64 {
        match objective {
            Objective::Distance => self.total(routes, &self.matrices.distance),
            Objective::Time => self.total(routes, &self.matrices.time),
            Objective::Vehicles => {
                let fixed = VEHICLES_FIXED_ARC_FACTOR * self.max_arc_distance.max(1.0);
                self.used(routes) as f64 * fixed + self.total(routes, &self.matrices.distance)
            }
            Objective::Cost => {
                let fixed = COST_FIXED_ARC_FACTOR * self.max_arc_distance.max(1.0);
                self.used(routes) as f64 * fixed + self.total(routes, &self.matrices.distance)
            }
            Objective::Makespan => {
                // Span over the time dimension, not a time-window model: a
                // vanishing total term keeps plateaus ordered.
                let span = routes
                    .iter()
                    .filter(|r| !r.is_empty())
                    .map(|r| self.route_cost(r, &self.matrices.time))
                    .fold(0.0f64, f64::max);
                span + self.total(routes, &self.matrices.time) * TIER_DOMINANCE
            }
        }
    }

    /// Scalarized cost of a candidate solution.
    pub fn evaluate(&self, routes: &[Vec<usize>]) -> f64 {
        let mut cost = 0.0;
        let mut tier_weight = 1.0;
        for (i, obj) in std::iter::once(&self.spec.primary)
            .chain(self.spec.tiebreakers.iter())
            .enumerate()
        {
            cost += tier_weight * self.raw_value(*obj, routes) / self.tier_scales[i];
            tier_weight *= TIER_DOMINANCE;
        }
        for term in &self.spec.extra_terms {
            cost += term.weight * self.term_value(term.term, routes);
        }
        cost
    }

    /// Normalized value of an additional penalty term.
    fn term_value(&self, term: ExtraTerm, routes: &[Vec<usize>]) -> f64 {
        let time_scale = (max_arc(&self.matrices.time) * self.matrices.size.max(2) as f64).max(1.0);
        let dist_scale =
            (self.max_arc_distance * self.matrices.size.max(2) as f64).max(1.0);
        match term {
            // Without per-stop windows, the window-shaped terms evaluate
            // over route durations against the optional duration limit.
            ExtraTerm::TimeWindowViolation | ExtraTerm::WaitTime | ExtraTerm::Overtime => {
                match self.spec.route_duration_limit_s {
                    Some(limit) => routes
                        .iter()
                        .filter(|r| !r.is_empty())
                        .map(|r| (self.route_cost(r, &self.matrices.time) - limit).max(0.0))
                        .sum::<f64>()
                        / time_scale,
                    None => 0.0,
                }
            }
            ExtraTerm::WorkloadBalance => {
                let loads: Vec<f64> = routes
                    .iter()
                    .filter(|r| !r.is_empty())
                    .map(|r| self.route_cost(r, &self.matrices.time))
                    .collect();
                if loads.len() < 2 {
                    0.0
                } else {
                    let max = loads.iter().cloned().fold(f64::MIN, f64::max);
                    let min = loads.iter().cloned().fold(f64::MAX, f64::min);
                    (max - min) / time_scale
                }
            }
            ExtraTerm::Co2Proxy => self.total(routes, &self.matrices.distance) / dist_scale,
            ExtraTerm::FixedCost => self.used(routes) as f64,
            ExtraTerm::UtilizationPenalty => routes
                .iter()
                .filter(|r| !r.is_empty())
                .map(|r| {
                    let load: u32 = r.iter().map(|&i| self.demands[i]).sum();
                    1.0 - load as f64 / self.capacity.max(1) as f64
                })
                .sum(),
        }
    }

    fn used(&self, routes: &[Vec<usize>]) -> usize {
        routes.iter().filter(|r| !r.is_empty()).count()
    }

    fn total(&self, routes: &[Vec<usize>], matrix: &[Vec<f64>]) -> f64 {
        routes.iter().map(|r| self.route_cost(r, matrix)).sum()
    }

    /// Cost of a single route over an arc matrix: depot to first stop,
    /// internal arcs, and the return arc in closed mode.
    pub fn route_cost(&self, route: &[usize], matrix: &[Vec<f64>]) -> f64 {
        if route.is_empty() {
            return 0.0;
        }
        let mut cost = matrix[0][route[0]];
        for pair in route.windows(2) {
            cost += matrix[pair[0]][pair[1]];
        }
        if self.closed {
            cost += matrix[*route.last().unwrap()][0];
        }
        cost
    }

    pub fn route_time(&self, route: &[usize]) -> f64 {
        self.route_cost(route, &self.matrices.time)
    }

    pub fn route_distance(&self, route: &[usize]) -> f64 {
        self.route_cost(route, &self.matrices.distance)
    }

    /// The arc matrix matching the primary objective, used for seeding.
    pub fn primary_matrix(&self) -> &Vec<Vec<f64>> {
        match self.spec.primary {
            Objective::Time | Objective::Makespan => &self.matrices.time,
            Objective::Distance | Objective::Vehicles | Objective::Cost => &self.matrices.distance,
        }
    }
}

fn max_arc(matrix: &[Vec<f64>]) -> f64 {
    matrix
        .iter()
        .flat_map(|row| row.iter().cloned())
        .fold(0.0f64, f64::max)
}
