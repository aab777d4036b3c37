//! Local-search improvement.
//!
//! Three move operators run in rotation until a full cycle yields no
//! improvement or the deadline expires: inter-route relocate, inter-route
//! swap, and intra-route 2-opt. Moves are accepted on strict improvement
//! of the scalarized cost, so tie-breakers and penalty terms steer the
//! search exactly as they steer the final comparison.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::objective::CostModel;

/// Hard limits on a search run.
pub struct SearchLimits {
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl SearchLimits {
    fn expired(&self) -> bool {
        Instant::now() >= self.deadline || self.cancel.is_cancelled()
    }
}

/// Outcome counters for the solver log.
#[derive(Debug, Default)]
pub struct SearchStats {
    pub passes: u32,
    pub moves_accepted: u64,
    pub deadline_hit: bool,
}

/// Improve `routes` in place under the cost model. Capacity feasibility
/// is preserved by construction: every candidate move is load-checked
/// before evaluation.
pub fn improve(
    routes: &mut Vec<Vec<usize>>,
    model: &CostModel<'_>,
    demands: &[u32],
    capacity: u32,
    limits: &SearchLimits,
) -> SearchStats {
    let mut stats = SearchStats::default();
    let mut loads: Vec<u32> = routes
        .iter()
        .map(|r| r.iter().map(|&i| demands[i]).sum())
        .collect();

    loop {
        if limits.expired() {
            stats.deadline_hit = true;
            break;
        }
        stats.passes += 1;
        let mut improved = false;
        improved |= relocate_pass(routes, &mut loads, model, demands, capacity, limits, &mut stats);
        improved |= swap_pass(routes, &mut loads, model, demands, capacity, limits, &mut stats);
        improved |= two_opt_pass(routes, model, limits, &mut stats);
        if !improved {
            break;
        }
    }
    stats
}

/// Move one stop to the best strictly-improving position in another route.
#[allow(clippy::too_many_arguments)]
fn relocate_pass(
    routes: &mut Vec<Vec<usize>>,
    loads: &mut [u32],
    model: &CostModel<'_>,
    demands: &[u32],
    capacity: u32,
    limits: &SearchLimits,
    stats: &mut SearchStats,
) -> bool {
    let mut improved_any = false;
    let mut current_cost = model.evaluate(routes);

    'outer: for from in 0..routes.len() {
        let mut pos = 0;
        while pos < routes[from].len() {
            if limits.expired() {
                stats.deadline_hit = true;
                break 'outer;
            }
            let stop = routes[from][pos];
            let mut applied = false;

            for to in 0..routes.len() {
                if to == from {
                    continue;
                }
                if loads[to] + demands[stop] > capacity {
                    continue;
                }
                for insert_at in 0..=routes[to].len() {
                    routes[from].remove(pos);
                    routes[to].insert(insert_at, stop);
                    let candidate = model.evaluate(routes);
                    if candidate + 1e-12 < current_cost {
                        current_cost = candidate;
                        loads[from] -= demands[stop];
                        loads[to] += demands[stop];
                        stats.moves_accepted += 1;
                        improved_any = true;
                        applied = true;
                        break;
                    }
                    // Undo.
                    routes[to].remove(insert_at);
                    routes[from].insert(pos, stop);
                }
                if applied {
                    break;
                }
            }
            if !applied {
                pos += 1;
            }
        }
    }
    improved_any
}

/// Exchange two stops between distinct routes.
#[allow(clippy::too_many_arguments)]
fn swap_pass(
    routes: &mut Vec<Vec<usize>>,
    loads: &mut [u32],
    model: &CostModel<'_>,
    demands: &[u32],
    capacity: u32,
    limits: &SearchLimits,
    stats: &mut SearchStats,
) -> bool {
    let mut improved_any = false;
    let mut current_cost = model.evaluate(routes);

    'outer: for a in 0..routes.len() {
        for b in (a + 1)..routes.len() {
            for i in 0..routes[a].len() {
                for j in 0..routes[b].len() {
                    if limits.expired() {
                        stats.deadline_hit = true;
                        break 'outer;
                    }
                    let (sa, sb) = (routes[a][i], routes[b][j]);
                    let load_a = loads[a] - demands[sa] + demands[sb];
                    let load_b = loads[b] - demands[sb] + demands[sa];
                    if load_a > capacity || load_b > capacity {
                        continue;
                    }
                    routes[a][i] = sb;
                    routes[b][j] = sa;
                    let candidate = model.evaluate(routes);
                    if candidate + 1e-12 < current_cost {
                        current_cost = candidate;
                        loads[a] = load_a;
                        loads[b] = load_b;
                        stats.moves_accepted += 1;
                        improved_any = true;
                    } else {
                        routes[a][i] = sa;
                        routes[b][j] = sb;
                    }
                }
            }
        }
    }
    improved_any
}

/// Reverse intra-route segments (2-opt) where that lowers the cost.
fn two_opt_pass(
    routes: &mut [Vec<usize>],
    model: &CostModel<'_>,
    limits: &SearchLimits,
    stats: &mut SearchStats,
) -> bool {
    let mut improved_any = false;

    for r in 0..routes.len() {
        if routes[r].len() < 3 {
            continue;
        }
        let mut improved = true;
        while improved {
            improved = false;
            let n = routes[r].len();
            let mut current_cost = model.evaluate(routes);
            for i in 0..n - 1 {
                for j in (i + 1)..n {
                    if limits.expired() {
                        stats.deadline_hit = true;
                        return improved_any;
                    }
                    routes[r][i..=j].reverse();
                    let candidate = model.evaluate(routes);
                    if candidate + 1e-12 < current_cost {
                        current_cost = candidate;
                        stats.moves_accepted += 1;
                        improved = true;
                        improved_any = true;
                    } else {
                        routes[r][i..=j].reverse();
                    }
                }
            }
        }
    }
    improved_any
}
