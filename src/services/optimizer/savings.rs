//! Savings-based first solution.
//!
//! Clarke-Wright parallel savings over the primary arc matrix seeds the
//! search: each stop starts on its own route, then routes merge end-to-
//! start in decreasing order of `s(i, j) = c(0, i) + c(0, j) - c(i, j)`,
//! subject to capacity. If merging still leaves more routes than
//! vehicles, stops are repacked first-fit-decreasing into the available
//! vehicles and each vehicle ordered by nearest neighbor from the depot.

/// Build an initial solution with at most `max_vehicles` non-empty routes.
///
/// Returns `None` when no capacity-feasible packing into the fleet was
/// found. Routes contain non-depot matrix indices; the result is padded
/// with empty routes up to `max_vehicles`.
pub fn savings_seed(
    arc: &[Vec<f64>],
    demands: &[u32],
    capacity: u32,
    max_vehicles: usize,
) -> Option<Vec<Vec<usize>>> {
    let n = demands.len();
    if n <= 1 {
        return Some(vec![Vec::new(); max_vehicles]);
    }

    struct Saving {
        i: usize,
        j: usize,
        value: f64,
    }

    let mut savings = Vec::with_capacity((n - 1) * (n - 2) / 2);
    for i in 1..n {
        for j in (i + 1)..n {
            // The matrix may be directional; use the cheaper orientation.
            let arc_ij = arc[i][j].min(arc[j][i]);
            let value = arc[0][i] + arc[0][j] - arc_ij;
            if value > 0.0 {
                savings.push(Saving { i, j, value });
            }
        }
    }
    savings.sort_by(|a, b| b.value.partial_cmp(&a.value).expect("savings should not be NaN"));

    // Each stop starts in its own route.
    let mut route_of = vec![0usize; n];
    let mut route_load = vec![0u32; n];
    let mut route_members: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 1..n {
        route_of[i] = i;
        route_load[i] = demands[i];
        route_members[i].push(i);
    }

    for saving in &savings {
        let ri = route_of[saving.i];
        let rj = route_of[saving.j];
        if ri == rj {
            continue;
        }
        let combined = route_load[ri] + route_load[rj];
        if combined > capacity {
            continue;
        }

        // Merge only when the joint sits at route boundaries, preserving
        // orientation (the matrices are directional).
        let i_at_end = route_members[ri].last() == Some(&saving.i);
        let j_at_start = route_members[rj].first() == Some(&saving.j);
        let j_at_end = route_members[rj].last() == Some(&saving.j);
        let i_at_start = route_members[ri].first() == Some(&saving.i);

        let (from, into) = if i_at_end && j_at_start {
            (rj, ri)
        } else if j_at_end && i_at_start {
            (ri, rj)
        } else {
            continue;
        };

        let mut moved = std::mem::take(&mut route_members[from]);
        route_members[into].append(&mut moved);
        route_load[into] = combined;
        route_load[from] = 0;
        for &stop in &route_members[into] {
            route_of[stop] = into;
        }
    }

    let mut routes: Vec<Vec<usize>> =
        route_members.into_iter().filter(|r| !r.is_empty()).collect();

    if routes.len() > max_vehicles {
        routes = repack_first_fit(arc, demands, capacity, max_vehicles)?;
    }

    routes.resize(max_vehicles, Vec::new());
    Some(routes)
}

/// First-fit-decreasing bin packing into `max_vehicles` vehicles, each
/// vehicle then ordered by nearest neighbor from the depot.
fn repack_first_fit(
    arc: &[Vec<f64>],
    demands: &[u32],
    capacity: u32,
    max_vehicles: usize,
) -> Option<Vec<Vec<usize>>> {
    let mut stops: Vec<usize> = (1..demands.len()).collect();
    stops.sort_by(|&a, &b| demands[b].cmp(&demands[a]));

    let mut bins: Vec<Vec<usize>> = vec![Vec::new(); max_vehicles];
    let mut loads = vec![0u32; max_vehicles];
    for stop in stops {
        let slot = (0..max_vehicles).find(|&b| loads[b] + demands[stop] <= capacity)?;
        bins[slot].push(stop);
        loads[slot] += demands[stop];
    }

    for bin in bins.iter_mut() {
        order_nearest_neighbor(bin, arc);
    }
    Some(bins)
}

/// Reorder a set of stops greedily by nearest neighbor starting from the
/// depot (index 0).
pub(super) fn order_nearest_neighbor(route: &mut Vec<usize>, arc: &[Vec<f64>]) {
    let mut remaining = std::mem::take(route);
    let mut current = 0usize;
    while !remaining.is_empty() {
        let (pos, _) = remaining
            .iter()
            .enumerate()
            .min_by(|(_, &a), (_, &b)| {
                arc[current][a].partial_cmp(&arc[current][b]).expect("arc cost should not be NaN")
            })
            .expect("remaining is non-empty");
        let next = remaining.swap_remove(pos);
        route.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_matrix(n: usize) -> Vec<Vec<f64>> {
        // Stops on a line, 1 km apart; depot at position 0.
        (0..n)
            .map(|i| (0..n).map(|j| ((i as f64) - (j as f64)).abs() * 1000.0).collect())
            .collect()
    }

    #[test]
    fn merges_line_into_single_route() {
        let arc = line_matrix(4);
        let demands = [0, 10, 10, 10];
        let routes = savings_seed(&arc, &demands, 30, 2).unwrap();
        let non_empty: Vec<_> = routes.iter().filter(|r| !r.is_empty()).collect();
        assert_eq!(non_empty.len(), 1);
        assert_eq!(non_empty[0].len(), 3);
    }

    #[test]
    fn respects_capacity_during_merge() {
        let arc = line_matrix(4);
        let demands = [0, 15, 15, 15];
        let routes = savings_seed(&arc, &demands, 25, 3).unwrap();
        for route in &routes {
            let load: u32 = route.iter().map(|&i| demands[i]).sum();
            assert!(load <= 25);
        }
        let served: usize = routes.iter().map(|r| r.len()).sum();
        assert_eq!(served, 3);
    }

    #[test]
    fn repacks_when_fleet_is_tight() {
        let arc = line_matrix(5);
        // Mixed demands where capacity blocks most merges; the seed must
        // still end within the two-vehicle fleet.
        let demands = [0, 6, 4, 6, 4];
        let routes = savings_seed(&arc, &demands, 10, 2).unwrap();
        let non_empty: Vec<_> = routes.iter().filter(|r| !r.is_empty()).collect();
        assert!(non_empty.len() <= 2);
        let served: usize = routes.iter().map(|r| r.len()).sum();
        assert_eq!(served, 4);
        for route in &routes {
            let load: u32 = route.iter().map(|&i| demands[i]).sum();
            assert!(load <= 10);
        }
    }

    #[test]
    fn returns_none_when_packing_is_impossible() {
        let arc = line_matrix(4);
        // 6+6 exceeds capacity 10 in every pair: three stops cannot fit
        // into two vehicles even though the total fits the fleet.
        let demands = [0, 6, 6, 6];
        assert!(savings_seed(&arc, &demands, 10, 2).is_none());
    }

    #[test]
    fn pads_result_to_fleet_size() {
        let arc = line_matrix(2);
        let demands = [0, 5];
        let routes = savings_seed(&arc, &demands, 10, 3).unwrap();
        assert_eq!(routes.len(), 3);
        assert_eq!(routes.iter().filter(|r| !r.is_empty()).count(), 1);
    }
}
