//! Stop set and matrix snapshot types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PlanError;

/// WGS84 position, longitude first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lon: f64,
    pub lat: f64,
}

/// A geographic stop with demand. Exactly one stop per project is the
/// depot (demand 0); the store guarantees it is the first entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: String,
    pub name: String,
    pub coordinates: Coordinates,
    pub demand: u32,
}

/// Immutable snapshot of a project's stop set, read once at the start of
/// an optimize or materialize pass. Index 0 is the depot.
#[derive(Debug, Clone)]
pub struct StopSet {
    pub stops: Vec<Stop>,
}

impl StopSet {
    pub fn depot(&self) -> &Stop {
        &self.stops[0]
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Look up a stop by id.
    pub fn get(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.iter().find(|s| s.id == stop_id)
    }

    /// Total demand over non-depot stops.
    pub fn total_demand(&self) -> u64 {
        self.stops.iter().skip(1).map(|s| s.demand as u64).sum()
    }
}

/// The square time (seconds) and distance (meters) matrices over the stop
/// set, row/column 0 = depot. Treated as an immutable snapshot; any
/// stop-set change invalidates it.
#[derive(Debug, Clone)]
pub struct MatrixPair {
    pub time: Vec<Vec<f64>>,
    pub distance: Vec<Vec<f64>>,
    pub size: usize,
}

impl MatrixPair {
    /// Validate shape and values against a stop count.
    ///
    /// Non-square or wrongly-sized matrices and negative entries are the
    /// caller's fault (`BadInput`); a dimension that disagrees with the
    /// stop count after load is a fatal shape mismatch.
    pub fn validate(&self, stop_count: usize) -> Result<(), PlanError> {
        if self.size != stop_count {
            return Err(PlanError::BadInput(format!(
                "matrix dimension {} does not match stop count {}",
                self.size, stop_count
            )));
        }
        for (name, m) in [("time", &self.time), ("distance", &self.distance)] {
            if m.len() != self.size {
                return Err(PlanError::BadInput(format!(
                    "{name} matrix has {} rows, expected {}",
                    m.len(),
                    self.size
                )));
            }
            for (i, row) in m.iter().enumerate() {
                if row.len() != self.size {
                    return Err(PlanError::BadInput(format!(
                        "{name} matrix row {i} has {} columns, expected {}",
                        row.len(),
                        self.size
                    )));
                }
                for (j, &v) in row.iter().enumerate() {
                    if !v.is_finite() || v < 0.0 {
                        return Err(PlanError::BadInput(format!(
                            "{name} matrix[{i}][{j}] has invalid value {v}"
                        )));
                    }
                    if i == j && v != 0.0 {
                        return Err(PlanError::BadInput(format!(
                            "{name} matrix diagonal [{i}][{i}] must be 0, got {v}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn time_s(&self, from: usize, to: usize) -> f64 {
        self.time[from][to]
    }

    pub fn distance_m(&self, from: usize, to: usize) -> f64 {
        self.distance[from][to]
    }
}

/// Namespace for deterministic snapshot ids.
const SNAPSHOT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1e_9a5c_4d2b_4e8f_9c07_3b1a_d5e2_8c41);

/// Deterministic id over the stop set and matrix pair. Two identical
/// snapshots hash to the same id; any stop or matrix change produces a
/// different one, which is how stale plan artifacts are detected.
pub fn snapshot_id(stops: &StopSet, matrices: &MatrixPair) -> Uuid {
    let mut bytes = Vec::new();
    for stop in &stops.stops {
        bytes.extend_from_slice(stop.id.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&stop.coordinates.lon.to_bits().to_be_bytes());
        bytes.extend_from_slice(&stop.coordinates.lat.to_bits().to_be_bytes());
        bytes.extend_from_slice(&stop.demand.to_be_bytes());
    }
    for m in [&matrices.time, &matrices.distance] {
        for row in m {
            for v in row {
                bytes.extend_from_slice(&v.to_bits().to_be_bytes());
            }
        }
    }
    Uuid::new_v5(&SNAPSHOT_NAMESPACE, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(id: &str, lon: f64, lat: f64, demand: u32) -> Stop {
        Stop {
            id: id.to_string(),
            name: id.to_string(),
            coordinates: Coordinates { lon, lat },
            demand,
        }
    }

    fn square(values: [[f64; 2]; 2]) -> Vec<Vec<f64>> {
        values.iter().map(|row| row.to_vec()).collect()
    }

    #[test]
    fn validate_accepts_well_formed_pair() {
        let m = MatrixPair {
            time: square([[0.0, 10.0], [12.0, 0.0]]),
            distance: square([[0.0, 100.0], [120.0, 0.0]]),
            size: 2,
        };
        assert!(m.validate(2).is_ok());
    }

    #[test]
    fn validate_rejects_dimension_mismatch() {
        let m = MatrixPair {
            time: square([[0.0, 10.0], [12.0, 0.0]]),
            distance: square([[0.0, 100.0], [120.0, 0.0]]),
            size: 2,
        };
        assert!(matches!(m.validate(3), Err(PlanError::BadInput(_))));
    }

    #[test]
    fn validate_rejects_negative_values() {
        let m = MatrixPair {
            time: square([[0.0, -1.0], [12.0, 0.0]]),
            distance: square([[0.0, 100.0], [120.0, 0.0]]),
            size: 2,
        };
        assert!(matches!(m.validate(2), Err(PlanError::BadInput(_))));
    }

    #[test]
    fn validate_rejects_nonzero_diagonal() {
        let m = MatrixPair {
            time: square([[1.0, 10.0], [12.0, 0.0]]),
            distance: square([[0.0, 100.0], [120.0, 0.0]]),
            size: 2,
        };
        assert!(matches!(m.validate(2), Err(PlanError::BadInput(_))));
    }

    #[test]
    fn snapshot_id_is_deterministic_and_sensitive() {
        let stops = StopSet {
            stops: vec![stop("depot", 127.0, 37.5, 0), stop("a", 127.1, 37.5, 3)],
        };
        let m = MatrixPair {
            time: square([[0.0, 10.0], [12.0, 0.0]]),
            distance: square([[0.0, 100.0], [120.0, 0.0]]),
            size: 2,
        };
        let id1 = snapshot_id(&stops, &m);
        let id2 = snapshot_id(&stops, &m);
        assert_eq!(id1, id2);

        let mut moved = stops.clone();
        moved.stops[1].coordinates.lon = 127.2;
        assert_ne!(id1, snapshot_id(&moved, &m));
    }

    #[test]
    fn total_demand_skips_depot() {
        let stops = StopSet {
            stops: vec![stop("depot", 0.0, 0.0, 0), stop("a", 1.0, 0.0, 3), stop("b", 2.0, 0.0, 4)],
        };
        assert_eq!(stops.total_demand(), 7);
    }
}
