//! Error taxonomy surfaced to callers.
//!
//! Every variant maps to a stable wire code; handlers serialize the code
//! plus the display message into the error envelope. Input errors must not
//! be retried by callers; transient provider failures are retried inside
//! the directions client and only surface here once attempts are exhausted.

use thiserror::Error;

/// Errors produced by the plan lifecycle services.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Malformed request data: bad matrices, invalid objective combination,
    /// unknown enum code, missing input file.
    #[error("bad input: {0}")]
    BadInput(String),

    /// The instance cannot be solved at all: total demand exceeds fleet
    /// capacity, or a single stop exceeds vehicle capacity.
    #[error("infeasible: {0}")]
    Infeasible(String),

    /// No feasible assignment was found within the time budget.
    #[error("no solution found: {0}")]
    NoSolution(String),

    /// The matrix snapshot no longer matches the current stop set.
    #[error("stale matrix: {0}")]
    StaleMatrix(String),

    /// An edit plan references a stop id that no longer exists.
    #[error("stale reference: {0}")]
    StaleReference(String),

    /// The directions provider could not be reached after bounded retries.
    #[error("directions provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Some vehicles failed to materialize; the artifact was still written.
    #[error("partial materialization, failed vehicles: {failed_vehicle_ids:?}")]
    PartialMaterialization { failed_vehicle_ids: Vec<u32> },

    /// Unknown project or scenario id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller cancelled the operation before it dispatched work.
    #[error("operation cancelled")]
    Cancelled,

    /// A persisted artifact could not be parsed. Fatal: abort and surface.
    #[error("corrupt artifact: {0}")]
    CorruptArtifact(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlanError {
    /// Stable wire code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::BadInput(_) => "BAD_INPUT",
            PlanError::Infeasible(_) => "INFEASIBLE",
            PlanError::NoSolution(_) => "NO_SOLUTION",
            PlanError::StaleMatrix(_) => "STALE_MATRIX",
            PlanError::StaleReference(_) => "STALE_REFERENCE",
            PlanError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            PlanError::PartialMaterialization { .. } => "PARTIAL_MATERIALIZATION",
            PlanError::NotFound(_) => "NOT_FOUND",
            PlanError::Cancelled => "CANCELLED",
            PlanError::CorruptArtifact(_) => "CORRUPT_ARTIFACT",
            PlanError::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(PlanError::BadInput("x".into()).code(), "BAD_INPUT");
        assert_eq!(PlanError::Infeasible("x".into()).code(), "INFEASIBLE");
        assert_eq!(PlanError::NoSolution("x".into()).code(), "NO_SOLUTION");
        assert_eq!(
            PlanError::PartialMaterialization { failed_vehicle_ids: vec![2] }.code(),
            "PARTIAL_MATERIALIZATION"
        );
        assert_eq!(PlanError::NotFound("e1".into()).code(), "NOT_FOUND");
    }

    #[test]
    fn partial_materialization_lists_vehicles() {
        let err = PlanError::PartialMaterialization { failed_vehicle_ids: vec![2, 3] };
        assert!(err.to_string().contains("[2, 3]"));
    }
}
