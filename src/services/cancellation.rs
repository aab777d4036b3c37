//! Cancellation registry for long-running operations.
//!
//! Optimizer solves and edit-delta runs register here under their request
//! id. Cancellation is cooperative: the optimizer checks between
//! improvement passes, the delta engine between vehicle starts. RAII
//! cleanup via `JobGuard`.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Global cancellation registry singleton
pub static CANCELLATION: Lazy<CancellationRegistry> = Lazy::new(CancellationRegistry::default);

/// RAII guard that automatically removes the job from the registry when
/// dropped. Must be kept alive for the duration of the operation.
pub struct JobGuard {
    job_id: Uuid,
    registry: CancellationRegistry,
}

impl JobGuard {
    pub fn token(&self) -> CancellationToken {
        self.registry
            .jobs
            .lock()
            .get(&self.job_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
    }
}

/// Thread-safe registry of active jobs and their cancellation tokens.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CancellationRegistry {
    /// Register a job. The returned guard must be held in scope while the
    /// job runs; dropping it removes the entry.
    pub fn register(&self, job_id: Uuid) -> JobGuard {
        self.jobs.lock().insert(job_id, CancellationToken::new());
        JobGuard { job_id, registry: self.clone() }
    }

    /// Cancel a job. Returns false when the job is not registered (already
    /// finished or never started).
    pub fn cancel(&self, job_id: &Uuid) -> bool {
        match self.jobs.lock().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Check if a job has been cancelled. Called inside processing loops.
    pub fn is_cancelled(&self, job_id: &Uuid) -> bool {
        self.jobs.lock().get(job_id).map_or(false, |t| t.is_cancelled())
    }

    /// Remove a finished job from the registry.
    pub fn remove(&self, job_id: &Uuid) {
        self.jobs.lock().remove(job_id);
    }

    #[cfg(test)]
    fn contains(&self, job_id: &Uuid) -> bool {
        self.jobs.lock().contains_key(job_id)
    }
}
