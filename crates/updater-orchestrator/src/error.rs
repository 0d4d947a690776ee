use thiserror::Error;
use updater_domain::JobState;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Another job is in an active state; at most one may run at a time.
    #[error("an upgrade job is already active: {job_id} ({state})")]
    Conflict { job_id: String, state: JobState },

    #[error("store error: {0}")]
    Store(#[from] updater_store::StoreError),
}
