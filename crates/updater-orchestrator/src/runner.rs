use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;
use updater_domain::{JobState, UpgradeJob, UpgradeMode};
use updater_store::StateStore;

use crate::error::RunnerError;
use crate::Orchestrator;

/// Owns the "at most one active job" invariant.
///
/// The API's load-and-check leaves a race window between two simultaneous
/// run requests; `try_start` closes it by re-checking the store under a lock
/// immediately before the new job record is saved.
pub struct Runner {
    orchestrator: Arc<Orchestrator>,
    start_lock: Mutex<()>,
    active: Mutex<Option<JoinHandle<()>>>,
}

impl Runner {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Runner {
            orchestrator,
            start_lock: Mutex::new(()),
            active: Mutex::new(None),
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Create a job and start executing it in the background. Returns the
    /// initial job snapshot, or the conflicting job's identity.
    pub async fn try_start(
        &self,
        mode: UpgradeMode,
        requested_target: &str,
    ) -> Result<UpgradeJob, RunnerError> {
        let _guard = self.start_lock.lock().await;

        if let Some(existing) = self.orchestrator.store.load_job().await? {
            if existing.state.is_active() {
                return Err(RunnerError::Conflict {
                    job_id: existing.job_id,
                    state: existing.state,
                });
            }
        }

        let mut job = UpgradeJob::new(mode, requested_target, Utc::now());
        job.set_state(JobState::PolicyFetching, Utc::now());
        self.orchestrator.store.reset_log().await?;
        self.orchestrator.store.save_job(&job).await?;
        info!(job_id = %job.job_id, target = %requested_target, "upgrade job accepted");

        let snapshot = job.clone();
        let orchestrator = self.orchestrator.clone();
        let handle = tokio::spawn(async move {
            orchestrator.execute(job).await;
        });
        *self.active.lock().await = Some(handle);

        Ok(snapshot)
    }

    /// Start a job and wait for it to finish; the CLI path.
    pub async fn run_to_completion(
        &self,
        mode: UpgradeMode,
        requested_target: &str,
    ) -> Result<UpgradeJob, RunnerError> {
        let accepted = self.try_start(mode, requested_target).await?;
        self.wait_for_idle().await;
        let finished = self.orchestrator.store.load_job().await?;
        Ok(finished.unwrap_or(accepted))
    }

    /// Wait for the in-flight job, if any. Used by graceful shutdown; the
    /// running job completes, no new jobs are accepted by the closing server.
    pub async fn wait_for_idle(&self) {
        let handle = self.active.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use updater_config::Settings;
    use updater_db::{DbBackupTool, DbError};
    use updater_docker::FakeDriver;
    use updater_domain::{BackupFormat, DbConfig};
    use updater_store::{InMemoryStore, StateStore};

    struct NullTool;

    #[async_trait]
    impl DbBackupTool for NullTool {
        async fn dump(
            &self,
            _: &DbConfig,
            _: &Path,
            _: BackupFormat,
            _: Option<&str>,
            _: Duration,
        ) -> Result<(), DbError> {
            Ok(())
        }
        async fn restore(
            &self,
            _: &DbConfig,
            _: &Path,
            _: BackupFormat,
            _: Option<&str>,
            _: Duration,
        ) -> Result<(), DbError> {
            Ok(())
        }
        async fn size(&self, _: &DbConfig, _: Option<&str>, _: Duration) -> Result<u64, DbError> {
            Ok(0)
        }
    }

    fn runner_with_store(store: Arc<InMemoryStore>) -> Arc<Runner> {
        let settings = Settings {
            // unroutable so the job fails fast in POLICY_FETCHING
            policy_url: "http://127.0.0.1:1/policy.json".into(),
            manifest_url: "http://127.0.0.1:1/manifest.json".into(),
            fetch_timeout_seconds: 1,
            ..Default::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(
            settings,
            Arc::new(FakeDriver::new()),
            store,
            Arc::new(NullTool),
        ));
        Runner::new(orchestrator)
    }

    #[tokio::test]
    async fn rejects_while_active() {
        let store = Arc::new(InMemoryStore::new());
        let mut active = UpgradeJob::new(UpgradeMode::Dashboard, "v1.8.0", Utc::now());
        active.set_state(JobState::Executing, Utc::now());
        store.save_job(&active).await.unwrap();

        let runner = runner_with_store(store.clone());
        let err = runner
            .try_start(UpgradeMode::Dashboard, "v1.9.0")
            .await
            .unwrap_err();
        match err {
            RunnerError::Conflict { job_id, state } => {
                assert_eq!(job_id, active.job_id);
                assert_eq!(state, JobState::Executing);
            }
            other => panic!("unexpected error: {}", other),
        }

        // the active record must be untouched
        let stored = store.load_job().await.unwrap().unwrap();
        assert_eq!(stored.job_id, active.job_id);
    }

    #[tokio::test]
    async fn terminal_job_is_superseded() {
        let store = Arc::new(InMemoryStore::new());
        let mut failed = UpgradeJob::new(UpgradeMode::Dashboard, "v1.8.0", Utc::now());
        failed.mark_failed(
            updater_domain::FailureCode::BackupFailed,
            "old failure",
            Utc::now(),
        );
        store.save_job(&failed).await.unwrap();

        let runner = runner_with_store(store.clone());
        let accepted = runner
            .try_start(UpgradeMode::Manual, "v1.9.0")
            .await
            .unwrap();
        assert_ne!(accepted.job_id, failed.job_id);
        assert_eq!(accepted.state, JobState::PolicyFetching);

        runner.wait_for_idle().await;
        let finished = store.load_job().await.unwrap().unwrap();
        assert_eq!(finished.job_id, accepted.job_id);
        // unroutable policy server: MANUAL with explicit target skips policy
        // but the manifest fetch still fails
        assert_eq!(finished.state, JobState::Failed);
        assert!(finished.failure_code.is_some());
    }

    #[tokio::test]
    async fn new_job_starts_with_fresh_log() {
        let store = Arc::new(InMemoryStore::new());
        store.append_log("stale line from previous job").await.unwrap();

        let runner = runner_with_store(store.clone());
        runner.try_start(UpgradeMode::Manual, "v1.9.0").await.unwrap();
        runner.wait_for_idle().await;

        let log = store.read_log().await.unwrap();
        assert!(!log.contains("stale line"));
    }
}
