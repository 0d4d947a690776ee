use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use updater_docker::{discover_core, split_image_tag};
use updater_domain::{compare_versions, JobState, UpgradeMode};
use updater_store::StateStore;

use crate::runner::Runner;

/// Why an auto-update tick did or did not start a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Started(String),
    UpToDate,
    /// A job is currently running.
    SkippedActive,
    /// The latest job failed; operator intervention is required before the
    /// loop may try again.
    SkippedFailed,
    Unavailable(String),
}

/// Periodic dashboard-mode poll: when the policy advertises a version newer
/// than the running instance, start an upgrade through the same gate as any
/// other request.
pub async fn auto_update_loop(runner: Arc<Runner>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "auto-update loop started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick fires immediately; skip it so startup stays quiet
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match poll_once(&runner).await {
            PollOutcome::Started(job_id) => info!(job_id = %job_id, "auto-update started a job"),
            PollOutcome::UpToDate => debug!("auto-update: already on the latest version"),
            PollOutcome::SkippedActive => debug!("auto-update: a job is active, skipping"),
            PollOutcome::SkippedFailed => {
                warn!("auto-update: last job failed, waiting for operator intervention")
            }
            PollOutcome::Unavailable(reason) => debug!(reason = %reason, "auto-update: skipped"),
        }
    }
}

pub async fn poll_once(runner: &Runner) -> PollOutcome {
    let orchestrator = runner.orchestrator();

    match orchestrator.store.load_job().await {
        Ok(Some(job)) if job.state.is_active() => return PollOutcome::SkippedActive,
        Ok(Some(job)) if job.state == JobState::Failed => return PollOutcome::SkippedFailed,
        Ok(_) => {}
        Err(e) => return PollOutcome::Unavailable(format!("store: {}", e)),
    }

    let policy = match orchestrator.fetcher.fetch_policy().await {
        Ok(policy) => policy,
        Err(e) => return PollOutcome::Unavailable(e.message),
    };

    let current = match discover_core(
        orchestrator.driver.as_ref(),
        &orchestrator.settings.image_pattern,
    )
    .await
    {
        Ok(container) => split_image_tag(&container.image).1,
        Err(e) => return PollOutcome::Unavailable(e.message),
    };

    if compare_versions(&policy.latest, &current) != std::cmp::Ordering::Greater {
        return PollOutcome::UpToDate;
    }

    info!(current = %current, latest = %policy.latest, "newer version advertised");
    match runner.try_start(UpgradeMode::Dashboard, "latest").await {
        Ok(job) => PollOutcome::Started(job.job_id),
        Err(e) => PollOutcome::Unavailable(e.to_string()),
    }
}
