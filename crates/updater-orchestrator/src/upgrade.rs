use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use updater_db::{persist_credentials, resolve_credentials, BackupManager, CreatedBackup};
use updater_docker::{
    build_run_args, discover_core, inspect_runtime, quiesce, restart_programs, split_image_tag,
    ContainerDriver, QuiesceOutcome,
};
use updater_domain::{
    EventStatus, EventType, Failure, FailureCode, HistoryEvent, JobState, UpgradeJob,
};
use updater_store::StateStore;

use crate::preflight::{check_daemon, check_disks, required_backup_space_gb, DiskCheck};
use crate::verify::{is_legacy_target, verify_legacy_version};
use crate::{plan::PlanRequest, Orchestrator};

const BACKUP_ATTEMPTS_AFTER_QUIESCE: u32 = 3;
const BACKUP_RETRY_WAIT: Duration = Duration::from_secs(2);
/// Minimum free space on the state directory's filesystem.
const STATE_DIR_MIN_FREE_GB: f64 = 0.2;

impl Orchestrator {
    /// Drive one upgrade job through every phase. Failures never propagate:
    /// they terminate the job with the narrowest failure code, and the store
    /// holds the final record either way.
    pub async fn execute(&self, mut job: UpgradeJob) {
        self.log(&format!(
            "job {} started: {} upgrade, target {}",
            job.job_id, job.mode, job.requested_target
        ))
        .await;
        self.history(
            HistoryEvent::new(
                EventType::Upgrade,
                EventStatus::Started,
                format!("upgrade to {} requested", job.requested_target),
                Utc::now(),
            )
            .with_data("jobId", &job.job_id)
            .with_data("mode", job.mode.as_str()),
        )
        .await;

        if let Err(failure) = self.drive(&mut job).await {
            self.fail_job(&mut job, failure).await;
        }
    }

    /// The phase sequence. Any `?` here is a terminal job failure.
    async fn drive(&self, job: &mut UpgradeJob) -> Result<(), Failure> {
        // ── Policy ────────────────────────────────────────────────────────────
        let req = PlanRequest {
            mode: job.mode,
            requested_target: job.requested_target.clone(),
        };
        let (policy, resolved_target) = self.plan_target(&req).await?;
        crate::fetch::check_breakpoint(&policy, &resolved_target, job.mode)?;
        job.resolved_target = resolved_target.clone();
        self.persist(job).await;
        self.log(&format!("target resolved to {}", resolved_target)).await;

        // ── Manifest ──────────────────────────────────────────────────────────
        job.set_state(JobState::ManifestFetching, Utc::now());
        self.persist(job).await;
        let manifest = self.fetcher.fetch_manifest().await?;
        job.set_state(JobState::Ready, Utc::now());
        self.persist(job).await;

        // ── Discovery & inspection ────────────────────────────────────────────
        let container = discover_core(self.driver.as_ref(), &self.settings.image_pattern).await?;
        self.log(&format!(
            "discovered {} running {}",
            container.name, container.image
        ))
        .await;

        let runtime = inspect_runtime(self.driver.as_ref(), &container.id)
            .await
            .map_err(|e| {
                Failure::new(
                    FailureCode::RuntimeInspectionFailed,
                    format!("inspecting {}: {}", container.name, e),
                )
            })?;
        let from_version = runtime.image_tag.clone();

        let container_name = self.resolve_container_name(&manifest).await?;
        let new_image = format!("{}:{}", manifest.image.repo, resolved_target);

        // Build the run argv before anything destructive happens; a state we
        // cannot reconstruct must fail while the old container still runs.
        let run_args = build_run_args(
            &runtime,
            &container_name,
            &manifest.image.repo,
            &resolved_target,
        )?;

        // ── Preflight ─────────────────────────────────────────────────────────
        check_daemon(self.driver.as_ref()).await?;

        let (db_config, cred_source) = resolve_credentials(
            self.driver.as_ref(),
            &self.settings.image_pattern,
            &self.settings.backup_dir,
        )
        .await?;
        db_config
            .validate()
            .map_err(|e| Failure::new(FailureCode::InvalidDbConfig, e.to_string()))?;
        self.log(&format!("database credentials resolved from {}", cred_source))
            .await;

        let db_container = db_config.is_local().then(|| container.name.clone());
        let (required_gb, size_defaulted) = required_backup_space_gb(
            self.tool.as_ref(),
            &db_config,
            db_container.as_deref(),
        )
        .await;
        if size_defaulted {
            self.log(&format!(
                "database size unknown, requiring {:.1} GiB free for the backup",
                required_gb
            ))
            .await;
        }

        tokio::fs::create_dir_all(&self.settings.backup_dir)
            .await
            .map_err(|e| {
                Failure::new(
                    FailureCode::DiskSpaceLow,
                    format!(
                        "backup directory {} cannot be created: {}",
                        self.settings.backup_dir.display(),
                        e
                    ),
                )
            })?;
        check_disks(&[
            DiskCheck {
                path: self.settings.backup_dir.clone(),
                min_free_gb: required_gb,
                purpose: "database backup".to_string(),
                fail_if_missing: true,
            },
            DiskCheck {
                path: self.settings.state_dir.clone(),
                min_free_gb: STATE_DIR_MIN_FREE_GB,
                purpose: "job state".to_string(),
                fail_if_missing: false,
            },
        ])?;

        // ── Dry-run gate ──────────────────────────────────────────────────────
        if self.settings.dry_run {
            self.log(&format!("dry run: docker {}", run_args.join(" "))).await;
            job.message = format!("dry run: would replace {} with {}", container.name, new_image);
            job.set_state(JobState::Ready, Utc::now());
            self.persist(job).await;
            self.history(
                HistoryEvent::new(
                    EventType::Upgrade,
                    EventStatus::Validated,
                    format!("dry run for {} validated", resolved_target),
                    Utc::now(),
                )
                .with_data("jobId", &job.job_id),
            )
            .await;
            return Ok(());
        }

        // ── Backup (with optional quiesce) ────────────────────────────────────
        job.set_state(JobState::BackingUp, Utc::now());
        self.persist(job).await;
        self.history(
            HistoryEvent::new(
                EventType::Backup,
                EventStatus::Started,
                format!("backup before upgrade to {}", resolved_target),
                Utc::now(),
            )
            .with_data("jobId", &job.job_id),
        )
        .await;

        let quiesced = quiesce(self.driver.as_ref(), &container.name, &[], &[]).await?;
        if quiesced.skipped {
            self.log("no supervisor tool in the container, backing up while it runs")
                .await;
        } else if !quiesced.stopped.is_empty() {
            self.log(&format!("quiesced programs: {}", quiesced.stopped.join(", ")))
                .await;
        }

        let manager = BackupManager::new(
            self.tool.clone(),
            &self.settings.backup_dir,
            self.settings.backup_timeout(),
        );
        let created = match self
            .run_backup(&manager, &db_config, db_container.as_deref(), &from_version, &resolved_target, &quiesced)
            .await
        {
            Ok(created) => created,
            Err(failure) => {
                self.history(
                    HistoryEvent::new(
                        EventType::Backup,
                        EventStatus::Failed,
                        failure.message.clone(),
                        Utc::now(),
                    )
                    .with_data("jobId", &job.job_id),
                )
                .await;
                if !quiesced.skipped && !quiesced.stopped.is_empty() {
                    if let Err(e) =
                        restart_programs(self.driver.as_ref(), &container.name, &quiesced.stopped)
                            .await
                    {
                        warn!(error = %e, "program restart after failed backup also failed");
                    }
                }
                return Err(failure);
            }
        };

        job.backup_path = created.path.display().to_string();
        job.backup_sha256 = Some(created.sha256.clone());
        self.persist(job).await;
        self.log(&format!(
            "backup written: {} ({} bytes, sha256 {})",
            created.backup.file_name, created.backup.size_bytes, created.sha256
        ))
        .await;
        self.history(
            HistoryEvent::new(
                EventType::Backup,
                EventStatus::Succeeded,
                format!("backup {} created", created.backup.file_name),
                Utc::now(),
            )
            .with_data("jobId", &job.job_id)
            .with_data("file", &created.backup.file_name)
            .with_data("sha256", &created.sha256),
        )
        .await;

        // Credentials persist only after a successful backup, local DBs only.
        if db_config.is_local() {
            match persist_credentials(&db_config, &self.settings.backup_dir) {
                Ok(path) => self.log(&format!("credentials persisted to {}", path.display())).await,
                Err(e) => warn!(error = %e, "credential persistence failed"),
            }
        }

        // ── Replace ───────────────────────────────────────────────────────────
        job.set_state(JobState::Executing, Utc::now());
        self.persist(job).await;

        if let Err(e) = self.driver.pull(&new_image).await {
            // SAFE zone: the old container is untouched; undo the quiesce.
            if !quiesced.stopped.is_empty() {
                if let Err(restart) =
                    restart_programs(self.driver.as_ref(), &container.name, &quiesced.stopped).await
                {
                    warn!(error = %restart, "program restart after failed pull also failed");
                }
            }
            return Err(Failure::new(
                FailureCode::DockerPullFailed,
                format!("pulling {}: {}", new_image, e),
            ));
        }
        self.log(&format!("pulled {}", new_image)).await;
        self.log("entering recoverable zone: stopping the old container").await;

        let docker_err = |step: &str, e: updater_docker::DriverError| {
            Failure::new(FailureCode::DockerError, format!("{}: {}", step, e))
        };
        self.driver
            .stop(&container.id)
            .await
            .map_err(|e| docker_err("stopping old container", e))?;
        self.driver
            .remove(&container.id)
            .await
            .map_err(|e| docker_err("removing old container", e))?;
        self.driver
            .run(&run_args)
            .await
            .map_err(|e| docker_err("starting new container", e))?;

        let running = self
            .driver
            .inspect_raw(&container_name)
            .await
            .ok()
            .and_then(|doc| doc.pointer("/State/Running").and_then(|v| v.as_bool()))
            .unwrap_or(false);
        if !running {
            return Err(Failure::new(
                FailureCode::DockerError,
                format!("new container {} is not running after start", container_name),
            ));
        }
        self.log(&format!("new container {} is running", container_name)).await;

        // ── Verify ────────────────────────────────────────────────────────────
        job.set_state(JobState::Verifying, Utc::now());
        self.persist(job).await;

        let new_runtime = inspect_runtime(self.driver.as_ref(), &container_name)
            .await
            .map_err(|e| {
                Failure::new(
                    FailureCode::RuntimeInspectionFailed,
                    format!("inspecting new container: {}", e),
                )
            })?;
        let port = self.ports.identify(&new_runtime).await?;
        let base_url = format!("http://127.0.0.1:{}", port.host_port);

        if is_legacy_target(&resolved_target, &policy) {
            self.log("target predates the in-app updater API, using legacy verification")
                .await;
            self.verifier.verify_legacy_health(&base_url).await?;
            verify_legacy_version(self.driver.as_ref(), &new_image, &resolved_target).await?;
        } else {
            self.verifier.verify_health(&base_url).await?;
            self.verifier.verify_version(&base_url, &resolved_target).await?;
        }

        // ── Success & finalize ────────────────────────────────────────────────
        job.message = format!("upgraded {} from {} to {}", container_name, from_version, resolved_target);
        job.set_state(JobState::Ready, Utc::now());
        self.persist(job).await;
        self.log(&format!("job {} succeeded", job.job_id)).await;
        self.history(
            HistoryEvent::new(
                EventType::Upgrade,
                EventStatus::Succeeded,
                job.message.clone(),
                Utc::now(),
            )
            .with_data("jobId", &job.job_id)
            .with_data("fromVersion", &from_version)
            .with_data("toVersion", &resolved_target),
        )
        .await;

        // Old images and old backups are cleanup, never job failures.
        let (_, new_tag) = split_image_tag(&new_image);
        if let Err(e) = self.driver.image_prune(&manifest.image.repo, &new_tag).await {
            warn!(error = %e, "image prune failed");
        }
        match manager.prune(self.settings.retention).await {
            Ok(deleted) if !deleted.is_empty() => {
                self.log(&format!("pruned {} old backups", deleted.len())).await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "backup prune failed"),
        }

        Ok(())
    }

    async fn run_backup(
        &self,
        manager: &BackupManager,
        db_config: &updater_domain::DbConfig,
        db_container: Option<&str>,
        from_version: &str,
        to_version: &str,
        quiesced: &QuiesceOutcome,
    ) -> Result<CreatedBackup, Failure> {
        let attempts = if quiesced.skipped { 1 } else { BACKUP_ATTEMPTS_AFTER_QUIESCE };

        let mut last_err: Option<updater_db::DbError> = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(BACKUP_RETRY_WAIT).await;
                self.log(&format!("retrying backup, attempt {}/{}", attempt, attempts)).await;
            }
            match manager
                .create(db_config, db_container, from_version, to_version)
                .await
            {
                Ok(created) => return Ok(created),
                Err(e) => {
                    warn!(attempt, error = %e, "backup attempt failed");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.expect("at least one attempt ran");
        let code = if quiesced.skipped {
            err.failure_code()
        } else {
            FailureCode::BackupFailedAfterQuiesce
        };
        Err(Failure::new(
            code,
            format!("backup failed after {} attempt(s): {}", attempts, err),
        ))
    }

    /// Best-effort diagnostic snapshot for `/upgrade/inspect`. Each section
    /// degrades to an error string; credentials are reported by locality and
    /// source only.
    pub async fn inspect_system(&self) -> serde_json::Value {
        let docker_ok = self.driver.ping().await.is_ok();

        let container = match discover_core(self.driver.as_ref(), &self.settings.image_pattern).await
        {
            Ok(found) => {
                let runtime = inspect_runtime(self.driver.as_ref(), &found.id).await.ok();
                let port = match &runtime {
                    Some(runtime) => self.ports.identify(runtime).await.ok(),
                    None => None,
                };
                json!({
                    "name": found.name,
                    "image": found.image,
                    "runtime": runtime,
                    "applicationPort": port,
                })
            }
            Err(e) => json!({ "error": e.message }),
        };

        let database = match resolve_credentials(
            self.driver.as_ref(),
            &self.settings.image_pattern,
            &self.settings.backup_dir,
        )
        .await
        {
            Ok((cfg, source)) => json!({
                "local": cfg.is_local(),
                "source": source.to_string(),
            }),
            Err(e) => json!({ "error": e.message }),
        };

        let policy = match self.fetcher.fetch_policy().await {
            Ok(policy) => json!({ "latest": policy.latest, "releases": policy.releases.len() }),
            Err(e) => json!({ "error": e.message }),
        };
        let manifest = match self.fetcher.fetch_manifest().await {
            Ok(manifest) => json!({
                "imageRepo": manifest.image.repo,
                "containerName": manifest.defaults.container_name,
            }),
            Err(e) => json!({ "error": e.message }),
        };

        let latest_job = self.store.load_job().await.ok().flatten();

        json!({
            "docker": { "reachable": docker_ok },
            "imagePattern": self.settings.image_pattern,
            "stateDir": self.settings.state_dir,
            "backupDir": self.settings.backup_dir,
            "dryRun": self.settings.dry_run,
            "container": container,
            "database": database,
            "policy": policy,
            "manifest": manifest,
            "latestJob": latest_job,
        })
    }

    // ── Record-keeping helpers ───────────────────────────────────────────────

    pub(crate) async fn persist(&self, job: &UpgradeJob) {
        if let Err(e) = self.store.save_job(job).await {
            warn!(error = %e, "job record save failed");
        }
    }

    pub(crate) async fn log(&self, message: &str) {
        info!("{}", message);
        let line = format!("{} {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"), message);
        if let Err(e) = self.store.append_log(&line).await {
            warn!(error = %e, "log append failed");
        }
    }

    pub(crate) async fn history(&self, event: HistoryEvent) {
        if let Err(e) = self.store.append_event(&event).await {
            warn!(error = %e, "history append failed");
        }
    }

    pub(crate) async fn fail_job(&self, job: &mut UpgradeJob, failure: Failure) {
        self.log(&format!("job {} failed: {}", job.job_id, failure)).await;
        job.mark_failed(failure.code, failure.message.clone(), Utc::now());
        self.persist(job).await;
        self.history(
            HistoryEvent::new(EventType::Upgrade, EventStatus::Failed, failure.message, Utc::now())
                .with_data("jobId", &job.job_id)
                .with_data("failureCode", failure.code.as_str()),
        )
        .await;
    }
}
