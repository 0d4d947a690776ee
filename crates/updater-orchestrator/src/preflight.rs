use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::warn;
use updater_db::DbBackupTool;
use updater_docker::ContainerDriver;
use updater_domain::{DbConfig, Failure, FailureCode};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Floor for the backup volume when the database size is known.
const MIN_BACKUP_GB: f64 = 1.0;
/// Headroom factor over the reported database size.
const BACKUP_FACTOR: f64 = 1.5;
/// Fallback requirement when the size query fails.
const DEFAULT_BACKUP_GB: f64 = 2.0;

const DB_SIZE_TIMEOUT: Duration = Duration::from_secs(15);

/// One free-space requirement to verify before destructive steps.
#[derive(Debug, Clone)]
pub struct DiskCheck {
    pub path: PathBuf,
    pub min_free_gb: f64,
    pub purpose: String,
    /// A nonexistent path fails the check when true, is skipped when false.
    pub fail_if_missing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskStatus {
    pub path: String,
    pub purpose: String,
    pub required_gb: f64,
    pub available_gb: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightReport {
    pub required_backup_gb: f64,
    /// True when the database size query failed and the default was used.
    pub db_size_defaulted: bool,
    pub disks: Vec<DiskStatus>,
}

/// Container runtime liveness. Runs first; nothing else is meaningful when
/// the daemon is down.
pub async fn check_daemon(driver: &dyn ContainerDriver) -> Result<(), Failure> {
    driver.ping().await.map_err(|e| {
        Failure::new(
            FailureCode::DockerDaemonDown,
            format!(
                "container runtime is not responding ({}); start the docker service and retry",
                e
            ),
        )
    })
}

/// Free space the backup volume must offer, derived from the live database
/// size. A failed size query degrades to a fixed default with a warning
/// rather than blocking the upgrade.
pub async fn required_backup_space_gb(
    tool: &dyn DbBackupTool,
    cfg: &DbConfig,
    container: Option<&str>,
) -> (f64, bool) {
    match tool.size(cfg, container, DB_SIZE_TIMEOUT).await {
        Ok(bytes) => {
            let db_gb = bytes as f64 / GIB;
            (MIN_BACKUP_GB.max(BACKUP_FACTOR * db_gb), false)
        }
        Err(e) => {
            warn!(error = %e, "database size query failed, assuming {} GiB", DEFAULT_BACKUP_GB);
            (DEFAULT_BACKUP_GB, true)
        }
    }
}

/// Verify every disk requirement against the mounted filesystems.
pub fn check_disks(checks: &[DiskCheck]) -> Result<Vec<DiskStatus>, Failure> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mounts: Vec<(PathBuf, u64)> = disks
        .list()
        .iter()
        .map(|d| (d.mount_point().to_path_buf(), d.available_space()))
        .collect();
    evaluate_disks(checks, &mounts)
}

/// Pure evaluation core, separated so tests can supply synthetic mounts.
pub fn evaluate_disks(
    checks: &[DiskCheck],
    mounts: &[(PathBuf, u64)],
) -> Result<Vec<DiskStatus>, Failure> {
    let mut report = Vec::new();

    for check in checks {
        if !check.path.exists() {
            if check.fail_if_missing {
                return Err(Failure::new(
                    FailureCode::DiskSpaceLow,
                    format!(
                        "required path {} ({}) does not exist",
                        check.path.display(),
                        check.purpose
                    ),
                ));
            }
            continue;
        }

        let Some(available) = available_bytes_for(&check.path, mounts) else {
            // No mount matched; treat like a missing path.
            if check.fail_if_missing {
                return Err(Failure::new(
                    FailureCode::DiskSpaceLow,
                    format!("no filesystem found for {}", check.path.display()),
                ));
            }
            continue;
        };

        let available_gb = available as f64 / GIB;
        if available_gb < check.min_free_gb {
            return Err(Failure::new(
                FailureCode::DiskSpaceLow,
                format!(
                    "{} has {:.2} GiB free on {}, {:.2} GiB required for {}",
                    check.path.display(),
                    available_gb,
                    mount_for(&check.path, mounts)
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    check.min_free_gb,
                    check.purpose
                ),
            ));
        }

        report.push(DiskStatus {
            path: check.path.display().to_string(),
            purpose: check.purpose.clone(),
            required_gb: check.min_free_gb,
            available_gb,
        });
    }

    Ok(report)
}

fn mount_for<'m>(path: &Path, mounts: &'m [(PathBuf, u64)]) -> Option<&'m PathBuf> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    mounts
        .iter()
        .filter(|(mount, _)| canonical.starts_with(mount))
        .max_by_key(|(mount, _)| mount.as_os_str().len())
        .map(|(mount, _)| mount)
}

fn available_bytes_for(path: &Path, mounts: &[(PathBuf, u64)]) -> Option<u64> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    mounts
        .iter()
        .filter(|(mount, _)| canonical.starts_with(mount))
        .max_by_key(|(mount, _)| mount.as_os_str().len())
        .map(|(_, available)| *available)
}
