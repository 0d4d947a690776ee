use std::time::Duration;

use tracing::{debug, info, warn};
use updater_domain::{Failure, FailureCode};

use crate::driver::ContainerDriver;

const SUPERVISORCTL_TIMEOUT: Duration = Duration::from_secs(20);

/// Exit codes the shell reports when a binary is missing or not executable.
const EXIT_NOT_EXECUTABLE: i32 = 126;
const EXIT_NOT_FOUND: i32 = 127;

/// What quiesce did. `stopped` is the exact program set that was stopped and
/// must be restarted if a later phase fails before the container is replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuiesceOutcome {
    pub stopped: Vec<String>,
    /// True when the container has no supervisor tool; nothing was touched.
    pub skipped: bool,
}

/// Stop the Core container's internal programs ahead of a backup.
///
/// Programs are enumerated via `supervisorctl status`; the include list wins
/// over the exclude list when non-empty; only programs in RUNNING or STARTING
/// state are stopped. A container without supervisorctl quiesces nothing and
/// that is not an error.
pub async fn quiesce(
    driver: &dyn ContainerDriver,
    container: &str,
    include: &[String],
    exclude: &[String],
) -> Result<QuiesceOutcome, Failure> {
    let status = driver
        .exec(
            container,
            &["supervisorctl".to_string(), "status".to_string()],
            &[],
            None,
            Some(SUPERVISORCTL_TIMEOUT),
        )
        .await
        .map_err(|e| {
            Failure::new(
                FailureCode::SupervisorctlFailed,
                format!("exec supervisorctl status in {}: {}", container, e),
            )
        })?;

    if status.exit_code == EXIT_NOT_FOUND || status.exit_code == EXIT_NOT_EXECUTABLE {
        debug!(container = %container, "supervisorctl not present, skipping quiesce");
        return Ok(QuiesceOutcome { stopped: Vec::new(), skipped: true });
    }
    // supervisorctl status exits nonzero when any program is not RUNNING;
    // the listing itself is still on stdout, so only unusable output fails.
    let listing = status.stdout_text();
    if listing.trim().is_empty() && status.exit_code != 0 {
        return Err(Failure::new(
            FailureCode::SupervisorctlFailed,
            format!(
                "supervisorctl status exited {} with no output: {}",
                status.exit_code,
                status.stderr.trim()
            ),
        ));
    }

    let targets = select_targets(&listing, include, exclude);
    if targets.is_empty() {
        debug!(container = %container, "no running programs to quiesce");
        return Ok(QuiesceOutcome::default());
    }

    let mut stopped = Vec::new();
    for program in &targets {
        let out = driver
            .exec(
                container,
                &["supervisorctl".to_string(), "stop".to_string(), program.clone()],
                &[],
                None,
                Some(SUPERVISORCTL_TIMEOUT),
            )
            .await
            .map_err(|e| {
                Failure::new(
                    FailureCode::SupervisorctlFailed,
                    format!("exec supervisorctl stop {}: {}", program, e),
                )
            })?;
        if out.exit_code != 0 {
            return Err(Failure::new(
                FailureCode::SupervisorctlFailed,
                format!(
                    "supervisorctl stop {} exited {}: {}",
                    program,
                    out.exit_code,
                    out.stderr.trim()
                ),
            ));
        }
        info!(container = %container, program = %program, "stopped program");
        stopped.push(program.clone());
    }

    Ok(QuiesceOutcome { stopped, skipped: false })
}

/// Restart a previously stopped program set. When any individual start fails
/// the whole container is restarted as a last resort.
pub async fn restart_programs(
    driver: &dyn ContainerDriver,
    container: &str,
    programs: &[String],
) -> Result<(), Failure> {
    let mut need_container_restart = false;

    for program in programs {
        let result = driver
            .exec(
                container,
                &["supervisorctl".to_string(), "start".to_string(), program.clone()],
                &[],
                None,
                Some(SUPERVISORCTL_TIMEOUT),
            )
            .await;
        match result {
            Ok(out) if out.exit_code == 0 => {
                info!(container = %container, program = %program, "restarted program");
            }
            Ok(out) => {
                warn!(
                    container = %container,
                    program = %program,
                    code = out.exit_code,
                    "supervisorctl start failed"
                );
                need_container_restart = true;
            }
            Err(e) => {
                warn!(container = %container, program = %program, error = %e, "exec failed");
                need_container_restart = true;
            }
        }
    }

    if need_container_restart {
        warn!(container = %container, "falling back to a full container restart");
        driver.restart(container).await.map_err(|e| {
            Failure::new(
                FailureCode::SupervisorctlFailed,
                format!("container restart after failed program starts: {}", e),
            )
        })?;
    }
    Ok(())
}

/// Parse `supervisorctl status` output and pick the programs to stop.
fn select_targets(listing: &str, include: &[String], exclude: &[String]) -> Vec<String> {
    let mut targets = Vec::new();
    for line in listing.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(state)) = (fields.next(), fields.next()) else { continue };
        if state != "RUNNING" && state != "STARTING" {
            continue;
        }
        if !include.is_empty() {
            if include.iter().any(|i| i == name) {
                targets.push(name.to_string());
            }
            continue;
        }
        if exclude.iter().any(|e| e == name) {
            continue;
        }
        targets.push(name.to_string());
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ExecOutput;
    use crate::fake::FakeDriver;

    const LISTING: &str = "\
scheduler                        RUNNING   pid 12, uptime 1:02:03
worker                           RUNNING   pid 13, uptime 1:02:03
migrator                         STOPPED   Feb 01 10:00 AM
indexer                          STARTING
";

    #[test]
    fn selects_running_and_starting() {
        let targets = select_targets(LISTING, &[], &[]);
        assert_eq!(targets, vec!["scheduler", "worker", "indexer"]);
    }

    #[test]
    fn include_wins_over_exclude() {
        let include = vec!["worker".to_string()];
        let exclude = vec!["worker".to_string()];
        let targets = select_targets(LISTING, &include, &exclude);
        assert_eq!(targets, vec!["worker"]);
    }

    #[test]
    fn exclude_filters_when_include_empty() {
        let exclude = vec!["worker".to_string()];
        let targets = select_targets(LISTING, &[], &exclude);
        assert_eq!(targets, vec!["scheduler", "indexer"]);
    }

    #[tokio::test]
    async fn missing_supervisorctl_skips_silently() {
        let driver = FakeDriver::new().with_exec_response(ExecOutput {
            stdout: Vec::new(),
            stderr: "sh: supervisorctl: not found".to_string(),
            exit_code: 127,
        });
        let outcome = quiesce(&driver, "core", &[], &[]).await.unwrap();
        assert!(outcome.skipped);
        assert!(outcome.stopped.is_empty());
    }

    #[tokio::test]
    async fn stops_running_programs_and_remembers_them() {
        let driver = FakeDriver::new()
            .with_exec_response(ExecOutput {
                stdout: LISTING.as_bytes().to_vec(),
                stderr: String::new(),
                exit_code: 3,
            })
            .with_exec_response(ExecOutput::default())
            .with_exec_response(ExecOutput::default())
            .with_exec_response(ExecOutput::default());

        let outcome = quiesce(&driver, "core", &[], &[]).await.unwrap();
        assert!(!outcome.skipped);
        assert_eq!(outcome.stopped, vec!["scheduler", "worker", "indexer"]);
    }

    #[tokio::test]
    async fn failed_stop_is_supervisorctl_failure() {
        let driver = FakeDriver::new()
            .with_exec_response(ExecOutput {
                stdout: LISTING.as_bytes().to_vec(),
                stderr: String::new(),
                exit_code: 0,
            })
            .with_exec_response(ExecOutput {
                stdout: Vec::new(),
                stderr: "refused".to_string(),
                exit_code: 1,
            });

        let err = quiesce(&driver, "core", &[], &[]).await.unwrap_err();
        assert_eq!(err.code, FailureCode::SupervisorctlFailed);
    }

    #[tokio::test]
    async fn restart_falls_back_to_container_restart() {
        let driver = FakeDriver::new().with_exec_response(ExecOutput {
            stdout: Vec::new(),
            stderr: "error".to_string(),
            exit_code: 1,
        });
        restart_programs(&driver, "core", &["worker".to_string()])
            .await
            .unwrap();
        assert!(driver.calls().iter().any(|c| c == "restart core"));
    }
}
