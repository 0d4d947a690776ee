use updater_domain::FailureCode;

/// Values substituted into playbook templates. Anything unknown at render
/// time stays a literal `{placeholder}` so the operator sees exactly which
/// detail was missing.
#[derive(Debug, Clone, Default)]
pub struct PlaybookContext {
    pub backup_path: Option<String>,
    pub container_name: Option<String>,
    pub image_repo: Option<String>,
    pub base_url: Option<String>,
    pub http_port: Option<String>,
}

impl PlaybookContext {
    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "backupPath" => self.backup_path.as_deref(),
            "containerName" => self.container_name.as_deref(),
            "imageRepo" => self.image_repo.as_deref(),
            "baseURL" => self.base_url.as_deref(),
            "httpPort" => self.http_port.as_deref(),
            _ => None,
        }
    }
}

/// Render the remediation document for a failure code.
pub fn render_playbook(code: FailureCode, ctx: &PlaybookContext) -> String {
    substitute(template_for(code), ctx)
}

fn template_for(code: FailureCode) -> &'static str {
    use FailureCode::*;
    match code {
        PayramContainerNotFound => "\
No running PayRam container was found.
1. Check what is running: docker ps
2. If the container exists but is stopped: docker start {containerName}
3. If it was removed, re-run it from the last known image of {imageRepo} and restore {backupPath} if data is missing.",

        PayramVersionParseFailed => "\
Running PayRam containers were found but none carries a semver image tag.
1. Check the running tags: docker ps --format '{{.Image}}'
2. Re-tag or re-run the container with an explicit version tag (not 'latest'), then retry.",

        ContainerNameUnresolved => "\
The target container name could not be resolved.
1. Set PAYRAM_UPDATER_CONTAINER_NAME explicitly, or
2. ensure the deployment manifest provides defaults.containerName, or
3. start the PayRam container so discovery can find it.",

        CorePortUnidentified => "\
No published port answered as the PayRam application.
1. Confirm the container publishes its HTTP port: docker port {containerName}
2. Confirm the application responds locally: curl http://127.0.0.1:{httpPort}/
3. Retry once the application is reachable.",

        PolicyFetchFailed => "\
The release policy could not be fetched.
1. Check outbound connectivity from this host.
2. Retry later; the policy service may be briefly unavailable.
3. A manual upgrade with an explicit version does not need the policy: payram-updater run --mode manual --target <version>.",

        PolicyInvalidJson => "\
The release policy was fetched but does not parse.
1. Retry later; a partial rollout of the policy file can cause this.
2. If it persists, report the problem; do not upgrade until the policy parses.",

        ManifestFetchFailed => "\
The deployment manifest could not be fetched.
1. Check outbound connectivity from this host.
2. Retry later; the manifest service may be briefly unavailable.",

        ManifestInvalidJson => "\
The deployment manifest was fetched but does not parse.
1. Retry later.
2. If it persists, report the problem; the manifest names the image repository and cannot be guessed.",

        ManualUpgradeRequired => "\
This version is declared a breakpoint: dashboard upgrades are refused.
1. Read the linked notes in the failure message before proceeding.
2. Complete any prerequisite steps they describe.
3. Run the upgrade manually: payram-updater run --mode manual --target <version>.",

        DockerDaemonDown => "\
The container runtime is not responding.
1. Check the daemon: systemctl status docker
2. Start it if needed: systemctl start docker
3. Verify with docker info, then retry the upgrade. The PayRam container was not touched.",

        DiskSpaceLow => "\
Not enough free disk space for a safe upgrade.
1. The failure message names the path and the shortfall.
2. Prune old backups (payram-updater backup prune) or old images (docker image prune).
3. Retry once enough space is free. Nothing was changed.",

        RuntimeInspectionFailed => "\
The running container could not be inspected.
1. Verify the container exists: docker inspect {containerName}
2. Retry; if inspection keeps failing, restart the docker daemon and retry again.",

        DockerRunBuildFailed => "\
The replacement container's run arguments could not be reconstructed.
1. The failure message names the missing field (often a mount without a destination).
2. Fix the container's configuration and retry. The running container was not touched.",

        CredentialsRequired => "\
POSTGRES_* names a remote database but the credentials are incomplete.
1. Export POSTGRES_HOST, POSTGRES_PORT, POSTGRES_DATABASE, POSTGRES_USERNAME and POSTGRES_PASSWORD.
2. Retry the upgrade.",

        CredentialsUnavailable => "\
No database credentials could be resolved.
1. For a remote database: export the POSTGRES_* variables.
2. For a local database: start the PayRam container so its environment can be read.
3. Alternatively create db.env next to the backups with the POSTGRES_* values.",

        InvalidDbConfig => "\
The resolved database configuration is invalid.
1. The failure message names the missing field.
2. Correct the POSTGRES_* source it came from and retry.",

        BackupFailed => "\
The pre-upgrade database backup failed; the container was not touched.
1. Check connectivity and credentials with: pg_dump --schema-only
2. Check free space in the backup directory.
3. Retry the upgrade once a manual dump succeeds.",

        BackupFailedAfterQuiesce => "\
The backup failed after internal programs were stopped.
1. The updater attempted to restart the stopped programs automatically.
2. Verify they run again: docker exec {containerName} supervisorctl status
3. If any are stopped, start them: docker exec {containerName} supervisorctl start all
4. Fix the backup problem (see the failure message) and retry.",

        BackupTimeout => "\
The database backup exceeded its time budget.
1. Raise PAYRAM_UPDATER_BACKUP_TIMEOUT_SECONDS for a large database.
2. Retry during a quieter period.",

        InvalidBackupFormat => "\
The backup file has an unsupported extension.
1. Only .sql (plain) and .dump (pg_restore custom) are restorable.
2. Pick a file produced by this updater: payram-updater backup list.",

        ContainerNotFound => "\
The container targeted by this operation does not exist.
1. Check docker ps -a for its state.
2. If it was removed, re-run it from {imageRepo} and restore {backupPath} if needed.",

        SupervisorctlFailed => "\
Controlling the in-container programs failed.
1. Inspect supervisor state: docker exec {containerName} supervisorctl status
2. If supervisord itself is down, restart the container: docker restart {containerName}
3. Retry the upgrade.",

        DockerPullFailed => "\
The new image could not be pulled; the old container is still running.
1. Check registry connectivity and authentication: docker pull {imageRepo}:<tag>
2. Retry once the pull succeeds by hand. No recovery is needed.",

        DockerError => "\
The replace phase failed between stopping the old container and verifying the new one.
1. Check the current state: docker ps -a
2. Re-run the previous container version from {imageRepo}.
3. If data was written by a partially started new version, restore the backup:
   payram-updater backup restore {backupPath} --yes
4. Verify the application at {baseURL} before retrying the upgrade.",

        HealthcheckFailed => "\
The new container started but never became healthy.
1. Read its logs: docker logs {containerName}
2. To roll back: stop and remove the new container, re-run the previous version from {imageRepo}, and restore the backup:
   payram-updater backup restore {backupPath} --yes
3. Report the unhealthy version before retrying.",

        VersionMismatch => "\
The new container reports a version different from the resolved target.
1. Confirm what is running: docker exec {containerName} cat VERSION  (or GET {baseURL}/api/version)
2. The registry tag may have been re-pushed; pull again and compare digests.
3. To roll back, re-run the previous version from {imageRepo} and restore {backupPath} if needed.",
    }
}

/// Replace `{placeholder}` tokens with context values; unknown or missing
/// placeholders stay literal.
fn substitute(template: &str, ctx: &PlaybookContext) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        result.push_str(&rest[..start]);
        let after = &rest[start..];
        match after.find('}') {
            Some(end) => {
                let token = &after[1..end];
                match ctx.lookup(token) {
                    Some(value) => result.push_str(value),
                    None => result.push_str(&after[..=end]),
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(after);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: [FailureCode; 26] = [
        FailureCode::PayramContainerNotFound,
        FailureCode::PayramVersionParseFailed,
        FailureCode::ContainerNameUnresolved,
        FailureCode::CorePortUnidentified,
        FailureCode::PolicyFetchFailed,
        FailureCode::PolicyInvalidJson,
        FailureCode::ManifestFetchFailed,
        FailureCode::ManifestInvalidJson,
        FailureCode::ManualUpgradeRequired,
        FailureCode::DockerDaemonDown,
        FailureCode::DiskSpaceLow,
        FailureCode::RuntimeInspectionFailed,
        FailureCode::DockerRunBuildFailed,
        FailureCode::CredentialsRequired,
        FailureCode::CredentialsUnavailable,
        FailureCode::InvalidDbConfig,
        FailureCode::BackupFailed,
        FailureCode::BackupFailedAfterQuiesce,
        FailureCode::BackupTimeout,
        FailureCode::InvalidBackupFormat,
        FailureCode::ContainerNotFound,
        FailureCode::SupervisorctlFailed,
        FailureCode::DockerPullFailed,
        FailureCode::DockerError,
        FailureCode::HealthcheckFailed,
        FailureCode::VersionMismatch,
    ];

    #[test]
    fn every_code_has_a_playbook() {
        for code in ALL_CODES {
            let text = render_playbook(code, &PlaybookContext::default());
            assert!(!text.trim().is_empty(), "{} has an empty playbook", code);
        }
    }

    #[test]
    fn known_placeholders_are_substituted() {
        let ctx = PlaybookContext {
            backup_path: Some("/var/lib/payram/backups/b.dump".into()),
            container_name: Some("core".into()),
            image_repo: Some("payramapp/payram".into()),
            base_url: Some("http://127.0.0.1:8080".into()),
            http_port: Some("8080".into()),
        };
        let text = render_playbook(FailureCode::DockerError, &ctx);
        assert!(text.contains("/var/lib/payram/backups/b.dump"));
        assert!(text.contains("payramapp/payram"));
        assert!(!text.contains("{backupPath}"));
    }

    #[test]
    fn missing_placeholders_stay_literal() {
        let text = render_playbook(FailureCode::DockerError, &PlaybookContext::default());
        assert!(text.contains("{backupPath}"));
        assert!(text.contains("{imageRepo}"));
    }

    #[test]
    fn unknown_tokens_are_untouched() {
        // docker format strings look like placeholders and must survive
        let text = render_playbook(
            FailureCode::PayramVersionParseFailed,
            &PlaybookContext::default(),
        );
        assert!(text.contains("{{.Image}}"));
    }

    #[test]
    fn recoverable_zone_codes_describe_restore() {
        let ctx = PlaybookContext {
            backup_path: Some("/b/x.dump".into()),
            ..Default::default()
        };
        for code in [
            FailureCode::DockerError,
            FailureCode::HealthcheckFailed,
        ] {
            let text = render_playbook(code, &ctx);
            assert!(text.contains("backup restore /b/x.dump"), "{} lacks restore steps", code);
        }
    }
}
