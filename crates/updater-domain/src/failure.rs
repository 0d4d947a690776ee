use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of terminal failure codes. Every code has a recovery playbook.
///
/// Grouped by the phase that raises it; no phase raises a code from a
/// different group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    // Discovery
    PayramContainerNotFound,
    PayramVersionParseFailed,
    ContainerNameUnresolved,
    CorePortUnidentified,

    // Fetch
    PolicyFetchFailed,
    PolicyInvalidJson,
    ManifestFetchFailed,
    ManifestInvalidJson,

    // Policy decision
    ManualUpgradeRequired,

    // Preflight
    DockerDaemonDown,
    DiskSpaceLow,

    // Inspection / run-args build
    RuntimeInspectionFailed,
    DockerRunBuildFailed,

    // Backup / credentials
    CredentialsRequired,
    CredentialsUnavailable,
    InvalidDbConfig,
    BackupFailed,
    BackupFailedAfterQuiesce,
    BackupTimeout,
    InvalidBackupFormat,
    ContainerNotFound,

    // Supervisor
    SupervisorctlFailed,

    // Replace
    DockerPullFailed,
    DockerError,

    // Verify
    HealthcheckFailed,
    VersionMismatch,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::PayramContainerNotFound => "PAYRAM_CONTAINER_NOT_FOUND",
            FailureCode::PayramVersionParseFailed => "PAYRAM_VERSION_PARSE_FAILED",
            FailureCode::ContainerNameUnresolved => "CONTAINER_NAME_UNRESOLVED",
            FailureCode::CorePortUnidentified => "CORE_PORT_UNIDENTIFIED",
            FailureCode::PolicyFetchFailed => "POLICY_FETCH_FAILED",
            FailureCode::PolicyInvalidJson => "POLICY_INVALID_JSON",
            FailureCode::ManifestFetchFailed => "MANIFEST_FETCH_FAILED",
            FailureCode::ManifestInvalidJson => "MANIFEST_INVALID_JSON",
            FailureCode::ManualUpgradeRequired => "MANUAL_UPGRADE_REQUIRED",
            FailureCode::DockerDaemonDown => "DOCKER_DAEMON_DOWN",
            FailureCode::DiskSpaceLow => "DISK_SPACE_LOW",
            FailureCode::RuntimeInspectionFailed => "RUNTIME_INSPECTION_FAILED",
            FailureCode::DockerRunBuildFailed => "DOCKER_RUN_BUILD_FAILED",
            FailureCode::CredentialsRequired => "CREDENTIALS_REQUIRED",
            FailureCode::CredentialsUnavailable => "CREDENTIALS_UNAVAILABLE",
            FailureCode::InvalidDbConfig => "INVALID_DB_CONFIG",
            FailureCode::BackupFailed => "BACKUP_FAILED",
            FailureCode::BackupFailedAfterQuiesce => "BACKUP_FAILED_AFTER_QUIESCE",
            FailureCode::BackupTimeout => "BACKUP_TIMEOUT",
            FailureCode::InvalidBackupFormat => "INVALID_BACKUP_FORMAT",
            FailureCode::ContainerNotFound => "CONTAINER_NOT_FOUND",
            FailureCode::SupervisorctlFailed => "SUPERVISORCTL_FAILED",
            FailureCode::DockerPullFailed => "DOCKER_PULL_FAILED",
            FailureCode::DockerError => "DOCKER_ERROR",
            FailureCode::HealthcheckFailed => "HEALTHCHECK_FAILED",
            FailureCode::VersionMismatch => "VERSION_MISMATCH",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A terminal phase failure: a code from the closed set plus an operator
/// message. The orchestrator inspects the code and transitions the job to
/// FAILED; the message lands in the job record and the log.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Failure {
    pub code: FailureCode,
    pub message: String,
}

impl Failure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Failure { code, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&FailureCode::PayramContainerNotFound).unwrap();
        assert_eq!(json, "\"PAYRAM_CONTAINER_NOT_FOUND\"");
        let json = serde_json::to_string(&FailureCode::BackupFailedAfterQuiesce).unwrap();
        assert_eq!(json, "\"BACKUP_FAILED_AFTER_QUIESCE\"");
    }

    #[test]
    fn as_str_matches_serde_name() {
        for code in [
            FailureCode::ManualUpgradeRequired,
            FailureCode::CorePortUnidentified,
            FailureCode::SupervisorctlFailed,
            FailureCode::DockerDaemonDown,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json.trim_matches('"'), code.as_str());
        }
    }
}
