use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::failure::FailureCode;
use crate::version::sanitize_version;

// ── Upgrade job ───────────────────────────────────────────────────────────────

/// Who asked for the upgrade. DASHBOARD requests are subject to policy
/// breakpoints; MANUAL requests (operator on the host) override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeMode {
    #[default]
    Dashboard,
    Manual,
}

impl UpgradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeMode::Dashboard => "DASHBOARD",
            UpgradeMode::Manual => "MANUAL",
        }
    }
}

impl std::fmt::Display for UpgradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UpgradeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DASHBOARD" => Ok(UpgradeMode::Dashboard),
            "MANUAL" => Ok(UpgradeMode::Manual),
            other => Err(format!("unknown upgrade mode '{}'", other)),
        }
    }
}

/// The job lifecycle state.
///
/// Transitions:
///   Idle → PolicyFetching → ManifestFetching → Ready
///   Ready → BackingUp → Executing → Verifying → Ready (terminal success)
///   any → Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Idle,
    PolicyFetching,
    ManifestFetching,
    Ready,
    BackingUp,
    Executing,
    Verifying,
    Failed,
}

impl JobState {
    /// A job in an active state blocks new runs.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobState::PolicyFetching
                | JobState::ManifestFetching
                | JobState::BackingUp
                | JobState::Executing
                | JobState::Verifying
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "IDLE",
            JobState::PolicyFetching => "POLICY_FETCHING",
            JobState::ManifestFetching => "MANIFEST_FETCHING",
            JobState::Ready => "READY",
            JobState::BackingUp => "BACKING_UP",
            JobState::Executing => "EXECUTING",
            JobState::Verifying => "VERIFYING",
            JobState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single global upgrade job record. At most one exists at a time; a new
/// run supersedes it (the old record survives in the append-only history).
///
/// Invariants:
/// - `state == Failed` ⇔ `failure_code.is_some()`
/// - `updated_at >= created_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeJob {
    pub job_id: String,
    pub mode: UpgradeMode,
    pub requested_target: String,
    pub resolved_target: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<FailureCode>,
    pub message: String,
    pub backup_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_sha256: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UpgradeJob {
    pub fn new(mode: UpgradeMode, requested_target: impl Into<String>, now: DateTime<Utc>) -> Self {
        UpgradeJob {
            job_id: format!("job-{}", now.timestamp_millis()),
            mode,
            requested_target: requested_target.into(),
            resolved_target: String::new(),
            state: JobState::Idle,
            failure_code: None,
            message: String::new(),
            backup_path: String::new(),
            backup_sha256: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_state(&mut self, state: JobState, now: DateTime<Utc>) {
        self.state = state;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, code: FailureCode, message: impl Into<String>, now: DateTime<Utc>) {
        self.state = JobState::Failed;
        self.failure_code = Some(code);
        self.message = message.into();
        self.updated_at = now;
    }
}

// ── Runtime state ─────────────────────────────────────────────────────────────

/// One published port binding. `host_port` is never empty for a published port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub host_ip: String,
    pub host_port: String,
    pub container_port: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub kind: MountKind,
    pub source: String,
    pub destination: String,
    pub mode: String,
    pub rw: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachment {
    pub name: String,
    pub ip_address: String,
    pub gateway: String,
    pub mac_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyKind {
    #[default]
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

impl RestartPolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicyKind::No => "no",
            RestartPolicyKind::Always => "always",
            RestartPolicyKind::OnFailure => "on-failure",
            RestartPolicyKind::UnlessStopped => "unless-stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RestartPolicy {
    pub name: RestartPolicyKind,
    pub max_retry_count: u32,
}

/// The full observable configuration of a running container, captured once
/// per upgrade and passed by value down the pipeline. Port and network order
/// reflects a keyed mapping in the runtime; callers must not rely on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    pub id: String,
    pub name: String,
    pub image: String,
    pub image_tag: String,
    pub ports: Vec<PortMapping>,
    pub mounts: Vec<Mount>,
    /// Ordered "KEY=VALUE" entries exactly as the runtime reports them.
    pub env: Vec<String>,
    pub networks: Vec<NetworkAttachment>,
    pub restart_policy: RestartPolicy,
    pub labels: BTreeMap<String, String>,
}

// ── Database configuration ────────────────────────────────────────────────────

/// Connection parameters for the Core database. `password` is redacted from
/// Debug output and the struct is deliberately not Serialize; credentials
/// only ever leave the process through the dedicated `db.env` writer.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct DbConfig {
    pub host: String,
    pub port: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub ssl_mode: Option<String>,
}

impl DbConfig {
    /// A local database runs inside the Core container itself.
    pub fn is_local(&self) -> bool {
        matches!(self.host.as_str(), "" | "localhost" | "127.0.0.1" | "::1")
    }

    /// Host, port, database, and username are required. Password may be empty
    /// (trust auth).
    pub fn validate(&self) -> Result<(), DomainError> {
        for (field, value) in [
            ("host", &self.host),
            ("port", &self.port),
            ("database", &self.database),
            ("username", &self.username),
        ] {
            if value.is_empty() {
                return Err(DomainError::InvalidDbConfig(format!("missing {}", field)));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

// ── Policy & manifest ─────────────────────────────────────────────────────────

/// A released version to which dashboard-mode upgrades are refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub version: String,
    pub reason: String,
    pub docs: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub latest: String,
    #[serde(default)]
    pub releases: Vec<String>,
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
    /// First release that ships the in-app health/version endpoints. Older
    /// targets are verified through the legacy root-URL + image-label path.
    #[serde(default)]
    pub updater_api_init_version: String,
}

impl Policy {
    /// Find the breakpoint matching a target version, comparing normalized
    /// forms so "v1.7.0" and "1.7.0" match.
    pub fn breakpoint_for(&self, target: &str) -> Option<&Breakpoint> {
        let norm = crate::version::normalize_version(target);
        self.breakpoints
            .iter()
            .find(|b| crate::version::normalize_version(&b.version) == norm)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ImageSpec {
    pub repo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDefaults {
    #[serde(default)]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub image: ImageSpec,
    #[serde(default)]
    pub defaults: ManifestDefaults,
}

// ── Backups ───────────────────────────────────────────────────────────────────

const BACKUP_PREFIX: &str = "payram-backup-";
const FILENAME_TS: &str = "%Y%m%d-%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFormat {
    /// Plain-text SQL (`.sql`), restored with psql.
    Sql,
    /// pg_dump custom format (`.dump`), restored with pg_restore.
    Dump,
}

impl BackupFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            BackupFormat::Sql => "sql",
            BackupFormat::Dump => "dump",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "sql" => Some(BackupFormat::Sql),
            "dump" => Some(BackupFormat::Dump),
            _ => None,
        }
    }
}

/// Backup metadata. The filename is the source of truth (there is no index
/// file), so everything here reconstructs from the name alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub file_name: String,
    pub from_version: String,
    pub to_version: String,
    pub created_at: DateTime<Utc>,
    pub format: BackupFormat,
    #[serde(default)]
    pub size_bytes: u64,
}

impl Backup {
    /// Construct the canonical filename:
    /// `payram-backup-YYYYMMDD-HHMMSS-<from>-to-<to>.<ext>` (UTC).
    pub fn build_file_name(
        created_at: DateTime<Utc>,
        from_version: &str,
        to_version: &str,
        format: BackupFormat,
    ) -> String {
        format!(
            "{}{}-{}-to-{}.{}",
            BACKUP_PREFIX,
            created_at.format(FILENAME_TS),
            sanitize_version(from_version),
            sanitize_version(to_version),
            format.extension(),
        )
    }

    /// Parse a filename produced by [`Backup::build_file_name`].
    pub fn parse_file_name(file_name: &str) -> Result<Backup, DomainError> {
        let invalid = || DomainError::InvalidBackupFilename(file_name.to_string());

        let (stem, ext) = file_name.rsplit_once('.').ok_or_else(invalid)?;
        let format = BackupFormat::from_extension(ext).ok_or_else(invalid)?;
        let rest = stem.strip_prefix(BACKUP_PREFIX).ok_or_else(invalid)?;

        // YYYYMMDD-HHMMSS is fixed-width; versions may themselves contain '-'.
        if rest.len() < 15 {
            return Err(invalid());
        }
        let (ts, versions) = rest.split_at(15);
        let versions = versions.strip_prefix('-').ok_or_else(invalid)?;
        let naive = NaiveDateTime::parse_from_str(ts, FILENAME_TS).map_err(|_| invalid())?;
        let created_at = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);

        let (from_version, to_version) = versions.split_once("-to-").ok_or_else(invalid)?;
        if from_version.is_empty() || to_version.is_empty() {
            return Err(invalid());
        }

        Ok(Backup {
            file_name: file_name.to_string(),
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            created_at,
            format,
            size_bytes: 0,
        })
    }
}

/// Outcome of a completed restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub db_restored: bool,
    pub from_version: String,
    pub to_version: String,
    /// True when both versions are known from the filename; the operator
    /// must still re-run the matching container version.
    pub needs_recovery: bool,
}

// ── History ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Upgrade,
    Backup,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Started,
    Succeeded,
    Failed,
    Validated,
}

/// One append-only audit record. Never mutated after the append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub status: EventStatus,
    pub message: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl HistoryEvent {
    pub fn new(
        event_type: EventType,
        status: EventStatus,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        HistoryEvent {
            id: Uuid::new_v4(),
            timestamp: now,
            event_type,
            status,
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}
