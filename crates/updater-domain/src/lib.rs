pub mod error;
pub mod failure;
pub mod types;
pub mod version;

pub use error::DomainError;
pub use failure::{Failure, FailureCode};
pub use types::{
    Backup, BackupFormat, Breakpoint, DbConfig, EventStatus, EventType, HistoryEvent, JobState,
    Manifest, Mount, MountKind, NetworkAttachment, Policy, PortMapping, RestartPolicy,
    RestartPolicyKind, RestoreResult, RuntimeState, UpgradeJob, UpgradeMode,
};
pub use version::{compare_versions, normalize_version, parse_version, sanitize_version};
