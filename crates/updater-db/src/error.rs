use thiserror::Error;
use updater_domain::FailureCode;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("{tool} exited with code {code}: {stderr}")]
    CommandFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("restore requires explicit confirmation (pass --yes or confirmed=true)")]
    ConfirmationRequired,

    #[error("unsupported backup format for '{0}' (expected .sql or .dump)")]
    InvalidFormat(String),

    #[error("backup file '{0}' is empty")]
    EmptyBackup(String),

    #[error("retention must be at least 1, got {0}")]
    InvalidRetention(u32),

    #[error("driver error: {0}")]
    Driver(#[from] updater_docker::DriverError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected tool output: {0}")]
    InvalidOutput(String),
}

impl DbError {
    /// The narrowest failure code for surfacing this error on a job record.
    pub fn failure_code(&self) -> FailureCode {
        match self {
            DbError::Timeout { .. } => FailureCode::BackupTimeout,
            DbError::InvalidFormat(_) => FailureCode::InvalidBackupFormat,
            _ => FailureCode::BackupFailed,
        }
    }
}
