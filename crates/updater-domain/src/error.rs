use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("invalid database config: {0}")]
    InvalidDbConfig(String),

    #[error("invalid backup filename '{0}'")]
    InvalidBackupFilename(String),
}
