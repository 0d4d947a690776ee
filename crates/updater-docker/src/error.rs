use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("docker {command} exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("docker {command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("unexpected docker output: {0}")]
    InvalidOutput(String),

    #[error("internal driver error: {0}")]
    Internal(String),
}
