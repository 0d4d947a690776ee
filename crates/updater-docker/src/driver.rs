use async_trait::async_trait;

use crate::error::DriverError;

/// One running container as reported by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    /// Full image reference including the tag, e.g. `payramapp/payram:v1.7.2`.
    pub image: String,
}

/// Captured output of a command executed inside a container.
///
/// `exit_code` is the inner command's exit status; a nonzero code is not a
/// driver error; callers interpret it.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Capability set of the container runtime.
///
/// Implementations must never log values passed through `env`, which carry
/// secrets such as database passwords.
#[async_trait]
pub trait ContainerDriver: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    // ── Read-only ─────────────────────────────────────────────────────────────

    /// Liveness probe of the runtime daemon itself.
    async fn ping(&self) -> Result<(), DriverError>;

    async fn list_running(&self) -> Result<Vec<ContainerSummary>, DriverError>;

    /// Raw inspect document for a container (name or id).
    async fn inspect_raw(&self, reference: &str) -> Result<serde_json::Value, DriverError>;

    /// Read a single label from an image, `None` when the label is absent.
    async fn image_label(
        &self,
        image: &str,
        label: &str,
    ) -> Result<Option<String>, DriverError>;

    // ── Mutating ──────────────────────────────────────────────────────────────

    async fn pull(&self, image: &str) -> Result<(), DriverError>;

    async fn stop(&self, reference: &str) -> Result<(), DriverError>;

    async fn remove(&self, reference: &str) -> Result<(), DriverError>;

    async fn restart(&self, reference: &str) -> Result<(), DriverError>;

    /// Create and start a container. `args` is the full `docker run` argv
    /// beginning with the `run` subcommand.
    async fn run(&self, args: &[String]) -> Result<(), DriverError>;

    /// Execute a command inside a running container, optionally feeding
    /// `stdin` and passing extra environment variables. A nonzero exit code
    /// of the inner command is returned in the output, not as an error.
    async fn exec(
        &self,
        reference: &str,
        cmd: &[String],
        env: &[(String, String)],
        stdin: Option<&[u8]>,
        timeout: Option<std::time::Duration>,
    ) -> Result<ExecOutput, DriverError>;

    /// Remove images of `repo` whose tag differs from `except_tag`.
    /// Best-effort cleanup after a verified upgrade.
    async fn image_prune(&self, repo: &str, except_tag: &str) -> Result<(), DriverError>;
}
