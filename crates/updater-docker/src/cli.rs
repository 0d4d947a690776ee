use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::driver::{ContainerDriver, ContainerSummary, ExecOutput};
use crate::error::DriverError;

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const INSPECT_TIMEOUT: Duration = Duration::from_secs(15);

/// [`ContainerDriver`] backed by the `docker` binary.
///
/// Every invocation pipes stdout/stderr, optionally feeds stdin, and is
/// killed when its deadline expires. Environment variables handed to `exec`
/// are set on the docker client process and forwarded name-only (`-e KEY`),
/// so secret values never appear in an argv.
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        DockerCli { binary: "docker".to_string() }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        DockerCli { binary: binary.into() }
    }

    /// Run `docker <args>`, returning (exit_code, stdout, stderr).
    async fn run_docker(
        &self,
        args: &[String],
        env: &[(String, String)],
        stdin: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<(i32, Vec<u8>, String), DriverError> {
        debug!(binary = %self.binary, ?args, "running container runtime command");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                std::process::Stdio::piped()
            } else {
                std::process::Stdio::null()
            })
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DriverError::Unavailable(format!("{} binary not found", self.binary))
            } else {
                DriverError::Internal(format!("spawn {}: {}", self.binary, e))
            }
        })?;

        let stdin_pipe = child.stdin.take();
        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");
        let input = stdin.map(|b| b.to_vec());

        // Write stdin and drain both output pipes concurrently; a sequential
        // write can deadlock once the pipe buffers fill in both directions.
        let io = async {
            let write = async {
                if let (Some(mut pipe), Some(bytes)) = (stdin_pipe, input) {
                    pipe.write_all(&bytes).await?;
                    pipe.shutdown().await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let mut out = Vec::new();
            let mut errbuf = Vec::new();
            {
                use tokio::io::AsyncReadExt;
                tokio::try_join!(
                    write,
                    stdout_pipe.read_to_end(&mut out),
                    stderr_pipe.read_to_end(&mut errbuf),
                )?;
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, errbuf))
        };

        let command = args.first().cloned().unwrap_or_default();
        let (status, out, errbuf) = match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, io).await {
                Ok(result) => result
                    .map_err(|e| DriverError::Internal(format!("docker {}: {}", command, e)))?,
                Err(_) => {
                    return Err(DriverError::Timeout {
                        command,
                        seconds: deadline.as_secs(),
                    });
                }
            },
            None => io
                .await
                .map_err(|e| DriverError::Internal(format!("docker {}: {}", command, e)))?,
        };

        let code = status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&errbuf).into_owned();
        Ok((code, out, stderr))
    }

    /// Run a docker command that must succeed; nonzero exit maps to an error.
    async fn run_checked(
        &self,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, DriverError> {
        let (code, out, stderr) = self.run_docker(args, &[], None, timeout).await?;
        if code != 0 {
            let command = args.first().cloned().unwrap_or_default();
            if stderr.contains("No such container") || stderr.contains("No such object") {
                return Err(DriverError::NotFound(stderr.trim().to_string()));
            }
            if stderr.contains("Cannot connect to the Docker daemon") {
                return Err(DriverError::Unavailable(stderr.trim().to_string()));
            }
            return Err(DriverError::CommandFailed {
                command,
                code,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(out)
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl ContainerDriver for DockerCli {
    fn name(&self) -> &'static str {
        "docker-cli"
    }

    async fn ping(&self) -> Result<(), DriverError> {
        self.run_checked(
            &args(&["info", "--format", "{{.ServerVersion}}"]),
            Some(PING_TIMEOUT),
        )
        .await
        .map_err(|e| DriverError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<ContainerSummary>, DriverError> {
        let out = self
            .run_checked(
                &args(&[
                    "ps",
                    "--no-trunc",
                    "--format",
                    "{{.ID}}\t{{.Names}}\t{{.Image}}",
                ]),
                Some(INSPECT_TIMEOUT),
            )
            .await?;

        let text = String::from_utf8_lossy(&out);
        let mut containers = Vec::new();
        for line in text.lines() {
            let mut fields = line.splitn(3, '\t');
            match (fields.next(), fields.next(), fields.next()) {
                (Some(id), Some(name), Some(image)) if !id.is_empty() => {
                    containers.push(ContainerSummary {
                        id: id.to_string(),
                        name: name.to_string(),
                        image: image.to_string(),
                    });
                }
                _ => {
                    return Err(DriverError::InvalidOutput(format!(
                        "unparseable ps line: '{}'",
                        line
                    )));
                }
            }
        }
        Ok(containers)
    }

    async fn inspect_raw(&self, reference: &str) -> Result<serde_json::Value, DriverError> {
        let out = self
            .run_checked(&args(&["inspect", reference]), Some(INSPECT_TIMEOUT))
            .await?;
        let parsed: serde_json::Value = serde_json::from_slice(&out)
            .map_err(|e| DriverError::InvalidOutput(format!("inspect json: {}", e)))?;
        parsed
            .as_array()
            .and_then(|a| a.first())
            .cloned()
            .ok_or_else(|| {
                DriverError::InvalidOutput("inspect returned an empty document".to_string())
            })
    }

    async fn image_label(
        &self,
        image: &str,
        label: &str,
    ) -> Result<Option<String>, DriverError> {
        let format = format!("{{{{ index .Config.Labels \"{}\" }}}}", label);
        let out = self
            .run_checked(
                &args(&["image", "inspect", "--format", &format, image]),
                Some(INSPECT_TIMEOUT),
            )
            .await?;
        let value = String::from_utf8_lossy(&out).trim().to_string();
        if value.is_empty() || value == "<no value>" {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    async fn pull(&self, image: &str) -> Result<(), DriverError> {
        self.run_checked(&args(&["pull", image]), None).await?;
        Ok(())
    }

    async fn stop(&self, reference: &str) -> Result<(), DriverError> {
        self.run_checked(&args(&["stop", reference]), None).await?;
        Ok(())
    }

    async fn remove(&self, reference: &str) -> Result<(), DriverError> {
        self.run_checked(&args(&["rm", reference]), None).await?;
        Ok(())
    }

    async fn restart(&self, reference: &str) -> Result<(), DriverError> {
        self.run_checked(&args(&["restart", reference]), None).await?;
        Ok(())
    }

    async fn run(&self, run_args: &[String]) -> Result<(), DriverError> {
        if run_args.first().map(String::as_str) != Some("run") {
            return Err(DriverError::Internal(
                "run args must begin with the run subcommand".to_string(),
            ));
        }
        self.run_checked(run_args, None).await?;
        Ok(())
    }

    async fn exec(
        &self,
        reference: &str,
        cmd: &[String],
        env: &[(String, String)],
        stdin: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, DriverError> {
        let mut exec_args = vec!["exec".to_string()];
        if stdin.is_some() {
            exec_args.push("-i".to_string());
        }
        // Name-only -e forwards the value from the client environment, which
        // keeps secrets out of the argv.
        for (key, _) in env {
            exec_args.push("-e".to_string());
            exec_args.push(key.clone());
        }
        exec_args.push(reference.to_string());
        exec_args.extend(cmd.iter().cloned());

        let (code, stdout, stderr) = self.run_docker(&exec_args, env, stdin, timeout).await?;
        Ok(ExecOutput { stdout, stderr, exit_code: code })
    }

    async fn image_prune(&self, repo: &str, except_tag: &str) -> Result<(), DriverError> {
        let out = self
            .run_checked(
                &args(&["images", repo, "--format", "{{.Tag}}"]),
                Some(INSPECT_TIMEOUT),
            )
            .await?;
        let text = String::from_utf8_lossy(&out);
        for tag in text.lines().map(str::trim) {
            if tag.is_empty() || tag == except_tag || tag == "<none>" {
                continue;
            }
            let image = format!("{}:{}", repo, tag);
            if let Err(e) = self.run_checked(&args(&["rmi", &image]), None).await {
                warn!(image = %image, error = %e, "image prune skipped an image");
            }
        }
        Ok(())
    }
}
