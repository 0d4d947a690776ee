use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use updater_docker::ContainerDriver;
use updater_domain::{BackupFormat, DbConfig};

use crate::error::DbError;

/// Capability set of the database dump/restore tooling.
///
/// `container` selects the execution path: `Some(name)` runs the tool inside
/// that container (local DB), `None` runs it on the host against a remote DB.
/// Passwords travel exclusively through the process environment, never in
/// an argv, never in error output.
#[async_trait]
pub trait DbBackupTool: Send + Sync + 'static {
    async fn dump(
        &self,
        cfg: &DbConfig,
        out_file: &Path,
        format: BackupFormat,
        container: Option<&str>,
        timeout: Duration,
    ) -> Result<(), DbError>;

    async fn restore(
        &self,
        cfg: &DbConfig,
        in_file: &Path,
        format: BackupFormat,
        container: Option<&str>,
        timeout: Duration,
    ) -> Result<(), DbError>;

    /// Size of the current database in bytes.
    async fn size(
        &self,
        cfg: &DbConfig,
        container: Option<&str>,
        timeout: Duration,
    ) -> Result<u64, DbError>;
}

const RESTORE_FLAGS: &[&str] = &["--clean", "--if-exists", "--no-owner", "--no-privileges"];

/// PostgreSQL implementation: pg_dump / pg_restore / psql, either spawned on
/// the host or executed inside the Core container through the driver.
pub struct PgTool {
    driver: Arc<dyn ContainerDriver>,
}

impl PgTool {
    pub fn new(driver: Arc<dyn ContainerDriver>) -> Self {
        PgTool { driver }
    }

    fn password_env(cfg: &DbConfig) -> Vec<(String, String)> {
        let mut env = vec![("PGPASSWORD".to_string(), cfg.password.clone())];
        if let Some(ssl_mode) = &cfg.ssl_mode {
            env.push(("PGSSLMODE".to_string(), ssl_mode.clone()));
        }
        env
    }

    /// Connection args shared by all three tools. The host seen from inside
    /// the container is loopback when the config leaves it empty.
    fn conn_args(cfg: &DbConfig, in_container: bool) -> Vec<String> {
        let host = if in_container && cfg.is_local() {
            "127.0.0.1".to_string()
        } else {
            cfg.host.clone()
        };
        vec![
            "-h".to_string(),
            host,
            "-p".to_string(),
            cfg.port.clone(),
            "-U".to_string(),
            cfg.username.clone(),
        ]
    }

    /// Run a pg tool on the host, capturing stdout. Secrets go through `env`.
    async fn run_host(
        &self,
        tool: &str,
        args: &[String],
        env: &[(String, String)],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Vec<u8>, DbError> {
        debug!(tool, ?args, "running database tool on host");

        let mut cmd = Command::new(tool);
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
            DbError::CommandFailed {
                tool: tool.to_string(),
                code: -1,
                stderr: format!("spawn failed: {}", e),
            }
        })?;

        let stdin_pipe = child.stdin.take();
        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");
        let input = stdin.map(|b| b.to_vec());

        let io = async {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let write = async {
                if let (Some(mut pipe), Some(bytes)) = (stdin_pipe, input) {
                    pipe.write_all(&bytes).await?;
                    pipe.shutdown().await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let mut out = Vec::new();
            let mut errbuf = Vec::new();
            tokio::try_join!(
                write,
                stdout_pipe.read_to_end(&mut out),
                stderr_pipe.read_to_end(&mut errbuf),
            )?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, errbuf))
        };

        let (status, out, errbuf) = match tokio::time::timeout(timeout, io).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DbError::Timeout {
                    tool: tool.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
        };

        if !status.success() {
            return Err(DbError::CommandFailed {
                tool: tool.to_string(),
                code: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&errbuf).trim().to_string(),
            });
        }
        Ok(out)
    }

    /// Run a pg tool inside the container. The driver forwards `env` by name
    /// so passwords stay out of every argv.
    async fn run_in_container(
        &self,
        container: &str,
        tool: &str,
        args: &[String],
        env: &[(String, String)],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Vec<u8>, DbError> {
        debug!(tool, container, "running database tool in container");

        let mut cmd = vec![tool.to_string()];
        cmd.extend(args.iter().cloned());

        let out = self
            .driver
            .exec(container, &cmd, env, stdin, Some(timeout))
            .await
            .map_err(|e| match e {
                updater_docker::DriverError::Timeout { seconds, .. } => DbError::Timeout {
                    tool: tool.to_string(),
                    seconds,
                },
                other => DbError::Driver(other),
            })?;

        if out.exit_code != 0 {
            return Err(DbError::CommandFailed {
                tool: tool.to_string(),
                code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout)
    }
}

#[async_trait]
impl DbBackupTool for PgTool {
    async fn dump(
        &self,
        cfg: &DbConfig,
        out_file: &Path,
        format: BackupFormat,
        container: Option<&str>,
        timeout: Duration,
    ) -> Result<(), DbError> {
        let env = Self::password_env(cfg);
        let mut args = Self::conn_args(cfg, container.is_some());
        args.push("-d".to_string());
        args.push(cfg.database.clone());
        if format == BackupFormat::Dump {
            args.push("-Fc".to_string());
        }

        let dump = match container {
            // Local DB: pg_dump writes to stdout inside the container and we
            // capture the stream; nothing is left behind in the container fs.
            Some(name) => {
                self.run_in_container(name, "pg_dump", &args, &env, None, timeout)
                    .await?
            }
            None => self.run_host("pg_dump", &args, &env, None, timeout).await?,
        };

        tokio::fs::write(out_file, &dump).await?;
        Ok(())
    }

    async fn restore(
        &self,
        cfg: &DbConfig,
        in_file: &Path,
        format: BackupFormat,
        container: Option<&str>,
        timeout: Duration,
    ) -> Result<(), DbError> {
        let env = Self::password_env(cfg);
        let mut args = Self::conn_args(cfg, container.is_some());
        args.push("-d".to_string());
        args.push(cfg.database.clone());

        let tool = match format {
            BackupFormat::Sql => "psql",
            BackupFormat::Dump => {
                for flag in RESTORE_FLAGS {
                    args.push(flag.to_string());
                }
                "pg_restore"
            }
        };

        // Both paths feed the file over stdin: psql reads the script,
        // pg_restore reads the custom-format archive.
        let content = tokio::fs::read(in_file).await?;
        match container {
            Some(name) => {
                self.run_in_container(name, tool, &args, &env, Some(&content), timeout)
                    .await?;
            }
            None => {
                self.run_host(tool, &args, &env, Some(&content), timeout)
                    .await?;
            }
        }
        Ok(())
    }

    async fn size(
        &self,
        cfg: &DbConfig,
        container: Option<&str>,
        timeout: Duration,
    ) -> Result<u64, DbError> {
        let env = Self::password_env(cfg);
        let mut args = Self::conn_args(cfg, container.is_some());
        args.extend(
            [
                "-d",
                cfg.database.as_str(),
                "-t",
                "-A",
                "-c",
                "SELECT pg_database_size(current_database())",
            ]
            .map(str::to_string),
        );

        let out = match container {
            Some(name) => {
                self.run_in_container(name, "psql", &args, &env, None, timeout)
                    .await?
            }
            None => self.run_host("psql", &args, &env, None, timeout).await?,
        };

        let text = String::from_utf8_lossy(&out);
        text.trim()
            .parse::<u64>()
            .map_err(|_| DbError::InvalidOutput(format!("pg_database_size: '{}'", text.trim())))
    }
}
