use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use updater_docker::{discover_core, inspect_runtime, ContainerDriver};
use updater_domain::{DbConfig, Failure, FailureCode};

use crate::error::DbError;

/// File under the backup root holding persisted local-DB credentials.
pub const DB_ENV_FILE: &str = "db.env";

/// Where the winning credentials came from. Surfaced in diagnostics; the
/// password itself never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    RemoteEnv,
    ContainerEnv,
    PersistedFile,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::RemoteEnv => write!(f, "process environment"),
            CredentialSource::ContainerEnv => write!(f, "running container environment"),
            CredentialSource::PersistedFile => write!(f, "persisted db.env"),
        }
    }
}

/// Resolve database credentials from the three sources in strict priority
/// order. Each source is authoritative when it succeeds; later sources are
/// never consulted to "fill in" fields from an earlier one.
pub async fn resolve_credentials(
    driver: &dyn ContainerDriver,
    image_pattern: &str,
    backup_dir: &Path,
) -> Result<(DbConfig, CredentialSource), Failure> {
    resolve_with(|k| std::env::var(k).ok(), driver, image_pattern, backup_dir).await
}

/// Testable resolution core: the environment is an injected lookup.
pub async fn resolve_with(
    get_env: impl Fn(&str) -> Option<String>,
    driver: &dyn ContainerDriver,
    image_pattern: &str,
    backup_dir: &Path,
) -> Result<(DbConfig, CredentialSource), Failure> {
    // 1. Remote host announced via the process environment.
    if let Some(cfg) = config_from_lookup(&get_env) {
        if !cfg.is_local() {
            cfg.validate().map_err(|e| {
                Failure::new(
                    FailureCode::CredentialsRequired,
                    format!("POSTGRES_* environment names a remote database but is incomplete: {}", e),
                )
            })?;
            debug!("credentials resolved from process environment (remote database)");
            return Ok((cfg, CredentialSource::RemoteEnv));
        }
    }

    // 2. Environment block of the running Core container.
    match discover_core(driver, image_pattern).await {
        Ok(container) => match inspect_runtime(driver, &container.id).await {
            Ok(state) => {
                if let Some(cfg) = config_from_container_env(&state.env) {
                    if cfg.validate().is_ok() {
                        debug!(container = %container.name, "credentials resolved from container environment");
                        return Ok((cfg, CredentialSource::ContainerEnv));
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not inspect discovered container for credentials"),
        },
        Err(e) => debug!(reason = %e.message, "no running instance to read credentials from"),
    }

    // 3. Credentials persisted after an earlier successful backup.
    let db_env_path = backup_dir.join(DB_ENV_FILE);
    if db_env_path.exists() {
        match load_db_env(&db_env_path) {
            Ok(cfg) if cfg.validate().is_ok() => {
                debug!(path = %db_env_path.display(), "credentials resolved from persisted file");
                return Ok((cfg, CredentialSource::PersistedFile));
            }
            Ok(_) => warn!(path = %db_env_path.display(), "persisted credentials are incomplete"),
            Err(e) => warn!(path = %db_env_path.display(), error = %e, "persisted credentials unreadable"),
        }
    }

    Err(Failure::new(
        FailureCode::CredentialsUnavailable,
        format!(
            "database credentials could not be resolved; either \
             (1) export POSTGRES_HOST/PORT/DATABASE/USERNAME/PASSWORD for a remote database, \
             (2) start the Core container so its POSTGRES_* environment can be read, or \
             (3) create {} with the credentials",
            backup_dir.join(DB_ENV_FILE).display()
        ),
    ))
}

fn config_from_lookup(get_env: &impl Fn(&str) -> Option<String>) -> Option<DbConfig> {
    let host = get_env("POSTGRES_HOST")?;
    Some(DbConfig {
        host,
        port: get_env("POSTGRES_PORT").unwrap_or_else(|| "5432".to_string()),
        database: get_env("POSTGRES_DATABASE")
            .or_else(|| get_env("POSTGRES_DB"))
            .unwrap_or_default(),
        username: get_env("POSTGRES_USERNAME")
            .or_else(|| get_env("POSTGRES_USER"))
            .unwrap_or_default(),
        password: get_env("POSTGRES_PASSWORD").unwrap_or_default(),
        ssl_mode: get_env("POSTGRES_SSLMODE"),
    })
}

/// Extract credentials from a container's "KEY=VALUE" environment entries.
/// A container that carries POSTGRES_* without a host runs the database
/// itself, so the host defaults to loopback.
pub fn config_from_container_env(env: &[String]) -> Option<DbConfig> {
    let lookup = |key: &str| -> Option<String> {
        env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
    };

    let database = lookup("POSTGRES_DATABASE").or_else(|| lookup("POSTGRES_DB"))?;
    Some(DbConfig {
        host: lookup("POSTGRES_HOST").unwrap_or_else(|| "localhost".to_string()),
        port: lookup("POSTGRES_PORT").unwrap_or_else(|| "5432".to_string()),
        database,
        username: lookup("POSTGRES_USERNAME")
            .or_else(|| lookup("POSTGRES_USER"))
            .unwrap_or_default(),
        password: lookup("POSTGRES_PASSWORD").unwrap_or_default(),
        ssl_mode: lookup("POSTGRES_SSLMODE"),
    })
}

/// Parse a `db.env` file: one KEY=VALUE per line, `#` comments and blank
/// lines ignored.
pub fn load_db_env(path: &Path) -> Result<DbConfig, DbError> {
    let content = std::fs::read_to_string(path)?;
    let lookup = |key: &str| -> Option<String> {
        content.lines().find_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            line.split_once('=')
                .filter(|(k, _)| k.trim() == key)
                .map(|(_, v)| v.trim().to_string())
        })
    };

    Ok(DbConfig {
        host: lookup("POSTGRES_HOST").unwrap_or_default(),
        port: lookup("POSTGRES_PORT").unwrap_or_default(),
        database: lookup("POSTGRES_DATABASE").unwrap_or_default(),
        username: lookup("POSTGRES_USERNAME").unwrap_or_default(),
        password: lookup("POSTGRES_PASSWORD").unwrap_or_default(),
        ssl_mode: lookup("POSTGRES_SSLMODE"),
    })
}

/// Persist local-DB credentials to `<backup_dir>/db.env`, mode 0600, written
/// to a temp file and renamed into place. Remote credentials are refused;
/// they belong to the operator's secret store, not this host.
pub fn persist_credentials(cfg: &DbConfig, backup_dir: &Path) -> Result<PathBuf, DbError> {
    if !cfg.is_local() {
        return Err(DbError::InvalidOutput(format!(
            "refusing to persist credentials for remote database host '{}'",
            cfg.host
        )));
    }

    std::fs::create_dir_all(backup_dir)?;
    let path = backup_dir.join(DB_ENV_FILE);
    let tmp = backup_dir.join(".db.env.tmp");

    let mut content = String::from("# Written by payram-updater after a successful backup.\n");
    content.push_str(&format!("POSTGRES_HOST={}\n", cfg.host));
    content.push_str(&format!("POSTGRES_PORT={}\n", cfg.port));
    content.push_str(&format!("POSTGRES_DATABASE={}\n", cfg.database));
    content.push_str(&format!("POSTGRES_USERNAME={}\n", cfg.username));
    content.push_str(&format!("POSTGRES_PASSWORD={}\n", cfg.password));
    if let Some(ssl_mode) = &cfg.ssl_mode {
        content.push_str(&format!("POSTGRES_SSLMODE={}\n", ssl_mode));
    }

    std::fs::write(&tmp, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use updater_docker::{ContainerSummary, FakeDriver};

    fn core_inspect_doc(env: &[&str]) -> serde_json::Value {
        json!({
            "Id": "abc",
            "Name": "/core",
            "Config": {
                "Image": "payramapp/payram:v1.7.0",
                "Env": env,
                "Labels": {}
            },
            "HostConfig": {"RestartPolicy": {"Name": "no", "MaximumRetryCount": 0}},
            "Mounts": [],
            "NetworkSettings": {"Ports": {}, "Networks": {}}
        })
    }

    #[tokio::test]
    async fn remote_env_wins_over_container() {
        let driver = FakeDriver::new();
        let dir = tempfile::tempdir().unwrap();
        let env = |key: &str| -> Option<String> {
            match key {
                "POSTGRES_HOST" => Some("db.internal".into()),
                "POSTGRES_DATABASE" => Some("payram".into()),
                "POSTGRES_USER" => Some("payram".into()),
                "POSTGRES_PASSWORD" => Some("secret".into()),
                _ => None,
            }
        };

        let (cfg, source) = resolve_with(env, &driver, "payramapp/payram:", dir.path())
            .await
            .unwrap();
        assert_eq!(source, CredentialSource::RemoteEnv);
        assert_eq!(cfg.host, "db.internal");
        assert_eq!(cfg.port, "5432");
        assert!(!cfg.is_local());
    }

    #[tokio::test]
    async fn incomplete_remote_env_is_credentials_required() {
        let driver = FakeDriver::new();
        let dir = tempfile::tempdir().unwrap();
        let env = |key: &str| (key == "POSTGRES_HOST").then(|| "db.internal".to_string());

        let err = resolve_with(env, &driver, "payramapp/payram:", dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::CredentialsRequired);
    }

    #[tokio::test]
    async fn container_env_is_second_priority() {
        let driver = FakeDriver::new()
            .with_running(vec![ContainerSummary {
                id: "abc".into(),
                name: "core".into(),
                image: "payramapp/payram:v1.7.0".into(),
            }])
            .with_inspect(
                "abc",
                core_inspect_doc(&["POSTGRES_DB=payram", "POSTGRES_USER=payram", "POSTGRES_PASSWORD=pw"]),
            );
        let dir = tempfile::tempdir().unwrap();

        let (cfg, source) = resolve_with(|_| None, &driver, "payramapp/payram:", dir.path())
            .await
            .unwrap();
        assert_eq!(source, CredentialSource::ContainerEnv);
        assert!(cfg.is_local());
        assert_eq!(cfg.database, "payram");
    }

    #[tokio::test]
    async fn persisted_file_is_last_resort() {
        let driver = FakeDriver::new();
        let dir = tempfile::tempdir().unwrap();
        let cfg = DbConfig {
            host: "localhost".into(),
            port: "5432".into(),
            database: "payram".into(),
            username: "payram".into(),
            password: "pw".into(),
            ssl_mode: None,
        };
        persist_credentials(&cfg, dir.path()).unwrap();

        let (loaded, source) = resolve_with(|_| None, &driver, "payramapp/payram:", dir.path())
            .await
            .unwrap();
        assert_eq!(source, CredentialSource::PersistedFile);
        assert_eq!(loaded, cfg);
    }

    #[tokio::test]
    async fn nothing_resolvable_lists_all_three_hints() {
        let driver = FakeDriver::new();
        let dir = tempfile::tempdir().unwrap();

        let err = resolve_with(|_| None, &driver, "payramapp/payram:", dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::CredentialsUnavailable);
        assert!(err.message.contains("POSTGRES_HOST"));
        assert!(err.message.contains("Core container"));
        assert!(err.message.contains("db.env"));
    }

    #[test]
    fn persist_refuses_remote() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DbConfig {
            host: "db.internal".into(),
            port: "5432".into(),
            database: "payram".into(),
            username: "payram".into(),
            password: "pw".into(),
            ssl_mode: None,
        };
        assert!(persist_credentials(&cfg, dir.path()).is_err());
        assert!(!dir.path().join(DB_ENV_FILE).exists());
    }

    #[test]
    fn db_env_round_trip_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DbConfig {
            host: "127.0.0.1".into(),
            port: "5433".into(),
            database: "payram".into(),
            username: "payram".into(),
            password: "p@ss".into(),
            ssl_mode: Some("disable".into()),
        };
        let path = persist_credentials(&cfg, dir.path()).unwrap();
        let loaded = load_db_env(&path).unwrap();
        assert_eq!(loaded, cfg);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
