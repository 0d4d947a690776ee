use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawSettings;

/// Prefix for every settings environment variable.
pub const ENV_PREFIX: &str = "PAYRAM_UPDATER_";

/// Resolved updater settings.
///
/// Precedence, lowest to highest: built-in defaults, the optional YAML file,
/// `PAYRAM_UPDATER_*` environment variables. Database credentials are not
/// settings; they are resolved separately, per upgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen_addr: String,
    pub bridge_addr: Option<String>,
    pub state_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub image_pattern: String,
    pub container_name: Option<String>,
    pub policy_url: String,
    pub manifest_url: String,
    pub fetch_timeout_seconds: u64,
    pub backup_timeout_seconds: u64,
    pub retention: u32,
    pub auto_update_enabled: bool,
    pub auto_update_interval_seconds: u64,
    pub dry_run: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen_addr: "127.0.0.1:8844".to_string(),
            bridge_addr: None,
            state_dir: PathBuf::from("/var/lib/payram-updater"),
            backup_dir: PathBuf::from("/var/lib/payram/backups"),
            image_pattern: "payramapp/payram:".to_string(),
            container_name: None,
            policy_url: "https://releases.payram.app/policy.json".to_string(),
            manifest_url: "https://releases.payram.app/manifest.json".to_string(),
            fetch_timeout_seconds: 10,
            backup_timeout_seconds: 60,
            retention: 5,
            auto_update_enabled: false,
            auto_update_interval_seconds: 21_600,
            dry_run: false,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the YAML file at `path` (skipped when
    /// absent), then process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let mut settings = Settings::default();

        if let Some(path) = path {
            if path.exists() {
                debug!(path = %path.display(), "loading settings file");
                let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?;
                let raw: RawSettings =
                    serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
                        path: path.display().to_string(),
                        source: e,
                    })?;
                settings.apply_raw(raw);
            }
        }

        settings.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_raw(&mut self, raw: RawSettings) {
        if let Some(v) = raw.listen_addr {
            self.listen_addr = v;
        }
        if raw.bridge_addr.is_some() {
            self.bridge_addr = raw.bridge_addr;
        }
        if let Some(v) = raw.state_dir {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = raw.backup_dir {
            self.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = raw.image_pattern {
            self.image_pattern = v;
        }
        if raw.container_name.is_some() {
            self.container_name = raw.container_name;
        }
        if let Some(v) = raw.policy_url {
            self.policy_url = v;
        }
        if let Some(v) = raw.manifest_url {
            self.manifest_url = v;
        }
        if let Some(v) = raw.fetch_timeout_seconds {
            self.fetch_timeout_seconds = v;
        }
        if let Some(v) = raw.backup_timeout_seconds {
            self.backup_timeout_seconds = v;
        }
        if let Some(v) = raw.retention {
            self.retention = v;
        }
        if let Some(v) = raw.auto_update_enabled {
            self.auto_update_enabled = v;
        }
        if let Some(v) = raw.auto_update_interval_seconds {
            self.auto_update_interval_seconds = v;
        }
        if let Some(v) = raw.dry_run {
            self.dry_run = v;
        }
    }

    /// Apply overrides from a key lookup. Keys are the environment variable
    /// names without the `PAYRAM_UPDATER_` prefix, which keeps this testable
    /// without mutating the process environment.
    pub fn apply_overrides(
        &mut self,
        get: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = get("LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = get("BRIDGE_ADDR") {
            self.bridge_addr = Some(v);
        }
        if let Some(v) = get("STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = get("BACKUP_DIR") {
            self.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = get("IMAGE_PATTERN") {
            self.image_pattern = v;
        }
        if let Some(v) = get("CONTAINER_NAME") {
            self.container_name = Some(v);
        }
        if let Some(v) = get("POLICY_URL") {
            self.policy_url = v;
        }
        if let Some(v) = get("MANIFEST_URL") {
            self.manifest_url = v;
        }
        if let Some(v) = get("FETCH_TIMEOUT_SECONDS") {
            self.fetch_timeout_seconds = parse_num("FETCH_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("BACKUP_TIMEOUT_SECONDS") {
            self.backup_timeout_seconds = parse_num("BACKUP_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("RETENTION") {
            self.retention = parse_num("RETENTION", &v)?;
        }
        if let Some(v) = get("AUTO_UPDATE_ENABLED") {
            self.auto_update_enabled = parse_bool("AUTO_UPDATE_ENABLED", &v)?;
        }
        if let Some(v) = get("AUTO_UPDATE_INTERVAL_SECONDS") {
            self.auto_update_interval_seconds = parse_num("AUTO_UPDATE_INTERVAL_SECONDS", &v)?;
        }
        if let Some(v) = get("DRY_RUN") {
            self.dry_run = parse_bool("DRY_RUN", &v)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.image_pattern.is_empty() {
            return Err(ConfigError::Invalid {
                field: "image_pattern".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.retention < 1 {
            return Err(ConfigError::Invalid {
                field: "retention".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn backup_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.backup_timeout_seconds)
    }
}

fn parse_num<T: std::str::FromStr>(field: &str, v: &str) -> Result<T, ConfigError> {
    v.parse().map_err(|_| ConfigError::Invalid {
        field: field.to_string(),
        message: format!("'{}' is not a number", v),
    })
}

fn parse_bool(field: &str, v: &str) -> Result<bool, ConfigError> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            field: field.to_string(),
            message: format!("'{}' is not a boolean", other),
        }),
    }
}
