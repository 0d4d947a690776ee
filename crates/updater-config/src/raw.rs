use serde::Deserialize;

/// Raw YAML representation of the optional settings file. Every field is
/// optional; absent fields fall back to built-in defaults, and environment
/// variables override both.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSettings {
    pub listen_addr: Option<String>,
    /// Additional bind on a private bridge interface IP.
    pub bridge_addr: Option<String>,
    pub state_dir: Option<String>,
    pub backup_dir: Option<String>,
    /// Image prefix that identifies Core containers, e.g. "payramapp/payram:".
    pub image_pattern: Option<String>,
    pub container_name: Option<String>,
    pub policy_url: Option<String>,
    pub manifest_url: Option<String>,
    pub fetch_timeout_seconds: Option<u64>,
    pub backup_timeout_seconds: Option<u64>,
    pub retention: Option<u32>,
    pub auto_update_enabled: Option<bool>,
    pub auto_update_interval_seconds: Option<u64>,
    pub dry_run: Option<bool>,
}
