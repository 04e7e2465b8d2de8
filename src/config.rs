use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Gateway config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Profile name; the run lock and job store are keyed by it.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// How long a graceful close may take before the process is force-exited.
    #[serde(default = "default_force_exit_grace_ms")]
    pub force_exit_grace_ms: u64,
    /// Expected-downtime hint passed to the server when closing for a restart.
    #[serde(default = "default_restart_downtime_hint_ms")]
    pub restart_downtime_hint_ms: u64,
    /// Standing authorization for the privileged restart signal.
    #[serde(default)]
    pub allow_privileged_restart: bool,
}

fn default_profile() -> String {
    "default".into()
}
fn default_force_exit_grace_ms() -> u64 {
    5_000
}
fn default_restart_downtime_hint_ms() -> u64 {
    2_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            force_exit_grace_ms: default_force_exit_grace_ms(),
            restart_downtime_hint_ms: default_restart_downtime_hint_ms(),
            allow_privileged_restart: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Cron / heartbeat config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
}

fn default_heartbeat_interval_secs() -> u64 {
    30 * 60
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Logging config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: text, compact, or json.
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Per-module level overrides, e.g. {"gatebot::cron": "debug"}.
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            module_levels: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Config directory: `$GATEBOT_CONFIG_DIR` or `~/.gatebot`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GATEBOT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gatebot")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

pub fn log_dir_path() -> PathBuf {
    config_dir().join("logs")
}

/// Persisted cron job store for a profile.
pub fn cron_store_path(profile: &str) -> PathBuf {
    config_dir().join("cron").join(format!("{profile}.jobs.json"))
}

/// Exclusive run-lock file for a profile.
pub fn run_lock_path(profile: &str) -> PathBuf {
    config_dir().join(format!("{profile}.lock"))
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the config from `path` (or the default location). A missing file is a
/// normal outcome and yields the default config.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    let cfg = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cfg)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write config at {}", path.display()))?;
    Ok(())
}
