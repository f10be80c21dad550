use crate::SharkError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
pub struct SharkConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub metrics: crate::metrics::MetricsConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct StorageConfig {
    /// Database file. Overridden by `--db` / `MCP_SHARK_DB`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct ReaperConfig {
    /// Pending conversations older than this are marked `timeout`.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    300
}

impl ReaperConfig {
    pub fn stale_after_ns(&self) -> i64 {
        (self.stale_after_secs as i64).saturating_mul(1_000_000_000)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Load config from MCP_SHARK_CONFIG, ~/mcp-shark/config.toml, or defaults.
pub fn load_config() -> Result<SharkConfig, SharkError> {
    match config_path() {
        Some(p) if p.exists() => load_config_from(&p),
        _ => Ok(SharkConfig::default()),
    }
}

pub fn load_config_from(path: &Path) -> Result<SharkConfig, SharkError> {
    let content = std::fs::read_to_string(path)?;
    let config: SharkConfig = toml::from_str(&content)
        .map_err(|e| SharkError::Config(format!("{}: {e}", path.display())))?;
    validate_config(&config)?;
    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    if let Some(p) = std::env::var_os("MCP_SHARK_CONFIG") {
        return Some(PathBuf::from(p));
    }
    Some(home_dir()?.join("mcp-shark").join("config.toml"))
}

pub fn validate_config(config: &SharkConfig) -> Result<(), SharkError> {
    if config.reaper.stale_after_secs == 0 {
        return Err(SharkError::Config(
            "reaper.stale_after_secs must be greater than 0".into(),
        ));
    }
    match config.metrics.transport.as_str() {
        "http" | "grpc" => Ok(()),
        other => Err(SharkError::Config(format!(
            "metrics.transport must be \"http\" or \"grpc\", got {other:?}"
        ))),
    }
}

/// `$HOME/mcp-shark/db/mcp-shark.sqlite`, or a relative path without HOME.
pub fn default_db_path() -> PathBuf {
    let base = home_dir().unwrap_or_default();
    base.join("mcp-shark").join("db").join("mcp-shark.sqlite")
}

/// Database path: explicit flag, then config file, then the default.
pub fn resolve_db_path(flag: Option<&Path>, config: &SharkConfig) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| config.storage.path.clone())
        .unwrap_or_else(default_db_path)
}
