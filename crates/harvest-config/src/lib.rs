use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Admin API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    3400
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Connection settings for the remote executor service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Base URL of the executor service.
    #[serde(default = "default_executor_url")]
    pub base_url: String,
    /// Per-request timeout in seconds. Bounded so an unreachable executor
    /// cannot stall schedule mutation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_executor_url() -> String {
    "http://127.0.0.1:9301".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: default_executor_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Connection settings for the scrape-target registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the target registry service.
    #[serde(default = "default_registry_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_registry_url() -> String {
    "http://127.0.0.1:9302".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Consecutive execution failures after which a schedule is locked
    /// until an operator resumes it.
    #[serde(default = "default_failure_lock_threshold")]
    pub failure_lock_threshold: u32,
}

fn default_failure_lock_threshold() -> u32 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failure_lock_threshold: default_failure_lock_threshold(),
        }
    }
}

/// Top-level harvest configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Admin API server config.
    #[serde(default)]
    pub api: ApiConfig,
    /// Executor service endpoint.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Target registry endpoint.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Scheduler tuning.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Resolve the harvest config directory (~/.harvest/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".harvest"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.harvest/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<HarvestConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<HarvestConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(HarvestConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: HarvestConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Save configuration to the default path.
pub fn save_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    let dir = ensure_config_dir()?;
    let path = dir.join("config.json5");
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HarvestConfig::default();
        assert_eq!(config.api.port, 3400);
        assert_eq!(config.scheduler.failure_lock_threshold, 5);
        assert_eq!(config.executor.timeout_secs, 5);
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            api: { port: 8080 },
            executor: { base_url: "http://executor.internal:9000" },
            scheduler: { failure_lock_threshold: 3 },
        }"#;
        let config: HarvestConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.executor.base_url, "http://executor.internal:9000");
        assert_eq!(config.executor.timeout_secs, 5);
        assert_eq!(config.scheduler.failure_lock_threshold, 3);
    }

    #[test]
    fn test_json5_parse_empty() {
        let config: HarvestConfig = json5::from_str("{}").unwrap();
        assert_eq!(config.registry.base_url, "http://127.0.0.1:9302");
        assert_eq!(config.api.host, "0.0.0.0");
    }
}
