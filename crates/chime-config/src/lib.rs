use std::path::{Path, PathBuf};
use std::time::Duration;

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

/// Engine timing configuration, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Scan cadence.
    #[serde(default = "default_tick_secs")]
    pub tick_interval_secs: u64,
    /// Sleep after a storage failure during a scan.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Bound on a single callback invocation.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    /// Base delay for the linear retry backoff.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

fn default_tick_secs() -> u64 {
    1
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_dispatch_timeout_secs() -> u64 {
    60
}

fn default_retry_backoff_secs() -> u64 {
    300
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

impl EngineSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

/// Top-level chime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChimeConfig {
    /// Job database path. Defaults to `~/.chime/jobs.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Engine timing.
    #[serde(default)]
    pub engine: EngineSettings,
}

impl ChimeConfig {
    /// Resolve the job database path, creating none.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("jobs.db")),
        }
    }
}

/// Resolve the chime config directory (~/.chime/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".chime"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.chime/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<ChimeConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<ChimeConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(ChimeConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: ChimeConfig = json5::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ChimeConfig = json5::from_str("{}").unwrap();
        assert_eq!(config.engine.tick_interval_secs, 1);
        assert_eq!(config.engine.dispatch_timeout_secs, 60);
        assert_eq!(config.engine.retry_backoff_secs, 300);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_partial_override() {
        let config: ChimeConfig = json5::from_str(
            r#"{
                database_path: "/tmp/chime-test.db",
                engine: { tick_interval_secs: 5 },
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/chime-test.db")
        );
        assert_eq!(config.engine.tick_interval_secs, 5);
        // Unspecified engine fields keep their defaults.
        assert_eq!(config.engine.error_backoff_secs, 5);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config_from(Path::new("/nonexistent/chime.json5")).unwrap();
        assert_eq!(config.engine.tick_interval_secs, 1);
    }
}
