use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{FleetError, Result};

static DEFAULT_CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ifleet")
        .join("config.json")
});

/// Tool-wide configuration. Unknown sections in the file are ignored,
/// missing ones fall back to defaults, so old config files keep working.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub timeouts: TimeoutConfig,
    pub companion: CompanionConfig,
    pub executor: ExecutorConfig,
    pub monitor: MonitorSettings,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Seconds allowed for a plain device command round trip.
    pub device_command: u64,
    pub screenshot: u64,
    pub app_launch: u64,
    pub companion_connect: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            device_command: 30,
            screenshot: 15,
            app_launch: 20,
            companion_connect: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Host the WDA-style endpoint listens on.
    pub host: String,
    pub port: u16,
    /// Name or path of the idb CLI binary.
    pub idb_path: String,
    pub retry_count: u32,
    pub retry_interval_secs: f64,
    pub command_timeout_secs: u64,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8100,
            idb_path: "idb".to_string(),
            retry_count: 3,
            retry_interval_secs: 2.0,
            command_timeout_secs: 30,
        }
    }
}

impl CompanionConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_workers: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub interval_secs: u64,
    /// Total runtime; `None` runs until stopped.
    pub duration_secs: Option<u64>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            duration_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub screenshot_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            screenshot_dir: PathBuf::from("./screenshots"),
        }
    }
}

impl FleetConfig {
    /// Load from `~/.ifleet/config.json`, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let raw = fs::read_to_string(path)?;
        let config: FleetConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "saved config");
        Ok(())
    }

    pub fn default_path() -> &'static Path {
        &DEFAULT_CONFIG_PATH
    }

    /// Rejects values that would misbehave later. Called before any work is
    /// dispatched so bad configuration fails fast.
    pub fn validate(&self) -> Result<()> {
        if self.executor.max_workers == 0 {
            return Err(FleetError::InvalidConfig(
                "executor.max_workers must be at least 1".into(),
            ));
        }
        if self.monitor.interval_secs == 0 {
            return Err(FleetError::InvalidConfig(
                "monitor.interval_secs must be at least 1".into(),
            ));
        }
        if self.companion.host.is_empty() {
            return Err(FleetError::InvalidConfig("companion.host must not be empty".into()));
        }
        if self.companion.retry_interval_secs < 0.0 {
            return Err(FleetError::InvalidConfig(
                "companion.retry_interval_secs must not be negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FleetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.executor.max_workers, 4);
        assert_eq!(config.companion.base_url(), "http://localhost:8100");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FleetConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.monitor.interval_secs, 30);
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = FleetConfig::default();
        config.executor.max_workers = 9;
        config.companion.port = 9100;
        config.save(&path).unwrap();

        let loaded = FleetConfig::load_from(&path).unwrap();
        assert_eq!(loaded.executor.max_workers, 9);
        assert_eq!(loaded.companion.port, 9100);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"executor": {"max_workers": 2}}"#).unwrap();

        let config = FleetConfig::load_from(&path).unwrap();
        assert_eq!(config.executor.max_workers, 2);
        assert_eq!(config.timeouts.device_command, 30);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"executor": {"max_workers": 0}}"#).unwrap();

        assert!(matches!(
            FleetConfig::load_from(&path),
            Err(FleetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config = FleetConfig::default();
        config.monitor.interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
