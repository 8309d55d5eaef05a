//! Configuration for the engine, Shared Storage and the CLI.
//!
//! Everything deserializes from YAML with defaults for missing keys, so an
//! absent file and an empty file behave the same.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use weavecore::{Area, PathMapping, SharedStorage};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn read_yaml<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Retry policy applied to every task, local or remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.delay_ms as f64 * factor) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker slots on the coordinating host.
    pub local_slots: usize,
    pub task_timeout_secs: Option<u64>,
    pub retry: RetryPolicy,
    pub event_buffer_size: usize,
}

impl EngineConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "task_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            local_slots: 1,
            task_timeout_secs: None,
            retry: RetryPolicy::default(),
            event_buffer_size: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerStorage {
    pub path: PathBuf,
}

impl Default for ServerStorage {
    fn default() -> Self {
        Self {
            path: PathBuf::from("results"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientStorage {
    /// Where worker nodes mount `server.path`. Unset means same path.
    pub mount_point: Option<PathBuf>,
    pub options: String,
}

/// Layout of Shared Storage. Compatible with a `storage.yaml` whose root key
/// is `storage:`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub server: ServerStorage,
    pub client: ClientStorage,
    pub directories: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            server: ServerStorage::default(),
            client: ClientStorage::default(),
            directories: Area::ALL.iter().map(|a| a.as_str().to_string()).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StorageFile {
    #[serde(default)]
    storage: StorageConfig,
}

impl StorageConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file: StorageFile = read_yaml(path)?;
        file.storage.validate()?;
        Ok(file.storage)
    }

    /// Every area the engine writes must be declared.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for area in Area::ALL {
            if !self.directories.iter().any(|d| d == area.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "storage.directories must include '{}'",
                    area
                )));
            }
        }
        Ok(())
    }

    pub fn shared_storage(&self) -> SharedStorage {
        SharedStorage::new(&self.server.path)
    }

    pub fn path_mapping(&self) -> Option<PathMapping> {
        self.client
            .mount_point
            .as_ref()
            .map(|mount| PathMapping::new(&self.server.path, mount))
    }
}

/// Top-level settings file (`weave.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workflows_dir: PathBuf,
    pub nodes_file: PathBuf,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workflows_dir: PathBuf::from("workflows"),
            nodes_file: PathBuf::from("config/nodes.json"),
            engine: EngineConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings: Settings = read_yaml(path)?;
        settings.engine.validate()?;
        settings.storage.validate()?;
        Ok(settings)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay_ms: 100,
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn storage_file_with_client_mount_point() {
        let yaml = r#"
storage:
  server:
    path: /srv/weave
  client:
    mount_point: /mnt/weave
    options: rw,sync
  directories: [status, results, logs, temp]
"#;
        let file: StorageFile = serde_yaml::from_str(yaml).unwrap();
        let storage = file.storage;
        storage.validate().unwrap();
        assert_eq!(storage.server.path, PathBuf::from("/srv/weave"));
        let mapping = storage.path_mapping().unwrap();
        assert_eq!(
            mapping.translate(Path::new("/srv/weave/run/results")),
            PathBuf::from("/mnt/weave/run/results")
        );
    }

    #[test]
    fn missing_area_is_invalid() {
        let storage = StorageConfig {
            directories: vec!["status".into(), "results".into()],
            ..StorageConfig::default()
        };
        assert!(storage.validate().is_err());
    }

    #[test]
    fn partial_settings_fill_defaults() {
        let settings: Settings =
            serde_yaml::from_str("engine:\n  local_slots: 4\n").unwrap();
        assert_eq!(settings.engine.local_slots, 4);
        assert_eq!(settings.engine.retry.max_attempts, 1);
        assert_eq!(settings.workflows_dir, PathBuf::from("workflows"));
    }
}
