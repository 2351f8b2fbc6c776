use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use mikan_store::{FsSessionStorage, SessionStorage, SqliteSessionStorage};
use serde::{Deserialize, Serialize};

use crate::backfill::BackfillPolicy;
use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "MIKAN_CONFIG";
pub const STORAGE_ROOT_ENV: &str = "MIKAN_STORAGE_ROOT";
pub const BRIDGE_DIR_ENV: &str = "MIKAN_BRIDGE_DIR";
pub const STORAGE_ENV: &str = "MIKAN_STORAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Fs,
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fs" | "file" | "files" => Ok(StorageBackend::Fs),
            "sqlite" => Ok(StorageBackend::Sqlite),
            _ => Err(ConfigError::InvalidValue {
                key: "storage",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageBackend,
    pub storage_root: Option<PathBuf>,
    pub bridge_dir: Option<PathBuf>,
    pub reconnect_delay_secs: u64,
    pub snapshot_interval_secs: u64,
    pub backfill_max_fetches: usize,
    pub backfill_wait_ms: u64,
    pub request_timeout_secs: u64,
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Fs,
            storage_root: None,
            bridge_dir: None,
            reconnect_delay_secs: 5,
            snapshot_interval_secs: 30,
            backfill_max_fetches: 20,
            backfill_wait_ms: 1500,
            request_timeout_secs: 60,
            channel_capacity: 1000,
        }
    }
}

/// Tunables a [`crate::Session`] runs with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub reconnect_delay: Duration,
    pub snapshot_interval: Duration,
    pub backfill: BackfillPolicy,
    pub channel_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Config::default().session_settings()
    }
}

impl Config {
    /// Reads the first config file found (explicit path, `$MIKAN_CONFIG`,
    /// then the platform config dir) and applies env overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(Self::default_path);

        let mut config = match path {
            Some(path) => Self::from_file(&path)?.unwrap_or_default(),
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "mikan", "mikan").map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// `Ok(None)` when the file does not exist.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(None);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(path = %path.display(), "Loaded config");
        Ok(Some(config))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(root) = lookup(STORAGE_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.storage_root = Some(PathBuf::from(root));
        }
        if let Some(dir) = lookup(BRIDGE_DIR_ENV).filter(|v| !v.is_empty()) {
            self.bridge_dir = Some(PathBuf::from(dir));
        }
        if let Some(backend) = lookup(STORAGE_ENV).filter(|v| !v.is_empty()) {
            self.storage = backend.parse()?;
        }
        Ok(())
    }

    pub fn bridge_dir(&self) -> PathBuf {
        self.bridge_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("bridge"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            snapshot_interval: Duration::from_secs(self.snapshot_interval_secs.max(1)),
            backfill: BackfillPolicy {
                max_fetches: self.backfill_max_fetches,
                wait: Duration::from_millis(self.backfill_wait_ms),
            },
            channel_capacity: self.channel_capacity.max(1),
        }
    }

    pub async fn open_storage(&self) -> Result<Arc<dyn SessionStorage>, ConfigError> {
        let storage: Arc<dyn SessionStorage> = match (self.storage, &self.storage_root) {
            (StorageBackend::Fs, Some(root)) => Arc::new(FsSessionStorage::new(root).await?),
            (StorageBackend::Fs, None) => Arc::new(FsSessionStorage::open_default().await?),
            (StorageBackend::Sqlite, Some(root)) => {
                std::fs::create_dir_all(root).map_err(|source| ConfigError::Read {
                    path: root.clone(),
                    source,
                })?;
                let db_path = root.join("sessions.db");
                Arc::new(SqliteSessionStorage::new_with_path(&db_path.display().to_string()).await?)
            }
            (StorageBackend::Sqlite, None) => Arc::new(SqliteSessionStorage::new().await?),
        };
        Ok(storage)
    }
}
