use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use ebb_engine::EngineConfig;
use ebb_store::StoreConfig;

/// Client configuration, loadable from a TOML file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Directory holding the event journal.
    pub data_dir: PathBuf,
    /// Connectivity debounce window.
    pub debounce: Duration,
    /// Sync engine tuning.
    pub engine: EngineConfig,
    /// Durable store tuning.
    pub store: StoreConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("ebb-data"),
            debounce: Duration::from_millis(500),
            engine: EngineConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Read configuration from `path`, falling back to defaults when the
    /// file is absent or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "invalid config; using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Path of the event journal inside `data_dir`.
    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("events.journal")
    }
}
