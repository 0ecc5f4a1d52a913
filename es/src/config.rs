//! Configuration for the es binary

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory holding one folder per session
    #[serde(default = "default_sessions_dir", rename = "sessions-dir")]
    pub sessions_dir: PathBuf,

    /// SQLite database with cached session snapshots
    #[serde(default = "default_snapshot_db", rename = "snapshot-db")]
    pub snapshot_db: PathBuf,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("draftloop")
}

fn default_sessions_dir() -> PathBuf {
    data_dir().join("sessions")
}

fn default_snapshot_db() -> PathBuf {
    data_dir().join("snapshots.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            snapshot_db: default_snapshot_db(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            return Ok(serde_yaml::from_str(&content)?);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("draftloop").join("envelopestore.yml")),
            Some(PathBuf::from("envelopestore.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                return Ok(serde_yaml::from_str(&content)?);
            }
        }

        Ok(Config::default())
    }
}
