//! Configuration for the afs binary

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory holding one folder per session
    #[serde(default = "default_sessions_dir", rename = "sessions-dir")]
    pub sessions_dir: PathBuf,

    /// Default preview length for `cat --max`
    #[serde(default = "default_preview_chars", rename = "preview-chars")]
    pub preview_chars: usize,
}

fn default_sessions_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("draftloop")
        .join("sessions")
}

fn default_preview_chars() -> usize {
    400
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            preview_chars: default_preview_chars(),
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
            dirs::config_dir().map(|p| p.join("draftloop").join("artifactstore.yml")),
            Some(PathBuf::from("artifactstore.yml")),
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
