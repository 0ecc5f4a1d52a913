//! DraftLoop configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::llm::GenRole;

/// Main DraftLoop configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Generation service configuration
    pub llm: LlmConfig,

    /// Per-role model overrides
    pub roles: RoleModels,

    /// Where sessions and snapshots live
    pub storage: StorageConfig,

    /// Subtask pipeline tuning
    pub pipeline: PipelineConfig,

    /// Directory with `<name>.pmt` prompt overrides
    #[serde(rename = "prompts-dir")]
    pub prompts_dir: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that the API key environment variable is set. Call this before
    /// building a real generation client.
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .draftloop.yml
        let local_config = PathBuf::from(".draftloop.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/draftloop/draftloop.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("draftloop").join("draftloop.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "openai" supported)
    pub provider: String,

    /// Default model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com".to_string(),
            max_tokens: 4096,
            timeout_ms: 300_000,
        }
    }
}

/// Optional model override per generation role
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleModels {
    pub planner: Option<String>,
    pub worker: Option<String>,
    pub reviewer: Option<String>,
    pub coordinator: Option<String>,
    pub classifier: Option<String>,
}

impl RoleModels {
    pub fn model_for(&self, role: GenRole) -> Option<&str> {
        match role {
            GenRole::Planner => self.planner.as_deref(),
            GenRole::Worker => self.worker.as_deref(),
            GenRole::Reviewer => self.reviewer.as_deref(),
            GenRole::Coordinator => self.coordinator.as_deref(),
            GenRole::Classifier => self.classifier.as_deref(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory with one folder per session
    #[serde(rename = "sessions-dir")]
    pub sessions_dir: PathBuf,

    /// SQLite database of persisted session snapshots
    #[serde(rename = "snapshot-db")]
    pub snapshot_db: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("draftloop");

        Self {
            sessions_dir: data_dir.join("sessions"),
            snapshot_db: data_dir.join("snapshots.db"),
        }
    }
}

/// Subtask pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of leading setup subtasks reviewed one by one
    #[serde(rename = "setup-count")]
    pub setup_count: usize,

    /// Outputs per reviewer batch
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Reset the rolling summary every N batches
    #[serde(rename = "summary-reset-every")]
    pub summary_reset_every: u32,

    /// Consecutive REDOs before a subtask needs attention
    #[serde(rename = "max-redo-attempts")]
    pub max_redo_attempts: u32,

    /// Subtask whose completion triggers chapter expansion (novel mode)
    #[serde(rename = "pivot-subtask")]
    pub pivot_subtask: String,

    /// Run `next`/`all` as background tasks
    pub background: bool,

    /// Enable reviewer batching after the setup phase
    pub batching: bool,

    /// Number of fallback chapters when expansion yields nothing usable
    #[serde(rename = "expansion-count")]
    pub expansion_count: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            setup_count: 4,
            batch_size: 3,
            summary_reset_every: 5,
            max_redo_attempts: 3,
            pivot_subtask: "t4".to_string(),
            background: true,
            batching: true,
            expansion_count: 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.pipeline.setup_count, 4);
        assert_eq!(config.pipeline.batch_size, 3);
        assert_eq!(config.pipeline.summary_reset_every, 5);
        assert_eq!(config.pipeline.max_redo_attempts, 3);
        assert_eq!(config.pipeline.pivot_subtask, "t4");
        assert!(config.pipeline.background);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  model: gpt-4o
  api-key-env: MY_KEY
  max-tokens: 2048

roles:
  reviewer: o3-mini

storage:
  sessions-dir: /tmp/dl/sessions
  snapshot-db: /tmp/dl/snap.db

pipeline:
  batch-size: 5
  background: false

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.api_key_env, "MY_KEY");
        assert_eq!(config.llm.max_tokens, 2048);
        assert_eq!(config.roles.model_for(GenRole::Reviewer), Some("o3-mini"));
        assert_eq!(config.roles.model_for(GenRole::Worker), None);
        assert_eq!(config.storage.sessions_dir, PathBuf::from("/tmp/dl/sessions"));
        assert_eq!(config.pipeline.batch_size, 5);
        assert!(!config.pipeline.background);
        // Unspecified values keep their defaults
        assert_eq!(config.pipeline.setup_count, 4);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    #[serial]
    fn test_validate_requires_api_key() {
        let mut config = Config::default();
        config.llm.api_key_env = "DRAFTLOOP_TEST_KEY".to_string();

        // SAFETY: serialized with the other env-mutating tests
        unsafe { std::env::remove_var("DRAFTLOOP_TEST_KEY") };
        assert!(config.validate().is_err());

        unsafe { std::env::set_var("DRAFTLOOP_TEST_KEY", "sk-test") };
        assert!(config.validate().is_ok());
        unsafe { std::env::remove_var("DRAFTLOOP_TEST_KEY") };
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("dl.yml");
        fs::write(&path, "pipeline:\n  max-redo-attempts: 7\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.pipeline.max_redo_attempts, 7);
    }
}
