//! Core ArtifactStore implementation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const INDEX_FILE: &str = "session_index.json";

/// Errors from artifact operations
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Content kind, which also decides the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Markdown,
    Json,
    #[default]
    Text,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Text => "txt",
        }
    }

    /// Lenient parse used for kinds read back from envelopes
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Self::Markdown,
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// Reference to a stored artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path relative to the store root, e.g. `sess-.../artifacts/0193ab.md`
    pub path: String,
    pub kind: ArtifactKind,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRef {
    /// JSON form embedded in `subtask_result.result_artifact`
    pub fn to_payload(&self) -> Value {
        json!({
            "path": self.path,
            "kind": self.kind.to_string(),
            "description": self.description,
            "created_at": self.created_at,
        })
    }

    /// Rebuild a reference from an envelope payload object
    pub fn from_payload(value: &Value) -> Option<Self> {
        let path = value.get("path")?.as_str()?.to_string();
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .map(ArtifactKind::parse)
            .unwrap_or_default();
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let created_at = value
            .get("created_at")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_else(Utc::now);
        Some(Self {
            path,
            kind,
            description,
            created_at,
        })
    }
}

/// Session index kept at the store root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionIndex {
    pub latest: Option<String>,
    #[serde(default)]
    pub history: Vec<String>,
}

/// The artifact store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open or create an artifact store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(?root, "Opened artifact store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    pub fn artifacts_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("artifacts")
    }

    pub fn logs_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("logs")
    }

    /// New session id: `sess-YYYYMMDD-HHMMSS-<8 hex>`
    pub fn create_session_id() -> String {
        let now = Utc::now();
        let entropy = Uuid::now_v7().simple().to_string();
        // v7 leads with the timestamp; the random tail is what keeps ids apart
        let tail = &entropy[entropy.len() - 8..];
        format!("sess-{}-{}", now.format("%Y%m%d-%H%M%S"), tail)
    }

    /// Create the session directories and record the id in the index
    pub fn register_session(&self, session_id: &str) -> Result<(), ArtifactError> {
        debug!(%session_id, "register_session: called");
        fs::create_dir_all(self.artifacts_dir(session_id))?;
        fs::create_dir_all(self.logs_dir(session_id))?;

        let mut index = self.session_index()?;
        index.latest = Some(session_id.to_string());
        index.history.push(session_id.to_string());
        let body = serde_json::to_string_pretty(&index)?;
        fs::write(self.root.join(INDEX_FILE), body)?;
        info!(%session_id, "Registered session");
        Ok(())
    }

    pub fn session_index(&self) -> Result<SessionIndex, ArtifactError> {
        let path = self.root.join(INDEX_FILE);
        if !path.exists() {
            debug!("session_index: no index yet");
            return Ok(SessionIndex::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn latest_session(&self) -> Result<Option<String>, ArtifactError> {
        Ok(self.session_index()?.latest)
    }

    /// Registered sessions, newest first, without duplicates
    pub fn list_sessions(&self) -> Result<Vec<String>, ArtifactError> {
        let index = self.session_index()?;
        let mut seen = std::collections::HashSet::new();
        Ok(index
            .history
            .into_iter()
            .rev()
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    /// Save text content as a new artifact
    pub fn save(
        &self,
        session_id: &str,
        content: &str,
        kind: ArtifactKind,
        description: &str,
    ) -> Result<ArtifactRef, ArtifactError> {
        debug!(%session_id, %kind, content_len = content.len(), "save: called");
        let dir = self.artifacts_dir(session_id);
        fs::create_dir_all(&dir)?;

        let artifact_id = Uuid::now_v7().simple().to_string();
        let file_name = format!("{}.{}", artifact_id, kind.extension());
        fs::write(dir.join(&file_name), content)?;

        let reference = ArtifactRef {
            path: format!("{}/artifacts/{}", session_id, file_name),
            kind,
            description: description.to_string(),
            created_at: Utc::now(),
        };
        debug!(path = %reference.path, "save: written");
        Ok(reference)
    }

    /// Save a JSON value (pretty-printed) as a new artifact
    pub fn save_json(&self, session_id: &str, value: &Value, description: &str) -> Result<ArtifactRef, ArtifactError> {
        let body = serde_json::to_string_pretty(value)?;
        self.save(session_id, &body, ArtifactKind::Json, description)
    }

    /// Read an artifact, optionally truncated to `max_len` characters
    pub fn read_text(&self, reference: &ArtifactRef, max_len: Option<usize>) -> Result<String, ArtifactError> {
        self.read_path(&reference.path, max_len)
    }

    /// Read an artifact by its store-relative path
    pub fn read_path(&self, relative: &str, max_len: Option<usize>) -> Result<String, ArtifactError> {
        debug!(%relative, ?max_len, "read_path: called");
        let rel = Path::new(relative);
        if rel.is_absolute() || rel.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(ArtifactError::InvalidPath(relative.to_string()));
        }
        let full = self.root.join(rel);
        if !full.exists() {
            return Err(ArtifactError::NotFound(relative.to_string()));
        }
        let content = fs::read_to_string(&full)?;
        Ok(match max_len {
            Some(n) => truncate_chars(&content, n),
            None => content,
        })
    }

    /// Artifact file names for a session, sorted (v7 ids sort by creation)
    pub fn list_artifacts(&self, session_id: &str) -> Result<Vec<String>, ArtifactError> {
        let dir = self.artifacts_dir(session_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Truncate to at most `max` chars, appending the marker when cut
pub fn truncate_chars(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}{}", &content[..byte_idx], crate::TRUNCATION_MARKER),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_read_by_kind() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();

        let md = store.save("s1", "# Chapter 1", ArtifactKind::Markdown, "draft").unwrap();
        assert!(md.path.starts_with("s1/artifacts/"));
        assert!(md.path.ends_with(".md"));
        assert_eq!(store.read_text(&md, None).unwrap(), "# Chapter 1");

        let js = store.save_json("s1", &json!({"a": 1}), "plan").unwrap();
        assert!(js.path.ends_with(".json"));

        let txt = store.save("s1", "plain", ArtifactKind::Text, "").unwrap();
        assert!(txt.path.ends_with(".txt"));
        assert_eq!(store.list_artifacts("s1").unwrap().len(), 3);
    }

    #[test]
    fn test_read_truncates_on_char_boundary() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        let r = store.save("s1", "龙的传说开始了", ArtifactKind::Text, "").unwrap();
        assert_eq!(store.read_text(&r, Some(3)).unwrap(), "龙的传...");
        assert_eq!(store.read_text(&r, Some(100)).unwrap(), "龙的传说开始了");
    }

    #[test]
    fn test_read_rejects_escaping_paths() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        assert!(matches!(
            store.read_path("../etc/passwd", None),
            Err(ArtifactError::InvalidPath(_))
        ));
        assert!(matches!(
            store.read_path("s1/artifacts/missing.md", None),
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[test]
    fn test_session_index_latest_and_history() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        store.register_session("sess-a").unwrap();
        store.register_session("sess-b").unwrap();
        store.register_session("sess-a").unwrap();

        assert_eq!(store.latest_session().unwrap(), Some("sess-a".to_string()));
        assert_eq!(store.list_sessions().unwrap(), vec!["sess-a", "sess-b"]);
        assert!(store.logs_dir("sess-b").exists());
    }

    #[test]
    fn test_session_id_format() {
        let id = ArtifactStore::create_session_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "sess");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert_ne!(id, ArtifactStore::create_session_id());
    }

    #[test]
    fn test_payload_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        let r = store.save("s1", "text", ArtifactKind::Markdown, "d").unwrap();
        let back = ArtifactRef::from_payload(&r.to_payload()).unwrap();
        assert_eq!(back, r);
    }
}
