//! Session-level control record
//!
//! `SessionState` is persisted wholesale after every mutation. It is a cache
//! and index over the event log, not the system of record. The side channel
//! holds the cache-only fields that have no log representation: on loss they
//! are rebuilt empty.

use artifactstore::ArtifactRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{Intent, ProgressEvent};

/// Session run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Cached pointer to a worker output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutputRef {
    pub subtask_id: String,
    pub artifact: ArtifactRef,
    /// Timestamp of the matching `subtask_result` envelope
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Character {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
}

/// User-provided novel settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NovelProfile {
    pub length: String,
    pub era: String,
    pub genre: String,
    pub style: String,
    pub title_text: String,
    pub characters: Vec<Character>,
    pub extra_notes: String,
}

impl NovelProfile {
    /// One-paragraph description used in prompts and seeded subtasks
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        let fields = [
            ("Title", &self.title_text),
            ("Genre", &self.genre),
            ("Era", &self.era),
            ("Style", &self.style),
            ("Length", &self.length),
        ];
        for (label, value) in fields {
            if !value.is_empty() {
                parts.push(format!("{}: {}", label, value));
            }
        }
        if !self.characters.is_empty() {
            let cast: Vec<String> = self
                .characters
                .iter()
                .map(|c| {
                    if c.role.is_empty() {
                        c.name.clone()
                    } else {
                        format!("{} ({})", c.name, c.role)
                    }
                })
                .collect();
            parts.push(format!("Characters: {}", cast.join(", ")));
        }
        if !self.extra_notes.is_empty() {
            parts.push(format!("Notes: {}", self.extra_notes));
        }
        parts.join("; ")
    }
}

/// Novel-mode working memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NovelMode {
    pub profile: NovelProfile,
    /// Compact digest of the setup subtasks, always carried forward
    pub setup_summary: String,
    /// Digest of accepted post-setup outputs, reset periodically
    pub rolling_summary: String,
    /// Chapter expansion already ran
    pub expanded: bool,
}

/// One output waiting in the reviewer batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchMember {
    pub subtask_id: String,
    pub title: String,
    pub artifact: ArtifactRef,
    pub preview: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReviewerBatchState {
    /// Batches reviewed so far
    pub counter: u32,
    pub pending: Vec<BatchMember>,
    pub current_batch_id: Option<String>,
}

impl ReviewerBatchState {
    pub fn member_ids(&self) -> BTreeSet<String> {
        self.pending.iter().map(|m| m.subtask_id.clone()).collect()
    }
}

/// Cached reviewer verdict, adoptable by `apply_reviewer_revision`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewerRevision {
    pub subtask_id: String,
    #[serde(default)]
    pub batch_id: Option<String>,
    pub decision: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub revised_text: Option<String>,
    #[serde(default)]
    pub context_summary: String,
    #[serde(default)]
    pub adopted: bool,
    pub timestamp: DateTime<Utc>,
}

/// Typed replacement for the free-form session bag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SideChannel {
    pub novel: Option<NovelMode>,
    pub batch: Option<ReviewerBatchState>,
    pub revisions: BTreeMap<String, ReviewerRevision>,
    /// Latest review decision already acted on, per subtask
    pub redo_watermarks: BTreeMap<String, DateTime<Utc>>,
    /// Consecutive REDO count, per subtask
    pub redo_attempts: BTreeMap<String, u32>,
}

impl SideChannel {
    pub fn batch_member_ids(&self) -> BTreeSet<String> {
        self.batch.as_ref().map(|b| b.member_ids()).unwrap_or_default()
    }

    /// Advance the watermark, never moving it backwards
    pub fn advance_watermark(&mut self, subtask_id: &str, ts: DateTime<Utc>) {
        let entry = self.redo_watermarks.entry(subtask_id.to_string()).or_insert(ts);
        if ts > *entry {
            *entry = ts;
        }
    }
}

/// The mutable session control record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub current_subtask_id: Option<String>,
    #[serde(default)]
    pub plan_locked: bool,
    #[serde(default)]
    pub pending_intents: Vec<Intent>,
    #[serde(default)]
    pub transcript: Vec<Message>,
    #[serde(default)]
    pub planning_transcript: Vec<Message>,
    #[serde(default)]
    pub progress_events: Vec<ProgressEvent>,
    #[serde(default)]
    pub cached_worker_outputs: Vec<WorkerOutputRef>,
    #[serde(default)]
    pub side_channel: SideChannel,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, plan_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            plan_id: plan_id.into(),
            topic: topic.into(),
            status: SessionStatus::Idle,
            current_subtask_id: None,
            plan_locked: false,
            pending_intents: Vec::new(),
            transcript: Vec::new(),
            planning_transcript: Vec::new(),
            progress_events: Vec::new(),
            cached_worker_outputs: Vec::new(),
            side_channel: SideChannel::default(),
            last_error: None,
        }
    }

    pub fn add_message(&mut self, role: &str, content: impl Into<String>) {
        self.transcript.push(Message::new(role, content));
    }

    pub fn add_planning_message(&mut self, role: &str, content: impl Into<String>) {
        self.planning_transcript.push(Message::new(role, content));
    }

    /// Lock the plan; returns true only on the first call
    pub fn lock_plan(&mut self) -> bool {
        if self.plan_locked {
            return false;
        }
        self.plan_locked = true;
        true
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn mode(&self) -> &'static str {
        if self.plan_locked { "execution" } else { "planning" }
    }

    pub fn is_novel(&self) -> bool {
        self.side_channel.novel.is_some()
    }

    pub fn record_progress(&mut self, event: ProgressEvent) {
        self.progress_events.push(event);
    }

    pub fn cache_worker_output(&mut self, output: WorkerOutputRef) {
        self.cached_worker_outputs.push(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lock_is_monotonic() {
        let mut state = SessionState::new("s", "p", "topic");
        assert_eq!(state.mode(), "planning");
        assert!(state.lock_plan());
        assert!(!state.lock_plan());
        assert!(state.plan_locked);
        assert_eq!(state.mode(), "execution");
    }

    #[test]
    fn test_side_channel_rejects_unknown_keys() {
        let ok = json!({"redo_attempts": {"t1": 2}});
        let side: SideChannel = serde_json::from_value(ok).unwrap();
        assert_eq!(side.redo_attempts["t1"], 2);

        let bad = json!({"novel_mode": true});
        assert!(serde_json::from_value::<SideChannel>(bad).is_err());
    }

    #[test]
    fn test_watermark_only_moves_forward() {
        let mut side = SideChannel::default();
        let t0 = Utc::now();
        side.advance_watermark("t1", t0);
        side.advance_watermark("t1", t0 - chrono::Duration::seconds(5));
        assert_eq!(side.redo_watermarks["t1"], t0);
    }

    #[test]
    fn test_profile_describe() {
        let profile = NovelProfile {
            genre: "fantasy".to_string(),
            era: "bronze age".to_string(),
            characters: vec![Character {
                name: "Ilsa".to_string(),
                role: "smith".to_string(),
            }],
            ..Default::default()
        };
        let text = profile.describe();
        assert!(text.contains("Genre: fantasy"));
        assert!(text.contains("Era: bronze age"));
        assert!(text.contains("Ilsa (smith)"));
        assert!(!text.contains("Title"));
    }

    #[test]
    fn test_state_round_trip_defaults() {
        let value = json!({"session_id": "s", "plan_id": "p"});
        let state: SessionState = serde_json::from_value(value).unwrap();
        assert_eq!(state.status, SessionStatus::Idle);
        assert!(!state.plan_locked);
        assert!(state.side_channel.batch.is_none());
    }
}
