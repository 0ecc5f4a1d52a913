//! Session view types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Intent, Plan, ProgressEvent, SubtaskStatus};
use crate::state::{Message, SessionState};

/// Outcome of the command that produced a view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub ok: bool,
    pub message: String,
    /// `planning` or `execution`, filled in when the view is rendered
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskView {
    pub id: String,
    pub title: String,
    pub status: SubtaskStatus,
    pub notes: String,
    pub needs_redo: bool,
}

/// Where a worker output entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSource {
    State,
    EnvelopesFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutputView {
    pub subtask_id: String,
    pub path: String,
    pub kind: String,
    pub preview: String,
    pub timestamp: DateTime<Utc>,
    pub source: OutputSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionView {
    pub subtask_id: String,
    pub decision: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Envelope kind the entry came from
    pub kind: String,
    pub role: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything a caller sees about a session
///
/// Embeds the full plan and state so a cached view can rehydrate the
/// session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub topic: String,
    pub plan: Plan,
    pub subtasks: Vec<SubtaskView>,
    pub current_subtask_id: Option<String>,
    pub running: bool,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub worker_outputs: Vec<WorkerOutputView>,
    pub review_decisions: Vec<DecisionView>,
    pub chat_history: Vec<ChatEntry>,
    pub plan_locked: bool,
    pub progress_events: Vec<ProgressEvent>,
    pub orchestrator_messages: Vec<Message>,
    pub pending_intents: Vec<Intent>,
    pub planning_transcript: Vec<Message>,
    pub transcript: Vec<Message>,
    #[serde(flatten)]
    pub result: CommandResult,
}

impl SessionView {
    pub fn mode(&self) -> &str {
        &self.result.mode
    }

    /// Plain-text rendering for the CLI
    pub fn render_text(&self) -> String {
        let mut lines = vec![
            format!("Session: {}", self.session_id),
            format!("Topic: {}", self.topic),
            format!(
                "Mode: {}  Status: {}{}",
                self.result.mode,
                self.state.status,
                if self.plan_locked { "  (plan locked)" } else { "" }
            ),
            String::new(),
            format!("Plan: {}", self.plan.title),
        ];
        for sub in &self.subtasks {
            let marker = if self.current_subtask_id.as_deref() == Some(sub.id.as_str()) {
                ">"
            } else {
                " "
            };
            let redo = if sub.needs_redo { " (redo)" } else { "" };
            lines.push(format!("{} [{}] {}: {}{}", marker, sub.status, sub.id, sub.title, redo));
        }
        if let Some(decision) = self.review_decisions.last() {
            lines.push(String::new());
            lines.push(format!(
                "Last review: {} {} {}",
                decision.subtask_id, decision.decision, decision.reason
            ));
        }
        if let Some(error) = &self.state.last_error {
            lines.push(format!("Last error: {}", error));
        }
        if !self.result.message.is_empty() {
            lines.push(String::new());
            let status = if self.result.ok { "ok" } else { "failed" };
            lines.push(format!("[{}] {}", status, self.result.message));
        }
        lines.join("\n")
    }
}
