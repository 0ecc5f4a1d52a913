//! Plan and Subtask model
//!
//! A plan is an ordered, linear list of subtasks. Ids are assigned once and
//! never reused; the list only grows (append or insert-after). Transition
//! rules live in the dispatcher and pipeline, not here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

/// Errors from structural plan edits
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("Subtask {0} not found")]
    UnknownSubtask(String),

    #[error("Subtask id {0} already exists")]
    DuplicateId(String),
}

/// Subtask status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Skipped,
    /// Retry ceiling reached; waits for a human
    NeedsAttention,
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::NeedsAttention => "needs_attention",
        }
    }

    /// Terminal states are never picked up by the pending walk
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::NeedsAttention)
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubtaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" | "in-progress" | "running" => Ok(Self::InProgress),
            "done" | "completed" => Ok(Self::Done),
            "skipped" => Ok(Self::Skipped),
            "needs_attention" | "needs-attention" => Ok(Self::NeedsAttention),
            other => Err(format!("unknown subtask status: {}", other)),
        }
    }
}

/// One unit of work in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: SubtaskStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub output: String,
    /// Marked for reprocessing; independent of `status`
    #[serde(default)]
    pub needs_redo: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: SubtaskStatus::Pending,
            notes: String::new(),
            output: String::new(),
            needs_redo: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_status(mut self, status: SubtaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Append a line to the notes
    pub fn append_note(&mut self, note: &str) {
        if self.notes.is_empty() {
            self.notes = note.to_string();
        } else {
            self.notes.push('\n');
            self.notes.push_str(note);
        }
    }
}

/// An ordered plan of subtasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Highest id sequence ever handed out
    #[serde(default)]
    pub id_seq: u32,
}

impl Plan {
    pub fn new(plan_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            title: title.into(),
            description: String::new(),
            notes: String::new(),
            subtasks: Vec::new(),
            id_seq: 0,
        }
    }

    /// First subtask that is not done, skipped or waiting for attention
    pub fn next_pending(&self) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| !s.status.is_terminal())
    }

    /// Like `next_pending`, ignoring the given ids
    pub fn next_pending_excluding(&self, exclude: &BTreeSet<String>) -> Option<&Subtask> {
        self.subtasks
            .iter()
            .find(|s| !s.status.is_terminal() && !exclude.contains(&s.id))
    }

    pub fn has_pending(&self) -> bool {
        self.next_pending().is_some()
    }

    pub fn find(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.subtasks.iter().position(|s| s.id == id)
    }

    /// Insert a subtask directly after `id`
    pub fn insert_after(&mut self, id: &str, subtask: Subtask) -> Result<(), PlanError> {
        debug!(%id, new_id = %subtask.id, "insert_after: called");
        if self.find(&subtask.id).is_some() {
            return Err(PlanError::DuplicateId(subtask.id));
        }
        let idx = self
            .position(id)
            .ok_or_else(|| PlanError::UnknownSubtask(id.to_string()))?;
        self.observe_id(&subtask.id);
        self.subtasks.insert(idx + 1, subtask);
        Ok(())
    }

    pub fn append(&mut self, subtask: Subtask) -> Result<(), PlanError> {
        debug!(new_id = %subtask.id, "append: called");
        if self.find(&subtask.id).is_some() {
            return Err(PlanError::DuplicateId(subtask.id));
        }
        self.observe_id(&subtask.id);
        self.subtasks.push(subtask);
        Ok(())
    }

    /// Reserve the next unused `t<N>` id
    pub fn generate_id(&mut self) -> String {
        let max_seen = self
            .subtasks
            .iter()
            .filter_map(|s| id_number(&s.id))
            .max()
            .unwrap_or(0);
        self.id_seq = self.id_seq.max(max_seen) + 1;
        format!("t{}", self.id_seq)
    }

    fn observe_id(&mut self, id: &str) {
        if let Some(n) = id_number(id) {
            self.id_seq = self.id_seq.max(n);
        }
    }

    /// Short textual rendering used in prompts
    pub fn brief_text(&self) -> String {
        let mut lines = vec![format!("Plan: {} (id={})", self.title, self.plan_id)];
        for s in &self.subtasks {
            let redo = if s.needs_redo { " (redo)" } else { "" };
            lines.push(format!("- [{}] {}: {}{}", s.status, s.id, s.title, redo));
        }
        lines.join("\n")
    }

    /// Build a plan from a loosely formatted outline
    ///
    /// Bullet (`-`, `*`) and numbered (`1.`, `2)`) lines become subtasks.
    /// An outline with no such lines yields a single subtask for the topic.
    pub fn from_outline(plan_id: impl Into<String>, topic: &str, text: &str) -> Self {
        debug!(%topic, text_len = text.len(), "from_outline: called");
        let mut plan = Plan::new(plan_id, topic);
        plan.description = format!("Plan for: {}", topic);

        for line in text.lines() {
            if let Some(title) = outline_item(line) {
                let id = plan.generate_id();
                plan.subtasks.push(Subtask::new(id, title));
            }
        }

        if plan.subtasks.is_empty() {
            debug!("from_outline: no outline items, using topic as single subtask");
            let id = plan.generate_id();
            plan.subtasks.push(Subtask::new(id, topic));
        }
        plan
    }
}

fn id_number(id: &str) -> Option<u32> {
    id.strip_prefix('t').and_then(|n| n.parse().ok())
}

fn outline_item(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let rest = if let Some(r) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
        r
    } else {
        let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        let after = &trimmed[digits..];
        after.strip_prefix(". ").or_else(|| after.strip_prefix(") "))?
    };
    let title = rest.trim();
    (!title.is_empty()).then(|| title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(statuses: &[SubtaskStatus]) -> Plan {
        let mut plan = Plan::new("p1", "Test");
        for status in statuses {
            let id = plan.generate_id();
            plan.append(Subtask::new(id.clone(), format!("Task {}", id)).with_status(*status))
                .unwrap();
        }
        plan
    }

    #[test]
    fn test_next_pending_is_fifo_and_skips_terminal() {
        use SubtaskStatus::*;
        let plan = plan_with(&[Done, Skipped, NeedsAttention, Pending, Pending]);
        assert_eq!(plan.next_pending().unwrap().id, "t4");
        assert!(plan.has_pending());

        let done = plan_with(&[Done, Skipped]);
        assert!(done.next_pending().is_none());
        assert!(!done.has_pending());
    }

    #[test]
    fn test_in_progress_counts_as_pending() {
        let plan = plan_with(&[SubtaskStatus::Done, SubtaskStatus::InProgress]);
        assert_eq!(plan.next_pending().unwrap().id, "t2");
    }

    #[test]
    fn test_next_pending_excluding() {
        let plan = plan_with(&[SubtaskStatus::InProgress, SubtaskStatus::Pending]);
        let exclude: BTreeSet<String> = ["t1".to_string()].into();
        assert_eq!(plan.next_pending_excluding(&exclude).unwrap().id, "t2");
    }

    #[test]
    fn test_generate_id_never_reuses() {
        let mut plan = plan_with(&[SubtaskStatus::Done, SubtaskStatus::Pending]);
        assert_eq!(plan.generate_id(), "t3");
        // Reserved even though never appended
        assert_eq!(plan.generate_id(), "t4");

        plan.subtasks.pop();
        assert_eq!(plan.generate_id(), "t5");
    }

    #[test]
    fn test_insert_after() {
        let mut plan = plan_with(&[SubtaskStatus::Pending, SubtaskStatus::Pending]);
        let id = plan.generate_id();
        plan.insert_after("t1", Subtask::new(id, "Inserted")).unwrap();
        let ids: Vec<_> = plan.subtasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t3", "t2"]);

        let err = plan.insert_after("t99", Subtask::new("t10", "x")).unwrap_err();
        assert_eq!(err, PlanError::UnknownSubtask("t99".to_string()));

        let err = plan.append(Subtask::new("t1", "dup")).unwrap_err();
        assert_eq!(err, PlanError::DuplicateId("t1".to_string()));
    }

    #[test]
    fn test_explicit_ids_advance_sequence() {
        let mut plan = Plan::new("p", "x");
        plan.append(Subtask::new("t7", "explicit")).unwrap();
        assert_eq!(plan.generate_id(), "t8");
    }

    #[test]
    fn test_brief_text() {
        let mut plan = plan_with(&[SubtaskStatus::Done, SubtaskStatus::Pending]);
        plan.find_mut("t2").unwrap().needs_redo = true;
        let text = plan.brief_text();
        assert!(text.contains("- [done] t1: Task t1"));
        assert!(text.contains("- [pending] t2: Task t2 (redo)"));
    }

    #[test]
    fn test_from_outline() {
        let outline = "Here is the plan:\n- Research the era\n* Sketch characters\n3. Draft chapter one\n4) Edit\nnot an item";
        let plan = Plan::from_outline("p", "Dragons", outline);
        let titles: Vec<_> = plan.subtasks.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Research the era", "Sketch characters", "Draft chapter one", "Edit"]
        );
        assert_eq!(plan.subtasks[3].id, "t4");

        let single = Plan::from_outline("p", "Dragons", "no bullets here");
        assert_eq!(single.subtasks.len(), 1);
        assert_eq!(single.subtasks[0].title, "Dragons");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("DONE".parse::<SubtaskStatus>().unwrap(), SubtaskStatus::Done);
        assert_eq!("in-progress".parse::<SubtaskStatus>().unwrap(), SubtaskStatus::InProgress);
        assert!("bogus".parse::<SubtaskStatus>().is_err());
    }
}
