//! Structured intents derived from free-text requests

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::plan::Plan;

/// What a queued request asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IntentKind {
    ContentChange,
    PlanUpdate,
    Other,
    TriggerRedo,
    /// Label the classifier produced that we do not understand
    Unknown(String),
}

impl IntentKind {
    /// Map free-form classifier labels onto the known kinds
    pub fn normalize(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "content" | "content_change" | "request_content_change" => Self::ContentChange,
            "plan" | "plan_update" | "modify_plan" | "request_plan_update" => Self::PlanUpdate,
            "redo" | "trigger_redo" => Self::TriggerRedo,
            "other" | "request_other" => Self::Other,
            _ => Self::Unknown(label.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ContentChange => "content_change",
            Self::PlanUpdate => "plan_update",
            Self::Other => "other",
            Self::TriggerRedo => "trigger_redo",
            Self::Unknown(label) => label,
        }
    }
}

impl From<String> for IntentKind {
    fn from(s: String) -> Self {
        Self::normalize(&s)
    }
}

impl From<IntentKind> for String {
    fn from(kind: IntentKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A queued, structured interpretation of a user request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    #[serde(default)]
    pub target_subtask_id: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub needs_redo: bool,
    #[serde(default)]
    pub raw_text: Option<String>,
}

impl Intent {
    pub fn new(kind: IntentKind) -> Self {
        Self {
            kind,
            target_subtask_id: None,
            instructions: None,
            needs_redo: false,
            raw_text: None,
        }
    }

    pub fn other(raw_text: impl Into<String>) -> Self {
        let mut intent = Self::new(IntentKind::Other);
        intent.raw_text = Some(raw_text.into());
        intent
    }

    pub fn trigger_redo(subtask_id: impl Into<String>, instructions: Option<String>) -> Self {
        let mut intent = Self::new(IntentKind::TriggerRedo);
        intent.target_subtask_id = Some(subtask_id.into());
        intent.instructions = instructions;
        intent.needs_redo = true;
        intent
    }

    pub fn with_target(mut self, subtask_id: Option<String>) -> Self {
        self.target_subtask_id = subtask_id;
        self
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }
}

/// Resolve a classifier target (id string or 0-based index) against the plan
pub fn resolve_target(value: &Value, plan: &Plan) -> Option<String> {
    debug!(?value, "resolve_target: called");
    match value {
        Value::String(s) => {
            let s = s.trim();
            if plan.find(s).is_some() {
                return Some(s.to_string());
            }
            s.parse::<usize>()
                .ok()
                .and_then(|idx| plan.subtasks.get(idx))
                .map(|sub| sub.id.clone())
        }
        Value::Number(n) => n
            .as_u64()
            .and_then(|idx| plan.subtasks.get(idx as usize))
            .map(|sub| sub.id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Subtask;
    use serde_json::json;

    #[test]
    fn test_normalize_labels() {
        assert_eq!(IntentKind::normalize("content"), IntentKind::ContentChange);
        assert_eq!(IntentKind::normalize("REQUEST_CONTENT_CHANGE"), IntentKind::ContentChange);
        assert_eq!(IntentKind::normalize("modify_plan"), IntentKind::PlanUpdate);
        assert_eq!(IntentKind::normalize("request_plan_update"), IntentKind::PlanUpdate);
        assert_eq!(IntentKind::normalize("redo"), IntentKind::TriggerRedo);
        assert_eq!(IntentKind::normalize("request_other"), IntentKind::Other);
        assert_eq!(
            IntentKind::normalize("summon_dragon"),
            IntentKind::Unknown("summon_dragon".to_string())
        );
    }

    #[test]
    fn test_kind_serializes_as_label() {
        let intent = Intent::trigger_redo("t2", Some("shorter".to_string()));
        let value = serde_json::to_value(&intent).unwrap();
        assert_eq!(value["kind"], "trigger_redo");

        let back: Intent = serde_json::from_value(json!({"kind": "plan"})).unwrap();
        assert_eq!(back.kind, IntentKind::PlanUpdate);
        assert!(!back.needs_redo);
    }

    #[test]
    fn test_resolve_target() {
        let mut plan = Plan::new("p", "x");
        plan.append(Subtask::new("t1", "a")).unwrap();
        plan.append(Subtask::new("t2", "b")).unwrap();

        assert_eq!(resolve_target(&json!("t2"), &plan), Some("t2".to_string()));
        assert_eq!(resolve_target(&json!(0), &plan), Some("t1".to_string()));
        assert_eq!(resolve_target(&json!("1"), &plan), Some("t2".to_string()));
        assert_eq!(resolve_target(&json!("t9"), &plan), None);
        assert_eq!(resolve_target(&json!(5), &plan), None);
        assert_eq!(resolve_target(&Value::Null, &plan), None);
    }
}
