//! Envelope types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Protocol version stamped on every envelope
pub const PROTOCOL_VERSION: &str = "1.0";

/// Participant that produced or receives an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Planner,
    Worker,
    Reviewer,
    Coordinator,
    Orchestrator,
    Observer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Planner => "planner",
            Self::Worker => "worker",
            Self::Reviewer => "reviewer",
            Self::Coordinator => "coordinator",
            Self::Orchestrator => "orchestrator",
            Self::Observer => "observer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Enumerated payload type of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    PlanCreated,
    SubtaskResult,
    CoordDecision,
    CoordResponse,
    UserCommand,
    UserFeedback,
    PlanLocked,
    Error,
}

impl PayloadKind {
    /// Every registered kind, in registry order
    pub const ALL: [PayloadKind; 8] = [
        Self::PlanCreated,
        Self::SubtaskResult,
        Self::CoordDecision,
        Self::CoordResponse,
        Self::UserCommand,
        Self::UserFeedback,
        Self::PlanLocked,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanCreated => "plan_created",
            Self::SubtaskResult => "subtask_result",
            Self::CoordDecision => "coord_decision",
            Self::CoordResponse => "coord_response",
            Self::UserCommand => "user_command",
            Self::UserFeedback => "user_feedback",
            Self::PlanLocked => "plan_locked",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PayloadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown payload kind: {}", s))
    }
}

/// One entry in a session's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub session_id: String,

    /// UTC timestamp, serialized as RFC 3339 with a `Z` suffix
    pub timestamp: DateTime<Utc>,

    pub source: Role,

    pub target: Role,

    pub payload_type: PayloadKind,

    pub version: String,

    /// Kind-specific body, validated against [`crate::schema`]
    pub payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Envelope {
    /// Build an envelope stamped with the current time
    pub fn new(
        session_id: impl Into<String>,
        source: Role,
        target: Role,
        payload_type: PayloadKind,
        payload: Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            source,
            target,
            payload_type,
            version: PROTOCOL_VERSION.to_string(),
            payload,
            metadata: None,
            idempotency_key: None,
        }
    }

    /// Override the timestamp (recovery tooling and tests)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Read a string field from the payload
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// The subtask this envelope refers to, if any
    pub fn subtask_id(&self) -> Option<&str> {
        self.payload_str("subtask_id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_serializes_wire_format() {
        let env = Envelope::new(
            "sess-1",
            Role::Worker,
            Role::Coordinator,
            PayloadKind::SubtaskResult,
            json!({"subtask_id": "t1"}),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["payload_type"], "subtask_result");
        assert_eq!(value["source"], "worker");
        assert_eq!(value["version"], "1.0");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_envelope_parses_offset_timestamp() {
        let line = r#"{"session_id":"s","timestamp":"2025-12-06T20:34:56+08:00","source":"user",
            "target":"coordinator","payload_type":"user_command","version":"1.0","payload":{"text":"hi"}}"#;
        let env: Envelope = serde_json::from_str(line).unwrap();
        assert_eq!(env.timestamp.to_rfc3339(), "2025-12-06T12:34:56+00:00");
        assert_eq!(env.payload_str("text"), Some("hi"));
    }

    #[test]
    fn test_unknown_payload_type_is_rejected() {
        let line = r#"{"session_id":"s","timestamp":"2025-12-06T12:00:00Z","source":"user",
            "target":"coordinator","payload_type":"gossip","version":"1.0","payload":{}}"#;
        assert!(serde_json::from_str::<Envelope>(line).is_err());
    }

    #[test]
    fn test_payload_kind_from_str() {
        assert_eq!("coord_decision".parse::<PayloadKind>(), Ok(PayloadKind::CoordDecision));
        assert!("nope".parse::<PayloadKind>().is_err());
    }
}
