//! Command parsing
//!
//! Commands arrive as a text line plus an optional JSON payload. The first
//! word picks the command (a leading `/` is ignored, case does not matter);
//! arguments come from the payload, falling back to the rest of the line.
//! Anything unrecognised is free text.

use serde_json::Value;
use tracing::debug;

use super::DispatchError;

/// Field changes for `update_subtask`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
}

impl SubtaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.notes.is_none() && self.status.is_none()
    }
}

/// Arguments for `insert_subtask` / `append_subtask`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewSubtask {
    pub title: String,
    pub after_id: Option<String>,
    pub subtask_id: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Plan,
    ConfirmPlan,
    Next,
    All,
    Ask { question: String },
    SetCurrent { subtask_id: String },
    Update { subtask_id: String, patch: SubtaskPatch },
    Insert(NewSubtask),
    Append(NewSubtask),
    Skip { subtask_id: String, reason: Option<String> },
    ApplyRevision { subtask_id: String },
    FreeText(String),
}

impl Command {
    /// Parse a command line and its payload
    pub fn parse(text: &str, payload: Option<&Value>) -> Result<Self, DispatchError> {
        debug!(%text, has_payload = payload.is_some(), "Command::parse: called");
        let text = text.trim();
        if text.is_empty() {
            return Err(DispatchError::Validation("Empty command".to_string()));
        }
        let (word, rest) = match text.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (text, ""),
        };
        let keyword = word.trim_start_matches('/').to_lowercase();
        let args = Args { payload, rest };

        let command = match keyword.as_str() {
            "plan" => Self::Plan,
            "confirm_plan" | "confirm" => Self::ConfirmPlan,
            "next" => Self::Next,
            "all" => Self::All,
            "ask" => {
                let question = args
                    .string("question")
                    .or_else(|| args.string("prompt"))
                    .or_else(|| args.rest())
                    .ok_or_else(|| DispatchError::Validation("Please provide a question".to_string()))?;
                Self::Ask { question }
            }
            "set_current_subtask" | "set_current" => Self::SetCurrent {
                subtask_id: args.subtask_id()?,
            },
            "update_subtask" | "update" => {
                let subtask_id = args.subtask_id()?;
                let patch = SubtaskPatch {
                    title: args.string("title"),
                    description: args.string("description"),
                    notes: args.string("notes"),
                    status: args.string("status"),
                };
                Self::Update { subtask_id, patch }
            }
            "insert_subtask" | "insert" => Self::Insert(args.new_subtask()?),
            "append_subtask" | "append" => Self::Append(args.new_subtask()?),
            "skip_subtask" | "skip" => Self::Skip {
                subtask_id: args.subtask_id()?,
                reason: args.string("reason").or_else(|| args.string("notes")),
            },
            "apply_reviewer_revision" | "apply_revision" => Self::ApplyRevision {
                subtask_id: args.subtask_id()?,
            },
            _ => Self::FreeText(text.to_string()),
        };
        Ok(command)
    }

    /// Name logged with the `user_command` envelope
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::ConfirmPlan => "confirm_plan",
            Self::Next => "next",
            Self::All => "all",
            Self::Ask { .. } => "ask",
            Self::SetCurrent { .. } => "set_current_subtask",
            Self::Update { .. } => "update_subtask",
            Self::Insert(_) => "insert_subtask",
            Self::Append(_) => "append_subtask",
            Self::Skip { .. } => "skip_subtask",
            Self::ApplyRevision { .. } => "apply_reviewer_revision",
            Self::FreeText(_) => "free_text",
        }
    }

    /// Direct plan edits, disabled once the plan is locked
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::SetCurrent { .. } | Self::Update { .. } | Self::Insert(_) | Self::Append(_) | Self::Skip { .. }
        )
    }
}

struct Args<'a> {
    payload: Option<&'a Value>,
    rest: &'a str,
}

impl Args<'_> {
    fn string(&self, key: &str) -> Option<String> {
        self.payload
            .and_then(|p| p.get(key))
            .and_then(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
    }

    fn rest(&self) -> Option<String> {
        (!self.rest.is_empty()).then(|| self.rest.to_string())
    }

    fn first_word(&self) -> Option<String> {
        self.rest.split_whitespace().next().map(str::to_string)
    }

    fn subtask_id(&self) -> Result<String, DispatchError> {
        self.string("subtask_id")
            .or_else(|| self.first_word())
            .ok_or_else(|| DispatchError::Validation("Please provide subtask_id".to_string()))
    }

    fn new_subtask(&self) -> Result<NewSubtask, DispatchError> {
        let title = self
            .string("title")
            .or_else(|| self.rest())
            .ok_or_else(|| DispatchError::Validation("Please provide title".to_string()))?;
        Ok(NewSubtask {
            title,
            after_id: self.string("after_id"),
            subtask_id: self.string("subtask_id"),
            status: self.string("status"),
            notes: self.string("notes"),
            description: self.string("description"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keywords_ignore_slash_and_case() {
        assert_eq!(Command::parse("/NEXT", None).unwrap(), Command::Next);
        assert_eq!(Command::parse("  confirm_plan ", None).unwrap(), Command::ConfirmPlan);
        assert_eq!(Command::parse("Plan", None).unwrap(), Command::Plan);
        assert_eq!(Command::parse("/all", None).unwrap(), Command::All);
        assert_eq!(Command::parse("confirm", None).unwrap(), Command::ConfirmPlan);
    }

    #[test]
    fn test_short_edit_keywords() {
        assert_eq!(
            Command::parse("set_current t3", None).unwrap(),
            Command::SetCurrent {
                subtask_id: "t3".to_string()
            }
        );
        assert_eq!(
            Command::parse("/Skip t7", None).unwrap(),
            Command::Skip {
                subtask_id: "t7".to_string(),
                reason: None
            }
        );
        assert_eq!(
            Command::parse("apply_revision t1", None).unwrap(),
            Command::ApplyRevision {
                subtask_id: "t1".to_string()
            }
        );
        assert!(matches!(Command::parse("insert Epilogue", None).unwrap(), Command::Insert(n) if n.title == "Epilogue"));
        assert!(matches!(Command::parse("append Coda", None).unwrap(), Command::Append(n) if n.title == "Coda"));
        let cmd = Command::parse("update", Some(&json!({"subtask_id": "t2", "title": "Renamed"}))).unwrap();
        assert!(matches!(cmd, Command::Update { ref subtask_id, ref patch } if subtask_id == "t2" && patch.title.as_deref() == Some("Renamed")));
        for text in ["insert Epilogue", "append Coda", "skip t7", "set_current t3", "apply_revision t1"] {
            assert_ne!(Command::parse(text, None).unwrap().name(), "free_text", "{text}");
        }
    }

    #[test]
    fn test_empty_command() {
        let err = Command::parse("   ", None).unwrap_err();
        assert_eq!(err.to_string(), "Empty command");
    }

    #[test]
    fn test_ask_from_payload_or_rest() {
        let cmd = Command::parse("ask", Some(&json!({"prompt": "how long?"}))).unwrap();
        assert_eq!(
            cmd,
            Command::Ask {
                question: "how long?".to_string()
            }
        );
        let cmd = Command::parse("/ask what is next", None).unwrap();
        assert_eq!(
            cmd,
            Command::Ask {
                question: "what is next".to_string()
            }
        );
        assert!(Command::parse("ask", None).is_err());
    }

    #[test]
    fn test_subtask_id_required() {
        let err = Command::parse("skip_subtask", Some(&json!({}))).unwrap_err();
        assert_eq!(err.to_string(), "Please provide subtask_id");

        let cmd = Command::parse("skip_subtask t3", Some(&json!({"notes": "not needed"}))).unwrap();
        assert_eq!(
            cmd,
            Command::Skip {
                subtask_id: "t3".to_string(),
                reason: Some("not needed".to_string())
            }
        );
    }

    #[test]
    fn test_insert_payload() {
        let cmd = Command::parse(
            "insert_subtask",
            Some(&json!({"title": "Interlude", "after_id": "t2", "status": "pending"})),
        )
        .unwrap();
        let Command::Insert(new) = cmd else {
            panic!("expected insert");
        };
        assert_eq!(new.title, "Interlude");
        assert_eq!(new.after_id.as_deref(), Some("t2"));
        assert!(Command::parse("insert_subtask", None).is_err());
    }

    #[test]
    fn test_update_patch_and_structural() {
        let cmd = Command::parse("update_subtask", Some(&json!({"subtask_id": "t1", "notes": "tighter"}))).unwrap();
        assert!(cmd.is_structural());
        let Command::Update { subtask_id, patch } = cmd else {
            panic!("expected update");
        };
        assert_eq!(subtask_id, "t1");
        assert_eq!(patch.notes.as_deref(), Some("tighter"));
        assert!(patch.title.is_none());
        assert!(!Command::Next.is_structural());
    }

    #[test]
    fn test_free_text_fallback() {
        let cmd = Command::parse("Make chapter two darker", None).unwrap();
        assert_eq!(cmd, Command::FreeText("Make chapter two darker".to_string()));
        assert_eq!(cmd.name(), "free_text");
    }
}
