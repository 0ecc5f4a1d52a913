//! Intent classifier

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{Roles, extract_json};
use crate::domain::{Intent, IntentKind, Plan, resolve_target};
use crate::llm::GenRole;

/// Turn a classifier reply into an intent; anything unreadable is `other`
pub fn parse_classification(reply: &str, plan: &Plan, user_text: &str) -> Intent {
    debug!(reply_len = reply.len(), "parse_classification: called");
    let Some(value) = extract_json(reply, '{', '}').and_then(|obj| serde_json::from_str::<Value>(obj).ok()) else {
        debug!("parse_classification: no JSON object");
        return Intent::other(user_text);
    };
    let Some(kind) = value.get("kind").and_then(Value::as_str) else {
        debug!("parse_classification: missing kind");
        return Intent::other(user_text);
    };

    let target = value.get("target_subtask_id").and_then(|v| resolve_target(v, plan));
    let instructions = value
        .get("instructions")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut intent = Intent::new(IntentKind::normalize(kind))
        .with_target(target)
        .with_instructions(instructions);
    intent.needs_redo = value.get("needs_redo").and_then(Value::as_bool).unwrap_or(false);
    intent.raw_text = Some(user_text.to_string());
    intent
}

impl Roles {
    /// Classify a free-text request; never fails
    pub async fn classify(&self, plan: &Plan, text: &str) -> Intent {
        debug!(text_len = text.len(), "Roles::classify: called");
        let reply = match self.render("classifier", &json!({"plan": plan.brief_text()})) {
            Ok(system) => self.call(GenRole::Classifier, &system, text).await,
            Err(e) => Err(e),
        };
        match reply {
            Ok(reply) => parse_classification(&reply, plan, text),
            Err(e) => {
                warn!(error = %e, "Roles::classify: classifier failed, treating as other");
                Intent::other(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Subtask;
    use crate::llm::mock::MockGenerationClient;
    use crate::prompts::PromptLoader;
    use std::sync::Arc;

    fn plan() -> Plan {
        let mut plan = Plan::new("p1", "Story");
        plan.append(Subtask::new("t1", "Intro")).unwrap();
        plan.append(Subtask::new("t2", "Ending")).unwrap();
        plan
    }

    #[test]
    fn test_parse_content_change_by_index() {
        let reply = r#"{"kind": "request_content_change", "target_subtask_id": 1, "instructions": " darker ", "needs_redo": true}"#;
        let intent = parse_classification(reply, &plan(), "make the ending darker");
        assert_eq!(intent.kind, IntentKind::ContentChange);
        assert_eq!(intent.target_subtask_id.as_deref(), Some("t2"));
        assert_eq!(intent.instructions.as_deref(), Some("darker"));
        assert!(intent.needs_redo);
        assert_eq!(intent.raw_text.as_deref(), Some("make the ending darker"));
    }

    #[test]
    fn test_parse_unknown_kind_is_kept() {
        let intent = parse_classification(r#"{"kind": "celebrate", "target_subtask_id": null}"#, &plan(), "yay");
        assert_eq!(intent.kind, IntentKind::Unknown("celebrate".to_string()));
        assert_eq!(intent.target_subtask_id, None);
    }

    #[test]
    fn test_parse_garbage_is_other() {
        let intent = parse_classification("I think it is a plan update", &plan(), "add a chapter");
        assert_eq!(intent, Intent::other("add a chapter"));
        let intent = parse_classification(r#"{"target_subtask_id": "t1"}"#, &plan(), "x");
        assert_eq!(intent.kind, IntentKind::Other);
    }

    #[tokio::test]
    async fn test_classify_upstream_failure_is_other() {
        let roles = Roles::new(Arc::new(MockGenerationClient::new()), Arc::new(PromptLoader::embedded_only()));
        let intent = roles.classify(&plan(), "hello").await;
        assert_eq!(intent, Intent::other("hello"));
    }
}
