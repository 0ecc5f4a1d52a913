//! Reviewer role and the reviewer-output grammar
//!
//! ```text
//! <blank lines>*
//! <decision line>            ACCEPT when it contains "accept" (any case), else REDO
//! <reason lines>*            trimmed, empty lines dropped
//! REVISED_TEXT: <text>       or REVISED: ; everything from here on is the revision
//! <revision lines>*
//! ```

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{RoleError, Roles};
use crate::domain::{Plan, Subtask};
use crate::llm::GenRole;
use crate::state::BatchMember;

const REVISION_PREFIXES: [&str; 2] = ["REVISED_TEXT:", "REVISED:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Accept,
    Redo,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Redo => "redo",
        }
    }

    pub fn is_accept(&self) -> bool {
        *self == Self::Accept
    }
}

impl std::fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed reviewer reply
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub decision: ReviewDecision,
    pub reason: String,
    pub revised_text: Option<String>,
}

/// Parse raw reviewer output
pub fn parse_review(text: &str) -> ReviewOutcome {
    debug!(text_len = text.len(), "parse_review: called");
    let lines: Vec<&str> = text.lines().collect();
    let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return ReviewOutcome {
            decision: ReviewDecision::Redo,
            reason: "empty reviewer output".to_string(),
            revised_text: None,
        };
    };

    let decision = if lines[first].to_uppercase().contains("ACCEPT") {
        ReviewDecision::Accept
    } else {
        ReviewDecision::Redo
    };

    let rest = &lines[first + 1..];
    let revision_at = rest.iter().position(|l| revision_prefix(l).is_some());
    let reason_lines = &rest[..revision_at.unwrap_or(rest.len())];
    let reason = reason_lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let revised_text = revision_at.and_then(|idx| {
        let opening = rest[idx].trim_start();
        let prefix_len = revision_prefix(opening).map(str::len).unwrap_or(0);
        let mut block = vec![&opening[prefix_len..]];
        block.extend_from_slice(&rest[idx + 1..]);
        let text = block.join("\n").trim().to_string();
        (!text.is_empty()).then_some(text)
    });

    ReviewOutcome {
        decision,
        reason,
        revised_text,
    }
}

fn revision_prefix(line: &str) -> Option<&'static str> {
    let line = line.trim_start();
    REVISION_PREFIXES.into_iter().find(|p| line.starts_with(p))
}

impl Roles {
    /// Review one subtask output
    pub async fn review(
        &self,
        topic: &str,
        plan: &Plan,
        subtask: &Subtask,
        output: &str,
        extra_context: Option<&str>,
        strict: bool,
    ) -> Result<ReviewOutcome, RoleError> {
        debug!(subtask_id = %subtask.id, strict, "Roles::review: called");
        let system = self.render(
            "reviewer",
            &json!({
                "topic": topic,
                "plan": plan.brief_text(),
                "subtask_id": subtask.id,
                "subtask_title": subtask.title,
                "strict": strict,
                "extra_context": extra_context,
            }),
        )?;
        let raw = self.call(GenRole::Reviewer, &system, output).await?;
        Ok(parse_review(&raw))
    }

    /// Review a whole batch with one call
    pub async fn review_batch(
        &self,
        topic: &str,
        plan: &Plan,
        members: &[BatchMember],
        context_summary: &str,
        strict: bool,
    ) -> Result<ReviewOutcome, RoleError> {
        debug!(members = members.len(), strict, "Roles::review_batch: called");
        let system = self.render(
            "batch-reviewer",
            &json!({
                "topic": topic,
                "plan": plan.brief_text(),
                "context_summary": context_summary,
                "strict": strict,
                "members": members
                    .iter()
                    .map(|m| json!({"subtask_id": m.subtask_id, "title": m.title, "preview": m.preview}))
                    .collect::<Vec<_>>(),
            }),
        )?;
        let ids: Vec<&str> = members.iter().map(|m| m.subtask_id.as_str()).collect();
        let context = format!("Review the batch: {}", ids.join(", "));
        let raw = self.call(GenRole::Reviewer, &system, &context).await?;
        Ok(parse_review(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accept_with_reason() {
        let out = parse_review("\n  Accept.  \nGood pacing.\n\n  Nice ending. \n");
        assert_eq!(out.decision, ReviewDecision::Accept);
        assert_eq!(out.reason, "Good pacing.\nNice ending.");
        assert_eq!(out.revised_text, None);
    }

    #[test]
    fn test_redo_with_revision_block() {
        let out = parse_review("REDO\nToo short.\nREVISED_TEXT: The storm broke.\n\n  She ran.\n");
        assert_eq!(out.decision, ReviewDecision::Redo);
        assert_eq!(out.reason, "Too short.");
        assert_eq!(out.revised_text.as_deref(), Some("The storm broke.\n\n  She ran."));
    }

    #[test]
    fn test_short_revised_prefix_on_own_line() {
        let out = parse_review("ACCEPT\nREVISED:\nNew text");
        assert_eq!(out.reason, "");
        assert_eq!(out.revised_text.as_deref(), Some("New text"));
    }

    #[test]
    fn test_empty_revision_block_is_none() {
        let out = parse_review("ACCEPT\nREVISED_TEXT:   \n  ");
        assert_eq!(out.revised_text, None);
    }

    #[test]
    fn test_malformed_inputs() {
        assert_eq!(parse_review("").reason, "empty reviewer output");
        assert_eq!(parse_review(" \n\t\n").decision, ReviewDecision::Redo);
        assert_eq!(parse_review("LGTM").decision, ReviewDecision::Redo);
        assert_eq!(parse_review("REVISED_TEXT: x").decision, ReviewDecision::Redo);
    }

    fn plain_line() -> impl Strategy<Value = String> {
        "[a-z ,.!]{0,30}"
    }

    proptest! {
        #[test]
        fn prop_never_panics(text in "\\PC*") {
            let out = parse_review(&text);
            if text.trim().is_empty() {
                prop_assert_eq!(out.decision, ReviewDecision::Redo);
            }
        }

        #[test]
        fn prop_leading_blank_lines_ignored(blanks in 0usize..5, reason in prop::collection::vec(plain_line(), 0..4)) {
            let body = format!("ACCEPT\n{}", reason.join("\n"));
            let padded = format!("{}{}", "\n".repeat(blanks), body);
            prop_assert_eq!(parse_review(&padded), parse_review(&body));
        }

        #[test]
        fn prop_revision_block_round_trips(
            decision in prop::bool::ANY,
            reason in prop::collection::vec(plain_line(), 0..4),
            revised in "[a-zA-Z][a-zA-Z .\n]{0,80}",
        ) {
            let head = if decision { "ACCEPT" } else { "REDO" };
            let text = format!("{}\n{}\nREVISED_TEXT: {}", head, reason.join("\n"), revised);
            let out = parse_review(&text);
            prop_assert_eq!(out.decision.is_accept(), decision);
            prop_assert_eq!(out.revised_text.as_deref(), Some(revised.trim()));
            let expected: Vec<&str> = reason.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();
            prop_assert_eq!(out.reason, expected.join("\n"));
        }

        #[test]
        fn prop_first_line_without_accept_is_redo(first in "[b-z ]{1,20}", tail in plain_line()) {
            prop_assume!(!first.trim().is_empty());
            let out = parse_review(&format!("{}\n{}", first, tail));
            prop_assert_eq!(out.decision, ReviewDecision::Redo);
        }
    }
}
