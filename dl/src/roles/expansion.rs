//! Chapter expansion after the pivot subtask

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{Roles, extract_json};
use crate::domain::Plan;
use crate::llm::GenRole;

/// Phrase every chapter description must carry
pub const CONTENT_MARKER: &str = "cover full content";

static SEQUENCE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:chapter|part|section)\s+\d+|第\s*[0-9一二三四五六七八九十百千]+\s*章|^\s*\d+\.").unwrap()
});

/// One proposed subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionCandidate {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// What an expansion round produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpansionResult {
    pub accepted: Vec<ExpansionCandidate>,
    /// `(title, reason)` for every dropped candidate
    pub dropped: Vec<(String, String)>,
    pub used_fallback: bool,
}

/// Check a candidate against the structural rule
pub fn validate_candidate(candidate: &ExpansionCandidate) -> Result<(), String> {
    if !SEQUENCE_MARKER.is_match(&candidate.title) {
        return Err("title has no sequence marker".to_string());
    }
    if !candidate.description.to_lowercase().contains(CONTENT_MARKER) {
        return Err(format!("description lacks \"{}\"", CONTENT_MARKER));
    }
    Ok(())
}

/// Parse the expansion reply into candidates
///
/// Accepts a bare JSON array or an object wrapping one under `chapters` or
/// `subtasks`. Entries that are not objects with a title are ignored.
pub fn parse_candidates(text: &str) -> Vec<ExpansionCandidate> {
    debug!(text_len = text.len(), "parse_candidates: called");
    let value = extract_json(text, '[', ']')
        .and_then(|arr| serde_json::from_str::<Value>(arr).ok())
        .or_else(|| {
            extract_json(text, '{', '}')
                .and_then(|obj| serde_json::from_str::<Value>(obj).ok())
                .and_then(|v| v.get("chapters").or_else(|| v.get("subtasks")).cloned())
        });
    let Some(Value::Array(items)) = value else {
        debug!("parse_candidates: no array found");
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ExpansionCandidate>(item).ok())
        .collect()
}

/// Deterministic chapters used when nothing valid came back
pub fn fallback_candidates(count: usize) -> Vec<ExpansionCandidate> {
    (1..=count.max(1))
        .map(|n| ExpansionCandidate {
            title: format!("Chapter {}", n),
            description: format!(
                "Draft chapter {} following the chapter allocation; {} of the events assigned to it.",
                n, CONTENT_MARKER
            ),
        })
        .collect()
}

impl Roles {
    /// Ask the planner for the next block of chapter subtasks
    ///
    /// Never fails: generation errors and malformed replies end in the
    /// deterministic fallback.
    pub async fn expand(&self, topic: &str, plan: &Plan, setup_summary: &str, count: usize) -> ExpansionResult {
        debug!(%topic, count, "Roles::expand: called");
        let mut result = ExpansionResult::default();

        let reply = match self.render(
            "expansion",
            &json!({
                "topic": topic,
                "plan": plan.brief_text(),
                "setup_summary": setup_summary,
                "count": count,
            }),
        ) {
            Ok(system) => self.call(GenRole::Planner, &system, "Propose the chapter subtasks.").await,
            Err(e) => Err(e),
        };

        match reply {
            Ok(text) => {
                for candidate in parse_candidates(&text) {
                    match validate_candidate(&candidate) {
                        Ok(()) => result.accepted.push(candidate),
                        Err(reason) => {
                            warn!(title = %candidate.title, %reason, "Dropping expansion candidate");
                            result.dropped.push((candidate.title, reason));
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Roles::expand: generation failed");
                result.dropped.push(("(expansion)".to_string(), format!("generation failed: {}", e)));
            }
        }

        if result.accepted.is_empty() {
            info!(count, "Expansion produced no valid candidates, using fallback chapters");
            result.accepted = fallback_candidates(count);
            result.used_fallback = true;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockGenerationClient;
    use crate::prompts::PromptLoader;
    use std::sync::Arc;

    fn candidate(title: &str, description: &str) -> ExpansionCandidate {
        ExpansionCandidate {
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_sequence_markers() {
        for title in ["Chapter 3: Storm", "part 2", "Section 10 - Finale", "第三章 风暴", "第12章", "4. The Return"] {
            assert!(
                validate_candidate(&candidate(title, "Cover Full Content here")).is_ok(),
                "{}",
                title
            );
        }
        assert!(validate_candidate(&candidate("The Storm", "cover full content")).is_err());
        assert!(validate_candidate(&candidate("Chapter 1", "just the events")).is_err());
    }

    #[test]
    fn test_sequence_marker_inside_title() {
        for title in ["The Storm (Chapter 3)", "Homecoming, Part 2", "终章之前 第九章"] {
            assert!(validate_candidate(&candidate(title, "cover full content")).is_ok(), "{}", title);
        }
        // Bare numbers only count as a leading "N."
        assert!(validate_candidate(&candidate("The 3. Storm", "cover full content")).is_err());
        assert!(validate_candidate(&candidate("Rechapter 3", "cover full content")).is_err());
    }

    #[test]
    fn test_parse_candidates_shapes() {
        let arr = parse_candidates(r#"```json
[{"title": "Chapter 1", "description": "x"}, "junk", {"description": "no title"}]
```"#);
        assert_eq!(arr.len(), 1);

        let wrapped = parse_candidates(r#"{"chapters": [{"title": "Chapter 2"}]}"#);
        assert_eq!(wrapped[0].title, "Chapter 2");
        assert!(parse_candidates("no json at all").is_empty());
    }

    #[test]
    fn test_fallback_is_valid() {
        let fallback = fallback_candidates(3);
        assert_eq!(fallback.len(), 3);
        assert_eq!(fallback[2].title, "Chapter 3");
        assert!(fallback.iter().all(|c| validate_candidate(c).is_ok()));
    }

    #[tokio::test]
    async fn test_expand_drops_malformed() {
        let reply = r#"[
            {"title": "Chapter 1: Arrival", "description": "Arrival; cover full content."},
            {"title": "Epilogue", "description": "cover full content"}
        ]"#;
        let client = Arc::new(MockGenerationClient::new().with_response(GenRole::Planner, reply));
        let roles = Roles::new(client, Arc::new(PromptLoader::embedded_only()));
        let result = roles.expand("dragons", &Plan::new("p1", "dragons"), "", 4).await;
        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.dropped.len(), 1);
        assert_eq!(result.dropped[0].0, "Epilogue");
        assert!(!result.used_fallback);
    }

    #[tokio::test]
    async fn test_expand_all_malformed_uses_fallback() {
        let client = Arc::new(MockGenerationClient::new().with_response(GenRole::Planner, r#"[{"title": "Epilogue"}]"#));
        let roles = Roles::new(client, Arc::new(PromptLoader::embedded_only()));
        let result = roles.expand("dragons", &Plan::new("p1", "dragons"), "", 2).await;
        assert!(result.used_fallback);
        assert_eq!(result.accepted, fallback_candidates(2));
        assert_eq!(result.dropped.len(), 1);
    }

    #[tokio::test]
    async fn test_expand_generation_error_uses_fallback() {
        let client = Arc::new(MockGenerationClient::new());
        let roles = Roles::new(client, Arc::new(PromptLoader::embedded_only()));
        let result = roles.expand("dragons", &Plan::new("p1", "dragons"), "", 2).await;
        assert!(result.used_fallback);
        assert!(result.dropped[0].1.starts_with("generation failed"));
    }
}
