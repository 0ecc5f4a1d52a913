//! Coordinator role: answers questions about a running session

use artifactstore::{ArtifactStore, truncate_chars};
use serde_json::json;
use tracing::debug;

use super::{RoleError, Roles};
use crate::domain::{Plan, SubtaskStatus};
use crate::llm::GenRole;
use crate::state::SessionState;

const NOTES_DIGEST: usize = 200;
const OUTPUT_PREVIEW: usize = 300;

/// Assemble the context block the coordinator answers from
pub fn build_context(plan: &Plan, state: &SessionState, artifacts: &ArtifactStore) -> String {
    debug!(session_id = %state.session_id, "build_context: called");
    let mut sections = vec![plan.brief_text()];

    if let Some(done) = plan.subtasks.iter().rev().find(|s| s.status == SubtaskStatus::Done) {
        let mut block = format!("Last completed: {} ({})", done.id, done.title);
        if !done.notes.is_empty() {
            block.push_str(&format!("\nNotes: {}", truncate_chars(&done.notes, NOTES_DIGEST)));
        }
        let preview = state
            .cached_worker_outputs
            .iter()
            .filter(|o| o.subtask_id == done.id)
            .max_by_key(|o| o.timestamp)
            .and_then(|o| artifacts.read_text(&o.artifact, Some(OUTPUT_PREVIEW)).ok())
            .or_else(|| (!done.output.is_empty()).then(|| truncate_chars(&done.output, OUTPUT_PREVIEW)));
        if let Some(preview) = preview {
            block.push_str(&format!("\nLatest output: {}", preview));
        }
        sections.push(block);
    }

    if let Some(current) = plan.subtasks.iter().find(|s| s.status == SubtaskStatus::InProgress) {
        sections.push(format!("In progress: {} ({})", current.id, current.title));
    }
    if let Some(next) = plan.subtasks.iter().find(|s| s.status == SubtaskStatus::Pending) {
        sections.push(format!("Next pending: {} ({})", next.id, next.title));
    }
    sections.join("\n\n")
}

impl Roles {
    /// Answer a user question with the assembled context
    pub async fn answer(&self, mode: &str, context: &str, question: &str) -> Result<String, RoleError> {
        debug!(%mode, question_len = question.len(), "Roles::answer: called");
        let system = self.render("coordinator", &json!({"mode": mode, "context": context}))?;
        let answer = self.call(GenRole::Coordinator, &system, question).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(RoleError::EmptyReply("coordinator"));
        }
        Ok(answer.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Subtask;
    use crate::llm::mock::MockGenerationClient;
    use crate::prompts::PromptLoader;
    use crate::state::WorkerOutputRef;
    use artifactstore::ArtifactKind;
    use chrono::Utc;
    use std::sync::Arc;

    #[test]
    fn test_context_includes_last_done_current_and_next() {
        let temp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        let artifact = store
            .save("s1", &"x".repeat(500), ArtifactKind::Markdown, "draft")
            .unwrap();

        let mut plan = Plan::new("p1", "Story");
        let mut done = Subtask::new("t1", "Intro").with_status(SubtaskStatus::Done);
        done.notes = "n".repeat(250);
        plan.append(done).unwrap();
        plan.append(Subtask::new("t2", "Middle").with_status(SubtaskStatus::InProgress))
            .unwrap();
        plan.append(Subtask::new("t3", "Ending")).unwrap();

        let mut state = SessionState::new("s1", "p1", "Story");
        state.cache_worker_output(WorkerOutputRef {
            subtask_id: "t1".to_string(),
            artifact,
            timestamp: Utc::now(),
        });

        let context = build_context(&plan, &state, &store);
        assert!(context.starts_with("Plan: Story (id=p1)"));
        assert!(context.contains("Last completed: t1 (Intro)"));
        assert!(context.contains(&format!("Notes: {}...", "n".repeat(200))));
        assert!(context.contains(&format!("Latest output: {}...", "x".repeat(300))));
        assert!(context.contains("In progress: t2 (Middle)"));
        assert!(context.contains("Next pending: t3 (Ending)"));
    }

    #[test]
    fn test_context_falls_back_to_subtask_output() {
        let temp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        let mut plan = Plan::new("p1", "Story");
        let mut done = Subtask::new("t1", "Intro").with_status(SubtaskStatus::Done);
        done.output = "Once upon a time".to_string();
        plan.append(done).unwrap();

        let context = build_context(&plan, &SessionState::new("s1", "p1", "Story"), &store);
        assert!(context.contains("Latest output: Once upon a time"));
        assert!(!context.contains("Next pending"));
    }

    #[tokio::test]
    async fn test_answer_trims_reply() {
        let client = Arc::new(MockGenerationClient::new().with_default(GenRole::Coordinator, "\n  It is on t3.  \n"));
        let roles = Roles::new(client, Arc::new(PromptLoader::embedded_only()));
        let answer = roles.answer("execution", "Plan: Story", "where are we?").await.unwrap();
        assert_eq!(answer, "It is on t3.");
    }

    #[tokio::test]
    async fn test_blank_answer_is_an_error() {
        let client = Arc::new(MockGenerationClient::new().with_default(GenRole::Coordinator, "  \n\t"));
        let roles = Roles::new(client, Arc::new(PromptLoader::embedded_only()));
        let err = roles.answer("execution", "Plan: Story", "why?").await.unwrap_err();
        assert!(matches!(err, RoleError::EmptyReply("coordinator")));
        assert_eq!(err.to_string(), "Empty coordinator reply");
    }
}
