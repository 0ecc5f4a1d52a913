//! Worker role: drafts one subtask

use serde_json::json;
use tracing::debug;

use super::{RoleError, Roles};
use crate::domain::{Plan, Subtask};
use crate::llm::GenRole;

/// Inputs for one worker call
pub struct DraftRequest<'a> {
    pub topic: &'a str,
    pub plan: &'a Plan,
    pub subtask: &'a Subtask,
    /// Previous reviewer reason or user instructions
    pub feedback: Option<&'a str>,
    /// Novel context (profile and summaries)
    pub extra_context: Option<&'a str>,
}

impl Roles {
    pub async fn draft(&self, req: DraftRequest<'_>) -> Result<String, RoleError> {
        debug!(subtask_id = %req.subtask.id, has_feedback = req.feedback.is_some(), "Roles::draft: called");
        let system = self.render(
            "worker",
            &json!({
                "topic": req.topic,
                "plan": req.plan.brief_text(),
                "subtask_id": req.subtask.id,
                "subtask_title": req.subtask.title,
                "subtask_description": req.subtask.description,
                "extra_context": req.extra_context,
                "feedback": req.feedback,
            }),
        )?;
        let context = format!("{}: {}", req.subtask.id, req.subtask.title);
        let text = self.call(GenRole::Worker, &system, &context).await?;
        Ok(text.trim().to_string())
    }
}
