//! Generation roles
//!
//! Each role renders its prompt template, calls the generation service and
//! turns the raw text into something the orchestrator can act on. Parsing is
//! kept in plain functions so it can be tested without a client.

use std::sync::Arc;

use thiserror::Error;

use crate::llm::{GenRole, GenerationClient, LlmError};
use crate::prompts::PromptLoader;

mod classifier;
mod coordinator;
mod expansion;
mod planner;
mod review;
mod worker;

pub use classifier::parse_classification;
pub use coordinator::build_context;
pub use expansion::{
    CONTENT_MARKER, ExpansionCandidate, ExpansionResult, fallback_candidates, parse_candidates, validate_candidate,
};
pub use planner::{
    NOVEL_SETUP_TITLES, PlanHeader, PlanRequest, PlannedSubtask, PlannerOutput, PlannerReply, merge_plan,
    parse_planner_output,
};
pub use review::{ReviewDecision, ReviewOutcome, parse_review};
pub use worker::DraftRequest;

/// Errors from role calls
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("Generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("Empty {0} reply")]
    EmptyReply(&'static str),
}

/// Shared access to the client and the prompt templates
#[derive(Clone)]
pub struct Roles {
    client: Arc<dyn GenerationClient>,
    prompts: Arc<PromptLoader>,
}

impl Roles {
    pub fn new(client: Arc<dyn GenerationClient>, prompts: Arc<PromptLoader>) -> Self {
        Self { client, prompts }
    }

    fn render<T: serde::Serialize>(&self, template: &str, context: &T) -> Result<String, RoleError> {
        self.prompts
            .render(template, context)
            .map_err(|e| RoleError::Prompt(e.to_string()))
    }

    async fn call(&self, role: GenRole, system_prompt: &str, context: &str) -> Result<String, RoleError> {
        Ok(self.client.generate(role, system_prompt, context).await?)
    }
}

/// Strip Markdown code fences and return the outermost JSON value text
///
/// `open`/`close` select object (`{`/`}`) or array (`[`/`]`) extraction.
pub(crate) fn extract_json(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
