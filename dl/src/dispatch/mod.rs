//! Command dispatcher
//!
//! Turns a parsed [`Command`] into plan and session changes. Commands that
//! start pipeline work only claim the session; the orchestrator decides
//! whether the run happens inline or in the background.

use artifactstore::ArtifactError;
use envelopestore::{LogError, SchemaError};
use thiserror::Error;

use crate::domain::PlanError;
use crate::pipeline::PipelineError;
use crate::roles::RoleError;
use crate::state::StateError;

mod commands;
mod dispatcher;
mod intents;

pub use commands::{Command, NewSubtask, SubtaskPatch};
pub use dispatcher::{Dispatched, Dispatcher};
pub use intents::{MAX_INTENT_ITERATIONS, RedoMode};
pub(crate) use intents::reset_for_rework;

/// Reply when a run is refused because one is active
pub const RUN_IN_PROGRESS: &str = "A run is already in progress for this session.";

/// Orchestrator message posted when a structural edit hits a locked plan
pub const LOCKED_NOTICE: &str = "The plan is locked. Direct plan editing commands are disabled in execution phase. \
     Please describe the change you want in natural language, and I will update the plan for you.";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Plan editing is disabled after lock.")]
    Locked,

    #[error("{0}")]
    Upstream(String),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Event log error: {0}")]
    Log(LogError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

impl DispatchError {
    /// Failures reported back as `ok=false` instead of an error
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::Locked | Self::Upstream(_)
        )
    }

    pub(crate) fn subtask_not_found(id: &str) -> Self {
        Self::NotFound(format!("Subtask {} not found", id))
    }
}

impl From<LogError> for DispatchError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Schema(schema) => Self::Schema(schema),
            other => Self::Log(other),
        }
    }
}

impl From<RoleError> for DispatchError {
    fn from(e: RoleError) -> Self {
        Self::Upstream(e.to_string())
    }
}

impl From<PlanError> for DispatchError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::UnknownSubtask(id) => Self::subtask_not_found(&id),
            PlanError::DuplicateId(_) => Self::Validation(e.to_string()),
        }
    }
}

impl From<PipelineError> for DispatchError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Role(e) => e.into(),
            PipelineError::State(e) => Self::State(e),
            PipelineError::Log(e) => e.into(),
            PipelineError::Artifact(e) => Self::Artifact(e),
            PipelineError::NotFound(id) => Self::subtask_not_found(&id),
            PipelineError::Locked(_) => Self::Validation(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use envelopestore::PayloadKind;

    #[test]
    fn test_log_schema_errors_stay_schema() {
        let schema = || SchemaError::MissingField {
            kind: PayloadKind::SubtaskResult,
            field: "subtask_id".to_string(),
        };
        let err: DispatchError = LogError::Schema(schema()).into();
        assert!(matches!(err, DispatchError::Schema(ref s) if *s == schema()));
        assert!(!err.is_command_failure());
    }

    #[test]
    fn test_command_failures() {
        assert!(DispatchError::Locked.is_command_failure());
        assert_eq!(DispatchError::Locked.to_string(), "Plan editing is disabled after lock.");

        let err: DispatchError = PlanError::UnknownSubtask("t9".to_string()).into();
        assert_eq!(err.to_string(), "Subtask t9 not found");

        let err: DispatchError = RoleError::Llm(LlmError::MissingCredentials("OPENAI_API_KEY".to_string())).into();
        assert!(err.is_command_failure());

        let err: DispatchError = StateError::Missing("s1".to_string()).into();
        assert!(!err.is_command_failure());
    }
}
