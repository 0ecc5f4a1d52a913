//! Subtask execution pipeline
//!
//! Drives subtasks through worker → reviewer, with reviewer batching after
//! the setup phase, novel-mode summaries and chapter expansion, and a retry
//! ceiling that parks a subtask in `needs_attention`.

use artifactstore::ArtifactError;
use envelopestore::LogError;
use thiserror::Error;

use crate::roles::RoleError;
use crate::state::StateError;

mod batch;
mod novel;
mod runner;

pub use runner::{Pipeline, ProcessOptions, RunMode, RunOutcome, StepOutcome};

/// Preview length stored with batch members
pub const PREVIEW_CHARS: usize = 400;

/// Digest length used in novel summaries
pub const DIGEST_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Role(#[from] RoleError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Event log error: {0}")]
    Log(#[from] LogError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Subtask {0} not found")]
    NotFound(String),

    #[error("Session {0} is being run by another process")]
    Locked(String),
}
