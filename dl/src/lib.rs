//! DraftLoop - plan, draft, review and revise orchestrator
//!
//! DraftLoop turns a topic into a plan of subtasks and drives each one
//! through a worker draft and a reviewer verdict. Users steer a session with
//! commands or free text; every step is recorded as a schema-validated
//! envelope so a session can be inspected, rendered and rehydrated later.
//!
//! # Core Concepts
//!
//! - **Plan lock**: structural edits are allowed only while planning
//! - **Review gate**: a subtask becomes `done` only after an ACCEPT
//! - **Batched review**: after the setup phase, outputs are reviewed in groups
//! - **Append-only log**: envelopes are the audit trail and fallback source
//!
//! # Modules
//!
//! - [`config`] - Configuration types and loading
//! - [`domain`] - Plan, subtask, intent and progress types
//! - [`state`] - Session state actor and on-disk files
//! - [`llm`] - Generation client trait and providers
//! - [`prompts`] - Prompt templates
//! - [`roles`] - Planner, worker, reviewer, coordinator and classifier
//! - [`pipeline`] - Subtask execution, batching and novel mode
//! - [`dispatch`] - Command parsing and dispatch
//! - [`snapshot`] - Session views
//! - [`orchestrator`] - Entry point tying the pieces together
//! - [`cli`] / [`repl`] - Command-line and interactive surfaces

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod repl;
pub mod roles;
pub mod services;
pub mod snapshot;
pub mod state;

// Re-export commonly used types
pub use config::{Config, PipelineConfig};
pub use dispatch::{Command, DispatchError, Dispatcher};
pub use domain::{Intent, IntentKind, Plan, Subtask, SubtaskStatus};
pub use llm::{GenRole, GenerationClient, LlmError, create_client};
pub use orchestrator::{Orchestrator, SessionSummary};
pub use pipeline::{Pipeline, RunMode, RunOutcome};
pub use snapshot::{CommandResult, SessionView};
pub use state::{SessionState, SessionStatus, StateManager};
