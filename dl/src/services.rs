//! Shared handles used by the dispatcher, pipeline and snapshot builder

use std::sync::Arc;

use artifactstore::ArtifactStore;
use envelopestore::{Envelope, EventLog, LogError, PayloadKind, Role};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::domain::ProgressEvent;
use crate::roles::Roles;
use crate::state::{StateManager, StateResponse};

#[derive(Clone)]
pub struct Services {
    pub state: StateManager,
    pub log: Arc<EventLog>,
    pub artifacts: Arc<ArtifactStore>,
    pub roles: Roles,
    pub pipeline: PipelineConfig,
}

impl Services {
    /// Append a validated envelope to the session log
    pub fn append(
        &self,
        session_id: &str,
        source: Role,
        target: Role,
        kind: PayloadKind,
        payload: Value,
    ) -> Result<Envelope, LogError> {
        debug!(%session_id, ?kind, "Services::append: called");
        self.log
            .append(&Envelope::new(session_id, source, target, kind, payload))
    }

    /// Log an `error` envelope; failures here are only warned about
    pub fn log_error(&self, session_id: &str, code: &str, message: &str) {
        debug!(%session_id, %code, "Services::log_error: called");
        let payload = json!({"code": code, "message": message});
        if let Err(e) = self.append(session_id, Role::Orchestrator, Role::User, PayloadKind::Error, payload) {
            warn!(%session_id, error = %e, "Failed to log error envelope");
        }
    }

    /// Record a progress event in the session state and the mirror log
    pub async fn progress(&self, session_id: &str, event: ProgressEvent) -> StateResponse<()> {
        debug!(%session_id, agent = %event.agent, subtask_id = %event.subtask_id, "Services::progress: called");
        if let Ok(value) = serde_json::to_value(&event) {
            self.log.mirror_progress(session_id, &value);
        }
        self.state
            .mutate(session_id, move |data| data.state.record_progress(event))
            .await
    }

    /// Post a transcript message
    pub async fn post(&self, session_id: &str, role: &'static str, content: impl Into<String>) -> StateResponse<()> {
        let content = content.into();
        debug!(%session_id, %role, "Services::post: called");
        self.state
            .mutate(session_id, move |data| data.state.add_message(role, content))
            .await
    }
}
