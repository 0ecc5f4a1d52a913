//! GenerationClient trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::LlmError;

/// The role a generation call is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenRole {
    Planner,
    Worker,
    Reviewer,
    Coordinator,
    Classifier,
}

impl GenRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Worker => "worker",
            Self::Reviewer => "reviewer",
            Self::Coordinator => "coordinator",
            Self::Classifier => "classifier",
        }
    }
}

impl std::fmt::Display for GenRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stateless text generation; every call is independent
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate text for `role` from a system prompt and a context message
    async fn generate(&self, role: GenRole, system_prompt: &str, context: &str) -> Result<String, LlmError>;
}

/// Client for commands that must never reach the generation service
///
/// Used by read-only CLI commands when no credentials are configured; any
/// generation attempt fails instead of producing stand-in text.
pub struct OfflineClient {
    api_key_env: String,
}

impl OfflineClient {
    pub fn new(api_key_env: impl Into<String>) -> Self {
        Self {
            api_key_env: api_key_env.into(),
        }
    }
}

#[async_trait]
impl GenerationClient for OfflineClient {
    async fn generate(&self, role: GenRole, _system_prompt: &str, _context: &str) -> Result<String, LlmError> {
        tracing::debug!(%role, "OfflineClient::generate: refusing");
        Err(LlmError::MissingCredentials(self.api_key_env.clone()))
    }
}

pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tracing::debug;

    /// One recorded call
    #[derive(Debug, Clone)]
    pub struct MockCall {
        pub role: GenRole,
        pub system_prompt: String,
        pub context: String,
    }

    /// Scripted generation client for tests
    ///
    /// Each role has a FIFO queue of responses and an optional default used
    /// once the queue is empty. A role with neither fails the call.
    #[derive(Default)]
    pub struct MockGenerationClient {
        queues: Mutex<HashMap<GenRole, VecDeque<String>>>,
        defaults: Mutex<HashMap<GenRole, String>>,
        calls: Mutex<Vec<MockCall>>,
    }

    impl MockGenerationClient {
        pub fn new() -> Self {
            debug!("MockGenerationClient::new: called");
            Self::default()
        }

        /// Builder form of [`set_default`](Self::set_default)
        pub fn with_default(self, role: GenRole, response: impl Into<String>) -> Self {
            self.set_default(role, response);
            self
        }

        /// Builder form of [`push`](Self::push)
        pub fn with_response(self, role: GenRole, response: impl Into<String>) -> Self {
            self.push(role, response);
            self
        }

        pub fn set_default(&self, role: GenRole, response: impl Into<String>) {
            if let Ok(mut defaults) = self.defaults.lock() {
                defaults.insert(role, response.into());
            }
        }

        pub fn push(&self, role: GenRole, response: impl Into<String>) {
            if let Ok(mut queues) = self.queues.lock() {
                queues.entry(role).or_default().push_back(response.into());
            }
        }

        pub fn call_count(&self, role: GenRole) -> usize {
            self.calls
                .lock()
                .map(|calls| calls.iter().filter(|c| c.role == role).count())
                .unwrap_or(0)
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
        }

        pub fn calls(&self, role: GenRole) -> Vec<MockCall> {
            self.calls
                .lock()
                .map(|calls| calls.iter().filter(|c| c.role == role).cloned().collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl GenerationClient for MockGenerationClient {
        async fn generate(&self, role: GenRole, system_prompt: &str, context: &str) -> Result<String, LlmError> {
            debug!(%role, "MockGenerationClient::generate: called");
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(MockCall {
                    role,
                    system_prompt: system_prompt.to_string(),
                    context: context.to_string(),
                });
            }

            let queued = self
                .queues
                .lock()
                .ok()
                .and_then(|mut q| q.get_mut(&role).and_then(|q| q.pop_front()));
            if let Some(response) = queued {
                return Ok(response);
            }
            let fallback = self.defaults.lock().ok().and_then(|d| d.get(&role).cloned());
            fallback.ok_or_else(|| {
                debug!(%role, "MockGenerationClient::generate: no more mock responses");
                LlmError::InvalidResponse(format!("No more mock responses for {}", role))
            })
        }
    }

}
