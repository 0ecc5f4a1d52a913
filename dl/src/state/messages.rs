//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::Plan;

use super::session::SessionState;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Primary session files are gone; recoverable through rehydration
    #[error("Session files missing: {0}")]
    Missing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Plan plus session state, the unit the actor loads and persists
#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub plan: Plan,
    pub state: SessionState,
}

/// Mutation applied inside the actor
pub type MutateFn = Box<dyn FnOnce(&mut SessionData) + Send>;

/// Commands sent to the StateManager actor
pub enum StateCommand {
    Create {
        data: SessionData,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Get {
        session_id: String,
        reply: oneshot::Sender<StateResponse<SessionData>>,
    },
    Mutate {
        session_id: String,
        apply: MutateFn,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    /// Overwrite both files (rehydration)
    Replace {
        data: SessionData,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    List {
        reply: oneshot::Sender<StateResponse<Vec<String>>>,
    },
    Evict {
        session_id: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Shutdown,
}

impl std::fmt::Debug for StateCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create { data, .. } => write!(f, "Create({})", data.state.session_id),
            Self::Get { session_id, .. } => write!(f, "Get({})", session_id),
            Self::Mutate { session_id, .. } => write!(f, "Mutate({})", session_id),
            Self::Replace { data, .. } => write!(f, "Replace({})", data.state.session_id),
            Self::List { .. } => write!(f, "List"),
            Self::Evict { session_id, .. } => write!(f, "Evict({})", session_id),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}
