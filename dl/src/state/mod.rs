//! Session state management with actor pattern
//!
//! StateManager owns the per-session plan and control record and processes
//! messages via channels, giving each session a single writer.

mod files;
mod manager;
mod messages;
mod session;

pub use files::{RunLock, SessionFiles};
pub use manager::StateManager;
pub use messages::{SessionData, StateCommand, StateError, StateResponse};
pub use session::{
    BatchMember, Character, Message, NovelMode, NovelProfile, ReviewerBatchState, ReviewerRevision, SessionState,
    SessionStatus, SideChannel, WorkerOutputRef,
};
