//! EnvelopeStore - append-only session event log
//!
//! Every role-to-role communication in a draftloop session (user commands,
//! subtask results, review decisions, question/answer exchanges) is recorded
//! as an [`Envelope`] in a per-session JSONL file. Entries are validated
//! against the schema registered for their kind before they are written, and
//! are never rewritten or deleted.
//!
//! # Layout
//!
//! ```text
//! {sessions-dir}/
//! └── {session_id}/
//!     └── logs/
//!         ├── envelopes.jsonl   # validated envelopes, one per line
//!         └── progress.jsonl    # best-effort progress mirror
//! ```
//!
//! A small SQLite database ([`SnapshotCache`]) keeps the last rendered view of
//! each session so that a session can be rehydrated when its state files are
//! lost.
//!
//! # Example
//!
//! ```ignore
//! use envelopestore::{Envelope, EventLog, PayloadKind, Role};
//!
//! let log = EventLog::open("/tmp/sessions")?;
//! let env = Envelope::new("sess-1", Role::User, Role::Coordinator, PayloadKind::UserCommand,
//!     serde_json::json!({"text": "next"}));
//! log.append(&env)?;
//! let all = log.read_all("sess-1")?;
//! ```

pub mod cli;
pub mod config;
mod envelope;
mod error;
mod event_log;
pub mod schema;
mod snapshot_cache;

pub use envelope::{Envelope, PROTOCOL_VERSION, PayloadKind, Role};
pub use error::{LogError, SchemaError, StoreError};
pub use event_log::{EnvelopeIter, EventLog};
pub use snapshot_cache::SnapshotCache;

/// File name of the validated envelope log inside `{session}/logs/`
pub const ENVELOPE_LOG: &str = "envelopes.jsonl";

/// File name of the progress mirror inside `{session}/logs/`
pub const PROGRESS_LOG: &str = "progress.jsonl";
