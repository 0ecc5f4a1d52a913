//! ArtifactStore - per-session storage for generated content
//!
//! Worker drafts, planner outlines and structured plans are written as files
//! under the owning session and addressed by an [`ArtifactRef`] whose path is
//! relative to the store root. Event log entries carry that reference, so the
//! orchestrator can always find the content a result envelope points at.
//!
//! # Layout
//!
//! ```text
//! {root}/
//! ├── session_index.json        # {latest, history[]}
//! └── {session_id}/
//!     ├── artifacts/
//!     │   ├── {artifact_id}.md
//!     │   ├── {artifact_id}.json
//!     │   └── ...
//!     └── logs/
//! ```

pub mod cli;
pub mod config;
mod store;

pub use store::{ArtifactError, ArtifactKind, ArtifactRef, ArtifactStore, SessionIndex, truncate_chars};

/// Marker appended to truncated reads
pub const TRUNCATION_MARKER: &str = "...";
