//! Domain types: plans, intents and progress markers

mod intent;
mod plan;
mod progress;

pub use intent::{Intent, IntentKind, resolve_target};
pub use plan::{Plan, PlanError, Subtask, SubtaskStatus};
pub use progress::{ProgressEvent, ProgressStatus, Stage, merge_progress};
