//! Session views: what every command returns and what the snapshot cache stores

mod builder;
mod view;

pub use builder::{SnapshotBuilder, SnapshotError, build_view};
pub use view::{
    ChatEntry, CommandResult, DecisionView, OutputSource, SessionView, SubtaskView, WorkerOutputView,
};
