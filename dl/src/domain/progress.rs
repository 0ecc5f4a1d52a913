//! Progress timeline markers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;

/// Which end of an agent step this marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Completed,
}

impl From<Stage> for ProgressStatus {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Start => Self::InProgress,
            Stage::Finish => Self::Completed,
        }
    }
}

/// A lightweight marker on the session timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub agent: String,
    pub subtask_id: String,
    pub stage: Stage,
    pub status: ProgressStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl ProgressEvent {
    pub fn new(agent: &str, subtask_id: &str, stage: Stage) -> Self {
        Self::at(agent, subtask_id, stage, Utc::now())
    }

    pub fn at(agent: &str, subtask_id: &str, stage: Stage, timestamp: DateTime<Utc>) -> Self {
        Self {
            agent: agent.to_string(),
            subtask_id: subtask_id.to_string(),
            stage,
            status: stage.into(),
            timestamp,
            payload: json!({}),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Identity used for deduplication
    pub fn dedup_key(&self) -> (String, String, Stage, DateTime<Utc>) {
        (self.agent.clone(), self.subtask_id.clone(), self.stage, self.timestamp)
    }
}

/// Merge several event lists, dropping duplicates and sorting by time
pub fn merge_progress<I>(sources: I) -> Vec<ProgressEvent>
where
    I: IntoIterator<Item = Vec<ProgressEvent>>,
{
    let mut seen = HashSet::new();
    let mut merged: Vec<ProgressEvent> = sources
        .into_iter()
        .flatten()
        .filter(|e| seen.insert(e.dedup_key()))
        .collect();
    merged.sort_by_key(|e| e.timestamp);
    merged
}
