//! Snapshot builder
//!
//! Rebuilds the caller-facing view from the event log, the session state,
//! the progress mirror and the artifact store. Rendering has no side
//! effects except redo healing, which runs first and only when the log holds
//! a REDO decision nobody has acted on yet.

use std::collections::BTreeMap;

use artifactstore::{ArtifactRef, ArtifactStore, truncate_chars};
use chrono::{DateTime, Utc};
use envelopestore::{Envelope, LogError, PayloadKind};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use super::view::{
    ChatEntry, CommandResult, DecisionView, OutputSource, SessionView, SubtaskView, WorkerOutputView,
};
use crate::dispatch::reset_for_rework;
use crate::domain::{Intent, Plan, ProgressEvent, Stage, merge_progress};
use crate::pipeline::PREVIEW_CHARS;
use crate::services::Services;
use crate::state::{SessionData, StateError};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Event log error: {0}")]
    Log(#[from] LogError),
}

#[derive(Clone)]
pub struct SnapshotBuilder {
    services: Services,
}

impl SnapshotBuilder {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Heal, then render the session with the command's result
    pub async fn render(&self, session_id: &str, result: CommandResult) -> Result<SessionView, SnapshotError> {
        debug!(%session_id, ok = result.ok, "SnapshotBuilder::render: called");
        self.heal(session_id).await?;
        let data = self.services.state.get(session_id).await?;
        let envelopes = self.services.log.read_all(session_id)?;
        let mirrored = self.services.log.read_progress(session_id);
        Ok(build_view(&data, &envelopes, &mirrored, &self.services.artifacts, result))
    }

    /// Queue rework for subtasks whose latest logged decision is an unhandled REDO
    ///
    /// Returns the ids that were reset. Never calls the generation service.
    pub async fn heal(&self, session_id: &str) -> Result<Vec<String>, SnapshotError> {
        debug!(%session_id, "heal: called");
        let envelopes = self.services.log.read_all(session_id)?;
        let data = self.services.state.get(session_id).await?;
        let watermarks = &data.state.side_channel.redo_watermarks;

        let stale: Vec<DecisionView> = latest_decisions(&envelopes)
            .into_values()
            .filter(|d| d.decision == "redo")
            .filter(|d| watermarks.get(&d.subtask_id).is_none_or(|w| d.timestamp > *w))
            .filter(|d| data.plan.find(&d.subtask_id).is_some())
            .collect();
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let healed = self
            .services
            .state
            .mutate(session_id, move |d| {
                let mut healed = Vec::new();
                for decision in stale {
                    let feedback = (!decision.reason.is_empty()).then(|| decision.reason.clone());
                    let intent = Intent::trigger_redo(decision.subtask_id.clone(), feedback);
                    let note = intent.instructions.as_ref().map(|r| format!("Reviewer redo: {}", r));
                    if !reset_for_rework(d, &decision.subtask_id, note.as_deref()) {
                        continue;
                    }
                    d.state
                        .side_channel
                        .advance_watermark(&decision.subtask_id, decision.timestamp);
                    d.state.add_message(
                        "orchestrator",
                        format!(
                            "Reviewer requested a redo of subtask {}; it has been queued for rework ({}).",
                            decision.subtask_id, intent.kind
                        ),
                    );
                    healed.push(decision.subtask_id);
                }
                healed
            })
            .await?;
        if !healed.is_empty() {
            info!(%session_id, ?healed, "Out-of-band redo decisions applied");
        }
        Ok(healed)
    }
}

/// Assemble the view; a pure function of its inputs
pub fn build_view(
    data: &SessionData,
    envelopes: &[Envelope],
    mirrored: &[Value],
    artifacts: &ArtifactStore,
    mut result: CommandResult,
) -> SessionView {
    let SessionData { plan, state } = data;
    result.mode = state.mode().to_string();

    let progress_events = progress(data, envelopes, mirrored);
    let order = |id: &str| plan.position(id).unwrap_or(usize::MAX);
    let mut review_decisions: Vec<DecisionView> = latest_decisions(envelopes).into_values().collect();
    review_decisions.sort_by(|a, b| order(&a.subtask_id).cmp(&order(&b.subtask_id)));

    SessionView {
        session_id: state.session_id.clone(),
        topic: state.topic.clone(),
        plan: plan.clone(),
        subtasks: plan
            .subtasks
            .iter()
            .map(|s| SubtaskView {
                id: s.id.clone(),
                title: s.title.clone(),
                status: s.status,
                notes: s.notes.clone(),
                needs_redo: s.needs_redo,
            })
            .collect(),
        current_subtask_id: state.current_subtask_id.clone(),
        running: state.is_running(),
        last_progress_at: progress_events.last().map(|e| e.timestamp),
        state: state.clone(),
        worker_outputs: worker_outputs(data, envelopes, artifacts),
        review_decisions,
        chat_history: chat_history(envelopes),
        plan_locked: state.plan_locked,
        progress_events,
        orchestrator_messages: state
            .transcript
            .iter()
            .filter(|m| m.role == "orchestrator")
            .cloned()
            .collect(),
        pending_intents: state.pending_intents.clone(),
        planning_transcript: state.planning_transcript.clone(),
        transcript: state.transcript.clone(),
        result,
    }
}

/// Latest `coord_decision` per subtask; later entries win ties
fn latest_decisions(envelopes: &[Envelope]) -> BTreeMap<String, DecisionView> {
    let mut latest: BTreeMap<String, DecisionView> = BTreeMap::new();
    for env in envelopes.iter().filter(|e| e.payload_type == PayloadKind::CoordDecision) {
        let Some(id) = env.subtask_id() else {
            continue;
        };
        if latest.get(id).is_some_and(|d| d.timestamp > env.timestamp) {
            continue;
        }
        latest.insert(
            id.to_string(),
            DecisionView {
                subtask_id: id.to_string(),
                decision: env.payload_str("decision").unwrap_or_default().trim().to_lowercase(),
                reason: env.payload_str("reason").unwrap_or_default().to_string(),
                batch_id: env.payload_str("batch_id").map(str::to_string),
                timestamp: env.timestamp,
            },
        );
    }
    latest
}

fn worker_outputs(data: &SessionData, envelopes: &[Envelope], artifacts: &ArtifactStore) -> Vec<WorkerOutputView> {
    let mut latest: BTreeMap<String, (ArtifactRef, DateTime<Utc>, OutputSource)> = BTreeMap::new();
    for cached in &data.state.cached_worker_outputs {
        if latest.get(&cached.subtask_id).is_some_and(|(_, ts, _)| *ts > cached.timestamp) {
            continue;
        }
        latest.insert(
            cached.subtask_id.clone(),
            (cached.artifact.clone(), cached.timestamp, OutputSource::State),
        );
    }
    for env in envelopes.iter().filter(|e| e.payload_type == PayloadKind::SubtaskResult) {
        let (Some(id), Some(artifact)) = (
            env.subtask_id(),
            env.payload.get("result_artifact").and_then(ArtifactRef::from_payload),
        ) else {
            continue;
        };
        // Ties go to the state cache
        if latest.get(id).is_some_and(|(_, ts, _)| *ts >= env.timestamp) {
            continue;
        }
        latest.insert(
            id.to_string(),
            (artifact, env.timestamp, OutputSource::EnvelopesFallback),
        );
    }

    let plan = &data.plan;
    let mut outputs: Vec<WorkerOutputView> = latest
        .into_iter()
        .map(|(subtask_id, (artifact, timestamp, source))| {
            let preview = artifacts
                .read_text(&artifact, Some(PREVIEW_CHARS))
                .unwrap_or_else(|e| {
                    debug!(%subtask_id, error = %e, "worker_outputs: artifact unreadable, using subtask output");
                    fallback_preview(plan, &subtask_id)
                });
            WorkerOutputView {
                subtask_id,
                path: artifact.path,
                kind: artifact.kind.extension().to_string(),
                preview,
                timestamp,
                source,
            }
        })
        .collect();
    outputs.sort_by_key(|o| plan.position(&o.subtask_id).unwrap_or(usize::MAX));
    outputs
}

fn fallback_preview(plan: &Plan, subtask_id: &str) -> String {
    plan.find(subtask_id)
        .map(|s| truncate_chars(&s.output, PREVIEW_CHARS))
        .unwrap_or_default()
}

fn chat_history(envelopes: &[Envelope]) -> Vec<ChatEntry> {
    let mut entries: Vec<ChatEntry> = envelopes
        .iter()
        .filter_map(|env| {
            let text = match env.payload_type {
                PayloadKind::UserCommand => env.payload_str("text").unwrap_or_default().to_string(),
                PayloadKind::CoordResponse => env.payload_str("response").unwrap_or_default().to_string(),
                PayloadKind::CoordDecision => format!(
                    "{} {}: {}",
                    env.payload_str("decision").unwrap_or_default().to_uppercase(),
                    env.subtask_id().unwrap_or_default(),
                    env.payload_str("reason").unwrap_or_default()
                )
                .trim_end()
                .to_string(),
                _ => return None,
            };
            Some(ChatEntry {
                kind: env.payload_type.as_str().to_string(),
                role: env.source.as_str().to_string(),
                text,
                timestamp: env.timestamp,
            })
        })
        .collect();
    entries.sort_by_key(|e| e.timestamp);
    entries
}

/// State list, mirror log and envelope-derived finish markers, deduplicated
fn progress(data: &SessionData, envelopes: &[Envelope], mirrored: &[Value]) -> Vec<ProgressEvent> {
    let mirror: Vec<ProgressEvent> = mirrored
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect();
    let derived: Vec<ProgressEvent> = envelopes
        .iter()
        .filter_map(|env| {
            let agent = match env.payload_type {
                PayloadKind::SubtaskResult => "worker",
                PayloadKind::CoordDecision => "reviewer",
                _ => return None,
            };
            let id = env.subtask_id()?;
            Some(ProgressEvent::at(agent, id, Stage::Finish, env.timestamp).with_payload(json!({"source": "envelopes"})))
        })
        .collect();
    merge_progress([data.state.progress_events.clone(), mirror, derived])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Subtask, SubtaskStatus};
    use crate::state::{SessionState, WorkerOutputRef};
    use artifactstore::ArtifactKind;
    use chrono::TimeZone;
    use envelopestore::Role;
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fixture() -> (TempDir, ArtifactStore, SessionData) {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::open(temp.path()).unwrap();
        let mut plan = Plan::new("p1", "Story");
        plan.append(Subtask::new("t1", "Research").with_status(SubtaskStatus::Done))
            .unwrap();
        plan.append(Subtask::new("t2", "Draft")).unwrap();
        let data = SessionData {
            plan,
            state: SessionState::new("s1", "p1", "Story"),
        };
        (temp, store, data)
    }

    fn result_env(store: &ArtifactStore, id: &str, text: &str, at: DateTime<Utc>) -> (Envelope, ArtifactRef) {
        let artifact = store.save("s1", text, ArtifactKind::Markdown, "draft").unwrap();
        let env = Envelope::new(
            "s1",
            Role::Worker,
            Role::Orchestrator,
            PayloadKind::SubtaskResult,
            json!({"subtask_id": id, "result_artifact": artifact.to_payload()}),
        )
        .at(at);
        (env, artifact)
    }

    fn decision_env(id: &str, decision: &str, at: DateTime<Utc>) -> Envelope {
        Envelope::new(
            "s1",
            Role::Reviewer,
            Role::Orchestrator,
            PayloadKind::CoordDecision,
            json!({"subtask_id": id, "decision": decision, "reason": "because"}),
        )
        .at(at)
    }

    #[test]
    fn test_build_view_is_idempotent() {
        let (_temp, store, data) = fixture();
        let (env, _) = result_env(&store, "t1", "first draft", ts(1));
        let envelopes = vec![env, decision_env("t1", "accept", ts(2))];

        let a = build_view(&data, &envelopes, &[], &store, CommandResult::ok("x"));
        let b = build_view(&data, &envelopes, &[], &store, CommandResult::ok("x"));
        assert_eq!(a, b);
        assert_eq!(a.result.mode, "planning");
        assert_eq!(a.worker_outputs[0].source, OutputSource::EnvelopesFallback);
        assert_eq!(a.worker_outputs[0].preview, "first draft");
    }

    #[test]
    fn test_worker_output_tie_prefers_cache() {
        let (_temp, store, mut data) = fixture();
        let (env, artifact) = result_env(&store, "t1", "draft", ts(5));
        data.state.cache_worker_output(WorkerOutputRef {
            subtask_id: "t1".to_string(),
            artifact,
            timestamp: ts(5),
        });
        let view = build_view(&data, &[env], &[], &store, CommandResult::ok(""));
        assert_eq!(view.worker_outputs.len(), 1);
        assert_eq!(view.worker_outputs[0].source, OutputSource::State);

        let (newer, _) = result_env(&store, "t1", "newer draft", ts(9));
        let view = build_view(&data, &[newer], &[], &store, CommandResult::ok(""));
        assert_eq!(view.worker_outputs[0].source, OutputSource::EnvelopesFallback);
        assert_eq!(view.worker_outputs[0].preview, "newer draft");
    }

    #[test]
    fn test_progress_dedup_across_sources() {
        let (_temp, store, mut data) = fixture();
        let marker = ProgressEvent::at("worker", "t1", Stage::Finish, ts(3));
        data.state.record_progress(marker.clone());
        data.state.record_progress(marker.clone());
        let mirrored = vec![serde_json::to_value(&marker).unwrap()];
        let (env, _) = result_env(&store, "t1", "draft", ts(3));

        let view = build_view(&data, &[env], &mirrored, &store, CommandResult::ok(""));
        assert_eq!(view.progress_events.len(), 1);
        assert_eq!(view.last_progress_at, Some(ts(3)));
    }

    #[test]
    fn test_latest_decision_and_chat_order() {
        let (_temp, store, data) = fixture();
        let question = Envelope::new(
            "s1",
            Role::User,
            Role::Orchestrator,
            PayloadKind::UserCommand,
            json!({"text": "next"}),
        )
        .at(ts(0));
        let envelopes = vec![
            decision_env("t2", "REDO", ts(4)),
            decision_env("t2", "accept", ts(2)),
            question,
        ];
        let view = build_view(&data, &envelopes, &[], &store, CommandResult::ok(""));
        assert_eq!(view.review_decisions.len(), 1);
        assert_eq!(view.review_decisions[0].decision, "redo");

        let texts: Vec<&str> = view.chat_history.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["next", "ACCEPT t2: because", "REDO t2: because"]);
    }
}
