//! Intent consumption
//!
//! Drains the session's intent queue in FIFO order. Intents queued while
//! draining (a content change queues a redo) are picked up by the same call,
//! up to [`MAX_INTENT_ITERATIONS`].

use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::DispatchError;
use crate::domain::{Intent, IntentKind, Plan, SubtaskStatus};
use crate::pipeline::StepOutcome;
use crate::roles::PlanRequest;
use crate::state::{SessionData, SessionStatus};

/// Per-call bound on consumed intents
pub const MAX_INTENT_ITERATIONS: usize = 16;

/// How a `trigger_redo` intent is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedoMode {
    /// Run one worker/reviewer cycle now
    Immediate,
    /// Reset the subtask and leave it to the next run
    Deferred,
}

/// Reset a subtask for rework without running generation
///
/// Returns false when the subtask is unknown or the pipeline holds it.
pub(crate) fn reset_for_rework(data: &mut SessionData, subtask_id: &str, note: Option<&str>) -> bool {
    let in_batch = data.state.side_channel.batch_member_ids();
    let Some(sub) = data.plan.find_mut(subtask_id) else {
        return false;
    };
    if sub.status == SubtaskStatus::InProgress || in_batch.contains(subtask_id) {
        debug!(%subtask_id, "reset_for_rework: subtask busy");
        return false;
    }
    sub.status = SubtaskStatus::Pending;
    sub.needs_redo = true;
    if let Some(note) = note {
        sub.append_note(note);
    }
    if data.state.status == SessionStatus::Completed {
        data.state.status = SessionStatus::Idle;
    }
    if data.state.current_subtask_id.is_none() {
        data.state.current_subtask_id = Some(subtask_id.to_string());
    }
    true
}

/// Keep runtime progress made while the planner was thinking
fn carry_progress(fresh: &Plan, updated: &mut Plan) {
    for sub in &fresh.subtasks {
        match updated.find_mut(&sub.id) {
            Some(target) => {
                target.status = sub.status;
                target.output = sub.output.clone();
                target.needs_redo = sub.needs_redo;
            }
            None if sub.status != SubtaskStatus::Pending => {
                updated.subtasks.push(sub.clone());
            }
            None => {}
        }
    }
    updated.id_seq = updated.id_seq.max(fresh.id_seq);
}

impl Dispatcher {
    /// Apply queued intents; returns the messages posted for them
    pub async fn consume_intents(&self, session_id: &str, mode: RedoMode) -> Result<Vec<String>, DispatchError> {
        debug!(%session_id, ?mode, "consume_intents: called");
        let mut messages = Vec::new();
        for _ in 0..MAX_INTENT_ITERATIONS {
            let next = self
                .services()
                .state
                .mutate(session_id, |d| {
                    (!d.state.pending_intents.is_empty()).then(|| d.state.pending_intents.remove(0))
                })
                .await?;
            let Some(intent) = next else {
                return Ok(messages);
            };
            let message = self.apply_intent(session_id, intent, mode).await?;
            self.services().post(session_id, "orchestrator", message.clone()).await?;
            messages.push(message);
        }

        let left = self.services().state.get(session_id).await?.state.pending_intents.len();
        if left > 0 {
            warn!(%session_id, left, "consume_intents: iteration cap reached, leaving intents queued");
        }
        Ok(messages)
    }

    async fn apply_intent(&self, session_id: &str, intent: Intent, mode: RedoMode) -> Result<String, DispatchError> {
        debug!(%session_id, kind = %intent.kind, target = ?intent.target_subtask_id, "apply_intent: called");
        match &intent.kind {
            IntentKind::ContentChange => self.content_change(session_id, &intent).await,
            IntentKind::TriggerRedo => self.trigger_redo(session_id, &intent, mode).await,
            IntentKind::PlanUpdate => self.plan_update(session_id, &intent).await,
            IntentKind::Other => Ok("Understood. (General request acknowledged.)".to_string()),
            IntentKind::Unknown(kind) => {
                warn!(%session_id, %kind, "Unhandled intent kind");
                Ok(format!("Unhandled event type: {}", kind))
            }
        }
    }

    async fn content_change(&self, session_id: &str, intent: &Intent) -> Result<String, DispatchError> {
        let Some(id) = intent.target_subtask_id.clone() else {
            return Ok("I couldn't tell which subtask to change. Please mention its id.".to_string());
        };
        let instructions = intent
            .instructions
            .clone()
            .or_else(|| intent.raw_text.clone())
            .unwrap_or_default();
        let queued = {
            let id = id.clone();
            let instructions = instructions.clone();
            self.services()
                .state
                .mutate(session_id, move |d| {
                    let Some(sub) = d.plan.find_mut(&id) else {
                        return false;
                    };
                    sub.needs_redo = true;
                    sub.append_note(&format!("Change requested: {}", instructions));
                    let feedback = (!instructions.is_empty()).then_some(instructions);
                    d.state.pending_intents.push(Intent::trigger_redo(id, feedback));
                    true
                })
                .await?
        };
        if !queued {
            return Ok(format!("Subtask {} not found", id));
        }
        Ok(format!(
            "I'll revise subtask {} based on your instructions: {}",
            id, instructions
        ))
    }

    async fn trigger_redo(&self, session_id: &str, intent: &Intent, mode: RedoMode) -> Result<String, DispatchError> {
        let Some(id) = intent.target_subtask_id.clone() else {
            return Ok("I couldn't tell which subtask to redo. Please mention its id.".to_string());
        };
        let state = &self.services().state;
        let data = state.get(session_id).await?;
        if data.plan.find(&id).is_none() {
            return Ok(format!("Subtask {} not found", id));
        }

        let immediate =
            mode == RedoMode::Immediate && !data.state.is_running() && state.try_begin_run(session_id, Some(id.clone())).await?;
        if !immediate {
            let note = intent.instructions.as_ref().map(|i| format!("Redo requested: {}", i));
            let reset = {
                let id = id.clone();
                state
                    .mutate(session_id, move |d| reset_for_rework(d, &id, note.as_deref()))
                    .await?
            };
            debug!(%session_id, subtask_id = %id, reset, "trigger_redo: deferred");
            return Ok(if reset {
                format!("Subtask {} has been queued for rework (trigger_redo).", id)
            } else {
                format!("Subtask {} is being processed right now; the redo was not queued.", id)
            });
        }

        // A queued batch copy is superseded by the redo
        let unbatched = {
            let id = id.clone();
            state
                .mutate(session_id, move |d| match d.state.side_channel.batch.as_mut() {
                    Some(batch) => {
                        let before = batch.pending.len();
                        batch.pending.retain(|m| m.subtask_id != id);
                        batch.pending.len() != before
                    }
                    None => false,
                })
                .await?
        };
        debug!(%session_id, subtask_id = %id, unbatched, "trigger_redo: immediate");

        let outcome = self
            .pipeline()
            .run_redo(session_id, &id, intent.instructions.clone())
            .await?;
        info!(%session_id, subtask_id = %id, "Immediate redo finished");
        Ok(match outcome {
            StepOutcome::Reviewed { decision, reason, .. } => {
                let mut message = format!(
                    "I've rewritten subtask {} based on your instructions. Reviewer: {}",
                    id,
                    decision.as_str().to_uppercase()
                );
                if !reason.is_empty() {
                    message.push_str(&format!(" ({})", reason));
                }
                message
            }
            StepOutcome::NeedsAttention { .. } => format!(
                "I've rewritten subtask {} based on your instructions, but it now needs attention.",
                id
            ),
            _ => format!("I've rewritten subtask {} based on your instructions.", id),
        })
    }

    async fn plan_update(&self, session_id: &str, intent: &Intent) -> Result<String, DispatchError> {
        let request = intent
            .instructions
            .clone()
            .or_else(|| intent.raw_text.clone())
            .unwrap_or_default();
        let data = self.services().state.get(session_id).await?;
        let profile = data.state.side_channel.novel.as_ref().map(|n| &n.profile);
        let reply = self
            .services()
            .roles
            .plan(PlanRequest {
                plan_id: &data.state.plan_id,
                topic: &data.state.topic,
                current: Some(&data.plan),
                transcript: &data.state.transcript,
                input: Some(&request),
                novel: profile,
            })
            .await?;

        let mut updated = reply.plan;
        let count = self
            .services()
            .state
            .mutate(session_id, move |d| {
                carry_progress(&d.plan, &mut updated);
                d.plan = updated;
                d.plan.subtasks.len()
            })
            .await?;
        info!(%session_id, subtasks = count, "Plan updated from intent");
        Ok(format!("Plan updated based on your request: {}", request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Subtask;
    use crate::state::{BatchMember, ReviewerBatchState, SessionState};
    use artifactstore::{ArtifactKind, ArtifactRef};
    use chrono::Utc;

    fn data(statuses: &[SubtaskStatus]) -> SessionData {
        let mut plan = Plan::new("p1", "Story");
        for status in statuses {
            let id = plan.generate_id();
            plan.append(Subtask::new(id.clone(), id).with_status(*status)).unwrap();
        }
        SessionData {
            plan,
            state: SessionState::new("s1", "p1", "Story"),
        }
    }

    #[test]
    fn test_reset_for_rework() {
        let mut d = data(&[SubtaskStatus::Done, SubtaskStatus::Done]);
        d.state.status = SessionStatus::Completed;
        assert!(reset_for_rework(&mut d, "t2", Some("Redo requested: darker")));
        let sub = d.plan.find("t2").unwrap();
        assert_eq!(sub.status, SubtaskStatus::Pending);
        assert!(sub.needs_redo);
        assert!(sub.notes.contains("darker"));
        assert_eq!(d.state.status, SessionStatus::Idle);
        assert!(!reset_for_rework(&mut d, "t9", None));
    }

    #[test]
    fn test_reset_skips_busy_subtasks() {
        let mut d = data(&[SubtaskStatus::InProgress, SubtaskStatus::InProgress]);
        assert!(!reset_for_rework(&mut d, "t1", None));

        d.state.side_channel.batch = Some(ReviewerBatchState {
            pending: vec![BatchMember {
                subtask_id: "t2".to_string(),
                title: "t2".to_string(),
                artifact: ArtifactRef {
                    path: "s1/artifacts/a.md".to_string(),
                    kind: ArtifactKind::Markdown,
                    description: String::new(),
                    created_at: Utc::now(),
                },
                preview: String::new(),
            }],
            ..Default::default()
        });
        d.plan.find_mut("t2").unwrap().status = SubtaskStatus::Done;
        assert!(!reset_for_rework(&mut d, "t2", None));
    }

    #[test]
    fn test_carry_progress_keeps_finished_work() {
        let fresh = data(&[SubtaskStatus::Done, SubtaskStatus::Done, SubtaskStatus::Pending]).plan;
        // Planner saw t2 as pending and dropped it
        let mut updated = data(&[SubtaskStatus::Done, SubtaskStatus::Pending]).plan;
        updated.subtasks.retain(|s| s.id != "t2");
        updated.subtasks.push(Subtask::new("t3", "t3"));

        carry_progress(&fresh, &mut updated);
        let ids: Vec<&str> = updated.subtasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t3", "t2"]);
        assert_eq!(updated.find("t2").unwrap().status, SubtaskStatus::Done);
        assert_eq!(updated.id_seq, 3);
    }
}
