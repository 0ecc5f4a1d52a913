//! Reviewer batching
//!
//! Once the setup subtasks are all finished, outputs queue up in the side
//! channel and the reviewer sees them `batch-size` at a time. The decision
//! applies to every member; a revised text belongs to the last one.

use artifactstore::truncate_chars;
use envelopestore::{PayloadKind, Role};
use serde_json::json;
use tracing::{debug, info};

use super::runner::{Applied, Draft, Pipeline, StepOutcome};
use super::{PREVIEW_CHARS, PipelineError, novel};
use crate::config::PipelineConfig;
use crate::domain::{Plan, ProgressEvent, Stage, Subtask};
use crate::state::{BatchMember, ReviewerRevision};

/// Whether `subtask_id` should be reviewed as part of a batch
pub(crate) fn batching_active(plan: &Plan, subtask_id: &str, cfg: &PipelineConfig) -> bool {
    if !cfg.batching {
        return false;
    }
    let Some(pos) = plan.position(subtask_id) else {
        return false;
    };
    pos >= cfg.setup_count
        && plan
            .subtasks
            .iter()
            .take(cfg.setup_count)
            .all(|s| s.status.is_terminal())
}

impl Pipeline {
    /// Queue an output; review the batch once it is full
    pub(crate) async fn enqueue_batch(
        &self,
        session_id: &str,
        subtask: &Subtask,
        draft: &Draft,
    ) -> Result<StepOutcome, PipelineError> {
        debug!(%session_id, subtask_id = %subtask.id, "enqueue_batch: called");
        let member = BatchMember {
            subtask_id: subtask.id.clone(),
            title: subtask.title.clone(),
            artifact: draft.artifact.clone(),
            preview: truncate_chars(&draft.text, PREVIEW_CHARS),
        };
        let pending = self
            .services()
            .state
            .mutate(session_id, move |d| {
                let batch = d.state.side_channel.batch.get_or_insert_with(Default::default);
                if batch.current_batch_id.is_none() {
                    batch.current_batch_id = Some(format!("batch-{}", batch.counter + 1));
                }
                batch.pending.retain(|m| m.subtask_id != member.subtask_id);
                batch.pending.push(member);
                batch.pending.len()
            })
            .await?;

        let size = self.services().pipeline.batch_size.max(1);
        debug!(%session_id, pending, size, "enqueue_batch: queued");
        let reviewed = if pending >= size {
            self.review_batch(session_id).await?
        } else {
            Vec::new()
        };
        Ok(StepOutcome::Batched {
            subtask_id: subtask.id.clone(),
            reviewed,
        })
    }

    /// Review whatever is waiting in the batch; returns the decided ids
    pub async fn review_batch(&self, session_id: &str) -> Result<Vec<String>, PipelineError> {
        debug!(%session_id, "review_batch: called");
        let services = self.services();
        let data = services.state.get(session_id).await?;
        let Some(batch) = data.state.side_channel.batch.clone() else {
            return Ok(Vec::new());
        };
        if batch.pending.is_empty() {
            return Ok(Vec::new());
        }
        let batch_id = batch
            .current_batch_id
            .clone()
            .unwrap_or_else(|| format!("batch-{}", batch.counter + 1));
        let summary = novel::context_summary(&data.state);

        for member in &batch.pending {
            services
                .progress(session_id, ProgressEvent::new("reviewer", &member.subtask_id, Stage::Start))
                .await?;
        }
        let review = services
            .roles
            .review_batch(
                &data.state.topic,
                &data.plan,
                &batch.pending,
                &summary,
                data.state.is_novel(),
            )
            .await?;

        let last = batch.pending.len() - 1;
        let mut decided = Vec::new();
        let mut accepted = Vec::new();
        for (idx, member) in batch.pending.iter().enumerate() {
            let revised = if idx == last { review.revised_text.clone() } else { None };
            let env = services.append(
                session_id,
                Role::Reviewer,
                Role::Orchestrator,
                PayloadKind::CoordDecision,
                json!({
                    "subtask_id": member.subtask_id,
                    "decision": review.decision.as_str(),
                    "reason": review.reason,
                    "batch_id": batch_id,
                    "revised": revised.is_some(),
                }),
            )?;
            services
                .progress(
                    session_id,
                    ProgressEvent::at("reviewer", &member.subtask_id, Stage::Finish, env.timestamp),
                )
                .await?;

            let revision = ReviewerRevision {
                subtask_id: member.subtask_id.clone(),
                batch_id: Some(batch_id.clone()),
                decision: review.decision.as_str().to_string(),
                reason: review.reason.clone(),
                revised_text: revised,
                context_summary: summary.clone(),
                adopted: false,
                timestamp: env.timestamp,
            };
            let applied = self
                .apply_decision(
                    session_id,
                    &member.subtask_id,
                    review.decision,
                    &review.reason,
                    Some(revision),
                    env.timestamp,
                )
                .await?;
            if matches!(applied, Applied::Accepted(_)) {
                accepted.push(member.subtask_id.clone());
            }
            decided.push(member.subtask_id.clone());
        }

        let reset_every = services.pipeline.summary_reset_every;
        let counter = services
            .state
            .mutate(session_id, move |d| {
                let side = &mut d.state.side_channel;
                let batch = side.batch.get_or_insert_with(Default::default);
                batch.pending.clear();
                batch.current_batch_id = None;
                batch.counter += 1;
                let counter = batch.counter;
                if reset_every > 0
                    && counter % reset_every == 0
                    && let Some(novel) = side.novel.as_mut()
                {
                    debug!(counter, "review_batch: resetting rolling summary");
                    novel.rolling_summary.clear();
                }
                counter
            })
            .await?;
        info!(
            %session_id,
            %batch_id,
            decision = %review.decision,
            members = decided.len(),
            counter,
            "Reviewer batch decided"
        );

        if !accepted.is_empty() {
            self.after_accept(session_id, &accepted).await?;
        }
        Ok(decided)
    }
}
