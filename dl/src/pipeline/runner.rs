//! Pipeline runner: one subtask, one step, or a whole run

use artifactstore::{ArtifactKind, ArtifactRef};
use chrono::{DateTime, Utc};
use envelopestore::{PayloadKind, Role};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::{PipelineError, batch, novel};
use crate::domain::{ProgressEvent, Stage, Subtask, SubtaskStatus};
use crate::roles::{DraftRequest, ReviewDecision};
use crate::services::Services;
use crate::state::{ReviewerRevision, RunLock, SessionData, SessionStatus, WorkerOutputRef};

/// How much a run should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Process the next eligible subtask
    Next,
    /// Keep going until nothing is eligible
    All,
}

/// Result of one pipeline step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Reviewed on its own
    Reviewed {
        subtask_id: String,
        decision: ReviewDecision,
        reason: String,
    },
    /// Hit the retry ceiling
    NeedsAttention { subtask_id: String },
    /// Added to the reviewer batch; `reviewed` lists the members decided if it filled up
    Batched { subtask_id: String, reviewed: Vec<String> },
    /// A partial batch was reviewed because nothing else was eligible
    Flushed { reviewed: Vec<String> },
    /// Nothing to do
    Idle,
}

/// Final report of a background or inline run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub session_id: String,
    pub steps: Vec<StepOutcome>,
    pub status: SessionStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Reviewer reason or user instructions for the worker
    pub feedback: Option<String>,
    /// Allow the output to join the reviewer batch
    pub allow_batch: bool,
    /// Stop after one worker/reviewer cycle, even on REDO
    pub single_cycle: bool,
}

/// Worker output saved as an artifact
pub(crate) struct Draft {
    pub text: String,
    pub artifact: ArtifactRef,
}

/// Effect of a decision on the subtask
pub(crate) enum Applied {
    Accepted(String),
    Redo(String),
    NeedsAttention(u32),
    Missing,
}

#[derive(Clone)]
pub struct Pipeline {
    services: Services,
}

impl Pipeline {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Run under the session's run lock and record the final status
    ///
    /// The caller has already claimed the session with `try_begin_run`.
    /// Failures end up in the session state, never in the return value.
    pub async fn execute_run(&self, session_id: &str, mode: RunMode) -> RunOutcome {
        info!(%session_id, ?mode, "Run started");
        let files = self.services.state.files(session_id);
        let result = match RunLock::try_acquire(&files) {
            Ok(Some(lock)) => {
                let result = self.drive(session_id, mode).await;
                drop(lock);
                result
            }
            Ok(None) => Err(PipelineError::Locked(session_id.to_string())),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(steps) => self.finish(session_id, steps).await,
            Err(e) => self.fail(session_id, e).await,
        }
    }

    /// One worker/reviewer cycle for a user-requested rewrite
    ///
    /// The caller has already claimed the session with `try_begin_run`.
    /// Unlike a run, a failure is returned to the caller and the session
    /// goes back to idle rather than error.
    pub async fn run_redo(
        &self,
        session_id: &str,
        subtask_id: &str,
        instructions: Option<String>,
    ) -> Result<StepOutcome, PipelineError> {
        info!(%session_id, %subtask_id, "Immediate redo started");
        let files = self.services.state.files(session_id);
        let result = match RunLock::try_acquire(&files) {
            Ok(Some(lock)) => {
                let opts = ProcessOptions {
                    feedback: instructions,
                    allow_batch: false,
                    single_cycle: true,
                };
                let result = self.process_subtask(session_id, subtask_id, opts).await;
                drop(lock);
                result
            }
            Ok(None) => Err(PipelineError::Locked(session_id.to_string())),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &result {
            warn!(%session_id, %subtask_id, error = %e, "Immediate redo failed");
            let id = subtask_id.to_string();
            self.services
                .state
                .mutate(session_id, move |d| {
                    if let Some(sub) = d.plan.find_mut(&id)
                        && sub.status == SubtaskStatus::InProgress
                    {
                        sub.status = SubtaskStatus::Pending;
                        sub.needs_redo = true;
                    }
                    d.state.status = SessionStatus::Idle;
                })
                .await?;
            return result;
        }
        self.finish(session_id, Vec::new()).await;
        result
    }

    async fn drive(&self, session_id: &str, mode: RunMode) -> Result<Vec<StepOutcome>, PipelineError> {
        match mode {
            RunMode::Next => Ok(vec![self.run_next(session_id).await?]),
            RunMode::All => self.run_all(session_id).await,
        }
    }

    /// Process the next eligible subtask, or flush a waiting batch
    pub async fn run_next(&self, session_id: &str) -> Result<StepOutcome, PipelineError> {
        debug!(%session_id, "run_next: called");
        let data = self.services.state.get(session_id).await?;
        let in_batch = data.state.side_channel.batch_member_ids();
        if let Some(next) = data.plan.next_pending_excluding(&in_batch) {
            let subtask_id = next.id.clone();
            return self
                .process_subtask(
                    session_id,
                    &subtask_id,
                    ProcessOptions {
                        allow_batch: true,
                        ..Default::default()
                    },
                )
                .await;
        }
        if !in_batch.is_empty() {
            debug!(%session_id, "run_next: nothing eligible, flushing batch");
            let reviewed = self.review_batch(session_id).await?;
            return Ok(StepOutcome::Flushed { reviewed });
        }
        debug!(%session_id, "run_next: idle");
        Ok(StepOutcome::Idle)
    }

    /// Step until nothing is eligible; partial batches are flushed at the end
    pub async fn run_all(&self, session_id: &str) -> Result<Vec<StepOutcome>, PipelineError> {
        debug!(%session_id, "run_all: called");
        let mut steps = Vec::new();
        loop {
            let step = self.run_next(session_id).await?;
            if step == StepOutcome::Idle {
                break;
            }
            steps.push(step);
        }
        Ok(steps)
    }

    /// Drive one subtask through worker → reviewer
    ///
    /// Loops on REDO, feeding the reviewer's reason back to the worker, until
    /// ACCEPT or the retry ceiling. Batched outputs return as soon as they
    /// join the batch.
    pub async fn process_subtask(
        &self,
        session_id: &str,
        subtask_id: &str,
        opts: ProcessOptions,
    ) -> Result<StepOutcome, PipelineError> {
        debug!(%session_id, %subtask_id, ?opts, "process_subtask: called");
        let mut feedback = opts.feedback.clone();
        loop {
            let data = self.services.state.get(session_id).await?;
            let subtask = data
                .plan
                .find(subtask_id)
                .cloned()
                .ok_or_else(|| PipelineError::NotFound(subtask_id.to_string()))?;
            if feedback.is_none() && subtask.needs_redo {
                feedback = data
                    .state
                    .side_channel
                    .revisions
                    .get(subtask_id)
                    .filter(|r| r.decision == ReviewDecision::Redo.as_str() && !r.reason.is_empty())
                    .map(|r| r.reason.clone());
            }

            let draft = self.draft(session_id, &data, &subtask, feedback.as_deref()).await?;

            if opts.allow_batch && batch::batching_active(&data.plan, subtask_id, &self.services.pipeline) {
                return self.enqueue_batch(session_id, &subtask, &draft).await;
            }

            match self.review_single(session_id, &subtask, &draft).await? {
                Applied::Accepted(reason) => {
                    self.after_accept(session_id, &[subtask_id.to_string()]).await?;
                    return Ok(StepOutcome::Reviewed {
                        subtask_id: subtask_id.to_string(),
                        decision: ReviewDecision::Accept,
                        reason,
                    });
                }
                Applied::Redo(reason) => {
                    if opts.single_cycle {
                        return Ok(StepOutcome::Reviewed {
                            subtask_id: subtask_id.to_string(),
                            decision: ReviewDecision::Redo,
                            reason,
                        });
                    }
                    debug!(%subtask_id, "process_subtask: redo, looping with reviewer feedback");
                    feedback = Some(if reason.is_empty() {
                        "The reviewer asked for a rewrite.".to_string()
                    } else {
                        reason
                    });
                }
                Applied::NeedsAttention(_) => {
                    return Ok(StepOutcome::NeedsAttention {
                        subtask_id: subtask_id.to_string(),
                    });
                }
                Applied::Missing => return Err(PipelineError::NotFound(subtask_id.to_string())),
            }
        }
    }

    /// Mark in progress, call the worker, save and log the result
    async fn draft(
        &self,
        session_id: &str,
        data: &SessionData,
        subtask: &Subtask,
        feedback: Option<&str>,
    ) -> Result<Draft, PipelineError> {
        let id = subtask.id.clone();
        {
            let id = id.clone();
            self.services
                .state
                .mutate(session_id, move |d| {
                    if let Some(sub) = d.plan.find_mut(&id) {
                        sub.status = SubtaskStatus::InProgress;
                        sub.needs_redo = false;
                    }
                    d.state.current_subtask_id = Some(id);
                })
                .await?;
        }
        self.services
            .progress(session_id, ProgressEvent::new("worker", &id, Stage::Start))
            .await?;

        let extra = novel::extra_context(&data.state);
        let text = self
            .services
            .roles
            .draft(DraftRequest {
                topic: &data.state.topic,
                plan: &data.plan,
                subtask,
                feedback,
                extra_context: extra.as_deref(),
            })
            .await?;

        let artifact = self.services.artifacts.save(
            session_id,
            &text,
            ArtifactKind::Markdown,
            &format!("Draft for {} ({})", id, subtask.title),
        )?;
        let env = self.services.append(
            session_id,
            Role::Worker,
            Role::Orchestrator,
            PayloadKind::SubtaskResult,
            json!({
                "subtask_id": id,
                "subtask_title": subtask.title,
                "result_artifact": artifact.to_payload(),
            }),
        )?;
        let timestamp = env.timestamp;

        {
            let id = id.clone();
            let output = text.clone();
            let artifact = artifact.clone();
            self.services
                .state
                .mutate(session_id, move |d| {
                    if let Some(sub) = d.plan.find_mut(&id) {
                        sub.output = output;
                    }
                    d.state.cache_worker_output(WorkerOutputRef {
                        subtask_id: id,
                        artifact,
                        timestamp,
                    });
                })
                .await?;
        }
        self.services
            .progress(session_id, ProgressEvent::at("worker", &id, Stage::Finish, timestamp))
            .await?;
        debug!(%session_id, subtask_id = %id, path = %artifact.path, "draft: saved");
        Ok(Draft { text, artifact })
    }

    async fn review_single(&self, session_id: &str, subtask: &Subtask, draft: &Draft) -> Result<Applied, PipelineError> {
        let data = self.services.state.get(session_id).await?;
        self.services
            .progress(session_id, ProgressEvent::new("reviewer", &subtask.id, Stage::Start))
            .await?;

        let extra = novel::extra_context(&data.state);
        let review = self
            .services
            .roles
            .review(
                &data.state.topic,
                &data.plan,
                subtask,
                &draft.text,
                extra.as_deref(),
                data.state.is_novel(),
            )
            .await?;

        let env = self.services.append(
            session_id,
            Role::Reviewer,
            Role::Orchestrator,
            PayloadKind::CoordDecision,
            json!({
                "subtask_id": subtask.id,
                "decision": review.decision.as_str(),
                "reason": review.reason,
                "revised": review.revised_text.is_some(),
            }),
        )?;
        self.services
            .progress(
                session_id,
                ProgressEvent::at("reviewer", &subtask.id, Stage::Finish, env.timestamp),
            )
            .await?;
        info!(%session_id, subtask_id = %subtask.id, decision = %review.decision, "Subtask reviewed");

        let revision = review.revised_text.clone().map(|text| ReviewerRevision {
            subtask_id: subtask.id.clone(),
            batch_id: None,
            decision: review.decision.as_str().to_string(),
            reason: review.reason.clone(),
            revised_text: Some(text),
            context_summary: String::new(),
            adopted: false,
            timestamp: env.timestamp,
        });
        self.apply_decision(
            session_id,
            &subtask.id,
            review.decision,
            &review.reason,
            revision,
            env.timestamp,
        )
        .await
    }

    /// Reflect a logged decision into the plan and the side channel
    pub(crate) async fn apply_decision(
        &self,
        session_id: &str,
        subtask_id: &str,
        decision: ReviewDecision,
        reason: &str,
        revision: Option<ReviewerRevision>,
        decided_at: DateTime<Utc>,
    ) -> Result<Applied, PipelineError> {
        debug!(%session_id, %subtask_id, %decision, "apply_decision: called");
        let max_attempts = self.services.pipeline.max_redo_attempts;
        let id = subtask_id.to_string();
        let reason = reason.to_string();

        let applied = self
            .services
            .state
            .mutate(session_id, move |d| {
                let side = &mut d.state.side_channel;
                // Our own decision is already handled; healing must skip it
                side.advance_watermark(&id, decided_at);
                if let Some(revision) = revision {
                    side.revisions.insert(id.clone(), revision);
                }
                let Some(sub) = d.plan.find_mut(&id) else {
                    return Applied::Missing;
                };
                match decision {
                    ReviewDecision::Accept => {
                        sub.status = SubtaskStatus::Done;
                        sub.needs_redo = false;
                        if !reason.is_empty() {
                            sub.append_note(&format!("Reviewer: {}", reason));
                        }
                        side.redo_attempts.remove(&id);
                        Applied::Accepted(reason)
                    }
                    ReviewDecision::Redo => {
                        let attempts = side.redo_attempts.entry(id.clone()).or_insert(0);
                        *attempts += 1;
                        let attempts = *attempts;
                        if attempts >= max_attempts {
                            sub.status = SubtaskStatus::NeedsAttention;
                            sub.needs_redo = false;
                            d.state.add_message(
                                "orchestrator",
                                format!(
                                    "Subtask {} needs attention after {} redo attempts.",
                                    id, attempts
                                ),
                            );
                            Applied::NeedsAttention(attempts)
                        } else {
                            sub.status = SubtaskStatus::Pending;
                            sub.needs_redo = true;
                            Applied::Redo(reason)
                        }
                    }
                }
            })
            .await?;

        if let Applied::NeedsAttention(attempts) = applied {
            warn!(%session_id, %subtask_id, attempts, "Subtask hit the redo limit");
            self.services.log_error(
                session_id,
                "redo_limit",
                &format!("Subtask {} needs attention after {} redo attempts", subtask_id, attempts),
            );
        }
        Ok(applied)
    }

    /// Novel bookkeeping after accepted outputs
    pub(crate) async fn after_accept(&self, session_id: &str, ids: &[String]) -> Result<(), PipelineError> {
        debug!(%session_id, ?ids, "after_accept: called");
        let setup_count = self.services.pipeline.setup_count;
        let accepted = ids.to_vec();
        let novel = self
            .services
            .state
            .mutate(session_id, move |d| {
                novel::record_accepted(d, &accepted, setup_count);
                d.state.is_novel()
            })
            .await?;
        if novel && ids.contains(&self.services.pipeline.pivot_subtask) {
            self.maybe_expand(session_id).await?;
        }
        Ok(())
    }

    async fn finish(&self, session_id: &str, steps: Vec<StepOutcome>) -> RunOutcome {
        let status = self
            .services
            .state
            .mutate(session_id, |d| {
                let in_batch = d.state.side_channel.batch_member_ids();
                if d.plan.has_pending() {
                    d.state.status = SessionStatus::Idle;
                    d.state.current_subtask_id = d.plan.next_pending_excluding(&in_batch).map(|s| s.id.clone());
                } else {
                    d.state.status = SessionStatus::Completed;
                    d.state.current_subtask_id = None;
                }
                d.state.status
            })
            .await;

        match status {
            Ok(status) => {
                info!(%session_id, %status, steps = steps.len(), "Run finished");
                RunOutcome {
                    session_id: session_id.to_string(),
                    steps,
                    status,
                    error: None,
                }
            }
            Err(e) => {
                error!(%session_id, error = %e, "Run finished but state could not be saved");
                RunOutcome {
                    session_id: session_id.to_string(),
                    steps,
                    status: SessionStatus::Error,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn fail(&self, session_id: &str, err: PipelineError) -> RunOutcome {
        let message = err.to_string();
        error!(%session_id, error = %message, "Run failed");
        let recorded = message.clone();
        let saved = self
            .services
            .state
            .mutate(session_id, move |d| {
                let in_batch = d.state.side_channel.batch_member_ids();
                for sub in d.plan.subtasks.iter_mut() {
                    if sub.status == SubtaskStatus::InProgress && !in_batch.contains(&sub.id) {
                        sub.status = SubtaskStatus::Pending;
                    }
                }
                d.state.status = SessionStatus::Error;
                d.state.add_message("orchestrator", format!("Run failed: {}", recorded));
                d.state.last_error = Some(recorded);
            })
            .await;
        if let Err(e) = saved {
            error!(%session_id, error = %e, "Failed to record run failure");
        }
        self.services.log_error(session_id, "run_failed", &message);
        RunOutcome {
            session_id: session_id.to_string(),
            steps: Vec::new(),
            status: SessionStatus::Error,
            error: Some(message),
        }
    }
}
