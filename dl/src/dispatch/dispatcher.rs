//! Command state machine

use artifactstore::ArtifactKind;
use envelopestore::{PayloadKind, Role};
use serde_json::json;
use tracing::{debug, info};

use super::commands::{Command, NewSubtask, SubtaskPatch};
use super::intents::RedoMode;
use super::{DispatchError, LOCKED_NOTICE, RUN_IN_PROGRESS};
use crate::domain::{Subtask, SubtaskStatus};
use crate::pipeline::{Pipeline, RunMode};
use crate::roles::{PlanRequest, build_context};
use crate::services::Services;
use crate::snapshot::CommandResult;
use crate::state::WorkerOutputRef;

/// Outcome of a dispatched command
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub result: CommandResult,
    /// Pipeline work the caller must start; the session is already claimed
    pub run: Option<RunMode>,
}

impl Dispatched {
    fn done(result: CommandResult) -> Self {
        Self { result, run: None }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    pipeline: Pipeline,
}

fn parse_status(value: &str) -> Result<SubtaskStatus, DispatchError> {
    let status: SubtaskStatus = value
        .parse()
        .map_err(|_| DispatchError::Validation(format!("Invalid status: {}", value)))?;
    if status == SubtaskStatus::Done {
        return Err(DispatchError::Validation(
            "Status done is only set by an accepted review".to_string(),
        ));
    }
    Ok(status)
}

impl Dispatcher {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub(crate) fn services(&self) -> &Services {
        self.pipeline.services()
    }

    /// Execute one command against a session
    ///
    /// Command-level failures come back as errors for which
    /// [`DispatchError::is_command_failure`] holds.
    pub async fn dispatch(&self, session_id: &str, command: Command) -> Result<Dispatched, DispatchError> {
        debug!(%session_id, command = command.name(), "dispatch: called");
        if command.is_structural() {
            let data = self.services().state.get(session_id).await?;
            if data.state.plan_locked {
                debug!(%session_id, "dispatch: structural edit on locked plan");
                self.services().post(session_id, "orchestrator", LOCKED_NOTICE).await?;
                return Err(DispatchError::Locked);
            }
        }

        match command {
            Command::Plan => Ok(Dispatched::done(CommandResult::ok("Current plan."))),
            Command::ConfirmPlan => self.confirm_plan(session_id).await,
            Command::Next => self.start_run(session_id, RunMode::Next).await,
            Command::All => self.start_run(session_id, RunMode::All).await,
            Command::SetCurrent { subtask_id } => self.set_current(session_id, subtask_id).await,
            Command::Update { subtask_id, patch } => self.update_subtask(session_id, subtask_id, patch).await,
            Command::Insert(new) => self.add_subtask(session_id, new, true).await,
            Command::Append(new) => self.add_subtask(session_id, new, false).await,
            Command::Skip { subtask_id, reason } => self.skip_subtask(session_id, subtask_id, reason).await,
            Command::ApplyRevision { subtask_id } => self.apply_revision(session_id, subtask_id).await,
            Command::Ask { question } => self.converse(session_id, question).await,
            Command::FreeText(text) => self.converse(session_id, text).await,
        }
    }

    async fn confirm_plan(&self, session_id: &str) -> Result<Dispatched, DispatchError> {
        let first = self
            .services()
            .state
            .mutate(session_id, |d| {
                let first = d.state.lock_plan();
                if first {
                    d.state
                        .add_message("orchestrator", "Plan has been locked; execution phase can begin.");
                }
                first
            })
            .await?;
        if !first {
            return Ok(Dispatched::done(CommandResult::ok("Plan already locked.")));
        }
        self.services().append(
            session_id,
            Role::User,
            Role::Orchestrator,
            PayloadKind::PlanLocked,
            json!({"locked_by": "user"}),
        )?;
        info!(%session_id, "Plan locked");
        Ok(Dispatched::done(CommandResult::ok("Plan locked.")))
    }

    async fn start_run(&self, session_id: &str, mode: RunMode) -> Result<Dispatched, DispatchError> {
        let state = &self.services().state;
        let data = state.get(session_id).await?;
        if data.state.is_running() {
            debug!(%session_id, "start_run: already running");
            return Err(DispatchError::Validation(RUN_IN_PROGRESS.to_string()));
        }
        let in_batch = data.state.side_channel.batch_member_ids();
        let next = data.plan.next_pending_excluding(&in_batch).map(|s| s.id.clone());
        if next.is_none() && in_batch.is_empty() {
            return Ok(Dispatched::done(CommandResult::ok("All subtasks are complete.")));
        }
        if !state.try_begin_run(session_id, next.clone()).await? {
            return Err(DispatchError::Validation(RUN_IN_PROGRESS.to_string()));
        }

        let message = match (mode, next) {
            (RunMode::All, _) => "Running all pending subtasks.".to_string(),
            (RunMode::Next, Some(id)) => format!("Processing subtask {}.", id),
            (RunMode::Next, None) => "Reviewing the pending batch.".to_string(),
        };
        info!(%session_id, ?mode, "Run claimed");
        Ok(Dispatched {
            result: CommandResult::ok(message),
            run: Some(mode),
        })
    }

    async fn set_current(&self, session_id: &str, subtask_id: String) -> Result<Dispatched, DispatchError> {
        let message = self
            .services()
            .state
            .mutate(session_id, move |d| -> Result<String, DispatchError> {
                if d.plan.find(&subtask_id).is_none() {
                    return Err(DispatchError::subtask_not_found(&subtask_id));
                }
                let message = format!("Current subtask set to {}.", subtask_id);
                d.state.current_subtask_id = Some(subtask_id);
                Ok(message)
            })
            .await??;
        Ok(Dispatched::done(CommandResult::ok(message)))
    }

    async fn update_subtask(
        &self,
        session_id: &str,
        subtask_id: String,
        patch: SubtaskPatch,
    ) -> Result<Dispatched, DispatchError> {
        if patch.is_empty() {
            return Err(DispatchError::Validation(
                "Nothing to update; provide title, description, notes or status".to_string(),
            ));
        }
        let status = patch.status.as_deref().map(parse_status).transpose()?;
        let message = self
            .services()
            .state
            .mutate(session_id, move |d| -> Result<String, DispatchError> {
                let sub = d
                    .plan
                    .find_mut(&subtask_id)
                    .ok_or_else(|| DispatchError::subtask_not_found(&subtask_id))?;
                if let Some(title) = patch.title {
                    sub.title = title;
                }
                if let Some(description) = patch.description {
                    sub.description = description;
                }
                if let Some(notes) = patch.notes {
                    sub.notes = notes;
                }
                if let Some(status) = status {
                    sub.status = status;
                }
                Ok(format!("Subtask {} updated.", subtask_id))
            })
            .await??;
        Ok(Dispatched::done(CommandResult::ok(message)))
    }

    async fn add_subtask(&self, session_id: &str, new: NewSubtask, insert: bool) -> Result<Dispatched, DispatchError> {
        let status = new.status.as_deref().map(parse_status).transpose()?.unwrap_or_default();
        let message = self
            .services()
            .state
            .mutate(session_id, move |d| -> Result<String, DispatchError> {
                let id = match new.subtask_id {
                    Some(id) => id,
                    None => d.plan.generate_id(),
                };
                let mut sub = Subtask::new(id.clone(), new.title).with_status(status);
                if let Some(description) = new.description {
                    sub.description = description;
                }
                if let Some(notes) = new.notes {
                    sub.notes = notes;
                }
                match new.after_id.filter(|_| insert) {
                    Some(after_id) => {
                        d.plan.insert_after(&after_id, sub)?;
                        Ok(format!("Inserted subtask {} after {}.", id, after_id))
                    }
                    None => {
                        d.plan.append(sub)?;
                        Ok(format!("Appended subtask {}.", id))
                    }
                }
            })
            .await??;
        info!(%session_id, %message, "Plan edited");
        Ok(Dispatched::done(CommandResult::ok(message)))
    }

    async fn skip_subtask(
        &self,
        session_id: &str,
        subtask_id: String,
        reason: Option<String>,
    ) -> Result<Dispatched, DispatchError> {
        let message = self
            .services()
            .state
            .mutate(session_id, move |d| -> Result<String, DispatchError> {
                let sub = d
                    .plan
                    .find_mut(&subtask_id)
                    .ok_or_else(|| DispatchError::subtask_not_found(&subtask_id))?;
                sub.status = SubtaskStatus::Skipped;
                sub.needs_redo = false;
                if let Some(reason) = &reason {
                    sub.append_note(&format!("Skipped: {}", reason));
                }
                if d.state.current_subtask_id.as_deref() == Some(subtask_id.as_str()) {
                    d.state.current_subtask_id = d.plan.next_pending().map(|s| s.id.clone());
                }
                Ok(format!("Subtask {} skipped.", subtask_id))
            })
            .await??;
        Ok(Dispatched::done(CommandResult::ok(message)))
    }

    /// Adopt a cached reviewer revision as the subtask's output
    async fn apply_revision(&self, session_id: &str, subtask_id: String) -> Result<Dispatched, DispatchError> {
        let services = self.services();
        let data = services.state.get(session_id).await?;
        let Some(text) = data
            .state
            .side_channel
            .revisions
            .get(&subtask_id)
            .and_then(|r| r.revised_text.clone())
        else {
            return Err(DispatchError::NotFound(format!(
                "No cached reviewer revision for subtask {}",
                subtask_id
            )));
        };
        if data.plan.find(&subtask_id).is_none() {
            return Err(DispatchError::subtask_not_found(&subtask_id));
        }

        let artifact = services.artifacts.save(
            session_id,
            &text,
            ArtifactKind::Markdown,
            &format!("Adopted reviewer revision for {}", subtask_id),
        )?;
        let env = services.append(
            session_id,
            Role::User,
            Role::Orchestrator,
            PayloadKind::UserFeedback,
            json!({
                "subtask_id": subtask_id,
                "decision": "accept",
                "feedback": "adopted reviewer revision",
            }),
        )?;

        let id = subtask_id.clone();
        services
            .state
            .mutate(session_id, move |d| {
                if let Some(sub) = d.plan.find_mut(&id) {
                    sub.output = text;
                    sub.status = SubtaskStatus::Done;
                    sub.needs_redo = false;
                    sub.append_note("[adopted reviewer revision]");
                }
                let side = &mut d.state.side_channel;
                if let Some(revision) = side.revisions.get_mut(&id) {
                    revision.adopted = true;
                }
                side.redo_attempts.remove(&id);
                if let Some(batch) = side.batch.as_mut() {
                    batch.pending.retain(|m| m.subtask_id != id);
                }
                d.state.cache_worker_output(WorkerOutputRef {
                    subtask_id: id,
                    artifact,
                    timestamp: env.timestamp,
                });
            })
            .await?;
        info!(%session_id, %subtask_id, "Reviewer revision adopted");
        Ok(Dispatched::done(CommandResult::ok(format!(
            "Adopted the reviewer revision for subtask {}.",
            subtask_id
        ))))
    }

    /// Free text and `ask`: plan with the user before lock, answer after
    async fn converse(&self, session_id: &str, text: String) -> Result<Dispatched, DispatchError> {
        let services = self.services();
        let data = services.state.get(session_id).await?;
        let intent = services.roles.classify(&data.plan, &text).await;
        debug!(%session_id, kind = %intent.kind, "converse: classified");
        let locked = data.state.plan_locked;
        let (planning_intent, execution_intent) = if locked { (None, Some(intent)) } else { (Some(intent), None) };
        {
            let text = text.clone();
            services
                .state
                .mutate(session_id, move |d| {
                    d.state.add_message("user", text);
                    d.state.pending_intents.extend(planning_intent);
                })
                .await?;
        }

        if !locked {
            return self.converse_planning(session_id, text).await;
        }

        let data = services.state.get(session_id).await?;
        let context = build_context(&data.plan, &data.state, &services.artifacts);
        let answer = services.roles.answer("execution", &context, &text).await?;
        self.respond(session_id, &text, &answer).await?;
        // Queued only once answered; a failed answer leaves nothing behind
        services
            .state
            .mutate(session_id, move |d| d.state.pending_intents.extend(execution_intent))
            .await?;

        let mode = if data.state.is_running() {
            RedoMode::Deferred
        } else {
            RedoMode::Immediate
        };
        let notes = self.consume_intents(session_id, mode).await?;
        Ok(Dispatched::done(
            CommandResult::ok(answer).with_context(json!({"context": context, "intents": notes})),
        ))
    }

    async fn converse_planning(&self, session_id: &str, text: String) -> Result<Dispatched, DispatchError> {
        let services = self.services();
        {
            let text = text.clone();
            services
                .state
                .mutate(session_id, move |d| d.state.add_planning_message("user", text))
                .await?;
        }

        let data = services.state.get(session_id).await?;
        let profile = data.state.side_channel.novel.as_ref().map(|n| &n.profile);
        let reply = services
            .roles
            .plan(PlanRequest {
                plan_id: &data.state.plan_id,
                topic: &data.state.topic,
                current: Some(&data.plan),
                transcript: &data.state.planning_transcript,
                input: Some(&text),
                novel: profile,
            })
            .await?;

        let summary = if reply.structured {
            format!("Updated the plan: {} subtasks.", reply.plan.subtasks.len())
        } else {
            reply.raw.trim().to_string()
        };
        let plan = reply.plan;
        let data = services
            .state
            .mutate(session_id, move |d| {
                d.plan = plan;
                d.state.add_planning_message("planner", summary);
                // The planner has already acted on the request
                d.state.pending_intents.clear();
                d.clone()
            })
            .await?;

        let context = build_context(&data.plan, &data.state, &services.artifacts);
        let answer = services.roles.answer("planning", &context, &text).await?;
        self.respond(session_id, &text, &answer).await?;
        Ok(Dispatched::done(
            CommandResult::ok(answer).with_context(json!({"context": context})),
        ))
    }

    async fn respond(&self, session_id: &str, question: &str, answer: &str) -> Result<(), DispatchError> {
        self.services().append(
            session_id,
            Role::Coordinator,
            Role::User,
            PayloadKind::CoordResponse,
            json!({"question": question, "response": answer}),
        )?;
        self.services()
            .post(session_id, "coordinator", answer.to_string())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_refuses_done() {
        assert_eq!(parse_status("skipped").unwrap(), SubtaskStatus::Skipped);
        assert_eq!(parse_status("Pending").unwrap(), SubtaskStatus::Pending);
        assert!(parse_status("done").is_err());
        assert_eq!(parse_status("bogus").unwrap_err().to_string(), "Invalid status: bogus");
    }
}
