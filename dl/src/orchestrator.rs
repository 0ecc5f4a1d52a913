//! Session orchestrator
//!
//! Owns the shared services and is the entry point for the CLI and REPL:
//! create sessions, execute commands, render views. Pipeline runs started by
//! `next`/`all` are spawned as tokio tasks whose handles are kept so callers
//! can wait for them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use artifactstore::{ArtifactKind, ArtifactStore};
use envelopestore::{EventLog, PayloadKind, Role, SnapshotCache};
use eyre::{Context, Result, eyre};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, PipelineConfig};
use crate::dispatch::{Command, DispatchError, Dispatched, Dispatcher};
use crate::domain::Plan;
use crate::llm::GenerationClient;
use crate::pipeline::{Pipeline, RunMode, RunOutcome};
use crate::prompts::PromptLoader;
use crate::roles::{PlanRequest, Roles};
use crate::services::Services;
use crate::snapshot::{CommandResult, SessionView, SnapshotBuilder};
use crate::state::{NovelMode, NovelProfile, SessionState, SessionStatus, StateError, StateManager};

/// One line of `dl sessions`
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub topic: String,
    pub status: SessionStatus,
    pub plan_locked: bool,
    pub subtasks: usize,
    pub done: usize,
}

pub struct Orchestrator {
    services: Services,
    dispatcher: Dispatcher,
    snapshots: SnapshotBuilder,
    cache: Mutex<SnapshotCache>,
    runs: Mutex<HashMap<String, JoinHandle<RunOutcome>>>,
}

impl Orchestrator {
    /// Open storage under the configured directories
    pub async fn open(config: &Config, client: Arc<dyn GenerationClient>) -> Result<Self> {
        debug!(sessions_dir = %config.storage.sessions_dir.display(), "Orchestrator::open: called");
        let sessions_dir = &config.storage.sessions_dir;
        let state = StateManager::spawn(sessions_dir).context("Failed to start state manager")?;
        let log = EventLog::open(sessions_dir).context("Failed to open event log")?;
        let artifacts = ArtifactStore::open(sessions_dir).context("Failed to open artifact store")?;
        let cache = SnapshotCache::open(&config.storage.snapshot_db).context("Failed to open snapshot cache")?;
        let prompts = PromptLoader::new(config.prompts_dir.as_deref());

        let services = Services {
            state,
            log: Arc::new(log),
            artifacts: Arc::new(artifacts),
            roles: Roles::new(client, Arc::new(prompts)),
            pipeline: config.pipeline.clone(),
        };
        Ok(Self::from_services(services, cache))
    }

    pub fn from_services(services: Services, cache: SnapshotCache) -> Self {
        let pipeline = Pipeline::new(services.clone());
        Self {
            dispatcher: Dispatcher::new(pipeline),
            snapshots: SnapshotBuilder::new(services.clone()),
            services,
            cache: Mutex::new(cache),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        &self.services.pipeline
    }

    /// Plan a new session and return its first view
    pub async fn create_session(&self, topic: &str, novel: Option<NovelProfile>) -> Result<SessionView> {
        debug!(%topic, novel = novel.is_some(), "create_session: called");
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(eyre!("Topic must not be empty"));
        }
        let services = &self.services;
        let session_id = ArtifactStore::create_session_id();
        services.artifacts.register_session(&session_id)?;
        let plan_id = format!("plan-{}", &Uuid::now_v7().simple().to_string()[..12]);

        let mut state = SessionState::new(&session_id, &plan_id, topic);
        if let Some(profile) = novel {
            state.side_channel.novel = Some(NovelMode {
                profile,
                ..Default::default()
            });
        }

        let profile = state.side_channel.novel.as_ref().map(|n| &n.profile);
        let reply = services
            .roles
            .plan(PlanRequest {
                plan_id: &plan_id,
                topic,
                current: None,
                transcript: &[],
                input: None,
                novel: profile,
            })
            .await
            .context("Planner failed")?;
        let plan: Plan = reply.plan;

        let outline_kind = if reply.structured {
            ArtifactKind::Json
        } else {
            ArtifactKind::Markdown
        };
        let outline = services
            .artifacts
            .save(&session_id, &reply.raw, outline_kind, "Planner outline")?;
        let plan_artifact = services
            .artifacts
            .save_json(&session_id, &serde_json::to_value(&plan)?, "Initial plan")?;
        state.add_planning_message(
            "planner",
            format!("Proposed a plan with {} subtasks.", plan.subtasks.len()),
        );

        services.append(
            &session_id,
            Role::Planner,
            Role::Orchestrator,
            PayloadKind::PlanCreated,
            json!({
                "topic": topic,
                "plan": plan,
                "outline_artifact": outline.to_payload(),
                "plan_artifact": plan_artifact.to_payload(),
            }),
        )?;
        let subtasks = plan.subtasks.len();
        services.state.create(plan, state).await?;
        info!(%session_id, %topic, subtasks, "Session created");

        self.render(&session_id, CommandResult::ok("Session created.")).await
    }

    /// Log, dispatch and render one command
    pub async fn execute_command(&self, session_id: &str, text: &str, payload: Option<Value>) -> Result<SessionView> {
        debug!(%session_id, %text, "execute_command: called");
        self.ensure_session(session_id).await?;

        let payload = payload.filter(Value::is_object);
        let parsed = Command::parse(text, payload.as_ref());
        let name = parsed.as_ref().map(Command::name).unwrap_or("unknown");
        // Blank input never reaches the log
        if !text.trim().is_empty() {
            let mut logged = json!({"text": text, "command": name});
            if let Some(payload) = &payload {
                logged["payload"] = payload.clone();
            }
            self.services
                .append(session_id, Role::User, Role::Orchestrator, PayloadKind::UserCommand, logged)?;
        }

        let result = match parsed {
            Err(e) => CommandResult::failure(e.to_string()),
            Ok(command) => match self.dispatch_with_retry(session_id, command).await {
                Ok(dispatched) => {
                    if let Some(mode) = dispatched.run {
                        self.start_run(session_id, mode).await;
                    }
                    dispatched.result
                }
                Err(e) if e.is_command_failure() => {
                    debug!(%session_id, error = %e, "execute_command: command failed");
                    CommandResult::failure(e.to_string())
                }
                Err(e) => return Err(e).context("Command failed"),
            },
        };
        self.render(session_id, result).await
    }

    async fn dispatch_with_retry(&self, session_id: &str, command: Command) -> Result<Dispatched, DispatchError> {
        match self.dispatcher.dispatch(session_id, command.clone()).await {
            Err(DispatchError::State(StateError::Missing(_))) => {
                warn!(%session_id, "Session files disappeared mid-command, rehydrating");
                self.rehydrate(session_id)
                    .await
                    .map_err(|e| DispatchError::NotFound(e.to_string()))?;
                self.dispatcher.dispatch(session_id, command).await
            }
            other => other,
        }
    }

    /// Render a session without running a command
    pub async fn view(&self, session_id: &str) -> Result<SessionView> {
        debug!(%session_id, "view: called");
        self.ensure_session(session_id).await?;
        self.render(session_id, CommandResult::ok("")).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        debug!("list_sessions: called");
        let mut summaries = Vec::new();
        for session_id in self.services.artifacts.list_sessions()? {
            match self.services.state.get(&session_id).await {
                Ok(data) => summaries.push(SessionSummary {
                    topic: data.state.topic.clone(),
                    status: data.state.status,
                    plan_locked: data.state.plan_locked,
                    subtasks: data.plan.subtasks.len(),
                    done: data.plan.subtasks.iter().filter(|s| s.status.is_terminal()).count(),
                    session_id,
                }),
                Err(e) => debug!(%session_id, error = %e, "list_sessions: skipping unreadable session"),
            }
        }
        Ok(summaries)
    }

    /// Wait for the background run of a session, if one was started here
    pub async fn wait_for_run(&self, session_id: &str) -> Option<RunOutcome> {
        debug!(%session_id, "wait_for_run: called");
        let handle = self.runs.lock().ok()?.remove(session_id)?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(%session_id, error = %e, "Run task panicked or was cancelled");
                None
            }
        }
    }

    /// Whether a background run started by this process is still going
    pub fn has_active_run(&self, session_id: &str) -> bool {
        self.runs
            .lock()
            .map(|runs| runs.get(session_id).is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Mark sessions left running by a dead process as failed
    pub async fn recover_interrupted(&self) -> Result<Vec<String>> {
        debug!("recover_interrupted: called");
        Ok(self.services.state.recover_interrupted().await?)
    }

    pub async fn shutdown(&self) {
        debug!("shutdown: called");
        let pending: Vec<String> = self
            .runs
            .lock()
            .map(|runs| runs.keys().cloned().collect())
            .unwrap_or_default();
        for session_id in pending {
            self.wait_for_run(&session_id).await;
        }
        if let Err(e) = self.services.state.shutdown().await {
            warn!(error = %e, "State manager shutdown failed");
        }
    }

    async fn start_run(&self, session_id: &str, mode: RunMode) {
        let pipeline = self.dispatcher.pipeline().clone();
        if !self.services.pipeline.background {
            debug!(%session_id, ?mode, "start_run: running inline");
            pipeline.execute_run(session_id, mode).await;
            return;
        }
        let sid = session_id.to_string();
        let handle = tokio::spawn(async move { pipeline.execute_run(&sid, mode).await });
        match self.runs.lock() {
            Ok(mut runs) => {
                runs.insert(session_id.to_string(), handle);
            }
            Err(e) => warn!(%session_id, error = %e, "Run registry poisoned; run continues untracked"),
        }
        debug!(%session_id, ?mode, "start_run: spawned");
    }

    async fn ensure_session(&self, session_id: &str) -> Result<()> {
        match self.services.state.get(session_id).await {
            Ok(_) => Ok(()),
            Err(StateError::Missing(_)) => self.rehydrate(session_id).await,
            Err(e) => Err(e).context(format!("Failed to load session {}", session_id)),
        }
    }

    /// Restore plan and state from the cached view
    async fn rehydrate(&self, session_id: &str) -> Result<()> {
        debug!(%session_id, "rehydrate: called");
        let snapshot = self
            .cache
            .lock()
            .map_err(|_| eyre!("Snapshot cache lock poisoned"))?
            .load(session_id)?
            .ok_or_else(|| eyre!("Session {} not found", session_id))?;
        let plan: Plan = serde_json::from_value(snapshot.get("plan").cloned().unwrap_or_default())
            .context("Cached snapshot has no usable plan")?;
        let mut state: SessionState = serde_json::from_value(snapshot.get("state").cloned().unwrap_or_default())
            .context("Cached snapshot has no usable state")?;
        if state.is_running() {
            state.status = SessionStatus::Error;
            state.last_error = Some("interrupted".to_string());
            state.add_message("orchestrator", "The previous run was interrupted.");
        }
        self.services.state.replace(plan, state).await?;
        info!(%session_id, "Session rehydrated from snapshot cache");
        Ok(())
    }

    async fn render(&self, session_id: &str, result: CommandResult) -> Result<SessionView> {
        let view = self.snapshots.render(session_id, result).await?;
        let cached = serde_json::to_value(&view)
            .map_err(|e| eyre!(e))
            .and_then(|value| {
                self.cache
                    .lock()
                    .map_err(|_| eyre!("Snapshot cache lock poisoned"))?
                    .save(session_id, &value)
                    .map_err(|e| eyre!(e))
            });
        if let Err(e) = cached {
            warn!(%session_id, error = %e, "Failed to cache snapshot");
        }
        Ok(view)
    }
}
