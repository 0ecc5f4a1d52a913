//! StateManager - actor that owns the session files
//!
//! Every read-modify-write of a session goes through this actor, which makes
//! it the single writer for `state.json` and `orchestrator_state.json` within
//! the process. Cross-process exclusion for runs is the job of [`RunLock`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::Plan;

use super::files::{RunLock, SessionFiles};
use super::messages::{MutateFn, SessionData, StateCommand, StateError, StateResponse};
use super::session::{SessionState, SessionStatus};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    sessions_dir: PathBuf,
}

impl StateManager {
    /// Spawn a new StateManager actor
    pub fn spawn(sessions_dir: impl AsRef<Path>) -> StateResponse<Self> {
        let sessions_dir = sessions_dir.as_ref().to_path_buf();
        debug!(sessions_dir = %sessions_dir.display(), "spawn: called");
        fs::create_dir_all(&sessions_dir)?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(sessions_dir.clone(), rx));

        info!("StateManager spawned");
        Ok(Self { tx, sessions_dir })
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn files(&self, session_id: &str) -> SessionFiles {
        SessionFiles::new(&self.sessions_dir, session_id)
    }

    /// Persist a brand new session
    pub async fn create(&self, plan: Plan, state: SessionState) -> StateResponse<()> {
        debug!(session_id = %state.session_id, "create: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::Create {
                data: SessionData { plan, state },
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Clone of the current plan and state
    pub async fn get(&self, session_id: &str) -> StateResponse<SessionData> {
        debug!(%session_id, "get: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::Get {
                session_id: session_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Apply `f` atomically and persist the result
    ///
    /// The closure runs inside the actor, so no other mutation of the same
    /// session can interleave with it.
    pub async fn mutate<R, F>(&self, session_id: &str, f: F) -> StateResponse<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut SessionData) -> R + Send + 'static,
    {
        debug!(%session_id, "mutate: called");
        let (result_tx, result_rx) = oneshot::channel();
        let apply: MutateFn = Box::new(move |data| {
            let _ = result_tx.send(f(data));
        });

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::Mutate {
                session_id: session_id.to_string(),
                apply,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)??;
        result_rx.await.map_err(|_| StateError::ChannelError)
    }

    /// Overwrite a session from a recovered copy
    pub async fn replace(&self, plan: Plan, state: SessionState) -> StateResponse<()> {
        debug!(session_id = %state.session_id, "replace: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::Replace {
                data: SessionData { plan, state },
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Session ids with files on disk
    pub async fn list(&self) -> StateResponse<Vec<String>> {
        debug!("list: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::List { reply: reply_tx })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Drop a session from the in-memory cache
    pub async fn evict(&self, session_id: &str) -> StateResponse<()> {
        debug!(%session_id, "evict: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::Evict {
                session_id: session_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }

    // === Convenience methods ===

    /// Atomically claim the session for a run
    ///
    /// Returns false without changing anything when a run is already active.
    pub async fn try_begin_run(&self, session_id: &str, subtask_id: Option<String>) -> StateResponse<bool> {
        debug!(%session_id, ?subtask_id, "try_begin_run: called");
        self.mutate(session_id, move |data| {
            if data.state.is_running() {
                debug!("try_begin_run: already running");
                return false;
            }
            data.state.status = SessionStatus::Running;
            data.state.last_error = None;
            if subtask_id.is_some() {
                data.state.current_subtask_id = subtask_id;
            }
            true
        })
        .await
    }

    /// Mark sessions left `running` by a dead process as failed
    pub async fn recover_interrupted(&self) -> StateResponse<Vec<String>> {
        debug!("recover_interrupted: called");
        let mut recovered = Vec::new();
        for session_id in self.list().await? {
            let data = match self.get(&session_id).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(%session_id, error = %e, "recover_interrupted: unreadable session");
                    continue;
                }
            };
            if !data.state.is_running() {
                continue;
            }
            // A live holder still owns the run
            let Some(_lease) = RunLock::try_acquire(&self.files(&session_id))? else {
                debug!(%session_id, "recover_interrupted: run lock held, skipping");
                continue;
            };
            self.mutate(&session_id, |data| {
                data.state.status = SessionStatus::Error;
                data.state.last_error = Some("interrupted".to_string());
                data.state.add_message("orchestrator", "The previous run was interrupted.");
            })
            .await?;
            info!(%session_id, "Recovered interrupted session");
            recovered.push(session_id);
        }
        Ok(recovered)
    }
}

struct SessionCache {
    sessions_dir: PathBuf,
    loaded: HashMap<String, SessionData>,
}

impl SessionCache {
    /// Cached copy, loading from disk on first use
    ///
    /// Files that disappeared behind our back invalidate the cached copy.
    fn load(&mut self, session_id: &str) -> StateResponse<&mut SessionData> {
        let files = SessionFiles::new(&self.sessions_dir, session_id);
        if !files.exist() {
            self.loaded.remove(session_id);
            return Err(StateError::Missing(session_id.to_string()));
        }
        if !self.loaded.contains_key(session_id) {
            let data = files.load(session_id)?;
            self.loaded.insert(session_id.to_string(), data);
        }
        self.loaded
            .get_mut(session_id)
            .ok_or_else(|| StateError::NotFound(session_id.to_string()))
    }

    fn store(&mut self, data: SessionData) -> StateResponse<()> {
        let session_id = data.state.session_id.clone();
        SessionFiles::new(&self.sessions_dir, &session_id).save(&data)?;
        self.loaded.insert(session_id, data);
        Ok(())
    }

    fn mutate(&mut self, session_id: &str, apply: MutateFn) -> StateResponse<()> {
        let mut working = self.load(session_id)?.clone();
        apply(&mut working);
        self.store(working)
    }

    fn list(&self) -> StateResponse<Vec<String>> {
        let mut ids = Vec::new();
        if !self.sessions_dir.exists() {
            return Ok(ids);
        }
        for entry in fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if SessionFiles::new(&self.sessions_dir, &name).exist() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// The actor loop that processes commands
async fn actor_loop(sessions_dir: PathBuf, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: called");
    let mut cache = SessionCache {
        sessions_dir,
        loaded: HashMap::new(),
    };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::Create { data, reply } => {
                debug!(session_id = %data.state.session_id, "actor_loop: Create command");
                let _ = reply.send(cache.store(data));
            }

            StateCommand::Get { session_id, reply } => {
                debug!(%session_id, "actor_loop: Get command");
                let result = cache.load(&session_id).map(|data| data.clone());
                let _ = reply.send(result);
            }

            StateCommand::Mutate {
                session_id,
                apply,
                reply,
            } => {
                debug!(%session_id, "actor_loop: Mutate command");
                let _ = reply.send(cache.mutate(&session_id, apply));
            }

            StateCommand::Replace { data, reply } => {
                debug!(session_id = %data.state.session_id, "actor_loop: Replace command");
                let _ = reply.send(cache.store(data));
            }

            StateCommand::List { reply } => {
                debug!("actor_loop: List command");
                let _ = reply.send(cache.list());
            }

            StateCommand::Evict { session_id, reply } => {
                debug!(%session_id, "actor_loop: Evict command");
                cache.loaded.remove(&session_id);
                let _ = reply.send(Ok(()));
            }

            StateCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}
