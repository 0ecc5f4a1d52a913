//! Session files on disk
//!
//! ```text
//! {sessions_dir}/{session_id}/
//! ├── state.json                # {session_id, plan}
//! ├── orchestrator_state.json   # SessionState
//! └── run.lock                  # held while a run drives the session
//! ```

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::Plan;

use super::messages::{SessionData, StateError, StateResponse};
use super::session::SessionState;

pub const PLAN_FILE: &str = "state.json";
pub const STATE_FILE: &str = "orchestrator_state.json";
pub const RUN_LOCK_FILE: &str = "run.lock";

#[derive(Debug, Serialize, Deserialize)]
struct PlanFile {
    session_id: String,
    plan: Plan,
}

/// Paths for one session directory
#[derive(Debug, Clone)]
pub struct SessionFiles {
    dir: PathBuf,
}

impl SessionFiles {
    pub fn new(sessions_dir: &Path, session_id: &str) -> Self {
        Self {
            dir: sessions_dir.join(session_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn plan_path(&self) -> PathBuf {
        self.dir.join(PLAN_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(RUN_LOCK_FILE)
    }

    pub fn exist(&self) -> bool {
        self.plan_path().exists() && self.state_path().exists()
    }

    pub fn load(&self, session_id: &str) -> StateResponse<SessionData> {
        debug!(%session_id, dir = %self.dir.display(), "SessionFiles::load: called");
        if !self.exist() {
            debug!(%session_id, "SessionFiles::load: files missing");
            return Err(StateError::Missing(session_id.to_string()));
        }
        let plan_file: PlanFile = serde_json::from_str(&fs::read_to_string(self.plan_path())?)?;
        let state: SessionState = serde_json::from_str(&fs::read_to_string(self.state_path())?)?;
        Ok(SessionData {
            plan: plan_file.plan,
            state,
        })
    }

    /// Write both files atomically (temp file then rename)
    pub fn save(&self, data: &SessionData) -> StateResponse<()> {
        debug!(session_id = %data.state.session_id, "SessionFiles::save: called");
        fs::create_dir_all(&self.dir)?;
        let plan_file = PlanFile {
            session_id: data.state.session_id.clone(),
            plan: data.plan.clone(),
        };
        self.write_atomic(&self.plan_path(), &serde_json::to_vec_pretty(&plan_file)?)?;
        self.write_atomic(&self.state_path(), &serde_json::to_vec_pretty(&data.state)?)?;
        Ok(())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StateResponse<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StateError::Io(e.error))?;
        Ok(())
    }
}

/// Exclusive cross-process lease on a session's run
///
/// Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    /// Try to take the lease; `None` when another holder has it
    pub fn try_acquire(files: &SessionFiles) -> StateResponse<Option<Self>> {
        debug!(path = %files.lock_path().display(), "RunLock::try_acquire: called");
        fs::create_dir_all(files.dir())?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(files.lock_path())?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) => {
                debug!(error = %e, "RunLock::try_acquire: held elsewhere");
                Ok(None)
            }
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let files = SessionFiles::new(temp.path(), "s1");
        let data = SessionData {
            plan: Plan::from_outline("p1", "topic", "- a\n- b"),
            state: SessionState::new("s1", "p1", "topic"),
        };

        assert!(matches!(files.load("s1"), Err(StateError::Missing(_))));
        files.save(&data).unwrap();
        assert!(files.exist());
        assert_eq!(files.load("s1").unwrap(), data);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(files.plan_path()).unwrap()).unwrap();
        assert_eq!(raw["session_id"], "s1");
        assert_eq!(raw["plan"]["subtasks"][1]["title"], "b");
    }

    #[test]
    fn test_missing_one_file_is_missing() {
        let temp = tempdir().unwrap();
        let files = SessionFiles::new(temp.path(), "s1");
        files
            .save(&SessionData {
                plan: Plan::new("p1", "t"),
                state: SessionState::new("s1", "p1", "t"),
            })
            .unwrap();
        fs::remove_file(files.state_path()).unwrap();
        assert!(matches!(files.load("s1"), Err(StateError::Missing(_))));
    }

    #[test]
    fn test_run_lock_is_exclusive() {
        let temp = tempdir().unwrap();
        let files = SessionFiles::new(temp.path(), "s1");

        let first = RunLock::try_acquire(&files).unwrap();
        assert!(first.is_some());
        assert!(RunLock::try_acquire(&files).unwrap().is_none());

        drop(first);
        assert!(RunLock::try_acquire(&files).unwrap().is_some());
    }
}
