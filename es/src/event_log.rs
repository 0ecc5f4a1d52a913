//! EventLog - append-only JSONL envelope log

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::envelope::{Envelope, PROTOCOL_VERSION};
use crate::error::LogError;
use crate::schema::validate_envelope;
use crate::{ENVELOPE_LOG, PROGRESS_LOG};

/// Per-session append-only envelope log rooted at the sessions directory
#[derive(Debug, Clone)]
pub struct EventLog {
    root: PathBuf,
}

impl EventLog {
    /// Open (creating if needed) a log rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, LogError> {
        let root = root.as_ref().to_path_buf();
        debug!(?root, "EventLog::open: called");
        fs::create_dir_all(&root).map_err(LogError::io(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{session}/logs`
    pub fn logs_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id).join("logs")
    }

    pub fn log_path(&self, session_id: &str) -> PathBuf {
        self.logs_dir(session_id).join(ENVELOPE_LOG)
    }

    pub fn progress_path(&self, session_id: &str) -> PathBuf {
        self.logs_dir(session_id).join(PROGRESS_LOG)
    }

    /// Validate and append an envelope
    ///
    /// Nothing is written when validation fails. The line is written under an
    /// exclusive file lock and synced to disk before returning, so a reader
    /// started right after this call observes the entry.
    pub fn append(&self, envelope: &Envelope) -> Result<Envelope, LogError> {
        debug!(session_id = %envelope.session_id, kind = %envelope.payload_type, "EventLog::append: called");
        validate_envelope(envelope)?;

        let line = serde_json::to_string(envelope)?;
        let path = self.log_path(&envelope.session_id);
        let dir = self.logs_dir(&envelope.session_id);
        fs::create_dir_all(&dir).map_err(LogError::io(&dir))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(LogError::io(&path))?;
        file.lock_exclusive().map_err(LogError::io(&path))?;

        let written = writeln!(file, "{}", line)
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_all());
        let _ = FileExt::unlock(&file);
        written.map_err(LogError::io(&path))?;

        debug!(?path, "EventLog::append: synced");
        Ok(envelope.clone())
    }

    /// Lazily iterate a session's envelopes in file order
    ///
    /// Calling this again restarts from the beginning. A missing log yields
    /// an empty iterator.
    pub fn iter(&self, session_id: &str) -> Result<EnvelopeIter, LogError> {
        let path = self.log_path(session_id);
        debug!(?path, "EventLog::iter: called");
        if !path.exists() {
            debug!("EventLog::iter: no log yet");
            return Ok(EnvelopeIter {
                path,
                lines: None,
                line_no: 0,
            });
        }
        let file = File::open(&path).map_err(LogError::io(&path))?;
        Ok(EnvelopeIter {
            path,
            lines: Some(BufReader::new(file).lines()),
            line_no: 0,
        })
    }

    /// Read every envelope for a session in file order
    pub fn read_all(&self, session_id: &str) -> Result<Vec<Envelope>, LogError> {
        Ok(self.iter(session_id)?.collect())
    }

    /// Best-effort append of a progress record to the mirror log
    ///
    /// Not schema-validated; failures are logged and swallowed.
    pub fn mirror_progress(&self, session_id: &str, event: &Value) {
        debug!(%session_id, "EventLog::mirror_progress: called");
        let record = json!({
            "payload_type": "progress_event",
            "session_id": session_id,
            "timestamp": Utc::now(),
            "source": "orchestrator",
            "target": "observer",
            "version": PROTOCOL_VERSION,
            "payload": event,
        });
        if let Err(e) = self.write_progress_line(session_id, &record) {
            warn!(%session_id, error = %e, "EventLog::mirror_progress: failed, ignoring");
        }
    }

    fn write_progress_line(&self, session_id: &str, record: &Value) -> std::io::Result<()> {
        fs::create_dir_all(self.logs_dir(session_id))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.progress_path(session_id))?;
        writeln!(file, "{}", record)?;
        file.flush()
    }

    /// Read mirrored progress payloads; unreadable lines are skipped
    pub fn read_progress(&self, session_id: &str) -> Vec<Value> {
        let path = self.progress_path(session_id);
        debug!(?path, "EventLog::read_progress: called");
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<Value>(l).ok())
            .filter_map(|v| v.get("payload").cloned())
            .collect()
    }
}

/// Lazy iterator over a session's envelope log
pub struct EnvelopeIter {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
}

impl Iterator for EnvelopeIter {
    type Item = Envelope;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        loop {
            let line = match lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!(path = ?self.path, error = %e, "EnvelopeIter: read failed, stopping");
                    return None;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Envelope>(&line) {
                Ok(envelope) => return Some(envelope),
                Err(e) => {
                    warn!(path = ?self.path, line = self.line_no, error = %e, "EnvelopeIter: skipping unparseable line");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{PayloadKind, Role};
    use tempfile::tempdir;

    fn command(session: &str, text: &str) -> Envelope {
        Envelope::new(
            session,
            Role::User,
            Role::Coordinator,
            PayloadKind::UserCommand,
            json!({"text": text}),
        )
    }

    #[test]
    fn test_append_and_read_back_in_order() {
        let temp = tempdir().unwrap();
        let log = EventLog::open(temp.path()).unwrap();

        log.append(&command("s1", "plan")).unwrap();
        log.append(&command("s1", "next")).unwrap();
        log.append(&command("s2", "other session")).unwrap();

        let entries = log.read_all("s1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload_str("text"), Some("plan"));
        assert_eq!(entries[1].payload_str("text"), Some("next"));
    }

    #[test]
    fn test_invalid_envelope_is_not_written() {
        let temp = tempdir().unwrap();
        let log = EventLog::open(temp.path()).unwrap();
        log.append(&command("s1", "plan")).unwrap();

        let bad = Envelope::new(
            "s1",
            Role::Worker,
            Role::Coordinator,
            PayloadKind::SubtaskResult,
            json!({"result_artifact": {"path": "x", "kind": "text"}}),
        );
        let err = log.append(&bad).unwrap_err();
        assert!(matches!(err, LogError::Schema(_)));
        assert_eq!(log.read_all("s1").unwrap().len(), 1);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let temp = tempdir().unwrap();
        let log = EventLog::open(temp.path()).unwrap();
        assert!(log.read_all("nope").unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_lines_are_skipped() {
        let temp = tempdir().unwrap();
        let log = EventLog::open(temp.path()).unwrap();
        log.append(&command("s1", "one")).unwrap();

        let mut file = OpenOptions::new().append(true).open(log.log_path("s1")).unwrap();
        writeln!(file, "not json at all").unwrap();
        writeln!(file).unwrap();
        drop(file);

        log.append(&command("s1", "two")).unwrap();
        let texts: Vec<_> = log
            .iter("s1")
            .unwrap()
            .map(|e| e.payload_str("text").unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn test_iter_is_restartable() {
        let temp = tempdir().unwrap();
        let log = EventLog::open(temp.path()).unwrap();
        log.append(&command("s1", "a")).unwrap();
        assert_eq!(log.iter("s1").unwrap().count(), 1);
        log.append(&command("s1", "b")).unwrap();
        assert_eq!(log.iter("s1").unwrap().count(), 2);
    }

    #[test]
    fn test_progress_mirror_round_trip() {
        let temp = tempdir().unwrap();
        let log = EventLog::open(temp.path()).unwrap();
        log.mirror_progress("s1", &json!({"agent": "worker", "subtask_id": "t1", "stage": "start"}));
        let events = log.read_progress("s1");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["agent"], "worker");
        // Mirror lines never show up as envelopes
        assert!(log.read_all("s1").unwrap().is_empty());
    }
}
