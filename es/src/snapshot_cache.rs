//! SQLite-backed cache of rendered session views
//!
//! Used to rehydrate a session when its primary state files are missing.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::StoreError;

pub struct SnapshotCache {
    conn: Connection,
}

impl SnapshotCache {
    /// Open or create the cache database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!(?path, "SnapshotCache::open: called");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let cache = Self { conn };
        cache.init()?;
        info!(?path, "Opened snapshot cache");
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("SnapshotCache::open_in_memory: called");
        let cache = Self {
            conn: Connection::open_in_memory()?,
        };
        cache.init()?;
        Ok(cache)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshots (
                session_id TEXT PRIMARY KEY,
                snapshot   TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Insert or replace the snapshot for a session
    pub fn save(&self, session_id: &str, snapshot: &Value) -> Result<(), StoreError> {
        debug!(%session_id, "SnapshotCache::save: called");
        let body = serde_json::to_string(snapshot)?;
        self.conn.execute(
            "INSERT INTO snapshots (session_id, snapshot, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at",
            params![session_id, body, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<Option<Value>, StoreError> {
        debug!(%session_id, "SnapshotCache::load: called");
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot FROM snapshots WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(b) => Ok(Some(serde_json::from_str(&b)?)),
            None => {
                debug!(%session_id, "SnapshotCache::load: no snapshot");
                Ok(None)
            }
        }
    }

    /// `(session_id, updated_at)` pairs, most recently updated first
    pub fn list(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT session_id, updated_at FROM snapshots ORDER BY updated_at DESC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Returns true if a row was removed
    pub fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let n = self
            .conn
            .execute("DELETE FROM snapshots WHERE session_id = ?1", params![session_id])?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_save_load_upsert() {
        let cache = SnapshotCache::open_in_memory().unwrap();
        assert!(cache.load("s1").unwrap().is_none());

        cache.save("s1", &json!({"plan": {"title": "v1"}})).unwrap();
        cache.save("s1", &json!({"plan": {"title": "v2"}})).unwrap();

        let loaded = cache.load("s1").unwrap().unwrap();
        assert_eq!(loaded["plan"]["title"], "v2");
        assert_eq!(cache.list().unwrap().len(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("snapshots.db");
        {
            let cache = SnapshotCache::open(&path).unwrap();
            cache.save("s1", &json!({"ok": true})).unwrap();
        }
        let cache = SnapshotCache::open(&path).unwrap();
        assert_eq!(cache.load("s1").unwrap(), Some(json!({"ok": true})));
        assert!(cache.delete("s1").unwrap());
        assert!(!cache.delete("s1").unwrap());
    }
}
