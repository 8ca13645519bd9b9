// src/client/store.rs

//! Durable per-session answer state on the student's machine.
//!
//! Everything the client persists for one (exam, student) pair lives in a
//! single versioned JSON blob: the answer map and the clock start time.
//! Writes are best effort. A failed write is logged and the in-memory copy
//! stays authoritative for the lifetime of the process.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::session::SessionKey;

/// Version of the persisted blob layout.
pub const STORE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerStatus {
    /// Edited locally, not yet acknowledged by the server.
    Pending,
    /// The server acknowledged exactly this answer text.
    Synced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    pub answer: String,
    pub status: AnswerStatus,
    pub order: i64,
}

impl AnswerEntry {
    pub fn pending(answer: impl Into<String>, order: i64) -> Self {
        Self {
            answer: answer.into(),
            status: AnswerStatus::Pending,
            order,
        }
    }

    pub fn synced(answer: impl Into<String>, order: i64) -> Self {
        Self {
            answer: answer.into(),
            status: AnswerStatus::Synced,
            order,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == AnswerStatus::Pending
    }
}

/// questionId -> entry
pub type AnswerMap = BTreeMap<i64, AnswerEntry>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    schema_version: u32,
    exam_id: i64,
    student_id: i64,
    started_at: Option<DateTime<Utc>>,
    answers: AnswerMap,
}

impl PersistedSession {
    fn empty(key: SessionKey) -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION,
            exam_id: key.exam_id,
            student_id: key.student_id,
            started_at: None,
            answers: AnswerMap::new(),
        }
    }
}

pub struct LocalAnswerStore {
    key: SessionKey,
    path: Option<PathBuf>,
    data: PersistedSession,
}

impl LocalAnswerStore {
    /// Opens (or starts) the blob for `key` under `dir`.
    ///
    /// A missing, unreadable, or foreign blob yields an empty store.
    pub fn open(dir: impl AsRef<Path>, key: SessionKey) -> Self {
        let path = dir.as_ref().join(Self::file_name(key));
        let data = match Self::read(&path, key) {
            Ok(Some(data)) => data,
            Ok(None) => PersistedSession::empty(key),
            Err(err) => {
                warn!(path = %path.display(), %err, "discarding unreadable answer store");
                PersistedSession::empty(key)
            }
        };
        Self {
            key,
            path: Some(path),
            data,
        }
    }

    /// A store that never touches disk.
    pub fn in_memory(key: SessionKey) -> Self {
        Self {
            key,
            path: None,
            data: PersistedSession::empty(key),
        }
    }

    pub fn file_name(key: SessionKey) -> String {
        format!("exam-{}-student-{}.json", key.exam_id, key.student_id)
    }

    fn read(path: &Path, key: SessionKey) -> io::Result<Option<PersistedSession>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let data: PersistedSession = serde_json::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if data.schema_version != STORE_SCHEMA_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported schema version {}", data.schema_version),
            ));
        }
        if data.exam_id != key.exam_id || data.student_id != key.student_id {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "blob belongs to another session",
            ));
        }
        Ok(Some(data))
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn get(&self, question_id: i64) -> Option<&AnswerEntry> {
        self.data.answers.get(&question_id)
    }

    pub fn put(&mut self, question_id: i64, entry: AnswerEntry) {
        self.data.answers.insert(question_id, entry);
        self.persist();
    }

    pub fn load_all(&self) -> AnswerMap {
        self.data.answers.clone()
    }

    pub fn answers(&self) -> &AnswerMap {
        &self.data.answers
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.data.started_at
    }

    pub fn set_started_at(&mut self, started_at: DateTime<Utc>) {
        self.data.started_at = Some(started_at);
        self.persist();
    }

    /// Drops entries for questions outside `keep`. Returns how many went.
    pub fn retain_questions(&mut self, keep: &HashSet<i64>) -> usize {
        let before = self.data.answers.len();
        self.data.answers.retain(|id, _| keep.contains(id));
        let dropped = before - self.data.answers.len();
        if dropped > 0 {
            self.persist();
        }
        dropped
    }

    /// Forgets everything for this session, on disk and in memory.
    pub fn clear(&mut self) {
        self.data = PersistedSession::empty(self.key);
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "answer store removed"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), %err, "failed to remove answer store"),
            }
        }
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = self.write_atomic(path) {
            warn!(path = %path.display(), %err, "answer store write failed; keeping in-memory state");
        }
    }

    /// Temp file + fsync + rename, so a crash never leaves a torn blob.
    fn write_atomic(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(&self.data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new(9, 4)
    }

    #[test]
    fn test_selection_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let started = Utc::now();
        {
            let mut store = LocalAnswerStore::open(dir.path(), key());
            store.put(5, AnswerEntry::pending("B", 5));
            store.set_started_at(started);
        }

        let store = LocalAnswerStore::open(dir.path(), key());
        assert_eq!(store.get(5), Some(&AnswerEntry::pending("B", 5)));
        assert_eq!(store.started_at(), Some(started));
        assert_eq!(store.load_all().len(), 1);
    }

    #[test]
    fn test_clear_removes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalAnswerStore::open(dir.path(), key());
        store.put(1, AnswerEntry::synced("A", 1));
        let path = dir.path().join(LocalAnswerStore::file_name(key()));
        assert!(path.exists());

        store.clear();
        assert!(!path.exists());
        assert!(store.answers().is_empty());
        assert!(LocalAnswerStore::open(dir.path(), key()).answers().is_empty());
    }

    #[test]
    fn test_foreign_version_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LocalAnswerStore::file_name(key()));
        fs::write(
            &path,
            r#"{"schemaVersion":0,"examId":9,"studentId":4,"startedAt":null,"answers":{}}"#,
        )
        .unwrap();
        let store = LocalAnswerStore::open(dir.path(), key());
        assert!(store.answers().is_empty());
        assert!(store.started_at().is_none());
    }

    #[test]
    fn test_corrupt_blob_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LocalAnswerStore::file_name(key()));
        fs::write(&path, "{not json").unwrap();
        assert!(LocalAnswerStore::open(dir.path(), key()).answers().is_empty());
    }

    #[test]
    fn test_write_failure_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the store directory should be makes every write fail.
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "").unwrap();

        let mut store = LocalAnswerStore::open(&blocker, key());
        store.put(2, AnswerEntry::pending("C", 2));
        assert_eq!(store.get(2), Some(&AnswerEntry::pending("C", 2)));
    }
}
