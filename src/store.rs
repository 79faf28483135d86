//! Session-keyed persistence sink.
//!
//! Two tables: behavioral rows (one per session, upserted) and activity rows
//! (shop actions, appended). Reads return both tables merged, newest first.

use crate::snapshot::{RecordSource, SessionRecord};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record has no session id")]
    MissingSessionId,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Write/read contract of the persistence sink.
pub trait SessionStore: Send + Sync {
    /// Insert or overwrite the behavioral row for a session.
    fn upsert(&self, record: SessionRecord) -> Result<(), StoreError>;

    /// Append a row to the activity table.
    fn append_activity(&self, record: SessionRecord) -> Result<(), StoreError>;

    /// Behavioral row for a session.
    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Every row from both tables, newest first.
    fn records(&self) -> Result<Vec<SessionRecord>, StoreError>;

    /// Remove a session from both tables. Returns whether anything was removed.
    fn delete(&self, session_id: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Tables {
    behavior: Vec<SessionRecord>,
    activity: Vec<SessionRecord>,
}

impl Tables {
    fn upsert(&mut self, mut record: SessionRecord) -> Result<(), StoreError> {
        check_session_id(&record)?;
        record.source = RecordSource::Behavior;
        match self
            .behavior
            .iter_mut()
            .find(|row| row.session_id == record.session_id)
        {
            Some(row) => *row = record,
            None => self.behavior.push(record),
        }
        Ok(())
    }

    fn append_activity(&mut self, mut record: SessionRecord) -> Result<(), StoreError> {
        check_session_id(&record)?;
        record.source = RecordSource::Activity;
        self.activity.push(record);
        Ok(())
    }

    fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.behavior
            .iter()
            .find(|row| row.session_id == session_id)
            .cloned()
    }

    fn records(&self) -> Vec<SessionRecord> {
        let mut all: Vec<SessionRecord> = self
            .behavior
            .iter()
            .map(|row| tagged(row, RecordSource::Behavior))
            .chain(self.activity.iter().map(|row| tagged(row, RecordSource::Activity)))
            .collect();
        all.sort_by(|a, b| newest_first(a.parsed_created_at(), b.parsed_created_at()));
        all
    }

    fn delete(&mut self, session_id: &str) -> bool {
        let before = self.behavior.len() + self.activity.len();
        self.behavior.retain(|row| row.session_id != session_id);
        self.activity.retain(|row| row.session_id != session_id);
        before != self.behavior.len() + self.activity.len()
    }
}

fn tagged(row: &SessionRecord, source: RecordSource) -> SessionRecord {
    SessionRecord {
        source,
        ..row.clone()
    }
}

fn check_session_id(record: &SessionRecord) -> Result<(), StoreError> {
    if record.session_id.trim().is_empty() {
        return Err(StoreError::MissingSessionId);
    }
    Ok(())
}

fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn upsert(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.tables.write().upsert(record)
    }

    fn append_activity(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.tables.write().append_activity(record)
    }

    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.tables.read().get(session_id))
    }

    fn records(&self) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.tables.read().records())
    }

    fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.tables.write().delete(session_id))
    }
}

/// Store persisted to a single JSON file, rewritten after each write.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    tables: RwLock<Tables>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tables = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Tables::default()
        };

        tracing::debug!(
            path = %path.display(),
            behavior = tables.behavior.len(),
            activity = tables.activity.len(),
            "Opened session store"
        );

        Ok(Self {
            path,
            tables: RwLock::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(tables)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn write_with<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R, StoreError>) -> Result<R, StoreError> {
        let mut tables = self.tables.write();
        let result = f(&mut tables)?;
        self.persist(&tables)?;
        Ok(result)
    }
}

impl SessionStore for JsonFileStore {
    fn upsert(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.write_with(|t| t.upsert(record))
    }

    fn append_activity(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.write_with(|t| t.append_activity(record))
    }

    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.tables.read().get(session_id))
    }

    fn records(&self) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.tables.read().records())
    }

    fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        self.write_with(|t| Ok(t.delete(session_id)))
    }
}

impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    fn upsert(&self, record: SessionRecord) -> Result<(), StoreError> {
        (**self).upsert(record)
    }

    fn append_activity(&self, record: SessionRecord) -> Result<(), StoreError> {
        (**self).append_activity(record)
    }

    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        (**self).get(session_id)
    }

    fn records(&self) -> Result<Vec<SessionRecord>, StoreError> {
        (**self).records()
    }

    fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        (**self).delete(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_upsert_overwrites_by_session() {
        let store = MemoryStore::new();
        let mut first = SessionRecord::new("s", t0());
        first.mouse_clicks = 1;
        let mut second = SessionRecord::new("s", t0() + Duration::minutes(1));
        second.mouse_clicks = 9;

        store.upsert(first).unwrap();
        store.upsert(second).unwrap();

        assert_eq!(store.records().unwrap().len(), 1);
        assert_eq!(store.get("s").unwrap().unwrap().mouse_clicks, 9);
    }

    #[test]
    fn test_activity_is_append_only() {
        let store = MemoryStore::new();
        store.append_activity(SessionRecord::new("s", t0())).unwrap();
        store.append_activity(SessionRecord::new("s", t0())).unwrap();

        assert_eq!(store.records().unwrap().len(), 2);
        assert!(store.get("s").unwrap().is_none());
    }

    #[test]
    fn test_records_newest_first_with_bad_timestamps_last() {
        let store = MemoryStore::new();
        let mut broken = SessionRecord::new("c", t0());
        broken.created_at = Some("not a time".to_string());
        store.upsert(broken).unwrap();
        store.upsert(SessionRecord::new("a", t0())).unwrap();
        store
            .append_activity(SessionRecord::new("b", t0() + Duration::minutes(5)))
            .unwrap();

        let ids: Vec<String> = store
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.session_id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_rows_tagged_with_their_table() {
        let store = MemoryStore::new();
        let mut forged = SessionRecord::new("s", t0());
        forged.source = RecordSource::Behavior;
        store.append_activity(forged).unwrap();
        store.upsert(SessionRecord::new("s", t0())).unwrap();

        let mut sources: Vec<RecordSource> =
            store.records().unwrap().into_iter().map(|r| r.source).collect();
        sources.sort_by_key(|s| *s == RecordSource::Activity);
        assert_eq!(sources, vec![RecordSource::Behavior, RecordSource::Activity]);
    }

    #[test]
    fn test_delete_covers_both_tables() {
        let store = MemoryStore::new();
        store.upsert(SessionRecord::new("s", t0())).unwrap();
        store.append_activity(SessionRecord::new("s", t0())).unwrap();
        store.upsert(SessionRecord::new("other", t0())).unwrap();

        assert!(store.delete("s").unwrap());
        assert!(!store.delete("s").unwrap());
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_session_id_rejected() {
        let store = MemoryStore::new();
        let result = store.upsert(SessionRecord::default());
        assert!(matches!(result, Err(StoreError::MissingSessionId)));
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("sessions.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            let mut row = SessionRecord::new("s", t0());
            row.product_views = vec![4, 8];
            store.upsert(row).unwrap();
            let mut activity = SessionRecord::new("s", t0());
            activity.cart_actions = 2;
            store.append_activity(activity).unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("s").unwrap().unwrap().product_views, vec![4, 8]);
        assert_eq!(reopened.records().unwrap().len(), 2);

        reopened.delete("s").unwrap();
        let again = JsonFileStore::open(&path).unwrap();
        assert!(again.records().unwrap().is_empty());
    }

    #[test]
    fn test_json_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "[[[").unwrap();

        assert!(matches!(JsonFileStore::open(&path), Err(StoreError::Corrupt(_))));
    }
}
