//! Optional SQLite attendance log.
//!
//! One `sessions` row per ledger session and one `attendance` row per
//! check-in. Only written to, never read back into the ledger: the live
//! session always starts empty.

use rollcall_core::AttendanceRecord;
use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// A persisted check-in, as read back for reporting.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub attendee: String,
    pub display_name: String,
    pub source: String,
    pub seq: u64,
    pub recorded_at: String,
}

pub struct AttendanceStore {
    conn: Connection,
}

impl AttendanceStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        tracing::info!(path = %path.display(), "attendance store opened");
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id         TEXT PRIMARY KEY,
                started_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS attendance (
                session_id   TEXT NOT NULL REFERENCES sessions(id),
                attendee     TEXT NOT NULL,
                display_name TEXT NOT NULL,
                source       TEXT NOT NULL,
                seq          INTEGER NOT NULL,
                recorded_at  TEXT NOT NULL,
                PRIMARY KEY (session_id, attendee)
            );",
        )?;
        Ok(())
    }

    /// Open a new session row and return its id.
    pub fn begin_session(&self) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO sessions (id, started_at) VALUES (?1, ?2)",
            params![id, started_at],
        )?;
        tracing::debug!(session = %id, "store session started");
        Ok(id)
    }

    pub fn record(&self, session_id: &str, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO attendance
                (session_id, attendee, display_name, source, seq, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                record.attendee.to_string(),
                record.display_name,
                record.source.as_str(),
                record.checked_in_at as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn records_for(&self, session_id: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT attendee, display_name, source, seq, recorded_at
             FROM attendance WHERE session_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(StoredRecord {
                attendee: row.get(0)?,
                display_name: row.get(1)?,
                source: row.get(2)?,
                seq: row.get::<_, i64>(3)? as u64,
                recorded_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    #[cfg(test)]
    pub fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM sessions ORDER BY started_at, rowid")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{AttendeeId, CheckInSource, PersonId, SightingId};

    fn record(attendee: AttendeeId, name: &str, seq: u64, source: CheckInSource) -> AttendanceRecord {
        AttendanceRecord {
            attendee,
            display_name: name.into(),
            checked_in_at: seq,
            source,
        }
    }

    #[test]
    fn test_records_are_scoped_to_session() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let first = store.begin_session().unwrap();
        let second = store.begin_session().unwrap();
        assert_ne!(first, second);

        store
            .record(&first, &record(AttendeeId::Roster(PersonId(7)), "Alice", 1, CheckInSource::Recognized))
            .unwrap();
        store
            .record(&first, &record(AttendeeId::Sighting(SightingId(1)), "Stranger 1", 3, CheckInSource::Manual))
            .unwrap();
        store
            .record(&second, &record(AttendeeId::Roster(PersonId(7)), "Alice", 1, CheckInSource::Manual))
            .unwrap();

        let rows = store.records_for(&first).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].attendee, "roster:7");
        assert_eq!(rows[0].source, "recognized");
        assert_eq!(rows[1].attendee, "sighting:1");
        assert_eq!(rows[1].seq, 3);

        assert_eq!(store.records_for(&second).unwrap().len(), 1);
        assert_eq!(store.session_ids().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_duplicate_record_ignored() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let session = store.begin_session().unwrap();
        let alice = record(AttendeeId::Roster(PersonId(7)), "Alice", 1, CheckInSource::Recognized);
        store.record(&session, &alice).unwrap();
        store.record(&session, &alice).unwrap();
        assert_eq!(store.records_for(&session).unwrap().len(), 1);
    }
}
