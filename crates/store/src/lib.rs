//! Single-writer SQLite persistence for the AgentsLeak monitor.
//!
//! One long-lived connection serves all requests, guarded by a mutex so
//! writes serialize; every mutating operation runs inside an explicit
//! transaction with commit-on-success, rollback-on-drop semantics. WAL mode
//! and foreign keys are enabled at open.

pub mod error;
pub mod records;
pub mod schema;

mod queries;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};

pub use error::{Error, Result};
pub use records::*;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file, enable WAL + foreign keys, and
    /// apply the schema and migrations.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::InvalidArgument(format!(
                    "cannot create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // journal_mode returns the resulting mode as a row, so go through
        // execute_batch rather than execute.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        schema::init_schema(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside a transaction. Commit on success; the transaction is
    /// rolled back when `f` errors (drop semantics).
    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` with the shared connection, without an explicit transaction.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Column helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// lexicographic comparison in SQL matches chronological order.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_ts(&s))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Lenient JSON column read: malformed or NULL content yields the default.
pub(crate) fn from_json<T: serde::de::DeserializeOwned + Default>(s: Option<String>) -> T {
    s.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub(crate) fn parse_uuid(s: &str) -> uuid::Uuid {
    uuid::Uuid::parse_str(s).unwrap_or_default()
}

pub(crate) fn parse_uuid_opt(s: Option<String>) -> Option<uuid::Uuid> {
    s.and_then(|s| uuid::Uuid::parse_str(&s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip_and_sort_lexicographically() {
        let a = Utc::now();
        let b = a + chrono::Duration::seconds(1);
        let (sa, sb) = (fmt_ts(&a), fmt_ts(&b));
        assert!(sa < sb);
        // Storage precision is microseconds.
        assert_eq!(parse_ts(&sa).timestamp_micros(), a.timestamp_micros());
    }

    #[test]
    fn reopening_database_preserves_data_and_reapplies_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        {
            let store = Store::open(&path).unwrap();
            store
                .save_session(&al_domain::Session::new("s1"))
                .unwrap();
        }
        // Second open runs the idempotent schema and migrations again.
        let store = Store::open(&path).unwrap();
        assert!(store.get_session_by_id("s1").unwrap().is_some());
    }

    #[test]
    fn open_in_memory_applies_schema() {
        let store = Store::open_in_memory().unwrap();
        // Migrated columns must exist after init.
        store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(risk_score) FROM sessions", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(Into::into)
            })
            .unwrap();
    }
}
