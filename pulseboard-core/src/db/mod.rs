//! Database layer for pulseboard
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Snapshots and daily rollups for trend charts
//! - The planning session log
//! - The local kanban board
//!
//! No connection is held between operations: every call opens its own
//! connection through [`Store::connect`] and drops it when done. A store that
//! cannot be opened reports [`Error::StoreUnavailable`], which callers keep
//! distinct from "no data".

pub mod kanban;
pub mod schema;
pub mod sessions;
pub mod snapshots;

pub use kanban::{KanbanStore, NewTask, TaskUpdate, KANBAN_COLUMNS};
pub use sessions::{
    ActionCount, NewAction, PlanningAnalytics, PlanningSession, PlanningTotals, SessionEnd,
    SessionLog,
};
pub use snapshots::{CycleReport, DailyRollup, RepoDay, RepoSample, SnapshotRecord, SnapshotStore, SnapshotSummary};

use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Location of the SQLite database; opens a fresh connection per operation
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection, applying pragmas and pending migrations.
    pub fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.unavailable(e))?;
        }

        let conn = Connection::open(&self.path).map_err(|e| self.unavailable(e))?;

        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| self.unavailable(e))?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )
        .map_err(|e| self.unavailable(e))?;

        schema::run_migrations(&conn).map_err(|e| self.unavailable(e))?;

        Ok(conn)
    }

    /// Check that the store can be opened
    pub fn ping(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn snapshots(&self) -> SnapshotStore {
        SnapshotStore::new(self.clone())
    }

    pub fn sessions(&self) -> SessionLog {
        SessionLog::new(self.clone())
    }

    pub fn kanban(&self) -> KanbanStore {
        KanbanStore::new(self.clone())
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> Error {
        tracing::warn!(path = %self.path.display(), error = %e, "Store unavailable");
        Error::StoreUnavailable(e.to_string())
    }
}

/// Fixed-width UTC timestamp so text comparison matches time order
pub(crate) fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_json(s: Option<String>) -> Option<serde_json::Value> {
    s.and_then(|s| serde_json::from_str(&s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("nested").join("pulseboard.db"));
        store.ping().unwrap();
        assert!(store.path().exists());

        let conn = store.connect().unwrap();
        assert_eq!(
            schema::get_schema_version(&conn).unwrap(),
            schema::SCHEMA_VERSION
        );
    }

    #[test]
    fn test_unreachable_store_is_unavailable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot be a parent directory.
        let store = Store::new(file.path().join("pulseboard.db"));
        assert!(matches!(store.ping(), Err(Error::StoreUnavailable(_))));
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let early = Utc::now();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(timestamp(early) < timestamp(late));
        assert_eq!(parse_timestamp(&timestamp(early)).timestamp_micros(), early.timestamp_micros());
    }
}
