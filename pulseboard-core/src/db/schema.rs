//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! Timestamps are stored as RFC 3339 text, calendar dates as `YYYY-MM-DD` (UTC).

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: snapshots and daily rollups
    r#"
    -- ============================================
    -- Raw snapshots (append-only)
    -- ============================================

    CREATE TABLE IF NOT EXISTS snapshots (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        source           TEXT NOT NULL,
        taken_at         DATETIME NOT NULL,
        snapshot_date    TEXT NOT NULL,
        summary          JSON NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_snapshots_source_time
        ON snapshots(source, taken_at);
    CREATE INDEX IF NOT EXISTS idx_snapshots_source_date
        ON snapshots(source, snapshot_date);

    CREATE TABLE IF NOT EXISTS repo_snapshots (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id      INTEGER NOT NULL REFERENCES snapshots(id),
        repo_name        TEXT NOT NULL,
        branch           TEXT NOT NULL,
        commit_count     INTEGER NOT NULL,
        is_dirty         INTEGER NOT NULL,
        ahead            INTEGER NOT NULL,
        behind           INTEGER NOT NULL,
        taken_at         DATETIME NOT NULL,
        snapshot_date    TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_repo_snapshots_name_date
        ON repo_snapshots(repo_name, snapshot_date);

    -- ============================================
    -- Derived (regenerable from snapshots)
    -- ============================================

    CREATE TABLE IF NOT EXISTS daily_rollups (
        stat_date        TEXT NOT NULL,
        source           TEXT NOT NULL,
        samples          INTEGER NOT NULL,
        metrics          JSON NOT NULL,
        updated_at       DATETIME NOT NULL,
        PRIMARY KEY (stat_date, source)
    );
    "#,
    // Version 2: planning session log
    r#"
    CREATE TABLE IF NOT EXISTS planning_sessions (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at       DATETIME NOT NULL,
        ended_at         DATETIME,
        duration_seconds INTEGER,
        initial_context  JSON,
        final_state      JSON
    );

    CREATE INDEX IF NOT EXISTS idx_planning_sessions_started
        ON planning_sessions(started_at);

    -- Children are never cascade-deleted; they remain for analytics.
    CREATE TABLE IF NOT EXISTS planning_messages (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id       INTEGER NOT NULL REFERENCES planning_sessions(id),
        role             TEXT NOT NULL,
        content          TEXT NOT NULL,
        tokens_used      INTEGER,
        created_at       DATETIME NOT NULL,
        post_session     INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_planning_messages_session
        ON planning_messages(session_id);

    CREATE TABLE IF NOT EXISTS planning_actions (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id       INTEGER NOT NULL REFERENCES planning_sessions(id),
        action_type      TEXT NOT NULL,
        target_type      TEXT,
        target_id        TEXT,
        target_title     TEXT,
        details          JSON,
        created_at       DATETIME NOT NULL,
        post_session     INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_planning_actions_session
        ON planning_actions(session_id);
    CREATE INDEX IF NOT EXISTS idx_planning_actions_created
        ON planning_actions(created_at);
    "#,
    // Version 3: local kanban board
    r#"
    CREATE TABLE IF NOT EXISTS kanban_tasks (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        title            TEXT NOT NULL,
        description      TEXT NOT NULL DEFAULT '',
        column_name      TEXT NOT NULL DEFAULT 'backlog',
        priority         INTEGER NOT NULL DEFAULT 2,
        position         INTEGER NOT NULL DEFAULT 0,
        tags             JSON NOT NULL DEFAULT '[]',
        links            JSON NOT NULL DEFAULT '[]',
        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_kanban_tasks_column
        ON kanban_tasks(column_name, position);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Running database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    tracing::info!(
        from = current_version,
        to = SCHEMA_VERSION,
        "Migrations complete"
    );

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "snapshots",
            "repo_snapshots",
            "daily_rollups",
            "planning_sessions",
            "planning_messages",
            "planning_actions",
            "kanban_tasks",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "table {} should exist", table);
        }
    }
}
