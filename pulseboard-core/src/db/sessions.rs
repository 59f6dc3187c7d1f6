//! Planning session log
//!
//! A session moves `NotStarted -> Active -> Ended`. Ending is idempotent: a
//! second `end` returns the end time recorded by the first. Messages and
//! actions that arrive after the end are kept and flagged `post_session`.

use super::{parse_json, parse_timestamp, timestamp, Store};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

/// A planning session with child counts computed at read time
#[derive(Debug, Clone, Serialize)]
pub struct PlanningSession {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub initial_context: Option<serde_json::Value>,
    pub final_state: Option<serde_json::Value>,
    pub messages_count: i64,
    pub actions_count: i64,
    pub post_session_messages: i64,
}

impl PlanningSession {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Result of ending a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionEnd {
    pub id: i64,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub messages_count: i64,
    pub actions_count: i64,
    /// True when the session had already been ended by an earlier call
    pub already_ended: bool,
}

/// A task change made during a planning session
#[derive(Debug, Clone, Default)]
pub struct NewAction {
    pub action_type: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub target_title: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionCount {
    pub action_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanningTotals {
    pub total_sessions: i64,
    pub total_duration: i64,
    pub total_messages: i64,
    pub total_actions: i64,
    pub avg_duration: f64,
    pub post_session_messages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanningAnalytics {
    pub days: u32,
    pub sessions: Vec<PlanningSession>,
    pub action_breakdown: Vec<ActionCount>,
    pub totals: PlanningTotals,
}

/// Recent sessions returned by analytics
const RECENT_SESSIONS: i64 = 20;

const SESSION_COLUMNS: &str = r#"
    s.id, s.started_at, s.ended_at, s.duration_seconds, s.initial_context, s.final_state,
    (SELECT COUNT(*) FROM planning_messages m WHERE m.session_id = s.id) AS messages_count,
    (SELECT COUNT(*) FROM planning_actions a WHERE a.session_id = s.id) AS actions_count,
    (SELECT COUNT(*) FROM planning_messages m WHERE m.session_id = s.id AND m.post_session = 1)
        AS post_session_messages
"#;

/// Planning session operations
#[derive(Debug, Clone)]
pub struct SessionLog {
    store: Store,
}

impl SessionLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Open a new session
    pub fn start(&self, initial_context: &serde_json::Value) -> Result<PlanningSession> {
        let conn = self.store.connect()?;
        let started_at = Utc::now();
        conn.execute(
            "INSERT INTO planning_sessions (started_at, initial_context) VALUES (?1, ?2)",
            params![timestamp(started_at), serde_json::to_string(initial_context)?],
        )?;
        let id = conn.last_insert_rowid();

        tracing::info!(session_id = id, "Planning session started");

        Ok(PlanningSession {
            id,
            started_at,
            ended_at: None,
            duration_seconds: None,
            initial_context: Some(initial_context.clone()),
            final_state: None,
            messages_count: 0,
            actions_count: 0,
            post_session_messages: 0,
        })
    }

    /// Close a session.
    ///
    /// Only the first call records an end time; later calls return it unchanged.
    pub fn end(&self, id: i64, final_state: Option<&serde_json::Value>) -> Result<SessionEnd> {
        let conn = self.store.connect()?;

        let started_at: Option<String> = conn
            .query_row(
                "SELECT started_at FROM planning_sessions WHERE id = ?1",
                [id],
                |r| r.get(0),
            )
            .optional()?;
        let started_at = parse_timestamp(&started_at.ok_or(Error::SessionNotFound(id))?);

        let ended_at = Utc::now().max(started_at);
        let duration = (ended_at - started_at).num_seconds();
        let final_state = final_state.map(serde_json::to_string).transpose()?;

        let updated = conn.execute(
            r#"
            UPDATE planning_sessions
            SET ended_at = ?2, duration_seconds = ?3, final_state = ?4
            WHERE id = ?1 AND ended_at IS NULL
            "#,
            params![id, timestamp(ended_at), duration, final_state],
        )?;

        let session = self.get(id)?.ok_or(Error::SessionNotFound(id))?;
        let already_ended = updated == 0;

        if already_ended {
            tracing::debug!(session_id = id, "Planning session already ended");
        } else {
            tracing::info!(
                session_id = id,
                duration_seconds = duration,
                messages = session.messages_count,
                actions = session.actions_count,
                "Planning session ended"
            );
        }

        Ok(SessionEnd {
            id,
            ended_at: session.ended_at.unwrap_or(ended_at),
            duration_seconds: session.duration_seconds.unwrap_or(duration),
            messages_count: session.messages_count,
            actions_count: session.actions_count,
            already_ended,
        })
    }

    /// Append a chat message; returns its id.
    pub fn log_message(
        &self,
        session_id: i64,
        role: &str,
        content: &str,
        tokens_used: Option<i64>,
    ) -> Result<i64> {
        let conn = self.store.connect()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO planning_messages (session_id, role, content, tokens_used, created_at, post_session)
            SELECT id, ?2, ?3, ?4, ?5, ended_at IS NOT NULL
            FROM planning_sessions WHERE id = ?1
            "#,
            params![session_id, role, content, tokens_used, timestamp(Utc::now())],
        )?;
        if inserted == 0 {
            return Err(Error::SessionNotFound(session_id));
        }
        Ok(conn.last_insert_rowid())
    }

    /// Append a planning action; returns its id.
    pub fn log_action(&self, session_id: i64, action: &NewAction) -> Result<i64> {
        let conn = self.store.connect()?;
        let details = action
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO planning_actions
                (session_id, action_type, target_type, target_id, target_title, details, created_at, post_session)
            SELECT id, ?2, ?3, ?4, ?5, ?6, ?7, ended_at IS NOT NULL
            FROM planning_sessions WHERE id = ?1
            "#,
            params![
                session_id,
                action.action_type,
                action.target_type,
                action.target_id,
                action.target_title,
                details,
                timestamp(Utc::now()),
            ],
        )?;
        if inserted == 0 {
            return Err(Error::SessionNotFound(session_id));
        }
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<Option<PlanningSession>> {
        let conn = self.store.connect()?;
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM planning_sessions s WHERE s.id = ?1"),
            [id],
            row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Sessions, action breakdown and totals over the last `days` days
    pub fn analytics(&self, days: u32) -> Result<PlanningAnalytics> {
        let conn = self.store.connect()?;
        let since = timestamp(Utc::now() - Duration::days(i64::from(days)));

        let sessions = conn
            .prepare(&format!(
                r#"
                SELECT {SESSION_COLUMNS} FROM planning_sessions s
                WHERE s.started_at > ?1
                ORDER BY s.started_at DESC
                LIMIT ?2
                "#
            ))?
            .query_map(params![since, RECENT_SESSIONS], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let action_breakdown = conn
            .prepare(
                r#"
                SELECT action_type, COUNT(*) AS count
                FROM planning_actions
                WHERE created_at > ?1
                GROUP BY action_type
                ORDER BY count DESC, action_type
                "#,
            )?
            .query_map([&since], |row| {
                Ok(ActionCount {
                    action_type: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let totals = conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(s.duration_seconds), 0),
                COALESCE(SUM((SELECT COUNT(*) FROM planning_messages m WHERE m.session_id = s.id)), 0),
                COALESCE(SUM((SELECT COUNT(*) FROM planning_actions a WHERE a.session_id = s.id)), 0),
                COALESCE(AVG(s.duration_seconds), 0.0),
                COALESCE(SUM((SELECT COUNT(*) FROM planning_messages m
                              WHERE m.session_id = s.id AND m.post_session = 1)), 0)
            FROM planning_sessions s
            WHERE s.started_at > ?1 AND s.ended_at IS NOT NULL
            "#,
            [&since],
            |row| {
                Ok(PlanningTotals {
                    total_sessions: row.get(0)?,
                    total_duration: row.get(1)?,
                    total_messages: row.get(2)?,
                    total_actions: row.get(3)?,
                    avg_duration: row.get(4)?,
                    post_session_messages: row.get(5)?,
                })
            },
        )?;

        Ok(PlanningAnalytics {
            days,
            sessions,
            action_breakdown,
            totals,
        })
    }
}

fn row_to_session(row: &Row) -> rusqlite::Result<PlanningSession> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;

    Ok(PlanningSession {
        id: row.get("id")?,
        started_at: parse_timestamp(&started_at),
        ended_at: ended_at.as_deref().map(parse_timestamp),
        duration_seconds: row.get("duration_seconds")?,
        initial_context: parse_json(row.get("initial_context")?),
        final_state: parse_json(row.get("final_state")?),
        messages_count: row.get("messages_count")?,
        actions_count: row.get("actions_count")?,
        post_session_messages: row.get("post_session_messages")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log() -> (tempfile::TempDir, SessionLog) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("test.db"));
        (dir, store.sessions())
    }

    #[test]
    fn test_session_lifecycle() {
        let (_dir, log) = log();
        let session = log.start(&json!({"tasks": []})).unwrap();
        assert!(session.is_active());

        log.log_message(session.id, "user", "plan my day", None).unwrap();
        log.log_message(session.id, "assistant", "start with the overdue task", Some(42))
            .unwrap();

        let ended = log.end(session.id, Some(&json!({"done": true}))).unwrap();
        assert_eq!(ended.messages_count, 2);
        assert!(!ended.already_ended);

        let stored = log.get(session.id).unwrap().unwrap();
        assert_eq!(stored.messages_count, 2);
        assert_eq!(stored.actions_count, 0);
        assert!(stored.ended_at.unwrap() >= stored.started_at);
        assert_eq!(stored.final_state, Some(json!({"done": true})));
    }

    #[test]
    fn test_end_twice_returns_original_end() {
        let (_dir, log) = log();
        let session = log.start(&json!({})).unwrap();

        let first = log.end(session.id, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = log.end(session.id, Some(&json!({"late": true}))).unwrap();

        assert_eq!(first.ended_at, second.ended_at);
        assert_eq!(first.duration_seconds, second.duration_seconds);
        assert!(second.already_ended);
        assert_eq!(log.get(session.id).unwrap().unwrap().final_state, None);
    }

    #[test]
    fn test_appends_after_end_are_flagged() {
        let (_dir, log) = log();
        let session = log.start(&json!({})).unwrap();
        log.log_message(session.id, "user", "before", None).unwrap();
        log.end(session.id, None).unwrap();
        log.log_message(session.id, "assistant", "after", None).unwrap();
        log.log_action(
            session.id,
            &NewAction {
                action_type: "move_task".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let stored = log.get(session.id).unwrap().unwrap();
        assert_eq!(stored.messages_count, 2);
        assert_eq!(stored.actions_count, 1);
        assert_eq!(stored.post_session_messages, 1);
    }

    #[test]
    fn test_unknown_session() {
        let (_dir, log) = log();
        assert!(matches!(
            log.log_message(99, "user", "hi", None),
            Err(Error::SessionNotFound(99))
        ));
        assert!(matches!(log.end(99, None), Err(Error::SessionNotFound(99))));
        assert!(log.get(99).unwrap().is_none());
    }

    #[test]
    fn test_analytics() {
        let (_dir, log) = log();
        let first = log.start(&json!({})).unwrap();
        log.log_action(
            first.id,
            &NewAction {
                action_type: "create_task".to_string(),
                target_title: Some("Write report".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        log.log_action(
            first.id,
            &NewAction {
                action_type: "create_task".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        log.log_action(
            first.id,
            &NewAction {
                action_type: "complete_task".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        log.end(first.id, None).unwrap();

        // Still active; excluded from totals but listed.
        log.start(&json!({})).unwrap();

        let analytics = log.analytics(30).unwrap();
        assert_eq!(analytics.sessions.len(), 2);
        assert_eq!(analytics.action_breakdown[0].action_type, "create_task");
        assert_eq!(analytics.action_breakdown[0].count, 2);
        assert_eq!(analytics.totals.total_sessions, 1);
        assert_eq!(analytics.totals.total_actions, 3);
    }
}
