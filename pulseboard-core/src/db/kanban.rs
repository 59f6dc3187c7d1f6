//! Local kanban board
//!
//! Backs the `/api/kanban/tasks` endpoints and serves as the kanban source's
//! fallback when the board API cannot be reached.

use super::{parse_timestamp, timestamp, Store};
use crate::error::{Error, Result};
use crate::types::{BoardTask, TaskLink};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;

/// Workflow columns, in board order
pub const KANBAN_COLUMNS: [&str; 5] = ["backlog", "ready", "in-progress", "review", "done"];

const MAX_TITLE_LENGTH: usize = 255;
const MAX_DESCRIPTION_LENGTH: usize = 10_000;
const MAX_TAGS: usize = 20;
const MAX_TAG_LENGTH: usize = 50;
const MAX_LINKS: usize = 50;
const MAX_LINK_URL_LENGTH: usize = 2000;
const MAX_LINK_TITLE_LENGTH: usize = 200;
const PRIORITY_RANGE: std::ops::RangeInclusive<i64> = 1..=4;

/// Body of a task creation request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub links: Option<Vec<TaskLink>>,
}

/// Body of a task update request; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub links: Option<Vec<TaskLink>>,
}

impl NewTask {
    pub fn validate(&self) -> Result<()> {
        match self.title.as_deref() {
            None | Some("") => return Err(Error::validation("title is required")),
            Some(title) => validate_title(title)?,
        }
        validate_common(
            self.description.as_deref(),
            self.column.as_deref(),
            self.priority,
            None,
            self.tags.as_deref(),
            self.links.as_deref(),
        )
    }
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.column.is_none()
            && self.priority.is_none()
            && self.position.is_none()
            && self.tags.is_none()
            && self.links.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::validation("no valid fields to update"));
        }
        if let Some(title) = self.title.as_deref() {
            if title.is_empty() {
                return Err(Error::validation("title must not be empty"));
            }
            validate_title(title)?;
        }
        validate_common(
            self.description.as_deref(),
            self.column.as_deref(),
            self.priority,
            self.position,
            self.tags.as_deref(),
            self.links.as_deref(),
        )
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(Error::validation(format!(
            "title must be {MAX_TITLE_LENGTH} characters or less"
        )));
    }
    Ok(())
}

fn validate_common(
    description: Option<&str>,
    column: Option<&str>,
    priority: Option<i64>,
    position: Option<i64>,
    tags: Option<&[String]>,
    links: Option<&[TaskLink]>,
) -> Result<()> {
    if let Some(description) = description {
        if description.chars().count() > MAX_DESCRIPTION_LENGTH {
            return Err(Error::validation(format!(
                "description must be {MAX_DESCRIPTION_LENGTH} characters or less"
            )));
        }
    }

    if let Some(column) = column {
        if !KANBAN_COLUMNS.contains(&column) {
            return Err(Error::validation(format!(
                "column must be one of: {}",
                KANBAN_COLUMNS.join(", ")
            )));
        }
    }

    if let Some(priority) = priority {
        if !PRIORITY_RANGE.contains(&priority) {
            return Err(Error::validation(format!(
                "priority must be between {} and {}",
                PRIORITY_RANGE.start(),
                PRIORITY_RANGE.end()
            )));
        }
    }

    if position.is_some_and(|p| p < 0) {
        return Err(Error::validation("position must be non-negative"));
    }

    if let Some(tags) = tags {
        if tags.len() > MAX_TAGS {
            return Err(Error::validation(format!("maximum {MAX_TAGS} tags allowed")));
        }
        if tags.iter().any(|t| t.chars().count() > MAX_TAG_LENGTH) {
            return Err(Error::validation(format!(
                "each tag must be {MAX_TAG_LENGTH} characters or less"
            )));
        }
    }

    if let Some(links) = links {
        if links.len() > MAX_LINKS {
            return Err(Error::validation(format!("maximum {MAX_LINKS} links allowed")));
        }
        for link in links {
            if link.url.is_empty() {
                return Err(Error::validation("each link must have a url"));
            }
            if link.url.len() > MAX_LINK_URL_LENGTH {
                return Err(Error::validation(format!(
                    "link url must be {MAX_LINK_URL_LENGTH} characters or less"
                )));
            }
            if link
                .title
                .as_deref()
                .is_some_and(|t| t.chars().count() > MAX_LINK_TITLE_LENGTH)
            {
                return Err(Error::validation(format!(
                    "link title must be {MAX_LINK_TITLE_LENGTH} characters or less"
                )));
            }
        }
    }

    Ok(())
}

/// Kanban task operations
#[derive(Debug, Clone)]
pub struct KanbanStore {
    store: Store,
}

impl KanbanStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// All tasks ordered by column and position
    pub fn list(&self) -> Result<Vec<BoardTask>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, title, description, column_name, priority, position, tags, links,
                   created_at, updated_at
            FROM kanban_tasks
            ORDER BY column_name, position, id
            "#,
        )?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn get(&self, id: i64) -> Result<Option<BoardTask>> {
        let conn = self.store.connect()?;
        get_task(&conn, id)
    }

    /// Validate and insert a task at the end of its column.
    pub fn create(&self, task: &NewTask) -> Result<BoardTask> {
        task.validate()?;

        let mut conn = self.store.connect()?;
        let tx = conn.transaction()?;

        let column = task.column.as_deref().unwrap_or("backlog");
        let position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM kanban_tasks WHERE column_name = ?1",
            [column],
            |r| r.get(0),
        )?;
        let now = timestamp(Utc::now());

        tx.execute(
            r#"
            INSERT INTO kanban_tasks
                (title, description, column_name, priority, position, tags, links, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
            params![
                task.title.as_deref().unwrap_or_default(),
                task.description.as_deref().unwrap_or_default(),
                column,
                task.priority.unwrap_or(2),
                position,
                serde_json::to_string(task.tags.as_deref().unwrap_or_default())?,
                serde_json::to_string(task.links.as_deref().unwrap_or_default())?,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        let created = get_task(&tx, id)?.ok_or(Error::TaskNotFound(id))?;
        tx.commit()?;

        tracing::info!(task_id = id, title = %created.title, "Created kanban task");
        Ok(created)
    }

    /// Validate and apply a partial update.
    pub fn update(&self, id: i64, changes: &TaskUpdate) -> Result<BoardTask> {
        changes.validate()?;

        let mut conn = self.store.connect()?;
        let tx = conn.transaction()?;

        let mut task = get_task(&tx, id)?.ok_or(Error::TaskNotFound(id))?;
        if let Some(title) = &changes.title {
            task.title = title.clone();
        }
        if let Some(description) = &changes.description {
            task.description = description.clone();
        }
        if let Some(column) = &changes.column {
            task.column = column.clone();
        }
        if let Some(priority) = changes.priority {
            task.priority = priority as u8;
        }
        if let Some(position) = changes.position {
            task.position = position;
        }
        if let Some(tags) = &changes.tags {
            task.tags = tags.clone();
        }
        if let Some(links) = &changes.links {
            task.links = links.clone();
        }

        tx.execute(
            r#"
            UPDATE kanban_tasks
            SET title = ?2, description = ?3, column_name = ?4, priority = ?5, position = ?6,
                tags = ?7, links = ?8, updated_at = ?9
            WHERE id = ?1
            "#,
            params![
                id,
                task.title,
                task.description,
                task.column,
                task.priority,
                task.position,
                serde_json::to_string(&task.tags)?,
                serde_json::to_string(&task.links)?,
                timestamp(Utc::now()),
            ],
        )?;
        let updated = get_task(&tx, id)?.ok_or(Error::TaskNotFound(id))?;
        tx.commit()?;

        tracing::info!(task_id = id, "Updated kanban task");
        Ok(updated)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.store.connect()?;
        let deleted = conn.execute("DELETE FROM kanban_tasks WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(Error::TaskNotFound(id));
        }
        tracing::info!(task_id = id, "Deleted kanban task");
        Ok(())
    }
}

fn get_task(conn: &Connection, id: i64) -> Result<Option<BoardTask>> {
    conn.query_row(
        r#"
        SELECT id, title, description, column_name, priority, position, tags, links,
               created_at, updated_at
        FROM kanban_tasks WHERE id = ?1
        "#,
        [id],
        row_to_task,
    )
    .optional()
    .map_err(Error::from)
}

fn row_to_task(row: &Row) -> rusqlite::Result<BoardTask> {
    let tags: String = row.get("tags")?;
    let links: String = row.get("links")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(BoardTask {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        column: row.get("column_name")?,
        priority: row.get("priority")?,
        position: row.get("position")?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        links: serde_json::from_str(&links).unwrap_or_default(),
        created_at: Some(parse_timestamp(&created_at)),
        updated_at: Some(parse_timestamp(&updated_at)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> (tempfile::TempDir, KanbanStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("test.db"));
        (dir, store.kanban())
    }

    fn new_task(title: &str, column: &str) -> NewTask {
        NewTask {
            title: Some(title.to_string()),
            column: Some(column.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_appends_to_column() {
        let (_dir, board) = board();
        let first = board.create(&new_task("Write docs", "ready")).unwrap();
        let second = board.create(&new_task("Fix bug", "ready")).unwrap();
        let other = board.create(&new_task("Ship", "done")).unwrap();

        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(other.position, 0);
        assert_eq!(first.priority, 2);
        assert_eq!(board.list().unwrap().len(), 3);
    }

    #[test]
    fn test_update_moves_task() {
        let (_dir, board) = board();
        let task = board.create(&new_task("Review PR", "ready")).unwrap();
        let updated = board
            .update(
                task.id,
                &TaskUpdate {
                    column: Some("in-progress".to_string()),
                    tags: Some(vec!["code".to_string()]),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.column, "in-progress");
        assert_eq!(updated.title, "Review PR");
        assert_eq!(updated.tags, vec!["code".to_string()]);
    }

    #[test]
    fn test_missing_task() {
        let (_dir, board) = board();
        let update = TaskUpdate {
            title: Some("x".to_string()),
            ..Default::default()
        };
        assert!(matches!(board.update(7, &update), Err(Error::TaskNotFound(7))));
        assert!(matches!(board.delete(7), Err(Error::TaskNotFound(7))));
    }

    #[test]
    fn test_delete() {
        let (_dir, board) = board();
        let task = board.create(&new_task("Temp", "backlog")).unwrap();
        board.delete(task.id).unwrap();
        assert!(board.get(task.id).unwrap().is_none());
    }

    #[test]
    fn test_validation() {
        assert!(NewTask::default().validate().is_err());
        assert!(new_task("ok", "backlog").validate().is_ok());
        assert!(new_task("ok", "someday").validate().is_err());
        assert!(new_task(&"x".repeat(256), "backlog").validate().is_err());

        let mut task = new_task("ok", "backlog");
        task.priority = Some(5);
        assert!(task.validate().is_err());

        let mut task = new_task("ok", "backlog");
        task.tags = Some((0..21).map(|i| i.to_string()).collect());
        assert!(task.validate().is_err());

        let mut task = new_task("ok", "backlog");
        task.links = Some(vec![TaskLink {
            url: "https://example.com".to_string(),
            kind: None,
            title: Some("t".repeat(201)),
        }]);
        assert!(task.validate().is_err());

        assert!(TaskUpdate::default().validate().is_err());
        let negative = TaskUpdate {
            position: Some(-1),
            ..Default::default()
        };
        assert!(negative.validate().is_err());
    }
}
