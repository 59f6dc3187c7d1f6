//! Todoist REST adapter

use super::{SourceAdapter, SourceError};
use crate::circuit::CircuitBreaker;
use crate::config::TodoistConfig;
use crate::types::{SourceData, SourceName, TodoList, TodoTask};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub(crate) struct ApiTask {
    id: String,
    content: String,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default)]
    due: Option<ApiDue>,
    #[serde(default)]
    url: String,
}

fn default_priority() -> u8 {
    1
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiDue {
    date: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiProject {
    id: String,
    name: String,
}

pub struct TodoistAdapter {
    config: TodoistConfig,
    client: reqwest::Client,
    circuit: Option<Arc<CircuitBreaker>>,
}

impl TodoistAdapter {
    pub fn new(
        config: TodoistConfig,
        client: reqwest::Client,
        circuit: Option<Arc<CircuitBreaker>>,
    ) -> Self {
        Self {
            config,
            client,
            circuit,
        }
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, SourceError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.token.as_deref().unwrap_or_default())
            .timeout(self.timeout())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::from_response(response).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SourceAdapter for TodoistAdapter {
    fn source(&self) -> SourceName {
        SourceName::Todoist
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn circuit(&self) -> Option<&CircuitBreaker> {
        self.circuit.as_deref()
    }

    async fn fetch(&self) -> Result<SourceData, SourceError> {
        let (tasks, projects) = tokio::try_join!(
            self.get::<Vec<ApiTask>>("tasks"),
            self.get::<Vec<ApiProject>>("projects"),
        )?;

        let tasks = normalize_tasks(
            tasks,
            &projects,
            &self.config.projects,
            Local::now().date_naive(),
        );
        Ok(SourceData::Todoist(TodoList { tasks }))
    }
}

/// Map API tasks to dashboard tasks, filter by project and sort.
///
/// Order: overdue, due today, higher priority, earlier due date (undated last).
pub(crate) fn normalize_tasks(
    tasks: Vec<ApiTask>,
    projects: &[ApiProject],
    allowed_projects: &[String],
    today: NaiveDate,
) -> Vec<TodoTask> {
    let names: HashMap<&str, &str> = projects
        .iter()
        .map(|p| (p.id.as_str(), p.name.as_str()))
        .collect();

    let mut out: Vec<TodoTask> = tasks
        .into_iter()
        .filter_map(|task| {
            let project = task
                .project_id
                .as_deref()
                .and_then(|id| names.get(id).copied())
                .unwrap_or("Unknown")
                .to_string();

            if !allowed_projects.is_empty() && !allowed_projects.contains(&project) {
                return None;
            }

            // Timed tasks carry a full datetime; the date prefix is enough.
            let due_date = task
                .due
                .as_ref()
                .and_then(|d| d.date.get(..10))
                .and_then(|d| d.parse::<NaiveDate>().ok());

            Some(TodoTask {
                id: task.id,
                content: task.content,
                project,
                priority: task.priority.clamp(1, 4),
                due_date,
                is_overdue: due_date.is_some_and(|d| d < today),
                is_today: due_date == Some(today),
                url: task.url,
            })
        })
        .collect();

    out.sort_by(|a, b| {
        b.is_overdue
            .cmp(&a.is_overdue)
            .then(b.is_today.cmp(&a.is_today))
            .then(b.priority.cmp(&a.priority))
            .then_with(|| match (a.due_date, b.due_date) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, project: &str, priority: u8, due: Option<&str>) -> ApiTask {
        ApiTask {
            id: id.to_string(),
            content: format!("task {id}"),
            project_id: Some(project.to_string()),
            priority,
            due: due.map(|d| ApiDue {
                date: d.to_string(),
            }),
            url: String::new(),
        }
    }

    fn projects() -> Vec<ApiProject> {
        vec![
            ApiProject {
                id: "p1".to_string(),
                name: "Work".to_string(),
            },
            ApiProject {
                id: "p2".to_string(),
                name: "Home".to_string(),
            },
        ]
    }

    #[test]
    fn test_flags_and_order() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let tasks = vec![
            task("undated", "p1", 4, None),
            task("later", "p1", 1, Some("2024-03-12")),
            task("today", "p2", 1, Some("2024-03-10T09:00:00")),
            task("overdue", "p1", 2, Some("2024-03-01")),
            task("urgent-later", "p1", 4, Some("2024-03-20")),
        ];

        let out = normalize_tasks(tasks, &projects(), &[], today);
        let ids: Vec<&str> = out.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["overdue", "today", "urgent-later", "undated", "later"]);

        assert!(out[0].is_overdue);
        assert!(out[1].is_today);
        assert_eq!(out[1].project, "Home");
        assert_eq!(out[3].due_date, None);
    }

    #[test]
    fn test_project_filter() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let tasks = vec![
            task("a", "p1", 1, None),
            task("b", "p2", 1, None),
            task("c", "unknown", 1, None),
        ];
        let out = normalize_tasks(tasks, &projects(), &["Home".to_string()], today);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "b");
    }

    #[test]
    fn test_unknown_project_name() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let out = normalize_tasks(vec![task("a", "p9", 1, None)], &projects(), &[], today);
        assert_eq!(out[0].project, "Unknown");
    }
}
