//! Linear GraphQL adapter

use super::{SourceAdapter, SourceError};
use crate::circuit::CircuitBreaker;
use crate::config::LinearConfig;
use crate::types::{Issue, IssueBoard, SourceData, SourceName};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const ASSIGNED_ISSUES_QUERY: &str = r#"
query {
    viewer {
        assignedIssues(first: 50, orderBy: updatedAt) {
            nodes {
                id
                identifier
                title
                priority
                state { name type }
                project { name }
                dueDate
                updatedAt
            }
        }
    }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<ViewerData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ViewerData {
    viewer: Viewer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Viewer {
    assigned_issues: Connection,
}

#[derive(Debug, Deserialize)]
struct Connection {
    nodes: Vec<ApiIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiIssue {
    id: String,
    identifier: String,
    title: String,
    #[serde(default)]
    priority: Option<f64>,
    #[serde(default)]
    state: Option<ApiState>,
    #[serde(default)]
    project: Option<ApiProject>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiState {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ApiProject {
    name: String,
}

pub struct LinearAdapter {
    config: LinearConfig,
    client: reqwest::Client,
    circuit: Option<Arc<CircuitBreaker>>,
}

impl LinearAdapter {
    pub fn new(
        config: LinearConfig,
        client: reqwest::Client,
        circuit: Option<Arc<CircuitBreaker>>,
    ) -> Self {
        Self {
            config,
            client,
            circuit,
        }
    }
}

#[async_trait]
impl SourceAdapter for LinearAdapter {
    fn source(&self) -> SourceName {
        SourceName::Linear
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
        // Personal API keys go in the header as-is, without a scheme.
        let response = self
            .client
            .post(&self.config.endpoint)
            .header(AUTHORIZATION, self.config.api_key.as_deref().unwrap_or_default())
            .json(&serde_json::json!({ "query": ASSIGNED_ISSUES_QUERY }))
            .timeout(self.timeout())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::from_response(response).await);
        }

        let body: GraphQlResponse = response.json().await?;
        Ok(SourceData::Linear(into_board(body)?))
    }
}

fn into_board(body: GraphQlResponse) -> Result<IssueBoard, SourceError> {
    if let Some(error) = body.errors.into_iter().next() {
        return Err(SourceError::Upstream {
            status: 200,
            message: error.message,
        });
    }

    let nodes = body
        .data
        .ok_or_else(|| SourceError::Decode("response has no data".to_string()))?
        .viewer
        .assigned_issues
        .nodes;

    let mut issues: Vec<Issue> = nodes
        .into_iter()
        .map(|node| {
            let (state, state_type) = node
                .state
                .map(|s| (s.name, s.kind))
                .unwrap_or_else(|| ("Unknown".to_string(), "unknown".to_string()));
            Issue {
                id: node.id,
                identifier: node.identifier,
                title: node.title,
                priority: node.priority.unwrap_or(0.0).clamp(0.0, 4.0) as u8,
                state,
                state_type,
                project: node.project.map(|p| p.name),
                due_date: node.due_date,
                updated_at: node.updated_at,
            }
        })
        .collect();

    // 1 is urgent, 4 is low, 0 means no priority and sorts last.
    issues.sort_by_key(|i| if i.priority == 0 { 5 } else { i.priority });

    let mut by_status: BTreeMap<String, Vec<Issue>> = BTreeMap::new();
    for issue in &issues {
        by_status
            .entry(issue.state.clone())
            .or_default()
            .push(issue.clone());
    }

    Ok(IssueBoard { issues, by_status })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Result<IssueBoard, SourceError> {
        into_board(serde_json::from_value(json).unwrap())
    }

    #[test]
    fn test_sorts_and_groups() {
        let board = parse(serde_json::json!({
            "data": {"viewer": {"assignedIssues": {"nodes": [
                {"id": "1", "identifier": "ENG-1", "title": "No priority", "priority": 0,
                 "state": {"name": "Todo", "type": "unstarted"}, "project": null},
                {"id": "2", "identifier": "ENG-2", "title": "Urgent", "priority": 1,
                 "state": {"name": "In Progress", "type": "started"},
                 "project": {"name": "Platform"}, "dueDate": "2024-05-01"},
                {"id": "3", "identifier": "ENG-3", "title": "Low", "priority": 4,
                 "state": {"name": "Todo", "type": "unstarted"}}
            ]}}}
        }))
        .unwrap();

        let ids: Vec<&str> = board.issues.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(ids, vec!["ENG-2", "ENG-3", "ENG-1"]);
        assert_eq!(board.by_status["Todo"].len(), 2);
        assert_eq!(board.issues[0].project.as_deref(), Some("Platform"));
    }

    #[test]
    fn test_graphql_errors_are_upstream_errors() {
        let result = parse(serde_json::json!({
            "errors": [{"message": "Authentication required"}]
        }));
        match result {
            Err(SourceError::Upstream { message, .. }) => {
                assert_eq!(message, "Authentication required")
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }
}
