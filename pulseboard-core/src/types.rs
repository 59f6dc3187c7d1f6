//! Core domain types for pulseboard
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Source** | One external system queried for dashboard data (git, todoist, kanban, linear, weather) |
//! | **Adapter** | The component that queries exactly one source and normalizes its result |
//! | **Envelope** | The merged, per-request aggregation result covering all sources |
//! | **Snapshot** | A persisted, timestamped summary of one source's state |
//! | **Rollup** | A per-day aggregate derived from snapshots |
//! | **Session** | One bounded planning-chat interaction with owned messages and actions |
//!
//! Every source resolves to a [`SourceResult`]: `Ok` with data, `NotConfigured`,
//! or `Error` with a message. The failure variants never carry partial data.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ============================================
// Sources
// ============================================

/// Identifier of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceName {
    Git,
    Todoist,
    Kanban,
    Linear,
    Weather,
}

impl SourceName {
    /// Sources that make up the dashboard envelope
    pub const DASHBOARD: [SourceName; 4] = [
        SourceName::Git,
        SourceName::Todoist,
        SourceName::Kanban,
        SourceName::Linear,
    ];

    /// Sources the briefing reshapes
    pub const BRIEFING: [SourceName; 3] = [
        SourceName::Todoist,
        SourceName::Kanban,
        SourceName::Weather,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceName::Git => "git",
            SourceName::Todoist => "todoist",
            SourceName::Kanban => "kanban",
            SourceName::Linear => "linear",
            SourceName::Weather => "weather",
        }
    }

    /// Whether trend snapshots are kept for this source
    pub fn is_tracked(&self) -> bool {
        !matches!(self, SourceName::Weather)
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(SourceName::Git),
            "todoist" => Ok(SourceName::Todoist),
            "kanban" => Ok(SourceName::Kanban),
            "linear" => Ok(SourceName::Linear),
            "weather" => Ok(SourceName::Weather),
            _ => Err(format!("unknown source: {}", s)),
        }
    }
}

// ============================================
// Source payloads
// ============================================

/// State of one local git repository
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoStatus {
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    /// Most recent commit summaries (`--oneline`), newest first
    pub commits: Vec<String>,
    /// Commits within the lookback window
    pub commit_count: u32,
    pub is_dirty: bool,
    pub ahead: u32,
    pub behind: u32,
}

/// A repository the scanner could not read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRepo {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GitOverview {
    pub repos: Vec<RepoStatus>,
    pub skipped: Vec<SkippedRepo>,
}

/// One task from the task tracker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TodoTask {
    pub id: String,
    pub content: String,
    pub project: String,
    /// 1 (normal) to 4 (urgent)
    pub priority: u8,
    pub due_date: Option<NaiveDate>,
    pub is_overdue: bool,
    pub is_today: bool,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TodoList {
    pub tasks: Vec<TodoTask>,
}

/// Link attached to a board task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLink {
    pub url: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// One task on the local board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardTask {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub column: String,
    #[serde(default = "default_board_priority")]
    pub priority: u8,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<TaskLink>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_board_priority() -> u8 {
    2
}

/// Where the board data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardOrigin {
    Api,
    LocalStore,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardOverview {
    pub tasks: Vec<BoardTask>,
    pub by_column: BTreeMap<String, Vec<BoardTask>>,
    pub origin: BoardOrigin,
}

impl BoardOverview {
    /// Group tasks by column, keeping their order within each column.
    pub fn new(tasks: Vec<BoardTask>, origin: BoardOrigin) -> Self {
        let mut by_column: BTreeMap<String, Vec<BoardTask>> = BTreeMap::new();
        for task in &tasks {
            by_column
                .entry(task.column.clone())
                .or_default()
                .push(task.clone());
        }
        Self {
            tasks,
            by_column,
            origin,
        }
    }

    /// Tasks in one column (empty if the column has none)
    pub fn column(&self, name: &str) -> &[BoardTask] {
        self.by_column.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// One issue from the issue tracker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub id: String,
    pub identifier: String,
    pub title: String,
    /// 1 (urgent) to 4 (low), 0 = none
    pub priority: u8,
    pub state: String,
    pub state_type: String,
    pub project: Option<String>,
    pub due_date: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueBoard {
    pub issues: Vec<Issue>,
    pub by_status: BTreeMap<String, Vec<Issue>>,
}

/// Current conditions at the configured location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub location: String,
    pub temp_c: Option<String>,
    pub condition: Option<String>,
    pub humidity: Option<String>,
    pub wind_kph: Option<String>,
}

/// Normalized payload of a successfully resolved source
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SourceData {
    Git(GitOverview),
    Todoist(TodoList),
    Kanban(BoardOverview),
    Linear(IssueBoard),
    Weather(WeatherReport),
}

impl SourceData {
    pub fn source(&self) -> SourceName {
        match self {
            SourceData::Git(_) => SourceName::Git,
            SourceData::Todoist(_) => SourceName::Todoist,
            SourceData::Kanban(_) => SourceName::Kanban,
            SourceData::Linear(_) => SourceName::Linear,
            SourceData::Weather(_) => SourceName::Weather,
        }
    }
}

// ============================================
// Source results
// ============================================

/// Outcome of one adapter invocation
///
/// Serializes as `{"status": "ok", "data": ...}`, `{"status": "not_configured"}`
/// or `{"status": "error", "error": "..."}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceResult {
    Ok { data: SourceData },
    NotConfigured,
    Error {
        #[serde(rename = "error")]
        message: String,
    },
}

impl SourceResult {
    pub fn error(message: impl Into<String>) -> Self {
        SourceResult::Error {
            message: message.into(),
        }
    }

    pub fn status(&self) -> SourceStatus {
        match self {
            SourceResult::Ok { .. } => SourceStatus::Ok,
            SourceResult::NotConfigured => SourceStatus::NotConfigured,
            SourceResult::Error { .. } => SourceStatus::Error,
        }
    }

    pub fn data(&self) -> Option<&SourceData> {
        match self {
            SourceResult::Ok { data } => Some(data),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, SourceResult::Ok { .. })
    }
}

/// Status tag of a [`SourceResult`], ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    NotConfigured,
    Error,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Ok => "ok",
            SourceStatus::NotConfigured => "not_configured",
            SourceStatus::Error => "error",
        }
    }
}

// ============================================
// Envelope
// ============================================

/// What happened to the snapshot write that followed an aggregation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistOutcome {
    /// Persistence disabled for this request or no store configured
    Skipped,
    Ok { snapshots: usize },
    /// Some sources were written, others failed
    Partial {
        snapshots: usize,
        errors: Vec<String>,
    },
    /// Nothing could be written
    Error { error: String },
}

/// The merged result of one aggregation cycle
///
/// Built once per request and never modified afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationEnvelope {
    generated_at: DateTime<Utc>,
    fetch_duration_ms: u64,
    overall_status: SourceStatus,
    sources: BTreeMap<SourceName, SourceResult>,
    storage: PersistOutcome,
}

impl AggregationEnvelope {
    pub fn new(
        generated_at: DateTime<Utc>,
        fetch_duration: std::time::Duration,
        sources: BTreeMap<SourceName, SourceResult>,
        storage: PersistOutcome,
    ) -> Self {
        let overall_status = sources
            .values()
            .map(SourceResult::status)
            .max()
            .unwrap_or(SourceStatus::Ok);
        Self {
            generated_at,
            fetch_duration_ms: fetch_duration.as_millis() as u64,
            overall_status,
            sources,
            storage,
        }
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn fetch_duration_ms(&self) -> u64 {
        self.fetch_duration_ms
    }

    /// Worst status among all sources
    pub fn overall_status(&self) -> SourceStatus {
        self.overall_status
    }

    pub fn sources(&self) -> &BTreeMap<SourceName, SourceResult> {
        &self.sources
    }

    pub fn get(&self, source: SourceName) -> Option<&SourceResult> {
        self.sources.get(&source)
    }

    pub fn storage(&self) -> &PersistOutcome {
        &self.storage
    }
}

// ============================================
// Briefing
// ============================================

#[derive(Debug, Clone, Serialize)]
pub struct BriefingTasks {
    pub overdue: Vec<TodoTask>,
    pub today: Vec<TodoTask>,
    pub upcoming: Vec<TodoTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BriefingBoard {
    pub in_progress: Vec<BoardTask>,
    pub ready: Vec<BoardTask>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BriefingCounts {
    pub overdue_count: usize,
    pub today_count: usize,
    pub in_progress_count: usize,
}

/// Morning overview: what is overdue, due today and in flight
///
/// A section whose source did not resolve is `None`, so the client renders a
/// degraded state rather than an empty list.
#[derive(Debug, Clone, Serialize)]
pub struct Briefing {
    pub generated_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub day_name: String,
    pub fetch_duration_ms: u64,
    pub weather: SourceResult,
    pub tasks: Option<BriefingTasks>,
    pub kanban: Option<BriefingBoard>,
    pub summary: BriefingCounts,
    pub statuses: BTreeMap<SourceName, SourceStatus>,
}
