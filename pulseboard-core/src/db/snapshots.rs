//! Snapshot persistence and daily rollups
//!
//! Snapshots are append-only. A rollup is always recomputed from the raw
//! snapshots of its day inside one write transaction, so re-running it over
//! the same snapshots produces the same row and concurrent cycles never
//! overwrite a newer rollup with an older one.

use super::{parse_timestamp, timestamp, Store};
use crate::error::{Error, Result};
use crate::types::{SourceData, SourceName};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-repository counts stored alongside a git snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSample {
    pub repo_name: String,
    pub branch: String,
    pub commit_count: u32,
    pub is_dirty: bool,
    pub ahead: u32,
    pub behind: u32,
}

/// Counts-only summary of one source at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotSummary {
    Git {
        repo_count: u32,
        total_commits: u32,
        active_repos: u32,
        dirty_repos: u32,
        repos: Vec<RepoSample>,
    },
    Todoist {
        total: u32,
        overdue: u32,
        today: u32,
        by_project: BTreeMap<String, u32>,
        by_priority: BTreeMap<String, u32>,
    },
    Kanban {
        total: u32,
        by_column: BTreeMap<String, u32>,
    },
    Linear {
        total: u32,
        by_status: BTreeMap<String, u32>,
    },
}

impl SnapshotSummary {
    /// Summarize a resolved payload; sources without trends yield `None`.
    pub fn from_data(data: &SourceData) -> Option<Self> {
        match data {
            SourceData::Git(git) => {
                let repos: Vec<RepoSample> = git
                    .repos
                    .iter()
                    .map(|r| RepoSample {
                        repo_name: r.name.clone(),
                        branch: r.branch.clone(),
                        commit_count: r.commit_count,
                        is_dirty: r.is_dirty,
                        ahead: r.ahead,
                        behind: r.behind,
                    })
                    .collect();
                Some(SnapshotSummary::Git {
                    repo_count: repos.len() as u32,
                    total_commits: repos.iter().map(|r| r.commit_count).sum(),
                    active_repos: repos.iter().filter(|r| r.commit_count > 0).count() as u32,
                    dirty_repos: repos.iter().filter(|r| r.is_dirty).count() as u32,
                    repos,
                })
            }
            SourceData::Todoist(list) => {
                let mut by_project = BTreeMap::new();
                let mut by_priority: BTreeMap<String, u32> =
                    (1..=4).map(|p| (p.to_string(), 0)).collect();
                for task in &list.tasks {
                    *by_project.entry(task.project.clone()).or_insert(0) += 1;
                    *by_priority.entry(task.priority.to_string()).or_insert(0) += 1;
                }
                Some(SnapshotSummary::Todoist {
                    total: list.tasks.len() as u32,
                    overdue: list.tasks.iter().filter(|t| t.is_overdue).count() as u32,
                    today: list.tasks.iter().filter(|t| t.is_today).count() as u32,
                    by_project,
                    by_priority,
                })
            }
            SourceData::Kanban(board) => Some(SnapshotSummary::Kanban {
                total: board.tasks.len() as u32,
                by_column: board
                    .by_column
                    .iter()
                    .map(|(column, tasks)| (column.clone(), tasks.len() as u32))
                    .collect(),
            }),
            SourceData::Linear(issues) => Some(SnapshotSummary::Linear {
                total: issues.issues.len() as u32,
                by_status: issues
                    .by_status
                    .iter()
                    .map(|(status, issues)| (status.clone(), issues.len() as u32))
                    .collect(),
            }),
            SourceData::Weather(_) => None,
        }
    }

    pub fn source(&self) -> SourceName {
        match self {
            SnapshotSummary::Git { .. } => SourceName::Git,
            SnapshotSummary::Todoist { .. } => SourceName::Todoist,
            SnapshotSummary::Kanban { .. } => SourceName::Kanban,
            SnapshotSummary::Linear { .. } => SourceName::Linear,
        }
    }

    /// Flatten into named numbers; grouped counts become `group:key`.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        fn grouped(prefix: &str, counts: &BTreeMap<String, u32>, out: &mut BTreeMap<String, f64>) {
            for (key, count) in counts {
                out.insert(format!("{prefix}:{key}"), f64::from(*count));
            }
        }

        let mut out = BTreeMap::new();
        match self {
            SnapshotSummary::Git {
                repo_count,
                total_commits,
                active_repos,
                dirty_repos,
                ..
            } => {
                out.insert("repos".to_string(), f64::from(*repo_count));
                out.insert("commits".to_string(), f64::from(*total_commits));
                out.insert("active_repos".to_string(), f64::from(*active_repos));
                out.insert("dirty_repos".to_string(), f64::from(*dirty_repos));
            }
            SnapshotSummary::Todoist {
                total,
                overdue,
                today,
                by_project,
                by_priority,
            } => {
                out.insert("total".to_string(), f64::from(*total));
                out.insert("overdue".to_string(), f64::from(*overdue));
                out.insert("today".to_string(), f64::from(*today));
                grouped("project", by_project, &mut out);
                grouped("priority", by_priority, &mut out);
            }
            SnapshotSummary::Kanban { total, by_column } => {
                out.insert("total".to_string(), f64::from(*total));
                grouped("column", by_column, &mut out);
            }
            SnapshotSummary::Linear { total, by_status } => {
                out.insert("total".to_string(), f64::from(*total));
                grouped("status", by_status, &mut out);
            }
        }
        out
    }
}

/// One stored snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    pub id: i64,
    pub source: SourceName,
    pub taken_at: DateTime<Utc>,
    pub snapshot_date: NaiveDate,
    pub summary: SnapshotSummary,
}

/// Aggregate of one source's snapshots over one UTC day
///
/// `metrics` are means, so recording the same snapshots again leaves them
/// unchanged; `samples` counts every stored snapshot and grows with each write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRollup {
    pub date: NaiveDate,
    pub source: SourceName,
    pub samples: u32,
    /// Mean of each metric over the day's snapshots
    pub metrics: BTreeMap<String, f64>,
    pub updated_at: DateTime<Utc>,
}

/// Per-day history of one repository
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoDay {
    pub date: NaiveDate,
    pub samples: u32,
    pub avg_commits: f64,
    pub was_dirty: bool,
}

/// Result of persisting one aggregation cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Snapshots recorded
    pub snapshots: usize,
    /// One `source: error` entry per source that could not be recorded or rolled up
    pub errors: Vec<String>,
}

/// Snapshot and rollup operations
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    store: Store,
}

impl SnapshotStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    // ============================================
    // Writes
    // ============================================

    /// Append one snapshot. Existing snapshots are never touched.
    pub fn record(&self, summary: &SnapshotSummary, taken_at: DateTime<Utc>) -> Result<i64> {
        let mut conn = self.store.connect()?;
        let tx = conn.transaction()?;

        let taken = timestamp(taken_at);
        let date = taken_at.date_naive().to_string();

        tx.execute(
            "INSERT INTO snapshots (source, taken_at, snapshot_date, summary) VALUES (?1, ?2, ?3, ?4)",
            params![
                summary.source().as_str(),
                taken,
                date,
                serde_json::to_string(summary)?
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        if let SnapshotSummary::Git { repos, .. } = summary {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO repo_snapshots
                    (snapshot_id, repo_name, branch, commit_count, is_dirty, ahead, behind, taken_at, snapshot_date)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for repo in repos {
                stmt.execute(params![
                    snapshot_id,
                    repo.repo_name,
                    repo.branch,
                    repo.commit_count,
                    repo.is_dirty,
                    repo.ahead,
                    repo.behind,
                    taken,
                    date,
                ])?;
            }
        }

        tx.commit()?;
        Ok(snapshot_id)
    }

    /// Recompute the rollup for one source and day from its raw snapshots.
    ///
    /// The read and the upsert share an immediate transaction. Returns `None`
    /// when the day has no snapshots.
    pub fn rollup(&self, source: SourceName, date: NaiveDate) -> Result<Option<DailyRollup>> {
        let mut conn = self.store.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let summaries = {
            let mut stmt = tx.prepare(
                "SELECT summary FROM snapshots WHERE source = ?1 AND snapshot_date = ?2 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![source.as_str(), date.to_string()], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        if summaries.is_empty() {
            return Ok(None);
        }

        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for raw in &summaries {
            let summary: SnapshotSummary = serde_json::from_str(raw)?;
            for (name, value) in summary.metrics() {
                *totals.entry(name).or_insert(0.0) += value;
            }
        }

        let samples = summaries.len() as u32;
        let metrics: BTreeMap<String, f64> = totals
            .into_iter()
            .map(|(name, total)| (name, total / f64::from(samples)))
            .collect();
        let updated_at = Utc::now();

        tx.execute(
            r#"
            INSERT INTO daily_rollups (stat_date, source, samples, metrics, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(stat_date, source) DO UPDATE SET
                samples = excluded.samples,
                metrics = excluded.metrics,
                updated_at = excluded.updated_at
            "#,
            params![
                date.to_string(),
                source.as_str(),
                samples,
                serde_json::to_string(&metrics)?,
                timestamp(updated_at),
            ],
        )?;
        tx.commit()?;

        Ok(Some(DailyRollup {
            date,
            source,
            samples,
            metrics,
            updated_at,
        }))
    }

    /// Record one snapshot per resolved source and refresh their rollups.
    ///
    /// A failing source is logged and reported; the remaining sources are
    /// still written.
    pub fn persist_cycle(&self, resolved: &[&SourceData], taken_at: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();
        for data in resolved {
            let Some(summary) = SnapshotSummary::from_data(data) else {
                continue;
            };
            let source = summary.source();

            if let Err(e) = self.record(&summary, taken_at) {
                tracing::warn!(%source, error = %e, "Failed to record snapshot");
                report.errors.push(format!("{source}: {e}"));
                continue;
            }
            report.snapshots += 1;

            if let Err(e) = self.rollup(source, taken_at.date_naive()) {
                tracing::warn!(%source, error = %e, "Failed to refresh rollup");
                report.errors.push(format!("{source}: {e}"));
            }
        }
        tracing::debug!(
            snapshots = report.snapshots,
            errors = report.errors.len(),
            "Snapshot cycle persisted"
        );
        report
    }

    // ============================================
    // Reads
    // ============================================

    /// Snapshots of one source within `[since, until]`, oldest first
    pub fn query_range(
        &self,
        source: SourceName,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SnapshotRecord>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, source, taken_at, snapshot_date, summary
            FROM snapshots
            WHERE source = ?1 AND taken_at >= ?2 AND taken_at <= ?3
            ORDER BY taken_at, id
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![source.as_str(), timestamp(since), timestamp(until)],
                row_to_snapshot,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rollups of one source between two dates (inclusive), oldest first
    pub fn rollups(
        &self,
        source: SourceName,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<DailyRollup>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT stat_date, source, samples, metrics, updated_at
            FROM daily_rollups
            WHERE source = ?1 AND stat_date >= ?2 AND stat_date <= ?3
            ORDER BY stat_date
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![source.as_str(), since.to_string(), until.to_string()],
                row_to_rollup,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rollups for every tracked source over the last `days` days (today included).
    ///
    /// Days without snapshots are absent rather than zero-filled.
    pub fn trends(&self, days: u32) -> Result<BTreeMap<SourceName, Vec<DailyRollup>>> {
        let (since, until) = window(days);
        SourceName::DASHBOARD
            .into_iter()
            .map(|source| Ok((source, self.rollups(source, since, until)?)))
            .collect()
    }

    /// All rollups over the last `days` days, newest first
    pub fn daily_summary(&self, days: u32) -> Result<Vec<DailyRollup>> {
        let (since, until) = window(days);
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT stat_date, source, samples, metrics, updated_at
            FROM daily_rollups
            WHERE stat_date >= ?1 AND stat_date <= ?2
            ORDER BY stat_date DESC, source
            "#,
        )?;
        let rows = stmt
            .query_map(params![since.to_string(), until.to_string()], row_to_rollup)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Daily commit average and dirty flag for one repository, oldest first
    pub fn repo_history(&self, repo_name: &str, days: u32) -> Result<Vec<RepoDay>> {
        let (since, until) = window(days);
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT snapshot_date, COUNT(*), AVG(commit_count), MAX(is_dirty)
            FROM repo_snapshots
            WHERE repo_name = ?1 AND snapshot_date >= ?2 AND snapshot_date <= ?3
            GROUP BY snapshot_date
            ORDER BY snapshot_date
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![repo_name, since.to_string(), until.to_string()],
                |row| {
                    let date: String = row.get(0)?;
                    Ok(RepoDay {
                        date: parse_date(&date)?,
                        samples: row.get(1)?,
                        avg_commits: row.get(2)?,
                        was_dirty: row.get::<_, i64>(3)? != 0,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent snapshot of a source, if any
    pub fn latest(&self, source: SourceName) -> Result<Option<SnapshotRecord>> {
        let conn = self.store.connect()?;
        conn.query_row(
            r#"
            SELECT id, source, taken_at, snapshot_date, summary
            FROM snapshots WHERE source = ?1
            ORDER BY taken_at DESC, id DESC LIMIT 1
            "#,
            [source.as_str()],
            row_to_snapshot,
        )
        .optional()
        .map_err(Error::from)
    }
}

/// First and last date of a `days`-long window ending today (UTC)
fn window(days: u32) -> (NaiveDate, NaiveDate) {
    let until = Utc::now().date_naive();
    let since = until - Duration::days(i64::from(days.max(1)) - 1);
    (since, until)
}

fn parse_date(s: &str) -> rusqlite::Result<NaiveDate> {
    s.parse::<NaiveDate>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_source(s: &str) -> rusqlite::Result<SourceName> {
    s.parse::<SourceName>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(Error::validation(e)),
        )
    })
}

fn row_to_snapshot(row: &Row) -> rusqlite::Result<SnapshotRecord> {
    let source: String = row.get(1)?;
    let taken_at: String = row.get(2)?;
    let date: String = row.get(3)?;
    let summary: String = row.get(4)?;

    Ok(SnapshotRecord {
        id: row.get(0)?,
        source: parse_source(&source)?,
        taken_at: parse_timestamp(&taken_at),
        snapshot_date: parse_date(&date)?,
        summary: serde_json::from_str(&summary).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?,
    })
}

fn row_to_rollup(row: &Row) -> rusqlite::Result<DailyRollup> {
    let date: String = row.get(0)?;
    let source: String = row.get(1)?;
    let metrics: String = row.get(3)?;
    let updated_at: String = row.get(4)?;

    Ok(DailyRollup {
        date: parse_date(&date)?,
        source: parse_source(&source)?,
        samples: row.get(2)?,
        metrics: serde_json::from_str(&metrics).unwrap_or_default(),
        updated_at: parse_timestamp(&updated_at),
    })
}
