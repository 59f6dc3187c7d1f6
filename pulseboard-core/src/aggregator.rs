//! Concurrent fan-out over the source adapters
//!
//! The aggregator resolves every requested source on a shared worker pool,
//! waits for all of them to settle and merges the results by source name.
//! Snapshot persistence is a best-effort step after the merge; its outcome
//! is reported in the envelope but never fails it.

use crate::db::SnapshotStore;
use crate::pool::WorkerPool;
use crate::sources::{resolve, SourceAdapter};
use crate::types::{
    AggregationEnvelope, Briefing, BriefingBoard, BriefingCounts, BriefingTasks, PersistOutcome,
    SourceData, SourceName, SourceResult,
};
use chrono::{DateTime, Local, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Upcoming tasks shown in the briefing
const MAX_UPCOMING: usize = 5;
/// Ready board tasks shown in the briefing
const MAX_READY: usize = 5;

pub struct Aggregator {
    adapters: BTreeMap<SourceName, Arc<dyn SourceAdapter>>,
    pool: WorkerPool,
    snapshots: Option<SnapshotStore>,
}

impl Aggregator {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            adapters: BTreeMap::new(),
            pool,
            snapshots: None,
        }
    }

    /// Register an adapter, replacing any previous one for the same source.
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.source(), adapter);
        self
    }

    pub fn with_adapters(self, adapters: impl IntoIterator<Item = Arc<dyn SourceAdapter>>) -> Self {
        adapters.into_iter().fold(self, Self::with_adapter)
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Resolve the given sources concurrently.
    ///
    /// Every requested source gets an entry; one without an adapter is
    /// reported as not configured.
    pub async fn collect(&self, sources: &[SourceName]) -> BTreeMap<SourceName, SourceResult> {
        let mut results = BTreeMap::new();
        let mut jobs: Vec<(SourceName, Arc<dyn SourceAdapter>)> = Vec::new();

        for &source in sources {
            match self.adapters.get(&source) {
                Some(adapter) => jobs.push((source, Arc::clone(adapter))),
                None => {
                    results.insert(source, SourceResult::NotConfigured);
                }
            }
        }

        let names: Vec<SourceName> = jobs.iter().map(|(name, _)| *name).collect();
        let adapters: Vec<Arc<dyn SourceAdapter>> =
            jobs.into_iter().map(|(_, adapter)| adapter).collect();

        let outcomes = self
            .pool
            .map(adapters, |adapter| async move { resolve(adapter.as_ref()).await })
            .await;

        for (source, outcome) in names.into_iter().zip(outcomes) {
            let result = outcome.unwrap_or_else(|failure| SourceResult::error(failure.to_string()));
            results.insert(source, result);
        }

        results
    }

    /// Build the dashboard envelope, optionally persisting snapshots.
    pub async fn aggregate(&self, persist: bool) -> AggregationEnvelope {
        let generated_at = Utc::now();
        let started = Instant::now();

        let sources = self.collect(&SourceName::DASHBOARD).await;
        let fetch_duration = started.elapsed();

        let storage = if persist {
            self.persist(&sources, generated_at).await
        } else {
            PersistOutcome::Skipped
        };

        let envelope = AggregationEnvelope::new(generated_at, fetch_duration, sources, storage);

        tracing::info!(
            duration_ms = envelope.fetch_duration_ms(),
            overall = envelope.overall_status().as_str(),
            storage = ?envelope.storage(),
            "Dashboard aggregated"
        );

        envelope
    }

    async fn persist(
        &self,
        sources: &BTreeMap<SourceName, SourceResult>,
        taken_at: DateTime<Utc>,
    ) -> PersistOutcome {
        let Some(snapshots) = self.snapshots.clone() else {
            return PersistOutcome::Skipped;
        };

        let resolved: Vec<SourceData> = sources
            .values()
            .filter_map(SourceResult::data)
            .cloned()
            .collect();

        let written = tokio::task::spawn_blocking(move || {
            let refs: Vec<&SourceData> = resolved.iter().collect();
            snapshots.persist_cycle(&refs, taken_at)
        })
        .await;

        match written {
            Ok(report) if report.errors.is_empty() => PersistOutcome::Ok {
                snapshots: report.snapshots,
            },
            Ok(mut report) if report.snapshots == 0 => {
                tracing::warn!(errors = report.errors.len(), "Snapshot persistence failed");
                PersistOutcome::Error {
                    error: report.errors.swap_remove(0),
                }
            }
            Ok(report) => {
                tracing::warn!(
                    snapshots = report.snapshots,
                    errors = report.errors.len(),
                    "Snapshot persistence partially failed"
                );
                PersistOutcome::Partial {
                    snapshots: report.snapshots,
                    errors: report.errors,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Snapshot persistence task failed");
                PersistOutcome::Error {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Morning overview of tasks, board and weather
    pub async fn briefing(&self) -> Briefing {
        let generated_at = Utc::now();
        let started = Instant::now();
        let local = Local::now();
        let today = local.date_naive();

        let mut results = self.collect(&SourceName::BRIEFING).await;
        let statuses = results
            .iter()
            .map(|(source, result)| (*source, result.status()))
            .collect();

        let tasks = match results.get(&SourceName::Todoist).and_then(SourceResult::data) {
            Some(SourceData::Todoist(list)) => {
                let overdue: Vec<_> = list.tasks.iter().filter(|t| t.is_overdue).cloned().collect();
                let due_today: Vec<_> = list.tasks.iter().filter(|t| t.is_today).cloned().collect();
                let upcoming: Vec<_> = list
                    .tasks
                    .iter()
                    .filter(|t| !t.is_overdue && !t.is_today && t.due_date.is_some())
                    .take(MAX_UPCOMING)
                    .cloned()
                    .collect();
                Some(BriefingTasks {
                    overdue,
                    today: due_today,
                    upcoming,
                })
            }
            _ => None,
        };

        let kanban = match results.get(&SourceName::Kanban).and_then(SourceResult::data) {
            Some(SourceData::Kanban(board)) => Some(BriefingBoard {
                in_progress: board.column("in-progress").to_vec(),
                ready: board.column("ready").iter().take(MAX_READY).cloned().collect(),
            }),
            _ => None,
        };

        let summary = BriefingCounts {
            overdue_count: tasks.as_ref().map_or(0, |t| t.overdue.len()),
            today_count: tasks.as_ref().map_or(0, |t| t.today.len()),
            in_progress_count: kanban.as_ref().map_or(0, |k| k.in_progress.len()),
        };

        let weather = results
            .remove(&SourceName::Weather)
            .unwrap_or(SourceResult::NotConfigured);

        Briefing {
            generated_at,
            date: today,
            day_name: local.format("%A").to_string(),
            fetch_duration_ms: started.elapsed().as_millis() as u64,
            weather,
            tasks,
            kanban,
            summary,
            statuses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceError;
    use crate::types::{BoardOrigin, BoardOverview, BoardTask, TodoList, TodoTask};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::time::Duration;

    struct Fixed(SourceName, Option<SourceData>);

    #[async_trait]
    impl SourceAdapter for Fixed {
        fn source(&self) -> SourceName {
            self.0
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn fetch(&self) -> Result<SourceData, SourceError> {
            self.1
                .clone()
                .ok_or_else(|| SourceError::Http("connection refused".to_string()))
        }
    }

    struct Panics;

    #[async_trait]
    impl SourceAdapter for Panics {
        fn source(&self) -> SourceName {
            SourceName::Linear
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn fetch(&self) -> Result<SourceData, SourceError> {
            panic!("adapter bug")
        }
    }

    fn todo(id: &str, due: Option<NaiveDate>, overdue: bool, today: bool) -> TodoTask {
        TodoTask {
            id: id.to_string(),
            content: id.to_string(),
            project: "Work".to_string(),
            priority: 1,
            due_date: due,
            is_overdue: overdue,
            is_today: today,
            url: String::new(),
        }
    }

    fn board_task(id: i64, column: &str) -> BoardTask {
        BoardTask {
            id,
            title: format!("card {id}"),
            description: String::new(),
            column: column.to_string(),
            priority: 2,
            position: id,
            tags: vec![],
            links: vec![],
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_every_dashboard_source_present() {
        let aggregator = Aggregator::new(WorkerPool::new("test", 4))
            .with_adapter(Arc::new(Fixed(SourceName::Git, None)));

        let envelope = aggregator.aggregate(false).await;
        assert_eq!(envelope.sources().len(), 4);
        assert!(matches!(
            envelope.get(SourceName::Git),
            Some(SourceResult::Error { .. })
        ));
        assert!(matches!(
            envelope.get(SourceName::Todoist),
            Some(SourceResult::NotConfigured)
        ));
        assert_eq!(envelope.storage(), &PersistOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_panicking_adapter_is_isolated() {
        let aggregator = Aggregator::new(WorkerPool::new("test", 2))
            .with_adapter(Arc::new(Panics))
            .with_adapter(Arc::new(Fixed(
                SourceName::Todoist,
                Some(SourceData::Todoist(TodoList::default())),
            )));

        let results = aggregator
            .collect(&[SourceName::Linear, SourceName::Todoist])
            .await;
        assert!(matches!(results[&SourceName::Linear], SourceResult::Error { .. }));
        assert!(results[&SourceName::Todoist].is_ok());
    }

    #[tokio::test]
    async fn test_briefing_sections() {
        let due = NaiveDate::from_ymd_opt(2030, 1, 1);
        let tasks = vec![
            todo("late", due, true, false),
            todo("now", due, false, true),
            todo("soon", due, false, false),
            todo("someday", None, false, false),
        ];
        let board = BoardOverview::new(
            vec![
                board_task(1, "in-progress"),
                board_task(2, "ready"),
                board_task(3, "backlog"),
            ],
            BoardOrigin::LocalStore,
        );

        let aggregator = Aggregator::new(WorkerPool::new("test", 3))
            .with_adapter(Arc::new(Fixed(
                SourceName::Todoist,
                Some(SourceData::Todoist(TodoList { tasks })),
            )))
            .with_adapter(Arc::new(Fixed(
                SourceName::Kanban,
                Some(SourceData::Kanban(board)),
            )));

        let briefing = aggregator.briefing().await;
        let tasks = briefing.tasks.unwrap();
        assert_eq!(tasks.overdue.len(), 1);
        assert_eq!(tasks.today.len(), 1);
        assert_eq!(tasks.upcoming.len(), 1);
        assert_eq!(tasks.upcoming[0].id, "soon");

        let kanban = briefing.kanban.unwrap();
        assert_eq!(kanban.in_progress.len(), 1);
        assert_eq!(kanban.ready.len(), 1);

        assert_eq!(briefing.summary.overdue_count, 1);
        assert_eq!(briefing.summary.in_progress_count, 1);
        assert!(matches!(briefing.weather, SourceResult::NotConfigured));
    }

    #[tokio::test]
    async fn test_briefing_degraded_section_is_none() {
        let aggregator = Aggregator::new(WorkerPool::new("test", 3))
            .with_adapter(Arc::new(Fixed(SourceName::Todoist, None)));

        let briefing = aggregator.briefing().await;
        assert!(briefing.tasks.is_none());
        assert!(briefing.kanban.is_none());

        let json = serde_json::to_value(&briefing).unwrap();
        assert!(json["tasks"].is_null());
        assert_eq!(json["statuses"]["todoist"], "error");
    }
}
