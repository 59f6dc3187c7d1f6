//! Kanban board adapter
//!
//! Asks the local board API first and falls back to the local store when the
//! API cannot be reached in time. Either way the adapter yields one result.

use super::{SourceAdapter, SourceError};
use crate::config::KanbanConfig;
use crate::db::KanbanStore;
use crate::types::{BoardOrigin, BoardOverview, BoardTask, SourceData, SourceName};
use async_trait::async_trait;
use std::time::Duration;

pub struct KanbanAdapter {
    config: KanbanConfig,
    client: reqwest::Client,
    store: Option<KanbanStore>,
}

impl KanbanAdapter {
    pub fn new(config: KanbanConfig, client: reqwest::Client, store: Option<KanbanStore>) -> Self {
        Self {
            config,
            client,
            store,
        }
    }

    fn api_url(&self) -> Option<&str> {
        self.config.api_url.as_deref().filter(|u| !u.is_empty())
    }

    fn fallback(&self) -> Option<&KanbanStore> {
        self.store.as_ref().filter(|_| self.config.fallback_to_store)
    }

    async fn fetch_api(&self, url: &str) -> Result<Vec<BoardTask>, SourceError> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.config.api_timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch_store(store: &KanbanStore) -> Result<Vec<BoardTask>, SourceError> {
        let store = store.clone();
        let tasks = tokio::task::spawn_blocking(move || store.list())
            .await
            .map_err(|e| SourceError::Store(e.to_string()))??;
        Ok(tasks)
    }
}

#[async_trait]
impl SourceAdapter for KanbanAdapter {
    fn source(&self) -> SourceName {
        SourceName::Kanban
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn is_configured(&self) -> bool {
        self.api_url().is_some() || self.fallback().is_some()
    }

    async fn fetch(&self) -> Result<SourceData, SourceError> {
        if let Some(url) = self.api_url() {
            match self.fetch_api(url).await {
                Ok(tasks) => {
                    return Ok(SourceData::Kanban(BoardOverview::new(tasks, BoardOrigin::Api)))
                }
                Err(e) if self.fallback().is_some() => {
                    tracing::info!(error = %e, "Board API unavailable, reading local store");
                }
                Err(e) => return Err(e),
            }
        }

        match self.fallback() {
            Some(store) => {
                let tasks = Self::fetch_store(store).await?;
                Ok(SourceData::Kanban(BoardOverview::new(
                    tasks,
                    BoardOrigin::LocalStore,
                )))
            }
            None => Err(SourceError::Store("no board available".to_string())),
        }
    }
}
