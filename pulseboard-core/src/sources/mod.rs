//! Source adapters
//!
//! Each adapter queries exactly one external source and normalizes the result.
//! [`resolve`] is the boundary every adapter call goes through: it turns
//! missing configuration, open circuits, timeouts and adapter errors into a
//! [`SourceResult`], so nothing an adapter does can fail the aggregation.

mod git;
mod kanban;
mod linear;
mod todoist;
mod weather;

pub use git::GitAdapter;
pub use kanban::KanbanAdapter;
pub use linear::LinearAdapter;
pub use todoist::TodoistAdapter;
pub use weather::WeatherAdapter;

use crate::circuit::{CircuitBreaker, CircuitRegistry};
use crate::config::Config;
use crate::db::Store;
use crate::error::{Error, Result};
use crate::types::{SourceData, SourceName, SourceResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest upstream error body kept in a message
const MAX_ERROR_BODY: usize = 200;

/// Why an adapter could not produce data
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("timeout")]
    Timeout,

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("request failed: {0}")]
    Http(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("{name} temporarily unavailable (retry at {})", .retry_at.format("%H:%M"))]
    CircuitOpen {
        name: SourceName,
        retry_at: DateTime<Utc>,
    },

    #[error("{0} temporarily unavailable (recovery check in progress)")]
    TrialInFlight(SourceName),

    #[error("git command failed: {0}")]
    Subprocess(String),

    #[error("local store: {0}")]
    Store(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        // The URL may carry query parameters; never echo it back.
        let e = e.without_url();
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            SourceError::Http(e.to_string())
        }
    }
}

impl From<Error> for SourceError {
    fn from(e: Error) -> Self {
        SourceError::Store(e.to_string())
    }
}

impl SourceError {
    /// Build an upstream error from a non-success response.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let mut message: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
        if message.is_empty() {
            message = "empty response".to_string();
        }
        SourceError::Upstream { status, message }
    }
}

/// One external data source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceName;

    /// Deadline for one `fetch`
    fn timeout(&self) -> Duration;

    /// Whether the required configuration is present.
    ///
    /// When false, `fetch` is never called.
    fn is_configured(&self) -> bool;

    /// Breaker guarding this source, if it talks to a remote service
    fn circuit(&self) -> Option<&CircuitBreaker> {
        None
    }

    async fn fetch(&self) -> std::result::Result<SourceData, SourceError>;
}

/// Outcome report for a breaker-guarded fetch.
///
/// Dropped without being settled, it records a failure, so a fetch that
/// panics or is cancelled never leaves a half-open breaker waiting forever.
struct CircuitCall<'a> {
    circuit: Option<&'a CircuitBreaker>,
}

impl CircuitCall<'_> {
    fn success(mut self) {
        if let Some(circuit) = self.circuit.take() {
            circuit.record_success();
        }
    }

    fn failure(mut self) {
        if let Some(circuit) = self.circuit.take() {
            circuit.record_failure();
        }
    }
}

impl Drop for CircuitCall<'_> {
    fn drop(&mut self) {
        if let Some(circuit) = self.circuit.take() {
            tracing::warn!(circuit = circuit.name(), "Fetch abandoned, counting as failure");
            circuit.record_failure();
        }
    }
}

/// Run one adapter to a [`SourceResult`] within its deadline.
pub async fn resolve(adapter: &dyn SourceAdapter) -> SourceResult {
    let source = adapter.source();

    if !adapter.is_configured() {
        tracing::debug!(%source, "Source not configured");
        return SourceResult::NotConfigured;
    }

    if let Some(circuit) = adapter.circuit() {
        if !circuit.allow_request() {
            let error = match circuit.retry_at() {
                Some(retry_at) => SourceError::CircuitOpen {
                    name: source,
                    retry_at,
                },
                None => SourceError::TrialInFlight(source),
            };
            tracing::debug!(%source, "Circuit open, skipping fetch");
            return SourceResult::error(error.to_string());
        }
    }

    let call = CircuitCall {
        circuit: adapter.circuit(),
    };
    let started = Instant::now();
    let outcome = match tokio::time::timeout(adapter.timeout(), adapter.fetch()).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SourceError::Timeout),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(data) => {
            call.success();
            tracing::debug!(%source, elapsed_ms, "Source resolved");
            SourceResult::Ok { data }
        }
        Err(e) => {
            call.failure();
            tracing::warn!(%source, elapsed_ms, error = %e, "Source failed");
            SourceResult::error(e.to_string())
        }
    }
}

/// Shared HTTP client for all remote adapters
///
/// Deadlines are set per request, so the client itself carries no timeout.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("pulseboard/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))
}

/// Build every adapter the configuration describes.
///
/// Unconfigured sources still get an adapter so they report `NotConfigured`.
pub fn build_default_adapters(
    config: &Config,
    store: Option<Store>,
    circuits: &CircuitRegistry,
) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let client = http_client()?;

    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(GitAdapter::new(config.git.clone())),
        Arc::new(TodoistAdapter::new(
            config.todoist.clone(),
            client.clone(),
            circuits.get(SourceName::Todoist),
        )),
        Arc::new(KanbanAdapter::new(
            config.kanban.clone(),
            client.clone(),
            store.map(|s| s.kanban()),
        )),
        Arc::new(LinearAdapter::new(
            config.linear.clone(),
            client.clone(),
            circuits.get(SourceName::Linear),
        )),
        Arc::new(WeatherAdapter::new(
            config.weather.clone(),
            client,
            circuits.get(SourceName::Weather),
        )),
    ];

    Ok(adapters)
}
