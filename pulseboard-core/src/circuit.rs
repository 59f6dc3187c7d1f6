//! Circuit breakers for remote sources
//!
//! A breaker opens after `failure_threshold` consecutive failures and rejects
//! calls until `reset_timeout` has passed. The first call after that is a trial:
//! success closes the circuit, failure opens it again.

use crate::config::CircuitConfig;
use crate::types::SourceName;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of one breaker, for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub failures: u32,
    pub retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    retry_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                retry_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &CircuitConfig) -> Self {
        Self::new(
            name,
            config.failure_threshold,
            Duration::from_secs(config.reset_timeout_secs),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may go out now.
    ///
    /// Moves an open circuit to half-open once the reset timeout has elapsed
    /// and lets exactly one trial call through.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    tracing::info!(circuit = %self.name, "Circuit half-open, trying source");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(circuit = %self.name, "Circuit closed, source recovered");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.retry_at = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.trial_in_flight = false;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            tracing::warn!(
                circuit = %self.name,
                failures = inner.failures,
                threshold = self.failure_threshold,
                "Circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.retry_at = chrono::Duration::from_std(self.reset_timeout)
                .ok()
                .map(|d| Utc::now() + d);
        }
    }

    /// When an open circuit will next allow a trial call
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open => inner.retry_at,
            _ => None,
        }
    }

    pub fn status(&self) -> CircuitStatus {
        let inner = self.lock();
        CircuitStatus {
            state: inner.state,
            failures: inner.failures,
            retry_at: match inner.state {
                CircuitState::Open => inner.retry_at,
                _ => None,
            },
        }
    }
}

/// Breakers for every remote source, shared between adapters and health checks
#[derive(Debug, Clone, Default)]
pub struct CircuitRegistry {
    breakers: BTreeMap<SourceName, Arc<CircuitBreaker>>,
}

impl CircuitRegistry {
    /// One breaker each for the remote sources: todoist, linear and weather.
    pub fn from_config(config: &CircuitConfig) -> Self {
        let mut registry = Self::default();
        for source in [SourceName::Todoist, SourceName::Linear, SourceName::Weather] {
            registry.insert(
                source,
                Arc::new(CircuitBreaker::from_config(source.as_str(), config)),
            );
        }
        registry
    }

    pub fn insert(&mut self, source: SourceName, breaker: Arc<CircuitBreaker>) {
        self.breakers.insert(source, breaker);
    }

    pub fn get(&self, source: SourceName) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(&source).cloned()
    }

    pub fn statuses(&self) -> BTreeMap<SourceName, CircuitStatus> {
        self.breakers
            .iter()
            .map(|(source, breaker)| (*source, breaker.status()))
            .collect()
    }

    /// Whether any breaker is open or still probing its source
    pub fn any_tripped(&self) -> bool {
        self.breakers
            .values()
            .any(|b| b.status().state != CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new("todoist", 3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request());
        breaker.record_failure();

        assert_eq!(breaker.status().state, CircuitState::Open);
        assert!(!breaker.allow_request());
        assert!(breaker.retry_at().is_some());
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = CircuitBreaker::new("linear", 2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.status().state, CircuitState::Closed);
        assert_eq!(breaker.status().failures, 1);
    }

    #[test]
    fn test_half_open_single_trial() {
        let breaker = CircuitBreaker::new("weather", 1, Duration::ZERO);
        breaker.record_failure();
        assert_eq!(breaker.status().state, CircuitState::Open);

        assert!(breaker.allow_request());
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);
        assert!(!breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.status().state, CircuitState::Open);

        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.status().state, CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_registry_covers_remote_sources() {
        let registry = CircuitRegistry::from_config(&CircuitConfig::default());
        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 3);
        assert!(statuses.contains_key(&SourceName::Todoist));
        assert!(registry.get(SourceName::Git).is_none());
        assert!(!registry.any_tripped());
    }

    #[test]
    fn test_half_open_counts_as_tripped() {
        let mut registry = CircuitRegistry::default();
        let breaker = Arc::new(CircuitBreaker::new("weather", 1, Duration::ZERO));
        registry.insert(SourceName::Weather, Arc::clone(&breaker));

        breaker.record_failure();
        assert!(registry.any_tripped());

        assert!(breaker.allow_request());
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);
        assert!(registry.any_tripped());

        breaker.record_success();
        assert!(!registry.any_tripped());
    }
}
