//! Explicitly constructed application context
//!
//! Holds the configuration, the store handle, the circuit breakers and the
//! aggregator. Built once at startup and shared by the server and the CLI.

use crate::aggregator::Aggregator;
use crate::circuit::{CircuitRegistry, CircuitStatus};
use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::sources::build_default_adapters;
use crate::types::SourceName;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness plus per-dependency reachability
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: &'static str,
    pub store: StoreHealth,
    pub circuits: BTreeMap<SourceName, CircuitStatus>,
}

#[derive(Clone)]
pub struct DashboardContext {
    config: Arc<Config>,
    store: Store,
    circuits: CircuitRegistry,
    aggregator: Arc<Aggregator>,
}

impl DashboardContext {
    /// Build the context with the store at the default database path.
    pub fn from_config(config: Config) -> Result<Self> {
        Self::new(config, Store::new(Config::database_path()))
    }

    pub fn new(config: Config, store: Store) -> Result<Self> {
        let circuits = CircuitRegistry::from_config(&config.circuit);
        let adapters = build_default_adapters(&config, Some(store.clone()), &circuits)?;

        let mut aggregator =
            Aggregator::new(WorkerPool::new("aggregator", config.aggregator.max_workers))
                .with_adapters(adapters);
        if config.aggregator.persist_snapshots {
            aggregator = aggregator.with_snapshots(store.snapshots());
        }

        Ok(Self::with_aggregator(config, store, circuits, aggregator))
    }

    /// Assemble a context from parts, for callers that supply their own adapters.
    pub fn with_aggregator(
        config: Config,
        store: Store,
        circuits: CircuitRegistry,
        aggregator: Aggregator,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            circuits,
            aggregator: Arc::new(aggregator),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Check the store and summarize breaker state.
    ///
    /// The store check opens a connection, so it runs on the blocking pool.
    pub async fn health(&self) -> HealthReport {
        let store = self.store.clone();
        let ping = tokio::task::spawn_blocking(move || store.ping())
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));

        let store = match ping {
            Ok(()) => StoreHealth {
                reachable: true,
                error: None,
            },
            Err(error) => StoreHealth {
                reachable: false,
                error: Some(error),
            },
        };

        let status = if !store.reachable {
            HealthStatus::Error
        } else if self.circuits.any_tripped() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };

        HealthReport {
            status,
            version: env!("CARGO_PKG_VERSION"),
            store,
            circuits: self.circuits.statuses(),
        }
    }
}
