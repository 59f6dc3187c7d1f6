//! # pulseboard-core
//!
//! Core library for pulseboard - a personal productivity dashboard.
//!
//! This library provides:
//! - Domain types for source results, the aggregation envelope and the briefing
//! - Source adapters for git, Todoist, Linear, the kanban board and weather
//! - A bounded worker pool and per-source circuit breakers
//! - SQLite storage for snapshots, daily rollups, planning sessions and the board
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! One aggregation cycle fans out to every source on the worker pool:
//! - **Adapters** query one source each and never fail the cycle; every
//!   outcome becomes a [`SourceResult`]
//! - **Aggregator** merges the results into an [`AggregationEnvelope`]
//! - **Snapshot store** records a summary per successful source as a
//!   best-effort step and recomputes the day's rollup from raw snapshots
//!
//! ## Example
//!
//! ```rust,no_run
//! use pulseboard_core::{Config, DashboardContext};
//!
//! # async fn run() -> pulseboard_core::Result<()> {
//! let config = Config::load()?;
//! let ctx = DashboardContext::from_config(config)?;
//!
//! let envelope = ctx.aggregator().aggregate(true).await;
//! println!("{}", envelope.overall_status().as_str());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use aggregator::Aggregator;
pub use circuit::{CircuitBreaker, CircuitRegistry, CircuitState, CircuitStatus};
pub use config::{Config, ConfigStatus};
pub use context::{DashboardContext, HealthReport, HealthStatus, StoreHealth};
pub use db::Store;
pub use error::{Error, Result};
pub use pool::{JobFailure, WorkerPool};
pub use sources::{resolve, SourceAdapter, SourceError};
pub use types::*;

// Public modules
pub mod aggregator;
pub mod circuit;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod pool;
pub mod sources;
pub mod types;
