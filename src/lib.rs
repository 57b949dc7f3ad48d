//! amq-monitor – Polls message-broker management endpoints and aggregates
//! per-queue statistics across brokers.
//!
//! This crate exports
//!  * `poller`  – per-broker poll cycles with a safe start/stop/drain protocol
//!  * `stats`   – cross-broker queue totals and sliding-window message rates
//!  * `context` – the process context wiring registries, stats and pollers
//!  * `config`  – TOML-driven runtime configuration
//!
//! Reading counters from a real broker is left to a [`MetricSource`]
//! implementation supplied by the embedding application.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod context;
pub mod core;
pub mod logging;
pub mod poller;
pub mod stats;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use config::{load_config, MonitorConfig, PollerSettings};
pub use context::MonitorContext;
pub use crate::core::error::{FetchError, MonitorError};
pub use crate::core::model::{BrokerId, BrokerLocation, BrokerStatsPackage, QueueCounterSnapshot};
pub use poller::{BrokerPoller, BrokerPollerManager, MetricSource, MetricSourceFactory, StartOutcome};
pub use stats::{QueueTotals, RateWindow, StatsRegistry};
