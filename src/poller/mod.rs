//! # Poller Module
//!
//! Per-broker recurring poll cycles and the manager that owns them.
//!
//! - `source`: the [`MetricSource`] capability a poller drives.
//! - `target`: [`PollTarget`], the immutable destination set of one cycle.
//! - `broker`: [`BrokerPoller`] and its start/stop/drain protocol.
//! - `manager`: [`BrokerPollerManager`], one poller per broker.

pub mod broker;
pub mod manager;
pub mod source;
pub mod target;

pub use broker::{
    BrokerPoller, PollListener, PollerHooks, PollerMetrics, PollerMetricsSnapshot, RunState,
};
pub use manager::{BrokerPollerManager, StartOutcome};
pub use source::{MetricSource, MetricSourceFactory};
pub use target::PollTarget;
