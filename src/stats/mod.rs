//! # Statistics Module
//!
//! Turns raw per-broker counters into cross-broker queue totals and smoothed
//! message rates.
//!
//! - `rate`: sliding-window [`RateEstimator`] and the [`RateWindow`] presets.
//! - `collector`: enqueue/dequeue estimators for one broker-queue.
//! - `aggregate`: [`QueueAggregate`], the per-queue cross-broker state.
//! - `registry`: [`StatsRegistry`], queue name to aggregate.
//! - `logger`: pipe-delimited stats lines.

pub mod aggregate;
pub mod collector;
pub mod logger;
pub mod rate;
pub mod registry;

pub use aggregate::{QueueAggregate, QueueTotals};
pub use collector::{MessageRates, QueueRateCollector};
pub use logger::BrokerStatsLogger;
pub use rate::{RateEstimator, RateWindow};
pub use registry::StatsRegistry;
