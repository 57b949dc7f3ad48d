//! Pipe-delimited statistics lines for log-based collection.
//!
//! Broker line fields:
//! `|broker-stats|name|avg-msg-size|uptime|uptime-ms|mem-limit|mem-pct|connections|consumers|messages|enqueues|dequeues|store-pct|`
//!
//! Queue line fields:
//! `|queue-stats|queue|broker|size|enqueues|dequeues|consumers|producers|cursor-pct|mem-pct|inflight|`

use std::fmt::Write as _;

use tracing::info;

use crate::core::model::{BrokerCounterSnapshot, BrokerStatsPackage, QueueCounterSnapshot};

/// Tracing target carrying the stats lines.
pub const STATS_LOG_TARGET: &str = "amq_monitor::stats_log";

const PIPE_ESCAPE: &str = "%v%";

#[derive(Debug, Default, Clone, Copy)]
pub struct BrokerStatsLogger;

impl BrokerStatsLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn log_stats(&self, package: &BrokerStatsPackage) {
        info!(target: STATS_LOG_TARGET, "{}", format_broker_line(&package.broker));

        for (name, stats) in &package.queues {
            info!(target: STATS_LOG_TARGET, "{}", format_queue_line(name, stats));
        }
    }

    /// All lines `log_stats` would emit, in order.
    pub fn lines(&self, package: &BrokerStatsPackage) -> Vec<String> {
        std::iter::once(format_broker_line(&package.broker))
            .chain(
                package
                    .queues
                    .iter()
                    .map(|(name, stats)| format_queue_line(name, stats)),
            )
            .collect()
    }
}

pub fn format_broker_line(stats: &BrokerCounterSnapshot) -> String {
    let c = stats.counters();
    let mut line = String::with_capacity(128);

    line.push_str("|broker-stats|");
    let _ = write!(
        line,
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|",
        encode_field(Some(stats.owner().name())),
        c.average_message_size,
        encode_field(c.uptime.as_deref()),
        c.uptime_millis,
        c.memory_limit,
        c.memory_percent_usage,
        c.current_connections_count,
        c.total_consumer_count,
        c.total_message_count,
        c.total_enqueue_count,
        c.total_dequeue_count,
        c.store_percent_usage,
    );
    line
}

pub fn format_queue_line(queue_name: &str, stats: &QueueCounterSnapshot) -> String {
    let c = stats.counters();
    let mut line = String::with_capacity(96);

    line.push_str("|queue-stats|");
    let _ = write!(
        line,
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|",
        encode_field(Some(queue_name)),
        encode_field(Some(stats.owner().name())),
        c.queue_size,
        c.enqueue_count,
        c.dequeue_count,
        c.consumer_count,
        c.producer_count,
        c.cursor_percent_usage,
        c.memory_percent_usage,
        c.inflight_count,
    );
    line
}

/// Keeps the field count intact: `|` becomes `%v%`, missing text is empty.
pub fn encode_field(value: Option<&str>) -> String {
    value
        .map(|v| v.replace('|', PIPE_ESCAPE))
        .unwrap_or_default()
}
