//! Value types exchanged between the pollers and the statistics engine.
//!
//! Snapshots are plain values: every transformation (`add_counts`,
//! `subtract_counts`, `with_owner`) returns a new instance and leaves both
//! operands untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{MonitorError, Result};

/// Owner name used for cross-broker aggregated snapshots.
pub const TOTALS_OWNER: &str = "totals";

/// Identity of one broker instance: its name plus where it is reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BrokerId {
    name: String,
    location: String,
}

impl BrokerId {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    /// Pseudo-broker that owns aggregated totals.
    pub fn totals() -> Self {
        Self::new(TOTALS_OWNER, "")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.location)
        }
    }
}

/// A validated broker management location.
///
/// Accepted forms are `host:port` and `scheme://[host[:port]]/path`; the
/// latter covers opaque service URLs whose authority is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerLocation {
    raw: String,
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

impl BrokerLocation {
    pub fn parse(location: &str) -> Result<Self> {
        let raw = location.trim();
        if raw.is_empty() {
            return Err(MonitorError::invalid_location(location, "empty location"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(MonitorError::invalid_location(location, "contains whitespace"));
        }

        match raw.split_once("://") {
            Some((scheme, rest)) => Self::parse_url(location, raw, scheme, rest),
            None => {
                let (host, port) = parse_authority(location, raw, true)?;
                Ok(Self {
                    raw: raw.to_string(),
                    scheme: None,
                    host: Some(host),
                    port,
                })
            }
        }
    }

    fn parse_url(original: &str, raw: &str, scheme: &str, rest: &str) -> Result<Self> {
        let scheme_ok = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | ':'));
        if !scheme_ok {
            return Err(MonitorError::invalid_location(original, "invalid scheme"));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        let (host, port) = if authority.is_empty() {
            if path.len() <= 1 {
                return Err(MonitorError::invalid_location(original, "missing host"));
            }
            (None, None)
        } else {
            let (host, port) = parse_authority(original, authority, false)?;
            (Some(host), port)
        };

        Ok(Self {
            raw: raw.to_string(),
            scheme: Some(scheme.to_string()),
            host,
            port,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

fn parse_authority(
    original: &str,
    authority: &str,
    port_required: bool,
) -> Result<(String, Option<u16>)> {
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None if port_required => {
            return Err(MonitorError::invalid_location(original, "expected host:port"))
        }
        None => (authority, None),
    };

    if host.is_empty() {
        return Err(MonitorError::invalid_location(original, "missing host"));
    }

    let port = match port {
        Some(p) => match p.parse::<u16>() {
            Ok(0) | Err(_) => {
                return Err(MonitorError::invalid_location(original, "invalid port"))
            }
            Ok(p) => Some(p),
        },
        None => None,
    };

    Ok((host.to_string(), port))
}

/// Raw queue counters as read from one broker.
///
/// `cursor_percent_usage` and `memory_percent_usage` are gauges; everything
/// else is a count. Count arithmetic takes the gauges from `self`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounters {
    pub queue_size: i64,
    pub enqueue_count: i64,
    pub dequeue_count: i64,
    pub consumer_count: i64,
    pub producer_count: i64,
    pub cursor_percent_usage: i32,
    pub memory_percent_usage: i32,
    pub inflight_count: i64,
}

impl QueueCounters {
    pub fn add_counts(&self, other: &QueueCounters) -> Self {
        Self {
            queue_size: self.queue_size + other.queue_size,
            enqueue_count: self.enqueue_count + other.enqueue_count,
            dequeue_count: self.dequeue_count + other.dequeue_count,
            consumer_count: self.consumer_count + other.consumer_count,
            producer_count: self.producer_count + other.producer_count,
            inflight_count: self.inflight_count + other.inflight_count,
            ..*self
        }
    }

    pub fn subtract_counts(&self, other: &QueueCounters) -> Self {
        Self {
            queue_size: self.queue_size - other.queue_size,
            enqueue_count: self.enqueue_count - other.enqueue_count,
            dequeue_count: self.dequeue_count - other.dequeue_count,
            consumer_count: self.consumer_count - other.consumer_count,
            producer_count: self.producer_count - other.producer_count,
            inflight_count: self.inflight_count - other.inflight_count,
            ..*self
        }
    }
}

/// One owner's readings for one queue (or topic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueCounterSnapshot {
    owner: BrokerId,
    queue_name: String,
    counters: QueueCounters,
}

impl QueueCounterSnapshot {
    pub fn new(owner: BrokerId, queue_name: impl Into<String>, counters: QueueCounters) -> Self {
        Self {
            owner,
            queue_name: queue_name.into(),
            counters,
        }
    }

    /// Zero-valued placeholder used in freshly built poll targets.
    pub fn placeholder(owner: BrokerId, queue_name: impl Into<String>) -> Self {
        Self::new(owner, queue_name, QueueCounters::default())
    }

    pub fn owner(&self) -> &BrokerId {
        &self.owner
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn counters(&self) -> &QueueCounters {
        &self.counters
    }

    pub fn add_counts(&self, other: &QueueCounterSnapshot, owner: &BrokerId) -> Self {
        Self::new(
            owner.clone(),
            self.queue_name.clone(),
            self.counters.add_counts(&other.counters),
        )
    }

    pub fn subtract_counts(&self, other: &QueueCounterSnapshot) -> Self {
        Self::new(
            self.owner.clone(),
            self.queue_name.clone(),
            self.counters.subtract_counts(&other.counters),
        )
    }

    pub fn with_owner(&self, owner: &BrokerId) -> Self {
        Self::new(owner.clone(), self.queue_name.clone(), self.counters)
    }

    pub fn with_gauges(&self, cursor_percent_usage: i32, memory_percent_usage: i32) -> Self {
        Self::new(
            self.owner.clone(),
            self.queue_name.clone(),
            QueueCounters {
                cursor_percent_usage,
                memory_percent_usage,
                ..self.counters
            },
        )
    }
}

/// Broker-wide readings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerCounters {
    pub average_message_size: i64,
    pub uptime: Option<String>,
    pub uptime_millis: i64,
    pub memory_limit: i64,
    pub memory_percent_usage: i64,
    pub store_percent_usage: i64,
    pub current_connections_count: i64,
    pub total_consumer_count: i64,
    pub total_message_count: i64,
    pub total_enqueue_count: i64,
    pub total_dequeue_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerCounterSnapshot {
    owner: BrokerId,
    counters: BrokerCounters,
}

impl BrokerCounterSnapshot {
    pub fn new(owner: BrokerId, counters: BrokerCounters) -> Self {
        Self { owner, counters }
    }

    pub fn placeholder(owner: BrokerId) -> Self {
        Self::new(owner, BrokerCounters::default())
    }

    pub fn owner(&self) -> &BrokerId {
        &self.owner
    }

    pub fn counters(&self) -> &BrokerCounters {
        &self.counters
    }
}

/// Result storage of one poll cycle: the broker snapshot plus every
/// monitored destination, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStatsPackage {
    pub broker: BrokerCounterSnapshot,
    pub queues: BTreeMap<String, QueueCounterSnapshot>,
    pub topics: BTreeMap<String, QueueCounterSnapshot>,
}

impl BrokerStatsPackage {
    /// Zero-valued storage for the given destination names.
    pub fn placeholders<Q, T>(broker: &BrokerId, queue_names: Q, topic_names: T) -> Self
    where
        Q: IntoIterator<Item = String>,
        T: IntoIterator<Item = String>,
    {
        Self {
            broker: BrokerCounterSnapshot::placeholder(broker.clone()),
            queues: placeholder_map(broker, queue_names),
            topics: placeholder_map(broker, topic_names),
        }
    }
}

fn placeholder_map<I>(broker: &BrokerId, names: I) -> BTreeMap<String, QueueCounterSnapshot>
where
    I: IntoIterator<Item = String>,
{
    names
        .into_iter()
        .map(|name| {
            let snapshot = QueueCounterSnapshot::placeholder(broker.clone(), name.clone());
            (name, snapshot)
        })
        .collect()
}
