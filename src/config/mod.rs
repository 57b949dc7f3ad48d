use serde::Deserialize;
use std::time::Duration;
use std::{fs, path::Path};

use crate::core::error::MonitorError;
use crate::core::model::{BrokerId, BrokerLocation};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub stats_log_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            stats_log_interval_ms: 60_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogThrottleConfig {
    pub initial_quiet_ms: u64,
    pub max_quiet_ms: u64,
}

impl Default for LogThrottleConfig {
    fn default() -> Self {
        Self {
            initial_quiet_ms: 10_000,
            max_quiet_ms: 600_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub name: String,
    pub location: String,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DestinationsConfig {
    pub queues: Vec<String>,
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    pub polling: PollingConfig,
    pub log_throttle: LogThrottleConfig,
    pub brokers: Vec<BrokerConfig>,
    pub destinations: DestinationsConfig,
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.polling.interval_ms == 0 {
            return Err(MonitorError::Config("polling.interval_ms must be positive".into()));
        }
        if self.log_throttle.max_quiet_ms < self.log_throttle.initial_quiet_ms {
            return Err(MonitorError::Config(
                "log_throttle.max_quiet_ms must not be below initial_quiet_ms".into(),
            ));
        }
        if let Some(broker) = self.brokers.iter().find(|b| b.name.trim().is_empty()) {
            return Err(MonitorError::Config(format!(
                "broker at '{}' has no name",
                broker.location
            )));
        }
        for broker in &self.brokers {
            BrokerLocation::parse(&broker.location)?;
        }
        Ok(())
    }

    pub fn broker_ids(&self) -> Vec<BrokerId> {
        self.brokers
            .iter()
            .map(|b| BrokerId::new(b.name.clone(), b.location.clone()))
            .collect()
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            polling_interval: Duration::from_millis(self.polling.interval_ms.max(1)),
            stats_log_interval: Duration::from_millis(self.polling.stats_log_interval_ms),
            throttle_initial_quiet: Duration::from_millis(self.log_throttle.initial_quiet_ms),
            throttle_max_quiet: Duration::from_millis(self.log_throttle.max_quiet_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.polling.shutdown_timeout_ms)
    }
}

/// Runtime view of the polling settings handed to each poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    pub polling_interval: Duration,
    pub stats_log_interval: Duration,
    pub throttle_initial_quiet: Duration,
    pub throttle_max_quiet: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        MonitorConfig::default().poller_settings()
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MonitorConfig, anyhow::Error> {
    let raw: String = fs::read_to_string(path)?;
    parse_config(&raw)
}

pub fn parse_config(raw: &str) -> Result<MonitorConfig, anyhow::Error> {
    let config: MonitorConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}
