//! Process-wide wiring, constructed once and passed by reference.
//!
//! [`MonitorContext`] owns the destination registries, the statistics
//! registry and the poller manager. Nothing here is global: two contexts in
//! one process are fully independent.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::info;

use crate::config::MonitorConfig;
use crate::core::clock::{StatsClock, SystemStatsClock};
use crate::core::destinations::{DestinationRegistry, ListenerId};
use crate::core::error::{MonitorError, Result};
use crate::core::model::BrokerId;
use crate::poller::{BrokerPollerManager, MetricSourceFactory, PollListener, StartOutcome};
use crate::stats::{QueueTotals, StatsRegistry};

pub struct MonitorContext {
    config: MonitorConfig,
    queues: Arc<DestinationRegistry>,
    topics: Arc<DestinationRegistry>,
    stats: Arc<StatsRegistry>,
    manager: BrokerPollerManager,
    stats_listener: Mutex<Option<ListenerId>>,
}

impl std::fmt::Debug for MonitorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorContext")
            .field("queues", &self.queues)
            .field("topics", &self.topics)
            .field("stats", &self.stats)
            .field("manager", &self.manager)
            .finish()
    }
}

impl MonitorContext {
    pub fn new(config: MonitorConfig, factory: Arc<dyn MetricSourceFactory>) -> Result<Self> {
        Self::with_clock(config, factory, Arc::new(SystemStatsClock))
    }

    /// Builds a context whose statistics and pollers read time from `clock`.
    pub fn with_clock(
        config: MonitorConfig,
        factory: Arc<dyn MetricSourceFactory>,
        clock: Arc<dyn StatsClock>,
    ) -> Result<Self> {
        config.validate()?;

        let queues = Arc::new(DestinationRegistry::new());
        let topics = Arc::new(DestinationRegistry::new());
        let stats = Arc::new(StatsRegistry::with_clock(Arc::clone(&clock)).tracking(&queues));
        let stats_listener = queues.add_listener(stats.clone());

        let manager = BrokerPollerManager::new(factory, config.poller_settings()).with_clock(clock);

        Ok(Self {
            config,
            queues,
            topics,
            stats,
            manager,
            stats_listener: Mutex::new(Some(stats_listener)),
        })
    }

    /// Runtime the pollers are scheduled on; defaults to the runtime current
    /// when [`start`](Self::start) is called.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.manager = self.manager.with_runtime(runtime);
        self
    }

    /// Registers the configured destinations, then starts one poller per
    /// configured broker.
    ///
    /// Stops at the first broker whose poller cannot be set up; pollers
    /// already started keep running.
    pub fn start(&self) -> Result<Vec<(BrokerId, StartOutcome)>> {
        if self.manager.is_shut_down() {
            return Err(MonitorError::ShuttingDown);
        }

        for queue in &self.config.destinations.queues {
            self.queues.put_if_absent(queue.as_str());
        }
        for topic in &self.config.destinations.topics {
            self.topics.put_if_absent(topic.as_str());
        }

        let mut outcomes = Vec::with_capacity(self.config.brokers.len());
        for broker in self.config.broker_ids() {
            let outcome = self.start_broker(broker.clone())?;
            outcomes.push((broker, outcome));
        }

        info!(
            brokers = outcomes.len(),
            queues = self.queues.len(),
            topics = self.topics.len(),
            "monitor started"
        );
        Ok(outcomes)
    }

    /// Starts polling one broker, feeding the shared statistics registry.
    pub fn start_broker(&self, broker: BrokerId) -> Result<StartOutcome> {
        let listener: Arc<dyn PollListener> = self.stats.clone();
        self.manager.start_broker_poller(
            broker,
            listener,
            Arc::clone(&self.queues),
            Some(Arc::clone(&self.topics)),
        )
    }

    pub fn stop_broker(&self, broker: &BrokerId) -> bool {
        self.manager.stop_broker_poller(broker)
    }

    /// Stops all pollers, waits up to the configured shutdown timeout for
    /// in-flight cycles, and detaches the statistics registry.
    ///
    /// Blocks the calling thread. Returns `false` if some poller had not
    /// drained by the deadline. A poller counts as drained once its last
    /// fetch has finished, so that cycle's statistics update may still be
    /// landing when this returns.
    pub fn shutdown(&self) -> bool {
        let drained = self
            .manager
            .shutdown_and_wait(self.config.shutdown_timeout());

        if let Some(id) = self.stats_listener.lock().take() {
            self.queues.remove_listener(id);
        }

        info!(drained, "monitor shut down");
        drained
    }

    pub fn add_queue(&self, name: &str) -> bool {
        self.queues.put_if_absent(name)
    }

    pub fn remove_queue(&self, name: &str) -> bool {
        self.queues.remove(name).is_some()
    }

    pub fn add_topic(&self, name: &str) -> bool {
        self.topics.put_if_absent(name)
    }

    pub fn remove_topic(&self, name: &str) -> bool {
        self.topics.remove(name).is_some()
    }

    pub fn get_totals(&self, queue_name: &str) -> Option<QueueTotals> {
        self.stats.get_totals(queue_name)
    }

    pub fn all_totals(&self) -> BTreeMap<String, QueueTotals> {
        self.stats.all_totals()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn queue_registry(&self) -> &Arc<DestinationRegistry> {
        &self.queues
    }

    pub fn topic_registry(&self) -> &Arc<DestinationRegistry> {
        &self.topics
    }

    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    pub fn manager(&self) -> &BrokerPollerManager {
        &self.manager
    }
}
