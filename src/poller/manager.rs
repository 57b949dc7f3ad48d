use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::config::PollerSettings;
use crate::core::clock::{StatsClock, SystemStatsClock};
use crate::core::destinations::DestinationRegistry;
use crate::core::error::Result;
use crate::core::model::{BrokerId, BrokerLocation};

use super::broker::{BrokerPoller, PollListener};
use super::source::MetricSourceFactory;

/// Result of [`BrokerPollerManager::start_broker_poller`] when no setup
/// error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A poller for this broker is already running; nothing was changed.
    AlreadyActive,
    /// The manager has been shut down and accepts no new pollers.
    ShutDown,
}

/// Owns one [`BrokerPoller`] per broker.
pub struct BrokerPollerManager {
    factory: Arc<dyn MetricSourceFactory>,
    settings: PollerSettings,
    clock: Arc<dyn StatsClock>,
    runtime: Option<Handle>,
    pollers: DashMap<BrokerId, Arc<BrokerPoller>>,
    // Held for read by starts, for write by shutdown, so no start can slip
    // in after shutdown has drained the map.
    shut_down: RwLock<bool>,
}

impl std::fmt::Debug for BrokerPollerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerPollerManager")
            .field("pollers", &self.pollers.len())
            .field("shut_down", &*self.shut_down.read())
            .finish()
    }
}

impl BrokerPollerManager {
    pub fn new(factory: Arc<dyn MetricSourceFactory>, settings: PollerSettings) -> Self {
        Self {
            factory,
            settings,
            clock: Arc::new(SystemStatsClock),
            runtime: None,
            pollers: DashMap::new(),
            shut_down: RwLock::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn StatsClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Creates and starts the poller for `broker` unless one already exists.
    ///
    /// The broker location is validated and the metric source created before
    /// anything is registered; either failing leaves the manager unchanged.
    pub fn start_broker_poller(
        &self,
        broker: BrokerId,
        listener: Arc<dyn PollListener>,
        queue_registry: Arc<DestinationRegistry>,
        topic_registry: Option<Arc<DestinationRegistry>>,
    ) -> Result<StartOutcome> {
        let shut_down = self.shut_down.read();
        if *shut_down {
            info!(broker = %broker, "manager shut down; not starting poller");
            return Ok(StartOutcome::ShutDown);
        }

        let entry = match self.pollers.entry(broker.clone()) {
            Entry::Occupied(_) => {
                info!(broker = %broker, "ignoring duplicate poller start");
                return Ok(StartOutcome::AlreadyActive);
            }
            Entry::Vacant(entry) => entry,
        };

        let location = BrokerLocation::parse(broker.location())?;
        let source = self.factory.create(&broker, &location)?;

        let mut poller = BrokerPoller::new(broker.clone(), source, listener, queue_registry)
            .with_settings(self.settings)
            .with_clock(Arc::clone(&self.clock));
        if let Some(topics) = topic_registry {
            poller = poller.with_topic_registry(topics);
        }
        if let Some(runtime) = &self.runtime {
            poller = poller.with_runtime(runtime.clone());
        }

        let poller = Arc::new(poller);
        poller.start()?;
        entry.insert(poller);

        info!(broker = %broker, "broker poller started");
        Ok(StartOutcome::Started)
    }

    /// Stops and forgets the poller for `broker`. Returns `false` if there
    /// was none. Does not wait for an in-flight cycle.
    pub fn stop_broker_poller(&self, broker: &BrokerId) -> bool {
        match self.pollers.remove(broker) {
            Some((_, poller)) => {
                poller.stop();
                info!(broker = %broker, "broker poller stopped");
                true
            }
            None => false,
        }
    }

    /// Stops every poller and refuses later starts. Returns the stopped
    /// pollers so the caller can wait for them to drain.
    pub fn shutdown_all_broker_pollers(&self) -> Vec<Arc<BrokerPoller>> {
        let mut shut_down = self.shut_down.write();
        *shut_down = true;

        let brokers: Vec<BrokerId> = self.pollers.iter().map(|e| e.key().clone()).collect();
        let stopped: Vec<Arc<BrokerPoller>> = brokers
            .iter()
            .filter_map(|broker| self.pollers.remove(broker).map(|(_, poller)| poller))
            .collect();
        drop(shut_down);

        for poller in &stopped {
            poller.stop();
        }
        info!(count = stopped.len(), "all broker pollers stopped");
        stopped
    }

    /// [`shutdown_all_broker_pollers`](Self::shutdown_all_broker_pollers),
    /// then blocks until every poller has drained or `timeout` elapses.
    /// Returns `true` if all drained in time.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut drained = true;

        for poller in self.shutdown_all_broker_pollers() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !poller.wait_until_stopped_timeout(remaining) {
                warn!(broker = %poller.broker(), "poller still busy at shutdown deadline");
                drained = false;
            }
        }
        drained
    }

    pub fn get(&self, broker: &BrokerId) -> Option<Arc<BrokerPoller>> {
        self.pollers.get(broker).map(|e| Arc::clone(e.value()))
    }

    pub fn brokers(&self) -> Vec<BrokerId> {
        let mut brokers: Vec<BrokerId> = self.pollers.iter().map(|e| e.key().clone()).collect();
        brokers.sort();
        brokers
    }

    pub fn len(&self) -> usize {
        self.pollers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollers.is_empty()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shut_down.read()
    }
}
