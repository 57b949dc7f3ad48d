use parking_lot::Mutex;

use crate::core::model::{BrokerId, BrokerStatsPackage};

/// What one poll cycle fetches and where its results land.
///
/// The destination set is fixed at construction; a change in monitored
/// destinations produces a new target rather than editing this one. Only the
/// result storage changes, and only when a fetch succeeds.
#[derive(Debug)]
pub struct PollTarget {
    broker: BrokerId,
    queue_names: Vec<String>,
    topic_names: Vec<String>,
    storage: Mutex<BrokerStatsPackage>,
}

impl PollTarget {
    pub fn new(broker: BrokerId, queue_names: Vec<String>, topic_names: Vec<String>) -> Self {
        let storage = BrokerStatsPackage::placeholders(
            &broker,
            queue_names.iter().cloned(),
            topic_names.iter().cloned(),
        );

        Self {
            broker,
            queue_names,
            topic_names,
            storage: Mutex::new(storage),
        }
    }

    pub fn broker(&self) -> &BrokerId {
        &self.broker
    }

    pub fn queue_names(&self) -> &[String] {
        &self.queue_names
    }

    pub fn topic_names(&self) -> &[String] {
        &self.topic_names
    }

    /// Copy of the latest results (placeholders until the first success).
    pub fn results(&self) -> BrokerStatsPackage {
        self.storage.lock().clone()
    }

    pub(crate) fn store(&self, package: BrokerStatsPackage) {
        *self.storage.lock() = package;
    }
}
