use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::clock::{StatsClock, SystemStatsClock};
use crate::core::destinations::{
    DestinationRegistry, DestinationRegistryListener, DestinationState,
};
use crate::core::model::{BrokerStatsPackage, QueueCounterSnapshot};
use crate::poller::PollListener;

use super::aggregate::{QueueAggregate, QueueTotals};

/// [`StatsRegistry`] maps queue names to their cross-broker aggregates.
///
/// The map itself is a DashMap; each aggregate sits behind its own lock so
/// updates for different queues never contend.
///
/// When bound to a queue [`DestinationRegistry`] with
/// [`tracking`](StatsRegistry::tracking), snapshots for queues that are no
/// longer registered are dropped, so a cycle that was in flight during a
/// removal cannot bring the queue back.
pub struct StatsRegistry {
    aggregates: DashMap<String, Arc<Mutex<QueueAggregate>>>,
    clock: Arc<dyn StatsClock>,
    queues: Option<Weak<DestinationRegistry>>,
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsRegistry")
            .field("queues", &self.aggregates.len())
            .finish()
    }
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemStatsClock))
    }

    pub fn with_clock(clock: Arc<dyn StatsClock>) -> Self {
        Self {
            aggregates: DashMap::new(),
            clock,
            queues: None,
        }
    }

    /// Only accepts snapshots for queues present in `queues`.
    pub fn tracking(mut self, queues: &Arc<DestinationRegistry>) -> Self {
        self.queues = Some(Arc::downgrade(queues));
        self
    }

    /// Routes one broker's queue snapshot to that queue's aggregate,
    /// creating the aggregate on first sight.
    pub fn on_updated_stats(&self, snapshot: &QueueCounterSnapshot) {
        let queue_name = snapshot.queue_name();
        if !self.is_monitored(queue_name) {
            debug!(queue = %queue_name, "dropping stats for unmonitored queue");
            return;
        }

        let aggregate = self
            .aggregates
            .entry(queue_name.to_string())
            .or_insert_with(|| {
                debug!(queue = %queue_name, "tracking statistics for new queue");
                Arc::new(Mutex::new(QueueAggregate::new(
                    queue_name,
                    Arc::clone(&self.clock),
                )))
            })
            .clone();

        aggregate.lock().on_updated_stats(snapshot);

        // The queue may have been removed between the check above and the
        // insert; its removal event has then already passed us by.
        if !self.is_monitored(queue_name) {
            self.aggregates
                .remove_if(queue_name, |_, current| Arc::ptr_eq(current, &aggregate));
        }
    }

    fn is_monitored(&self, queue_name: &str) -> bool {
        match self.queues.as_ref().and_then(Weak::upgrade) {
            Some(queues) => queues.contains(queue_name),
            None => true,
        }
    }

    pub fn get_totals(&self, queue_name: &str) -> Option<QueueTotals> {
        let aggregate = self.aggregates.get(queue_name).map(|e| Arc::clone(e.value()))?;
        let totals = aggregate.lock().totals();
        Some(totals)
    }

    /// Totals for every known queue, ordered by name.
    pub fn all_totals(&self) -> BTreeMap<String, QueueTotals> {
        let aggregates: Vec<_> = self
            .aggregates
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        aggregates
            .into_iter()
            .map(|(name, aggregate)| {
                let totals = aggregate.lock().totals();
                (name, totals)
            })
            .collect()
    }

    /// Drops everything known about a queue.
    pub fn remove_queue(&self, queue_name: &str) -> bool {
        let removed = self.aggregates.remove(queue_name).is_some();
        if removed {
            debug!(queue = %queue_name, "dropped statistics for removed queue");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}

impl PollListener for StatsRegistry {
    fn on_poll_complete(&self, package: &BrokerStatsPackage) {
        for snapshot in package.queues.values() {
            self.on_updated_stats(snapshot);
        }
    }
}

impl DestinationRegistryListener for StatsRegistry {
    fn on_remove_entry(&self, name: &str, _state: &DestinationState) {
        self.remove_queue(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::destinations::DestinationRegistry;
    use crate::core::model::{BrokerId, QueueCounters};

    fn snapshot(broker: &BrokerId, queue: &str, enqueue: i64) -> QueueCounterSnapshot {
        QueueCounterSnapshot::new(
            broker.clone(),
            queue,
            QueueCounters {
                enqueue_count: enqueue,
                ..QueueCounters::default()
            },
        )
    }

    #[test]
    fn creates_aggregates_lazily() {
        let registry = StatsRegistry::with_clock(Arc::new(ManualClock::new(0)));
        assert!(registry.get_totals("orders").is_none());

        let broker = BrokerId::new("amq01", "h:1");
        registry.on_updated_stats(&snapshot(&broker, "orders", 7));
        registry.on_updated_stats(&snapshot(&broker, "invoices", 3));

        assert_eq!(registry.get_totals("orders").unwrap().counters.enqueue_count, 7);
        let names: Vec<_> = registry.all_totals().into_keys().collect();
        assert_eq!(names, vec!["invoices", "orders"]);
    }

    #[test]
    fn removal_from_destination_registry_clears_state() {
        let stats = Arc::new(StatsRegistry::with_clock(Arc::new(ManualClock::new(0))));
        let queues = DestinationRegistry::new();
        queues.add_listener(stats.clone());
        queues.put_if_absent("orders");

        let broker = BrokerId::new("amq01", "h:1");
        stats.on_updated_stats(&snapshot(&broker, "orders", 500));
        queues.remove("orders");
        assert!(stats.get_totals("orders").is_none());

        // A new report starts over from the raw value, not the stale total.
        stats.on_updated_stats(&snapshot(&broker, "orders", 20));
        let totals = stats.get_totals("orders").unwrap();
        assert_eq!(totals.counters.enqueue_count, 20);
        assert_eq!(totals.rates, Default::default());
    }

    #[test]
    fn poll_packages_feed_every_queue() {
        let stats = StatsRegistry::with_clock(Arc::new(ManualClock::new(0)));
        let broker = BrokerId::new("amq01", "h:1");
        let package = BrokerStatsPackage::placeholders(
            &broker,
            vec!["a".to_string(), "b".to_string()],
            vec!["events".to_string()],
        );

        stats.on_poll_complete(&package);

        assert_eq!(stats.len(), 2);
        assert!(stats.get_totals("events").is_none());
    }

    #[test]
    fn late_snapshot_for_removed_queue_is_dropped() {
        let queues = Arc::new(DestinationRegistry::new());
        let stats = Arc::new(
            StatsRegistry::with_clock(Arc::new(ManualClock::new(0))).tracking(&queues),
        );
        queues.add_listener(stats.clone());
        queues.put_if_absent("orders");

        let broker = BrokerId::new("amq01", "h:1");
        stats.on_updated_stats(&snapshot(&broker, "orders", 500));
        queues.remove("orders");

        stats.on_updated_stats(&snapshot(&broker, "orders", 600));
        assert!(stats.get_totals("orders").is_none());
        assert!(stats.is_empty());

        queues.put_if_absent("orders");
        stats.on_updated_stats(&snapshot(&broker, "orders", 600));
        assert_eq!(stats.get_totals("orders").unwrap().counters.enqueue_count, 600);
    }

    #[test]
    fn untracked_registry_accepts_any_queue() {
        let stats = StatsRegistry::with_clock(Arc::new(ManualClock::new(0)));
        stats.on_updated_stats(&snapshot(&BrokerId::new("amq01", "h:1"), "orders", 1));
        assert_eq!(stats.len(), 1);
    }
}
