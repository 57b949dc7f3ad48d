//! Cross-broker aggregation of one queue's counters and rates.
//!
//! Each broker reports cumulative counters independently. The aggregate keeps
//! the last snapshot per broker as a baseline and folds only the difference
//! into the total, so brokers may join at any time without double counting.
//!
//! The raw total follows negative differences as-is: after a broker resets its
//! counters the total drops with it. Only the rate path clamps negative deltas
//! to zero.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::core::clock::StatsClock;
use crate::core::model::{BrokerId, QueueCounterSnapshot, QueueCounters};

use super::collector::{MessageRates, QueueRateCollector};
use super::rate::RateWindow;

/// Read-only view of a queue's aggregate, detached from the live state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueTotals {
    pub queue_name: String,
    pub counters: QueueCounters,
    pub rates: MessageRates,
}

impl QueueTotals {
    pub fn enqueue_rate(&self, window: RateWindow) -> f64 {
        self.rates.enqueue(window)
    }

    pub fn dequeue_rate(&self, window: RateWindow) -> f64 {
        self.rates.dequeue(window)
    }
}

#[derive(Debug)]
struct BrokerMeasurements {
    baseline: QueueCounterSnapshot,
    rates: QueueRateCollector,
}

/// Aggregated statistics for a single queue across every reporting broker.
pub struct QueueAggregate {
    queue_name: String,
    by_broker: HashMap<BrokerId, BrokerMeasurements>,
    totals: Option<QueueCounterSnapshot>,
    rates: MessageRates,
    clock: Arc<dyn StatsClock>,
}

impl std::fmt::Debug for QueueAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueAggregate")
            .field("queue_name", &self.queue_name)
            .field("brokers", &self.by_broker.len())
            .field("totals", &self.totals)
            .field("rates", &self.rates)
            .finish()
    }
}

impl QueueAggregate {
    pub fn new(queue_name: impl Into<String>, clock: Arc<dyn StatsClock>) -> Self {
        Self {
            queue_name: queue_name.into(),
            by_broker: HashMap::new(),
            totals: None,
            rates: MessageRates::default(),
            clock,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn broker_count(&self) -> usize {
        self.by_broker.len()
    }

    /// Folds one broker's latest snapshot for this queue into the aggregate.
    pub fn on_updated_stats(&mut self, snapshot: &QueueCounterSnapshot) {
        trace!(
            queue = %self.queue_name,
            broker = %snapshot.owner(),
            consumers = snapshot.counters().consumer_count,
            "updated queue stats"
        );

        let totals_owner = BrokerId::totals();

        match self.by_broker.entry(snapshot.owner().clone()) {
            Entry::Vacant(vacant) => {
                // First report from this broker: no previous value to diff
                // against, so the rates are left alone.
                vacant.insert(BrokerMeasurements {
                    baseline: snapshot.clone(),
                    rates: QueueRateCollector::new(),
                });

                self.totals = Some(match self.totals.take() {
                    Some(totals) => totals.add_counts(snapshot, &totals_owner),
                    None => snapshot.with_owner(&totals_owner),
                });
            }
            Entry::Occupied(mut occupied) => {
                let measurements = occupied.get_mut();
                let diff = snapshot.subtract_counts(&measurements.baseline);

                self.totals = Some(match self.totals.take() {
                    Some(totals) => totals.add_counts(&diff, &totals_owner),
                    None => snapshot.with_owner(&totals_owner),
                });
                measurements.baseline = snapshot.clone();

                let now = self.clock.now_ms();
                update_rates(
                    &self.queue_name,
                    &mut self.rates,
                    measurements,
                    now,
                    diff.counters(),
                );
            }
        }

        self.update_gauges();
    }

    /// Read-only copy of the current totals and summed rates.
    pub fn totals(&self) -> QueueTotals {
        QueueTotals {
            queue_name: self.queue_name.clone(),
            counters: self
                .totals
                .as_ref()
                .map(|t| *t.counters())
                .unwrap_or_default(),
            rates: self.rates,
        }
    }

    /// Gauges do not sum; report the highest value seen on any broker.
    fn update_gauges(&mut self) {
        let (cursor, memory) = self
            .by_broker
            .values()
            .map(|m| m.baseline.counters())
            .fold((0, 0), |(cursor, memory), c| {
                (
                    cursor.max(c.cursor_percent_usage),
                    memory.max(c.memory_percent_usage),
                )
            });

        if let Some(totals) = self.totals.as_ref() {
            self.totals = Some(totals.with_gauges(cursor, memory));
        }
    }
}

/// Replaces one broker's contribution to the summed rates.
fn update_rates(
    queue_name: &str,
    sums: &mut MessageRates,
    measurements: &mut BrokerMeasurements,
    now_ms: u64,
    diff: &QueueCounters,
) {
    let mut enqueue_delta = diff.enqueue_count;
    let mut dequeue_delta = diff.dequeue_count;

    // Counts only ever grow unless the broker restarted or someone reset
    // them; a reset must not show up as a negative rate.
    if enqueue_delta < 0 {
        debug!(queue = %queue_name, delta = enqueue_delta, "negative enqueue count change; ignoring");
        enqueue_delta = 0;
    }
    if dequeue_delta < 0 {
        debug!(queue = %queue_name, delta = dequeue_delta, "negative dequeue count change; ignoring");
        dequeue_delta = 0;
    }

    let before = measurements.rates.rates();
    measurements.rates.on_sample(now_ms, enqueue_delta, dequeue_delta);
    let after = measurements.rates.rates();

    for window in RateWindow::ALL {
        let i = window.index();
        sums.enqueue[i] += after.enqueue[i] - before.enqueue[i];
        sums.dequeue[i] += after.dequeue[i] - before.dequeue[i];
    }
}
