//! Per broker-queue message rate tracking.

use serde::Serialize;

use super::rate::{RateEstimator, RateWindow};

/// Enqueue and dequeue rates, in messages per second, for each window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MessageRates {
    pub enqueue: [f64; 3],
    pub dequeue: [f64; 3],
}

impl MessageRates {
    pub fn enqueue(&self, window: RateWindow) -> f64 {
        self.enqueue[window.index()]
    }

    pub fn dequeue(&self, window: RateWindow) -> f64 {
        self.dequeue[window.index()]
    }
}

/// Enqueue/dequeue estimators for one queue on one broker, one pair per
/// [`RateWindow`].
#[derive(Debug, Clone)]
pub struct QueueRateCollector {
    enqueue: [RateEstimator; 3],
    dequeue: [RateEstimator; 3],
}

impl Default for QueueRateCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueRateCollector {
    pub fn new() -> Self {
        Self {
            enqueue: RateWindow::ALL.map(RateWindow::estimator),
            dequeue: RateWindow::ALL.map(RateWindow::estimator),
        }
    }

    /// Pushes one pair of count deltas observed at `timestamp_ms`.
    pub fn on_sample(&mut self, timestamp_ms: u64, enqueue_delta: i64, dequeue_delta: i64) {
        for estimator in &mut self.enqueue {
            estimator.add(timestamp_ms, enqueue_delta);
        }
        for estimator in &mut self.dequeue {
            estimator.add(timestamp_ms, dequeue_delta);
        }
    }

    pub fn rates(&self) -> MessageRates {
        MessageRates {
            enqueue: RateWindow::ALL.map(|w| self.enqueue[w.index()].rate_per_second()),
            dequeue: RateWindow::ALL.map(|w| self.dequeue[w.index()].rate_per_second()),
        }
    }
}
