#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use amq_monitor::core::model::{BrokerStatsPackage, QueueCounterSnapshot, QueueCounters};
use amq_monitor::poller::{MetricSource, PollListener, PollTarget};
use amq_monitor::FetchError;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = amq_monitor::logging::try_init_logging();
    });
}

/// Holds every fetch until the test lets it through.
#[derive(Debug)]
pub struct FetchGate {
    entered: Semaphore,
    release: Semaphore,
}

impl FetchGate {
    pub fn new() -> Self {
        Self {
            entered: Semaphore::new(0),
            release: Semaphore::new(0),
        }
    }

    /// Waits until a fetch has reached the gate.
    pub async fn wait_entered(&self) {
        self.entered.acquire().await.expect("gate closed").forget();
    }

    pub fn release_one(&self) {
        self.release.add_permits(1);
    }
}

/// Metric source reporting the same counters for every queue of a target.
#[derive(Debug, Default)]
pub struct FakeSource {
    pub enqueue_count: AtomicI64,
    pub dequeue_count: AtomicI64,
    pub failing: AtomicBool,
    pub fetches: AtomicUsize,
    pub released: AtomicUsize,
    gate: Option<Arc<FetchGate>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> (Self, Arc<FetchGate>) {
        let gate = Arc::new(FetchGate::new());
        let source = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (source, gate)
    }

    pub fn report(&self, enqueue_count: i64, dequeue_count: i64) {
        self.enqueue_count.store(enqueue_count, Ordering::SeqCst);
        self.dequeue_count.store(dequeue_count, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl MetricSource for FakeSource {
    fn fetch<'a>(
        &'a self,
        target: &'a PollTarget,
    ) -> BoxFuture<'a, Result<BrokerStatsPackage, FetchError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.entered.add_permits(1);
                gate.release.acquire().await.expect("gate closed").forget();
            }

            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::Unreachable("connection refused".into()));
            }

            let counters = QueueCounters {
                enqueue_count: self.enqueue_count.load(Ordering::SeqCst),
                dequeue_count: self.dequeue_count.load(Ordering::SeqCst),
                ..QueueCounters::default()
            };
            let mut package = BrokerStatsPackage::placeholders(
                target.broker(),
                target.queue_names().iter().cloned(),
                target.topic_names().iter().cloned(),
            );
            for (name, snapshot) in package.queues.iter_mut() {
                *snapshot = QueueCounterSnapshot::new(target.broker().clone(), name.clone(), counters);
            }
            Ok(package)
        })
    }

    fn release_target(&self, _target: &PollTarget) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Listener keeping every delivered package.
#[derive(Debug, Default)]
pub struct RecordingListener {
    packages: Mutex<Vec<BrokerStatsPackage>>,
}

impl RecordingListener {
    pub fn deliveries(&self) -> usize {
        self.packages.lock().len()
    }

    pub fn last(&self) -> Option<BrokerStatsPackage> {
        self.packages.lock().last().cloned()
    }
}

impl PollListener for RecordingListener {
    fn on_poll_complete(&self, package: &BrokerStatsPackage) {
        self.packages.lock().push(package.clone());
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
