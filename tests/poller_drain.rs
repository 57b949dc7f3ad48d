mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use amq_monitor::config::PollerSettings;
use amq_monitor::core::destinations::DestinationRegistry;
use amq_monitor::core::model::BrokerId;
use amq_monitor::poller::{BrokerPoller, PollerHooks};

use common::{eventually, FakeSource, FetchGate, RecordingListener};

/// Counts how often a waiter entered each phase of `wait_until_stopped`.
#[derive(Debug, Default)]
struct WaitCounts {
    waiting_for_stop: AtomicUsize,
    waiting_for_inactive: AtomicUsize,
}

impl PollerHooks for WaitCounts {
    fn on_wait_for_stop(&self) {
        self.waiting_for_stop.fetch_add(1, Ordering::SeqCst);
    }

    fn on_wait_for_poll_inactive(&self) {
        self.waiting_for_inactive.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    poller: Arc<BrokerPoller>,
    gate: Arc<FetchGate>,
    waits: Arc<WaitCounts>,
    listener: Arc<RecordingListener>,
}

fn harness() -> Harness {
    let (source, gate) = FakeSource::gated();
    let waits = Arc::new(WaitCounts::default());
    let listener = Arc::new(RecordingListener::default());
    let queues = Arc::new(DestinationRegistry::new());
    queues.put_if_absent("orders");

    let poller = BrokerPoller::new(
        BrokerId::new("amq01", "localhost:1099"),
        Arc::new(source),
        listener.clone(),
        queues,
    )
    .with_settings(PollerSettings {
        polling_interval: Duration::from_secs(3600),
        ..PollerSettings::default()
    })
    .with_hooks(waits.clone());

    Harness {
        poller: Arc::new(poller),
        gate,
        waits,
        listener,
    }
}

fn spawn_waiter(poller: &Arc<BrokerPoller>) -> tokio::task::JoinHandle<()> {
    let poller = Arc::clone(poller);
    tokio::task::spawn_blocking(move || poller.wait_until_stopped())
}

async fn jitter(rng: &mut StdRng) {
    let millis = rng.gen_range(0..4);
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

/// A scheduled cycle is held in its fetch while `stop` and the waiter race.
async fn stop_during_scheduled_cycle(rng: &mut StdRng, seed: u64) {
    let h = harness();
    h.poller.start().unwrap();
    h.gate.wait_entered().await;
    assert!(h.poller.is_poll_active());

    let waiter = if rng.gen_bool(0.5) {
        h.poller.stop();
        jitter(rng).await;
        spawn_waiter(&h.poller)
    } else {
        let waiter = spawn_waiter(&h.poller);
        jitter(rng).await;
        h.poller.stop();
        waiter
    };

    let waits = Arc::clone(&h.waits);
    eventually("waiter blocked on active poll", || {
        waits.waiting_for_inactive.load(Ordering::SeqCst) > 0
    })
    .await;
    jitter(rng).await;
    assert!(!waiter.is_finished(), "waiter returned during active poll (seed {seed})");
    assert_eq!(h.listener.deliveries(), 0);

    h.gate.release_one();
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap_or_else(|_| panic!("waiter never returned (seed {seed})"))
        .unwrap();

    assert!(!h.poller.is_poll_active());
    // The drained cycle hands its results over after it stops counting as
    // active.
    let listener = Arc::clone(&h.listener);
    eventually("drained cycle delivered", || listener.deliveries() == 1).await;
}

/// The waiter is already blocked on `stop` when a direct poll begins, and
/// `stop` arrives while that poll is in flight.
async fn poll_begins_while_waiting_for_stop(rng: &mut StdRng, seed: u64) {
    let h = harness();
    h.poller.start().unwrap();
    h.gate.wait_entered().await;
    h.gate.release_one();
    let listener = Arc::clone(&h.listener);
    eventually("scheduled cycle", || listener.deliveries() == 1).await;

    let waiter = spawn_waiter(&h.poller);
    let waits = Arc::clone(&h.waits);
    eventually("waiter blocked on stop", || {
        waits.waiting_for_stop.load(Ordering::SeqCst) > 0
    })
    .await;

    let direct = {
        let poller = Arc::clone(&h.poller);
        tokio::spawn(async move { poller.poll_once().await })
    };
    h.gate.wait_entered().await;
    jitter(rng).await;
    h.poller.stop();

    eventually("waiter blocked on active poll", || {
        waits.waiting_for_inactive.load(Ordering::SeqCst) > 0
    })
    .await;
    jitter(rng).await;
    assert!(!waiter.is_finished(), "waiter returned during active poll (seed {seed})");

    h.gate.release_one();
    direct.await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap_or_else(|_| panic!("waiter never returned (seed {seed})"))
        .unwrap();

    assert_eq!(h.listener.deliveries(), 2, "seed {seed}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wait_until_stopped_observes_in_flight_cycle() {
    common::init_logging();
    let seed: u64 = rand::random();
    let mut rng = StdRng::seed_from_u64(seed);

    for _ in 0..25 {
        if rng.gen_bool(0.5) {
            stop_during_scheduled_cycle(&mut rng, seed).await;
        } else {
            poll_begins_while_waiting_for_stop(&mut rng, seed).await;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_timeout_reports_undrained_poller() {
    let h = harness();
    h.poller.start().unwrap();
    h.gate.wait_entered().await;
    h.poller.stop();

    let poller = Arc::clone(&h.poller);
    let drained = tokio::task::spawn_blocking(move || {
        poller.wait_until_stopped_timeout(Duration::from_millis(30))
    })
    .await
    .unwrap();
    assert!(!drained);

    h.gate.release_one();
    let poller = Arc::clone(&h.poller);
    let drained = tokio::task::spawn_blocking(move || {
        poller.wait_until_stopped_timeout(Duration::from_secs(5))
    })
    .await
    .unwrap();
    assert!(drained);
}
