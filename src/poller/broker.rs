//! Recurring statistics poller for one broker.
//!
//! Lifecycle: `NotStarted -> Started -> Stopped`, with `Stopped` terminal and
//! reachable from either earlier state. Stopping is not preemptive: a cycle
//! already running finishes, and [`BrokerPoller::wait_until_stopped`] blocks
//! until it has.
//!
//! The destination set being polled lives in an immutable [`PollTarget`].
//! Registry changes build a complete replacement and swap the reference, so
//! a cycle in flight keeps using the target it started with.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::PollerSettings;
use crate::core::clock::{StatsClock, SystemStatsClock};
use crate::core::destinations::{
    DestinationRegistry, DestinationRegistryListener, DestinationState, ListenerId,
};
use crate::core::error::MonitorError;
use crate::core::model::{BrokerId, BrokerStatsPackage};
use crate::logging::LogThrottle;
use crate::stats::BrokerStatsLogger;

use super::source::MetricSource;
use super::target::PollTarget;

/// Receives the result storage of every completed poll cycle, whether or
/// not that cycle's fetch succeeded.
pub trait PollListener: Send + Sync {
    fn on_poll_complete(&self, package: &BrokerStatsPackage);
}

impl<F> PollListener for F
where
    F: Fn(&BrokerStatsPackage) + Send + Sync,
{
    fn on_poll_complete(&self, package: &BrokerStatsPackage) {
        self(package)
    }
}

/// Callbacks at the points where the poller's threads can interleave.
///
/// `on_wait_for_stop` and `on_wait_for_poll_inactive` run while the poller's
/// lock is held and must not call back into the poller.
pub trait PollerHooks: Send + Sync {
    fn on_wait_for_stop(&self) {}
    fn on_wait_for_poll_inactive(&self) {}
    fn on_poll_start(&self) {}
    fn before_fetch(&self) {}
    fn after_fetch(&self) {}
}

#[derive(Debug, Default)]
struct NoHooks;

impl PollerHooks for NoHooks {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Started,
    Stopped,
}

#[derive(Debug, Default)]
pub struct PollerMetrics {
    cycles: AtomicU64,
    failures: AtomicU64,
    deliveries: AtomicU64,
    target_rebuilds: AtomicU64,
    stats_logs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerMetricsSnapshot {
    pub cycles: u64,
    pub failures: u64,
    pub deliveries: u64,
    pub target_rebuilds: u64,
    pub stats_logs: u64,
}

impl PollerMetrics {
    pub fn snapshot(&self) -> PollerMetricsSnapshot {
        PollerMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            target_rebuilds: self.target_rebuilds.load(Ordering::Relaxed),
            stats_logs: self.stats_logs.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct PollerState {
    run: RunState,
    active_polls: usize,
    target: Option<Arc<PollTarget>>,
    queue_listener: Option<ListenerId>,
    topic_listener: Option<ListenerId>,
    shutdown: Option<broadcast::Sender<()>>,
}

pub struct BrokerPoller {
    broker: BrokerId,
    source: Arc<dyn MetricSource>,
    listener: Arc<dyn PollListener>,
    queue_registry: Arc<DestinationRegistry>,
    topic_registry: Option<Arc<DestinationRegistry>>,
    settings: PollerSettings,
    clock: Arc<dyn StatsClock>,
    runtime: Option<Handle>,
    hooks: Arc<dyn PollerHooks>,
    stats_logger: BrokerStatsLogger,
    failure_log: LogThrottle,
    failing: AtomicBool,
    last_stats_log: Mutex<Option<u64>>,
    metrics: PollerMetrics,
    state: Mutex<PollerState>,
    state_changed: Condvar,
}

impl std::fmt::Debug for BrokerPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerPoller")
            .field("broker", &self.broker)
            .field("settings", &self.settings)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl BrokerPoller {
    pub fn new(
        broker: BrokerId,
        source: Arc<dyn MetricSource>,
        listener: Arc<dyn PollListener>,
        queue_registry: Arc<DestinationRegistry>,
    ) -> Self {
        let settings = PollerSettings::default();
        let clock: Arc<dyn StatsClock> = Arc::new(SystemStatsClock);

        Self {
            broker,
            source,
            listener,
            queue_registry,
            topic_registry: None,
            failure_log: failure_log(&settings, &clock),
            settings,
            clock,
            runtime: None,
            hooks: Arc::new(NoHooks),
            stats_logger: BrokerStatsLogger::new(),
            failing: AtomicBool::new(false),
            last_stats_log: Mutex::new(None),
            metrics: PollerMetrics::default(),
            state: Mutex::new(PollerState {
                run: RunState::NotStarted,
                active_polls: 0,
                target: None,
                queue_listener: None,
                topic_listener: None,
                shutdown: None,
            }),
            state_changed: Condvar::new(),
        }
    }

    pub fn with_topic_registry(mut self, registry: Arc<DestinationRegistry>) -> Self {
        self.topic_registry = Some(registry);
        self
    }

    pub fn with_settings(mut self, settings: PollerSettings) -> Self {
        self.failure_log = failure_log(&settings, &self.clock);
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn StatsClock>) -> Self {
        self.failure_log = failure_log(&self.settings, &clock);
        self.clock = clock;
        self
    }

    /// Runtime the poll schedule is spawned on; defaults to the runtime
    /// current at [`start`](Self::start).
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn PollerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn broker(&self) -> &BrokerId {
        &self.broker
    }

    pub fn run_state(&self) -> RunState {
        self.state.lock().run
    }

    pub fn is_poll_active(&self) -> bool {
        self.state.lock().active_polls > 0
    }

    pub fn current_target(&self) -> Option<Arc<PollTarget>> {
        self.state.lock().target.clone()
    }

    pub fn metrics(&self) -> PollerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Starts polling. Does nothing if the poller was already started or
    /// has been stopped.
    ///
    /// Registers for destination changes, builds the initial target, and
    /// schedules [`poll_once`](Self::poll_once) every polling interval, the
    /// first run immediately.
    pub fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let runtime = {
            let mut state = self.state.lock();
            if state.run != RunState::NotStarted {
                debug!(broker = %self.broker, state = ?state.run, "ignoring start");
                return Ok(());
            }
            let runtime = self
                .runtime
                .clone()
                .or_else(|| Handle::try_current().ok())
                .ok_or(MonitorError::NoRuntime)?;
            state.run = RunState::Started;

            let events: Arc<dyn DestinationRegistryListener> = Arc::new(DestinationEvents {
                poller: Arc::downgrade(self),
            });
            state.queue_listener = Some(self.queue_registry.add_listener(Arc::clone(&events)));
            state.topic_listener = self
                .topic_registry
                .as_ref()
                .map(|registry| registry.add_listener(Arc::clone(&events)));

            state.target = Some(Arc::new(self.build_target()));
            state.shutdown = Some(shutdown_tx);
            runtime
        };

        info!(
            broker = %self.broker,
            interval_ms = self.settings.polling_interval.as_millis() as u64,
            "starting broker poller"
        );
        runtime.spawn(Arc::clone(self).run_schedule(shutdown_rx));
        Ok(())
    }

    /// Stops future cycles and wakes [`wait_until_stopped`](Self::wait_until_stopped).
    ///
    /// Safe before `start` (which then never takes effect) and idempotent.
    pub fn stop(&self) {
        let (shutdown, queue_listener, topic_listener) = {
            let mut state = self.state.lock();
            if state.run == RunState::Stopped {
                return;
            }
            state.run = RunState::Stopped;
            (
                state.shutdown.take(),
                state.queue_listener.take(),
                state.topic_listener.take(),
            )
        };

        if let Some(shutdown) = shutdown {
            // No receiver left just means the schedule already ended.
            let _ = shutdown.send(());
        }
        if let Some(id) = queue_listener {
            self.queue_registry.remove_listener(id);
        }
        if let (Some(id), Some(registry)) = (topic_listener, self.topic_registry.as_ref()) {
            registry.remove_listener(id);
        }

        debug!(broker = %self.broker, "broker poller stopped");
        self.state_changed.notify_all();
    }

    /// Blocks until `stop` has been called and no poll cycle is active.
    ///
    /// A cycle counts as inactive once its fetch has finished, so the last
    /// cycle's delivery to the listener may still be running on return.
    pub fn wait_until_stopped(&self) {
        self.wait_stopped(None);
    }

    /// Like [`wait_until_stopped`](Self::wait_until_stopped) but gives up
    /// after `timeout`. Returns `true` if the poller fully stopped.
    pub fn wait_until_stopped_timeout(&self, timeout: Duration) -> bool {
        self.wait_stopped(Some(Instant::now() + timeout))
    }

    fn wait_stopped(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock();

        // Two separate conditions, each re-checked after every wakeup: a
        // cycle can begin after stop was observed but before the second wait.
        while state.run != RunState::Stopped {
            self.hooks.on_wait_for_stop();
            if !self.wait_step(&mut state, deadline) {
                return state.run == RunState::Stopped && state.active_polls == 0;
            }
        }

        while state.active_polls > 0 {
            self.hooks.on_wait_for_poll_inactive();
            if !self.wait_step(&mut state, deadline) {
                return state.active_polls == 0;
            }
        }

        true
    }

    fn wait_step(
        &self,
        state: &mut parking_lot::MutexGuard<'_, PollerState>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            None => {
                self.state_changed.wait(state);
                true
            }
            Some(deadline) => !self.state_changed.wait_until(state, deadline).timed_out(),
        }
    }

    /// Runs one poll cycle against the current target.
    ///
    /// Fetch failures are logged (throttled) and swallowed. The target's
    /// result storage is delivered to the listener either way. Unlike the
    /// scheduled cycles this runs in any run state.
    pub async fn poll_once(&self) {
        self.run_cycle(false).await;
    }

    /// Returns `false` if a scheduled cycle was skipped because the poller
    /// is no longer started.
    async fn run_cycle(&self, scheduled: bool) -> bool {
        self.hooks.on_poll_start();

        let (target, _active) = {
            let mut state = self.state.lock();
            // Checked under the same guard that marks the cycle active, so a
            // stop observed by a waiter can never be followed by a scheduled
            // fetch.
            if scheduled && state.run != RunState::Started {
                debug!(broker = %self.broker, "poller stopped; skipping scheduled cycle");
                return false;
            }
            let Some(target) = state.target.clone() else {
                debug!(broker = %self.broker, "no poll target yet; skipping cycle");
                return true;
            };
            state.active_polls += 1;
            (target, ActivePoll { poller: self })
        };
        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);

        self.hooks.before_fetch();
        let outcome = self.source.fetch(&target).await;
        self.hooks.after_fetch();

        match outcome {
            Ok(package) => {
                target.store(package);
                if self.failing.swap(false, Ordering::Relaxed) {
                    info!(broker = %self.broker, "broker poll recovered");
                    self.failure_log.clear();
                }
            }
            Err(err) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                self.failing.store(true, Ordering::Relaxed);
                self.failure_log
                    .warn(&format!("poll of broker {} failed", self.broker), &err);
            }
        }

        drop(_active);
        self.on_poll_complete(&target);
        true
    }

    fn on_poll_complete(&self, target: &PollTarget) {
        let results = target.results();

        self.listener.on_poll_complete(&results);
        self.metrics.deliveries.fetch_add(1, Ordering::Relaxed);

        self.log_stats_with_rate_limit(&results);
    }

    fn log_stats_with_rate_limit(&self, results: &BrokerStatsPackage) {
        let now = self.clock.now_ms();
        let limit = self.settings.stats_log_interval.as_millis() as u64;

        {
            let mut last = self.last_stats_log.lock();
            if let Some(previous) = *last {
                if now.saturating_sub(previous) < limit {
                    debug!(now, last_update = previous, limit, "skipping stats log");
                    return;
                }
            }
            *last = Some(now);
        }

        self.stats_logger.log_stats(results);
        self.metrics.stats_logs.fetch_add(1, Ordering::Relaxed);
    }

    async fn run_schedule(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(self.settings.polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            if !self.run_cycle(true).await {
                break;
            }
        }

        debug!(broker = %self.broker, "poll schedule ended");
    }

    fn on_destination_added(&self, name: &str) {
        debug!(broker = %self.broker, destination = %name, "destination added; rebuilding poll target");
        self.rebuild_target();
    }

    fn on_destination_removed(&self, name: &str) {
        debug!(broker = %self.broker, destination = %name, "destination removed; rebuilding poll target");
        self.rebuild_target();
    }

    /// Replaces the current target with one built from the registries' full
    /// current contents.
    fn rebuild_target(&self) {
        let previous = {
            let mut state = self.state.lock();
            if state.run != RunState::Started {
                return;
            }
            let fresh = Arc::new(self.build_target());
            state.target.replace(fresh)
        };
        self.metrics.target_rebuilds.fetch_add(1, Ordering::Relaxed);

        // Released outside the lock; the source may tear down connections.
        if let Some(previous) = previous {
            self.source.release_target(&previous);
        }
    }

    fn build_target(&self) -> PollTarget {
        let queues = self.queue_registry.keys();
        let topics = self
            .topic_registry
            .as_ref()
            .map(|registry| registry.keys())
            .unwrap_or_default();

        PollTarget::new(self.broker.clone(), queues, topics)
    }
}

fn failure_log(settings: &PollerSettings, clock: &Arc<dyn StatsClock>) -> LogThrottle {
    LogThrottle::new(
        settings.throttle_initial_quiet,
        settings.throttle_max_quiet,
        Arc::clone(clock),
    )
}

/// Marks one cycle active for as long as it lives, so a cycle abandoned
/// mid-fetch still releases `wait_until_stopped`.
struct ActivePoll<'a> {
    poller: &'a BrokerPoller,
}

impl Drop for ActivePoll<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.poller.state.lock();
            state.active_polls -= 1;
        }
        self.poller.state_changed.notify_all();
    }
}

/// Registry listener holding only a weak reference, so registration does
/// not keep a forgotten poller alive.
struct DestinationEvents {
    poller: Weak<BrokerPoller>,
}

impl DestinationRegistryListener for DestinationEvents {
    fn on_put_entry(&self, name: &str, _state: &DestinationState) {
        if let Some(poller) = self.poller.upgrade() {
            poller.on_destination_added(name);
        }
    }

    fn on_remove_entry(&self, name: &str, _state: &DestinationState) {
        if let Some(poller) = self.poller.upgrade() {
            poller.on_destination_removed(name);
        }
    }
}
