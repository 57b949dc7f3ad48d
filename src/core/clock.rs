//! Monotonic millisecond clock shared by the statistics code.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;

static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Source of "stopwatch" time: milliseconds since a fixed point in the past.
///
/// Unlike wall-clock time the value never decreases, which is what the rate
/// estimators and the log rate limiters rely on.
pub trait StatsClock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Process-wide monotonic clock backed by [`Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemStatsClock;

impl StatsClock for SystemStatsClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        CLOCK_ORIGIN.elapsed().as_millis() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) -> u64 {
        self.now.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }
}

impl StatsClock for ManualClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
