//! Suppression of identical, repeating warnings.
//!
//! A broker that stays down fails every poll cycle. The first failure is
//! logged immediately; the same message is then held back for a quiet period
//! that doubles after each emitted repeat, up to a ceiling. Emitted repeats
//! report how many occurrences were swallowed.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::core::clock::StatsClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Emit { suppressed: u64 },
    Suppress,
}

#[derive(Debug)]
struct Repeat {
    key: String,
    last_emit_ms: u64,
    quiet_ms: u64,
    suppressed: u64,
}

pub struct LogThrottle {
    initial_quiet_ms: u64,
    max_quiet_ms: u64,
    clock: Arc<dyn StatsClock>,
    last: Mutex<Option<Repeat>>,
}

impl std::fmt::Debug for LogThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogThrottle")
            .field("initial_quiet_ms", &self.initial_quiet_ms)
            .field("max_quiet_ms", &self.max_quiet_ms)
            .field("last", &*self.last.lock())
            .finish()
    }
}

impl LogThrottle {
    pub fn new(initial_quiet: Duration, max_quiet: Duration, clock: Arc<dyn StatsClock>) -> Self {
        let initial_quiet_ms = initial_quiet.as_millis() as u64;
        Self {
            initial_quiet_ms,
            max_quiet_ms: (max_quiet.as_millis() as u64).max(initial_quiet_ms),
            clock,
            last: Mutex::new(None),
        }
    }

    /// Decides whether a message with this key should be written now.
    pub fn check(&self, key: &str) -> ThrottleDecision {
        let now = self.clock.now_ms();
        let mut last = self.last.lock();

        match last.as_mut() {
            Some(repeat) if repeat.key == key => {
                if now.saturating_sub(repeat.last_emit_ms) < repeat.quiet_ms {
                    repeat.suppressed += 1;
                    return ThrottleDecision::Suppress;
                }

                let suppressed = repeat.suppressed;
                repeat.last_emit_ms = now;
                repeat.quiet_ms = (repeat.quiet_ms.saturating_mul(2)).min(self.max_quiet_ms);
                repeat.suppressed = 0;
                ThrottleDecision::Emit { suppressed }
            }
            _ => {
                *last = Some(Repeat {
                    key: key.to_string(),
                    last_emit_ms: now,
                    quiet_ms: self.initial_quiet_ms,
                    suppressed: 0,
                });
                ThrottleDecision::Emit { suppressed: 0 }
            }
        }
    }

    /// Logs `message: detail` at WARN unless it is a suppressed repeat.
    pub fn warn(&self, message: &str, detail: &dyn Display) -> bool {
        let text = format!("{message}: {detail}");
        match self.check(&text) {
            ThrottleDecision::Emit { suppressed: 0 } => {
                warn!("{}", text);
                true
            }
            ThrottleDecision::Emit { suppressed } => {
                warn!(suppressed, "{} (repeated)", text);
                true
            }
            ThrottleDecision::Suppress => false,
        }
    }

    /// Forgets the last message so the next one is logged immediately.
    pub fn clear(&self) {
        *self.last.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    fn throttle() -> (LogThrottle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let throttle = LogThrottle::new(
            Duration::from_secs(10),
            Duration::from_secs(40),
            clock.clone(),
        );
        (throttle, clock)
    }

    #[test]
    fn repeats_back_off_exponentially() {
        let (throttle, clock) = throttle();

        assert_eq!(throttle.check("down"), ThrottleDecision::Emit { suppressed: 0 });
        for _ in 0..3 {
            clock.advance(3_000);
            assert_eq!(throttle.check("down"), ThrottleDecision::Suppress);
        }

        clock.advance(1_000);
        assert_eq!(throttle.check("down"), ThrottleDecision::Emit { suppressed: 3 });

        // Quiet period is now 20s.
        clock.advance(19_000);
        assert_eq!(throttle.check("down"), ThrottleDecision::Suppress);
        clock.advance(1_000);
        assert_eq!(throttle.check("down"), ThrottleDecision::Emit { suppressed: 1 });

        // 40s, then capped at 40s.
        clock.advance(40_000);
        assert_eq!(throttle.check("down"), ThrottleDecision::Emit { suppressed: 0 });
        clock.advance(40_000);
        assert_eq!(throttle.check("down"), ThrottleDecision::Emit { suppressed: 0 });
    }

    #[test]
    fn different_message_resets() {
        let (throttle, clock) = throttle();

        assert!(matches!(throttle.check("a"), ThrottleDecision::Emit { .. }));
        clock.advance(1);
        assert_eq!(throttle.check("a"), ThrottleDecision::Suppress);
        assert_eq!(throttle.check("b"), ThrottleDecision::Emit { suppressed: 0 });
        assert_eq!(throttle.check("a"), ThrottleDecision::Emit { suppressed: 0 });
    }

    #[test]
    fn clear_forgets_history() {
        let (throttle, _clock) = throttle();
        assert!(throttle.warn("poll failed", &"unreachable"));
        assert!(!throttle.warn("poll failed", &"unreachable"));
        throttle.clear();
        assert!(throttle.warn("poll failed", &"unreachable"));
    }
}
