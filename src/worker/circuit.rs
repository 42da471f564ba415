//! Circuit breaker (§3 "Circuit State", §4.12 step 13, property P12).
//!
//! State checks happen without holding the lock during `compute_fn` (§5), so
//! the breaker only guards its own counters, never the wrapped call.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    phase: CircuitPhase,
    failure_count: u32,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            inner: Mutex::new(Inner {
                phase: CircuitPhase::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn phase(&self) -> CircuitPhase {
        self.inner.lock().phase
    }

    /// Returns `true` if a call may proceed; transitions `open → half_open`
    /// once the cooldown has elapsed.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.phase {
            CircuitPhase::Closed => true,
            CircuitPhase::HalfOpen => true,
            CircuitPhase::Open => {
                let elapsed = inner.last_failure.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    inner.phase = CircuitPhase::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.phase = CircuitPhase::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.phase == CircuitPhase::HalfOpen || inner.failure_count >= self.threshold {
            inner.phase = CircuitPhase::Open;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..3 {
            assert!(cb.allow_call());
            cb.record_failure();
        }
        assert_eq!(cb.phase(), CircuitPhase::Open);
        assert!(!cb.allow_call());
    }

    #[test]
    fn half_open_trial_then_close_on_success() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0));
        cb.record_failure();
        assert_eq!(cb.phase(), CircuitPhase::Open);
        assert!(cb.allow_call());
        assert_eq!(cb.phase(), CircuitPhase::HalfOpen);
        cb.record_success();
        assert_eq!(cb.phase(), CircuitPhase::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0));
        cb.record_failure();
        assert!(cb.allow_call());
        cb.record_failure();
        assert_eq!(cb.phase(), CircuitPhase::Open);
    }
}
