//! Failure-threshold circuit breaker
//!
//! Guards a synchronous call to a collaborating service. After
//! `failure_threshold` consecutive failures the breaker opens and callers
//! short-circuit to their fallback for `cool_down`; the first call after the
//! cool-down is allowed through as a probe, and a success closes the breaker
//! again.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default consecutive failures before the breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cool-down before a probe call is allowed.
pub const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(30);

#[derive(Debug)]
enum State {
    Closed { failures: u32 },
    Open { since: Instant },
}

/// A minimal circuit breaker over consecutive-failure counting.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cool_down: Duration,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cool_down: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cool_down,
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    /// Whether a call may go through right now. When the breaker is open and
    /// the cool-down has elapsed, one probe call is let through.
    pub fn allow(&self) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *state {
            State::Closed { .. } => true,
            State::Open { since } => {
                if since.elapsed() >= self.cool_down {
                    // Probe: half-open by resetting to closed with the
                    // counter one short of the threshold, so a failed probe
                    // re-opens immediately.
                    *state = State::Closed {
                        failures: self.failure_threshold - 1,
                    };
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call, closing the breaker.
    pub fn record_success(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = State::Closed { failures: 0 };
    }

    /// Record a failed call, opening the breaker once the threshold is hit.
    pub fn record_failure(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let State::Closed { failures } = *state {
            let failures = failures + 1;
            if failures >= self.failure_threshold {
                tracing::warn!(failures, "circuit breaker opened");
                *state = State::Open {
                    since: Instant::now(),
                };
            } else {
                *state = State::Closed { failures };
            }
        }
    }

    /// Whether the breaker is currently open (without probing).
    pub fn is_open(&self) -> bool {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        matches!(*state, State::Open { .. })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOL_DOWN)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow());
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn probe_allowed_after_cool_down_and_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert!(breaker.is_open());
        // Zero cool-down: the next call is the probe.
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn probe_success_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_success();
        assert!(!breaker.is_open());
        assert!(breaker.allow());
    }
}
