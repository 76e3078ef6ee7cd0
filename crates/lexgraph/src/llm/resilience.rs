//! Call protection for external model providers: exponential backoff with
//! full jitter, and a consecutive-failure circuit breaker.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::error::CoreError;

/// Compute an exponential backoff delay with full jitter for retry attempts.
/// Delay for attempt k is drawn uniformly from [0, min(cap, base * 2^k)].
pub fn backoff_with_jitter(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp_ms = (base.as_millis() as u64).saturating_mul(2u64.saturating_pow(attempt));
    let capped_ms = exp_ms.min(cap.as_millis() as u64);
    // Time-based jitter seed keeps this free of a rand dependency.
    let jitter_seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let jitter_ms = if capped_ms > 0 {
        jitter_seed % capped_ms
    } else {
        0
    };
    Duration::from_millis(jitter_ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// Circuit breaker over a single collaborator.
///
/// Counts consecutive call failures. At `fail_max` the breaker opens and
/// calls fail fast with `ServiceUnavailable` until `reset_after` elapses, at
/// which point exactly one probe call is admitted. A successful probe closes
/// the breaker; a failed probe re-opens it with a fresh timer.
///
/// The mutex guards only state transitions and is never held across I/O.
pub struct CircuitBreaker {
    name: &'static str,
    fail_max: u32,
    reset_after: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, fail_max: u32, reset_after: Duration) -> Self {
        Self {
            name,
            fail_max,
            reset_after,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Ask to admit a call. `Err` means the call must fail fast without
    /// touching the collaborator.
    pub fn try_acquire(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        match *inner {
            Inner::Closed { .. } => Ok(()),
            Inner::Open { since } => {
                if since.elapsed() >= self.reset_after {
                    self.log_transition(BreakerState::Open, BreakerState::HalfOpen);
                    *inner = Inner::HalfOpen;
                    Ok(())
                } else {
                    Err(CoreError::unavailable(format!(
                        "{} circuit breaker is open",
                        self.name
                    )))
                }
            }
            // A probe is already in flight; admit nothing else.
            Inner::HalfOpen => Err(CoreError::unavailable(format!(
                "{} circuit breaker is probing",
                self.name
            ))),
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if let Inner::HalfOpen = *inner {
            self.log_transition(BreakerState::HalfOpen, BreakerState::Closed);
        }
        *inner = Inner::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.fail_max {
                    self.log_transition(BreakerState::Closed, BreakerState::Open);
                    *inner = Inner::Open {
                        since: Instant::now(),
                    };
                } else {
                    *inner = Inner::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            Inner::HalfOpen => {
                self.log_transition(BreakerState::HalfOpen, BreakerState::Open);
                *inner = Inner::Open {
                    since: Instant::now(),
                };
            }
            // Failure reported by a call admitted before the breaker opened.
            Inner::Open { .. } => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        match *self.inner.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen => BreakerState::HalfOpen,
        }
    }

    fn log_transition(&self, old: BreakerState, new: BreakerState) {
        tracing::warn!(
            breaker = self.name,
            old_state = old.as_str(),
            new_state = new.as_str(),
            "circuit_breaker_state_change"
        );
    }
}
