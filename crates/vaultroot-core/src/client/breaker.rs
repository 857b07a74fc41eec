//! Circuit breaker shared by every call of a `ContentClient`.
//!
//! The state lives behind a `std::sync::Mutex` that is only held for the duration
//! of a transition; callers get a `BreakerPermit` and report the outcome after the
//! network call has finished.

use crate::config::BreakerConfig;
use crate::error::{Result, VaultRootError};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Closed -> Open -> HalfOpen -> Closed|Open
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State is plain data, a poisoned lock still holds a usable value
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Ask permission to call the remote.
    ///
    /// Fails fast with `CircuitOpen` while open, and while a half-open trial call is
    /// already in flight.
    pub fn try_acquire(&self, now: Instant) -> Result<BreakerPermit<'_>> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(BreakerPermit::new(self, false)),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.cooldown {
                    tracing::info!("Circuit half-open, allowing trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                } else {
                    Err(VaultRootError::CircuitOpen {
                        retry_in: self.cooldown - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(VaultRootError::CircuitOpen {
                        retry_in: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!("Circuit closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn record_failure(&self, now: Instant) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;

        let should_open = inner.state == CircuitState::HalfOpen
            || (inner.state == CircuitState::Closed
                && inner.consecutive_failures >= self.failure_threshold);

        if should_open {
            tracing::warn!(
                "Circuit opened after {} consecutive failures (cooldown {:?})",
                inner.consecutive_failures,
                self.cooldown
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// Outcome slot for one permitted call.
///
/// Dropping an unreported trial permit (e.g. the call was cancelled by a deadline)
/// frees the half-open slot without changing state.
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    reported: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            reported: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.reported = true;
        self.breaker.record_success();
    }

    pub fn fail(mut self, now: Instant) {
        self.reported = true;
        self.breaker.record_failure(now);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.reported {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            failure_threshold: threshold,
            cooldown_ms,
        })
    }

    #[test]
    fn test_opens_after_threshold() {
        let b = breaker(3, 1_000);
        let now = Instant::now();

        for _ in 0..2 {
            b.try_acquire(now).unwrap().fail(now);
            assert_eq!(b.state(), CircuitState::Closed);
        }
        b.try_acquire(now).unwrap().fail(now);
        assert_eq!(b.state(), CircuitState::Open);

        let err = b.try_acquire(now).unwrap_err();
        assert!(matches!(err, VaultRootError::CircuitOpen { .. }));
    }

    #[test]
    fn test_success_resets_streak() {
        let b = breaker(2, 1_000);
        let now = Instant::now();
        b.try_acquire(now).unwrap().fail(now);
        b.try_acquire(now).unwrap().succeed();
        b.try_acquire(now).unwrap().fail(now);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 1);
    }

    #[test]
    fn test_half_open_after_cooldown_single_trial() {
        let b = breaker(1, 1_000);
        let now = Instant::now();
        b.try_acquire(now).unwrap().fail(now);

        match b.try_acquire(now + Duration::from_millis(400)) {
            Err(VaultRootError::CircuitOpen { retry_in }) => {
                assert_eq!(retry_in, Duration::from_millis(600))
            }
            other => panic!("expected CircuitOpen, got {:?}", other.map(|_| ())),
        }

        let later = now + Duration::from_millis(1_000);
        let trial = b.try_acquire(later).unwrap();
        assert!(trial.is_trial());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        // Second caller is rejected while the trial is in flight
        assert!(b.try_acquire(later).is_err());

        trial.succeed();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire(later).is_ok());
    }

    #[test]
    fn test_failed_trial_reopens() {
        let b = breaker(1, 1_000);
        let now = Instant::now();
        b.try_acquire(now).unwrap().fail(now);

        let later = now + Duration::from_secs(2);
        b.try_acquire(later).unwrap().fail(later);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.try_acquire(later + Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_dropped_trial_frees_slot() {
        let b = breaker(1, 100);
        let now = Instant::now();
        b.try_acquire(now).unwrap().fail(now);

        let later = now + Duration::from_millis(200);
        {
            let _trial = b.try_acquire(later).unwrap();
        }
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.try_acquire(later).unwrap().is_trial());
    }
}
