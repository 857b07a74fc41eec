//! Retry policy as an explicit state machine.
//!
//! ```text
//! Idle --start--> Attempting(1) --fail--> Backoff(1, d) --elapsed--> Attempting(2) ...
//!                      |                                                 |
//!                   success                                    fail, no attempts left
//!                      v                                                 v
//!                    (done)                                          Exhausted
//! ```
//!
//! The machine never sleeps itself; the caller drives `Backoff` with its clock.

use crate::config::RetryConfig;
use crate::error::VaultRootError;
use std::time::Duration;

/// Retry parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay after the given failed attempt (1-based), before jitter
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Jittered delay: `base * (1 - jitter + jitter * sample)`
    pub fn backoff(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_backoff(attempt);
        let factor = 1.0 - self.jitter + self.jitter * sample.clamp(0.0, 1.0);
        base.mul_f64(factor)
    }
}

/// States of a single call's retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Drives one call through the retry states
#[derive(Debug)]
pub struct RetryMachine<'a> {
    policy: &'a RetryPolicy,
    state: RetryState,
}

impl<'a> RetryMachine<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Idle -> Attempting(1)
    pub fn start(&mut self) -> &RetryState {
        if self.state == RetryState::Idle {
            self.state = RetryState::Attempting { attempt: 1 };
        }
        &self.state
    }

    /// Attempting(n) -> Backoff(n, delay) | Exhausted
    ///
    /// Non-transient errors exhaust immediately. A rate-limit hint longer than the
    /// policy's maximum delay also exhausts, so the caller sees the 429 instead of
    /// waiting indefinitely.
    pub fn on_failure(&mut self, error: &VaultRootError, jitter_sample: f64) -> &RetryState {
        let attempt = match self.state {
            RetryState::Attempting { attempt } => attempt,
            _ => return &self.state,
        };

        if !error.is_transient() || attempt >= self.policy.max_attempts {
            self.state = RetryState::Exhausted { attempts: attempt };
            return &self.state;
        }

        let computed = self.policy.backoff(attempt, jitter_sample);
        let delay = match error.retry_after_hint() {
            Some(hint) if hint > self.policy.max_delay => {
                self.state = RetryState::Exhausted { attempts: attempt };
                return &self.state;
            }
            Some(hint) => hint.max(computed),
            None => computed,
        };

        self.state = RetryState::Backoff { attempt, delay };
        &self.state
    }

    /// Backoff(n) -> Attempting(n + 1)
    pub fn on_backoff_elapsed(&mut self) -> &RetryState {
        if let RetryState::Backoff { attempt, .. } = self.state {
            self.state = RetryState::Attempting {
                attempt: attempt + 1,
            };
        }
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter: 0.5,
        }
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let p = policy();
        assert_eq!(p.base_backoff(1), Duration::from_millis(100));
        assert_eq!(p.base_backoff(2), Duration::from_millis(200));
        assert_eq!(p.base_backoff(3), Duration::from_millis(400));
        assert_eq!(p.base_backoff(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy();
        assert_eq!(p.backoff(2, 0.0), Duration::from_millis(100));
        assert_eq!(p.backoff(2, 1.0), Duration::from_millis(200));
    }

    #[test]
    fn test_transient_failures_walk_to_exhausted() {
        let p = policy();
        let mut machine = RetryMachine::new(&p);
        let err = VaultRootError::Network("reset".into());

        assert_eq!(machine.start(), &RetryState::Attempting { attempt: 1 });
        assert_eq!(
            machine.on_failure(&err, 1.0),
            &RetryState::Backoff {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            machine.on_backoff_elapsed(),
            &RetryState::Attempting { attempt: 2 }
        );
        assert!(matches!(
            machine.on_failure(&err, 1.0),
            RetryState::Backoff { attempt: 2, .. }
        ));
        machine.on_backoff_elapsed();
        assert_eq!(
            machine.on_failure(&err, 1.0),
            &RetryState::Exhausted { attempts: 3 }
        );
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        let p = policy();
        let mut machine = RetryMachine::new(&p);
        machine.start();
        let err = VaultRootError::Status {
            status: 400,
            message: "bad".into(),
        };
        assert_eq!(
            machine.on_failure(&err, 0.5),
            &RetryState::Exhausted { attempts: 1 }
        );

        let mut machine = RetryMachine::new(&p);
        machine.start();
        assert_eq!(
            machine.on_failure(&VaultRootError::Auth("no".into()), 0.5),
            &RetryState::Exhausted { attempts: 1 }
        );
    }

    #[test]
    fn test_rate_limit_hint_honored() {
        let p = policy();
        let mut machine = RetryMachine::new(&p);
        machine.start();
        let err = VaultRootError::RateLimited {
            retry_after: Some(Duration::from_millis(700)),
        };
        assert_eq!(
            machine.on_failure(&err, 0.0),
            &RetryState::Backoff {
                attempt: 1,
                delay: Duration::from_millis(700)
            }
        );
    }

    #[test]
    fn test_rate_limit_hint_beyond_max_exhausts() {
        let p = policy();
        let mut machine = RetryMachine::new(&p);
        machine.start();
        let err = VaultRootError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(
            machine.on_failure(&err, 0.0),
            &RetryState::Exhausted { attempts: 1 }
        );
    }
}
