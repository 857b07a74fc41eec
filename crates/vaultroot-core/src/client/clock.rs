//! Time and randomness sources for the retry loop.
//!
//! Both are injectable so backoff timing can be tested without real sleeps.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic clock and scheduler
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by tokio's timer (honors `tokio::time::pause` in tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Source of jitter samples in `[0.0, 1.0)`
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Hash-based jitter: mixes a counter with the wall clock
#[derive(Debug, Default)]
pub struct HashJitter {
    counter: AtomicU64,
}

impl JitterSource for HashJitter {
    fn sample(&self) -> f64 {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);

        let mut hasher = DefaultHasher::new();
        n.hash(&mut hasher);
        nanos.hash(&mut hasher);
        (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Constant jitter, for deterministic schedules
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0.clamp(0.0, 1.0 - f64::EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_jitter_range() {
        let jitter = HashJitter::default();
        for _ in 0..1000 {
            let s = jitter.sample();
            assert!((0.0..1.0).contains(&s), "sample {} out of range", s);
        }
    }

    #[test]
    fn test_fixed_jitter_clamped() {
        assert_eq!(FixedJitter(0.25).sample(), 0.25);
        assert!(FixedJitter(3.0).sample() < 1.0);
        assert_eq!(FixedJitter(-1.0).sample(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_sleep_advances_paused_time() {
        let clock = TokioClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(30)).await;
        assert!(clock.now() - start >= Duration::from_secs(30));
    }
}
