//! Minimum-interval rate limiter for a single provider.
//!
//! Callers reserve the next free slot under a short lock and then sleep
//! until it outside the lock. Concurrent callers therefore queue up at
//! `min_interval` spacing without anyone holding the lock while waiting.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

#[derive(Debug)]
struct Gate {
    min_interval: Duration,
    /// Start time of the most recently reserved call.
    last_slot: Option<Instant>,
}

/// Spaces calls into one provider at least `min_interval` apart.
///
/// A zero interval disables the gate.
pub struct RateLimiter {
    provider: &'static str,
    gate: Mutex<Gate>,
}

impl RateLimiter {
    pub fn new(provider: &'static str, min_interval: Duration) -> Self {
        Self {
            provider,
            gate: Mutex::new(Gate {
                min_interval,
                last_slot: None,
            }),
        }
    }

    /// Lock the gate mutex, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is one slightly early call,
    /// which is better than panicking.
    fn lock_gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn min_interval(&self) -> Duration {
        self.lock_gate().min_interval
    }

    pub fn set_min_interval(&self, min_interval: Duration) {
        self.lock_gate().min_interval = min_interval;
    }

    /// Reserve the next slot at or after `now` and return it.
    fn reserve(&self, now: Instant) -> Instant {
        let mut gate = self.lock_gate();
        if gate.min_interval.is_zero() {
            gate.last_slot = Some(now);
            return now;
        }
        let slot = match gate.last_slot {
            Some(last) => (last + gate.min_interval).max(now),
            None => now,
        };
        gate.last_slot = Some(slot);
        slot
    }

    /// Wait until this caller may call the provider.
    pub async fn acquire(&self) {
        let now = Instant::now();
        let slot = self.reserve(now);
        if slot > now {
            debug!(
                "Rate limiter: waiting {:?} for provider '{}'",
                slot - now,
                self.provider
            );
            tokio::time::sleep_until(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_immediate() {
        let limiter = RateLimiter::new("TEST_PROVIDER", Duration::from_millis(500));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_calls_are_spaced() {
        let limiter = RateLimiter::new("TEST_PROVIDER", Duration::from_millis(500));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now() - start, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_spaced() {
        let limiter = Arc::new(RateLimiter::new("TEST_PROVIDER", Duration::from_millis(200)));
        let start = Instant::now();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();

        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(200));
        }
        assert_eq!(*times.last().unwrap() - start, Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_counts_toward_interval() {
        let limiter = RateLimiter::new("TEST_PROVIDER", Duration::from_millis(500));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_waits() {
        let limiter = RateLimiter::new("TEST_PROVIDER", Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_can_be_changed() {
        let limiter = RateLimiter::new("TEST_PROVIDER", Duration::from_millis(100));
        limiter.set_min_interval(Duration::from_secs(1));
        assert_eq!(limiter.min_interval(), Duration::from_secs(1));

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now() - start, Duration::from_secs(1));
    }
}
