//! Rate limiting for evaluator calls.
//!
//! Two mechanisms share one clock:
//! - fixed spacing of `60 / requests_per_minute` seconds between granted slots
//! - coordinated backoff after the evaluator reports a quota error, growing
//!   as 2^hits seconds (capped at 64s) and cleared by the next success
//!
//! The state sits behind a tokio mutex held across the wait, so callers are
//! granted slots in arrival order.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct RateLimitState {
    /// When the last slot was granted
    last_slot: Option<Instant>,
    /// No slot before this instant (None = no active backoff)
    backoff_until: Option<Instant>,
    /// Consecutive quota errors since the last success
    consecutive_hits: u32,
}

/// Global limiter in front of the evaluator
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    interval: Duration,
    state: Mutex<RateLimitState>,
}

impl RateLimiter {
    /// `requests_per_minute = 0` disables spacing
    pub fn new(requests_per_minute: u32) -> Self {
        let interval = if requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / requests_per_minute as f64)
        };
        Self {
            requests_per_minute,
            interval,
            state: Mutex::new(RateLimitState::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Human label, e.g. "10/min"
    pub fn label(&self) -> String {
        format!("{}/min", self.requests_per_minute)
    }

    /// Wait until a slot is available, then claim it
    pub async fn await_slot(&self) {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        let mut ready = state.last_slot.map(|t| t + self.interval).unwrap_or(now);
        if let Some(until) = state.backoff_until {
            ready = ready.max(until);
        }

        if ready > now {
            tracing::debug!(wait_ms = (ready - now).as_millis() as u64, "Waiting for evaluator slot");
            tokio::time::sleep_until(ready).await;
        }

        state.last_slot = Some(Instant::now());
    }

    /// Record a quota/rate-limit response from the evaluator
    ///
    /// The next slot is pushed out by the larger of `retry_after` and
    /// 2^consecutive_hits seconds (capped at 64s).
    pub async fn record_rate_limit(&self, retry_after: Duration) {
        let mut state = self.state.lock().await;
        state.consecutive_hits += 1;

        let exp_backoff = Duration::from_secs(2u64.pow(state.consecutive_hits.min(6)));
        let delay = retry_after.max(exp_backoff);
        state.backoff_until = Some(Instant::now() + delay);

        tracing::warn!(
            backoff_secs = delay.as_secs(),
            consecutive_hits = state.consecutive_hits,
            "Evaluator rate limited, backing off"
        );
    }

    /// Record a successful evaluator call, clearing any backoff
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_hits = 0;
        state.backoff_until = None;
    }

    pub async fn consecutive_hits(&self) -> u32 {
        self.state.lock().await.consecutive_hits
    }

    /// Remaining backoff, if one is active
    pub async fn remaining_backoff(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        state.backoff_until.and_then(|until| {
            let now = Instant::now();
            if now < until { Some(until - now) } else { None }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_interval_from_rpm() {
        assert_eq!(RateLimiter::new(6).interval(), Duration::from_secs(10));
        assert_eq!(RateLimiter::new(10).interval(), Duration::from_secs(6));
        assert_eq!(RateLimiter::new(0).interval(), Duration::ZERO);
        assert_eq!(RateLimiter::new(10).label(), "10/min");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_are_spaced() {
        let limiter = RateLimiter::new(6);
        let start = Instant::now();

        let mut granted = Vec::new();
        for _ in 0..3 {
            limiter.await_slot().await;
            granted.push(Instant::now());
        }

        assert_eq!(granted[0] - start, Duration::ZERO);
        assert!(granted[2] - granted[0] >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_serialized() {
        let limiter = Arc::new(RateLimiter::new(60));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.await_slot().await;
                    Instant::now()
                })
            })
            .collect();

        let mut times = Vec::new();
        for h in handles {
            times.push(h.await.unwrap());
        }
        times.sort();

        assert!(times[2] - start >= Duration::from_secs(2));
        assert!(times[1] - times[0] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backoff_delays_next_slot() {
        let limiter = RateLimiter::new(0);
        limiter.record_rate_limit(Duration::ZERO).await;
        assert_eq!(limiter.consecutive_hits().await, 1);

        let start = Instant::now();
        limiter.await_slot().await;
        // 2^1 seconds
        assert!(Instant::now() - start >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_wins_when_larger() {
        let limiter = RateLimiter::new(0);
        limiter.record_rate_limit(Duration::from_secs(30)).await;
        let remaining = limiter.remaining_backoff().await.unwrap();
        assert!(remaining > Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let limiter = RateLimiter::new(0);
        for _ in 0..10 {
            limiter.record_rate_limit(Duration::ZERO).await;
        }
        let remaining = limiter.remaining_backoff().await.unwrap();
        assert!(remaining <= Duration::from_secs(64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_backoff() {
        let limiter = RateLimiter::new(0);
        limiter.record_rate_limit(Duration::from_secs(5)).await;
        limiter.record_success().await;

        assert_eq!(limiter.consecutive_hits().await, 0);
        assert!(limiter.remaining_backoff().await.is_none());

        let start = Instant::now();
        limiter.await_slot().await;
        assert_eq!(Instant::now() - start, Duration::ZERO);
    }
}
