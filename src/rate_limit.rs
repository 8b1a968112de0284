//! Token-bucket limiter for outbound request pacing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Caps acquisitions at `max_per_period` per `period`, waiting rather than rejecting.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateState>>,
    capacity: f64,
    refill_per_sec: f64,
}

struct RateState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Returns `None` when either bound is zero, meaning "unlimited".
    pub fn new(max_per_period: u32, period: Duration) -> Option<Self> {
        if max_per_period == 0 || period.is_zero() {
            return None;
        }
        let capacity = max_per_period as f64;
        Some(Self {
            state: Arc::new(Mutex::new(RateState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_per_sec: capacity / period.as_secs_f64(),
        })
    }

    /// Takes one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut guard = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(guard.last_refill).as_secs_f64();
                guard.last_refill = now;
                guard.tokens = (guard.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                if guard.tokens >= 1.0 {
                    guard.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - guard.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_bounds_disable_limiting() {
        assert!(RateLimiter::new(0, Duration::from_secs(1)).is_none());
        assert!(RateLimiter::new(5, Duration::ZERO).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_once_the_burst_is_spent() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1)).unwrap();
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(490));
    }
}
