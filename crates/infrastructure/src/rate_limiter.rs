use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sms_core::config::RateLimitConfig;
use sms_core::traits::RateLimiter;
use sms_core::Clock;

const MIN_WAIT: Duration = Duration::from_millis(1);

struct BucketState {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// 令牌桶限速器，进程内所有 worker 共享
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(tokens_per_second: f64, burst: u32, clock: Arc<dyn Clock>) -> Self {
        let burst = f64::from(burst.max(1));
        let now = clock.now();
        Self {
            rate: tokens_per_second,
            burst,
            clock,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: now,
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.tokens_per_second, config.burst, clock)
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    fn try_acquire(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let elapsed = (now - state.last_refill)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - state.tokens;
        let wait = Duration::from_secs_f64(missing / self.rate);
        Err(wait.max(MIN_WAIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sms_core::ManualClock;

    #[test]
    fn test_burst_then_refill() {
        let clock = Arc::new(ManualClock::default());
        let bucket = TokenBucket::new(2.0, 3, clock.clone());

        for _ in 0..3 {
            assert!(bucket.try_acquire().is_ok());
        }
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_millis(500));
        assert!(wait >= Duration::from_millis(499));

        clock.advance(chrono::Duration::milliseconds(500));
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }

    #[test]
    fn test_refill_is_capped_at_burst() {
        let clock = Arc::new(ManualClock::default());
        let bucket = TokenBucket::new(10.0, 2, clock.clone());
        clock.advance(chrono::Duration::seconds(60));

        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }
}
