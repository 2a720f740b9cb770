//! Token-bucket rate limiter for outgoing remote calls.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::QuotaConfig;

/// A token bucket.
///
/// Holds up to `capacity` tokens and refills continuously at
/// `refill_per_sec`. [`acquire`](Self::acquire) takes one token, suspending
/// until one is available. Waiters are served in arrival order.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket that starts full.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A bucket allowing `per_minute` calls per minute with bursts of `burst`.
    pub fn per_minute(per_minute: u32, burst: u32) -> Self {
        Self::new(burst, f64::from(per_minute) / 60.0)
    }

    pub fn from_config(config: &QuotaConfig) -> Option<Self> {
        (config.per_minute > 0).then(|| Self::per_minute(config.per_minute, config.burst))
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Take one token, waiting for the bucket to refill if it is empty.
    pub async fn acquire(&self) {
        // Holding the lock while sleeping keeps later callers queued behind
        // this one.
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens < 1.0 {
            let missing = 1.0 - state.tokens;
            let wait = Duration::from_secs_f64(missing / self.refill_per_sec);
            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
            self.refill(&mut state);
        }
        state.tokens = (state.tokens - 1.0).max(0.0);
    }

    /// Take one token if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
