//! Retry with exponential backoff and jitter.
//!
//! A [`RetryPolicy`] is an explicit object: attempt limit, backoff curve,
//! jitter and the classifier that decides which errors are worth another
//! attempt. It never reads ambient state, so it can be tested without a
//! network.
//!
//! # Example
//!
//! ```
//! use sheetsync_server::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(5)
//!     .with_initial_delay(Duration::from_secs(2))
//!     .with_max_delay(Duration::from_secs(10));
//!
//! assert_eq!(policy.max_attempts(), 5);
//! assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
//! ```

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::remote::RemoteError;

type Classifier = Arc<dyn Fn(&RemoteError) -> bool + Send + Sync>;

/// How many times to try, how long to wait between tries, and what to retry.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    classifier: Classifier,
}

/// A call that did not succeed.
#[derive(Debug, Clone)]
pub struct Failure {
    /// The last error seen
    pub error: RemoteError,
    /// Attempts made, including the failed one
    pub attempts: u32,
    /// True if the error was retryable and the attempt budget ran out
    pub exhausted: bool,
}

impl RetryPolicy {
    /// A policy making at most `max_attempts` attempts in total.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
            classifier: Arc::new(RemoteError::is_transient),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts)
            .with_initial_delay(Duration::from_millis(config.initial_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_multiplier(config.multiplier)
            .with_jitter(config.jitter)
    }

    /// Retry immediately, without waiting. For tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts)
            .with_initial_delay(Duration::ZERO)
            .with_max_delay(Duration::ZERO)
            .with_jitter(false)
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the rule deciding which errors are retried.
    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&RemoteError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, error: &RemoteError) -> bool {
        (self.classifier)(error)
    }

    /// Delay before attempt `attempt` (0-indexed). The first attempt has none.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        // `min` discards NaN; a negative curve waits not at all.
        let delay = base.min(self.max_delay.as_secs_f64()).max(0.0);

        if self.jitter && delay > 0.0 {
            // up to 25% extra
            let jitter = delay * 0.25 * rand::thread_rng().gen_range(0.0..=1.0);
            Duration::from_secs_f64(delay + jitter)
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// Run `call` until it succeeds, fails permanently, or the attempt budget
    /// is spent. Returns the value and the number of attempts it took.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<(T, u32), Failure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            "Operation '{}' succeeded after {} attempts",
                            operation, attempt
                        );
                    }
                    return Ok((value, attempt));
                }
                Err(error) if !self.is_retryable(&error) => {
                    return Err(Failure {
                        error,
                        attempts: attempt,
                        exhausted: false,
                    });
                }
                Err(error) if attempt >= self.max_attempts => {
                    warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Giving up",
                        operation, attempt, self.max_attempts, error
                    );
                    return Err(Failure {
                        error,
                        attempts: attempt,
                        exhausted: true,
                    });
                }
                Err(error) => {
                    let delay = self
                        .delay_for_attempt(attempt)
                        .max(error.retry_after().unwrap_or_default());
                    warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation, attempt, self.max_attempts, error, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_curve() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1))
            .with_jitter(false);

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter(true);

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn degenerate_multipliers_never_panic() {
        for multiplier in [-3.0, f64::NAN, f64::INFINITY] {
            let policy = RetryPolicy::new(5)
                .with_initial_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(1))
                .with_multiplier(multiplier);
            for attempt in 1..5 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay <= Duration::from_millis(1250));
            }
        }
    }

    #[tokio::test]
    async fn exhausts_after_exactly_max_attempts() {
        let policy = RetryPolicy::immediate(4);
        let calls = AtomicU32::new(0);

        let result: Result<((), u32), Failure> = policy
            .run("read", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Timeout) }
            })
            .await;

        let failure = result.unwrap_err();
        assert!(failure.exhausted);
        assert_eq!(failure.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::immediate(4);
        let calls = AtomicU32::new(0);

        let result: Result<((), u32), Failure> = policy
            .run("write", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::PermissionDenied("read-only".into())) }
            })
            .await;

        let failure = result.unwrap_err();
        assert!(!failure.exhausted);
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::immediate(5);
        let calls = AtomicU32::new(0);

        let (value, attempts) = policy
            .run("append", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RemoteError::Server {
                            status: 503,
                            message: "busy".into(),
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn custom_classifier() {
        let policy = RetryPolicy::immediate(3).with_classifier(|_| false);
        assert!(!policy.is_retryable(&RemoteError::Timeout));

        let calls = AtomicU32::new(0);
        let result: Result<((), u32), Failure> = policy
            .run("read", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Timeout) }
            })
            .await;
        assert_eq!(result.unwrap_err().attempts, 1);
    }
}
