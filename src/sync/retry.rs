//! Fixed-delay retry around a single provider call
//!
//! Every provider call is wrapped in a bounded retry loop with a constant
//! pause between attempts. Exceeding the budget yields
//! [`SyncError::ExhaustedRetries`] carrying the last error observed.

use crate::config::RetryConfig;
use crate::error::{RetryableError, SyncError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt budget and pause of one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` attempts (at least one), `delay` apart
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Total attempts allowed, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause between two attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `call` under this policy
    pub async fn run<F, Fut, T>(&self, call: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        with_retry(self.max_attempts, self.delay, call).await
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Run `call` until it succeeds or `max_attempts` attempts have failed
///
/// Non-retryable errors are returned as they are, without waiting.
pub async fn with_retry<F, Fut, T>(
    max_attempts: u32,
    delay: Duration,
    mut call: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Provider call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Provider call failed"
        );

        if attempt >= max_attempts {
            return Err(SyncError::ExhaustedRetries {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Call double replaying a fixed sequence of outcomes
    struct Script {
        outcomes: Mutex<VecDeque<Result<u32, SyncError>>>,
        calls: Mutex<u32>,
    }

    impl Script {
        fn new(outcomes: Vec<Result<u32, SyncError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            }
        }

        /// Every call fails with `err`
        fn failing(err: SyncError, times: usize) -> Self {
            Self::new(vec![Err(err); times])
        }

        async fn call(&self) -> Result<u32, SyncError> {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(SyncError::Network("script exhausted".into())))
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    fn immediate(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    // Test 1: First success is returned without retrying
    #[tokio::test]
    async fn test_first_success() {
        let script = Script::new(vec![Ok(7)]);

        let result = immediate(3).run(|| script.call()).await;

        assert_eq!(result, Ok(7));
        assert_eq!(script.calls(), 1);
    }

    // Test 2: Transient failures are absorbed by the budget
    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let script = Script::new(vec![
            Err(SyncError::NetworkTimeout),
            Err(SyncError::BadUpstreamResponse("length mismatch".into())),
            Err(SyncError::RateLimited(60)),
            Ok(42),
        ]);

        let result = immediate(5).run(|| script.call()).await;

        assert_eq!(result, Ok(42));
        assert_eq!(script.calls(), 4);
    }

    // Test 3: Exactly max_attempts calls before ExhaustedRetries
    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let script = Script::failing(SyncError::UpstreamStatus(500), 10);

        let result = immediate(3).run(|| script.call()).await;

        assert_eq!(
            result,
            Err(SyncError::ExhaustedRetries {
                attempts: 3,
                last: Box::new(SyncError::UpstreamStatus(500)),
            })
        );
        assert_eq!(script.calls(), 3);
    }

    // Test 4: Configuration errors stop at once
    #[tokio::test]
    async fn test_configuration_error_not_retried() {
        let script = Script::failing(SyncError::Configuration("missing key".into()), 5);

        let result = immediate(5).run(|| script.call()).await;

        assert!(matches!(result, Err(SyncError::Configuration(_))));
        assert_eq!(script.calls(), 1);
    }

    // Test 5: A zero budget still makes one attempt
    #[tokio::test]
    async fn test_zero_budget_makes_one_attempt() {
        let script = Script::failing(SyncError::Unauthorized, 5);

        let result = with_retry(0, Duration::ZERO, || script.call()).await;

        assert!(matches!(
            result,
            Err(SyncError::ExhaustedRetries { attempts: 1, .. })
        ));
        assert_eq!(script.calls(), 1);
        assert_eq!(immediate(0).max_attempts(), 1);
    }

    // Test 6: The pause is constant between attempts
    #[tokio::test]
    async fn test_fixed_pause_between_attempts() {
        let script = Script::failing(SyncError::ConnectionRefused, 3);
        let started = std::time::Instant::now();

        let result = RetryPolicy::new(3, Duration::from_millis(20))
            .run(|| script.call())
            .await;

        assert!(result.is_err());
        // two pauses between three attempts
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    // Test 7: Policy built from configuration
    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 60);
        assert_eq!(policy.delay(), Duration::from_secs(1));

        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 4,
            delay_ms: 60_000,
        });
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay(), Duration::from_secs(60));
    }
}
