//! Retry policies and backoff shapes.

use crate::config::{FailoverConfig, RetryStrategy};
use crate::context::CallContext;
use crate::error::FailoverError;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// State of one orchestrated call, as seen by a retry decision.
///
/// Lives only for the duration of one `execute` call.
#[derive(Debug)]
pub struct RetryContext<'a> {
    /// The call's cancellation scope.
    pub call: &'a CallContext,
    /// Attempt index about to run (1 for the first retry).
    pub attempt: u32,
    /// Time since the call started.
    pub elapsed: Duration,
    /// Ids of instances already tried.
    pub tried: &'a HashSet<String>,
    /// The error that made this retry necessary.
    pub last_error: &'a FailoverError,
}

/// Decides whether and when to retry.
pub trait RetryPolicy: Send + Sync {
    /// Whether the attempt in `ctx` should run.
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool;

    /// The wait before the given attempt.
    fn next_backoff(&self, attempt: u32) -> Duration;

    /// Upper bound on retry attempts after the first call.
    fn max_attempts(&self) -> u32;
}

/// Retryable-error classification shared by the backoff policies.
///
/// The structured error kind is checked first; the configured substring
/// list is the compatibility fallback over the rendered message. An empty
/// list classifies every error as retryable.
fn is_retryable(error: &FailoverError, retryable: &[String]) -> bool {
    if retryable.is_empty() {
        return true;
    }
    if error.is_transient() {
        return true;
    }
    let message = error.to_string();
    retryable.iter().any(|token| message.contains(token))
}

/// Fixed-interval policy retrying any error.
pub struct SimpleRetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl SimpleRetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

impl RetryPolicy for SimpleRetryPolicy {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        ctx.attempt < self.max_attempts
    }

    fn next_backoff(&self, _attempt: u32) -> Duration {
        self.interval
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Exponentially growing backoff with error classification.
pub struct ExponentialBackoffRetryPolicy {
    max_attempts: u32,
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
    retryable: Vec<String>,
}

impl ExponentialBackoffRetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        retryable: Vec<String>,
    ) -> Self {
        Self {
            max_attempts,
            initial_interval,
            max_interval,
            multiplier,
            retryable,
        }
    }

    fn base_backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let interval = self.initial_interval.mul_f64(factor);
        interval.min(self.max_interval)
    }
}

impl RetryPolicy for ExponentialBackoffRetryPolicy {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        ctx.attempt < self.max_attempts && is_retryable(ctx.last_error, &self.retryable)
    }

    fn next_backoff(&self, attempt: u32) -> Duration {
        self.base_backoff(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Exponential backoff with uniform jitter, spreading synchronized
/// retries across a `[1-jitter, 1+jitter]` band.
pub struct JitteredRetryPolicy {
    inner: ExponentialBackoffRetryPolicy,
    jitter: f64,
}

impl JitteredRetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        jitter: f64,
        retryable: Vec<String>,
    ) -> Self {
        Self {
            inner: ExponentialBackoffRetryPolicy::new(
                max_attempts,
                initial_interval,
                max_interval,
                multiplier,
                retryable,
            ),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy for JitteredRetryPolicy {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        self.inner.should_retry(ctx)
    }

    fn next_backoff(&self, attempt: u32) -> Duration {
        let base = self.inner.base_backoff(attempt);
        if self.jitter == 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        base.mul_f64(factor)
    }

    fn max_attempts(&self) -> u32 {
        self.inner.max_attempts()
    }
}

/// Wrapper short-circuiting retries once the call context is dead, then
/// delegating to the wrapped policy.
pub struct DeadlineRetryPolicy {
    delegate: Arc<dyn RetryPolicy>,
}

impl DeadlineRetryPolicy {
    pub fn new(delegate: Arc<dyn RetryPolicy>) -> Self {
        Self { delegate }
    }
}

impl RetryPolicy for DeadlineRetryPolicy {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        if ctx.call.is_done() {
            return false;
        }
        self.delegate.should_retry(ctx)
    }

    fn next_backoff(&self, attempt: u32) -> Duration {
        self.delegate.next_backoff(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.delegate.max_attempts()
    }
}

/// Builds the retry policy variant named by the configuration, wrapped so
/// retries stop as soon as the call context dies.
pub fn build_retry_policy(config: &FailoverConfig) -> Arc<dyn RetryPolicy> {
    let inner: Arc<dyn RetryPolicy> = match config.retry_strategy {
        RetryStrategy::Simple => Arc::new(SimpleRetryPolicy::new(
            config.max_retries,
            config.retry_interval,
        )),
        RetryStrategy::Exponential => Arc::new(ExponentialBackoffRetryPolicy::new(
            config.max_retries,
            config.retry_interval,
            config.max_retry_delay,
            config.retry_backoff,
            config.retryable_errors.clone(),
        )),
        RetryStrategy::Jittered => Arc::new(JitteredRetryPolicy::new(
            config.max_retries,
            config.retry_interval,
            config.max_retry_delay,
            config.retry_backoff,
            config.retry_jitter,
            config.retryable_errors.clone(),
        )),
    };
    Arc::new(DeadlineRetryPolicy::new(inner))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with<'a>(
        call: &'a CallContext,
        tried: &'a HashSet<String>,
        error: &'a FailoverError,
        attempt: u32,
    ) -> RetryContext<'a> {
        RetryContext {
            call,
            attempt,
            elapsed: Duration::from_millis(1),
            tried,
            last_error: error,
        }
    }

    #[test]
    fn test_simple_policy_retries_any_error() {
        let policy = SimpleRetryPolicy::new(3, Duration::from_millis(10));
        let call = CallContext::new();
        let tried = HashSet::new();
        let error = FailoverError::Operation("whatever".into());

        assert!(policy.should_retry(&ctx_with(&call, &tried, &error, 1)));
        assert!(policy.should_retry(&ctx_with(&call, &tried, &error, 2)));
        assert!(!policy.should_retry(&ctx_with(&call, &tried, &error, 3)));
        assert_eq!(policy.next_backoff(1), Duration::from_millis(10));
        assert_eq!(policy.next_backoff(9), Duration::from_millis(10));
    }

    #[test]
    fn test_exponential_growth_and_clamp() {
        let policy = ExponentialBackoffRetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_millis(450),
            2.0,
            vec![],
        );

        assert_eq!(policy.next_backoff(0), Duration::from_millis(100));
        assert_eq!(policy.next_backoff(1), Duration::from_millis(200));
        assert_eq!(policy.next_backoff(2), Duration::from_millis(400));
        // Clamped at max_interval from here on.
        assert_eq!(policy.next_backoff(3), Duration::from_millis(450));
        assert_eq!(policy.next_backoff(10), Duration::from_millis(450));
    }

    #[test]
    fn test_exponential_classifies_by_substring() {
        let policy = ExponentialBackoffRetryPolicy::new(
            3,
            Duration::from_millis(10),
            Duration::from_secs(1),
            2.0,
            vec!["flaky_backend".to_string()],
        );
        let call = CallContext::new();
        let tried = HashSet::new();

        let matching = FailoverError::Operation("upstream flaky_backend reset".into());
        assert!(policy.should_retry(&ctx_with(&call, &tried, &matching, 1)));

        let other = FailoverError::Operation("schema mismatch".into());
        assert!(!policy.should_retry(&ctx_with(&call, &tried, &other, 1)));
    }

    #[test]
    fn test_transient_kinds_retry_without_substring_match() {
        let policy = ExponentialBackoffRetryPolicy::new(
            3,
            Duration::from_millis(10),
            Duration::from_secs(1),
            2.0,
            vec!["something_specific".to_string()],
        );
        let call = CallContext::new();
        let tried = HashSet::new();

        let error = FailoverError::Connection("peer reset".into());
        assert!(policy.should_retry(&ctx_with(&call, &tried, &error, 1)));
    }

    #[test]
    fn test_empty_list_classifies_everything() {
        let policy = ExponentialBackoffRetryPolicy::new(
            3,
            Duration::from_millis(10),
            Duration::from_secs(1),
            2.0,
            vec![],
        );
        let call = CallContext::new();
        let tried = HashSet::new();
        let error = FailoverError::Operation("anything at all".into());
        assert!(policy.should_retry(&ctx_with(&call, &tried, &error, 1)));
    }

    #[test]
    fn test_no_retry_past_max_attempts() {
        let policy = JitteredRetryPolicy::new(
            2,
            Duration::from_millis(10),
            Duration::from_secs(1),
            2.0,
            0.2,
            vec![],
        );
        let call = CallContext::new();
        let tried = HashSet::new();
        let error = FailoverError::ServiceUnavailable;
        assert!(policy.should_retry(&ctx_with(&call, &tried, &error, 1)));
        assert!(!policy.should_retry(&ctx_with(&call, &tried, &error, 2)));
    }

    #[test]
    fn test_jittered_backoff_stays_in_band() {
        let policy = JitteredRetryPolicy::new(
            3,
            Duration::from_millis(100),
            Duration::from_secs(10),
            2.0,
            0.2,
            vec![],
        );

        // attempt 1 has base 200ms; jitter 0.2 keeps it in [160ms, 240ms].
        let base = Duration::from_millis(200);
        for _ in 0..100 {
            let backoff = policy.next_backoff(1);
            assert!(backoff >= base.mul_f64(0.8), "backoff {backoff:?} below band");
            assert!(backoff <= base.mul_f64(1.2), "backoff {backoff:?} above band");
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = JitteredRetryPolicy::new(
            3,
            Duration::from_millis(100),
            Duration::from_secs(10),
            2.0,
            0.0,
            vec![],
        );
        assert_eq!(policy.next_backoff(1), Duration::from_millis(200));
    }

    #[test]
    fn test_deadline_wrapper_short_circuits() {
        let inner = Arc::new(SimpleRetryPolicy::new(5, Duration::from_millis(10)));
        let policy = DeadlineRetryPolicy::new(inner);

        let call = CallContext::new();
        let tried = HashSet::new();
        let error = FailoverError::ServiceUnavailable;
        assert!(policy.should_retry(&ctx_with(&call, &tried, &error, 1)));

        call.cancel();
        assert!(!policy.should_retry(&ctx_with(&call, &tried, &error, 1)));
    }

    #[test]
    fn test_factory_respects_strategy() {
        let config = FailoverConfig::default()
            .with_retry_strategy(RetryStrategy::Simple)
            .with_max_retries(7);
        let policy = build_retry_policy(&config);
        assert_eq!(policy.max_attempts(), 7);
    }
}
