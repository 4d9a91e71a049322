//! Failover configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff shape used between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Fixed interval, retries any error.
    Simple,
    /// Exponential growth clamped to a maximum interval.
    Exponential,
    /// Exponential growth with uniform jitter.
    #[default]
    Jittered,
}

/// How the next instance is picked inside one failover loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStrategy {
    /// Round-robin over healthy instances.
    #[default]
    Next,
    /// Uniform pick over healthy instances.
    Random,
    /// Lowest observed latency.
    Best,
}

/// Which health detector variant the handler builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Passive bookkeeping only; health follows reported outcomes.
    Passive,
    /// TCP dial probe with a bounded timeout.
    #[default]
    Timeout,
    /// Sliding-window error-rate tracking.
    ErrorRate,
    /// Timer-driven user-supplied probe.
    HealthCheck,
}

/// How unhealthy instances are brought back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    /// Probe as soon as possible.
    Immediate,
    /// Exponentially spaced probes.
    #[default]
    Gradual,
    /// A full window of successful probes is required.
    Probing,
}

/// Configuration for the whole failover stack.
///
/// Durations serialize in serde's `{secs, nanos}` form. Builder methods
/// ignore out-of-range values and keep the previous setting, so a partially
/// invalid configuration degrades to the defaults instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    // Retry
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub max_retry_delay: Duration,
    pub retry_backoff: f64,
    pub retry_jitter: f64,
    pub retryable_errors: Vec<String>,
    pub retry_strategy: RetryStrategy,

    // Circuit breaking
    pub circuit_break_threshold: u32,
    pub circuit_break_timeout: Duration,
    pub half_open_max_calls: u32,
    pub half_open_success_threshold: f64,

    // Failure detection
    pub failure_detection_time: Duration,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
    pub detector: DetectorKind,

    // Recovery
    pub recovery_interval: Duration,
    pub recovery_timeout: Duration,
    pub recovery_strategy: RecoveryKind,
    pub recovery_threshold: u32,

    // General
    pub enable_metrics: bool,
    pub failover_strategy: FailoverStrategy,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(30),
            retry_backoff: 2.0,
            retry_jitter: 0.2,
            retryable_errors: vec![
                "timeout".to_string(),
                "connection_refused".to_string(),
                "service_unavailable".to_string(),
            ],
            retry_strategy: RetryStrategy::Jittered,

            circuit_break_threshold: 5,
            circuit_break_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            half_open_success_threshold: 0.5,

            failure_detection_time: Duration::from_secs(10),
            failure_threshold: 3,
            success_threshold: 2,
            connection_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            detector: DetectorKind::Timeout,

            recovery_interval: Duration::from_secs(5),
            recovery_timeout: Duration::from_secs(60),
            recovery_strategy: RecoveryKind::Gradual,
            recovery_threshold: 2,

            enable_metrics: true,
            failover_strategy: FailoverStrategy::Next,
        }
    }
}

impl FailoverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.retry_interval = interval;
        }
        self
    }

    pub fn with_retry_backoff(mut self, backoff: f64, max_delay: Duration) -> Self {
        if backoff >= 1.0 {
            self.retry_backoff = backoff;
        }
        if !max_delay.is_zero() {
            self.max_retry_delay = max_delay;
        }
        self
    }

    pub fn with_retry_jitter(mut self, jitter: f64) -> Self {
        if (0.0..=1.0).contains(&jitter) {
            self.retry_jitter = jitter;
        }
        self
    }

    pub fn with_retryable_errors(mut self, errors: Vec<String>) -> Self {
        self.retryable_errors = errors;
        self
    }

    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    pub fn with_circuit_breaker(mut self, threshold: u32, timeout: Duration) -> Self {
        if threshold > 0 {
            self.circuit_break_threshold = threshold;
        }
        if !timeout.is_zero() {
            self.circuit_break_timeout = timeout;
        }
        self
    }

    pub fn with_half_open(mut self, max_calls: u32, success_threshold: f64) -> Self {
        if max_calls > 0 {
            self.half_open_max_calls = max_calls;
        }
        if success_threshold > 0.0 && success_threshold <= 1.0 {
            self.half_open_success_threshold = success_threshold;
        }
        self
    }

    pub fn with_detection(
        mut self,
        detection_time: Duration,
        failure_threshold: u32,
        success_threshold: u32,
    ) -> Self {
        if !detection_time.is_zero() {
            self.failure_detection_time = detection_time;
        }
        if failure_threshold > 0 {
            self.failure_threshold = failure_threshold;
        }
        if success_threshold > 0 {
            self.success_threshold = success_threshold;
        }
        self
    }

    pub fn with_detector(mut self, detector: DetectorKind) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_timeouts(mut self, connection: Duration, request: Duration) -> Self {
        if !connection.is_zero() {
            self.connection_timeout = connection;
        }
        if !request.is_zero() {
            self.request_timeout = request;
        }
        self
    }

    pub fn with_recovery(mut self, strategy: RecoveryKind, interval: Duration) -> Self {
        self.recovery_strategy = strategy;
        if !interval.is_zero() {
            self.recovery_interval = interval;
        }
        self
    }

    pub fn with_recovery_threshold(mut self, threshold: u32, timeout: Duration) -> Self {
        if threshold > 0 {
            self.recovery_threshold = threshold;
        }
        if !timeout.is_zero() {
            self.recovery_timeout = timeout;
        }
        self
    }

    pub fn with_failover_strategy(mut self, strategy: FailoverStrategy) -> Self {
        self.failover_strategy = strategy;
        self
    }

    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FailoverConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_interval, Duration::from_millis(100));
        assert_eq!(config.retry_strategy, RetryStrategy::Jittered);
        assert_eq!(config.circuit_break_threshold, 5);
        assert_eq!(config.circuit_break_timeout, Duration::from_secs(30));
        assert_eq!(config.half_open_max_calls, 3);
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.recovery_strategy, RecoveryKind::Gradual);
        assert_eq!(config.failover_strategy, FailoverStrategy::Next);
        assert!(config.enable_metrics);
    }

    #[test]
    fn test_builder_chain() {
        let config = FailoverConfig::new()
            .with_max_retries(5)
            .with_retry_strategy(RetryStrategy::Exponential)
            .with_circuit_breaker(3, Duration::from_secs(10))
            .with_half_open(2, 0.8)
            .with_failover_strategy(FailoverStrategy::Random);

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_strategy, RetryStrategy::Exponential);
        assert_eq!(config.circuit_break_threshold, 3);
        assert_eq!(config.circuit_break_timeout, Duration::from_secs(10));
        assert_eq!(config.half_open_max_calls, 2);
        assert_eq!(config.half_open_success_threshold, 0.8);
        assert_eq!(config.failover_strategy, FailoverStrategy::Random);
    }

    #[test]
    fn test_builder_rejects_out_of_range() {
        let config = FailoverConfig::new()
            .with_retry_backoff(0.5, Duration::ZERO)
            .with_retry_jitter(1.5)
            .with_half_open(0, 2.0);

        let defaults = FailoverConfig::default();
        assert_eq!(config.retry_backoff, defaults.retry_backoff);
        assert_eq!(config.max_retry_delay, defaults.max_retry_delay);
        assert_eq!(config.retry_jitter, defaults.retry_jitter);
        assert_eq!(config.half_open_max_calls, defaults.half_open_max_calls);
        assert_eq!(
            config.half_open_success_threshold,
            defaults.half_open_success_threshold
        );
    }

    #[test]
    fn test_strategy_names_deserialize() {
        let config: FailoverConfig = serde_json::from_value(serde_json::json!({
            "max_retries": 2,
            "retry_interval": {"secs": 0, "nanos": 50_000_000},
            "max_retry_delay": {"secs": 10, "nanos": 0},
            "retry_backoff": 2.0,
            "retry_jitter": 0.1,
            "retryable_errors": ["timeout"],
            "retry_strategy": "exponential",
            "circuit_break_threshold": 4,
            "circuit_break_timeout": {"secs": 15, "nanos": 0},
            "half_open_max_calls": 2,
            "half_open_success_threshold": 0.5,
            "failure_detection_time": {"secs": 10, "nanos": 0},
            "failure_threshold": 3,
            "success_threshold": 2,
            "connection_timeout": {"secs": 3, "nanos": 0},
            "request_timeout": {"secs": 5, "nanos": 0},
            "detector": "passive",
            "recovery_interval": {"secs": 5, "nanos": 0},
            "recovery_timeout": {"secs": 60, "nanos": 0},
            "recovery_strategy": "probing",
            "recovery_threshold": 2,
            "enable_metrics": false,
            "failover_strategy": "best"
        }))
        .unwrap();

        assert_eq!(config.retry_strategy, RetryStrategy::Exponential);
        assert_eq!(config.detector, DetectorKind::Passive);
        assert_eq!(config.recovery_strategy, RecoveryKind::Probing);
        assert_eq!(config.failover_strategy, FailoverStrategy::Best);
    }
}
