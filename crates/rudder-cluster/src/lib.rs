//! Rudder Cluster Failover
//!
//! The client-side resilience core of the Rudder RPC framework. A
//! [`FailoverHandler`] runs one user operation across an instance set with
//! retries, per-instance circuit breaking, health detection and background
//! recovery, all sharing one consistent view of instance health under
//! concurrent request load.
//!
//! # Components
//!
//! - [`failover`] - the orchestrator and the shared instance view
//! - [`breaker`] - per-instance three-state circuit breaker
//! - [`detector`] - passive and active health detection
//! - [`retry`] - backoff policies with error classification
//! - [`recovery`] - background probing of unhealthy instances
//! - [`monitor`] - per-instance call statistics
//! - [`selector`] - metadata-based instance set narrowing
//! - [`config`] - the [`FailoverConfig`] surface
//!
//! # Example
//!
//! ```no_run
//! use rudder_cluster::{CallContext, FailoverConfig, FailoverHandler};
//! use rudder_common::Instance;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let handler = FailoverHandler::new(FailoverConfig::default());
//! let instances = vec![
//!     Arc::new(Instance::new("a", "greeter", "1.0.0", "10.0.0.1:8000")),
//!     Arc::new(Instance::new("b", "greeter", "1.0.0", "10.0.0.2:8000")),
//! ];
//!
//! let result = handler
//!     .execute(&CallContext::new(), instances, |_ctx, instance| async move {
//!         // one RPC attempt against `instance`
//!         let _ = instance.address;
//!         Ok(())
//!     })
//!     .await;
//! assert!(result.success);
//! # }
//! ```

pub mod breaker;
pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod failover;
pub mod monitor;
pub mod recovery;
pub mod retry;
pub mod selector;

pub use breaker::{BreakerState, CircuitBreaker, NoopCircuitBreaker, SimpleCircuitBreaker};
pub use config::{
    DetectorKind, FailoverConfig, FailoverStrategy, RecoveryKind, RetryStrategy,
};
pub use context::CallContext;
pub use detector::{
    build_detector, BaseDetector, Detector, ErrorRateDetector, HealthCheckDetector, HealthStatus,
    TimeoutDetector,
};
pub use error::{FailoverError, Result};
pub use failover::{FailoverHandler, FailoverResult, InstanceManager};
pub use monitor::{InstanceMonitor, InstanceStats, SimpleInstanceMonitor};
pub use recovery::{
    build_recovery_strategy, GradualRecoveryStrategy, ImmediateRecoveryStrategy,
    ProbingRecoveryStrategy, RecoveryManager, RecoveryStrategy,
};
pub use retry::{
    build_retry_policy, DeadlineRetryPolicy, ExponentialBackoffRetryPolicy, JitteredRetryPolicy,
    RetryContext, RetryPolicy, SimpleRetryPolicy,
};
pub use selector::{GroupSelector, Selector, SelectorChain, WeightedGroupSelector};
