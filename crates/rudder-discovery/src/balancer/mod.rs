//! Load balancing over the resolved instance set.
//!
//! - [`fastest`] - lowest observed response time, fed by the metrics sink
//! - [`random`] - uniform pick
//! - [`round_robin`] - lock-free rotating cursor

pub mod fastest;
pub mod random;
pub mod round_robin;

use crate::error::Result;
use async_trait::async_trait;
use rudder_common::Instance;
use rudder_metrics::{Metrics, NoopMetrics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use fastest::FastestBalancer;
pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;

/// Selection algorithm name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancerType {
    FastestResponse,
    Random,
    #[default]
    RoundRobin,
}

/// Load balancer construction parameters.
#[derive(Clone)]
pub struct BalancerConfig {
    /// Which algorithm to build.
    pub kind: BalancerType,
    /// Metrics sink consulted by latency-aware algorithms.
    pub metrics: Arc<dyn Metrics>,
    /// Cadence of the background latency refresh; `None` disables it.
    pub update_interval: Option<Duration>,
    /// How many ranked candidates `select` walks before giving up.
    pub retry_times: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            kind: BalancerType::RoundRobin,
            metrics: Arc::new(NoopMetrics),
            update_interval: None,
            retry_times: 3,
        }
    }
}

/// Instance selection over a live instance view.
#[async_trait]
pub trait Balancer: Send + Sync {
    /// Installs the initial instance set.
    async fn initialize(&self, instances: Vec<Arc<Instance>>) -> Result<()>;

    /// Picks an instance for the next call.
    async fn select(&self) -> Result<Arc<Instance>>;

    /// Replaces the instance set after a discovery event.
    async fn update(&self, instances: Vec<Arc<Instance>>) -> Result<()>;

    /// Reports a call outcome so latency-aware algorithms can learn from
    /// it.
    async fn feedback(&self, instance: &Instance, duration: Duration, success: bool);

    /// Algorithm name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Builds the balancer variant named in the configuration.
pub fn build_balancer(config: BalancerConfig) -> Arc<dyn Balancer> {
    match config.kind {
        BalancerType::FastestResponse => Arc::new(FastestBalancer::new(config)),
        BalancerType::Random => Arc::new(RandomBalancer::new()),
        BalancerType::RoundRobin => Arc::new(RoundRobinBalancer::new()),
    }
}
