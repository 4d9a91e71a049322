//! Fastest-response load balancing.

use crate::balancer::{Balancer, BalancerConfig};
use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use rudder_common::Instance;
use rudder_metrics::{Metrics, ResponseMetric};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Latency assumed for an instance with no recorded samples.
const DEFAULT_LATENCY: Duration = Duration::from_secs(1);

/// Instance plus its current performance view.
#[derive(Debug, Clone)]
struct InstanceWrapper {
    instance: Arc<Instance>,
    latency: Duration,
    weight: f64,
    last_update: Instant,
}

/// Picks the enabled instance with the smallest observed latency.
///
/// Latencies come from the metrics sink; successful call durations are fed
/// back through [`Balancer::feedback`] and a background ticker re-reads the
/// sink so rankings follow the live behavior of the backends.
pub struct FastestBalancer {
    metrics: Arc<dyn Metrics>,
    retry_times: usize,
    wrappers: Arc<RwLock<Vec<InstanceWrapper>>>,
    shutdown: CancellationToken,
}

impl FastestBalancer {
    pub fn new(config: BalancerConfig) -> Self {
        let wrappers: Arc<RwLock<Vec<InstanceWrapper>>> = Arc::new(RwLock::new(Vec::new()));
        let shutdown = CancellationToken::new();

        if let Some(interval) = config.update_interval {
            Self::spawn_refresh(
                Arc::clone(&wrappers),
                Arc::clone(&config.metrics),
                shutdown.clone(),
                interval,
            );
        }

        Self {
            metrics: config.metrics,
            retry_times: config.retry_times.max(1),
            wrappers,
            shutdown,
        }
    }

    /// Stops the background latency refresh.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn spawn_refresh(
        wrappers: Arc<RwLock<Vec<InstanceWrapper>>>,
        metrics: Arc<dyn Metrics>,
        shutdown: CancellationToken,
        interval: Duration,
    ) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        let instances: Vec<Arc<Instance>> = {
                            let wrappers = wrappers.read().expect("balancer lock poisoned");
                            wrappers.iter().map(|w| Arc::clone(&w.instance)).collect()
                        };
                        let rebuilt = Self::build_wrappers(&metrics, instances).await;
                        *wrappers.write().expect("balancer lock poisoned") = rebuilt;
                    }
                }
            }
        });
    }

    async fn build_wrappers(
        metrics: &Arc<dyn Metrics>,
        instances: Vec<Arc<Instance>>,
    ) -> Vec<InstanceWrapper> {
        let mut wrappers = Vec::with_capacity(instances.len());
        for instance in instances {
            let latency = metrics
                .latency(&instance.service, &instance.address)
                .await
                .unwrap_or(DEFAULT_LATENCY);
            wrappers.push(InstanceWrapper {
                weight: calculate_weight(latency),
                latency,
                last_update: Instant::now(),
                instance,
            });
        }
        wrappers
    }

    async fn replace(&self, instances: Vec<Arc<Instance>>) {
        let rebuilt = Self::build_wrappers(&self.metrics, instances).await;
        *self.wrappers.write().expect("balancer lock poisoned") = rebuilt;
    }

    /// The current weight of an instance, for diagnostics.
    pub fn weight(&self, instance_id: &str) -> Option<f64> {
        let wrappers = self.wrappers.read().expect("balancer lock poisoned");
        wrappers
            .iter()
            .find(|w| w.instance.id == instance_id)
            .map(|w| w.weight)
    }

    /// When an instance's latency view was last rebuilt, for diagnostics.
    pub fn last_update(&self, instance_id: &str) -> Option<Instant> {
        let wrappers = self.wrappers.read().expect("balancer lock poisoned");
        wrappers
            .iter()
            .find(|w| w.instance.id == instance_id)
            .map(|w| w.last_update)
    }
}

impl Drop for FastestBalancer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Balancer for FastestBalancer {
    async fn initialize(&self, instances: Vec<Arc<Instance>>) -> Result<()> {
        self.replace(instances).await;
        Ok(())
    }

    async fn select(&self) -> Result<Arc<Instance>> {
        let mut ranked: Vec<InstanceWrapper> = {
            let wrappers = self.wrappers.read().expect("balancer lock poisoned");
            wrappers.clone()
        };
        if ranked.is_empty() {
            return Err(DiscoveryError::NoAvailableInstances);
        }

        ranked.sort_by_key(|w| w.latency);
        for wrapper in ranked.iter().take(self.retry_times) {
            if wrapper.instance.is_enabled() {
                return Ok(Arc::clone(&wrapper.instance));
            }
        }

        Err(DiscoveryError::NoAvailableInstances)
    }

    async fn update(&self, instances: Vec<Arc<Instance>>) -> Result<()> {
        self.replace(instances).await;
        Ok(())
    }

    async fn feedback(&self, instance: &Instance, duration: Duration, success: bool) {
        if !success {
            return; // failed calls do not contribute latency samples
        }
        let _ = self
            .metrics
            .record_response(ResponseMetric::success(
                &instance.service,
                &instance.address,
                duration,
            ))
            .await;
    }

    fn name(&self) -> &'static str {
        "fastest_response"
    }
}

/// Weight is the inverse of the latency in milliseconds; faster instances
/// weigh more.
fn calculate_weight(latency: Duration) -> f64 {
    let millis = latency.as_millis();
    if millis == 0 {
        return 1.0;
    }
    1.0 / millis as f64
}
