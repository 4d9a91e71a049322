//! Failover orchestration.
//!
//! [`FailoverHandler::execute`] runs one user operation against an instance
//! set: it selects an instance, gates the attempt through the circuit
//! breaker and the health detector, invokes the operation, and feeds the
//! outcome back into every component sharing the per-instance health view.
//! Retries walk the remaining instances under the configured backoff until
//! the budget is spent.

use crate::breaker::{CircuitBreaker, SimpleCircuitBreaker};
use crate::config::{FailoverConfig, FailoverStrategy};
use crate::context::CallContext;
use crate::detector::{build_detector, Detector, HealthStatus};
use crate::error::FailoverError;
use crate::monitor::{InstanceMonitor, SimpleInstanceMonitor};
use crate::recovery::{build_recovery_strategy, RecoveryManager, RecoveryStrategy};
use crate::retry::{build_retry_policy, RetryContext, RetryPolicy};
use rand::Rng;
use rudder_common::Instance;
use rudder_metrics::{InMemoryMetrics, Metrics, NoopMetrics, ResponseMetric};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of one orchestrated call.
#[derive(Debug, Clone)]
pub struct FailoverResult {
    /// Whether any attempt succeeded.
    pub success: bool,
    /// The instance that served the call on success; on failure, a
    /// representative instance from the set (never empty input).
    pub instance: Option<Arc<Instance>>,
    /// Number of retry rounds consumed (0 when the first attempt decided).
    pub retry_count: u32,
    /// Wall-clock time spent inside `execute`.
    pub duration: Duration,
    /// Terminal error on failure.
    pub error: Option<FailoverError>,
    /// Addresses of distinct instances that produced a failed attempt, in
    /// first-failure order. Populated on success and failure alike.
    pub failed_nodes: Vec<String>,
}

impl FailoverResult {
    fn empty() -> Self {
        Self {
            success: false,
            instance: None,
            retry_count: 0,
            duration: Duration::ZERO,
            error: None,
            failed_nodes: Vec::new(),
        }
    }
}

/// Appends an address unless an earlier attempt already recorded it.
fn push_failed(nodes: &mut Vec<String>, address: &str) {
    if !nodes.iter().any(|a| a == address) {
        nodes.push(address.to_string());
    }
}

#[derive(Debug)]
struct ManagerInner {
    instances: Vec<Arc<Instance>>,
    status: HashMap<String, HealthStatus>,
    cursor: usize,
    epoch: u64,
}

/// The shared instance view inside one handler.
///
/// Snapshots are replaced wholesale; statuses carry over for surviving ids
/// so a breaker-tripped instance does not reset on every registry event.
/// The lock also covers the round-robin cursor, a deliberate contention
/// tradeoff kept simple until selection shows up in profiles.
#[derive(Debug)]
pub struct InstanceManager {
    inner: Mutex<ManagerInner>,
}

impl InstanceManager {
    pub fn new(instances: Vec<Arc<Instance>>) -> Self {
        let status = instances
            .iter()
            .map(|i| (i.id.clone(), HealthStatus::Healthy))
            .collect();
        Self {
            inner: Mutex::new(ManagerInner {
                instances,
                status,
                cursor: 0,
                epoch: 0,
            }),
        }
    }

    /// Replaces the snapshot, carrying known statuses over by id.
    pub fn update_instances(&self, instances: &[Arc<Instance>]) {
        let mut inner = self.inner.lock().expect("instance manager lock poisoned");
        let mut status = HashMap::with_capacity(instances.len());
        for instance in instances {
            let carried = inner
                .status
                .get(&instance.id)
                .copied()
                .unwrap_or(HealthStatus::Healthy);
            status.insert(instance.id.clone(), carried);
        }
        inner.instances = instances.to_vec();
        inner.status = status;
        inner.epoch += 1;
    }

    /// Overrides the local status of one instance.
    pub fn mark_status(&self, instance_id: &str, status: HealthStatus) {
        let mut inner = self.inner.lock().expect("instance manager lock poisoned");
        inner.status.insert(instance_id.to_string(), status);
    }

    /// The locally recorded status, defaulting to Healthy.
    pub fn status(&self, instance_id: &str) -> HealthStatus {
        let inner = self.inner.lock().expect("instance manager lock poisoned");
        inner
            .status
            .get(instance_id)
            .copied()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Monotonic snapshot counter, bumped on every `update_instances`.
    pub fn epoch(&self) -> u64 {
        self.inner.lock().expect("instance manager lock poisoned").epoch
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("instance manager lock poisoned").instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Round-robin pick over selectable (Healthy or Suspect) instances.
    pub fn next_instance(&self) -> Result<Arc<Instance>, FailoverError> {
        let mut inner = self.inner.lock().expect("instance manager lock poisoned");
        let len = inner.instances.len();
        if len == 0 {
            return Err(FailoverError::NoAvailableInstances);
        }

        let cursor = inner.cursor;
        for i in 0..len {
            let idx = (cursor + i) % len;
            let instance = &inner.instances[idx];
            let selectable = inner
                .status
                .get(&instance.id)
                .map(|s| s.is_selectable())
                .unwrap_or(true);
            if selectable {
                let picked = Arc::clone(instance);
                inner.cursor = (idx + 1) % len;
                return Ok(picked);
            }
        }

        Err(FailoverError::NoAvailableInstances)
    }

    /// Uniform pick over selectable instances.
    pub fn random_instance(&self) -> Result<Arc<Instance>, FailoverError> {
        let healthy = self.healthy_instances();
        if healthy.is_empty() {
            return Err(FailoverError::NoAvailableInstances);
        }
        let idx = rand::thread_rng().gen_range(0..healthy.len());
        Ok(Arc::clone(&healthy[idx]))
    }

    /// All selectable instances in snapshot order.
    pub fn healthy_instances(&self) -> Vec<Arc<Instance>> {
        let inner = self.inner.lock().expect("instance manager lock poisoned");
        inner
            .instances
            .iter()
            .filter(|instance| {
                inner
                    .status
                    .get(&instance.id)
                    .map(|s| s.is_selectable())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}

/// Latency assumed for an instance with no recorded samples when ranking
/// by response time.
const DEFAULT_RANKING_LATENCY: Duration = Duration::from_secs(1);

/// Client-side failover orchestrator.
///
/// One handler serves many concurrent calls over one shared instance view.
/// Components are pluggable; `new` assembles the variants named in the
/// configuration and the `with_*` builders override them before the handler
/// is shared.
///
/// Must be constructed inside a tokio runtime: the default circuit breaker
/// spawns its cleanup task at build time.
pub struct FailoverHandler {
    config: FailoverConfig,
    detector: Arc<dyn Detector>,
    breaker: Arc<dyn CircuitBreaker>,
    retry_policy: Arc<dyn RetryPolicy>,
    recovery: Arc<dyn RecoveryStrategy>,
    monitor: Arc<dyn InstanceMonitor>,
    metrics: Arc<dyn Metrics>,
    recovery_manager: Option<Arc<RecoveryManager>>,
    instances: InstanceManager,
}

impl FailoverHandler {
    /// Builds a handler with the component variants named in `config`.
    pub fn new(config: FailoverConfig) -> Self {
        let detector = build_detector(&config);
        let breaker: Arc<dyn CircuitBreaker> = Arc::new(SimpleCircuitBreaker::new(&config));
        let retry_policy = build_retry_policy(&config);
        let recovery = build_recovery_strategy(&config, Arc::clone(&detector));
        let metrics: Arc<dyn Metrics> = if config.enable_metrics {
            Arc::new(InMemoryMetrics::new())
        } else {
            Arc::new(NoopMetrics)
        };

        Self {
            config,
            detector,
            breaker,
            retry_policy,
            recovery,
            monitor: Arc::new(SimpleInstanceMonitor::new()),
            metrics,
            recovery_manager: None,
            instances: InstanceManager::new(Vec::new()),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.recovery = build_recovery_strategy(&self.config, Arc::clone(&detector));
        self.detector = detector;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_recovery_strategy(mut self, recovery: Arc<dyn RecoveryStrategy>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn InstanceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Wires a recovery manager: instances that degrade during calls are
    /// handed to it for background probing.
    pub fn with_recovery_manager(mut self, manager: Arc<RecoveryManager>) -> Self {
        self.recovery_manager = Some(manager);
        self
    }

    pub fn detector(&self) -> &Arc<dyn Detector> {
        &self.detector
    }

    pub fn circuit_breaker(&self) -> &Arc<dyn CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.retry_policy
    }

    pub fn recovery_strategy(&self) -> &Arc<dyn RecoveryStrategy> {
        &self.recovery
    }

    pub fn monitor(&self) -> &Arc<dyn InstanceMonitor> {
        &self.monitor
    }

    pub fn instance_manager(&self) -> &InstanceManager {
        &self.instances
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Runs `operation` against the instance set with failover.
    ///
    /// The returned [`FailoverResult`] carries the outcome either way;
    /// `error` is the terminal error under the precedence success, then
    /// breaker lockout, then retry exhaustion, then the last underlying
    /// error.
    pub async fn execute<F, Fut>(
        &self,
        ctx: &CallContext,
        instances: Vec<Arc<Instance>>,
        operation: F,
    ) -> FailoverResult
    where
        F: Fn(CallContext, Arc<Instance>) -> Fut,
        Fut: Future<Output = Result<(), FailoverError>>,
    {
        let mut result = FailoverResult::empty();

        if let Some(err) = ctx.error() {
            result.instance = instances.first().cloned();
            result.error = Some(err);
            return result;
        }

        self.instances.update_instances(&instances);

        if instances.is_empty() {
            result.error = Some(FailoverError::NoAvailableInstances);
            return result;
        }

        let start = Instant::now();
        let service = instances[0].service.clone();
        let total = instances.len();
        let max_attempts = self.retry_policy.max_attempts();

        let mut last_err: Option<FailoverError> = None;
        let mut breaker_triggered = false;
        let mut tried: HashSet<String> = HashSet::new();

        for attempt in 0..=max_attempts {
            if attempt > 0 {
                result.retry_count += 1;

                let last_error = last_err.clone().unwrap_or(FailoverError::ServiceUnavailable);
                let retry_ctx = RetryContext {
                    call: ctx,
                    attempt,
                    elapsed: start.elapsed(),
                    tried: &tried,
                    last_error: &last_error,
                };
                if !self.retry_policy.should_retry(&retry_ctx) {
                    break;
                }

                if self.config.enable_metrics {
                    self.metrics.record_retry(&service, "", attempt).await;
                }

                let backoff = self.retry_policy.next_backoff(attempt);
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, "retrying after backoff");
                if let Err(err) = ctx.sleep(backoff).await {
                    result.duration = start.elapsed();
                    result.instance = instances.first().cloned();
                    result.error = Some(err);
                    return result;
                }
            }

            let instance = match self.select_instance() {
                Ok(instance) => instance,
                Err(err) => {
                    last_err = Some(err);
                    break;
                }
            };

            if tried.contains(&instance.id) {
                if tried.len() >= total {
                    break;
                }
                // Force selection away from an already-tried instance.
                self.instances.mark_status(&instance.id, HealthStatus::Unhealthy);
                continue;
            }
            tried.insert(instance.id.clone());

            if let Err(err) = self.breaker.allow(&instance) {
                push_failed(&mut result.failed_nodes, &instance.address);
                breaker_triggered = true;
                if self.config.enable_metrics {
                    let state = self.breaker.state(&instance);
                    self.metrics
                        .record_circuit_break(&service, &instance.address, state.label())
                        .await;
                }
                last_err = Some(err);
                continue;
            }

            match self.detector.detect(ctx, &instance).await {
                Ok(HealthStatus::Healthy) => {}
                Ok(status) => {
                    debug!(instance = %instance.id, status = status.label(), "detector vetoed instance");
                    self.handle_failure(&instance, &FailoverError::ServiceUnavailable).await;
                    push_failed(&mut result.failed_nodes, &instance.address);
                    last_err = Some(FailoverError::ServiceUnavailable);
                    continue;
                }
                Err(err) => {
                    self.handle_failure(&instance, &err).await;
                    push_failed(&mut result.failed_nodes, &instance.address);
                    last_err = Some(err);
                    continue;
                }
            }

            let op_start = Instant::now();
            match operation(ctx.clone(), Arc::clone(&instance)).await {
                Ok(()) => {
                    self.handle_success(&instance, op_start.elapsed()).await;
                    if self.config.enable_metrics && !result.failed_nodes.is_empty() {
                        let from = result.failed_nodes.last().cloned().unwrap_or_default();
                        self.metrics.record_failover(&service, &from, &instance.address).await;
                    }
                    result.success = true;
                    result.instance = Some(instance);
                    result.duration = start.elapsed();
                    return result;
                }
                Err(err) => {
                    warn!(instance = %instance.id, %err, "attempt failed");
                    self.handle_failure(&instance, &err).await;
                    push_failed(&mut result.failed_nodes, &instance.address);
                    last_err = Some(err);
                }
            }
        }

        result.duration = start.elapsed();
        result.instance = instances
            .iter()
            .find(|i| !tried.contains(&i.id))
            .or(instances.first())
            .cloned();

        result.error = if breaker_triggered {
            Some(FailoverError::CircuitOpen)
        } else if result.retry_count >= max_attempts {
            Some(FailoverError::MaxRetriesExceeded)
        } else {
            last_err
        };
        result
    }

    fn select_instance(&self) -> Result<Arc<Instance>, FailoverError> {
        match self.config.failover_strategy {
            FailoverStrategy::Next => self.instances.next_instance(),
            FailoverStrategy::Random => self.instances.random_instance(),
            FailoverStrategy::Best => {
                let healthy = self.instances.healthy_instances();
                healthy
                    .into_iter()
                    .min_by_key(|instance| {
                        let stats = self.monitor.stats(instance);
                        if stats.success_requests > 0 {
                            stats.avg_response_time
                        } else {
                            DEFAULT_RANKING_LATENCY
                        }
                    })
                    .ok_or(FailoverError::NoAvailableInstances)
            }
        }
    }

    async fn handle_success(&self, instance: &Instance, duration: Duration) {
        self.detector.mark_success(instance);
        self.breaker.mark_success(instance);
        self.monitor.report_success(instance, duration);
        self.instances.mark_status(&instance.id, HealthStatus::Healthy);

        if self.config.enable_metrics {
            let _ = self
                .metrics
                .record_response(ResponseMetric::success(
                    &instance.service,
                    &instance.address,
                    duration,
                ))
                .await;
        }
    }

    async fn handle_failure(&self, instance: &Instance, error: &FailoverError) {
        self.detector.mark_failed(instance);
        self.breaker.mark_failure(instance, error);
        self.monitor.report_failure(instance, error);
        self.instances.mark_status(&instance.id, HealthStatus::Unhealthy);

        if let Some(manager) = &self.recovery_manager {
            let status = self.detector.status(instance);
            if !status.is_selectable() {
                manager.add_instance(Arc::new(instance.clone()), status);
            }
        }
    }
}
