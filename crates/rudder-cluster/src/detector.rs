//! Health detection.
//!
//! All detector variants share one passive core that turns reported
//! outcomes into a per-instance health status. The active variants layer a
//! liveness probe on top: a TCP dial, a sliding error-rate window, or a
//! timer-driven user-supplied check.

use crate::config::{DetectorKind, FailoverConfig};
use crate::context::CallContext;
use crate::error::FailoverError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use rudder_common::Instance;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-instance health as seen by this client process.
///
/// `Healthy → Suspect → Unhealthy` on failures, back to `Healthy` through
/// recovery. `Isolated` is entered only by external policy and sticks until
/// an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    Healthy,
    Suspect,
    Unhealthy,
    Isolated,
}

impl HealthStatus {
    /// Whether an instance in this state may be selected for traffic.
    pub fn is_selectable(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Suspect)
    }

    /// Label used when reporting to a metrics sink.
    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Suspect => "suspect",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Isolated => "isolated",
        }
    }
}

/// Liveness tracking for instances.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Determines the instance's health, possibly probing it.
    async fn detect(
        &self,
        ctx: &CallContext,
        instance: &Instance,
    ) -> Result<HealthStatus, FailoverError>;

    /// Records a failed call against the instance.
    fn mark_failed(&self, instance: &Instance);

    /// Records a successful call against the instance.
    fn mark_success(&self, instance: &Instance);

    /// The currently recorded status without probing.
    fn status(&self, instance: &Instance) -> HealthStatus;
}

#[derive(Debug, Clone)]
struct HealthEntry {
    status: HealthStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_update: Instant,
}

impl HealthEntry {
    fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_update: Instant::now(),
        }
    }
}

/// Passive detector: health follows reported outcomes only.
///
/// Failures move an instance to Suspect and, at the failure threshold, to
/// Unhealthy. Successes move it back to Healthy at the success threshold;
/// a success streak below the threshold lifts an Unhealthy instance to
/// Suspect so a recovering backend is never both "seeing successes" and
/// fully Unhealthy.
pub struct BaseDetector {
    failure_threshold: u32,
    success_threshold: u32,
    entries: RwLock<HashMap<String, HealthEntry>>,
}

impl BaseDetector {
    pub fn new(config: &FailoverConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Marks the instance Isolated. Sticky until [`BaseDetector::clear`].
    pub fn isolate(&self, instance: &Instance) {
        let mut entries = self.entries.write().expect("detector lock poisoned");
        let entry = entries.entry(instance.id.clone()).or_insert_with(HealthEntry::new);
        entry.status = HealthStatus::Isolated;
        entry.last_update = Instant::now();
    }

    /// Drops all recorded state for the instance, returning it to Healthy.
    pub fn clear(&self, instance: &Instance) {
        let mut entries = self.entries.write().expect("detector lock poisoned");
        entries.remove(&instance.id);
    }

    /// Consecutive failure count for the instance.
    pub fn consecutive_failures(&self, instance: &Instance) -> u32 {
        let entries = self.entries.read().expect("detector lock poisoned");
        entries
            .get(&instance.id)
            .map(|e| e.consecutive_failures)
            .unwrap_or(0)
    }

    fn set_status(&self, instance_id: &str, status: HealthStatus) {
        let mut entries = self.entries.write().expect("detector lock poisoned");
        let entry = entries
            .entry(instance_id.to_string())
            .or_insert_with(HealthEntry::new);
        if entry.status == HealthStatus::Isolated {
            return;
        }
        entry.status = status;
        entry.last_update = Instant::now();
    }

    fn last_update(&self, instance_id: &str) -> Option<Instant> {
        let entries = self.entries.read().expect("detector lock poisoned");
        entries.get(instance_id).map(|e| e.last_update)
    }
}

#[async_trait]
impl Detector for BaseDetector {
    async fn detect(
        &self,
        _ctx: &CallContext,
        instance: &Instance,
    ) -> Result<HealthStatus, FailoverError> {
        Ok(self.status(instance))
    }

    fn mark_failed(&self, instance: &Instance) {
        let mut entries = self.entries.write().expect("detector lock poisoned");
        let entry = entries.entry(instance.id.clone()).or_insert_with(HealthEntry::new);
        if entry.status == HealthStatus::Isolated {
            return;
        }

        entry.consecutive_failures += 1;
        entry.consecutive_successes = 0;
        entry.last_update = Instant::now();
        entry.status = if entry.consecutive_failures >= self.failure_threshold {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Suspect
        };
    }

    fn mark_success(&self, instance: &Instance) {
        let mut entries = self.entries.write().expect("detector lock poisoned");
        let entry = entries.entry(instance.id.clone()).or_insert_with(HealthEntry::new);
        if entry.status == HealthStatus::Isolated {
            return;
        }

        entry.consecutive_successes += 1;
        entry.consecutive_failures = 0;
        entry.last_update = Instant::now();
        if entry.consecutive_successes >= self.success_threshold {
            entry.status = HealthStatus::Healthy;
        } else if entry.status == HealthStatus::Unhealthy {
            entry.status = HealthStatus::Suspect;
        }
    }

    fn status(&self, instance: &Instance) -> HealthStatus {
        let entries = self.entries.read().expect("detector lock poisoned");
        entries
            .get(&instance.id)
            .map(|e| e.status)
            .unwrap_or(HealthStatus::Healthy)
    }
}

/// Detector probing liveness with a bounded TCP dial.
pub struct TimeoutDetector {
    base: BaseDetector,
    connect_timeout: Duration,
}

impl TimeoutDetector {
    pub fn new(config: &FailoverConfig) -> Self {
        Self {
            base: BaseDetector::new(config),
            connect_timeout: config.connection_timeout,
        }
    }
}

#[async_trait]
impl Detector for TimeoutDetector {
    async fn detect(
        &self,
        ctx: &CallContext,
        instance: &Instance,
    ) -> Result<HealthStatus, FailoverError> {
        let recorded = self.base.status(instance);
        if matches!(recorded, HealthStatus::Unhealthy | HealthStatus::Isolated) {
            return Ok(recorded);
        }

        let dial = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&instance.address));
        match ctx.run(dial).await {
            Ok(Ok(Ok(stream))) => {
                drop(stream);
                self.base.mark_success(instance);
                Ok(self.base.status(instance))
            }
            Ok(Ok(Err(err))) => {
                self.base.mark_failed(instance);
                Err(FailoverError::Connection(err.to_string()))
            }
            Ok(Err(_elapsed)) => {
                self.base.mark_failed(instance);
                Err(FailoverError::RequestTimeout)
            }
            Err(ctx_err) => Err(ctx_err),
        }
    }

    fn mark_failed(&self, instance: &Instance) {
        self.base.mark_failed(instance);
    }

    fn mark_success(&self, instance: &Instance) {
        self.base.mark_success(instance);
    }

    fn status(&self, instance: &Instance) -> HealthStatus {
        self.base.status(instance)
    }
}

const DEFAULT_ERROR_WINDOW: usize = 100;

/// Detector classifying health from a sliding window of call outcomes.
///
/// With at least 10 samples and an error rate above 50% the instance is
/// Unhealthy; with at least 5 samples and a rate above 20% it is Suspect;
/// with at least 5 samples below that it is Healthy. A window with no
/// update inside the detection time reads as Healthy again.
pub struct ErrorRateDetector {
    base: BaseDetector,
    windows: RwLock<HashMap<String, VecDeque<bool>>>,
    window_size: usize,
    detection_window: Duration,
}

impl ErrorRateDetector {
    pub fn new(config: &FailoverConfig, window_size: usize) -> Self {
        Self {
            base: BaseDetector::new(config),
            windows: RwLock::new(HashMap::new()),
            window_size: if window_size == 0 { DEFAULT_ERROR_WINDOW } else { window_size },
            detection_window: config.failure_detection_time,
        }
    }

    /// Feeds one call outcome into the instance's window and reclassifies.
    pub fn report_request(&self, instance: &Instance, success: bool) {
        let (samples, errors) = {
            let mut windows = self.windows.write().expect("detector lock poisoned");
            let window = windows.entry(instance.id.clone()).or_default();
            if window.len() >= self.window_size {
                window.pop_front();
            }
            window.push_back(success);
            let errors = window.iter().filter(|ok| !**ok).count();
            (window.len(), errors)
        };

        let error_rate = errors as f64 / samples as f64;
        if samples >= 10 && error_rate > 0.5 {
            self.base.set_status(&instance.id, HealthStatus::Unhealthy);
        } else if samples >= 5 && error_rate > 0.2 {
            self.base.set_status(&instance.id, HealthStatus::Suspect);
        } else if samples >= 5 {
            self.base.set_status(&instance.id, HealthStatus::Healthy);
        } else {
            // Not enough samples to reclassify; keep the recorded status
            // but refresh its timestamp.
            self.base.set_status(&instance.id, self.base.status(instance));
        }
    }
}

#[async_trait]
impl Detector for ErrorRateDetector {
    async fn detect(
        &self,
        _ctx: &CallContext,
        instance: &Instance,
    ) -> Result<HealthStatus, FailoverError> {
        match self.base.last_update(&instance.id) {
            None => Ok(HealthStatus::Healthy),
            Some(last_update) if last_update.elapsed() > self.detection_window => {
                // Stale window; assume recovered until new samples arrive.
                Ok(HealthStatus::Healthy)
            }
            Some(_) => Ok(self.base.status(instance)),
        }
    }

    fn mark_failed(&self, instance: &Instance) {
        self.report_request(instance, false);
        self.base.mark_failed(instance);
    }

    fn mark_success(&self, instance: &Instance) {
        self.report_request(instance, true);
        self.base.mark_success(instance);
    }

    fn status(&self, instance: &Instance) -> HealthStatus {
        self.base.status(instance)
    }
}

/// User-supplied probe returning whether the instance is healthy.
pub type HealthProbe =
    Arc<dyn Fn(Arc<Instance>) -> BoxFuture<'static, bool> + Send + Sync>;

/// A [`HealthProbe`] that dials the instance address over TCP.
pub fn tcp_probe(connect_timeout: Duration) -> HealthProbe {
    Arc::new(move |instance: Arc<Instance>| {
        Box::pin(async move {
            matches!(
                tokio::time::timeout(connect_timeout, TcpStream::connect(&instance.address)).await,
                Ok(Ok(_))
            )
        })
    })
}

/// Detector driving a user-supplied probe over a cached instance set on a
/// timer, in addition to probing on demand.
pub struct HealthCheckDetector {
    base: Arc<BaseDetector>,
    probe: HealthProbe,
    check_interval: Duration,
    instances: Arc<RwLock<Vec<Arc<Instance>>>>,
    shutdown: CancellationToken,
    running: AtomicBool,
}

impl HealthCheckDetector {
    pub fn new(config: &FailoverConfig, probe: HealthProbe) -> Self {
        Self {
            base: Arc::new(BaseDetector::new(config)),
            probe,
            check_interval: config.failure_detection_time,
            instances: Arc::new(RwLock::new(Vec::new())),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Replaces the cached instance set the periodic loop walks.
    pub fn update_instances(&self, instances: Vec<Arc<Instance>>) {
        *self.instances.write().expect("detector lock poisoned") = instances;
    }

    /// Starts the periodic check loop. Idempotent; a stopped detector stays
    /// stopped.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let base = Arc::clone(&self.base);
        let probe = Arc::clone(&self.probe);
        let instances = Arc::clone(&self.instances);
        let shutdown = self.shutdown.clone();
        let check_interval = self.check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        let snapshot = instances.read().expect("detector lock poisoned").clone();
                        check_instances(&base, &probe, snapshot).await;
                    }
                }
            }
        });
    }

    /// Stops the periodic check loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

impl Drop for HealthCheckDetector {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// One pass of the periodic loop: probe every instance concurrently and
/// feed the outcomes into the passive core.
async fn check_instances(
    base: &BaseDetector,
    probe: &HealthProbe,
    instances: Vec<Arc<Instance>>,
) {
    let probes = instances.into_iter().map(|instance| {
        let probe = Arc::clone(probe);
        async move {
            let healthy = probe(Arc::clone(&instance)).await;
            (instance, healthy)
        }
    });

    for (instance, healthy) in futures::future::join_all(probes).await {
        if healthy {
            base.mark_success(&instance);
        } else {
            debug!(instance = %instance.id, "periodic health check failed");
            base.mark_failed(&instance);
        }
    }
}

#[async_trait]
impl Detector for HealthCheckDetector {
    async fn detect(
        &self,
        ctx: &CallContext,
        instance: &Instance,
    ) -> Result<HealthStatus, FailoverError> {
        let recorded = self.base.status(instance);
        if matches!(recorded, HealthStatus::Unhealthy | HealthStatus::Isolated) {
            return Ok(recorded);
        }

        let probe = (self.probe)(Arc::new(instance.clone()));
        match ctx.run(probe).await {
            Ok(true) => {
                self.base.mark_success(instance);
                Ok(self.base.status(instance))
            }
            Ok(false) => {
                self.base.mark_failed(instance);
                Ok(self.base.status(instance))
            }
            Err(ctx_err) => Err(ctx_err),
        }
    }

    fn mark_failed(&self, instance: &Instance) {
        self.base.mark_failed(instance);
    }

    fn mark_success(&self, instance: &Instance) {
        self.base.mark_success(instance);
    }

    fn status(&self, instance: &Instance) -> HealthStatus {
        self.base.status(instance)
    }
}

/// Builds the detector variant named by the configuration.
pub fn build_detector(config: &FailoverConfig) -> Arc<dyn Detector> {
    match config.detector {
        DetectorKind::Passive => Arc::new(BaseDetector::new(config)),
        DetectorKind::Timeout => Arc::new(TimeoutDetector::new(config)),
        DetectorKind::ErrorRate => Arc::new(ErrorRateDetector::new(config, DEFAULT_ERROR_WINDOW)),
        DetectorKind::HealthCheck => {
            let probe = tcp_probe(config.connection_timeout);
            Arc::new(HealthCheckDetector::new(config, probe))
        }
    }
}
