//! Background recovery of unhealthy instances.
//!
//! The manager tracks instances reported Unhealthy or Suspect and probes
//! them on a timer through the configured strategy. Once an instance has
//! accumulated enough consecutive successful recoveries it leaves the list;
//! selection sees it again as soon as the detector marks it Healthy.

use crate::config::{FailoverConfig, RecoveryKind};
use crate::context::CallContext;
use crate::detector::{Detector, HealthStatus};
use crate::error::FailoverError;
use async_trait::async_trait;
use rudder_common::Instance;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Policy deciding when and how to probe an instance back to health.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Whether a recovery attempt makes sense right now.
    async fn can_recover(&self, ctx: &CallContext, instance: &Instance) -> bool;

    /// Runs one recovery probe. `Ok` means this probe succeeded and, for
    /// windowed strategies, that the recovery condition has been met or is
    /// still accumulating.
    async fn recover(&self, ctx: &CallContext, instance: &Instance) -> Result<(), FailoverError>;

    /// Minimum wait between recovery attempts for the instance.
    fn recovery_delay(&self, instance: &Instance) -> Duration;
}

/// Recovery bookkeeping for one tracked instance.
#[derive(Debug, Clone)]
pub struct RecoveryState {
    pub instance: Arc<Instance>,
    pub status: HealthStatus,
    pub last_attempt: Option<Instant>,
    pub attempt_count: u32,
    pub success_count: u32,
}

/// Timer-driven loop probing tracked instances via a [`RecoveryStrategy`].
pub struct RecoveryManager {
    strategy: Arc<dyn RecoveryStrategy>,
    states: Arc<Mutex<HashMap<String, RecoveryState>>>,
    recovery_threshold: u32,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl RecoveryManager {
    /// Creates the manager and spawns its recovery loop. Must be called
    /// from within a tokio runtime.
    pub fn new(config: &FailoverConfig, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        let states: Arc<Mutex<HashMap<String, RecoveryState>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let manager = Self {
            strategy,
            states,
            recovery_threshold: config.recovery_threshold,
            request_timeout: config.request_timeout,
            shutdown,
        };
        manager.spawn_loop(config.recovery_interval);
        manager
    }

    fn spawn_loop(&self, interval: Duration) {
        let strategy = Arc::clone(&self.strategy);
        let states = Arc::clone(&self.states);
        let threshold = self.recovery_threshold;
        let request_timeout = self.request_timeout;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        Self::try_recover(&strategy, &states, threshold, request_timeout).await;
                    }
                }
            }
        });
    }

    /// Starts tracking an instance. Only Unhealthy and Suspect instances
    /// are accepted; tracking an instance twice is a no-op.
    pub fn add_instance(&self, instance: Arc<Instance>, status: HealthStatus) {
        if !matches!(status, HealthStatus::Unhealthy | HealthStatus::Suspect) {
            return;
        }

        let mut states = self.states.lock().expect("recovery lock poisoned");
        states.entry(instance.id.clone()).or_insert_with(|| {
            debug!(instance = %instance.id, status = status.label(), "tracking for recovery");
            RecoveryState {
                instance,
                status,
                last_attempt: None,
                attempt_count: 0,
                success_count: 0,
            }
        });
    }

    /// Stops tracking an instance.
    pub fn remove_instance(&self, instance_id: &str) {
        let mut states = self.states.lock().expect("recovery lock poisoned");
        states.remove(instance_id);
    }

    /// The recovery bookkeeping for an instance, if tracked.
    pub fn recovery_state(&self, instance_id: &str) -> Option<RecoveryState> {
        let states = self.states.lock().expect("recovery lock poisoned");
        states.get(instance_id).cloned()
    }

    /// Number of instances currently tracked.
    pub fn tracked(&self) -> usize {
        self.states.lock().expect("recovery lock poisoned").len()
    }

    /// Stops the recovery loop.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn try_recover(
        strategy: &Arc<dyn RecoveryStrategy>,
        states: &Arc<Mutex<HashMap<String, RecoveryState>>>,
        threshold: u32,
        request_timeout: Duration,
    ) {
        let due: Vec<Arc<Instance>> = {
            let mut map = states.lock().expect("recovery lock poisoned");
            let now = Instant::now();
            map.values_mut()
                .filter(|state| match state.last_attempt {
                    Some(last) => {
                        now.duration_since(last) >= strategy.recovery_delay(&state.instance)
                    }
                    None => true,
                })
                .map(|state| {
                    state.last_attempt = Some(now);
                    state.attempt_count += 1;
                    Arc::clone(&state.instance)
                })
                .collect()
        };

        for instance in due {
            let ctx = CallContext::with_timeout(request_timeout);
            if !strategy.can_recover(&ctx, &instance).await {
                continue;
            }

            let recovered = strategy.recover(&ctx, &instance).await.is_ok();
            let mut map = states.lock().expect("recovery lock poisoned");
            let state = match map.get_mut(&instance.id) {
                Some(state) => state,
                None => continue,
            };

            if recovered {
                state.success_count += 1;
                if state.success_count >= threshold {
                    info!(instance = %instance.id, "instance recovered");
                    map.remove(&instance.id);
                }
            } else {
                state.success_count = 0;
            }
        }
    }
}

impl Drop for RecoveryManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Probes as soon as possible; suited to short-lived outages.
pub struct ImmediateRecoveryStrategy {
    detector: Arc<dyn Detector>,
}

const IMMEDIATE_RECOVERY_DELAY: Duration = Duration::from_millis(100);

impl ImmediateRecoveryStrategy {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl RecoveryStrategy for ImmediateRecoveryStrategy {
    async fn can_recover(&self, _ctx: &CallContext, _instance: &Instance) -> bool {
        true
    }

    async fn recover(&self, ctx: &CallContext, instance: &Instance) -> Result<(), FailoverError> {
        match self.detector.detect(ctx, instance).await? {
            HealthStatus::Healthy => {
                self.detector.mark_success(instance);
                Ok(())
            }
            _ => Err(FailoverError::ServiceUnavailable),
        }
    }

    fn recovery_delay(&self, _instance: &Instance) -> Duration {
        IMMEDIATE_RECOVERY_DELAY
    }
}

/// Probes with per-instance exponentially growing delays, easing pressure
/// on a backend that keeps failing its probes.
pub struct GradualRecoveryStrategy {
    detector: Arc<dyn Detector>,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    attempts: RwLock<HashMap<String, u32>>,
}

impl GradualRecoveryStrategy {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5 * 60),
            backoff_factor: 1.5,
            attempts: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RecoveryStrategy for GradualRecoveryStrategy {
    async fn can_recover(&self, _ctx: &CallContext, _instance: &Instance) -> bool {
        true
    }

    async fn recover(&self, ctx: &CallContext, instance: &Instance) -> Result<(), FailoverError> {
        let result = self.detector.detect(ctx, instance).await;

        let mut attempts = self.attempts.write().expect("recovery lock poisoned");
        match result {
            Ok(HealthStatus::Healthy) => {
                attempts.remove(&instance.id);
                self.detector.mark_success(instance);
                Ok(())
            }
            Ok(_) => {
                *attempts.entry(instance.id.clone()).or_insert(0) += 1;
                Err(FailoverError::ServiceUnavailable)
            }
            Err(err) => {
                *attempts.entry(instance.id.clone()).or_insert(0) += 1;
                Err(err)
            }
        }
    }

    fn recovery_delay(&self, instance: &Instance) -> Duration {
        let attempts = self.attempts.read().expect("recovery lock poisoned");
        let count = attempts.get(&instance.id).copied().unwrap_or(0);

        let mut delay = self.base_delay;
        for _ in 0..count {
            delay = delay.mul_f64(self.backoff_factor);
            if delay >= self.max_delay {
                return self.max_delay;
            }
        }
        delay
    }
}

/// Declares recovery only after a full window of successful probes.
pub struct ProbingRecoveryStrategy {
    detector: Arc<dyn Detector>,
    probing_threshold: usize,
    probing_interval: Duration,
    history: RwLock<HashMap<String, Vec<bool>>>,
}

impl ProbingRecoveryStrategy {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            probing_threshold: 3,
            probing_interval: Duration::from_secs(5),
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Overrides the probe window length.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.probing_threshold = threshold.max(1);
        self
    }
}

#[async_trait]
impl RecoveryStrategy for ProbingRecoveryStrategy {
    async fn can_recover(&self, _ctx: &CallContext, _instance: &Instance) -> bool {
        true
    }

    async fn recover(&self, ctx: &CallContext, instance: &Instance) -> Result<(), FailoverError> {
        let probe = self.detector.detect(ctx, instance).await;
        let success = matches!(probe, Ok(HealthStatus::Healthy));

        let window_full_of_successes = {
            let mut history = self.history.write().expect("recovery lock poisoned");
            let window = history.entry(instance.id.clone()).or_default();
            window.push(success);
            if window.len() > self.probing_threshold {
                window.remove(0);
            }
            window.len() == self.probing_threshold && window.iter().all(|ok| *ok)
        };

        if window_full_of_successes {
            let mut history = self.history.write().expect("recovery lock poisoned");
            history.remove(&instance.id);
            self.detector.mark_success(instance);
            return Ok(());
        }

        match probe {
            Ok(HealthStatus::Healthy) => Err(FailoverError::ServiceUnavailable), // window still filling
            Ok(_) => Err(FailoverError::ServiceUnavailable),
            Err(err) => Err(err),
        }
    }

    fn recovery_delay(&self, _instance: &Instance) -> Duration {
        self.probing_interval
    }
}

/// Builds the recovery strategy variant named by the configuration.
pub fn build_recovery_strategy(
    config: &FailoverConfig,
    detector: Arc<dyn Detector>,
) -> Arc<dyn RecoveryStrategy> {
    match config.recovery_strategy {
        RecoveryKind::Immediate => Arc::new(ImmediateRecoveryStrategy::new(detector)),
        RecoveryKind::Gradual => Arc::new(GradualRecoveryStrategy::new(detector)),
        RecoveryKind::Probing => Arc::new(ProbingRecoveryStrategy::new(detector)),
    }
}
