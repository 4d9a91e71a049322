//! Per-instance circuit breaking.
//!
//! Every instance gets its own three-state gate. The outer map lock is held
//! only for lookup and insert; all state decisions happen under the
//! per-instance lock, with atomics for the half-open probe counters so
//! concurrent probes do not contend on the state lock.

use crate::config::FailoverConfig;
use crate::error::FailoverError;
use rudder_common::Instance;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Circuit breaker state for one instance.
///
/// - **Closed → Open**: consecutive errors reach the threshold
/// - **Open → HalfOpen**: the open window elapses; the next `allow` admits
///   a probe
/// - **HalfOpen → Closed**: probe success rate reaches the threshold
/// - **HalfOpen → Open**: any probe failure, with a longer open window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Label used when reporting transitions to a metrics sink.
    pub fn label(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Gate consulted before every attempt against an instance.
pub trait CircuitBreaker: Send + Sync {
    /// Whether a call against the instance may proceed.
    ///
    /// Returns `Err(FailoverError::CircuitOpen)` when the gate is shut.
    /// The first `allow` after an open window elapses flips the breaker to
    /// half-open and admits the caller as a probe.
    fn allow(&self, instance: &Instance) -> Result<(), FailoverError>;

    /// Records a successful call.
    fn mark_success(&self, instance: &Instance);

    /// Records a failed call.
    fn mark_failure(&self, instance: &Instance, error: &FailoverError);

    /// The current state, reporting `HalfOpen` for an Open breaker whose
    /// window has already elapsed.
    fn state(&self, instance: &Instance) -> BreakerState;

    /// Clears all state for the instance back to Closed.
    fn reset(&self, instance: &Instance);
}

/// Mutable breaker state guarded by the per-instance lock.
#[derive(Debug)]
struct BreakerCore {
    state: BreakerState,
    consecutive_errors: u32,
    last_error_at: Option<Instant>,
    open_until: Option<Instant>,
    last_access: Instant,
    open_count: u32,
    backoff_factor: f64,
}

impl BreakerCore {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_errors: 0,
            last_error_at: None,
            open_until: None,
            last_access: Instant::now(),
            open_count: 0,
            backoff_factor: 1.0,
        }
    }
}

/// Per-instance entry: locked core plus lock-free half-open counters.
#[derive(Debug)]
struct InstanceBreaker {
    core: RwLock<BreakerCore>,
    half_open_attempts: AtomicU32,
    half_open_successes: AtomicU32,
    half_open_calls: AtomicU32,
}

impl InstanceBreaker {
    fn new() -> Self {
        Self {
            core: RwLock::new(BreakerCore::new()),
            half_open_attempts: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            half_open_calls: AtomicU32::new(0),
        }
    }

    fn zero_half_open(&self) {
        self.half_open_attempts.store(0, Ordering::Relaxed);
        self.half_open_successes.store(0, Ordering::Relaxed);
        self.half_open_calls.store(0, Ordering::Relaxed);
    }
}

/// Default interval between cleanup sweeps.
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Default idle time after which a Closed entry is dropped.
const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(60 * 60);
/// The open window never exceeds this multiple of the base timeout.
const MAX_BACKOFF_MULTIPLE: u32 = 10;

/// The standard [`CircuitBreaker`] implementation.
///
/// A background sweep drops entries that have been idle past `max_idle`,
/// but only while Closed, so an Open breaker keeps its lockout across quiet
/// periods. The sweep stops when the breaker is dropped or
/// [`SimpleCircuitBreaker::close`] is called.
pub struct SimpleCircuitBreaker {
    threshold: u32,
    timeout: Duration,
    half_open_max_calls: u32,
    half_open_success_threshold: f64,
    instances: Arc<RwLock<HashMap<String, Arc<InstanceBreaker>>>>,
    shutdown: CancellationToken,
}

impl SimpleCircuitBreaker {
    /// Creates a breaker and spawns its cleanup sweep. Must be called from
    /// within a tokio runtime.
    pub fn new(config: &FailoverConfig) -> Self {
        Self::with_cleanup(config, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_IDLE)
    }

    /// Creates a breaker with explicit cleanup cadence.
    pub fn with_cleanup(
        config: &FailoverConfig,
        cleanup_interval: Duration,
        max_idle: Duration,
    ) -> Self {
        let instances: Arc<RwLock<HashMap<String, Arc<InstanceBreaker>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        tokio::spawn(Self::cleanup_loop(
            Arc::clone(&instances),
            shutdown.clone(),
            cleanup_interval,
            max_idle,
        ));

        Self {
            threshold: config.circuit_break_threshold,
            timeout: config.circuit_break_timeout,
            half_open_max_calls: config.half_open_max_calls,
            half_open_success_threshold: config.half_open_success_threshold,
            instances,
            shutdown,
        }
    }

    /// Stops the cleanup sweep.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    async fn cleanup_loop(
        instances: Arc<RwLock<HashMap<String, Arc<InstanceBreaker>>>>,
        shutdown: CancellationToken,
        interval: Duration,
        max_idle: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => Self::remove_stale(&instances, max_idle),
            }
        }
    }

    fn remove_stale(
        instances: &RwLock<HashMap<String, Arc<InstanceBreaker>>>,
        max_idle: Duration,
    ) {
        let now = Instant::now();
        let mut map = instances.write().expect("breaker map lock poisoned");
        map.retain(|id, entry| {
            let core = entry.core.read().expect("breaker lock poisoned");
            let stale = core.state == BreakerState::Closed
                && now.duration_since(core.last_access) > max_idle;
            if stale {
                debug!(instance = %id, "dropping idle breaker state");
            }
            !stale
        });
    }

    fn entry(&self, instance: &Instance) -> Arc<InstanceBreaker> {
        {
            let map = self.instances.read().expect("breaker map lock poisoned");
            if let Some(entry) = map.get(&instance.id) {
                return Arc::clone(entry);
            }
        }

        let mut map = self.instances.write().expect("breaker map lock poisoned");
        Arc::clone(
            map.entry(instance.id.clone())
                .or_insert_with(|| Arc::new(InstanceBreaker::new())),
        )
    }

    /// Open window length for the current backoff factor, clamped to
    /// [`MAX_BACKOFF_MULTIPLE`] times the base timeout.
    fn open_window(&self, backoff_factor: f64) -> Duration {
        let window = self.timeout.mul_f64(backoff_factor.max(1.0));
        window.min(self.timeout * MAX_BACKOFF_MULTIPLE)
    }
}

impl Drop for SimpleCircuitBreaker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl CircuitBreaker for SimpleCircuitBreaker {
    fn allow(&self, instance: &Instance) -> Result<(), FailoverError> {
        let entry = self.entry(instance);
        let mut core = entry.core.write().expect("breaker lock poisoned");
        core.last_access = Instant::now();

        match core.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                match core.open_until {
                    Some(open_until) if Instant::now() >= open_until => {
                        // Window elapsed; flip to half-open and admit the
                        // caller as the first probe.
                        core.state = BreakerState::HalfOpen;
                        core.open_until = None;
                        entry.zero_half_open();
                        entry.half_open_attempts.fetch_add(1, Ordering::Relaxed);
                        entry.half_open_calls.fetch_add(1, Ordering::Relaxed);
                        info!(instance = %instance.id, "circuit breaker half-open");
                        Ok(())
                    }
                    _ => Err(FailoverError::CircuitOpen),
                }
            }
            BreakerState::HalfOpen => {
                if entry.half_open_attempts.load(Ordering::Relaxed) < self.half_open_max_calls {
                    entry.half_open_attempts.fetch_add(1, Ordering::Relaxed);
                    entry.half_open_calls.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                } else {
                    Err(FailoverError::CircuitOpen)
                }
            }
        }
    }

    fn mark_success(&self, instance: &Instance) {
        let entry = self.entry(instance);
        let mut core = entry.core.write().expect("breaker lock poisoned");
        core.last_access = Instant::now();
        core.consecutive_errors = 0;

        if core.state == BreakerState::HalfOpen {
            let successes = entry.half_open_successes.fetch_add(1, Ordering::Relaxed) + 1;
            let calls = entry.half_open_calls.load(Ordering::Relaxed);
            if calls > 0 && successes as f64 / calls as f64 >= self.half_open_success_threshold {
                core.state = BreakerState::Closed;
                core.backoff_factor = 1.0;
                entry.zero_half_open();
                info!(instance = %instance.id, "circuit breaker closed");
            }
        }
    }

    fn mark_failure(&self, instance: &Instance, error: &FailoverError) {
        let entry = self.entry(instance);
        let mut core = entry.core.write().expect("breaker lock poisoned");
        let now = Instant::now();
        core.last_access = now;
        core.last_error_at = Some(now);
        core.consecutive_errors += 1;

        match core.state {
            BreakerState::Closed => {
                if core.consecutive_errors >= self.threshold {
                    core.state = BreakerState::Open;
                    core.open_count += 1;
                    let window = self.open_window(core.backoff_factor);
                    core.open_until = Some(now + window);
                    core.backoff_factor = (core.backoff_factor.max(1.0)) * 2.0;
                    info!(
                        instance = %instance.id,
                        errors = core.consecutive_errors,
                        window_ms = window.as_millis() as u64,
                        %error,
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                // Any probe failure reopens with a longer window.
                core.state = BreakerState::Open;
                core.open_count += 1;
                let window = self.open_window(core.backoff_factor);
                core.open_until = Some(now + window);
                core.backoff_factor *= 1.5;
                entry.zero_half_open();
                info!(
                    instance = %instance.id,
                    window_ms = window.as_millis() as u64,
                    %error,
                    "circuit breaker reopened from half-open"
                );
            }
            BreakerState::Open => {}
        }
    }

    fn state(&self, instance: &Instance) -> BreakerState {
        let entry = self.entry(instance);
        let core = entry.core.read().expect("breaker lock poisoned");
        if core.state == BreakerState::Open {
            if let Some(open_until) = core.open_until {
                if Instant::now() >= open_until {
                    return BreakerState::HalfOpen;
                }
            }
        }
        core.state
    }

    fn reset(&self, instance: &Instance) {
        let mut map = self.instances.write().expect("breaker map lock poisoned");
        map.insert(instance.id.clone(), Arc::new(InstanceBreaker::new()));
    }
}

/// Breaker that always allows; used when circuit breaking is not wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCircuitBreaker;

impl CircuitBreaker for NoopCircuitBreaker {
    fn allow(&self, _instance: &Instance) -> Result<(), FailoverError> {
        Ok(())
    }

    fn mark_success(&self, _instance: &Instance) {}

    fn mark_failure(&self, _instance: &Instance, _error: &FailoverError) {}

    fn state(&self, _instance: &Instance) -> BreakerState {
        BreakerState::Closed
    }

    fn reset(&self, _instance: &Instance) {}
}
