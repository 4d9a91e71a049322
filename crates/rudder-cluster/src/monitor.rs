//! Per-instance call statistics.

use crate::detector::HealthStatus;
use crate::error::FailoverError;
use rudder_common::Instance;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Rolling statistics for one instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceStats {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failure_requests: u64,
    pub avg_response_time: Duration,
    pub last_response_time: Duration,
    pub last_failure: Option<Instant>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// Observer fed by the failover orchestrator after every attempt.
pub trait InstanceMonitor: Send + Sync {
    /// Records a successful call and its duration.
    fn report_success(&self, instance: &Instance, duration: Duration);

    /// Records a failed call.
    fn report_failure(&self, instance: &Instance, error: &FailoverError);

    /// Health classification derived from recent statistics.
    fn status(&self, instance: &Instance) -> HealthStatus;

    /// Snapshot of the instance's statistics.
    fn stats(&self, instance: &Instance) -> InstanceStats;
}

/// Failure streak at which the monitor classifies an instance Unhealthy.
const MONITOR_UNHEALTHY_STREAK: u32 = 3;
/// A failure inside this window keeps an instance Suspect.
const MONITOR_SUSPECT_WINDOW: Duration = Duration::from_secs(30);

/// In-memory [`InstanceMonitor`] with a running average response time.
#[derive(Debug, Default)]
pub struct SimpleInstanceMonitor {
    stats: RwLock<HashMap<String, InstanceStats>>,
}

impl SimpleInstanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Average response time, or `None` when no successful call has been
    /// observed yet. Used by the lowest-latency selection strategy.
    pub fn avg_latency(&self, instance_id: &str) -> Option<Duration> {
        let stats = self.stats.read().expect("monitor lock poisoned");
        stats
            .get(instance_id)
            .filter(|s| s.success_requests > 0)
            .map(|s| s.avg_response_time)
    }
}

impl InstanceMonitor for SimpleInstanceMonitor {
    fn report_success(&self, instance: &Instance, duration: Duration) {
        let mut stats = self.stats.write().expect("monitor lock poisoned");
        let entry = stats.entry(instance.id.clone()).or_default();

        entry.total_requests += 1;
        entry.success_requests += 1;
        entry.last_response_time = duration;
        entry.consecutive_failures = 0;

        if entry.avg_response_time.is_zero() {
            entry.avg_response_time = duration;
        } else {
            // Incremental mean over all observed requests.
            let old = entry.avg_response_time.as_nanos() as i128;
            let new = old + (duration.as_nanos() as i128 - old) / entry.total_requests as i128;
            entry.avg_response_time = Duration::from_nanos(new.max(0) as u64);
        }
    }

    fn report_failure(&self, instance: &Instance, error: &FailoverError) {
        let mut stats = self.stats.write().expect("monitor lock poisoned");
        let entry = stats.entry(instance.id.clone()).or_default();

        entry.total_requests += 1;
        entry.failure_requests += 1;
        entry.last_failure = Some(Instant::now());
        entry.consecutive_failures += 1;
        entry.last_error = Some(error.to_string());
    }

    fn status(&self, instance: &Instance) -> HealthStatus {
        let stats = self.stats.read().expect("monitor lock poisoned");
        let entry = match stats.get(&instance.id) {
            Some(entry) => entry,
            None => return HealthStatus::Healthy,
        };

        if entry.consecutive_failures >= MONITOR_UNHEALTHY_STREAK {
            return HealthStatus::Unhealthy;
        }

        if entry.consecutive_failures > 0 {
            if let Some(last_failure) = entry.last_failure {
                if last_failure.elapsed() < MONITOR_SUSPECT_WINDOW {
                    return HealthStatus::Suspect;
                }
            }
        }

        HealthStatus::Healthy
    }

    fn stats(&self, instance: &Instance) -> InstanceStats {
        let stats = self.stats.read().expect("monitor lock poisoned");
        stats.get(&instance.id).cloned().unwrap_or_default()
    }
}
