// Copyright 2025 Rudder Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process-local metrics sink.

use crate::sink::{Metrics, MetricsError, ResponseMetric, ResponseStatus};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

const DEFAULT_MAX_SAMPLES: usize = 100;

/// Bounded window of latency samples for one `(service, instance)` pair.
#[derive(Debug, Default)]
struct SampleWindow {
    samples: VecDeque<Duration>,
    total_calls: u64,
    error_calls: u64,
}

impl SampleWindow {
    fn record(&mut self, duration: Duration, status: ResponseStatus, max_samples: usize) {
        self.total_calls += 1;
        if status == ResponseStatus::Error {
            self.error_calls += 1;
            return; // latency windows track successful calls only
        }
        if self.samples.len() >= max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }
}

#[derive(Debug, Default)]
struct Counters {
    failovers: u64,
    retries: u64,
    breaker_transitions: HashMap<String, u64>,
    calls: u64,
}

/// In-memory [`Metrics`] implementation with bounded per-instance latency
/// windows. This is the default sink when metrics are enabled.
#[derive(Debug)]
pub struct InMemoryMetrics {
    max_samples: usize,
    // (service, instance) -> latency window
    windows: RwLock<HashMap<(String, String), SampleWindow>>,
    // service -> event counters
    counters: RwLock<HashMap<String, Counters>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::with_max_samples(DEFAULT_MAX_SAMPLES)
    }

    /// Creates a sink keeping at most `max_samples` latency samples per
    /// `(service, instance)` pair.
    pub fn with_max_samples(max_samples: usize) -> Self {
        Self {
            max_samples: max_samples.max(1),
            windows: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Total retries recorded for a service.
    pub fn retry_count(&self, service: &str) -> u64 {
        self.counters
            .read()
            .expect("metrics lock poisoned")
            .get(service)
            .map(|c| c.retries)
            .unwrap_or(0)
    }

    /// Total failovers recorded for a service.
    pub fn failover_count(&self, service: &str) -> u64 {
        self.counters
            .read()
            .expect("metrics lock poisoned")
            .get(service)
            .map(|c| c.failovers)
            .unwrap_or(0)
    }

    /// Breaker transition counts per state label for a service.
    pub fn breaker_transitions(&self, service: &str) -> HashMap<String, u64> {
        self.counters
            .read()
            .expect("metrics lock poisoned")
            .get(service)
            .map(|c| c.breaker_transitions.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Metrics for InMemoryMetrics {
    async fn record_response(&self, metric: ResponseMetric) -> Result<(), MetricsError> {
        let mut windows = self.windows.write().expect("metrics lock poisoned");
        windows
            .entry((metric.service.clone(), metric.instance.clone()))
            .or_default()
            .record(metric.duration, metric.status, self.max_samples);
        drop(windows);

        let mut counters = self.counters.write().expect("metrics lock poisoned");
        counters.entry(metric.service).or_default().calls += 1;
        Ok(())
    }

    async fn latency(&self, service: &str, instance: &str) -> Result<Duration, MetricsError> {
        let windows = self.windows.read().expect("metrics lock poisoned");
        windows
            .get(&(service.to_string(), instance.to_string()))
            .and_then(SampleWindow::average)
            .ok_or_else(|| MetricsError::NoSamples {
                service: service.to_string(),
                instance: instance.to_string(),
            })
    }

    async fn service_latency(
        &self,
        service: &str,
    ) -> Result<HashMap<String, Duration>, MetricsError> {
        let windows = self.windows.read().expect("metrics lock poisoned");
        Ok(windows
            .iter()
            .filter(|((svc, _), _)| svc == service)
            .filter_map(|((_, instance), window)| {
                window.average().map(|avg| (instance.clone(), avg))
            })
            .collect())
    }

    async fn record_failover(&self, service: &str, _from_instance: &str, _to_instance: &str) {
        let mut counters = self.counters.write().expect("metrics lock poisoned");
        counters.entry(service.to_string()).or_default().failovers += 1;
    }

    async fn record_circuit_break(&self, service: &str, instance: &str, state: &str) {
        tracing::debug!(service, instance, state, "circuit breaker transition");
        let mut counters = self.counters.write().expect("metrics lock poisoned");
        *counters
            .entry(service.to_string())
            .or_default()
            .breaker_transitions
            .entry(state.to_string())
            .or_insert(0) += 1;
    }

    async fn record_retry(&self, service: &str, _instance: &str, _attempt: u32) {
        let mut counters = self.counters.write().expect("metrics lock poisoned");
        counters.entry(service.to_string()).or_default().retries += 1;
    }

    async fn failover_rate(&self, service: &str) -> Result<f64, MetricsError> {
        let counters = self.counters.read().expect("metrics lock poisoned");
        let entry = match counters.get(service) {
            Some(entry) => entry,
            None => return Ok(0.0),
        };
        if entry.calls == 0 {
            return Ok(0.0);
        }
        Ok(entry.failovers as f64 / entry.calls as f64)
    }
}
