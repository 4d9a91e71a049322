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

//! The metrics sink trait and its no-op implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Errors raised by a metrics sink.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("no samples recorded for {service}/{instance}")]
    NoSamples { service: String, instance: String },

    #[error("metrics sink closed")]
    Closed,

    #[error("metrics backend error: {0}")]
    Backend(String),
}

/// Outcome label attached to a response sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Error,
}

/// One response-time sample.
#[derive(Debug, Clone)]
pub struct ResponseMetric {
    /// Service name.
    pub service: String,
    /// Method name, empty when not applicable.
    pub method: String,
    /// Instance address the call went to.
    pub instance: String,
    /// Observed duration.
    pub duration: Duration,
    /// Call outcome.
    pub status: ResponseStatus,
    /// Sample timestamp.
    pub timestamp: SystemTime,
    /// Additional labels.
    pub tags: HashMap<String, String>,
}

impl ResponseMetric {
    /// Creates a successful response sample with the current timestamp.
    pub fn success(
        service: impl Into<String>,
        instance: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            method: String::new(),
            instance: instance.into(),
            duration,
            status: ResponseStatus::Success,
            timestamp: SystemTime::now(),
            tags: HashMap::new(),
        }
    }
}

/// Sink for response-time and resilience-event metrics.
///
/// The fastest-response balancer reads per-instance latencies from this
/// sink; the failover layer reports failovers, breaker transitions and
/// retries into it for operational visibility.
#[async_trait]
pub trait Metrics: Send + Sync {
    /// Records a response-time sample.
    async fn record_response(&self, metric: ResponseMetric) -> Result<(), MetricsError>;

    /// Average response time of one instance of a service.
    async fn latency(&self, service: &str, instance: &str) -> Result<Duration, MetricsError>;

    /// Average response time of every known instance of a service.
    async fn service_latency(
        &self,
        service: &str,
    ) -> Result<HashMap<String, Duration>, MetricsError>;

    /// Records a failover from one instance to another.
    async fn record_failover(&self, service: &str, from_instance: &str, to_instance: &str);

    /// Records a circuit breaker state change. `state` is the breaker state
    /// label (`closed`, `open`, `half_open`).
    async fn record_circuit_break(&self, service: &str, instance: &str, state: &str);

    /// Records one retry attempt.
    async fn record_retry(&self, service: &str, instance: &str, attempt: u32);

    /// Ratio of failed-over calls to total calls for a service.
    async fn failover_rate(&self, service: &str) -> Result<f64, MetricsError>;
}

/// Sink that drops everything; used when metrics are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

#[async_trait]
impl Metrics for NoopMetrics {
    async fn record_response(&self, _metric: ResponseMetric) -> Result<(), MetricsError> {
        Ok(())
    }

    async fn latency(&self, service: &str, instance: &str) -> Result<Duration, MetricsError> {
        Err(MetricsError::NoSamples {
            service: service.to_string(),
            instance: instance.to_string(),
        })
    }

    async fn service_latency(
        &self,
        _service: &str,
    ) -> Result<HashMap<String, Duration>, MetricsError> {
        Ok(HashMap::new())
    }

    async fn record_failover(&self, _service: &str, _from_instance: &str, _to_instance: &str) {}

    async fn record_circuit_break(&self, _service: &str, _instance: &str, _state: &str) {}

    async fn record_retry(&self, _service: &str, _instance: &str, _attempt: u32) {}

    async fn failover_rate(&self, _service: &str) -> Result<f64, MetricsError> {
        Ok(0.0)
    }
}
