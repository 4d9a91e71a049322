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

//! Rudder Metrics Collection
//!
//! Response-time and resilience-event metrics for the Rudder RPC client
//! stack. The [`Metrics`] trait is the sink the fastest-response load
//! balancer reads latencies from and the failover layer reports events to;
//! [`InMemoryMetrics`] is the default process-local implementation and
//! [`NoopMetrics`] disables collection entirely.
//!
//! Export to a scraping endpoint is a separate concern and intentionally not
//! part of this crate.

pub mod memory;
pub mod sink;

pub use memory::InMemoryMetrics;
pub use sink::{Metrics, MetricsError, NoopMetrics, ResponseMetric, ResponseStatus};
