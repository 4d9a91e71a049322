//! Service naming and instance records.
//!
//! An [`Instance`] is one addressable backend for a `(service, version)`
//! pair. Instances are stored in the registry as JSON values under keys of
//! the form `/fyerrpc/services/{service}/{version}/{instance_id}`; the key
//! scheme is a fixed external contract shared with other implementations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Instance is accepting traffic.
pub const STATUS_ENABLED: u8 = 1;
/// Instance is administratively disabled.
pub const STATUS_DISABLED: u8 = 0;

/// Key prefix under which all service instances live in the registry.
pub const SERVICE_KEY_PREFIX: &str = "/fyerrpc/services";

/// One addressable backend of a service.
///
/// Immutable after construction except for `status`; cluster components hold
/// instances behind `Arc` and replace whole snapshots instead of mutating
/// entries in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique identifier within the service.
    pub id: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Network address, e.g. `127.0.0.1:8000`.
    pub address: String,
    /// Free-form metadata consumed by selectors (group, zone, weight, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// [`STATUS_ENABLED`] or [`STATUS_DISABLED`].
    pub status: u8,
    /// Unix timestamp (seconds) of the last registry update.
    #[serde(default)]
    pub updated_at: i64,
}

impl Instance {
    /// Creates an enabled instance with empty metadata.
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        version: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            version: version.into(),
            address: address.into(),
            metadata: HashMap::new(),
            status: STATUS_ENABLED,
            updated_at: 0,
        }
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the instance is accepting traffic.
    pub fn is_enabled(&self) -> bool {
        self.status == STATUS_ENABLED
    }

    /// The registry key for this instance.
    pub fn service_key(&self) -> String {
        build_service_key(&self.service, &self.version, &self.id)
    }
}

/// Builds the registry key for an instance.
pub fn build_service_key(service: &str, version: &str, instance_id: &str) -> String {
    format!("{SERVICE_KEY_PREFIX}/{service}/{version}/{instance_id}")
}

/// Builds the registry prefix covering every instance of a service version.
pub fn build_service_prefix(service: &str, version: &str) -> String {
    format!("{SERVICE_KEY_PREFIX}/{service}/{version}/")
}

/// Splits a registry key back into `(service, version, instance_id)`.
///
/// Returns `None` when the key does not follow the service key scheme.
pub fn parse_service_key(key: &str) -> Option<(&str, &str, &str)> {
    let rest = key.strip_prefix(SERVICE_KEY_PREFIX)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let service = parts.next()?;
    let version = parts.next()?;
    let id = parts.next()?;
    if service.is_empty() || version.is_empty() || id.is_empty() || parts.next().is_some() {
        return None;
    }
    Some((service, version, id))
}
