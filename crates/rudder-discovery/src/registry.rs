//! The registry capability and a process-local implementation.
//!
//! The production registry is an external system (a hierarchical key-value
//! store holding JSON instance records under the service key scheme); only
//! its interface is part of this crate. [`MemoryRegistry`] implements the
//! same contract in-process for tests, demos and single-node deployments.

use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use rudder_common::naming::{build_service_key, build_service_prefix};
use rudder_common::Instance;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of each subscriber channel. Subscribers observe the latest
/// snapshots, not necessarily every delta.
const SUBSCRIBE_BUFFER: usize = 10;

/// Service registry capability.
///
/// Instances live under `/fyerrpc/services/{service}/{version}/{id}` as
/// JSON values; leases and expiry are the registry's responsibility, driven
/// by client keep-alives through [`Registry::heartbeat`].
#[async_trait]
pub trait Registry: Send + Sync {
    /// Registers (or refreshes) an instance.
    async fn register(&self, instance: &Instance) -> Result<()>;

    /// Removes an instance. Deregistering twice has no additional effect.
    async fn deregister(&self, instance: &Instance) -> Result<()>;

    /// Lists all instances of a service version.
    async fn list(&self, service: &str, version: &str) -> Result<Vec<Arc<Instance>>>;

    /// Subscribes to instance-set changes for a service version. Each event
    /// carries the full refreshed instance list.
    async fn subscribe(
        &self,
        service: &str,
        version: &str,
    ) -> Result<mpsc::Receiver<Vec<Arc<Instance>>>>;

    /// Drops all subscriptions for a service version, closing their
    /// channels.
    async fn unsubscribe(&self, service: &str, version: &str) -> Result<()>;

    /// Refreshes an instance's lease.
    async fn heartbeat(&self, instance: &Instance) -> Result<()>;

    /// Shuts the registry connection down.
    async fn close(&self) -> Result<()>;
}

/// In-process [`Registry`] with prefix-read and fan-out semantics.
pub struct MemoryRegistry {
    // service key -> instance
    entries: RwLock<HashMap<String, Arc<Instance>>>,
    // service prefix -> subscriber senders
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Vec<Arc<Instance>>>>>>,
    // service key -> last heartbeat
    heartbeats: Mutex<HashMap<String, Instant>>,
    closed: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            heartbeats: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Closed);
        }
        Ok(())
    }

    fn list_prefix(&self, prefix: &str) -> Vec<Arc<Instance>> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let mut instances: Vec<Arc<Instance>> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, instance)| Arc::clone(instance))
            .collect();
        // Deterministic order for snapshot consumers.
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }

    /// Publishes the refreshed instance list to subscribers of the
    /// service version. Full channels are skipped: a slow subscriber sees
    /// the next snapshot instead of this one.
    fn notify(&self, service: &str, version: &str) {
        let prefix = build_service_prefix(service, version);
        let snapshot = self.list_prefix(&prefix);

        let mut subscribers = self.subscribers.lock().expect("registry lock poisoned");
        if let Some(senders) = subscribers.get_mut(&prefix) {
            senders.retain(|sender| !sender.is_closed());
            for sender in senders.iter() {
                let _ = sender.try_send(snapshot.clone());
            }
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, instance: &Instance) -> Result<()> {
        self.ensure_open()?;
        let key = build_service_key(&instance.service, &instance.version, &instance.id);

        {
            let mut entries = self.entries.write().expect("registry lock poisoned");
            entries.insert(key.clone(), Arc::new(instance.clone()));
        }
        self.heartbeats
            .lock()
            .expect("registry lock poisoned")
            .insert(key, Instant::now());

        debug!(instance = %instance.id, service = %instance.service, "registered");
        self.notify(&instance.service, &instance.version);
        Ok(())
    }

    async fn deregister(&self, instance: &Instance) -> Result<()> {
        self.ensure_open()?;
        let key = build_service_key(&instance.service, &instance.version, &instance.id);

        let removed = {
            let mut entries = self.entries.write().expect("registry lock poisoned");
            entries.remove(&key).is_some()
        };
        if removed {
            self.heartbeats
                .lock()
                .expect("registry lock poisoned")
                .remove(&key);
            debug!(instance = %instance.id, service = %instance.service, "deregistered");
            self.notify(&instance.service, &instance.version);
        }
        Ok(())
    }

    async fn list(&self, service: &str, version: &str) -> Result<Vec<Arc<Instance>>> {
        self.ensure_open()?;
        Ok(self.list_prefix(&build_service_prefix(service, version)))
    }

    async fn subscribe(
        &self,
        service: &str,
        version: &str,
    ) -> Result<mpsc::Receiver<Vec<Arc<Instance>>>> {
        self.ensure_open()?;
        let prefix = build_service_prefix(service, version);
        let (sender, receiver) = mpsc::channel(SUBSCRIBE_BUFFER);

        let mut subscribers = self.subscribers.lock().expect("registry lock poisoned");
        subscribers.entry(prefix).or_default().push(sender);
        Ok(receiver)
    }

    async fn unsubscribe(&self, service: &str, version: &str) -> Result<()> {
        let prefix = build_service_prefix(service, version);
        let mut subscribers = self.subscribers.lock().expect("registry lock poisoned");
        subscribers.remove(&prefix);
        Ok(())
    }

    async fn heartbeat(&self, instance: &Instance) -> Result<()> {
        self.ensure_open()?;
        let key = build_service_key(&instance.service, &instance.version, &instance.id);

        let known = {
            let entries = self.entries.read().expect("registry lock poisoned");
            entries.contains_key(&key)
        };
        if !known {
            return Err(DiscoveryError::NotFound(key));
        }

        self.heartbeats
            .lock()
            .expect("registry lock poisoned")
            .insert(key, Instant::now());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.lock().expect("registry lock poisoned").clear();
        Ok(())
    }
}
