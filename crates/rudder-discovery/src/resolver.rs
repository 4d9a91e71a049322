//! Instance resolution with live watch.
//!
//! A resolver owns exactly one watch task against the registry for its
//! `(service, version)` pair. Every change event replaces the local
//! snapshot wholesale and pings subscribers through bounded notification
//! channels; a full channel is skipped, so subscribers always observe the
//! latest snapshot rather than every delta. The initial snapshot is
//! fetched before the watch starts, so it is always observable before any
//! delta.

use crate::error::{DiscoveryError, Result};
use crate::registry::Registry;
use rudder_common::Instance;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Live instance cache for one `(service, version)` pair.
pub struct Resolver {
    registry: Arc<dyn Registry>,
    service: String,
    version: String,
    instances: RwLock<Vec<Arc<Instance>>>,
    notify: Mutex<Vec<mpsc::Sender<()>>>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl Resolver {
    /// Fetches the initial instance list, subscribes to the registry's
    /// change stream and spawns the watch task.
    pub async fn new(
        registry: Arc<dyn Registry>,
        service: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Arc<Self>> {
        Self::build(registry, service.into(), version.into(), None).await
    }

    /// Like [`Resolver::new`], additionally re-listing the registry on a
    /// fixed interval as a safety net against missed watch events.
    pub async fn with_refresh_interval(
        registry: Arc<dyn Registry>,
        service: impl Into<String>,
        version: impl Into<String>,
        interval: Duration,
    ) -> Result<Arc<Self>> {
        Self::build(registry, service.into(), version.into(), Some(interval)).await
    }

    async fn build(
        registry: Arc<dyn Registry>,
        service: String,
        version: String,
        refresh: Option<Duration>,
    ) -> Result<Arc<Self>> {
        // Initial snapshot before any delta can be observed.
        let initial = registry.list(&service, &version).await?;
        let watch_rx = registry.subscribe(&service, &version).await?;

        let resolver = Arc::new(Self {
            registry,
            service,
            version,
            instances: RwLock::new(initial),
            notify: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        });

        Self::spawn_watch(&resolver, watch_rx);
        if let Some(interval) = refresh {
            Self::spawn_refresh(&resolver, interval);
        }
        Ok(resolver)
    }

    fn spawn_watch(resolver: &Arc<Self>, mut watch_rx: mpsc::Receiver<Vec<Arc<Instance>>>) {
        let resolver = Arc::clone(resolver);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = resolver.shutdown.cancelled() => return,
                    update = watch_rx.recv() => match update {
                        Some(instances) => resolver.apply_snapshot(instances),
                        None => {
                            debug!(
                                service = %resolver.service,
                                version = %resolver.version,
                                "registry watch stream ended"
                            );
                            return;
                        }
                    },
                }
            }
        });
    }

    fn spawn_refresh(resolver: &Arc<Self>, interval: Duration) {
        let resolver = Arc::clone(resolver);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = resolver.shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        match resolver.registry.list(&resolver.service, &resolver.version).await {
                            Ok(instances) => resolver.apply_snapshot(instances),
                            Err(err) => {
                                warn!(service = %resolver.service, %err, "periodic refresh failed");
                            }
                        }
                    }
                }
            }
        });
    }

    fn apply_snapshot(&self, instances: Vec<Arc<Instance>>) {
        *self.instances.write().expect("resolver lock poisoned") = instances;

        let mut notify = self.notify.lock().expect("resolver lock poisoned");
        notify.retain(|sender| !sender.is_closed());
        for sender in notify.iter() {
            // Full channel: the subscriber already has a wake-up pending.
            let _ = sender.try_send(());
        }
    }

    /// A copy of the current instance snapshot.
    pub fn resolve(&self) -> Vec<Arc<Instance>> {
        self.instances.read().expect("resolver lock poisoned").clone()
    }

    /// Registers for change notifications. The returned channel holds at
    /// most one pending wake-up; poll [`Resolver::resolve`] after each.
    pub fn subscribe(&self) -> mpsc::Receiver<()> {
        let (sender, receiver) = mpsc::channel(1);
        self.notify.lock().expect("resolver lock poisoned").push(sender);
        receiver
    }

    /// The service this resolver tracks.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The version this resolver tracks.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Stops the watch task, closes all notification channels exactly once
    /// and unsubscribes from the registry. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.cancel();
        self.notify.lock().expect("resolver lock poisoned").clear();
        self.registry.unsubscribe(&self.service, &self.version).await
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
