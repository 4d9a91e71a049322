//! Round-robin load balancing.

use crate::balancer::Balancer;
use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use rudder_common::Instance;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Rotates through enabled instances with a lock-free cursor.
///
/// The cursor advances with a relaxed fetch-add; selection never blocks
/// other selectors on the cursor, only on the snapshot read lock.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    instances: RwLock<Vec<Arc<Instance>>>,
    cursor: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Balancer for RoundRobinBalancer {
    async fn initialize(&self, instances: Vec<Arc<Instance>>) -> Result<()> {
        *self.instances.write().expect("balancer lock poisoned") = instances;
        Ok(())
    }

    async fn select(&self) -> Result<Arc<Instance>> {
        let instances = self.instances.read().expect("balancer lock poisoned");
        let len = instances.len();
        if len == 0 {
            return Err(DiscoveryError::NoAvailableInstances);
        }

        // Walk at most one full rotation looking for an enabled instance.
        for _ in 0..len {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            if instances[idx].is_enabled() {
                return Ok(Arc::clone(&instances[idx]));
            }
        }
        Err(DiscoveryError::NoAvailableInstances)
    }

    async fn update(&self, instances: Vec<Arc<Instance>>) -> Result<()> {
        *self.instances.write().expect("balancer lock poisoned") = instances;
        Ok(())
    }

    async fn feedback(&self, _instance: &Instance, _duration: Duration, _success: bool) {}

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_common::naming::STATUS_DISABLED;

    fn instance(id: &str, port: u16) -> Arc<Instance> {
        Arc::new(Instance::new(id, "greeter", "1.0.0", format!("127.0.0.1:{port}")))
    }

    #[tokio::test]
    async fn test_rotation_wraps() {
        let balancer = RoundRobinBalancer::new();
        balancer
            .initialize(vec![instance("a", 1), instance("b", 2), instance("c", 3)])
            .await
            .unwrap();

        let picks: Vec<String> = [
            balancer.select().await.unwrap().id.clone(),
            balancer.select().await.unwrap().id.clone(),
            balancer.select().await.unwrap().id.clone(),
            balancer.select().await.unwrap().id.clone(),
        ]
        .to_vec();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_distributes_evenly() {
        let balancer = RoundRobinBalancer::new();
        balancer
            .initialize(vec![instance("a", 1), instance("b", 2), instance("c", 3)])
            .await
            .unwrap();

        let mut counts = std::collections::HashMap::new();
        for _ in 0..300 {
            let id = balancer.select().await.unwrap().id.clone();
            *counts.entry(id).or_insert(0) += 1;
        }
        assert_eq!(counts["a"], 100);
        assert_eq!(counts["b"], 100);
        assert_eq!(counts["c"], 100);
    }

    #[tokio::test]
    async fn test_skips_disabled() {
        let mut disabled = Instance::new("off", "greeter", "1.0.0", "127.0.0.1:2");
        disabled.status = STATUS_DISABLED;

        let balancer = RoundRobinBalancer::new();
        balancer
            .initialize(vec![instance("a", 1), Arc::new(disabled), instance("c", 3)])
            .await
            .unwrap();

        for _ in 0..10 {
            assert_ne!(balancer.select().await.unwrap().id, "off");
        }
    }

    #[tokio::test]
    async fn test_empty_and_all_disabled() {
        let balancer = RoundRobinBalancer::new();
        assert_eq!(balancer.select().await, Err(DiscoveryError::NoAvailableInstances));

        let mut disabled = Instance::new("off", "greeter", "1.0.0", "127.0.0.1:1");
        disabled.status = STATUS_DISABLED;
        balancer.initialize(vec![Arc::new(disabled)]).await.unwrap();
        assert_eq!(balancer.select().await, Err(DiscoveryError::NoAvailableInstances));
    }

    #[tokio::test]
    async fn test_concurrent_selection() {
        let balancer = Arc::new(RoundRobinBalancer::new());
        balancer
            .initialize(vec![instance("a", 1), instance("b", 2), instance("c", 3), instance("d", 4)])
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let balancer = Arc::clone(&balancer);
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    balancer.select().await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }
}
