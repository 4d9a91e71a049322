//! Uniform random load balancing.

use crate::balancer::Balancer;
use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use rand::Rng;
use rudder_common::Instance;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Picks uniformly among enabled instances.
#[derive(Debug, Default)]
pub struct RandomBalancer {
    instances: RwLock<Vec<Arc<Instance>>>,
}

impl RandomBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Balancer for RandomBalancer {
    async fn initialize(&self, instances: Vec<Arc<Instance>>) -> Result<()> {
        *self.instances.write().expect("balancer lock poisoned") = instances;
        Ok(())
    }

    async fn select(&self) -> Result<Arc<Instance>> {
        let enabled: Vec<Arc<Instance>> = {
            let instances = self.instances.read().expect("balancer lock poisoned");
            instances.iter().filter(|i| i.is_enabled()).cloned().collect()
        };
        if enabled.is_empty() {
            return Err(DiscoveryError::NoAvailableInstances);
        }
        let idx = rand::thread_rng().gen_range(0..enabled.len());
        Ok(Arc::clone(&enabled[idx]))
    }

    async fn update(&self, instances: Vec<Arc<Instance>>) -> Result<()> {
        *self.instances.write().expect("balancer lock poisoned") = instances;
        Ok(())
    }

    async fn feedback(&self, _instance: &Instance, _duration: Duration, _success: bool) {}

    fn name(&self) -> &'static str {
        "random"
    }
}
