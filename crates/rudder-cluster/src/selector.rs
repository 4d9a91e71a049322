//! Instance set narrowing by metadata predicates.

use crate::error::FailoverError;
use rand::Rng;
use rudder_common::Instance;
use std::sync::Arc;

/// Narrows an instance set before load balancing sees it.
pub trait Selector: Send + Sync {
    /// Returns the subset of `instances` matching this selector.
    ///
    /// Returns `Err(FailoverError::NoAvailableInstances)` when nothing
    /// matches.
    fn select(&self, instances: &[Arc<Instance>]) -> Result<Vec<Arc<Instance>>, FailoverError>;

    /// Selector name for diagnostics.
    fn name(&self) -> &str;
}

/// Keeps instances whose metadata key equals the target group.
pub struct GroupSelector {
    name: String,
    group_key: String,
    group: String,
}

impl GroupSelector {
    pub fn new(
        name: impl Into<String>,
        group_key: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group_key: group_key.into(),
            group: group.into(),
        }
    }
}

impl Selector for GroupSelector {
    fn select(&self, instances: &[Arc<Instance>]) -> Result<Vec<Arc<Instance>>, FailoverError> {
        if instances.is_empty() {
            return Err(FailoverError::NoAvailableInstances);
        }

        let selected: Vec<Arc<Instance>> = instances
            .iter()
            .filter(|instance| {
                instance
                    .metadata
                    .get(&self.group_key)
                    .is_some_and(|group| *group == self.group)
            })
            .cloned()
            .collect();

        if selected.is_empty() {
            return Err(FailoverError::NoAvailableInstances);
        }
        Ok(selected)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Splits traffic between two groups by a configured weight ratio.
///
/// Instances are partitioned by the metadata key into the A and B groups;
/// each selection draws against `ratio` (the share of traffic the A group
/// receives) and returns the drawn group, falling back to the other one
/// when the drawn group has no instances. A forced group, when set,
/// bypasses the draw entirely as long as it matches at least one instance.
pub struct WeightedGroupSelector {
    name: String,
    group_key: String,
    group_a: String,
    group_b: String,
    ratio: f64,
    forced: Option<String>,
}

impl WeightedGroupSelector {
    pub fn new(
        name: impl Into<String>,
        group_key: impl Into<String>,
        group_a: impl Into<String>,
        group_b: impl Into<String>,
        ratio: f64,
    ) -> Self {
        Self {
            name: name.into(),
            group_key: group_key.into(),
            group_a: group_a.into(),
            group_b: group_b.into(),
            ratio: ratio.clamp(0.0, 1.0),
            forced: None,
        }
    }

    /// Pins every selection to one group, overriding the weighted draw.
    pub fn with_forced_group(mut self, group: impl Into<String>) -> Self {
        self.forced = Some(group.into());
        self
    }

    /// The share of traffic routed to the A group.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    fn members(&self, instances: &[Arc<Instance>], group: &str) -> Vec<Arc<Instance>> {
        instances
            .iter()
            .filter(|instance| {
                instance
                    .metadata
                    .get(&self.group_key)
                    .is_some_and(|g| g == group)
            })
            .cloned()
            .collect()
    }
}

impl Selector for WeightedGroupSelector {
    fn select(&self, instances: &[Arc<Instance>]) -> Result<Vec<Arc<Instance>>, FailoverError> {
        if instances.is_empty() {
            return Err(FailoverError::NoAvailableInstances);
        }

        if let Some(forced) = &self.forced {
            let selected = self.members(instances, forced);
            if !selected.is_empty() {
                return Ok(selected);
            }
        }

        let group_a = self.members(instances, &self.group_a);
        let group_b = self.members(instances, &self.group_b);

        let prefer_a = rand::thread_rng().gen::<f64>() < self.ratio;
        let (drawn, fallback) = if prefer_a {
            (group_a, group_b)
        } else {
            (group_b, group_a)
        };

        if !drawn.is_empty() {
            return Ok(drawn);
        }
        if !fallback.is_empty() {
            return Ok(fallback);
        }
        Err(FailoverError::NoAvailableInstances)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Applies selectors in order, feeding each one the previous survivors.
pub struct SelectorChain {
    name: String,
    selectors: Vec<Arc<dyn Selector>>,
}

impl SelectorChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selectors: Vec::new(),
        }
    }

    pub fn push(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selectors.push(selector);
        self
    }
}

impl Selector for SelectorChain {
    fn select(&self, instances: &[Arc<Instance>]) -> Result<Vec<Arc<Instance>>, FailoverError> {
        let mut current: Vec<Arc<Instance>> = instances.to_vec();
        for selector in &self.selectors {
            current = selector.select(&current)?;
        }
        if current.is_empty() {
            return Err(FailoverError::NoAvailableInstances);
        }
        Ok(current)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
