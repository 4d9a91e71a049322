//! Rudder Service Discovery
//!
//! Consumes a service registry and turns it into a live, load-balanced view
//! of backend instances:
//!
//! - [`registry`] - the [`Registry`] capability the rest of the stack
//!   depends on, plus the process-local [`MemoryRegistry`]
//! - [`resolver`] - per-`(service, version)` instance cache fed by the
//!   registry's change stream, fanning updates out to subscribers
//! - [`balancer`] - fastest-response, random and round-robin selection over
//!   the resolved instance set
//!
//! # Example
//!
//! ```no_run
//! use rudder_discovery::{MemoryRegistry, Registry, Resolver};
//! use rudder_common::Instance;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let registry = Arc::new(MemoryRegistry::new());
//! registry
//!     .register(&Instance::new("a", "greeter", "1.0.0", "10.0.0.1:8000"))
//!     .await?;
//!
//! let resolver = Resolver::new(registry, "greeter", "1.0.0").await?;
//! let instances = resolver.resolve();
//! assert_eq!(instances.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod balancer;
pub mod error;
pub mod registry;
pub mod resolver;

pub use balancer::{build_balancer, Balancer, BalancerConfig, BalancerType};
pub use error::DiscoveryError;
pub use registry::{MemoryRegistry, Registry};
pub use resolver::Resolver;
