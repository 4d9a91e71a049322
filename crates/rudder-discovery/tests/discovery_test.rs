//! Registry -> resolver -> balancer integration.

use rudder_common::Instance;
use rudder_discovery::{
    build_balancer, BalancerConfig, BalancerType, MemoryRegistry, Registry, Resolver,
};
use rudder_metrics::{InMemoryMetrics, Metrics, ResponseMetric};
use std::sync::Arc;
use std::time::Duration;

fn instance(id: &str, port: u16) -> Instance {
    Instance::new(id, "greeter", "1.0.0", format!("127.0.0.1:{port}"))
}

#[tokio::test]
async fn test_balancer_follows_resolver_updates() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.register(&instance("a", 8001)).await.unwrap();
    registry.register(&instance("b", 8002)).await.unwrap();

    let resolver = Resolver::new(registry.clone() as Arc<dyn Registry>, "greeter", "1.0.0")
        .await
        .unwrap();

    let balancer = build_balancer(BalancerConfig::default());
    balancer.initialize(resolver.resolve()).await.unwrap();

    // Both instances rotate through.
    let first = balancer.select().await.unwrap().id.clone();
    let second = balancer.select().await.unwrap().id.clone();
    assert_ne!(first, second);

    // A new instance appears in the registry; push the fresh snapshot into
    // the balancer once the resolver observes it.
    let mut notifications = resolver.subscribe();
    registry.register(&instance("c", 8003)).await.unwrap();
    notifications.recv().await.expect("change notification");

    balancer.update(resolver.resolve()).await.unwrap();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..30 {
        seen.insert(balancer.select().await.unwrap().id.clone());
    }
    assert!(seen.contains("c"), "new instance must enter rotation");

    resolver.close().await.unwrap();
}

#[tokio::test]
async fn test_fastest_balancer_over_live_view() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.register(&instance("a", 8001)).await.unwrap();
    registry.register(&instance("b", 8002)).await.unwrap();

    let resolver = Resolver::new(registry.clone() as Arc<dyn Registry>, "greeter", "1.0.0")
        .await
        .unwrap();

    let metrics: Arc<dyn Metrics> = Arc::new(InMemoryMetrics::new());
    metrics
        .record_response(ResponseMetric::success(
            "greeter",
            "127.0.0.1:8002",
            Duration::from_millis(2),
        ))
        .await
        .unwrap();

    let balancer = build_balancer(BalancerConfig {
        kind: BalancerType::FastestResponse,
        metrics,
        update_interval: None,
        retry_times: 3,
    });
    balancer.initialize(resolver.resolve()).await.unwrap();

    // Instance b has a 2ms sample; a sits at the 1s default.
    assert_eq!(balancer.select().await.unwrap().id, "b");

    resolver.close().await.unwrap();
}

#[tokio::test]
async fn test_deregistered_instance_leaves_rotation() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.register(&instance("a", 8001)).await.unwrap();
    registry.register(&instance("b", 8002)).await.unwrap();

    let resolver = Resolver::new(registry.clone() as Arc<dyn Registry>, "greeter", "1.0.0")
        .await
        .unwrap();
    let balancer = build_balancer(BalancerConfig::default());
    balancer.initialize(resolver.resolve()).await.unwrap();

    let mut notifications = resolver.subscribe();
    registry.deregister(&instance("a", 8001)).await.unwrap();
    notifications.recv().await.expect("change notification");

    balancer.update(resolver.resolve()).await.unwrap();
    for _ in 0..20 {
        assert_eq!(balancer.select().await.unwrap().id, "b");
    }

    resolver.close().await.unwrap();
}
