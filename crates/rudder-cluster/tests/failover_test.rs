//! End-to-end failover scenarios.

use rudder_cluster::{
    BreakerState, CallContext, DetectorKind, FailoverConfig, FailoverError, FailoverHandler,
    FailoverStrategy, HealthStatus, RecoveryKind, RecoveryManager, RetryStrategy,
};
use rudder_common::Instance;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn test_instances() -> Vec<Arc<Instance>> {
    vec![
        Arc::new(
            Instance::new("test-instance-1", "test-service", "1.0.0", "localhost:8001")
                .with_metadata("zone", "us-east-1a"),
        ),
        Arc::new(
            Instance::new("test-instance-2", "test-service", "1.0.0", "localhost:8002")
                .with_metadata("zone", "us-east-1b"),
        ),
        Arc::new(
            Instance::new("test-instance-3", "test-service", "1.0.0", "localhost:8003")
                .with_metadata("zone", "us-west-1a"),
        ),
    ]
}

fn test_config() -> FailoverConfig {
    FailoverConfig::default()
        .with_max_retries(3)
        .with_retry_interval(Duration::from_millis(10))
        .with_retry_strategy(RetryStrategy::Simple)
        .with_detector(DetectorKind::Passive)
        .with_failover_strategy(FailoverStrategy::Next)
}

#[tokio::test]
async fn test_success_on_first_try() {
    let handler = FailoverHandler::new(test_config());
    let instances = test_instances();

    let result = handler
        .execute(&CallContext::new(), instances.clone(), |_ctx, _instance| async move {
            Ok(())
        })
        .await;

    assert!(result.success);
    assert!(result.error.is_none());
    assert_eq!(result.retry_count, 0);
    assert_eq!(result.instance.as_ref().unwrap().id, "test-instance-1");
    assert!(result.failed_nodes.is_empty());
}

#[tokio::test]
async fn test_success_after_retry() {
    let handler = FailoverHandler::new(test_config());
    let instances = test_instances();
    let first_addr = instances[0].address.clone();

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_op = Arc::clone(&calls);
    let result = handler
        .execute(&CallContext::new(), instances.clone(), move |_ctx, _instance| {
            let calls = Arc::clone(&calls_op);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FailoverError::Operation("service unavailable".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.success);
    assert_eq!(result.retry_count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let chosen = result.instance.as_ref().unwrap();
    assert_ne!(chosen.id, "test-instance-1", "failed instance must not be chosen");
    assert_eq!(result.failed_nodes, vec![first_addr]);
}

#[tokio::test]
async fn test_all_retries_fail() {
    let handler = FailoverHandler::new(test_config());
    let instances = test_instances();

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_op = Arc::clone(&calls);
    let result = handler
        .execute(&CallContext::new(), instances.clone(), move |_ctx, _instance| {
            let calls = Arc::clone(&calls_op);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FailoverError::Operation("test error".into()))
            }
        })
        .await;

    assert!(!result.success);
    assert_eq!(result.error, Some(FailoverError::MaxRetriesExceeded));
    assert_eq!(result.retry_count, 3);
    assert_eq!(result.failed_nodes.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_breaker_locks_out_instance() {
    let config = test_config().with_circuit_breaker(3, Duration::from_millis(100));
    let handler = FailoverHandler::new(config);
    let instance = Arc::new(Instance::new(
        "test-instance-1",
        "test-service",
        "1.0.0",
        "localhost:8001",
    ));

    // Pre-register enough consecutive failures to trip the breaker.
    for _ in 0..3 {
        handler
            .circuit_breaker()
            .mark_failure(&instance, &FailoverError::Connection("refused".into()));
    }
    assert_eq!(handler.circuit_breaker().state(&instance), BreakerState::Open);

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_op = Arc::clone(&calls);
    let result = handler
        .execute(
            &CallContext::new(),
            vec![Arc::clone(&instance)],
            move |_ctx, _instance| {
                let calls = Arc::clone(&calls_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error, Some(FailoverError::CircuitOpen));
    assert_eq!(calls.load(Ordering::SeqCst), 0, "operation must not run");
    assert_eq!(result.failed_nodes, vec![instance.address.clone()]);
}

#[tokio::test]
async fn test_breaker_half_open_probe_recovery() {
    let config = test_config()
        .with_circuit_breaker(3, Duration::from_millis(100))
        .with_half_open(2, 0.5);
    let handler = FailoverHandler::new(config);
    let instance = Arc::new(Instance::new(
        "test-instance-1",
        "test-service",
        "1.0.0",
        "localhost:8001",
    ));
    let breaker = handler.circuit_breaker();

    for _ in 0..3 {
        breaker.mark_failure(&instance, &FailoverError::Connection("refused".into()));
    }
    assert_eq!(breaker.state(&instance), BreakerState::Open);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(breaker.allow(&instance).is_ok(), "probe admitted after timeout");
    breaker.mark_success(&instance);
    breaker.mark_success(&instance);
    assert_eq!(breaker.state(&instance), BreakerState::Closed);
}

#[tokio::test]
async fn test_empty_instance_set() {
    let handler = FailoverHandler::new(test_config());
    let result = handler
        .execute(&CallContext::new(), Vec::new(), |_ctx, _instance| async move { Ok(()) })
        .await;

    assert!(!result.success);
    assert_eq!(result.error, Some(FailoverError::NoAvailableInstances));
}

#[tokio::test]
async fn test_cancelled_context_short_circuits() {
    let handler = FailoverHandler::new(test_config());
    let ctx = CallContext::new();
    ctx.cancel();

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_op = Arc::clone(&calls);
    let result = handler
        .execute(&ctx, test_instances(), move |_ctx, _instance| {
            let calls = Arc::clone(&calls_op);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert!(!result.success);
    assert_eq!(result.error, Some(FailoverError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_deadline_cuts_backoff_short() {
    // Long backoff, short deadline: the retry wait must be interrupted.
    let config = test_config()
        .with_retry_interval(Duration::from_secs(5))
        .with_max_retries(2);
    let handler = FailoverHandler::new(config);
    let ctx = CallContext::with_timeout(Duration::from_millis(50));

    let started = std::time::Instant::now();
    let result = handler
        .execute(&ctx, test_instances(), |_ctx, _instance| async move {
            Err(FailoverError::Operation("always failing".into()))
        })
        .await;

    assert!(!result.success);
    assert_eq!(result.error, Some(FailoverError::RequestTimeout));
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "deadline must interrupt the backoff sleep"
    );
}

#[tokio::test]
async fn test_operation_timeout_via_context() {
    let handler = FailoverHandler::new(test_config().with_max_retries(0));
    let ctx = CallContext::with_timeout(Duration::from_millis(20));

    let result = handler
        .execute(&ctx, test_instances(), |ctx, _instance| async move {
            ctx.sleep(Duration::from_secs(5)).await
        })
        .await;

    assert!(!result.success);
    // The slow operation observed the deadline and surfaced the timeout.
    assert!(result.failed_nodes.len() <= 1);
}

#[tokio::test]
async fn test_failover_prefers_untried_instance() {
    let config = test_config().with_max_retries(2);
    let handler = FailoverHandler::new(config);
    let instances = test_instances();
    let failing_addr = instances[0].address.clone();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let order_op = Arc::clone(&order);
    let failing = failing_addr.clone();
    let result = handler
        .execute(&CallContext::new(), instances, move |_ctx, instance| {
            let order = Arc::clone(&order_op);
            let failing = failing.clone();
            async move {
                order.lock().unwrap().push(instance.address.clone());
                if instance.address == failing {
                    Err(FailoverError::Connection("connection refused".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.success);
    assert_eq!(result.retry_count, 1);
    assert!(result.failed_nodes.contains(&failing_addr));
    assert_ne!(result.instance.as_ref().unwrap().address, failing_addr);

    let called = order.lock().unwrap().clone();
    assert_eq!(called.len(), 2);
    assert_eq!(called[0], failing_addr);
    assert_ne!(called[1], failing_addr);
}

#[tokio::test]
async fn test_random_strategy_succeeds() {
    let config = test_config().with_failover_strategy(FailoverStrategy::Random);
    let handler = FailoverHandler::new(config);

    let result = handler
        .execute(&CallContext::new(), test_instances(), |_ctx, _instance| async move {
            Ok(())
        })
        .await;
    assert!(result.success);
    assert!(result.instance.is_some());
}

#[tokio::test]
async fn test_best_strategy_prefers_fast_instance() {
    let config = test_config().with_failover_strategy(FailoverStrategy::Best);
    let handler = FailoverHandler::new(config);
    let instances = test_instances();

    // Give the second instance a recorded fast response; the others fall
    // back to the 1s default ranking latency.
    handler
        .monitor()
        .report_success(&instances[1], Duration::from_millis(3));

    let result = handler
        .execute(&CallContext::new(), instances, |_ctx, _instance| async move { Ok(()) })
        .await;

    assert!(result.success);
    assert_eq!(result.instance.as_ref().unwrap().id, "test-instance-2");
}

#[tokio::test]
async fn test_degraded_instance_reaches_recovery_manager() {
    let config = test_config()
        .with_detection(Duration::from_secs(10), 1, 1)
        .with_recovery(RecoveryKind::Immediate, Duration::from_millis(20))
        .with_recovery_threshold(1, Duration::from_secs(1));

    let seed = FailoverHandler::new(config.clone());
    let strategy = Arc::clone(seed.recovery_strategy());
    let manager = Arc::new(RecoveryManager::new(&config, strategy));
    let handler = seed.with_recovery_manager(Arc::clone(&manager));

    let instances = test_instances();
    let result = handler
        .execute(&CallContext::new(), instances.clone(), |_ctx, _instance| async move {
            Err(FailoverError::Operation("hard down".into()))
        })
        .await;
    assert!(!result.success);

    // Every failed instance became Unhealthy (failure threshold 1) and is
    // now tracked for recovery.
    assert_eq!(manager.tracked(), 3);

    // Once the detector sees successes again, the recovery loop promotes
    // and drops them.
    for instance in &instances {
        handler.detector().mark_success(instance);
        assert_eq!(handler.detector().status(instance), HealthStatus::Healthy);
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.tracked() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("recovered instances should leave the list");
    manager.stop();
}

#[tokio::test]
async fn test_concurrent_execute_calls_share_state() {
    let handler = Arc::new(FailoverHandler::new(test_config()));
    let instances = test_instances();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let handler = Arc::clone(&handler);
        let instances = instances.clone();
        tasks.push(tokio::spawn(async move {
            handler
                .execute(&CallContext::new(), instances, |_ctx, _instance| async move { Ok(()) })
                .await
        }));
    }

    for task in tasks {
        let result = task.await.unwrap();
        assert!(result.success);
    }
}
