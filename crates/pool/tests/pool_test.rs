//! Integration tests for WorkerPool, Janitor and the registry
//!
//! Run with: cargo test -p crawlfleet-pool --test pool_test

use std::sync::Arc;
use std::time::Duration;

use crawlfleet_pool::host::FixedMemoryMonitor;
use crawlfleet_pool::janitor::{Janitor, JanitorConfig};
use crawlfleet_pool::pool::{PoolConfig, Tier, WorkerPool};
use crawlfleet_pool::registry::{RegistryRecord, WorkerRegistry};
use crawlfleet_pool::testing::MockWorkerFactory;
use crawlfleet_pool::{FleetError, WorkerConfig};

struct Fixture {
    pool: Arc<WorkerPool>,
    factory: Arc<MockWorkerFactory>,
    memory: Arc<FixedMemoryMonitor>,
}

fn create_fixture(config: PoolConfig) -> Fixture {
    let factory = Arc::new(MockWorkerFactory::new());
    let memory = Arc::new(FixedMemoryMonitor::new(30.0));
    let pool = Arc::new(WorkerPool::new(config, factory.clone(), memory.clone()));
    Fixture {
        pool,
        factory,
        memory,
    }
}

fn config_for(site: &str) -> WorkerConfig {
    WorkerConfig::default().with_user_agent(format!("crawler/{site}"))
}

#[tokio::test]
async fn test_promotion_happens_on_third_acquire_only() {
    let fx = create_fixture(PoolConfig::default());
    let config = config_for("news");

    for expected in [Tier::Cold, Tier::Cold, Tier::Hot, Tier::Hot] {
        let lease = fx.pool.acquire(&config).await.unwrap();
        assert_eq!(lease.tier(), expected);
        fx.pool.release(&lease);
    }
    assert_eq!(fx.factory.created_count(), 1);
}

#[tokio::test]
async fn test_retired_worker_closed_after_last_release() {
    let fx = create_fixture(
        PoolConfig::default()
            .with_permanent(false)
            .with_max_usage_count(3),
    );
    let janitor = Janitor::new(fx.pool.clone(), fx.memory.clone(), JanitorConfig::default());
    let config = config_for("shop");

    let first = fx.pool.acquire(&config).await.unwrap();
    fx.pool.release(&first);
    fx.pool.acquire(&config).await.map(|l| fx.pool.release(&l)).unwrap();
    let busy = fx.pool.acquire(&config).await.unwrap();
    assert_eq!(busy.tier(), Tier::Hot);

    // Fourth acquisition retires the hot worker while `busy` still holds it
    let fresh = fx.pool.acquire(&config).await.unwrap();
    assert_ne!(fresh.id(), busy.id());

    let report = janitor.sweep_once().await;
    assert_eq!(report.retired_closed, 0, "retired worker still active");
    assert_eq!(fx.pool.status().counts.retired, 1);

    fx.pool.release(&busy);
    let report = janitor.sweep_once().await;
    assert_eq!(report.retired_closed, 1);
    assert!(fx.factory.workers()[0].is_closed());
    assert!(!fx.factory.workers()[1].is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_janitor_ttls_per_tier_under_pressure() {
    let fx = create_fixture(PoolConfig::default().with_permanent(false));
    fx.memory.set(85.0);

    let hot_config = config_for("hot");
    for _ in 0..3 {
        let lease = fx.pool.acquire(&hot_config).await.unwrap();
        fx.pool.release(&lease);
    }
    let cold = fx.pool.acquire(&config_for("cold")).await.unwrap();
    fx.pool.release(&cold);

    let handle = Janitor::new(fx.pool.clone(), fx.memory.clone(), JanitorConfig::default()).spawn();

    // Scans every 10s; cold ttl 30s, hot ttl 60s
    tokio::time::sleep(Duration::from_secs(45)).await;
    let counts = fx.pool.status().counts;
    assert_eq!(counts.cold, 0);
    assert_eq!(counts.hot, 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(fx.pool.is_empty());
    assert_eq!(fx.factory.closed_count(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_memory_pressure_refusal_is_retryable() {
    let fx = create_fixture(PoolConfig::default().with_memory_ceiling(90.0));
    fx.memory.set(91.0);

    let err = fx.pool.acquire(&config_for("any")).await.unwrap_err();
    assert!(matches!(err, FleetError::MemoryPressure { .. }));
    assert!(err.is_retryable());

    fx.memory.set(50.0);
    assert!(fx.pool.acquire(&config_for("any")).await.is_ok());
}

#[tokio::test]
async fn test_close_failures_never_leak_entries() {
    let fx = create_fixture(PoolConfig::default());
    fx.factory.set_fail_close(true);
    fx.pool.init().await.unwrap();
    fx.pool.acquire(&config_for("a")).await.unwrap();
    fx.pool.acquire(&config_for("b")).await.unwrap();

    fx.pool.shutdown_all().await;
    fx.pool.shutdown_all().await;

    assert!(fx.pool.is_empty());
    assert_eq!(fx.pool.status().counts.total(), 0);
    assert_eq!(fx.factory.closed_count(), 3);
}

#[tokio::test]
async fn test_concurrent_acquires_share_or_retire() {
    let fx = create_fixture(PoolConfig::default().with_permanent(false));
    let config = config_for("burst");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let pool = fx.pool.clone();
            let config = config.clone();
            tokio::spawn(async move { pool.acquire(&config).await })
        })
        .collect();

    let mut leases = Vec::new();
    for task in tasks {
        leases.push(task.await.unwrap().unwrap());
    }

    let status = fx.pool.status();
    assert_eq!(status.counts.cold + status.counts.hot, 1, "one cached handle per signature");
    assert_eq!(status.counts.total(), fx.factory.created_count());

    for lease in &leases {
        fx.pool.release(lease);
    }
    assert!(fx.pool.status().handles.iter().all(|h| h.active_requests == 0));
}

#[test]
fn test_registry_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");
    let signature = config_for("persisted").signature();

    {
        let registry = WorkerRegistry::open(&path).unwrap();
        registry
            .insert(RegistryRecord::new("abc123", 9310, signature.clone()))
            .unwrap();
    }

    let registry = WorkerRegistry::open(&path).unwrap();
    let found = registry.find_by_signature(&signature);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].container_id, "abc123");
    assert_eq!(found[0].host_port, 9310);
}
