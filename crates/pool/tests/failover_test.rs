//! Integration tests for FailoverOrchestrator
//!
//! Run with: cargo test -p crawlfleet-pool --test failover_test

use std::sync::Arc;
use std::time::Duration;

use crawlfleet_pool::failover::{FailoverConfig, FailoverOrchestrator, SlotRole};
use crawlfleet_pool::testing::MockWorkerFactory;
use crawlfleet_pool::{FleetError, WorkerConfig};
use tokio::time::Instant;

fn create_orchestrator(backups: usize, capacity: usize) -> (FailoverOrchestrator, Arc<MockWorkerFactory>) {
    let factory = Arc::new(MockWorkerFactory::new());
    let config = FailoverConfig::default()
        .with_backup_slots(backups)
        .with_max_wait(Duration::from_secs(1))
        .with_reload_delays(Duration::from_secs(10), Duration::from_secs(2));
    let orchestrator =
        FailoverOrchestrator::with_capacity(factory.clone(), WorkerConfig::default(), config, capacity);
    (orchestrator, factory)
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_primary_served_by_secondary() {
    let (orchestrator, _) = create_orchestrator(2, 4);
    orchestrator.initialize().await.unwrap();

    let lease = orchestrator.acquire().await.unwrap();
    assert_eq!(lease.role(), SlotRole::Primary);
    orchestrator.report_failure(&lease);
    lease.release();

    let lease = orchestrator.acquire().await.unwrap();
    assert_eq!(lease.role(), SlotRole::Secondary(1));
    assert_eq!(orchestrator.status().healing, vec![0]);
}

#[tokio::test(start_paused = true)]
async fn test_secondary_heals_faster_than_primary() {
    let (orchestrator, factory) = create_orchestrator(1, 4);
    orchestrator.initialize().await.unwrap();

    orchestrator.report_slot_failure(0);
    orchestrator.report_slot_failure(1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let status = orchestrator.status();
    assert!(!status.slots[0].healthy);
    assert!(status.slots[1].healthy);
    assert_eq!(status.active_slot, Some(1));

    tokio::time::sleep(Duration::from_secs(8)).await;
    let status = orchestrator.status();
    assert!(status.slots[0].healthy);
    assert_eq!(status.active_slot, Some(0));
    assert_eq!(factory.created_count(), 4);
    assert_eq!(factory.closed_count(), 2, "replaced workers are closed");
}

#[tokio::test(start_paused = true)]
async fn test_no_healthy_worker_until_healing_completes() {
    let (orchestrator, _) = create_orchestrator(0, 4);
    orchestrator.initialize().await.unwrap();

    let lease = orchestrator.acquire().await.unwrap();
    orchestrator.report_failure(&lease);
    drop(lease);

    let err = orchestrator.acquire().await.unwrap_err();
    assert!(matches!(err, FleetError::NoHealthyWorker));
    assert!(err.is_retryable());
    assert_eq!(orchestrator.status().permits_available, 4, "refused acquire returns its permit");

    tokio::time::sleep(Duration::from_secs(11)).await;
    let lease = orchestrator.acquire().await.unwrap();
    assert_eq!(lease.role(), SlotRole::Primary);
    assert_eq!(lease.generation(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_heal_leaves_slot_unhealthy() {
    let (orchestrator, factory) = create_orchestrator(0, 4);
    orchestrator.initialize().await.unwrap();

    factory.set_failing(true);
    orchestrator.report_slot_failure(0);
    tokio::time::sleep(Duration::from_secs(11)).await;

    let status = orchestrator.status();
    assert!(!status.slots[0].healthy);
    assert!(status.healing.is_empty());
    assert!(matches!(orchestrator.acquire().await, Err(FleetError::NoHealthyWorker)));

    factory.set_failing(false);
    assert!(orchestrator.heal(0));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(orchestrator.acquire().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_permit_timeout_leaves_available_unchanged() {
    let (orchestrator, _) = create_orchestrator(1, 2);
    orchestrator.initialize().await.unwrap();

    let first = orchestrator.acquire().await.unwrap();
    let second = orchestrator.acquire().await.unwrap();
    let before = orchestrator.status().permits_available;
    assert_eq!(before, 0);

    let err = orchestrator.acquire().await.unwrap_err();
    assert!(matches!(err, FleetError::PoolTimeout { .. }));
    assert_eq!(orchestrator.status().permits_available, before);

    drop(first);
    second.release();
    assert_eq!(orchestrator.status().permits_available, 2);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_served_when_permit_returns() {
    let (orchestrator, _) = create_orchestrator(0, 1);
    let orchestrator = Arc::new(orchestrator);
    orchestrator.initialize().await.unwrap();

    let held = orchestrator.acquire().await.unwrap();
    let waiter = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.acquire().await.map(|lease| lease.slot()) })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    held.release();

    assert_eq!(waiter.await.unwrap().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_twice() {
    let (orchestrator, factory) = create_orchestrator(2, 4);
    orchestrator.initialize().await.unwrap();
    orchestrator.report_slot_failure(2);

    orchestrator.shutdown().await;
    orchestrator.shutdown().await;

    assert_eq!(factory.closed_count(), 3);
    let status = orchestrator.status();
    assert!(status.slots.iter().all(|slot| !slot.healthy));
    assert!(matches!(
        orchestrator.acquire().await,
        Err(FleetError::ShuttingDown)
    ));
    assert!(matches!(
        orchestrator.initialize().await,
        Err(FleetError::ShuttingDown)
    ));
}

fn create_throttled(capacity: usize, threshold: u32, min: Duration, max: Duration) -> FailoverOrchestrator {
    let config = FailoverConfig::default()
        .with_backup_slots(0)
        .with_max_wait(Duration::from_secs(1))
        .with_throttle(threshold, min, max);
    FailoverOrchestrator::with_capacity(
        Arc::new(MockWorkerFactory::new()),
        WorkerConfig::default(),
        config,
        capacity,
    )
}

#[tokio::test(start_paused = true)]
async fn test_acquire_throttled_from_threshold() {
    let min = Duration::from_millis(100);
    let max = Duration::from_millis(200);
    let orchestrator = create_throttled(4, 50, min, max);
    orchestrator.initialize().await.unwrap();

    // 0% and 25% busy: served immediately
    let mut held = Vec::new();
    for _ in 0..2 {
        let start = Instant::now();
        held.push(orchestrator.acquire().await.unwrap());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    // 50% and 75% busy: delayed by a jitter inside the configured range
    for _ in 0..2 {
        let start = Instant::now();
        held.push(orchestrator.acquire().await.unwrap());
        let waited = start.elapsed();
        assert!(waited >= min && waited <= max, "waited {waited:?}");
    }

    held.clear();
    let start = Instant::now();
    orchestrator.acquire().await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO, "idle again after releases");
}

#[tokio::test(start_paused = true)]
async fn test_throttle_with_fixed_delay() {
    let delay = Duration::from_millis(150);
    let orchestrator = create_throttled(2, 50, delay, delay);
    orchestrator.initialize().await.unwrap();

    let _first = orchestrator.acquire().await.unwrap();
    let start = Instant::now();
    let _second = orchestrator.acquire().await.unwrap();
    assert_eq!(start.elapsed(), delay);
}
