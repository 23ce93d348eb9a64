//! Failover orchestrator
//!
//! Serves requests from one active slot out of a primary and N secondaries,
//! behind a counting permit sized to the host.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::scan::next_healthy;
use super::slot::{FailoverSlot, ReloadState, SlotRole};
use crate::config::duration_millis;
use crate::error::FleetError;
use crate::host::HostResources;
use crate::sizing::SizingParams;
use crate::worker::{close_quietly, spawn_worker, Worker, WorkerConfig, WorkerFactory};

/// Failover orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailoverConfig {
    /// Number of secondary slots next to the primary
    pub backup_slot_count: usize,

    /// Longest a caller waits for a permit
    #[serde(with = "duration_millis")]
    pub max_wait: Duration,

    /// Permit utilisation (percent) at which callers are delayed
    pub throttle_threshold_percent: u32,

    /// Lower bound of the throttle jitter
    #[serde(with = "duration_millis")]
    pub throttle_delay_min: Duration,

    /// Upper bound of the throttle jitter
    #[serde(with = "duration_millis")]
    pub throttle_delay_max: Duration,

    /// Wait before rebuilding a failed primary
    #[serde(with = "duration_millis")]
    pub primary_reload_delay: Duration,

    /// Wait before rebuilding a failed secondary
    #[serde(with = "duration_millis")]
    pub secondary_reload_delay: Duration,

    /// Size the permit from host resources instead of `sizing.max_capacity`
    pub auto_size_capacity: bool,

    pub sizing: SizingParams,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            backup_slot_count: 2,
            max_wait: Duration::from_secs(30),
            throttle_threshold_percent: 80,
            throttle_delay_min: Duration::from_millis(50),
            throttle_delay_max: Duration::from_millis(250),
            primary_reload_delay: Duration::from_secs(10),
            secondary_reload_delay: Duration::from_secs(2),
            auto_size_capacity: true,
            sizing: SizingParams::default(),
        }
    }
}

impl FailoverConfig {
    /// Create a failover configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of secondary slots
    pub fn with_backup_slots(mut self, count: usize) -> Self {
        self.backup_slot_count = count;
        self
    }

    /// Set the permit wait deadline
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set the throttle threshold and jitter range
    pub fn with_throttle(mut self, threshold_percent: u32, min: Duration, max: Duration) -> Self {
        self.throttle_threshold_percent = threshold_percent;
        self.throttle_delay_min = min;
        self.throttle_delay_max = max;
        self
    }

    /// Set the healing delays
    pub fn with_reload_delays(mut self, primary: Duration, secondary: Duration) -> Self {
        self.primary_reload_delay = primary;
        self.secondary_reload_delay = secondary;
        self
    }

    /// Enable or disable host-based capacity sizing
    pub fn with_auto_size(mut self, enabled: bool) -> Self {
        self.auto_size_capacity = enabled;
        self
    }

    /// Set the sizing parameters
    pub fn with_sizing(mut self, sizing: SizingParams) -> Self {
        self.sizing = sizing;
        self
    }

    fn reload_delay(&self, role: SlotRole) -> Duration {
        match role {
            SlotRole::Primary => self.primary_reload_delay,
            SlotRole::Secondary(_) => self.secondary_reload_delay,
        }
    }
}

/// Snapshot of one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub index: usize,
    pub role: SlotRole,
    pub healthy: bool,
    pub healing: bool,
    pub generation: u64,
}

/// Snapshot of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverStatus {
    pub active_slot: Option<usize>,
    pub slots: Vec<SlotStatus>,
    pub permits_available: usize,
    pub permits_total: usize,
    /// Slots with a heal in flight
    pub healing: Vec<usize>,
}

impl FailoverStatus {
    pub fn healthy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.healthy).count()
    }
}

/// A worker checked out of the orchestrator
///
/// Holds one permit until released or dropped.
pub struct FailoverLease {
    slot: usize,
    role: SlotRole,
    generation: u64,
    worker: Arc<dyn Worker>,
    _permit: OwnedSemaphorePermit,
}

impl FailoverLease {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn role(&self) -> SlotRole {
        self.role
    }

    /// Generation of the slot's worker when the lease was taken
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }

    /// Return the permit
    pub fn release(self) {}
}

impl fmt::Debug for FailoverLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverLease")
            .field("slot", &self.slot)
            .field("role", &self.role)
            .field("generation", &self.generation)
            .field("worker_id", &self.worker.id())
            .finish()
    }
}

struct FailoverState {
    slots: Vec<FailoverSlot>,
    active: Option<usize>,
    initialized: bool,
    shut_down: bool,
}

impl FailoverState {
    fn active_is_usable(&self) -> bool {
        self.active
            .and_then(|index| self.slots.get(index))
            .is_some_and(FailoverSlot::is_usable)
    }

    /// Keep the active slot if usable, otherwise scan for the next usable one
    fn resolve_active(&mut self) -> Option<usize> {
        if self.active_is_usable() {
            return self.active;
        }

        let health: Vec<bool> = self.slots.iter().map(FailoverSlot::is_usable).collect();
        // Starting "after" the last slot makes an unset active land on the primary
        let from = self
            .active
            .unwrap_or_else(|| self.slots.len().saturating_sub(1));
        let next = next_healthy(&health, from)?;

        if let Some(previous) = self.active {
            warn!(
                from = %self.slots[previous].role,
                to = %self.slots[next].role,
                "Failing over to another worker slot"
            );
        }
        self.active = Some(next);
        Some(next)
    }
}

struct Shared {
    factory: Arc<dyn WorkerFactory>,
    worker_config: WorkerConfig,
    config: FailoverConfig,
    state: Mutex<FailoverState>,
    healing: TaskTracker,
    cancel: CancellationToken,
}

/// Primary/secondary worker slots with admission control and self-healing
///
/// # Example
///
/// ```ignore
/// use crawlfleet_pool::failover::{FailoverConfig, FailoverOrchestrator};
/// use crawlfleet_pool::host::HostResources;
///
/// let orchestrator = FailoverOrchestrator::new(
///     factory,
///     WorkerConfig::default(),
///     FailoverConfig::default(),
///     &HostResources::probe(),
/// );
/// orchestrator.initialize().await?;
///
/// let lease = orchestrator.acquire().await?;
/// if crawl(lease.worker()).await.is_err() {
///     orchestrator.report_failure(&lease);
/// }
/// lease.release();
///
/// orchestrator.shutdown().await;
/// ```
pub struct FailoverOrchestrator {
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl FailoverOrchestrator {
    /// Create an orchestrator sized from host resources
    pub fn new(
        factory: Arc<dyn WorkerFactory>,
        worker_config: WorkerConfig,
        config: FailoverConfig,
        host: &HostResources,
    ) -> Self {
        let capacity = config
            .sizing
            .resolve_capacity(config.auto_size_capacity, host);
        Self::with_capacity(factory, worker_config, config, capacity)
    }

    /// Create an orchestrator with an explicit permit count
    pub fn with_capacity(
        factory: Arc<dyn WorkerFactory>,
        worker_config: WorkerConfig,
        config: FailoverConfig,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..=config.backup_slot_count)
            .map(|index| FailoverSlot::new(SlotRole::for_index(index)))
            .collect();

        info!(
            capacity,
            slots = config.backup_slot_count + 1,
            "Creating failover orchestrator"
        );

        Self {
            shared: Arc::new(Shared {
                factory,
                worker_config,
                config,
                state: Mutex::new(FailoverState {
                    slots,
                    active: None,
                    initialized: false,
                    shut_down: false,
                }),
                healing: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Total number of permits
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.shared.config
    }

    /// Start every slot concurrently and choose the active one
    ///
    /// Slots that fail to start stay unhealthy and can be retried with
    /// [`heal`](Self::heal). Fails with `NoHealthyWorker` if none started.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), FleetError> {
        let slot_count = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return Err(FleetError::ShuttingDown);
            }
            if state.initialized {
                return Ok(());
            }
            state.initialized = true;
            state.slots.len()
        };

        let shared = &self.shared;
        let launches = (0..slot_count).map(move |index| async move {
            let result = spawn_worker(shared.factory.as_ref(), &shared.worker_config).await;
            (index, result)
        });
        let results = join_all(launches).await;

        let mut rejected = Vec::new();
        let outcome = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                rejected.extend(results.into_iter().filter_map(|(_, r)| r.ok()));
                Err(FleetError::ShuttingDown)
            } else {
                for (index, result) in results {
                    let role = state.slots[index].role;
                    match result {
                        Ok(worker) => {
                            info!(slot = %role, worker_id = %worker.id(), "Worker slot ready");
                            state.slots[index].install(worker);
                        }
                        Err(e) => warn!(slot = %role, error = %e, "Worker slot failed to start"),
                    }
                }

                match state.resolve_active() {
                    Some(active) => {
                        info!(active = %state.slots[active].role, "Failover orchestrator initialized");
                        Ok(())
                    }
                    None => {
                        error!("No worker slot could be started");
                        state.initialized = false;
                        Err(FleetError::NoHealthyWorker)
                    }
                }
            }
        };

        for worker in rejected {
            close_quietly(worker.as_ref(), "orchestrator shut down during init").await;
        }
        outcome
    }

    /// Check out the active worker
    ///
    /// Waits up to `max_wait` for a permit; a timeout consumes nothing.
    pub async fn acquire(&self) -> Result<FailoverLease, FleetError> {
        if self.shared.state.lock().shut_down {
            return Err(FleetError::ShuttingDown);
        }

        self.throttle().await;

        let max_wait = self.shared.config.max_wait;
        let permit =
            match tokio::time::timeout(max_wait, Arc::clone(&self.permits).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(FleetError::ShuttingDown),
                Err(_) => {
                    warn!(waited_ms = max_wait.as_millis() as u64, "Timed out waiting for a permit");
                    return Err(FleetError::PoolTimeout { waited: max_wait });
                }
            };

        let mut state = self.shared.state.lock();
        if state.shut_down {
            return Err(FleetError::ShuttingDown);
        }

        let index = state.resolve_active().ok_or(FleetError::NoHealthyWorker)?;
        let slot = &state.slots[index];
        let worker = slot.worker.clone().ok_or(FleetError::NoHealthyWorker)?;

        Ok(FailoverLease {
            slot: index,
            role: slot.role,
            generation: slot.generation,
            worker,
            _permit: permit,
        })
    }

    /// Delay callers with random jitter once utilisation crosses the threshold
    async fn throttle(&self) {
        let in_use = self.capacity - self.permits.available_permits().min(self.capacity);
        let utilisation = in_use * 100 / self.capacity;
        if utilisation < self.shared.config.throttle_threshold_percent as usize {
            return;
        }

        let config = &self.shared.config;
        let low = config.throttle_delay_min.min(config.throttle_delay_max);
        let high = config.throttle_delay_min.max(config.throttle_delay_max);
        let millis = rand::thread_rng().gen_range(low.as_millis() as u64..=high.as_millis() as u64);

        debug!(utilisation, delay_ms = millis, "Throttling acquire");
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    /// Report that the lease's worker misbehaved
    ///
    /// Ignored if the slot has been rebuilt since the lease was taken.
    pub fn report_failure(&self, lease: &FailoverLease) {
        self.mark_failed(lease.slot, Some(lease.generation));
    }

    /// Report that the worker in slot `index` misbehaved
    pub fn report_slot_failure(&self, index: usize) {
        self.mark_failed(index, None);
    }

    fn mark_failed(&self, index: usize, generation: Option<u64>) {
        let heal = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return;
            }
            let Some(slot) = state.slots.get_mut(index) else {
                warn!(slot = index, "Failure reported for unknown slot");
                return;
            };
            if generation.is_some_and(|g| g != slot.generation) {
                debug!(slot = %slot.role, "Ignoring failure report for a replaced worker");
                return;
            }

            if slot.healthy {
                warn!(slot = %slot.role, generation = slot.generation, "Worker slot marked unhealthy");
            }
            slot.healthy = false;
            let heal = slot.begin_healing().then_some(slot.role);

            if state.active == Some(index) && state.resolve_active().is_none() {
                error!("No healthy worker slot remains");
            }
            heal
        };

        if let Some(role) = heal {
            spawn_healer(&self.shared, index, self.shared.config.reload_delay(role));
        }
    }

    /// Rebuild an unhealthy slot now
    ///
    /// Returns false if the slot is usable, already healing, unknown, or the
    /// orchestrator is shut down.
    pub fn heal(&self, index: usize) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return false;
            }
            let Some(slot) = state.slots.get_mut(index) else {
                return false;
            };
            if slot.is_usable() || !slot.begin_healing() {
                return false;
            }
        }

        spawn_healer(&self.shared, index, Duration::ZERO);
        true
    }

    /// Snapshot of slots and permits
    pub fn status(&self) -> FailoverStatus {
        let state = self.shared.state.lock();
        let slots: Vec<SlotStatus> = state
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| SlotStatus {
                index,
                role: slot.role,
                healthy: slot.healthy,
                healing: slot.reload == ReloadState::Healing,
                generation: slot.generation,
            })
            .collect();
        let healing = slots.iter().filter(|s| s.healing).map(|s| s.index).collect();

        FailoverStatus {
            active_slot: state.active,
            slots,
            permits_available: self.permits.available_permits(),
            permits_total: self.capacity,
            healing,
        }
    }

    /// Stop healing, refuse new callers and close every worker
    ///
    /// Safe to call repeatedly.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let workers: Vec<Arc<dyn Worker>> = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state
                .slots
                .iter_mut()
                .filter_map(|slot| {
                    slot.healthy = false;
                    slot.worker.take()
                })
                .collect()
        };

        info!(workers = workers.len(), "Shutting down failover orchestrator");

        self.shared.cancel.cancel();
        self.permits.close();
        self.shared.healing.close();
        self.shared.healing.wait().await;

        join_all(
            workers
                .iter()
                .map(|worker| close_quietly(worker.as_ref(), "shutdown")),
        )
        .await;
    }
}

fn spawn_healer(shared: &Arc<Shared>, index: usize, delay: Duration) {
    let task_shared = Arc::clone(shared);
    shared.healing.spawn(heal_slot(task_shared, index, delay));
}

/// Replace the worker in slot `index` after `delay`
async fn heal_slot(shared: Arc<Shared>, index: usize, delay: Duration) {
    let role = SlotRole::for_index(index);
    debug!(slot = %role, delay_ms = delay.as_millis() as u64, "Scheduling slot heal");

    tokio::select! {
        _ = shared.cancel.cancelled() => {
            debug!(slot = %role, "Heal cancelled");
            return;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    let old = {
        let mut state = shared.state.lock();
        if state.shut_down {
            return;
        }
        state.slots[index].worker.take()
    };
    if let Some(old) = old {
        close_quietly(old.as_ref(), "replaced by heal").await;
    }

    let result = spawn_worker(shared.factory.as_ref(), &shared.worker_config).await;

    let rejected = {
        let mut state = shared.state.lock();
        match result {
            Ok(worker) if state.shut_down || shared.cancel.is_cancelled() => Some(worker),
            Ok(worker) => {
                state.slots[index].install(worker);
                state.slots[index].finish_healing();
                let generation = state.slots[index].generation;

                let activate = role.is_primary() || !state.active_is_usable();
                if activate {
                    state.active = Some(index);
                }
                info!(slot = %role, generation, active = activate, "Worker slot healed");
                None
            }
            Err(e) => {
                state.slots[index].finish_healing();
                warn!(slot = %role, error = %e, "Heal failed; slot stays unhealthy");
                None
            }
        }
    };

    if let Some(worker) = rejected {
        close_quietly(worker.as_ref(), "orchestrator shut down during heal").await;
    }
}
