//! Worker pool
//!
//! Caches running workers by config signature across four tiers and decides
//! when to promote, retire or refuse.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::handle::{Tier, WorkerHandle, WorkerLease};
use super::status::{HandleStatus, PoolStatus, SweepReport, TierCounts};
use crate::error::FleetError;
use crate::host::MemoryMonitor;
use crate::worker::{
    close_quietly, spawn_worker, ConfigSignature, Worker, WorkerConfig, WorkerFactory,
};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Keep one always-warm worker for the default config
    pub permanent_enabled: bool,

    /// Config served by the permanent worker
    pub default_config: WorkerConfig,

    /// Acquisitions after which a cold worker becomes hot
    pub promotion_threshold: u64,

    /// Acquisitions after which a hot worker is retired
    pub max_usage_count: u64,

    /// Minimum acquisitions before memory pressure may retire a hot worker
    pub retire_min_usage: u64,

    /// Memory percentage above which eligible hot workers are retired
    pub retire_memory_percent: f64,

    /// Memory percentage above which no new worker is created
    pub memory_ceiling_percent: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            permanent_enabled: true,
            default_config: WorkerConfig::default(),
            promotion_threshold: 3,
            max_usage_count: 100,
            retire_min_usage: 10,
            retire_memory_percent: 75.0,
            memory_ceiling_percent: 90.0,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the permanent tier
    pub fn with_permanent(mut self, enabled: bool) -> Self {
        self.permanent_enabled = enabled;
        self
    }

    /// Set the config served by the permanent worker
    pub fn with_default_config(mut self, config: WorkerConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Set the cold-to-hot promotion threshold
    pub fn with_promotion_threshold(mut self, threshold: u64) -> Self {
        self.promotion_threshold = threshold.max(1);
        self
    }

    /// Set the usage count that retires a hot worker
    pub fn with_max_usage_count(mut self, count: u64) -> Self {
        self.max_usage_count = count.max(1);
        self
    }

    /// Set memory-driven retirement thresholds
    pub fn with_memory_retirement(mut self, min_usage: u64, percent: f64) -> Self {
        self.retire_min_usage = min_usage;
        self.retire_memory_percent = percent.clamp(0.0, 100.0);
        self
    }

    /// Set the memory ceiling for creating new workers
    pub fn with_memory_ceiling(mut self, percent: f64) -> Self {
        self.memory_ceiling_percent = percent.clamp(0.0, 100.0);
        self
    }
}

#[derive(Default)]
struct PoolState {
    permanent: Option<WorkerHandle>,
    hot: HashMap<ConfigSignature, WorkerHandle>,
    cold: HashMap<ConfigSignature, WorkerHandle>,
    retired: HashMap<Uuid, WorkerHandle>,
    closed: bool,
}

impl PoolState {
    fn handle_mut(&mut self, id: Uuid, signature: &ConfigSignature) -> Option<&mut WorkerHandle> {
        if self.permanent.as_ref().is_some_and(|h| h.id() == id) {
            return self.permanent.as_mut();
        }
        if self.hot.get(signature).is_some_and(|h| h.id() == id) {
            return self.hot.get_mut(signature);
        }
        if self.cold.get(signature).is_some_and(|h| h.id() == id) {
            return self.cold.get_mut(signature);
        }
        self.retired.get_mut(&id)
    }

    fn retire(&mut self, mut handle: WorkerHandle) {
        handle.set_tier(Tier::Retired);
        self.retired.insert(handle.id(), handle);
    }

    fn counts(&self) -> TierCounts {
        TierCounts {
            permanent: usize::from(self.permanent.is_some()),
            hot: self.hot.len(),
            cold: self.cold.len(),
            retired: self.retired.len(),
        }
    }

    fn drain_all(&mut self) -> Vec<WorkerHandle> {
        let mut handles: Vec<WorkerHandle> = self.permanent.take().into_iter().collect();
        handles.extend(self.hot.drain().map(|(_, h)| h));
        handles.extend(self.cold.drain().map(|(_, h)| h));
        handles.extend(self.retired.drain().map(|(_, h)| h));
        handles
    }
}

/// Remove every handle matching `expired` from `map`
fn drain_expired<K, F>(map: &mut HashMap<K, WorkerHandle>, expired: F) -> Vec<WorkerHandle>
where
    K: Clone + Eq + Hash,
    F: Fn(&WorkerHandle) -> bool,
{
    let keys: Vec<K> = map
        .iter()
        .filter(|(_, handle)| expired(handle))
        .map(|(key, _)| key.clone())
        .collect();

    keys.iter().filter_map(|key| map.remove(key)).collect()
}

/// Signature-keyed pool of running workers
///
/// All tier maps live behind one mutex; workers are started and closed
/// outside of it so a slow browser never blocks lookups or status reads.
///
/// # Example
///
/// ```ignore
/// use crawlfleet_pool::pool::{PoolConfig, WorkerPool};
///
/// let pool = WorkerPool::new(PoolConfig::default(), factory, memory);
/// pool.init().await?;
///
/// let lease = pool.acquire(&config).await?;
/// // ... drive lease.worker()
/// pool.release(&lease);
///
/// pool.shutdown_all().await;
/// ```
pub struct WorkerPool {
    config: PoolConfig,
    factory: Arc<dyn WorkerFactory>,
    memory: Arc<dyn MemoryMonitor>,
    permanent_signature: ConfigSignature,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Create an empty pool
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn WorkerFactory>,
        memory: Arc<dyn MemoryMonitor>,
    ) -> Self {
        let permanent_signature = ConfigSignature::compute(&config.default_config);
        Self {
            config,
            factory,
            memory,
            permanent_signature,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start the permanent worker, if that tier is enabled
    ///
    /// Also reopens a pool that was shut down.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), FleetError> {
        {
            let mut state = self.state.lock();
            state.closed = false;
            if !self.config.permanent_enabled || state.permanent.is_some() {
                return Ok(());
            }
        }

        let worker = spawn_worker(self.factory.as_ref(), &self.config.default_config).await?;
        let handle = WorkerHandle::idle(
            self.permanent_signature.clone(),
            Tier::Permanent,
            worker,
            Instant::now(),
        );

        let mut state = self.state.lock();
        if state.permanent.is_some() {
            // Lost a race with a concurrent init; let the janitor dispose of ours
            state.retire(handle);
        } else {
            info!(
                signature = %self.permanent_signature.prefix(12),
                "Permanent worker ready"
            );
            state.permanent = Some(handle);
        }
        Ok(())
    }

    /// Check out a worker for `config`
    ///
    /// Lookup order is permanent, hot, cold. A miss creates a new cold worker
    /// unless host memory is above the ceiling.
    pub async fn acquire(&self, config: &WorkerConfig) -> Result<WorkerLease, FleetError> {
        let signature = ConfigSignature::compute(config);

        if let Some(lease) = self.lookup(&signature)? {
            return Ok(lease);
        }

        let worker = spawn_worker(self.factory.as_ref(), config).await?;
        match self.insert_created(signature, Arc::clone(&worker)) {
            Some(lease) => Ok(lease),
            None => {
                close_quietly(worker.as_ref(), "pool closed during start").await;
                Err(FleetError::ShuttingDown)
            }
        }
    }

    /// Cache a freshly started worker as cold; `None` if the pool closed meanwhile
    fn insert_created(
        &self,
        signature: ConfigSignature,
        worker: Arc<dyn Worker>,
    ) -> Option<WorkerLease> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }

        let mut handle =
            WorkerHandle::checked_out(signature.clone(), Tier::Cold, worker, Instant::now());

        if state.hot.contains_key(&signature) || state.cold.contains_key(&signature) {
            // A concurrent miss already cached this signature; serve from
            // ours once and let the janitor close it
            handle.set_tier(Tier::Retired);
            let lease = handle.lease();
            state.retired.insert(handle.id(), handle);
            return Some(lease);
        }

        let lease = handle.lease();
        debug!(
            worker_id = %lease.worker().id(),
            signature = %signature.prefix(12),
            "Created cold worker"
        );
        state.cold.insert(signature, handle);
        Some(lease)
    }

    /// Serve from the permanent, hot or cold tier, or check the memory ceiling
    ///
    /// Host memory is sampled once, before the lock, and that one reading
    /// drives both retirement and the ceiling check.
    fn lookup(&self, signature: &ConfigSignature) -> Result<Option<WorkerLease>, FleetError> {
        let percent = self.memory.memory_percent();
        let mut state = self.state.lock();
        if state.closed {
            return Err(FleetError::ShuttingDown);
        }
        let now = Instant::now();

        if self.config.permanent_enabled && *signature == self.permanent_signature {
            if let Some(handle) = state.permanent.as_mut() {
                handle.touch(now);
                return Ok(Some(handle.lease()));
            }
        }

        if let Some(handle) = state.hot.get_mut(signature) {
            if !self.should_retire(handle, percent) {
                handle.touch(now);
                return Ok(Some(handle.lease()));
            }
        }
        if let Some(handle) = state.hot.remove(signature) {
            info!(
                worker_id = %handle.worker().id(),
                usage_count = handle.usage_count(),
                active_requests = handle.active_requests(),
                "Retiring hot worker"
            );
            state.retire(handle);
        }

        if let Some(mut handle) = state.cold.remove(signature) {
            handle.touch(now);
            if handle.usage_count() >= self.config.promotion_threshold {
                debug!(
                    worker_id = %handle.worker().id(),
                    usage_count = handle.usage_count(),
                    "Promoting cold worker to hot"
                );
                handle.set_tier(Tier::Hot);
            }

            let lease = handle.lease();
            match handle.tier() {
                Tier::Hot => state.hot.insert(signature.clone(), handle),
                _ => state.cold.insert(signature.clone(), handle),
            };
            return Ok(Some(lease));
        }

        if percent > self.config.memory_ceiling_percent {
            warn!(
                memory_percent = percent,
                ceiling = self.config.memory_ceiling_percent,
                "Refusing to create worker under memory pressure"
            );
            return Err(FleetError::MemoryPressure {
                percent,
                ceiling: self.config.memory_ceiling_percent,
            });
        }

        Ok(None)
    }

    fn should_retire(&self, handle: &WorkerHandle, memory_percent: f64) -> bool {
        if handle.usage_count() >= self.config.max_usage_count {
            return true;
        }
        handle.usage_count() >= self.config.retire_min_usage
            && memory_percent > self.config.retire_memory_percent
    }

    /// Return a worker to the pool
    ///
    /// Only decrements the active count (never below zero); closing is the
    /// janitor's job. Releasing twice is harmless.
    pub fn release(&self, lease: &WorkerLease) {
        let mut state = self.state.lock();
        match state.handle_mut(lease.id(), lease.signature()) {
            Some(handle) => handle.release(Instant::now()),
            None => debug!(handle_id = %lease.id(), "Released lease for a worker no longer pooled"),
        }
    }

    /// Stop serving the lease's worker, e.g. after it was found dead
    ///
    /// The handle moves to Retired whatever its tier, so the next acquire for
    /// its signature starts a fresh worker; an evicted permanent worker is
    /// replaced by the next [`init`](Self::init). The caller still releases
    /// the lease, after which the janitor closes it. Returns `false` if the
    /// handle was already retired or gone.
    pub fn evict(&self, lease: &WorkerLease) -> bool {
        let mut state = self.state.lock();
        let id = lease.id();
        let signature = lease.signature();

        let handle = if state.permanent.as_ref().is_some_and(|h| h.id() == id) {
            state.permanent.take()
        } else if state.hot.get(signature).is_some_and(|h| h.id() == id) {
            state.hot.remove(signature)
        } else if state.cold.get(signature).is_some_and(|h| h.id() == id) {
            state.cold.remove(signature)
        } else {
            None
        };

        let Some(handle) = handle else {
            return false;
        };
        warn!(
            worker_id = %handle.worker().id(),
            tier = %handle.tier(),
            signature = %signature.prefix(12),
            "Evicting worker"
        );
        state.retire(handle);
        true
    }

    /// Remove idle cold/hot workers and drained retired workers, then close them
    ///
    /// Close failures are logged and counted; the entries are gone either way.
    pub async fn reclaim(&self, cold_ttl: Duration, hot_ttl: Duration) -> SweepReport {
        let now = Instant::now();
        let (cold, hot, retired) = {
            let mut state = self.state.lock();
            (
                drain_expired(&mut state.cold, |h| h.is_expired(cold_ttl, now)),
                drain_expired(&mut state.hot, |h| h.is_expired(hot_ttl, now)),
                drain_expired(&mut state.retired, |h| h.active_requests() == 0),
            )
        };

        let mut report = SweepReport {
            cold_closed: cold.len(),
            hot_closed: hot.len(),
            retired_closed: retired.len(),
            close_failures: 0,
        };
        if report.total() == 0 {
            return report;
        }

        let closes = cold
            .iter()
            .chain(hot.iter())
            .chain(retired.iter())
            .map(|handle| close_quietly(handle.worker().as_ref(), "reclaimed"));
        report.close_failures = join_all(closes).await.into_iter().filter(|ok| !ok).count();

        report
    }

    /// Close every worker in every tier and empty the pool
    ///
    /// Safe to call repeatedly. Later `acquire` calls fail until [`init`](Self::init).
    #[instrument(skip(self))]
    pub async fn shutdown_all(&self) {
        let handles = {
            let mut state = self.state.lock();
            state.closed = true;
            state.drain_all()
        };

        if handles.is_empty() {
            return;
        }

        info!(count = handles.len(), "Shutting down worker pool");
        join_all(
            handles
                .iter()
                .map(|handle| close_quietly(handle.worker().as_ref(), "shutdown")),
        )
        .await;
    }

    /// Snapshot of every tier
    pub fn status(&self) -> PoolStatus {
        let now = Instant::now();
        let state = self.state.lock();

        let handles = state
            .permanent
            .iter()
            .chain(state.hot.values())
            .chain(state.cold.values())
            .chain(state.retired.values())
            .map(|handle| HandleStatus::of(handle, now))
            .collect();
        let counts = state.counts();
        drop(state);

        PoolStatus {
            counts,
            handles,
            memory_percent: self.memory.memory_percent(),
        }
    }

    /// Number of workers across all tiers
    pub fn len(&self) -> usize {
        self.state.lock().counts().total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
