//! Worker handles and leases

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::worker::{ConfigSignature, Worker};

/// Pool classification of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// The always-warm default-config worker
    Permanent,
    /// Frequently reused config
    Hot,
    /// First-use or rare config
    Cold,
    /// Marked for disposal, still finishing active work
    Retired,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent"),
            Self::Hot => write!(f, "hot"),
            Self::Cold => write!(f, "cold"),
            Self::Retired => write!(f, "retired"),
        }
    }
}

/// One running worker owned by a [`WorkerPool`](super::WorkerPool)
///
/// Counters are only changed while the pool's state lock is held.
pub struct WorkerHandle {
    id: Uuid,
    signature: ConfigSignature,
    tier: Tier,
    active_requests: u32,
    usage_count: u64,
    last_used_at: Instant,
    worker: Arc<dyn Worker>,
}

impl WorkerHandle {
    /// A freshly created handle already serving its first request
    pub(crate) fn checked_out(
        signature: ConfigSignature,
        tier: Tier,
        worker: Arc<dyn Worker>,
        now: Instant,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            signature,
            tier,
            active_requests: 1,
            usage_count: 1,
            last_used_at: now,
            worker,
        }
    }

    /// A freshly created handle nobody is using yet
    pub(crate) fn idle(
        signature: ConfigSignature,
        tier: Tier,
        worker: Arc<dyn Worker>,
        now: Instant,
    ) -> Self {
        Self {
            active_requests: 0,
            usage_count: 0,
            ..Self::checked_out(signature, tier, worker, now)
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn signature(&self) -> &ConfigSignature {
        &self.signature
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn active_requests(&self) -> u32 {
        self.active_requests
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }

    /// Time since the handle was last acquired or released
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    /// Unused and idle for longer than `ttl`
    pub(crate) fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        self.active_requests == 0 && self.idle_for(now) > ttl
    }

    pub(crate) fn set_tier(&mut self, tier: Tier) {
        self.tier = tier;
    }

    /// Record one more acquisition
    pub(crate) fn touch(&mut self, now: Instant) {
        self.usage_count += 1;
        self.active_requests += 1;
        self.last_used_at = now;
    }

    /// Record one release; never goes below zero
    pub(crate) fn release(&mut self, now: Instant) {
        self.active_requests = self.active_requests.saturating_sub(1);
        self.last_used_at = now;
    }

    /// Caller-side view of this handle in its current tier
    pub(crate) fn lease(&self) -> WorkerLease {
        WorkerLease {
            id: self.id,
            signature: self.signature.clone(),
            tier: self.tier,
            worker: Arc::clone(&self.worker),
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("signature", &self.signature.prefix(12))
            .field("tier", &self.tier)
            .field("active_requests", &self.active_requests)
            .field("usage_count", &self.usage_count)
            .field("worker_id", &self.worker.id())
            .finish()
    }
}

/// A worker checked out of the pool
///
/// Hand it back with [`WorkerPool::release`](super::WorkerPool::release).
#[derive(Clone)]
pub struct WorkerLease {
    id: Uuid,
    signature: ConfigSignature,
    tier: Tier,
    worker: Arc<dyn Worker>,
}

impl WorkerLease {
    /// Id of the underlying handle
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn signature(&self) -> &ConfigSignature {
        &self.signature
    }

    /// Tier of the handle at the moment it was acquired
    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }
}

impl fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLease")
            .field("id", &self.id)
            .field("signature", &self.signature.prefix(12))
            .field("tier", &self.tier)
            .field("worker_id", &self.worker.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockWorker;
    use crate::worker::WorkerConfig;

    fn handle(now: Instant) -> WorkerHandle {
        WorkerHandle::checked_out(
            WorkerConfig::default().signature(),
            Tier::Cold,
            Arc::new(MockWorker::new("w")),
            now,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_never_goes_negative() {
        let now = Instant::now();
        let mut handle = handle(now);
        assert_eq!(handle.active_requests(), 1);

        handle.release(now);
        handle.release(now);
        handle.release(now);
        assert_eq!(handle.active_requests(), 0);
        assert_eq!(handle.usage_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_requires_idle_and_ttl() {
        let start = Instant::now();
        let mut handle = handle(start);
        let ttl = Duration::from_secs(30);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!handle.is_expired(ttl, Instant::now()), "in-use handle never expires");

        handle.release(Instant::now());
        assert!(!handle.is_expired(ttl, Instant::now()));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(handle.is_expired(ttl, Instant::now()));
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Permanent.to_string(), "permanent");
        assert_eq!(Tier::Retired.to_string(), "retired");
        assert_eq!(serde_json::to_string(&Tier::Hot).unwrap(), "\"hot\"");
    }
}
