//! Read-only pool snapshots

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Tier, WorkerHandle};

/// Number of workers per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub permanent: usize,
    pub hot: usize,
    pub cold: usize,
    pub retired: usize,
}

impl TierCounts {
    pub fn total(&self) -> usize {
        self.permanent + self.hot + self.cold + self.retired
    }
}

/// Snapshot of one handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleStatus {
    pub id: Uuid,
    pub signature_prefix: String,
    pub tier: Tier,
    pub active_requests: u32,
    pub usage_count: u64,
    pub idle_ms: u64,
}

impl HandleStatus {
    pub(crate) fn of(handle: &WorkerHandle, now: tokio::time::Instant) -> Self {
        Self {
            id: handle.id(),
            signature_prefix: handle.signature().prefix(12).to_string(),
            tier: handle.tier(),
            active_requests: handle.active_requests(),
            usage_count: handle.usage_count(),
            idle_ms: handle.idle_for(now).as_millis() as u64,
        }
    }
}

/// Snapshot of the whole pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStatus {
    pub counts: TierCounts,
    /// Every handle, permanent first, then hot, cold and retired
    pub handles: Vec<HandleStatus>,
    /// Host memory utilisation when the snapshot was taken
    pub memory_percent: f64,
}

impl PoolStatus {
    /// Handles in one tier
    pub fn tier(&self, tier: Tier) -> impl Iterator<Item = &HandleStatus> {
        self.handles.iter().filter(move |h| h.tier == tier)
    }
}

/// Outcome of one reclamation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub cold_closed: usize,
    pub hot_closed: usize,
    pub retired_closed: usize,
    /// Closes that failed; the entries were dropped regardless
    pub close_failures: usize,
}

impl SweepReport {
    /// Handles removed from the pool
    pub fn total(&self) -> usize {
        self.cold_closed + self.hot_closed + self.retired_closed
    }
}
