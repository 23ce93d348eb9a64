//! Tiered worker pool
//!
//! This module provides:
//! - [`WorkerPool`] - signature-keyed cache of running workers
//! - [`PoolConfig`] - promotion, retirement and memory-ceiling thresholds
//! - [`WorkerLease`] - what a caller holds between `acquire` and `release`
//!
//! # Tiers
//!
//! ```text
//!                 promotion_threshold         max_usage_count / memory
//! (created) ──► Cold ─────────────────► Hot ─────────────────────────► Retired ──► (closed)
//!                │                       │                               │
//!                └── idle > cold_ttl ────┴── idle > hot_ttl ──► (closed) └── drained
//!
//! Permanent: one default-config worker, created at init, never evicted
//! ```

mod handle;
#[allow(clippy::module_inception)]
mod pool;
mod status;

pub use handle::{Tier, WorkerHandle, WorkerLease};
pub use pool::{PoolConfig, WorkerPool};
pub use status::{HandleStatus, PoolStatus, SweepReport, TierCounts};
