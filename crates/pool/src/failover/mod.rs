//! Primary/secondary failover
//!
//! ```text
//!                 ┌──────────── permits (host-sized) ────────────┐
//! acquire() ─────►│ throttle ─► wait ≤ max_wait ─► active slot    │
//!                 └──────────────────────────────────────────────┘
//!                                   │
//!           ┌───────────────┬───────┴───────┬───────────────┐
//!           ▼               ▼               ▼               ▼
//!       [primary]     [secondary-1]   [secondary-2]   ...
//!           │
//!   report_failure ─► unhealthy ─► failover scan ─► heal after delay
//! ```
//!
//! A healed primary becomes active again; a healed secondary only when no
//! usable slot is active.

mod orchestrator;
mod scan;
mod slot;

pub use orchestrator::{
    FailoverConfig, FailoverLease, FailoverOrchestrator, FailoverStatus, SlotStatus,
};
pub use scan::next_healthy;
pub use slot::{ReloadState, SlotRole};
