//! Idle-worker reclamation
//!
//! The janitor wakes on a schedule that tightens as host memory fills:
//!
//! ```text
//! memory%   scan   cold_ttl  hot_ttl
//! > 80       10s     30s       60s
//! > 60       30s     60s      120s
//! else       60s    300s      600s
//! ```
//!
//! Each wake closes cold and hot workers idle past their TTL and retired
//! workers with no active requests.

mod runner;
mod schedule;

pub use runner::{Janitor, JanitorHandle};
pub use schedule::{JanitorConfig, PressureLevel, SweepPlan};
