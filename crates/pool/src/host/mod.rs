//! Host inspection
//!
//! This module provides:
//! - [`HostResources`] - RAM, CPU cores and fd limit, probed once for sizing
//! - [`MemoryMonitor`] - current host memory utilisation, read on every decision
//! - [`SystemMemoryMonitor`] / [`FixedMemoryMonitor`] - live and test implementations

mod memory;
mod resources;

pub use memory::{FixedMemoryMonitor, MemoryMonitor, SystemMemoryMonitor};
pub use resources::HostResources;
