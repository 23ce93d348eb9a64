//! Worker collaborator contract
//!
//! This module provides:
//! - [`Worker`] / [`WorkerFactory`] - the opaque browser instance and how to create one
//! - [`WorkerConfig`] - a worker's startup configuration
//! - [`ConfigSignature`] - the order-independent digest used as the pool key

mod config;
mod signature;
mod traits;

pub use config::{Viewport, WorkerConfig};
pub use signature::ConfigSignature;
pub use traits::{Worker, WorkerFactory};

pub(crate) use traits::{close_quietly, spawn_worker};
