//! Error types for the worker fleet
//!
//! Callers see one of three distinguishable backpressure signals
//! ([`FleetError::PoolTimeout`], [`FleetError::NoHealthyWorker`],
//! [`FleetError::MemoryPressure`]) so upstream retry logic can react
//! differently to each.

use std::time::Duration;

use crate::registry::RegistryError;

/// Errors raised by a single worker or its collaborators
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    /// Worker could not be created or started
    #[error("worker failed to start: {0}")]
    Start(String),

    /// Worker could not be closed cleanly
    #[error("worker failed to close: {0}")]
    Close(String),

    /// Container provisioner call failed
    #[error("container provisioner error: {0}")]
    Provisioner(String),

    /// Worker is running but its endpoint cannot be reached
    #[error("worker unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to callers of the pool and the failover orchestrator
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Admission-control deadline exceeded while waiting for a permit
    #[error("timed out after {waited:?} waiting for a worker permit")]
    PoolTimeout { waited: Duration },

    /// No slot or worker is currently usable
    #[error("no healthy worker available")]
    NoHealthyWorker,

    /// A pool miss was refused because host memory is over the hard ceiling
    #[error("host memory at {percent:.1}% exceeds ceiling of {ceiling:.1}%")]
    MemoryPressure { percent: f64, ceiling: f64 },

    /// Creating or starting a worker failed
    #[error("failed to provision worker: {0}")]
    Provision(#[from] WorkerError),

    /// The pool or orchestrator has been shut down
    #[error("worker fleet is shutting down")]
    ShuttingDown,

    /// Registry persistence failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl FleetError {
    /// Whether the caller should back off and retry later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolTimeout { .. } | Self::NoHealthyWorker | Self::MemoryPressure { .. }
        )
    }
}
