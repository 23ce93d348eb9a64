//! Worker and factory traits

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::WorkerConfig;
use crate::error::WorkerError;

/// An expensive, stateful worker process (e.g. a headless browser)
///
/// The fleet never looks inside a worker. A failed operation reported by a
/// caller is how unhealthiness is discovered.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable identifier for logs and status output
    fn id(&self) -> &str;

    /// Start the worker; called once before it is handed out
    async fn start(&self) -> Result<(), WorkerError>;

    /// Stop the worker and release its resources
    async fn close(&self) -> Result<(), WorkerError>;

    /// Address callers use to drive the worker, if any
    fn endpoint(&self) -> Option<String> {
        None
    }

    /// Cheap liveness probe, e.g. whether the process is still running
    fn is_alive(&self) -> bool {
        true
    }
}

/// Creates workers for a given startup configuration
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    /// Build a worker; the fleet calls [`Worker::start`] afterwards
    async fn create(&self, config: &WorkerConfig) -> Result<Arc<dyn Worker>, WorkerError>;
}

/// Create and start a worker, closing it if start fails
pub(crate) async fn spawn_worker(
    factory: &dyn WorkerFactory,
    config: &WorkerConfig,
) -> Result<Arc<dyn Worker>, WorkerError> {
    let worker = factory.create(config).await?;

    if let Err(e) = worker.start().await {
        warn!(worker_id = %worker.id(), error = %e, "Worker failed to start");
        close_quietly(worker.as_ref(), "start failure").await;
        return Err(e);
    }

    debug!(worker_id = %worker.id(), "Worker started");
    Ok(worker)
}

/// Close a worker, logging instead of propagating failures
///
/// Returns whether the close succeeded.
pub(crate) async fn close_quietly(worker: &dyn Worker, reason: &str) -> bool {
    match worker.close().await {
        Ok(()) => {
            debug!(worker_id = %worker.id(), reason, "Worker closed");
            true
        }
        Err(e) => {
            warn!(worker_id = %worker.id(), reason, error = %e, "Failed to close worker");
            false
        }
    }
}
