//! Background reclamation loop

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::schedule::{JanitorConfig, SweepPlan};
use crate::host::MemoryMonitor;
use crate::pool::{SweepReport, WorkerPool};

/// Periodically closes idle and retired workers in a [`WorkerPool`]
///
/// # Example
///
/// ```ignore
/// let janitor = Janitor::new(pool.clone(), memory, JanitorConfig::default());
/// let handle = janitor.spawn();
/// // ...
/// handle.shutdown().await;
/// ```
pub struct Janitor {
    pool: Arc<WorkerPool>,
    memory: Arc<dyn MemoryMonitor>,
    config: JanitorConfig,
}

impl Janitor {
    pub fn new(pool: Arc<WorkerPool>, memory: Arc<dyn MemoryMonitor>, config: JanitorConfig) -> Self {
        Self {
            pool,
            memory,
            config,
        }
    }

    /// Plan for the current memory reading
    pub fn current_plan(&self) -> SweepPlan {
        self.config.plan_for(self.memory.memory_percent())
    }

    /// Run one sweep now, using the TTLs for the current memory reading
    pub async fn sweep_once(&self) -> SweepReport {
        let plan = self.current_plan();
        self.sweep(plan).await
    }

    async fn sweep(&self, plan: SweepPlan) -> SweepReport {
        let report = self.pool.reclaim(plan.cold_ttl, plan.hot_ttl).await;

        if report.close_failures > 0 {
            warn!(
                failures = report.close_failures,
                "Some reclaimed workers failed to close"
            );
        }
        if report.total() > 0 {
            info!(
                cold = report.cold_closed,
                hot = report.hot_closed,
                retired = report.retired_closed,
                "Janitor reclaimed workers"
            );
        }
        report
    }

    /// Start the loop on the current runtime
    pub fn spawn(self) -> JanitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                let plan = self.current_plan();
                debug!(
                    scan_interval_ms = plan.scan_interval.as_millis() as u64,
                    cold_ttl_ms = plan.cold_ttl.as_millis() as u64,
                    hot_ttl_ms = plan.hot_ttl.as_millis() as u64,
                    "Janitor sleeping"
                );

                tokio::select! {
                    _ = tokio::time::sleep(plan.scan_interval) => {
                        self.sweep(plan).await;
                    }
                    // Also fires when the sender is dropped
                    _ = shutdown_rx.changed() => {
                        debug!("Janitor: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Janitor loop exited");
        });

        JanitorHandle { shutdown_tx, task }
    }
}

/// Running janitor; stops when shut down or dropped
pub struct JanitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// Signal the loop and wait for it to exit
    ///
    /// A sweep already in progress finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("Janitor task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
