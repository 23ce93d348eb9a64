// Run a local fleet until interrupted
//
// Design Decision: Each status tick also performs one acquire/release cycle so
// dead processes are noticed. Failover mode reports the slot for healing; pool
// mode evicts the worker (restarting the permanent one) so it is never served
// again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use crawlfleet_pool::host::SystemMemoryMonitor;
use crawlfleet_pool::{
    FailoverOrchestrator, FailoverStatus, FleetConfig, HostResources, Janitor, PoolStatus, Tier,
    WorkerConfig, WorkerFactory, WorkerPool,
};
use tracing::{info, warn};

use super::signature::load_config;
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use crate::process::ProcessWorkerFactory;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Primary plus backup slots behind a permit semaphore
    Failover,
    /// Tiered cache keyed by config signature
    Pool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Browser executable to launch for each worker
    #[arg(long, env = "CRAWLFLEET_BROWSER", default_value = "chromium")]
    pub command: String,

    /// Orchestration strategy
    #[arg(long, value_enum, default_value = "failover")]
    pub mode: RunMode,

    /// Worker config file (JSON or YAML)
    #[arg(long)]
    pub worker_config: Option<PathBuf>,

    /// First remote debugging port handed out to workers
    #[arg(long, default_value = "9222")]
    pub first_port: u16,

    /// Seconds between status reports
    #[arg(long, default_value = "30")]
    pub status_interval: u64,
}

pub async fn run(args: RunArgs, output: OutputFormat, quiet: bool) -> Result<()> {
    let config = FleetConfig::from_env();
    let worker_config = match &args.worker_config {
        Some(path) => load_config(path)?,
        None => config.pool.default_config.clone(),
    };
    let factory: Arc<dyn WorkerFactory> =
        Arc::new(ProcessWorkerFactory::new(&args.command, args.first_port));
    let interval = Duration::from_secs(args.status_interval.max(1));

    info!(
        command = %args.command,
        mode = ?args.mode,
        signature = %worker_config.signature().prefix(12),
        "Starting fleet"
    );

    match args.mode {
        RunMode::Failover => {
            run_failover(config, factory, worker_config, interval, output, quiet).await
        }
        RunMode::Pool => run_pool(config, factory, worker_config, interval, output, quiet).await,
    }
}

async fn run_failover(
    config: FleetConfig,
    factory: Arc<dyn WorkerFactory>,
    worker_config: WorkerConfig,
    interval: Duration,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let host = HostResources::probe();
    let orchestrator = FailoverOrchestrator::new(factory, worker_config, config.failover, &host);
    orchestrator
        .initialize()
        .await
        .context("Failed to start any failover slot")?;

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                check_failover(&orchestrator).await;
                if !quiet {
                    print_failover(&orchestrator.status(), output)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

async fn check_failover(orchestrator: &FailoverOrchestrator) {
    match orchestrator.acquire().await {
        Ok(lease) => {
            if !lease.worker().is_alive() {
                warn!(slot = lease.slot(), worker_id = %lease.worker().id(), "Worker exited");
                orchestrator.report_failure(&lease);
            }
            lease.release();
        }
        Err(e) => warn!(error = %e, "Health check could not acquire a worker"),
    }

    // Slots whose initial launch or last heal failed get another attempt
    for slot in orchestrator.status().slots {
        if !slot.healthy && !slot.healing {
            orchestrator.heal(slot.index);
        }
    }
}

async fn run_pool(
    config: FleetConfig,
    factory: Arc<dyn WorkerFactory>,
    worker_config: WorkerConfig,
    interval: Duration,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let memory = Arc::new(SystemMemoryMonitor::new());
    let pool = Arc::new(WorkerPool::new(config.pool, factory, memory.clone()));
    pool.init().await.context("Failed to start permanent worker")?;
    let janitor = Janitor::new(Arc::clone(&pool), memory, config.janitor).spawn();

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                check_pool(&pool, &worker_config).await;
                if !quiet {
                    print_pool(&pool.status(), output)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    janitor.shutdown().await;
    pool.shutdown_all().await;
    Ok(())
}

async fn check_pool(pool: &WorkerPool, worker_config: &WorkerConfig) {
    match pool.acquire(worker_config).await {
        Ok(lease) => {
            let dead = !lease.worker().is_alive();
            if dead {
                warn!(worker_id = %lease.worker().id(), tier = %lease.tier(), "Worker exited");
                pool.evict(&lease);
            }
            pool.release(&lease);

            if dead && lease.tier() == Tier::Permanent {
                if let Err(e) = pool.init().await {
                    warn!(error = %e, "Failed to replace permanent worker");
                }
            }
        }
        Err(e) if e.is_retryable() => info!(error = %e, "Pool busy, skipping check"),
        Err(e) => warn!(error = %e, "Health check could not acquire a worker"),
    }
}

fn print_failover(status: &FailoverStatus, output: OutputFormat) -> Result<()> {
    if !output.is_text() {
        return output.print_value(status);
    }

    let active = status
        .active_slot
        .map_or_else(|| "none".to_string(), |i| i.to_string());
    print_field("Active slot", &active);
    print_field(
        "Permits",
        &format!("{}/{}", status.permits_available, status.permits_total),
    );
    print_table_header(&[("SLOT", 6), ("ROLE", 12), ("HEALTHY", 8), ("HEALING", 8), ("GEN", 6)]);
    for slot in &status.slots {
        let index = slot.index.to_string();
        let role = slot.role.to_string();
        let healthy = slot.healthy.to_string();
        let healing = slot.healing.to_string();
        let generation = slot.generation.to_string();
        print_table_row(&[
            (&index, 6),
            (&role, 12),
            (&healthy, 8),
            (&healing, 8),
            (&generation, 6),
        ]);
    }
    println!();
    Ok(())
}

fn print_pool(status: &PoolStatus, output: OutputFormat) -> Result<()> {
    if !output.is_text() {
        return output.print_value(status);
    }

    let counts = &status.counts;
    print_field("Memory", &format!("{:.1}%", status.memory_percent));
    print_field(
        "Workers",
        &format!(
            "{} permanent, {} hot, {} cold, {} retired",
            counts.permanent, counts.hot, counts.cold, counts.retired
        ),
    );
    if !status.handles.is_empty() {
        print_table_header(&[("SIGNATURE", 14), ("TIER", 10), ("ACTIVE", 7), ("USES", 6), ("IDLE", 8)]);
        for handle in &status.handles {
            let tier = handle.tier.to_string();
            let active = handle.active_requests.to_string();
            let uses = handle.usage_count.to_string();
            let idle = format!("{}s", handle.idle_ms / 1000);
            print_table_row(&[
                (&handle.signature_prefix, 14),
                (&tier, 10),
                (&active, 7),
                (&uses, 6),
                (&idle, 8),
            ]);
        }
    }
    println!();
    Ok(())
}
