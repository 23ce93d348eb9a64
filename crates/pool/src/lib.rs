//! # Crawlfleet Worker Pool
//!
//! Resource pooling and resilience for fleets of headless browser workers.
//!
//! ## Features
//!
//! - **Host-aware sizing**: concurrency bounded by RAM, CPU cores and file descriptors
//! - **Tiered reuse**: workers cached by config signature, promoted with use, retired with age
//! - **Pressure-driven reclamation**: idle workers closed sooner as memory fills
//! - **Failover and self-healing**: a primary with secondaries, rebuilt in the background
//! - **Container registry**: running containers rediscovered across restarts
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  FailoverOrchestrator                        │
//! │  (host-sized permits, active slot, failover, healing)       │
//! └─────────────────────────────────────────────────────────────┘
//!            or
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │          WorkerPool          │◄──│         Janitor          │
//! │ (permanent/hot/cold/retired) │   │ (TTL sweeps by pressure) │
//! └──────────────────────────────┘   └──────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkerFactory                            │
//! │  (processes, or containers via ContainerWorkerFactory)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use crawlfleet_pool::prelude::*;
//!
//! let memory = Arc::new(SystemMemoryMonitor::new());
//! let pool = Arc::new(WorkerPool::new(PoolConfig::default(), factory, memory.clone()));
//! pool.init().await?;
//!
//! let janitor = Janitor::new(pool.clone(), memory, JanitorConfig::default()).spawn();
//!
//! let lease = pool.acquire(&WorkerConfig::default().with_user_agent("bot/1.0")).await?;
//! // ... crawl with lease.worker()
//! pool.release(&lease);
//!
//! janitor.shutdown().await;
//! pool.shutdown_all().await;
//! ```

pub mod config;
pub mod error;
pub mod failover;
pub mod host;
pub mod janitor;
pub mod pool;
pub mod registry;
pub mod sizing;
pub mod testing;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::FleetConfig;
    pub use crate::error::{FleetError, WorkerError};
    pub use crate::failover::{FailoverConfig, FailoverLease, FailoverOrchestrator};
    pub use crate::host::{HostResources, MemoryMonitor, SystemMemoryMonitor};
    pub use crate::janitor::{Janitor, JanitorConfig, JanitorHandle};
    pub use crate::pool::{PoolConfig, Tier, WorkerLease, WorkerPool};
    pub use crate::sizing::SizingParams;
    pub use crate::worker::{ConfigSignature, Worker, WorkerConfig, WorkerFactory};
}

// Re-export key types at crate root
pub use config::FleetConfig;
pub use error::{FleetError, WorkerError};
pub use failover::{FailoverConfig, FailoverLease, FailoverOrchestrator, FailoverStatus};
pub use host::{HostResources, MemoryMonitor};
pub use janitor::{Janitor, JanitorConfig, JanitorHandle};
pub use pool::{PoolConfig, PoolStatus, Tier, WorkerLease, WorkerPool};
pub use registry::{ContainerProvisioner, ContainerWorkerFactory, WorkerRegistry};
pub use sizing::{compute_safe_capacity, SizingParams};
pub use worker::{ConfigSignature, Worker, WorkerConfig, WorkerFactory};
