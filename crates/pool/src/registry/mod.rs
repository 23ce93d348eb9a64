//! Container registry and provisioning
//!
//! This module provides:
//! - [`WorkerRegistry`] - container records persisted across restarts
//! - [`ContainerProvisioner`] - the container runtime contract
//! - [`ContainerWorkerFactory`] - a [`WorkerFactory`](crate::worker::WorkerFactory)
//!   that reuses or provisions containers per config signature

mod container;
mod provisioner;
mod store;

pub use container::{ContainerSettings, ContainerWorker, ContainerWorkerFactory};
pub use provisioner::{ContainerProvisioner, ExecOutput, ImageMode};
pub use store::{RegistryError, RegistryRecord, WorkerRegistry};
