//! Container runtime contract

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// How an image is obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMode {
    /// Pull from a registry
    #[default]
    Pull,
    /// Build locally
    Build,
    /// Must already exist locally
    Local,
}

/// Result of running a command inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Starts, inspects and removes containers
#[async_trait]
pub trait ContainerProvisioner: Send + Sync {
    /// Make sure `name` is available; returns the image reference to run
    async fn ensure_image_exists(&self, name: &str, mode: ImageMode)
        -> Result<String, WorkerError>;

    /// Start a container publishing its endpoint on `host_port`; returns its id
    async fn create_container(
        &self,
        image: &str,
        host_port: u16,
        volumes: &[String],
        env: &BTreeMap<String, String>,
        extra_args: &[String],
    ) -> Result<String, WorkerError>;

    async fn is_running(&self, container_id: &str) -> Result<bool, WorkerError>;

    async fn exec_in_container(
        &self,
        container_id: &str,
        command: &[String],
    ) -> Result<ExecOutput, WorkerError>;

    async fn remove_container(&self, container_id: &str) -> Result<(), WorkerError>;

    /// Wait for the container to report ready; false on timeout
    async fn wait_until_ready(
        &self,
        container_id: &str,
        timeout: Duration,
    ) -> Result<bool, WorkerError>;

    /// Wait for the published endpoint to accept connections; false on timeout
    async fn wait_for_endpoint_ready(
        &self,
        host_port: u16,
        timeout: Duration,
    ) -> Result<bool, WorkerError>;
}
