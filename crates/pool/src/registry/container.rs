//! Container-backed workers
//!
//! [`ContainerWorkerFactory`] turns a [`WorkerConfig`] into a running
//! container: it first tries to adopt a registered container for the same
//! signature (e.g. left behind by a previous process), and otherwise starts a
//! new one on a free host port and records it in the [`WorkerRegistry`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::provisioner::{ContainerProvisioner, ImageMode};
use super::store::{RegistryRecord, WorkerRegistry};
use crate::config::duration_millis;
use crate::error::{FleetError, WorkerError};
use crate::worker::{ConfigSignature, Worker, WorkerConfig, WorkerFactory};

/// How worker containers are launched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerSettings {
    pub image: String,
    pub image_mode: ImageMode,

    /// Inclusive host port range handed out to containers
    pub port_range: (u16, u16),

    pub volumes: Vec<String>,

    /// Longest wait for the container itself to report ready
    #[serde(with = "duration_millis")]
    pub ready_timeout: Duration,

    /// Longest wait for the published endpoint to accept connections
    #[serde(with = "duration_millis")]
    pub endpoint_timeout: Duration,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: "crawlfleet/browser:latest".to_string(),
            image_mode: ImageMode::Pull,
            port_range: (9300, 9399),
            volumes: Vec::new(),
            ready_timeout: Duration::from_secs(60),
            endpoint_timeout: Duration::from_secs(30),
        }
    }
}

impl ContainerSettings {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_image_mode(mut self, mode: ImageMode) -> Self {
        self.image_mode = mode;
        self
    }

    pub fn with_port_range(mut self, first: u16, last: u16) -> Self {
        self.port_range = (first.min(last), first.max(last));
        self
    }

    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volumes.push(volume.into());
        self
    }

    pub fn with_timeouts(mut self, ready: Duration, endpoint: Duration) -> Self {
        self.ready_timeout = ready;
        self.endpoint_timeout = endpoint;
        self
    }
}

/// Containers and ports currently owned by live workers of this process
#[derive(Default)]
struct Claims {
    containers: HashSet<String>,
    ports: HashSet<u16>,
}

struct ContainerShared {
    provisioner: Arc<dyn ContainerProvisioner>,
    registry: Arc<WorkerRegistry>,
    settings: ContainerSettings,
    claims: Mutex<Claims>,
}

impl ContainerShared {
    fn release_container(&self, container_id: &str) {
        self.claims.lock().containers.remove(container_id);
    }

    fn release_port(&self, port: u16) {
        self.claims.lock().ports.remove(&port);
    }

    /// Reserve the lowest port not registered and not being provisioned
    fn reserve_port(&self) -> Option<u16> {
        let registered = self.registry.used_ports();
        let mut claims = self.claims.lock();
        let (first, last) = self.settings.port_range;

        let port = (first..=last)
            .find(|port| !registered.contains(port) && !claims.ports.contains(port))?;
        claims.ports.insert(port);
        Some(port)
    }
}

/// [`WorkerFactory`] that runs each worker in its own container
pub struct ContainerWorkerFactory {
    shared: Arc<ContainerShared>,
}

impl ContainerWorkerFactory {
    pub fn new(
        provisioner: Arc<dyn ContainerProvisioner>,
        registry: Arc<WorkerRegistry>,
        settings: ContainerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(ContainerShared {
                provisioner,
                registry,
                settings,
                claims: Mutex::new(Claims::default()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.shared.registry
    }

    /// Drop records of unclaimed containers that are no longer running
    pub async fn prune_stale(&self) -> Result<Vec<RegistryRecord>, FleetError> {
        let mut pruned = Vec::new();

        for record in self.shared.registry.records() {
            if self.shared.claims.lock().containers.contains(&record.container_id) {
                continue;
            }

            match self.shared.provisioner.is_running(&record.container_id).await {
                Ok(true) => {}
                Ok(false) => {
                    self.shared.registry.remove(&record.container_id)?;
                    info!(container_id = %record.container_id, "Pruned stale registry record");
                    pruned.push(record);
                }
                Err(e) => {
                    warn!(container_id = %record.container_id, error = %e, "Could not inspect container");
                }
            }
        }

        Ok(pruned)
    }

    /// Claim a registered, running, unclaimed container for `signature`
    async fn adopt(&self, signature: &ConfigSignature) -> Option<RegistryRecord> {
        for record in self.shared.registry.find_by_signature(signature) {
            if !self.shared.claims.lock().containers.insert(record.container_id.clone()) {
                continue;
            }

            match self.shared.provisioner.is_running(&record.container_id).await {
                Ok(true) => {
                    info!(
                        container_id = %record.container_id,
                        host_port = record.host_port,
                        "Reusing registered container"
                    );
                    return Some(record);
                }
                Ok(false) => {
                    debug!(container_id = %record.container_id, "Registered container is gone");
                    if let Err(e) = self.shared.registry.remove(&record.container_id) {
                        warn!(error = %e, "Failed to drop stale registry record");
                    }
                }
                Err(e) => {
                    warn!(container_id = %record.container_id, error = %e, "Could not inspect container");
                }
            }
            self.shared.release_container(&record.container_id);
        }

        None
    }

    async fn provision(
        &self,
        signature: ConfigSignature,
        port: u16,
        config: &WorkerConfig,
    ) -> Result<RegistryRecord, WorkerError> {
        let settings = &self.shared.settings;
        let provisioner = &self.shared.provisioner;

        let image = provisioner
            .ensure_image_exists(&settings.image, settings.image_mode)
            .await?;
        let container_id = provisioner
            .create_container(&image, port, &settings.volumes, &config.env, &config.extra_args)
            .await?;

        let record = RegistryRecord::new(container_id, port, signature);
        if let Err(e) = self.shared.registry.insert(record.clone()) {
            if let Err(remove_err) = provisioner.remove_container(&record.container_id).await {
                warn!(container_id = %record.container_id, error = %remove_err, "Failed to remove unregistered container");
            }
            return Err(WorkerError::Provisioner(e.to_string()));
        }

        info!(
            container_id = %record.container_id,
            host_port = port,
            image = %image,
            "Provisioned worker container"
        );
        Ok(record)
    }
}

#[async_trait]
impl WorkerFactory for ContainerWorkerFactory {
    async fn create(&self, config: &WorkerConfig) -> Result<Arc<dyn Worker>, WorkerError> {
        let signature = ConfigSignature::compute(config);

        if let Some(record) = self.adopt(&signature).await {
            return Ok(Arc::new(ContainerWorker {
                record,
                shared: Arc::clone(&self.shared),
            }));
        }

        let port = self.shared.reserve_port().ok_or_else(|| {
            let (first, last) = self.shared.settings.port_range;
            WorkerError::Provisioner(format!("no free host port in {first}-{last}"))
        })?;

        let result = self.provision(signature, port, config).await;
        // Once registered, the registry holds the port
        self.shared.release_port(port);

        let record = result?;
        self.shared
            .claims
            .lock()
            .containers
            .insert(record.container_id.clone());

        Ok(Arc::new(ContainerWorker {
            record,
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// A worker living in a registered container
pub struct ContainerWorker {
    record: RegistryRecord,
    shared: Arc<ContainerShared>,
}

impl ContainerWorker {
    pub fn record(&self) -> &RegistryRecord {
        &self.record
    }
}

#[async_trait]
impl Worker for ContainerWorker {
    fn id(&self) -> &str {
        &self.record.container_id
    }

    async fn start(&self) -> Result<(), WorkerError> {
        let settings = &self.shared.settings;
        let provisioner = &self.shared.provisioner;

        if !provisioner
            .wait_until_ready(&self.record.container_id, settings.ready_timeout)
            .await?
        {
            return Err(WorkerError::Start(format!(
                "container {} not ready after {:?}",
                self.record.container_id, settings.ready_timeout
            )));
        }

        if !provisioner
            .wait_for_endpoint_ready(self.record.host_port, settings.endpoint_timeout)
            .await?
        {
            return Err(WorkerError::Unavailable(format!(
                "endpoint on port {} not reachable after {:?}",
                self.record.host_port, settings.endpoint_timeout
            )));
        }

        Ok(())
    }

    /// Remove the container and its record
    ///
    /// If removal fails the record is kept so a later run can adopt or prune it.
    async fn close(&self) -> Result<(), WorkerError> {
        let container_id = &self.record.container_id;
        let removed = self.shared.provisioner.remove_container(container_id).await;
        self.shared.release_container(container_id);

        removed.map_err(|e| WorkerError::Close(e.to_string()))?;
        self.shared
            .registry
            .remove(container_id)
            .map_err(|e| WorkerError::Close(e.to_string()))?;
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("http://127.0.0.1:{}", self.record.host_port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::registry::{ExecOutput, RegistryError};

    #[derive(Default)]
    struct MockProvisioner {
        running: Mutex<HashMap<String, u16>>,
        created: AtomicUsize,
        not_ready: AtomicBool,
        endpoint_down: AtomicBool,
        fail_remove: AtomicBool,
    }

    impl MockProvisioner {
        fn add_running(&self, id: &str, port: u16) {
            self.running.lock().insert(id.to_string(), port);
        }
    }

    #[async_trait]
    impl ContainerProvisioner for MockProvisioner {
        async fn ensure_image_exists(&self, name: &str, _mode: ImageMode) -> Result<String, WorkerError> {
            Ok(format!("{name}@sha256:test"))
        }

        async fn create_container(
            &self,
            _image: &str,
            host_port: u16,
            _volumes: &[String],
            _env: &BTreeMap<String, String>,
            _extra_args: &[String],
        ) -> Result<String, WorkerError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("container-{n}");
            self.add_running(&id, host_port);
            Ok(id)
        }

        async fn is_running(&self, container_id: &str) -> Result<bool, WorkerError> {
            Ok(self.running.lock().contains_key(container_id))
        }

        async fn exec_in_container(&self, _id: &str, _command: &[String]) -> Result<ExecOutput, WorkerError> {
            Ok(ExecOutput::default())
        }

        async fn remove_container(&self, container_id: &str) -> Result<(), WorkerError> {
            if self.fail_remove.load(Ordering::SeqCst) {
                return Err(WorkerError::Provisioner("daemon unavailable".into()));
            }
            self.running.lock().remove(container_id);
            Ok(())
        }

        async fn wait_until_ready(&self, _id: &str, _timeout: Duration) -> Result<bool, WorkerError> {
            Ok(!self.not_ready.load(Ordering::SeqCst))
        }

        async fn wait_for_endpoint_ready(&self, _port: u16, _timeout: Duration) -> Result<bool, WorkerError> {
            Ok(!self.endpoint_down.load(Ordering::SeqCst))
        }
    }

    fn factory() -> (ContainerWorkerFactory, Arc<MockProvisioner>, Arc<WorkerRegistry>) {
        let provisioner = Arc::new(MockProvisioner::default());
        let registry = Arc::new(WorkerRegistry::in_memory());
        let factory = ContainerWorkerFactory::new(
            provisioner.clone(),
            registry.clone(),
            ContainerSettings::new("browser").with_port_range(9000, 9001),
        );
        (factory, provisioner, registry)
    }

    #[tokio::test]
    async fn test_provisions_and_registers() {
        let (factory, provisioner, registry) = factory();
        let worker = factory.create(&WorkerConfig::default()).await.unwrap();
        worker.start().await.unwrap();

        assert_eq!(worker.id(), "container-1");
        assert_eq!(worker.endpoint().as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(registry.get("container-1").unwrap().signature, WorkerConfig::default().signature());

        worker.close().await.unwrap();
        assert!(registry.is_empty());
        assert!(!provisioner.is_running("container-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_reuses_registered_running_container() {
        let (factory, provisioner, registry) = factory();
        let signature = WorkerConfig::default().signature();
        provisioner.add_running("left-behind", 9001);
        registry
            .insert(RegistryRecord::new("left-behind", 9001, signature))
            .unwrap();

        let worker = factory.create(&WorkerConfig::default()).await.unwrap();
        assert_eq!(worker.id(), "left-behind");
        assert_eq!(provisioner.created.load(Ordering::SeqCst), 0);

        // Claimed containers are not handed out twice
        let second = factory.create(&WorkerConfig::default()).await.unwrap();
        assert_eq!(second.id(), "container-1");
        assert_eq!(second.endpoint().as_deref(), Some("http://127.0.0.1:9000"));
    }

    #[tokio::test]
    async fn test_stale_record_replaced() {
        let (factory, provisioner, registry) = factory();
        registry
            .insert(RegistryRecord::new("dead", 9000, WorkerConfig::default().signature()))
            .unwrap();

        let worker = factory.create(&WorkerConfig::default()).await.unwrap();
        assert_eq!(worker.id(), "container-1");
        assert!(registry.get("dead").is_none());
        assert_eq!(provisioner.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_port_range_exhaustion() {
        let (factory, _, _) = factory();
        let config = WorkerConfig::default();
        let _a = factory.create(&config).await.unwrap();
        let _b = factory.create(&config).await.unwrap();

        let err = match factory.create(&config).await {
            Err(e) => e,
            Ok(_) => panic!("expected port exhaustion"),
        };
        assert!(matches!(err, WorkerError::Provisioner(msg) if msg.contains("9000-9001")));
    }

    #[tokio::test]
    async fn test_not_ready_fails_start() {
        let (factory, provisioner, _) = factory();
        provisioner.not_ready.store(true, Ordering::SeqCst);

        let worker = factory.create(&WorkerConfig::default()).await.unwrap();
        assert!(matches!(worker.start().await, Err(WorkerError::Start(_))));
    }

    #[tokio::test]
    async fn test_failed_removal_keeps_record() {
        let (factory, provisioner, registry) = factory();
        let worker = factory.create(&WorkerConfig::default()).await.unwrap();

        provisioner.fail_remove.store(true, Ordering::SeqCst);
        assert!(matches!(worker.close().await, Err(WorkerError::Close(_))));
        assert_eq!(registry.len(), 1);

        // Unclaimed and still running: adopted again
        let again = factory.create(&WorkerConfig::default()).await.unwrap();
        assert_eq!(again.id(), worker.id());
    }

    #[tokio::test]
    async fn test_prune_stale_skips_claimed_and_running() {
        let (factory, provisioner, registry) = factory();
        let _live = factory.create(&WorkerConfig::default()).await.unwrap();
        registry
            .insert(RegistryRecord::new("gone", 9500, WorkerConfig::default().signature()))
            .unwrap();
        provisioner.add_running("idle", 9501);
        registry
            .insert(RegistryRecord::new("idle", 9501, WorkerConfig::default().signature()))
            .unwrap();

        let pruned = factory.prune_stale().await.unwrap();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].container_id, "gone");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let (factory, provisioner, _) = factory();
        provisioner.endpoint_down.store(true, Ordering::SeqCst);

        let worker = factory.create(&WorkerConfig::default()).await.unwrap();
        let err = worker.start().await.unwrap_err();
        assert!(matches!(err, WorkerError::Unavailable(msg) if msg.contains("9000")));
    }

    #[tokio::test]
    async fn test_prune_stale_reports_registry_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = Arc::new(WorkerRegistry::open(&path).unwrap());
        registry
            .insert(RegistryRecord::new("gone", 9500, WorkerConfig::default().signature()))
            .unwrap();
        std::fs::create_dir(path.with_extension("tmp")).unwrap();

        let factory = ContainerWorkerFactory::new(
            Arc::new(MockProvisioner::default()),
            registry.clone(),
            ContainerSettings::new("browser"),
        );
        let err = factory.prune_stale().await.unwrap_err();
        assert!(matches!(err, FleetError::Registry(RegistryError::Io(_))));
    }
}
