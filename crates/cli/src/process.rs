// Local process workers
//
// Runs one browser process per worker with tokio::process. The worker config
// is translated into Chromium-style command-line flags; each process gets its
// own remote debugging port, returned for reuse when the worker is dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crawlfleet_pool::{Worker, WorkerConfig, WorkerError, WorkerFactory};
use parking_lot::Mutex;
use tokio::process::{Child, Command};

const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Debugging ports from `first` upwards, lowest free one handed out first
struct PortPool {
    first: u16,
    in_use: Mutex<BTreeSet<u16>>,
}

impl PortPool {
    fn new(first: u16) -> Arc<Self> {
        Arc::new(Self {
            first,
            in_use: Mutex::new(BTreeSet::new()),
        })
    }

    fn claim(self: &Arc<Self>) -> Option<PortClaim> {
        let mut in_use = self.in_use.lock();
        let port = (self.first..=u16::MAX).find(|port| !in_use.contains(port))?;
        in_use.insert(port);
        Some(PortClaim {
            port,
            pool: Arc::clone(self),
        })
    }
}

/// A reserved port, released on drop
struct PortClaim {
    port: u16,
    pool: Arc<PortPool>,
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        self.pool.in_use.lock().remove(&self.port);
    }
}

/// Spawns a local browser process for each worker
pub struct ProcessWorkerFactory {
    command: String,
    ports: Arc<PortPool>,
    created: AtomicUsize,
}

impl ProcessWorkerFactory {
    pub fn new(command: impl Into<String>, first_port: u16) -> Self {
        Self {
            command: command.into(),
            ports: PortPool::new(first_port),
            created: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WorkerFactory for ProcessWorkerFactory {
    async fn create(&self, config: &WorkerConfig) -> Result<Arc<dyn Worker>, WorkerError> {
        let claim = self.ports.claim().ok_or_else(|| {
            WorkerError::Start(format!(
                "no free debugging port in {}-{}",
                self.ports.first,
                u16::MAX
            ))
        })?;
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(Arc::new(ProcessWorker {
            id: format!("process-{n}"),
            command: self.command.clone(),
            args: browser_args(config, claim.port),
            env: config.env.clone(),
            port: claim,
            child: Mutex::new(None),
        }))
    }
}

/// Flags passed to the browser for a given config
pub fn browser_args(config: &WorkerConfig, port: u16) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={port}"),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }
    if let Some(proxy) = &config.proxy {
        args.push(format!("--proxy-server={proxy}"));
    }
    args.extend(config.extra_args.iter().cloned());
    args
}

pub struct ProcessWorker {
    id: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    port: PortClaim,
    child: Mutex<Option<Child>>,
}

impl ProcessWorker {
    fn take_child(&self) -> Option<Child> {
        self.child.lock().take()
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), WorkerError> {
        let child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Start(format!("{}: {}", self.command, e)))?;

        tracing::debug!(worker_id = %self.id, pid = ?child.id(), port = self.port.port, "Spawned browser process");

        *self.child.lock() = Some(child);
        Ok(())
    }

    async fn close(&self) -> Result<(), WorkerError> {
        let Some(mut child) = self.take_child() else {
            return Ok(());
        };

        if let Err(e) = child.start_kill() {
            // Already exited
            tracing::debug!(worker_id = %self.id, error = %e, "Kill skipped");
            return Ok(());
        }

        match tokio::time::timeout(KILL_TIMEOUT, child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(WorkerError::Close(e.to_string())),
            Err(_) => Err(WorkerError::Close(format!(
                "{} did not exit within {:?}",
                self.id, KILL_TIMEOUT
            ))),
        }
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("http://127.0.0.1:{}", self.port.port))
    }

    fn is_alive(&self) -> bool {
        match self.child.lock().as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_args_from_config() {
        let config = WorkerConfig::default()
            .with_user_agent("crawler/1.0")
            .with_proxy("http://proxy:3128")
            .with_viewport(1280, 720)
            .with_arg("--disable-gpu");

        let args = browser_args(&config, 9222);
        assert_eq!(
            args,
            vec![
                "--remote-debugging-port=9222",
                "--window-size=1280,720",
                "--headless=new",
                "--user-agent=crawler/1.0",
                "--proxy-server=http://proxy:3128",
                "--disable-gpu",
            ]
        );
    }

    #[test]
    fn test_headful_omits_flag() {
        let args = browser_args(&WorkerConfig::default().with_headless(false), 9222);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_start() {
        let factory = ProcessWorkerFactory::new("/nonexistent/crawlfleet-browser", 9400);
        let worker = factory.create(&WorkerConfig::default()).await.unwrap();

        assert!(matches!(worker.start().await, Err(WorkerError::Start(_))));
        assert!(!worker.is_alive());
        assert!(worker.close().await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_lifecycle() {
        let worker = ProcessWorker {
            id: "process-sleep".to_string(),
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            env: BTreeMap::new(),
            port: PortPool::new(9500).claim().unwrap(),
            child: Mutex::new(None),
        };

        worker.start().await.unwrap();
        assert!(worker.is_alive());
        assert_eq!(worker.endpoint().as_deref(), Some("http://127.0.0.1:9500"));

        worker.close().await.unwrap();
        assert!(!worker.is_alive());
    }

    #[tokio::test]
    async fn test_ports_recycled_after_drop() {
        let factory = ProcessWorkerFactory::new("/nonexistent/crawlfleet-browser", 9400);
        let first = factory.create(&WorkerConfig::default()).await.unwrap();
        let second = factory.create(&WorkerConfig::default()).await.unwrap();
        assert_eq!(first.endpoint().as_deref(), Some("http://127.0.0.1:9400"));
        assert_eq!(second.endpoint().as_deref(), Some("http://127.0.0.1:9401"));

        drop(first);
        let third = factory.create(&WorkerConfig::default()).await.unwrap();
        assert_eq!(third.endpoint().as_deref(), Some("http://127.0.0.1:9400"));
    }

    #[tokio::test]
    async fn test_port_space_exhaustion_fails_start() {
        let factory = ProcessWorkerFactory::new("/nonexistent/crawlfleet-browser", u16::MAX - 1);
        let _a = factory.create(&WorkerConfig::default()).await.unwrap();
        let _b = factory.create(&WorkerConfig::default()).await.unwrap();

        let err = match factory.create(&WorkerConfig::default()).await {
            Err(e) => e,
            Ok(_) => panic!("expected port exhaustion"),
        };
        assert!(matches!(err, WorkerError::Start(msg) if msg.contains("no free debugging port")));
    }
}
