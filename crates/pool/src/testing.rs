//! In-memory workers for tests
//!
//! [`MockWorkerFactory`] hands out [`MockWorker`]s and records every start
//! and close, with switches to make creation or closing fail.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::WorkerError;
use crate::worker::{Worker, WorkerConfig, WorkerFactory};

/// A worker that only tracks its lifecycle
#[derive(Debug)]
pub struct MockWorker {
    id: String,
    started: AtomicBool,
    closed: AtomicBool,
    fail_close: bool,
}

impl MockWorker {
    /// Create a worker
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_close: false,
        }
    }

    /// Whether `start` has been called
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for MockWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), WorkerError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), WorkerError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(WorkerError::Close(format!("{} refused to close", self.id)));
        }
        Ok(())
    }
}

/// Factory producing [`MockWorker`]s
#[derive(Debug, Default)]
pub struct MockWorkerFactory {
    created: AtomicUsize,
    failures_remaining: AtomicUsize,
    failing: AtomicBool,
    fail_close: AtomicBool,
    workers: Mutex<Vec<Arc<MockWorker>>>,
}

impl MockWorkerFactory {
    /// Create a factory whose workers always start and close cleanly
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` creations
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Fail every creation until switched off
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make workers created from now on fail to close
    pub fn set_fail_close(&self, fail_close: bool) {
        self.fail_close.store(fail_close, Ordering::SeqCst);
    }

    /// Number of workers successfully created
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of created workers that have been closed
    pub fn closed_count(&self) -> usize {
        self.workers.lock().iter().filter(|w| w.is_closed()).count()
    }

    /// Every worker created so far, in creation order
    pub fn workers(&self) -> Vec<Arc<MockWorker>> {
        self.workers.lock().clone()
    }
}

#[async_trait]
impl WorkerFactory for MockWorkerFactory {
    async fn create(&self, _config: &WorkerConfig) -> Result<Arc<dyn Worker>, WorkerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WorkerError::Start("mock factory is failing".into()));
        }

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(WorkerError::Start("mock factory injected failure".into()));
        }

        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let mut worker = MockWorker::new(format!("mock-{n}"));
        worker.fail_close = self.fail_close.load(Ordering::SeqCst);

        let worker = Arc::new(worker);
        self.workers.lock().push(Arc::clone(&worker));
        Ok(worker)
    }
}
