//! Admission control for backend calls.
//! Tasks under the limit run immediately; the rest queue in arrival order
//! and are admitted as running tasks complete. Queued tasks are never
//! cancelled individually; closing the gate (engine teardown) drops them.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

/// Default maximum simultaneous backend calls.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

pub struct RequestGate {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl RequestGate {
    pub fn new(max_concurrent: usize) -> Self {
        let limit = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of tasks that could start right now without queueing.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` once a slot frees up. Returns `None` only if the gate was
    /// closed while waiting.
    pub async fn run<T>(&self, task: impl Future<Output = T>) -> Option<T> {
        let permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!("request gate closed, dropping queued task");
                return None;
            }
        };
        let result = task.await;
        drop(permit);
        Some(result)
    }

    /// Close the gate: queued-but-not-started tasks resolve to `None`.
    pub fn close(&self) {
        self.permits.close();
    }
}
