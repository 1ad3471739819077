//! Batch execution of independent percolate requests.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

use percolate_core::error::{Error, Result};
use percolate_core::types::{MultiPercolateItem, MultiPercolateRequest, MultiPercolateResponse, PercolateResponse};

use crate::coordinator::ShardCoordinator;

/// Runs every item of a batch concurrently and returns one entry per item in
/// request order. An item's failure never affects its neighbours; only fatal
/// errors fail the call.
pub struct MultiPercolateCoordinator {
    coordinator: Arc<ShardCoordinator>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl MultiPercolateCoordinator {
    pub fn new(coordinator: Arc<ShardCoordinator>, timeout: Duration, max_concurrent_items: usize) -> Self {
        Self { coordinator, timeout, permits: Arc::new(Semaphore::new(max_concurrent_items.max(1))) }
    }

    pub async fn execute(&self, batch: MultiPercolateRequest) -> Result<MultiPercolateResponse> {
        let started = Instant::now();
        self.coordinator.ensure_available()?;
        let deadline = tokio::time::Instant::now() + self.timeout;
        let items = batch.len();

        let mut tasks = ItemTasks(Vec::with_capacity(items));
        for request in batch.requests {
            let coordinator = Arc::clone(&self.coordinator);
            let permits = Arc::clone(&self.permits);
            tasks.0.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Operation(format!("batch permits closed: {e}")))?;
                coordinator.execute(request).await
            }));
        }

        let mut responses = Vec::with_capacity(items);
        for (slot, handle) in tasks.0.iter_mut().enumerate() {
            let item = match timeout_at(deadline, &mut *handle).await {
                Ok(Ok(Ok(response))) => MultiPercolateItem::Response(response),
                Ok(Ok(Err(e))) if e.is_fatal() => {
                    warn!(slot, error = %e, "fatal error, aborting batch");
                    return Err(e);
                }
                Ok(Ok(Err(e))) => {
                    debug!(slot, error = %e, "batch item failed");
                    MultiPercolateItem::failure(e.to_string())
                }
                Ok(Err(e)) => MultiPercolateItem::failure(format!("percolate task failed: {e}")),
                Err(_) => {
                    handle.abort();
                    MultiPercolateItem::failure(Error::Timeout(self.timeout.as_millis() as u64).to_string())
                }
            };
            responses.push(item);
        }

        let failed = responses.iter().filter(|r| r.is_failure()).count();
        let took = started.elapsed().as_millis() as u64;
        info!(items, failed, took_ms = took, "multi percolate finished");
        Ok(MultiPercolateResponse { took, responses })
    }
}

/// Item tasks of one batch. Whatever is still running when the batch returns
/// early or is dropped gets aborted.
struct ItemTasks(Vec<JoinHandle<Result<PercolateResponse>>>);

impl Drop for ItemTasks {
    fn drop(&mut self) {
        for task in &self.0 { task.abort(); }
    }
}
