// Bounded stats fetches: a global admission semaphore plus a per-call timeout.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{Duration, timeout};

use crate::docker_repo::{ContainerRuntime, RunningContainer, RuntimeError, stats};
use crate::models::ContainerSample;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("stats fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("admission semaphore closed")]
    Closed,
}

/// Shared by every watcher. At most `worker_limit` fetches are in flight at once.
pub struct Sampler<R> {
    runtime: Arc<R>,
    permits: Semaphore,
    worker_limit: usize,
    fetch_timeout: Duration,
}

impl<R: ContainerRuntime> Sampler<R> {
    pub fn new(runtime: Arc<R>, worker_limit: usize, fetch_timeout: Duration) -> Self {
        let worker_limit = worker_limit.max(1);
        Self {
            runtime,
            permits: Semaphore::new(worker_limit),
            worker_limit,
            fetch_timeout,
        }
    }

    /// Fetches and normalizes one container's stats. The timeout starts once a permit is
    /// held, so waiting for admission never eats into the engine call's budget.
    pub async fn fetch(&self, container: &RunningContainer) -> Result<ContainerSample, SampleError> {
        let _permit = self.permits.acquire().await.map_err(|_| SampleError::Closed)?;
        let raw = timeout(self.fetch_timeout, self.runtime.container_stats(&container.id))
            .await
            .map_err(|_| SampleError::Timeout(self.fetch_timeout))??;
        Ok(stats::convert_stats(container, &raw))
    }

    /// Fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.worker_limit - self.permits.available_permits()
    }

    pub fn worker_limit(&self) -> usize {
        self.worker_limit
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }
}
