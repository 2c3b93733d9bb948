// Docker container discovery and one-shot stats via bollard

pub mod stats;

use bollard::query_parameters::{ListContainersOptions, StatsOptions};
use bollard::models::ContainerStatsResponse;
use bollard::{API_DEFAULT_VERSION, Docker};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::future::Future;

/// Timeout applied by bollard itself to every request; the sampler enforces a tighter one.
const DOCKER_CLIENT_TIMEOUT_SECS: u64 = 120;

/// A container reported as running by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("docker api: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("stats stream for container {0} ended without a report")]
    EmptyStats(String),
}

/// The container engine as seen by the collector: discovery plus raw stats.
pub trait ContainerRuntime: Send + Sync + 'static {
    fn list_running(
        &self,
    ) -> impl Future<Output = Result<Vec<RunningContainer>, RuntimeError>> + Send;

    fn container_stats(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<ContainerStatsResponse, RuntimeError>> + Send;
}

pub struct DockerRepo {
    docker: Docker,
}

impl DockerRepo {
    /// Connects to `unix://`, `tcp://` or `http://` endpoints.
    pub fn connect(endpoint: &str) -> anyhow::Result<Self> {
        let docker = if endpoint.starts_with("unix://") {
            Docker::connect_with_unix(endpoint, DOCKER_CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
        } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, DOCKER_CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
        } else {
            anyhow::bail!("unsupported docker endpoint {endpoint:?}");
        };
        tracing::debug!(endpoint, "docker client configured");
        Ok(Self { docker })
    }
}

impl ContainerRuntime for DockerRepo {
    async fn list_running(&self) -> Result<Vec<RunningContainer>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["running".to_string()]);

        let options = ListContainersOptions {
            all: false,
            filters: Some(filters),
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id.filter(|id| !id.is_empty())?;
                let name = stats::first_name(c.names.as_deref().unwrap_or_default());
                Some(RunningContainer { id, name })
            })
            .collect())
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStatsResponse, RuntimeError> {
        // Non-streaming but not one-shot: the engine waits for a second reading so that
        // precpu_stats is populated and the CPU delta is meaningful.
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = self.docker.stats(id, Some(options));
        match stream.next().await {
            Some(Ok(s)) => Ok(s),
            Some(Err(e)) => Err(e.into()),
            None => Err(RuntimeError::EmptyStats(id.to_string())),
        }
    }
}
