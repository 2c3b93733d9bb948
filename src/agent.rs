// Pipeline wiring: collector -> dispatch -> hub -> clients, all under one cancellation root.

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::aggregator::Aggregator;
use crate::collector::{Collector, CollectorConfig, snapshot_channel};
use crate::config::AppConfig;
use crate::dispatch::Dispatcher;
use crate::docker_repo::{ContainerRuntime, DockerRepo};
use crate::hub::Hub;
use crate::models::AgentIdentity;
use crate::routes;
use crate::sampler::Sampler;

/// How long in-flight HTTP requests get to finish once shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Connects to the configured Docker endpoint and runs until `shutdown` fires.
pub async fn run(config: AppConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let docker = Arc::new(DockerRepo::connect(&config.docker.endpoint)?);
    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.server.listen_addr))?;
    run_with(config, docker, listener, shutdown).await
}

/// Runs the agent against any runtime on an already bound listener.
///
/// Returns once every task has exited. A server failure cancels `shutdown` so the rest of
/// the pipeline winds down with it.
pub async fn run_with<R: ContainerRuntime>(
    config: AppConfig,
    runtime: Arc<R>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::spawn(&config, runtime, &shutdown);
    let result = serve(listener, pipeline.router(), shutdown.clone()).await;

    shutdown.cancel();
    pipeline.wait().await;
    tracing::info!("agent stopped");
    result
}

/// The running collector -> dispatch -> hub chain and the router that serves it.
pub struct Pipeline {
    app: axum::Router,
    tasks: TaskTracker,
}

impl Pipeline {
    /// Spawns the hub, collector and dispatcher. They run until `shutdown` fires.
    pub fn spawn<R: ContainerRuntime>(
        config: &AppConfig,
        runtime: Arc<R>,
        shutdown: &CancellationToken,
    ) -> Self {
        let identity = AgentIdentity::resolve(config.agent.host_label.as_deref());
        tracing::info!(
            agent_id = %identity.agent_id,
            agent_label = identity.agent_label.as_deref().unwrap_or_default(),
            poll_interval_ms = config.sampling.poll_interval_ms,
            worker_limit = config.sampling.worker_limit,
            "starting agent"
        );

        let (hub, hub_handle) = Hub::new(shutdown);
        let (publisher, snapshots) = snapshot_channel(config.sampling.snapshot_buffer);
        let aggregator = Arc::new(Aggregator::with_publisher(publisher));
        let sampler = Arc::new(Sampler::new(
            runtime,
            config.sampling.worker_limit,
            config.fetch_timeout(),
        ));
        let collector = Collector::new(
            sampler,
            aggregator,
            CollectorConfig {
                discovery_interval: config.discovery_interval(),
                poll_interval: config.poll_interval(),
            },
        );
        let dispatcher = Dispatcher::new(hub_handle.clone(), identity)
            .with_status_interval(config.status_interval());

        let tasks = TaskTracker::new();
        tasks.spawn(hub.run(shutdown.clone()));
        tasks.spawn(collector.run(shutdown.clone()));
        tasks.spawn(dispatcher.run(snapshots, shutdown.clone()));

        Self {
            app: routes::app(hub_handle),
            tasks,
        }
    }

    pub fn router(&self) -> axum::Router {
        self.app.clone()
    }

    /// Waits for every pipeline task to exit. Only returns after `shutdown` has fired.
    pub async fn wait(self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

async fn serve(
    listener: TcpListener,
    app: axum::Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("Listening on http://{}", addr);

    let graceful = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
    });

    tokio::select! {
        result = &mut server => return Ok(result??),
        _ = shutdown.cancelled() => {}
    }

    match timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(result) => Ok(result??),
        Err(_) => {
            tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "server did not drain in time; forcing close"
            );
            server.abort();
            Ok(())
        }
    }
}
