// Container discovery and watcher reconciliation.
//
// The collector task is the only owner of the watcher set: watchers are created and
// cancelled here and nowhere else, so there is at most one watcher per container id.

mod publisher;
mod watcher;

pub use publisher::{DEFAULT_SNAPSHOT_BUFFER, SnapshotPublisher, snapshot_channel};

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::aggregator::Aggregator;
use crate::docker_repo::{ContainerRuntime, RunningContainer};
use crate::sampler::Sampler;
use watcher::{Watcher, WatcherDeps};

pub struct CollectorConfig {
    /// How often the running container list is re-read.
    pub discovery_interval: Duration,
    /// Sampling cadence of each watcher.
    pub poll_interval: Duration,
}

pub struct Collector<R> {
    sampler: Arc<Sampler<R>>,
    aggregator: Arc<Aggregator>,
    config: CollectorConfig,
    watchers: HashMap<String, Watcher>,
    discovered_once: bool,
}

impl<R: ContainerRuntime> Collector<R> {
    pub fn new(
        sampler: Arc<Sampler<R>>,
        aggregator: Arc<Aggregator>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            sampler,
            aggregator,
            config,
            watchers: HashMap::new(),
            discovered_once: false,
        }
    }

    /// Discovers immediately, then on every discovery tick, until `shutdown` fires.
    /// Every watcher has exited by the time this returns.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut tick = interval(self.config.discovery_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!("Collector shutting down");
                    break;
                }
                _ = tick.tick() => self.discover(&shutdown).await,
            }
        }

        self.stop_all().await;
    }

    /// One discovery tick: list running containers and reconcile the watcher set.
    pub async fn discover(&mut self, shutdown: &CancellationToken) {
        let runtime = self.sampler.runtime().clone();
        let limit = self.sampler.fetch_timeout();
        let listing = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            r = timeout(limit, runtime.list_running()) => r,
        };

        match listing {
            Ok(Ok(containers)) => self.reconcile(containers, shutdown).await,
            Ok(Err(e)) => self.discovery_failed(e),
            Err(_) => self.discovery_failed(format!("list timed out after {limit:?}")),
        }
    }

    /// Starts watchers for new containers and retires watchers whose container is gone.
    pub async fn reconcile(&mut self, containers: Vec<RunningContainer>, shutdown: &CancellationToken) {
        let active: HashSet<String> = containers.iter().map(|c| c.id.clone()).collect();

        self.watchers.retain(|id, w| {
            let finished = w.is_finished();
            if finished && !shutdown.is_cancelled() {
                tracing::warn!(container_id = %id, "watcher exited unexpectedly; restarting");
            }
            !finished
        });

        let gone: Vec<String> = self
            .watchers
            .keys()
            .filter(|id| !active.contains(*id))
            .cloned()
            .collect();
        let mut retired = Vec::with_capacity(gone.len());
        for id in gone {
            if let Some(w) = self.watchers.remove(&id) {
                // Cancel before remove_missing so an in-flight fetch cannot re-add the sample.
                w.cancel();
                tracing::debug!(container_id = %id, "container gone; watcher cancelled");
                retired.push(w);
            }
        }

        if !shutdown.is_cancelled() {
            for container in containers {
                if self.watchers.contains_key(&container.id) {
                    continue;
                }
                tracing::debug!(container_id = %container.id, name = %container.name, "watching container");
                let id = container.id.clone();
                let watcher = Watcher::spawn(container, self.watcher_deps(), shutdown);
                self.watchers.insert(id, watcher);
            }
        }

        if let Some(snapshot) = self.aggregator.remove_missing(&active) {
            tracing::debug!(
                sequence = snapshot.sequence,
                containers = snapshot.samples.len(),
                "published snapshot after container removal"
            );
        }

        for w in retired {
            w.stop().await;
        }

        if !self.discovered_once {
            self.discovered_once = true;
            tracing::info!(container_count = active.len(), "collector initialised");
        }
    }

    fn discovery_failed(&self, error: impl Display) {
        tracing::warn!(
            error = %error,
            operation = "list_containers",
            "container discovery failed; keeping current watchers"
        );
        if let Some(cached) = self.aggregator.republish_latest() {
            tracing::debug!(sequence = cached.sequence, "re-sent cached snapshot");
        }
    }

    fn watcher_deps(&self) -> WatcherDeps<R> {
        WatcherDeps {
            sampler: self.sampler.clone(),
            aggregator: self.aggregator.clone(),
            cadence: self.config.poll_interval,
        }
    }

    /// Ids of watched containers, sorted.
    pub fn watched_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.watchers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Cancels every watcher and waits for all of them to exit.
    pub async fn stop_all(&mut self) {
        let watchers: Vec<Watcher> = self.watchers.drain().map(|(_, w)| w).collect();
        for w in &watchers {
            w.cancel();
        }
        for w in watchers {
            w.stop().await;
        }
    }
}
