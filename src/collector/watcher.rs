// One sampling loop per container, owned by the collector's watcher set.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::aggregator::Aggregator;
use crate::docker_repo::{ContainerRuntime, RunningContainer};
use crate::sampler::Sampler;

/// Handle to a running watcher. Dropping it does not stop the task; call [`Watcher::stop`].
pub(super) struct Watcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub(super) struct WatcherDeps<R> {
    pub sampler: Arc<Sampler<R>>,
    pub aggregator: Arc<Aggregator>,
    pub cadence: Duration,
}

impl Watcher {
    /// Starts sampling `container` under a fresh child of `parent`.
    pub(super) fn spawn<R: ContainerRuntime>(
        container: RunningContainer,
        deps: WatcherDeps<R>,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let span = tracing::debug_span!(
            "watcher",
            container_id = %container.id,
            name = %container.name
        );
        let handle = tokio::spawn(run(container, deps, token.clone()).instrument(span));
        Self { token, handle }
    }

    /// Cancels the sampling loop. The loop drops any sample still in flight.
    pub(super) fn cancel(&self) {
        self.token.cancel();
    }

    pub(super) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await
            && e.is_panic()
        {
            tracing::warn!(error = %e, "watcher task panicked");
        }
    }

    pub(super) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run<R: ContainerRuntime>(
    container: RunningContainer,
    deps: WatcherDeps<R>,
    token: CancellationToken,
) {
    let WatcherDeps {
        sampler,
        aggregator,
        cadence,
    } = deps;

    tracing::debug!("watcher started");

    let mut tick = interval(cadence);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tick.tick() => {
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    r = sampler.fetch(&container) => r,
                };
                match result {
                    Ok(sample) => {
                        // Publishes under the aggregator lock; a cancelled watcher's sample is dropped.
                        aggregator.upsert_live(sample, &token);
                    }
                    Err(e) => {
                        tracing::debug!(
                            error = %e,
                            operation = "fetch_stats",
                            "stats fetch failed; skipping tick"
                        );
                    }
                }
            }
        }
    }

    tracing::debug!("watcher stopped");
}
