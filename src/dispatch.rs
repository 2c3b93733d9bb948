// Snapshot -> wire message -> hub, plus the periodic agent status heartbeat.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::hub::{HubClosed, HubHandle, Payload};
use crate::models::{AgentIdentity, AgentStatus, AggregateSnapshot, WireMessage};
use crate::version::{FEATURES, VERSION};

pub const STATUS_INTERVAL: Duration = Duration::from_secs(30);

pub struct Dispatcher {
    hub: HubHandle,
    identity: AgentIdentity,
    started_at: Instant,
    status_interval: Duration,
}

impl Dispatcher {
    pub fn new(hub: HubHandle, identity: AgentIdentity) -> Self {
        Self {
            hub,
            identity,
            started_at: Instant::now(),
            status_interval: STATUS_INTERVAL,
        }
    }

    pub fn with_status_interval(mut self, status_interval: Duration) -> Self {
        self.status_interval = status_interval;
        self
    }

    /// Sends a status message right away and then every status interval; forwards every
    /// snapshot received. Returns on `shutdown` or once the hub is gone.
    pub async fn run(
        self,
        mut snapshots: mpsc::Receiver<Arc<AggregateSnapshot>>,
        shutdown: CancellationToken,
    ) {
        let mut status_tick = interval(self.status_interval);
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let sent = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(snapshot) = snapshots.recv() => {
                    tracing::debug!(
                        sequence = snapshot.sequence,
                        containers = snapshot.samples.len(),
                        "dispatching stats batch"
                    );
                    self.send(&WireMessage::stats_batch(&self.identity, &snapshot)).await
                }
                _ = status_tick.tick() => {
                    let status = self.status_message();
                    tracing::debug!("dispatching agent status");
                    self.send(&status).await
                }
            };
            if sent.is_err() {
                tracing::debug!("hub closed; dispatch loop exiting");
                break;
            }
        }
        tracing::debug!("Dispatcher shutting down");
    }

    pub fn status_message(&self) -> WireMessage {
        WireMessage::AgentStatus(AgentStatus {
            agent_id: self.identity.agent_id.clone(),
            agent_label: self.identity.agent_label.clone(),
            sent_at: Utc::now(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            version: Some(VERSION.to_string()),
            features: FEATURES.iter().map(|f| f.to_string()).collect(),
        })
    }

    /// Serialization failures drop the message and keep the loop alive.
    async fn send(&self, msg: &WireMessage) -> Result<(), HubClosed> {
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    kind = msg.kind(),
                    operation = "serialize_message",
                    "failed to serialize message; dropping it"
                );
                return Ok(());
            }
        };
        self.hub.broadcast(Payload::from(json)).await
    }
}
