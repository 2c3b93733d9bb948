// Forwarding buffer between the collector and the dispatch loop.
// Drop-on-full: a slow consumer never stalls sampling.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::models::AggregateSnapshot;

pub const DEFAULT_SNAPSHOT_BUFFER: usize = 64;

#[derive(Clone)]
pub struct SnapshotPublisher {
    tx: mpsc::Sender<Arc<AggregateSnapshot>>,
}

pub fn snapshot_channel(
    capacity: usize,
) -> (SnapshotPublisher, mpsc::Receiver<Arc<AggregateSnapshot>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SnapshotPublisher { tx }, rx)
}

impl SnapshotPublisher {
    /// Returns false if the snapshot was dropped.
    pub fn publish(&self, snapshot: Arc<AggregateSnapshot>) -> bool {
        match self.tx.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    sequence = dropped.sequence,
                    "snapshot buffer full; dropping snapshot"
                );
                false
            }
            Err(TrySendError::Closed(dropped)) => {
                tracing::debug!(
                    sequence = dropped.sequence,
                    "snapshot receiver gone; dropping snapshot"
                );
                false
            }
        }
    }
}
