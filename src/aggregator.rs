// Authoritative container -> latest sample map with a monotonic snapshot sequence.
//
// Every mutation bumps the sequence, recomputes the aggregate, replaces the latest
// snapshot and hands it to the publisher under a single lock. Readers never pair a
// sequence with a stale aggregate, and the dispatch side receives sequences in order.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::collector::SnapshotPublisher;
use crate::models::{AggregateSnapshot, ContainerSample};

#[derive(Default)]
struct State {
    samples: HashMap<String, ContainerSample>,
    sequence: u64,
    latest: Option<Arc<AggregateSnapshot>>,
}

impl State {
    fn next_snapshot(&mut self) -> Arc<AggregateSnapshot> {
        self.sequence += 1;
        let snapshot = Arc::new(AggregateSnapshot::new(
            self.sequence,
            Utc::now(),
            self.samples.values().cloned().collect(),
        ));
        self.latest = Some(snapshot.clone());
        snapshot
    }
}

#[derive(Default)]
pub struct Aggregator {
    state: Mutex<State>,
    publisher: Option<SnapshotPublisher>,
}

impl Aggregator {
    /// An aggregator that publishes nowhere; snapshots are only returned to the caller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every snapshot is sent to `publisher` before the lock is released.
    pub fn with_publisher(publisher: SnapshotPublisher) -> Self {
        Self {
            state: Mutex::default(),
            publisher: Some(publisher),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State is replaced wholesale on every publish; a panic mid-update leaves it usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Must be called with the state lock held. `try_send` never blocks.
    fn commit(&self, state: &mut State) -> Arc<AggregateSnapshot> {
        let snapshot = state.next_snapshot();
        self.send(&snapshot);
        snapshot
    }

    fn send(&self, snapshot: &Arc<AggregateSnapshot>) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(snapshot.clone());
        }
    }

    /// Replaces the sample for `sample.id` and publishes a new snapshot.
    pub fn upsert(&self, sample: ContainerSample) -> Arc<AggregateSnapshot> {
        let mut state = self.lock();
        state.samples.insert(sample.id.clone(), sample);
        self.commit(&mut state)
    }

    /// Like [`upsert`](Self::upsert), but drops the sample if `watcher` has been cancelled.
    ///
    /// Reconciliation cancels a watcher before calling [`remove_missing`](Self::remove_missing);
    /// checking the token under the same lock keeps a late fetch from resurrecting a
    /// removed container.
    pub fn upsert_live(
        &self,
        sample: ContainerSample,
        watcher: &CancellationToken,
    ) -> Option<Arc<AggregateSnapshot>> {
        let mut state = self.lock();
        if watcher.is_cancelled() {
            return None;
        }
        state.samples.insert(sample.id.clone(), sample);
        Some(self.commit(&mut state))
    }

    /// Drops every sample whose id is not in `active`. Publishes only if something was removed.
    pub fn remove_missing(&self, active: &HashSet<String>) -> Option<Arc<AggregateSnapshot>> {
        let mut state = self.lock();
        let before = state.samples.len();
        state.samples.retain(|id, _| active.contains(id));
        if state.samples.len() == before {
            return None;
        }
        Some(self.commit(&mut state))
    }

    /// Sends the latest snapshot again, stamped with the current time. The stored snapshot
    /// keeps its original `sent_at`; the sequence is not bumped.
    pub fn republish_latest(&self) -> Option<Arc<AggregateSnapshot>> {
        let state = self.lock();
        let mut cached = state.latest.as_deref().cloned()?;
        cached.sent_at = Utc::now();
        let cached = Arc::new(cached);
        self.send(&cached);
        Some(cached)
    }

    /// An owned copy of the most recent snapshot.
    pub fn latest_snapshot(&self) -> Option<AggregateSnapshot> {
        self.lock().latest.as_deref().cloned()
    }

    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
