// Versioned, immutable view over every current container sample.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ContainerSample, clamp_pct};

/// Host-wide totals derived from a snapshot's own samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub cpu_pct: f64,
    pub mem_bytes: u64,
}

impl AggregateMetrics {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a ContainerSample>) -> Self {
        let (cpu, mem) = samples.into_iter().fold((0.0_f64, 0u64), |(cpu, mem), s| {
            (cpu + s.cpu_pct, mem.saturating_add(s.mem_bytes))
        });
        Self {
            cpu_pct: clamp_pct(cpu),
            mem_bytes: mem,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSnapshot {
    pub sequence: u64,
    pub sent_at: DateTime<Utc>,
    /// One entry per container id, ordered by id.
    pub samples: Vec<ContainerSample>,
    pub aggregate: AggregateMetrics,
}

impl AggregateSnapshot {
    /// Builds a snapshot whose aggregate is computed from `samples` alone.
    pub fn new(sequence: u64, sent_at: DateTime<Utc>, mut samples: Vec<ContainerSample>) -> Self {
        samples.sort_by(|a, b| a.id.cmp(&b.id));
        let aggregate = AggregateMetrics::from_samples(&samples);
        Self {
            sequence,
            sent_at,
            samples,
            aggregate,
        }
    }

    pub fn sample(&self, id: &str) -> Option<&ContainerSample> {
        self.samples
            .binary_search_by(|s| s.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.samples[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sample(id).is_some()
    }
}
