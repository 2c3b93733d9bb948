// Domain models: per-container samples, aggregate snapshots and the wire format

mod container;
mod snapshot;
mod wire;

pub use container::{ContainerSample, clamp_pct};
pub use snapshot::{AggregateMetrics, AggregateSnapshot};
pub use wire::{AgentIdentity, AgentStatus, ContainerStatsBatch, WireMessage};
