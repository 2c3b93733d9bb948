// JSON messages pushed to dashboard clients, discriminated by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AggregateMetrics, AggregateSnapshot, ContainerSample};

const UNKNOWN_HOST: &str = "unknown-host";

/// Who this agent is, as reported in every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub agent_label: Option<String>,
}

impl AgentIdentity {
    /// Hostname is the id; the label defaults to the hostname when none is configured.
    pub fn resolve(host_label: Option<&str>) -> Self {
        let hostname = sysinfo::System::host_name()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| UNKNOWN_HOST.to_string());
        Self::new(hostname, host_label)
    }

    pub fn new(agent_id: impl Into<String>, host_label: Option<&str>) -> Self {
        let agent_id = agent_id.into();
        let agent_label = host_label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| agent_id.clone());
        Self {
            agent_id,
            agent_label: Some(agent_label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    ContainerStatsBatch(ContainerStatsBatch),
    AgentStatus(AgentStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatsBatch {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_label: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub sequence: u64,
    pub containers: Vec<ContainerSample>,
    pub agent_metrics: AggregateMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_label: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub uptime_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

impl WireMessage {
    pub fn stats_batch(identity: &AgentIdentity, snapshot: &AggregateSnapshot) -> Self {
        WireMessage::ContainerStatsBatch(ContainerStatsBatch {
            agent_id: identity.agent_id.clone(),
            agent_label: identity.agent_label.clone(),
            sent_at: snapshot.sent_at,
            sequence: snapshot.sequence,
            containers: snapshot.samples.clone(),
            agent_metrics: snapshot.aggregate,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::ContainerStatsBatch(_) => "container_stats_batch",
            WireMessage::AgentStatus(_) => "agent_status",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
