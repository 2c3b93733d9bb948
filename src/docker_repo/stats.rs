// Convert a raw Docker stats response into a ContainerSample.

use bollard::models::ContainerStatsResponse;

use super::RunningContainer;
use crate::models::{ContainerSample, clamp_pct};

const UNKNOWN_NAME: &str = "unknown";

/// Cumulative CPU counters from the current and previous engine readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    pub total_usage: u64,
    pub prev_total_usage: u64,
    pub system_usage: u64,
    pub prev_system_usage: u64,
    /// Never zero: falls back to the per-core entry count, then to 1.
    pub online_cpus: u32,
}

impl CpuCounters {
    pub fn from_stats(s: &ContainerStatsResponse) -> Self {
        let cpu = s.cpu_stats.as_ref();
        let precpu = s.precpu_stats.as_ref();
        let usage = cpu.and_then(|c| c.cpu_usage.as_ref());

        let reported_online = cpu.and_then(|c| c.online_cpus).unwrap_or(0);
        let per_core = usage
            .and_then(|u| u.percpu_usage.as_ref())
            .map_or(0, |p| p.len());
        let online_cpus = if reported_online > 0 {
            reported_online
        } else if per_core > 0 {
            u32::try_from(per_core).unwrap_or(u32::MAX)
        } else {
            1
        };

        Self {
            total_usage: usage.and_then(|u| u.total_usage).unwrap_or(0),
            prev_total_usage: precpu
                .and_then(|c| c.cpu_usage.as_ref())
                .and_then(|u| u.total_usage)
                .unwrap_or(0),
            system_usage: cpu.and_then(|c| c.system_cpu_usage).unwrap_or(0),
            prev_system_usage: precpu.and_then(|c| c.system_cpu_usage).unwrap_or(0),
            online_cpus,
        }
    }

    /// CPU share in `[0, 100]`. Zero when either counter did not advance.
    pub fn percent(&self) -> f64 {
        if self.total_usage <= self.prev_total_usage || self.system_usage <= self.prev_system_usage
        {
            return 0.0;
        }
        let cpu_delta = (self.total_usage - self.prev_total_usage) as f64;
        let system_delta = (self.system_usage - self.prev_system_usage) as f64;
        let online = f64::from(self.online_cpus.max(1));
        clamp_pct(cpu_delta / system_delta * online * 100.0)
    }
}

/// Received + transmitted bytes over every interface.
pub fn network_io_bytes(s: &ContainerStatsResponse) -> u64 {
    s.networks.as_ref().map_or(0, |networks| {
        networks.values().fold(0u64, |acc, n| {
            acc.saturating_add(n.rx_bytes.unwrap_or(0))
                .saturating_add(n.tx_bytes.unwrap_or(0))
        })
    })
}

/// First non-empty engine name with the leading `/` stripped, or `"unknown"`.
pub fn first_name(names: &[String]) -> String {
    names
        .iter()
        .find(|n| !n.is_empty())
        .map(|n| n.strip_prefix('/').unwrap_or(n).to_string())
        .unwrap_or_else(|| UNKNOWN_NAME.to_string())
}

pub fn convert_stats(container: &RunningContainer, s: &ContainerStatsResponse) -> ContainerSample {
    let memory = s.memory_stats.as_ref();
    let mem_bytes = memory.and_then(|m| m.usage).unwrap_or(0);
    // A zero limit is reported as 1 so consumers can always divide by it.
    let mem_limit_bytes = memory.and_then(|m| m.limit).unwrap_or(0).max(1);

    ContainerSample {
        id: container.id.clone(),
        name: container.name.clone(),
        cpu_pct: CpuCounters::from_stats(s).percent(),
        mem_bytes,
        mem_limit_bytes,
        net_io_bytes: network_io_bytes(s),
    }
}
