// Shared test helpers: an in-memory container runtime and sample builders

#![allow(dead_code)]

use bollard::models::{
    ContainerCpuStats, ContainerCpuUsage, ContainerMemoryStats, ContainerNetworkStats,
    ContainerStatsResponse,
};
use stats_agent::docker_repo::{ContainerRuntime, RunningContainer, RuntimeError};
use stats_agent::models::ContainerSample;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const MIB: u64 = 1024 * 1024;

pub fn container(id: &str) -> RunningContainer {
    RunningContainer {
        id: id.to_string(),
        name: format!("{id}-name"),
    }
}

pub fn sample(id: &str, cpu_pct: f64, mem_bytes: u64) -> ContainerSample {
    ContainerSample {
        id: id.to_string(),
        name: id.to_string(),
        cpu_pct,
        mem_bytes,
        mem_limit_bytes: 1024 * MIB,
        net_io_bytes: 0,
    }
}

/// Raw engine stats: 10% CPU on one core, `mem_bytes` of memory, 300 bytes of network I/O.
pub fn stats_response(mem_bytes: u64) -> ContainerStatsResponse {
    let cpu = |total, system| ContainerCpuStats {
        cpu_usage: Some(ContainerCpuUsage {
            total_usage: Some(total),
            ..Default::default()
        }),
        system_cpu_usage: Some(system),
        online_cpus: Some(1),
        throttling_data: None,
    };
    ContainerStatsResponse {
        cpu_stats: Some(cpu(200, 2000)),
        precpu_stats: Some(cpu(100, 1000)),
        memory_stats: Some(ContainerMemoryStats {
            usage: Some(mem_bytes),
            limit: Some(512 * MIB),
            ..Default::default()
        }),
        networks: Some(HashMap::from([(
            "eth0".to_string(),
            ContainerNetworkStats {
                rx_bytes: Some(100),
                tx_bytes: Some(200),
                ..Default::default()
            },
        )])),
        ..Default::default()
    }
}

/// In-memory runtime. Every fetch returns [`stats_response`] with 64 MiB of memory unless the
/// container is stalled, in which case the fetch never completes.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<Vec<RunningContainer>>,
    stalled: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    fetch_delay: Mutex<Duration>,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRuntime {
    pub fn with_containers(ids: &[&str]) -> Self {
        let runtime = Self::default();
        runtime.set_containers(ids);
        runtime
    }

    pub fn set_containers(&self, ids: &[&str]) {
        *self.containers.lock().unwrap() = ids.iter().map(|id| container(id)).collect();
    }

    pub fn stall(&self, id: &str) {
        self.stalled.lock().unwrap().insert(id.to_string());
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ContainerRuntime for FakeRuntime {
    async fn list_running(&self) -> Result<Vec<RunningContainer>, RuntimeError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(RuntimeError::Docker(
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 500,
                    message: "engine unavailable".into(),
                },
            ));
        }
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStatsResponse, RuntimeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let stalled = self.stalled.lock().unwrap().contains(id);
        if stalled {
            std::future::pending::<()>().await;
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(stats_response(64 * MIB))
    }
}

/// Polls `cond` every 10ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
