use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::collector::DEFAULT_SNAPSHOT_BUFFER;
use crate::dispatch::STATUS_INTERVAL;
use crate::sampler::DEFAULT_FETCH_TIMEOUT;

const SUPPORTED_SCHEMES: &[&str] = &["unix://", "tcp://", "http://"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "warning", "error"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub docker: DockerConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub sampling: SamplingConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub endpoint: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: "unix:///var/run/docker.sock".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Human readable label; the hostname is used when unset.
    pub host_label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Per-container sampling cadence.
    pub poll_interval_ms: u64,
    /// How often the running container list is reconciled against the watchers.
    pub discovery_interval_ms: u64,
    /// Upper bound on a single stats fetch or container listing.
    pub fetch_timeout_ms: u64,
    /// Max concurrent stats fetches against the engine.
    pub worker_limit: usize,
    /// Snapshots buffered between the collector and the dispatch loop (newest dropped when full).
    pub snapshot_buffer: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            discovery_interval_ms: 2000,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT.as_millis() as u64,
            worker_limit: 16,
            snapshot_buffer: DEFAULT_SNAPSHOT_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Cadence of the `agent_status` heartbeat.
    pub status_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: STATUS_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level; `RUST_LOG` takes precedence when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Command-line flags. Each falls back to its `AGENT_*` environment variable and overrides
/// the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "stats-agent", version, about = "Streams live Docker container stats over WebSockets")]
pub struct Cli {
    /// TOML config file
    #[arg(long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,
    /// Docker engine endpoint (unix socket or TCP URL)
    #[arg(long, env = "AGENT_DOCKER_ENDPOINT")]
    pub docker_endpoint: Option<String>,
    /// HTTP listen address for the WebSocket server
    #[arg(long, env = "AGENT_LISTEN_ADDR")]
    pub listen: Option<String>,
    /// Human readable label for this agent
    #[arg(long, env = "AGENT_HOST_LABEL")]
    pub host_label: Option<String>,
    /// Interval for sampling container stats, in milliseconds
    #[arg(long, env = "AGENT_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,
    /// Interval for re-listing running containers, in milliseconds
    #[arg(long, env = "AGENT_DISCOVERY_INTERVAL_MS")]
    pub discovery_interval_ms: Option<u64>,
    /// Per-container stats fetch timeout, in milliseconds
    #[arg(long, env = "AGENT_FETCH_TIMEOUT_MS")]
    pub fetch_timeout_ms: Option<u64>,
    /// Maximum number of concurrent stats fetches
    #[arg(long, env = "AGENT_MAX_WORKERS")]
    pub max_workers: Option<usize>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "AGENT_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Defaults, then the config file (if any), then flags / environment. Validated.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => {
                let s = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("reading config file {}: {}", path.display(), e)
                })?;
                toml::from_str(&s)?
            }
            None => AppConfig::default(),
        };
        config.apply_cli(cli);
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let mut config: AppConfig = toml::from_str(s)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(v) = &cli.docker_endpoint {
            self.docker.endpoint = v.trim().to_string();
        }
        if let Some(v) = &cli.listen {
            self.server.listen_addr = v.trim().to_string();
        }
        if let Some(v) = &cli.host_label {
            self.agent.host_label = Some(v.trim().to_string()).filter(|l| !l.is_empty());
        }
        if let Some(v) = cli.poll_interval_ms {
            self.sampling.poll_interval_ms = v;
        }
        if let Some(v) = cli.discovery_interval_ms {
            self.sampling.discovery_interval_ms = v;
        }
        if let Some(v) = cli.fetch_timeout_ms {
            self.sampling.fetch_timeout_ms = v;
        }
        if let Some(v) = cli.max_workers {
            self.sampling.worker_limit = v;
        }
        if let Some(v) = &cli.log_level {
            self.logging.level = v.trim().to_lowercase();
        }
    }

    /// Trims string values, lowercases the log level and clears a blank host label, so file
    /// values are read the same way as flags.
    pub fn normalize(&mut self) {
        self.docker.endpoint = self.docker.endpoint.trim().to_string();
        self.server.listen_addr = self.server.listen_addr.trim().to_string();
        self.agent.host_label = self
            .agent
            .host_label
            .take()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        self.logging.level = self.logging.level.trim().to_lowercase();
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.docker.endpoint.is_empty(),
            "docker.endpoint must be non-empty"
        );
        anyhow::ensure!(
            SUPPORTED_SCHEMES
                .iter()
                .any(|s| self.docker.endpoint.starts_with(s)),
            "docker.endpoint must start with one of {:?}, got {:?}",
            SUPPORTED_SCHEMES,
            self.docker.endpoint
        );
        anyhow::ensure!(
            !self.server.listen_addr.is_empty(),
            "server.listen_addr must be non-empty"
        );
        anyhow::ensure!(
            self.sampling.poll_interval_ms > 0,
            "sampling.poll_interval_ms must be > 0, got {}",
            self.sampling.poll_interval_ms
        );
        anyhow::ensure!(
            self.sampling.discovery_interval_ms > 0,
            "sampling.discovery_interval_ms must be > 0, got {}",
            self.sampling.discovery_interval_ms
        );
        anyhow::ensure!(
            self.sampling.fetch_timeout_ms > 0,
            "sampling.fetch_timeout_ms must be > 0, got {}",
            self.sampling.fetch_timeout_ms
        );
        anyhow::ensure!(
            self.sampling.worker_limit > 0,
            "sampling.worker_limit must be > 0, got {}",
            self.sampling.worker_limit
        );
        anyhow::ensure!(
            self.sampling.snapshot_buffer > 0,
            "sampling.snapshot_buffer must be > 0, got {}",
            self.sampling.snapshot_buffer
        );
        anyhow::ensure!(
            self.dispatch.status_interval_ms > 0,
            "dispatch.status_interval_ms must be > 0, got {}",
            self.dispatch.status_interval_ms
        );
        anyhow::ensure!(
            LOG_LEVELS.contains(&self.logging.level.as_str()),
            "logging.level must be one of {:?}, got {:?}",
            LOG_LEVELS,
            self.logging.level
        );
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sampling.poll_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.sampling.discovery_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.sampling.fetch_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch.status_interval_ms)
    }

    /// Filter directive for the tracing subscriber (`warning` is accepted as `warn`).
    pub fn log_filter(&self) -> &str {
        match self.logging.level.as_str() {
            "warning" => "warn",
            level => level,
        }
    }
}
