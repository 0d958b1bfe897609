//! TOML configuration for the Skerry daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use skerry_coord::ElectionConfig;
use skerry_log::{ControllerConfig, FetcherConfig, SequencerConfig};
use skerry_types::ClusterConfig;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node identity and data directory.
    pub node: NodeSection,
    /// Sequencing and signing parameters.
    pub sequencer: SequencerSection,
    /// Cluster agreement policy and election timing.
    pub cluster: ClusterSection,
    /// Coordination-service client settings.
    pub coord: CoordSection,
    /// Entry database backend.
    pub storage: StorageSection,
    /// Mirror-fetch tuning (used when embedding the fetcher).
    pub fetcher: FetcherSection,
    /// Logging configuration.
    pub log: LogSection,
    /// Telemetry export configuration.
    pub telemetry: TelemetrySection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for persistent data (entry database, signing key).
    pub data_dir: PathBuf,
    /// Log name; the coordination-store root is `/skerry/<name>`.
    pub log_name: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".skerry"))
            .unwrap_or_else(|| PathBuf::from(".skerry"));
        Self {
            data_dir,
            log_name: "default".to_string(),
        }
    }
}

/// `[sequencer]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SequencerSection {
    /// Maximum entries sequenced per iteration.
    pub batch_limit: Option<usize>,
    /// Sleep between iterations, in milliseconds.
    pub signing_interval_ms: Option<u64>,
    /// Maximum merge delay promised by SCTs, in milliseconds.
    pub mmd_ms: Option<u64>,
    /// Refuse to sign beyond this much clock skew, in milliseconds.
    pub max_clock_skew_ms: Option<u64>,
    /// Wall-clock budget per iteration, in milliseconds.
    pub iteration_budget_ms: Option<u64>,
}

/// `[cluster]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Nodes that must hold an entry before it is served.
    pub quorum: Option<u32>,
    /// Maximum age of a served tree head, in milliseconds.
    pub serving_freshness_window_ms: Option<u64>,
    /// Leader lease TTL, in milliseconds.
    pub leader_lease_ms: Option<u64>,
    /// Leader lease refresh cadence, in milliseconds.
    pub leader_refresh_ms: Option<u64>,
    /// Node heartbeat cadence, in milliseconds.
    pub heartbeat_interval_ms: Option<u64>,
    /// Node heartbeat lease TTL, in milliseconds.
    pub node_lease_ttl_ms: Option<u64>,
}

/// `[coord]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CoordSection {
    /// Backend type: `"memory"` (single-node). Multi-node deployments
    /// point this at an external replicated KV service.
    pub backend: String,
    /// Per-operation deadline, in milliseconds.
    pub op_timeout_ms: Option<u64>,
}

impl Default for CoordSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            op_timeout_ms: None,
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Backend type: `"fjall"` (default) or `"memory"`.
    pub backend: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "fjall".to_string(),
        }
    }
}

/// `[fetcher]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FetcherSection {
    /// Concurrent window downloads.
    pub parallelism: Option<usize>,
    /// Entries per window.
    pub window_size: Option<u64>,
    /// Poll cadence when current, in milliseconds.
    pub poll_interval_ms: Option<u64>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[telemetry]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// OTLP collector endpoint; empty disables export.
    pub otlp_endpoint: Option<String>,
    /// OTLP headers in `key=value,key2=value2` form.
    pub otlp_headers: Option<String>,
    /// Service name reported in resource attributes.
    pub service_name: Option<String>,
}

impl CliConfig {
    /// Load config from a TOML file, or defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective sequencer configuration.
    pub fn sequencer_config(&self) -> SequencerConfig {
        let defaults = SequencerConfig::default();
        SequencerConfig {
            batch_limit: self.sequencer.batch_limit.unwrap_or(defaults.batch_limit),
            signing_interval: self
                .sequencer
                .signing_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.signing_interval),
            mmd: self
                .sequencer
                .mmd_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.mmd),
            max_clock_skew_ms: self
                .sequencer
                .max_clock_skew_ms
                .unwrap_or(defaults.max_clock_skew_ms),
            iteration_budget: self
                .sequencer
                .iteration_budget_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.iteration_budget),
        }
    }

    /// Effective election timing.
    pub fn election_config(&self) -> ElectionConfig {
        let defaults = ElectionConfig::default();
        ElectionConfig {
            lease_ttl: self
                .cluster
                .leader_lease_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.lease_ttl),
            refresh_interval: self
                .cluster
                .leader_refresh_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.refresh_interval),
        }
    }

    /// Effective controller timing.
    pub fn controller_config(&self) -> ControllerConfig {
        let defaults = ControllerConfig::default();
        ControllerConfig {
            heartbeat_interval: self
                .cluster
                .heartbeat_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.heartbeat_interval),
            node_lease_ttl: self
                .cluster
                .node_lease_ttl_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.node_lease_ttl),
        }
    }

    /// Effective cluster agreement policy.
    pub fn cluster_config(&self) -> ClusterConfig {
        let defaults = ClusterConfig::default();
        ClusterConfig {
            serving_freshness_window_ms: self
                .cluster
                .serving_freshness_window_ms
                .unwrap_or(defaults.serving_freshness_window_ms),
            quorum: self.cluster.quorum.unwrap_or(defaults.quorum),
        }
    }

    /// Effective fetcher tuning.
    pub fn fetcher_config(&self) -> FetcherConfig {
        let defaults = FetcherConfig::default();
        FetcherConfig {
            parallelism: self.fetcher.parallelism.unwrap_or(defaults.parallelism),
            window_size: self.fetcher.window_size.unwrap_or(defaults.window_size),
            poll_interval: self
                .fetcher
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        }
    }

    /// Per-operation coordination deadline.
    pub fn coord_op_timeout(&self) -> Duration {
        self.coord
            .op_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5))
    }

    /// Coordination-store root for this log.
    pub fn coord_root(&self) -> String {
        format!("/skerry/{}", self.node.log_name)
    }
}
