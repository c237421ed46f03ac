//! Configuration module for the ALBA demo orchestrator.

use crate::cluster::claims::ClaimPolicy;
use crate::cluster::metadata::MAX_METADATA_NODES;
use crate::error::{OrchestratorError, Result};
use crate::types::{StorageKind, MAX_PROXIES, MAX_STORAGE_DAEMONS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Binary locations and working directories.
    #[serde(default)]
    pub env: EnvironmentConfig,
    /// Readiness polling budgets.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl OrchestratorConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::Config(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.env.asd_path_template.contains("{}") {
            return Err(OrchestratorError::InvalidConfig {
                field: "env.asd_path_template".to_string(),
                reason: "Template must contain a {} placeholder for the daemon index".to_string(),
            });
        }

        if self.polling.leader_attempts == 0 || self.polling.claim_attempts == 0 {
            return Err(OrchestratorError::InvalidConfig {
                field: "polling".to_string(),
                reason: "Attempt budgets must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Configuration rooted in a scratch directory, with short poll budgets.
    pub fn development(root: &Path) -> Self {
        Self {
            env: EnvironmentConfig {
                run_root: root.join("alba"),
                arakoon_root: root.join("arakoon"),
                tls_root: root.join("tls"),
                asd_path_template: root.join("alba/asd/{}").display().to_string(),
                ..EnvironmentConfig::default()
            },
            polling: PollingConfig {
                leader_attempts: 10,
                leader_interval: Duration::from_millis(1),
                claim_attempts: 60,
                claim_interval: Duration::from_millis(1),
            },
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Where the external binaries live and where the run writes its state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Arakoon binary.
    pub arakoon_bin: PathBuf,
    /// ALBA binary.
    pub alba_bin: PathBuf,
    /// Kinetic simulator launcher.
    pub kinetic_bin: PathBuf,
    /// Directory holding the arakoon plugins.
    pub plugin_dir: PathBuf,
    /// Shared run root for proxies, maintenance and daemons.
    pub run_root: PathBuf,
    /// Metadata cluster root.
    pub arakoon_root: PathBuf,
    /// Certificate authority and leaf material.
    pub tls_root: PathBuf,
    /// Daemon directory template; `{}` is replaced by the daemon index.
    pub asd_path_template: String,
    /// Put each daemon on its own loop-mounted filesystem.
    pub osds_on_separate_fs: bool,
    /// Start the first daemon with `--slow`.
    pub slow_asd: bool,
    /// Log level handed to the external binaries.
    pub node_log_level: String,
    /// Host the metadata nodes bind to.
    pub metadata_host: String,
    /// Run port inspection through sudo.
    pub sudo_fuser: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            arakoon_bin: PathBuf::from("arakoon"),
            alba_bin: PathBuf::from("alba"),
            kinetic_bin: PathBuf::from("kinetic-simulator"),
            plugin_dir: PathBuf::from("/usr/lib/alba"),
            run_root: PathBuf::from("/tmp/alba"),
            arakoon_root: PathBuf::from("/tmp/arakoon"),
            tls_root: PathBuf::from("/tmp/alba_tls"),
            asd_path_template: "/tmp/alba/asd/{}".to_string(),
            osds_on_separate_fs: false,
            slow_asd: true,
            node_log_level: "debug".to_string(),
            metadata_host: "127.0.0.1".to_string(),
            sudo_fuser: false,
        }
    }
}

impl EnvironmentConfig {
    /// Directory of the daemon at fleet position `index`.
    pub fn asd_path(&self, index: usize) -> PathBuf {
        PathBuf::from(self.asd_path_template.replace("{}", &index.to_string()))
    }

    /// Generated metadata cluster config.
    pub fn arakoon_config_file(&self) -> PathBuf {
        self.arakoon_root.join("arakoon.ini")
    }

    /// Home directory of one metadata node.
    pub fn arakoon_node_dir(&self, node: &str) -> PathBuf {
        self.arakoon_root.join(node)
    }

    /// Home directory of one proxy.
    pub fn proxy_home(&self, proxy_id: usize) -> PathBuf {
        self.run_root.join("proxies").join(format!("{:02}", proxy_id))
    }

    /// Shared maintenance directory.
    pub fn maintenance_home(&self) -> PathBuf {
        self.run_root.join("maintenance")
    }

    /// File name of a binary, used for kill-by-name patterns.
    pub fn binary_name(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }
}

/// Attempt budgets for the readiness polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Attempts while waiting for a leader.
    pub leader_attempts: u32,
    /// Pause between leader probes.
    #[serde(with = "humantime_serde")]
    pub leader_interval: Duration,
    /// Attempts while converging claims.
    pub claim_attempts: u32,
    /// Pause between claim rounds.
    #[serde(with = "humantime_serde")]
    pub claim_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            leader_attempts: 10,
            leader_interval: Duration::from_secs(1),
            claim_attempts: 60,
            claim_interval: Duration::from_secs(1),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Desired end state of one bringup. Never mutated once bringup starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTopology {
    /// Metadata node names, in cluster order.
    pub metadata_nodes: Vec<String>,
    /// Number of storage daemons (N).
    pub storage_daemons: usize,
    /// Backend flavour of the daemons.
    pub storage_kind: StorageKind,
    /// Number of proxies.
    pub proxies: usize,
    /// Number of maintenance agents.
    pub maintenance_agents: usize,
    /// Daemons discover each other by multicast.
    pub multicast: bool,
    /// Secure every link with TLS.
    pub tls: bool,
    /// Which unclaimed daemons this run may claim.
    pub claim_policy: ClaimPolicy,
}

impl Default for ClusterTopology {
    fn default() -> Self {
        Self {
            metadata_nodes: vec!["arakoon_0".to_string()],
            storage_daemons: 4,
            storage_kind: StorageKind::Asd,
            proxies: 1,
            maintenance_agents: 1,
            multicast: true,
            tls: false,
            claim_policy: ClaimPolicy::default(),
        }
    }
}

impl ClusterTopology {
    /// Validate the topology.
    pub fn validate(&self) -> Result<()> {
        if self.metadata_nodes.is_empty() {
            return Err(OrchestratorError::InvalidConfig {
                field: "metadata_nodes".to_string(),
                reason: "At least one metadata node is required".to_string(),
            });
        }

        if self.metadata_nodes.iter().any(|node| node.trim().is_empty()) {
            return Err(OrchestratorError::InvalidConfig {
                field: "metadata_nodes".to_string(),
                reason: "Node names must not be empty".to_string(),
            });
        }

        if self.metadata_nodes.len() > MAX_METADATA_NODES {
            return Err(OrchestratorError::InvalidConfig {
                field: "metadata_nodes".to_string(),
                reason: format!(
                    "At most {} nodes fit before client and messaging ports collide",
                    MAX_METADATA_NODES
                ),
            });
        }

        if self.proxies == 0 {
            return Err(OrchestratorError::InvalidConfig {
                field: "proxies".to_string(),
                reason: "At least one proxy is required".to_string(),
            });
        }

        if self.proxies > MAX_PROXIES {
            return Err(OrchestratorError::InvalidConfig {
                field: "proxies".to_string(),
                reason: format!("At most {} proxies fit in the port range", MAX_PROXIES),
            });
        }

        if self.storage_daemons > MAX_STORAGE_DAEMONS {
            return Err(OrchestratorError::InvalidConfig {
                field: "storage_daemons".to_string(),
                reason: format!(
                    "At most {} daemons fit before the proxy ports",
                    MAX_STORAGE_DAEMONS
                ),
            });
        }

        Ok(())
    }

    /// Background gossip throttle handed to each proxy.
    pub fn chattiness(&self) -> f64 {
        chattiness(self.proxies, self.maintenance_agents)
    }
}

/// Inverse of the peer population, rounded to two decimals.
pub fn chattiness(n_proxies: usize, n_others: usize) -> f64 {
    let peers = (n_proxies + n_others).max(1) as f64;
    ((1.0 / peers) * 100.0).round_ties_even() / 100.0
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
