//! Core types for the ALBA demo orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Base port of the first storage daemon.
pub const ASD_BASE_PORT: u16 = 8000;

/// Base port of the first proxy.
pub const PROXY_BASE_PORT: u16 = 10000;

/// Daemons that fit below the proxy ports.
pub const MAX_STORAGE_DAEMONS: usize = (PROXY_BASE_PORT - ASD_BASE_PORT) as usize;

/// Proxies that fit below the top of the port range.
pub const MAX_PROXIES: usize = (u16::MAX - PROXY_BASE_PORT) as usize + 1;

/// Namespace created by the demo bringup.
pub const DEMO_NAMESPACE: &str = "demo";

/// Role of a launched process; selects the binary and config shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Arakoon node of the metadata cluster.
    MetadataNode,
    /// ASD or Kinetic storage backend.
    StorageDaemon,
    /// ALBA proxy.
    Proxy,
    /// ALBA maintenance agent.
    MaintenanceAgent,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::MetadataNode => "metadata-node",
            NodeRole::StorageDaemon => "storage-daemon",
            NodeRole::Proxy => "proxy",
            NodeRole::MaintenanceAgent => "maintenance-agent",
        };
        f.write_str(name)
    }
}

/// Storage backend flavour for the daemon fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageKind {
    /// ALBA storage daemon.
    Asd,
    /// Kinetic drive simulator.
    Kinetic,
    /// Alternate ASD and Kinetic by index parity.
    Mixed,
}

impl StorageKind {
    /// Concrete backend for the daemon at `index`.
    pub fn for_index(self, index: usize) -> StorageKind {
        match self {
            StorageKind::Mixed => {
                if index % 2 == 0 {
                    StorageKind::Asd
                } else {
                    StorageKind::Kinetic
                }
            }
            other => other,
        }
    }
}

impl Default for StorageKind {
    fn default() -> Self {
        StorageKind::Asd
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASD" => Ok(StorageKind::Asd),
            "KINETIC" => Ok(StorageKind::Kinetic),
            "MIXED" => Ok(StorageKind::Mixed),
            other => Err(format!("unknown storage kind: {}", other)),
        }
    }
}

/// Random prefix identifying daemons launched by one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunPrefix(String);

impl RunPrefix {
    /// Generate a fresh prefix.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Use a known prefix (e.g. to restart daemons of an earlier run).
    pub fn from_string(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one storage daemon.
///
/// Both tokens are derived from the run prefix, so daemons started by this
/// run can be told apart from leftovers of other runs on the same host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDaemonIdentity {
    pub prefix: RunPrefix,
    pub node_index: u32,
    pub port: u16,
}

impl StorageDaemonIdentity {
    /// Identity of the daemon at fleet position `index`.
    pub fn for_index(prefix: &RunPrefix, index: usize) -> Self {
        let port = asd_port(index);
        Self {
            prefix: prefix.clone(),
            node_index: node_index_for_port(port),
            port,
        }
    }

    /// The `asd_id` written to the daemon config.
    pub fn asd_id(&self) -> String {
        format!("{}_{}_{}", self.port, self.node_index, self.prefix)
    }

    /// The `node_id` the daemon advertises to the metadata cluster.
    pub fn node_id(&self) -> String {
        format!("{}_{}", self.prefix, self.node_index)
    }
}

/// Port of the storage daemon at fleet position `index`.
pub fn asd_port(index: usize) -> u16 {
    ASD_BASE_PORT + index as u16
}

/// Node index shared by groups of four consecutive ports.
pub fn node_index_for_port(port: u16) -> u32 {
    u32::from(port >> 2)
}

/// Port of the proxy with the given id.
pub fn proxy_port(proxy_id: usize) -> u16 {
    PROXY_BASE_PORT + proxy_id as u16
}

/// Record of one launched process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub role: NodeRole,
    pub index: usize,
    /// Listening port, when the role has one.
    pub port: Option<u16>,
    pub working_dir: PathBuf,
    pub config_path: Option<PathBuf>,
    pub output_path: PathBuf,
    /// Pid reported at spawn time; the process may have exited since.
    pub pid: Option<u32>,
}

/// Explicit mapping of (role, index) to the processes this run launched.
#[derive(Debug, Default, Clone)]
pub struct ProcessTable {
    handles: BTreeMap<(NodeRole, usize), ProcessHandle>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle, returning the one it replaced.
    pub fn insert(&mut self, handle: ProcessHandle) -> Option<ProcessHandle> {
        self.handles.insert((handle.role, handle.index), handle)
    }

    pub fn get(&self, role: NodeRole, index: usize) -> Option<&ProcessHandle> {
        self.handles.get(&(role, index))
    }

    /// All handles of a role, in index order.
    pub fn by_role(&self, role: NodeRole) -> impl Iterator<Item = &ProcessHandle> {
        self.handles
            .values()
            .filter(move |handle| handle.role == role)
    }

    pub fn count(&self, role: NodeRole) -> usize {
        self.by_role(role).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessHandle> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// An unclaimed storage daemon as reported by `list-available-osds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableOsd {
    pub long_id: String,
    pub node_id: String,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Claim progress of a convergence run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimState {
    target: usize,
    claimed: BTreeSet<String>,
}

impl ClaimState {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            claimed: BTreeSet::new(),
        }
    }

    /// Record a claimed daemon; returns false if it was already counted.
    pub fn record(&mut self, long_id: impl Into<String>) -> bool {
        self.claimed.insert(long_id.into())
    }

    pub fn is_claimed(&self, long_id: &str) -> bool {
        self.claimed.contains(long_id)
    }

    pub fn claimed(&self) -> usize {
        self.claimed.len()
    }

    pub fn claimed_ids(&self) -> &BTreeSet<String> {
        &self.claimed
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn is_converged(&self) -> bool {
        self.claimed.len() >= self.target
    }
}
