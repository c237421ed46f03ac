//! Command-line interface for the ALBA demo orchestrator.

use crate::cluster::ClaimPolicy;
use crate::config::ClusterTopology;
use crate::types::{StorageKind, DEMO_NAMESPACE};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// alba-demo - Stand up, check and tear down a local ALBA test cluster.
#[derive(Parser)]
#[command(name = "alba-demo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ALBA_DEMO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "ALBA_DEMO_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Cluster shape shared by the lifecycle commands.
#[derive(Args, Debug, Clone)]
pub struct TopologyArgs {
    /// Metadata node names
    #[arg(long, value_delimiter = ',', default_value = "arakoon_0")]
    pub nodes: Vec<String>,

    /// Number of storage daemons
    #[arg(short = 'n', long, env = "ALBA_DEMO_OSDS", default_value_t = 4)]
    pub osds: usize,

    /// Storage daemon flavour
    #[arg(long, value_enum, default_value_t = StorageKind::Asd)]
    pub kind: StorageKind,

    /// Number of proxies
    #[arg(long, default_value_t = 1)]
    pub proxies: usize,

    /// Number of maintenance agents
    #[arg(long, default_value_t = 1)]
    pub agents: usize,

    /// Let daemons announce themselves by multicast
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub multicast: bool,

    /// Secure every link with TLS
    #[arg(long, env = "ALBA_TLS", default_value_t = false, action = ArgAction::Set)]
    pub tls: bool,

    /// Only claim daemons carrying this run's prefix
    #[arg(long)]
    pub strict_claims: bool,
}

impl TopologyArgs {
    pub fn topology(&self) -> ClusterTopology {
        ClusterTopology {
            metadata_nodes: self.nodes.clone(),
            storage_daemons: self.osds,
            storage_kind: self.kind,
            proxies: self.proxies,
            maintenance_agents: self.agents,
            multicast: self.multicast,
            tls: self.tls,
            claim_policy: if self.strict_claims {
                ClaimPolicy::PrefixOnly
            } else {
                ClaimPolicy::PrefixOrLocalAddress
            },
        }
    }
}

/// Versions and sources of a packaged integration run.
#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    /// Arakoon release version
    pub arakoon_version: String,

    /// Alba package version
    pub alba_version: String,

    /// Alba package revision
    #[arg(long)]
    pub alba_revision: Option<String>,

    /// Base URL the alba package is downloaded from
    #[arg(long, env = "ALBA_PACKAGE_URL")]
    pub alba_url: String,

    /// Download directory
    #[arg(long, default_value = ".")]
    pub download_dir: PathBuf,

    /// Write a JUnit report
    #[arg(long)]
    pub xml: bool,

    #[command(flatten)]
    pub topology: TopologyArgs,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Write the metadata cluster config and start its nodes
    ArakoonStart {
        #[command(flatten)]
        topology: TopologyArgs,
    },

    /// Stop the metadata nodes
    ArakoonStop {
        /// Metadata node names
        #[arg(long, value_delimiter = ',', default_value = "arakoon_0")]
        nodes: Vec<String>,
    },

    /// Show the current metadata leader
    WhoMaster {
        /// Use TLS client credentials
        #[arg(long, env = "ALBA_TLS", default_value_t = false, action = ArgAction::Set)]
        tls: bool,
    },

    /// Start the storage daemons
    StartOsds {
        #[command(flatten)]
        topology: TopologyArgs,

        /// Run prefix of the daemons (random when omitted)
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Stop the storage daemon listening on a port
    OsdStop {
        /// Daemon port
        #[arg(long)]
        port: u16,
    },

    /// Restart a storage daemon with the config it already has
    OsdRestart {
        /// Fleet position of the daemon
        #[arg(long)]
        index: usize,

        /// Storage daemon flavour
        #[arg(long, value_enum, default_value_t = StorageKind::Asd)]
        kind: StorageKind,
    },

    /// Claim the storage daemons of a run
    ClaimOsds {
        #[command(flatten)]
        topology: TopologyArgs,

        /// Run prefix the daemons were started with
        #[arg(long)]
        prefix: String,
    },

    /// Start one proxy
    ProxyStart {
        /// Proxy id
        #[arg(long, default_value_t = 0)]
        proxy_id: usize,

        #[command(flatten)]
        topology: TopologyArgs,
    },

    /// Stop one proxy
    ProxyStop {
        /// Proxy id
        #[arg(long, default_value_t = 0)]
        proxy_id: usize,
    },

    /// Start the maintenance agents
    MaintenanceStart {
        #[command(flatten)]
        topology: TopologyArgs,
    },

    /// Stop every maintenance agent
    MaintenanceStop,

    /// Create a namespace
    CreateNamespace {
        /// Namespace name
        #[arg(default_value = DEMO_NAMESPACE)]
        name: String,

        /// Use TLS client credentials
        #[arg(long, env = "ALBA_TLS", default_value_t = false, action = ArgAction::Set)]
        tls: bool,
    },

    /// Create the certificate authority
    MakeCa,

    /// Sign a leaf certificate
    MakeCert {
        /// Identity to sign
        name: String,
    },

    /// Bring the whole demo cluster up
    DemoSetup {
        #[command(flatten)]
        topology: TopologyArgs,
    },

    /// Kill everything and remove all state
    DemoKill {
        /// Number of storage daemon paths to clean
        #[arg(short = 'n', long, env = "ALBA_DEMO_OSDS", default_value_t = 4)]
        osds: usize,

        /// Remove the certificate authority as well
        #[arg(long)]
        wipe_tls: bool,
    },

    /// Check that the expected daemons and proxy are listening
    SmokeTest {
        /// Number of storage daemons expected
        #[arg(short = 'n', long, env = "ALBA_DEMO_OSDS", default_value_t = 4)]
        osds: usize,

        /// Inspect ports through sudo
        #[arg(long)]
        sudo: bool,

        /// Use TLS client credentials for the leader query
        #[arg(long, env = "ALBA_TLS", default_value_t = false, action = ArgAction::Set)]
        tls: bool,
    },

    /// Install the deb packages and run the demo on them
    DebIntegrationTest {
        #[command(flatten)]
        package: PackageArgs,
    },

    /// Install the rpm packages and run the demo on them
    RpmIntegrationTest {
        #[command(flatten)]
        package: PackageArgs,
    },

    /// Show versions of the external binaries
    Version,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
