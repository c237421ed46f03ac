//! Cluster lifecycle for the ALBA demo.
//!
//! This module handles every step of standing a test cluster up and
//! tearing it down again:
//! - Metadata cluster (arakoon) start, stop and leader discovery
//! - Storage daemon fleet start, stop and claim convergence
//! - Proxy and maintenance agent fleets
//! - Deterministic teardown and post-bringup smoke checks

pub mod bringup;
pub mod claims;
pub mod control;
pub mod gateway;
pub mod metadata;
pub mod smoke;
pub mod storage;
pub mod teardown;

pub use bringup::{BringupOutcome, BringupStage, ClusterBringup};
pub use claims::{ClaimPolicy, ClaimSelector};
pub use control::AlbaCli;
pub use gateway::GatewayFleet;
pub use metadata::ArakoonCluster;
pub use smoke::{FuserInspector, PortInspector, SmokeCheck, SmokeReport};
pub use storage::{LoopDevices, StorageFleet};
pub use teardown::{ClusterTeardown, TeardownReport};

use crate::config::EnvironmentConfig;
use crate::config_writer::ConfigWriter;
use crate::process::CommandRunner;
use crate::tls::CertificateAuthority;
use std::sync::Arc;

/// Everything a lifecycle step needs to touch the outside world.
#[derive(Clone)]
pub struct ClusterContext {
    /// Binary locations and directories.
    pub env: EnvironmentConfig,
    /// Executes external commands.
    pub runner: Arc<dyn CommandRunner>,
    /// Writes config files.
    pub writer: ConfigWriter,
    /// Present when the cluster runs with TLS.
    pub tls: Option<CertificateAuthority>,
}

impl ClusterContext {
    /// Context without TLS.
    pub fn new(env: EnvironmentConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            env,
            runner,
            writer: ConfigWriter::new(),
            tls: None,
        }
    }

    /// Enable or disable TLS, rooted at the configured TLS directory.
    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.tls = enabled.then(|| CertificateAuthority::new(self.env.tls_root.clone()));
        self
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// Client for the metadata cluster.
    pub fn arakoon(&self) -> ArakoonCluster {
        ArakoonCluster::new(self)
    }

    /// Client for the alba control commands.
    pub fn alba(&self) -> AlbaCli {
        AlbaCli::new(self)
    }
}

impl std::fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterContext")
            .field("env", &self.env)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}
