//! Common test utilities for integration tests.

pub mod assertions;
pub mod cluster_sim;

use std::path::PathBuf;
use std::sync::Arc;

use alba_demo::cluster::{ClusterBringup, ClusterContext};
use alba_demo::config::{ClusterTopology, OrchestratorConfig};
use alba_demo::process::CommandRunner;
use alba_demo::types::RunPrefix;
use tempfile::TempDir;

// Re-export common types
pub use assertions::*;
pub use cluster_sim::*;

/// Run prefix used by every simulated bringup.
pub const TEST_PREFIX: &str = "testrun";

/// Test environment rooted in a temporary directory.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config: OrchestratorConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = OrchestratorConfig::development(temp_dir.path());
        Self { temp_dir, config }
    }

    pub fn root(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Context whose commands all go to `host`.
    pub fn context(&self, host: &Arc<SimulatedHost>) -> ClusterContext {
        let runner: Arc<dyn CommandRunner> = host.clone();
        ClusterContext::new(self.config.env.clone(), runner)
    }

    /// A bringup against `host` with a fixed prefix and local address.
    pub fn bringup(&self, host: &Arc<SimulatedHost>, topology: ClusterTopology) -> ClusterBringup {
        ClusterBringup::new(self.context(host), topology, self.config.polling.clone())
            .expect("Topology should be valid")
            .with_prefix(RunPrefix::from_string(TEST_PREFIX))
            .with_local_ip(Some(host.local_ip()))
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Default topology with `storage_daemons` daemons.
pub fn topology(storage_daemons: usize) -> ClusterTopology {
    ClusterTopology {
        storage_daemons,
        ..ClusterTopology::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_creation() {
        let env = TestEnv::new();
        assert!(env.config.env.run_root.starts_with(env.root()));
        assert!(env.config.env.tls_root.starts_with(env.root()));
    }
}
