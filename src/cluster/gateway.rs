//! Proxies and maintenance agents.
//!
//! Both talk to the metadata cluster through a private copy of its client
//! config; the binaries rewrite that copy as membership changes.

use super::ClusterContext;
use crate::config_writer::{MaintenanceConfig, ProxyConfig, FRAGMENT_CACHE_SIZE, MANIFEST_CACHE_SIZE};
use crate::error::Result;
use crate::process::{run_best_effort, CommandLine, CommandRunner};
use crate::types::{proxy_port, NodeRole, ProcessHandle};
use std::path::{Path, PathBuf};
use tracing::info;

/// Starts and stops the gateway processes of a run.
pub struct GatewayFleet {
    ctx: ClusterContext,
}

impl GatewayFleet {
    pub fn new(ctx: &ClusterContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.ctx.runner()
    }

    /// Copy the metadata client config into `home`.
    fn private_abm_config(&self, home: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(home)?;
        let copy = home.join("albamgr.cfg");
        std::fs::copy(self.ctx.env.arakoon_config_file(), &copy)?;
        Ok(copy)
    }

    /// Write the config of proxy `proxy_id` and launch it.
    pub async fn start_proxy(&self, proxy_id: usize, chattiness: f64) -> Result<ProcessHandle> {
        let home = self.ctx.env.proxy_home(proxy_id);
        let albamgr_cfg_file = self.private_abm_config(&home)?;
        let fragment_cache_dir = home.join("fragment_cache");
        std::fs::create_dir_all(&fragment_cache_dir)?;

        let port = proxy_port(proxy_id);
        let config = ProxyConfig {
            port,
            albamgr_cfg_file,
            log_level: self.ctx.env.node_log_level.clone(),
            fragment_cache_dir,
            manifest_cache_size: MANIFEST_CACHE_SIZE,
            fragment_cache_size: FRAGMENT_CACHE_SIZE,
            chattiness,
            tls_client: self.ctx.tls.as_ref().map(|ca| ca.client_tls()),
        };
        let config_path = home.join("proxy.cfg");
        self.ctx.writer.write_json(&config_path, &config)?;

        let command = CommandLine::new(&self.ctx.env.alba_bin)
            .arg("proxy-start")
            .arg(format!("--config={}", config_path.display()));
        let output = home.join("proxy.out");
        let pid = self.runner().spawn_detached(&command, &output).await?;
        info!(proxy_id, port, "Started proxy");

        Ok(ProcessHandle {
            role: NodeRole::Proxy,
            index: proxy_id,
            port: Some(port),
            working_dir: home,
            config_path: Some(config_path),
            output_path: output,
            pid,
        })
    }

    /// Kill the proxy listening on its port.
    pub async fn stop_proxy(&self, proxy_id: usize) -> bool {
        let mut command = CommandLine::new("fuser")
            .args(["-k", "-n", "tcp"])
            .arg(proxy_port(proxy_id).to_string());
        if self.ctx.env.sudo_fuser {
            command = command.with_sudo();
        }
        run_best_effort(self.runner(), &command).await
    }

    /// Write the shared maintenance config and launch `agents` agents on it.
    pub async fn start_maintenance(&self, agents: usize) -> Result<Vec<ProcessHandle>> {
        let home = self.ctx.env.maintenance_home();
        let albamgr_cfg_file = self.private_abm_config(&home)?;
        let config = MaintenanceConfig {
            albamgr_cfg_file,
            log_level: self.ctx.env.node_log_level.clone(),
            tls_client: self.ctx.tls.as_ref().map(|ca| ca.client_tls()),
        };
        let config_path = home.join("maintenance.cfg");
        self.ctx.writer.write_json(&config_path, &config)?;

        let mut handles = Vec::with_capacity(agents);
        for index in 0..agents {
            let command = CommandLine::new(&self.ctx.env.alba_bin)
                .arg("maintenance")
                .arg(format!("--config={}", config_path.display()));
            let output = home.join(format!("maintenance_{}_{}.out", index, agents));
            let pid = self.runner().spawn_detached(&command, &output).await?;

            handles.push(ProcessHandle {
                role: NodeRole::MaintenanceAgent,
                index,
                port: None,
                working_dir: home.clone(),
                config_path: Some(config_path.clone()),
                output_path: output,
                pid,
            });
        }
        info!(agents, "Started maintenance agents");
        Ok(handles)
    }

    /// Kill every maintenance agent started from this alba binary.
    pub async fn stop_maintenance(&self) -> bool {
        let pattern = format!("^{} maintenance", self.ctx.env.alba_bin.display());
        let command = CommandLine::new("pkill").arg("-f").arg(pattern);
        run_best_effort(self.runner(), &command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::process::CommandOutput;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct SpawnRecorder {
        outputs: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl CommandRunner for SpawnRecorder {
        async fn run(&self, _command: &CommandLine) -> Result<CommandOutput> {
            Ok(CommandOutput::ok(""))
        }

        async fn spawn_detached(&self, _command: &CommandLine, output: &Path) -> Result<Option<u32>> {
            self.outputs.lock().unwrap().push(output.to_path_buf());
            Ok(None)
        }
    }

    fn context(root: &Path, tls: bool) -> (ClusterContext, Arc<SpawnRecorder>) {
        let config = OrchestratorConfig::development(root);
        std::fs::create_dir_all(&config.env.arakoon_root).unwrap();
        std::fs::write(config.env.arakoon_config_file(), "[global]\n").unwrap();
        let runner = Arc::new(SpawnRecorder::default());
        let ctx = ClusterContext::new(config.env, runner.clone()).with_tls(tls);
        (ctx, runner)
    }

    #[tokio::test]
    async fn test_proxy_config() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), false);

        let handle = GatewayFleet::new(&ctx).start_proxy(0, 0.5).await.unwrap();
        assert_eq!(handle.port, Some(10000));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(handle.config_path.unwrap()).unwrap())
                .unwrap();
        assert_eq!(raw["manifest_cache_size"], 100_000);
        assert_eq!(raw["fragment_cache_size"], 100_000_000);
        assert_eq!(raw["chattiness"], 0.5);
        assert!(raw.get("tls_client").is_none());
        assert!(ctx.env.proxy_home(0).join("albamgr.cfg").exists());
        assert!(ctx.env.proxy_home(0).join("fragment_cache").is_dir());
    }

    #[tokio::test]
    async fn test_proxy_tls_client() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), true);

        let handle = GatewayFleet::new(&ctx).start_proxy(1, 0.33).await.unwrap();
        let config: ProxyConfig = ctx.writer.read_json(&handle.config_path.unwrap()).unwrap();
        assert_eq!(config.port, 10001);
        assert!(config.tls_client.is_some());
    }

    #[tokio::test]
    async fn test_maintenance_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, runner) = context(dir.path(), false);

        let handles = GatewayFleet::new(&ctx).start_maintenance(2).await.unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].config_path, handles[1].config_path);

        let outputs = runner.outputs.lock().unwrap();
        assert!(outputs[0].ends_with("maintenance_0_2.out"));
        assert!(outputs[1].ends_with("maintenance_1_2.out"));
    }
}
