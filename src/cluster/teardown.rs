//! Deterministic, best-effort teardown of a demo cluster.
//!
//! Every step runs regardless of earlier failures. Failures are logged,
//! counted and reported, never returned as errors, so teardown can be run
//! any number of times in a row.

use super::storage::volume_file;
use super::ClusterContext;
use crate::config::EnvironmentConfig;
use crate::process::{CommandLine, CommandRunner};
use crate::tls::CertificateAuthority;
use crate::types::ProcessTable;
use std::path::Path;
use tracing::{info, warn};

/// Pattern matching the Java Kinetic simulator.
pub const SIMULATOR_PATTERN: &str = "java.*SimulatorRunner.*";

/// Exit status of `pkill` when nothing matched.
const PKILL_NO_MATCH: i32 = 1;

/// Exit status of `kill` for a pid that already exited.
const KILL_NO_SUCH_PROCESS: i32 = 1;

/// What a teardown did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Steps attempted.
    pub steps: usize,
    /// Description of every step that did not succeed.
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, step: &str, result: std::result::Result<(), String>) {
        self.steps += 1;
        if let Err(reason) = result {
            warn!(step, reason = %reason, "Teardown step failed, continuing");
            crate::observability::record_teardown_failure(step);
            self.failures.push(format!("{}: {}", step, reason));
        }
    }
}

/// Kills every process family of a run and removes its state.
pub struct ClusterTeardown {
    ctx: ClusterContext,
    storage_daemons: usize,
    tracked: Option<ProcessTable>,
    wipe_tls: bool,
}

impl ClusterTeardown {
    /// Teardown covering daemon paths `0..storage_daemons`.
    pub fn new(ctx: &ClusterContext, storage_daemons: usize) -> Self {
        Self {
            ctx: ctx.clone(),
            storage_daemons,
            tracked: None,
            wipe_tls: false,
        }
    }

    /// Also kill the pids recorded by a bringup, before the pattern kills.
    pub fn with_processes(mut self, processes: &ProcessTable) -> Self {
        let highest = processes
            .by_role(crate::types::NodeRole::StorageDaemon)
            .map(|handle| handle.index + 1)
            .max()
            .unwrap_or(0);
        self.storage_daemons = self.storage_daemons.max(highest);
        self.tracked = Some(processes.clone());
        self
    }

    /// Remove the TLS root as well.
    pub fn wipe_tls(mut self, wipe: bool) -> Self {
        self.wipe_tls = wipe;
        self
    }

    pub async fn run(&self) -> TeardownReport {
        let env = &self.ctx.env;
        let runner = self.ctx.runner();
        let mut report = TeardownReport::default();

        if let Some(processes) = &self.tracked {
            for handle in processes.iter() {
                if let Some(pid) = handle.pid {
                    let command = CommandLine::new("kill").arg("-9").arg(pid.to_string());
                    report.record(
                        &format!("kill pid {}", pid),
                        run_step(runner, &command, &[KILL_NO_SUCH_PROCESS]).await,
                    );
                }
            }
        }

        for name in [
            EnvironmentConfig::binary_name(&env.arakoon_bin),
            EnvironmentConfig::binary_name(&env.alba_bin),
        ] {
            let command = CommandLine::new("pkill").args(["-e", "-9"]).arg(&name);
            report.record(
                &format!("kill {}", name),
                run_step(runner, &command, &[PKILL_NO_MATCH]).await,
            );
        }
        let command = CommandLine::new("pkill")
            .args(["-ef", "-9"])
            .arg(SIMULATOR_PATTERN);
        report.record(
            "kill simulators",
            run_step(runner, &command, &[PKILL_NO_MATCH]).await,
        );

        for index in 0..self.storage_daemons {
            let path = env.asd_path(index);
            let file = volume_file(&path);
            if file.exists() {
                let command = CommandLine::new("umount").arg(&path).with_sudo();
                report.record(
                    &format!("unmount {}", path.display()),
                    run_step(runner, &command, &[]).await,
                );
                report.record(&format!("remove {}", file.display()), remove(&file));
            }
            report.record(&format!("remove {}", path.display()), remove(&path));
        }

        report.record("remove run root", remove(&env.run_root));
        report.record("remove metadata root", remove(&env.arakoon_root));

        if self.wipe_tls {
            let wiped = CertificateAuthority::new(env.tls_root.clone())
                .wipe()
                .map_err(|e| e.to_string());
            report.record("remove tls root", wiped);
        }

        info!(
            steps = report.steps,
            failures = report.failures.len(),
            "Teardown finished"
        );
        report
    }
}

async fn run_step(
    runner: &dyn CommandRunner,
    command: &CommandLine,
    tolerated: &[i32],
) -> std::result::Result<(), String> {
    match runner.run(command).await {
        Ok(output) if output.success() || tolerated.contains(&output.status) => Ok(()),
        Ok(output) => Err(format!(
            "`{}` exited with {}: {}",
            command,
            output.status,
            output.stderr.trim()
        )),
        Err(e) => Err(e.to_string()),
    }
}

/// `rm -rf path`.
fn remove(path: &Path) -> std::result::Result<(), String> {
    let result = match std::fs::symlink_metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::error::Result;
    use crate::process::CommandOutput;
    use crate::types::{NodeRole, ProcessHandle};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Every command fails with the configured status.
    struct StatusRunner {
        status: i32,
        commands: Mutex<Vec<CommandLine>>,
    }

    #[async_trait]
    impl CommandRunner for StatusRunner {
        async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
            self.commands.lock().unwrap().push(command.clone());
            Ok(CommandOutput {
                status: self.status,
                ..CommandOutput::default()
            })
        }

        async fn spawn_detached(&self, _command: &CommandLine, _output: &Path) -> Result<Option<u32>> {
            Ok(None)
        }
    }

    fn context(root: &Path, status: i32) -> (ClusterContext, Arc<StatusRunner>) {
        let config = OrchestratorConfig::development(root);
        let runner = Arc::new(StatusRunner {
            status,
            commands: Mutex::new(Vec::new()),
        });
        (ClusterContext::new(config.env, runner.clone()), runner)
    }

    #[tokio::test]
    async fn test_nothing_running_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), PKILL_NO_MATCH);

        let report = ClusterTeardown::new(&ctx, 4).run().await;
        assert!(report.is_clean(), "{:?}", report.failures);
    }

    #[tokio::test]
    async fn test_failures_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 2);
        std::fs::create_dir_all(ctx.env.asd_path(0)).unwrap();
        std::fs::write(volume_file(&ctx.env.asd_path(0)), "").unwrap();

        let report = ClusterTeardown::new(&ctx, 1).run().await;
        // three kills and the unmount fail, the removals still happen
        assert_eq!(report.failures.len(), 4);
        assert!(!ctx.env.asd_path(0).exists());
        assert!(!ctx.env.run_root.exists());
    }

    #[tokio::test]
    async fn test_twice_in_a_row() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, runner) = context(dir.path(), 0);
        std::fs::create_dir_all(ctx.env.proxy_home(0)).unwrap();
        std::fs::create_dir_all(ctx.env.arakoon_node_dir("arakoon_0")).unwrap();

        let teardown = ClusterTeardown::new(&ctx, 4);
        assert!(teardown.run().await.is_clean());
        assert!(teardown.run().await.is_clean());
        assert!(!ctx.env.run_root.exists());
        assert!(!ctx.env.arakoon_root.exists());
        assert!(runner
            .commands
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.mentions(SIMULATOR_PATTERN)));
    }

    #[tokio::test]
    async fn test_tracked_pid_kill_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, runner) = context(dir.path(), 2);
        let mut processes = ProcessTable::new();
        processes.insert(ProcessHandle {
            role: NodeRole::Proxy,
            index: 0,
            port: Some(10000),
            working_dir: ctx.env.proxy_home(0),
            config_path: None,
            output_path: ctx.env.proxy_home(0).join("proxy.out"),
            pid: Some(4242),
        });

        let report = ClusterTeardown::new(&ctx, 0)
            .with_processes(&processes)
            .run()
            .await;

        assert!(report.failures.iter().any(|f| f.starts_with("kill pid 4242")));
        assert_eq!(runner.commands.lock().unwrap()[0].to_string(), "kill -9 4242");
    }

    #[tokio::test]
    async fn test_tls_root_kept_unless_wiped() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 0);
        std::fs::create_dir_all(&ctx.env.tls_root).unwrap();

        ClusterTeardown::new(&ctx, 0).run().await;
        assert!(ctx.env.tls_root.exists());

        ClusterTeardown::new(&ctx, 0).wipe_tls(true).run().await;
        assert!(!ctx.env.tls_root.exists());
    }
}
