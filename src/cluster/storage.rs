//! Storage daemon fleet: ASDs, Kinetic simulators and their volumes.

use super::ClusterContext;
use crate::config_writer::{capacity_limit, AsdConfig, Multicast, TlsFiles};
use crate::error::{OrchestratorError, Result};
use crate::process::{run_best_effort, run_checked, CommandLine, CommandRunner};
use crate::types::{asd_port, NodeRole, ProcessHandle, RunPrefix, StorageDaemonIdentity, StorageKind};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Size of each loopback volume file.
pub const VOLUME_BYTES: u64 = 200_000_000;

/// Device nodes pre-created under `/dev`.
pub const LOOP_DEVICE_NODES: u32 = 30;

/// Port that runs with `--slow` when slow mode is on.
const SLOW_PORT: u16 = 8000;

/// One-time loop device setup, owned by a single bringup.
#[derive(Debug, Default)]
pub struct LoopDevices {
    created: bool,
}

impl LoopDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Load the loop module and create device nodes, once.
    ///
    /// A node that already exists makes `mknod` fail; that is only logged.
    pub async fn ensure(&mut self, runner: &dyn CommandRunner) -> Result<()> {
        if self.created {
            return Ok(());
        }

        run_checked(
            runner,
            &CommandLine::new("modprobe")
                .args(["loop", "max_loop=64"])
                .with_sudo(),
        )
        .await?;

        for minor in 0..LOOP_DEVICE_NODES {
            let command = CommandLine::new("mknod")
                .args(["-m", "660"])
                .arg(format!("/dev/loop{}", minor))
                .args(["b", "7"])
                .arg(minor.to_string())
                .with_sudo();
            run_best_effort(runner, &command).await;
        }

        self.created = true;
        info!("Loop devices ready");
        Ok(())
    }
}

/// `<path>_file`, the volume backing a daemon directory.
pub fn volume_file(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push("_file");
    PathBuf::from(name)
}

/// Config file of the daemon living in `path`.
pub fn asd_config_file(path: &Path) -> PathBuf {
    path.join("cfg.json")
}

/// Starts and stops storage daemons.
pub struct StorageFleet {
    ctx: ClusterContext,
}

impl StorageFleet {
    pub fn new(ctx: &ClusterContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.ctx.runner()
    }

    /// Create, format and mount the loopback volume for `path`.
    pub async fn prepare_volume(&self, loops: &mut LoopDevices, path: &Path) -> Result<()> {
        loops.ensure(self.runner()).await?;

        let file = volume_file(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(path)?;

        let runner = self.runner();
        run_checked(
            runner,
            &CommandLine::new("fallocate")
                .arg("-l")
                .arg(VOLUME_BYTES.to_string())
                .arg(&file),
        )
        .await?;
        run_checked(
            runner,
            &CommandLine::new("mke2fs")
                .args(["-t", "ext4", "-F"])
                .arg(&file),
        )
        .await?;
        run_checked(
            runner,
            &CommandLine::new("mount")
                .args(["-o", "loop,async"])
                .arg(&file)
                .arg(path)
                .with_sudo(),
        )
        .await?;

        // SAFETY: getuid/getgid have no preconditions and cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        run_checked(
            runner,
            &CommandLine::new("chown")
                .arg("-R")
                .arg(format!("{}:{}", uid, gid))
                .arg(path)
                .with_sudo(),
        )
        .await?;

        debug!(path = %path.display(), "Mounted daemon volume");
        Ok(())
    }

    /// Start the daemon at fleet position `index` with a fresh identity.
    ///
    /// Any config left in the daemon directory by an earlier run is
    /// overwritten.
    pub async fn start(
        &self,
        loops: &mut LoopDevices,
        prefix: &RunPrefix,
        index: usize,
        kind: StorageKind,
        multicast: bool,
    ) -> Result<ProcessHandle> {
        let env = &self.ctx.env;
        let path = env.asd_path(index);

        if env.osds_on_separate_fs {
            self.prepare_volume(loops, &path).await?;
        } else {
            std::fs::create_dir_all(&path)?;
        }

        let config_path = match kind {
            StorageKind::Kinetic => None,
            _ => {
                let config_path = asd_config_file(&path);
                let config = self.asd_config(prefix, index, &path, multicast).await?;
                self.ctx.writer.write_json(&config_path, &config)?;
                Some(config_path)
            }
        };

        self.launch(index, kind, path, config_path, false).await
    }

    /// Start the daemon at fleet position `index` again with the config it
    /// already has, keeping its identity.
    pub async fn restart(&self, index: usize, kind: StorageKind) -> Result<ProcessHandle> {
        let path = self.ctx.env.asd_path(index);
        if !path.exists() {
            return Err(OrchestratorError::InvalidConfig {
                field: "index".to_string(),
                reason: format!("No daemon directory at {}", path.display()),
            });
        }

        let config_path = match kind {
            StorageKind::Kinetic => None,
            _ => {
                let config_path = asd_config_file(&path);
                let existing: AsdConfig = self.ctx.writer.read_json(&config_path)?;
                info!(port = existing.port, asd_id = %existing.asd_id, "Reusing daemon config");
                Some(config_path)
            }
        };

        self.launch(index, kind, path, config_path, true).await
    }

    async fn launch(
        &self,
        index: usize,
        kind: StorageKind,
        path: PathBuf,
        config_path: Option<PathBuf>,
        restart: bool,
    ) -> Result<ProcessHandle> {
        let env = &self.ctx.env;
        let port = asd_port(index);

        let (command, output) = match &config_path {
            None => {
                let command = CommandLine::new(&env.kinetic_bin)
                    .arg(port.to_string())
                    .arg(&path);
                (command, path.join("kinetic.out"))
            }
            Some(config_path) => {
                let mut command = CommandLine::new(&env.alba_bin)
                    .arg("asd-start")
                    .arg("--config")
                    .arg(config_path);
                if env.slow_asd && port == SLOW_PORT {
                    command = command.arg("--slow");
                }
                (command, path.join("output"))
            }
        };

        let pid = self.runner().spawn_detached(&command, &output).await?;
        info!(index, port, kind = ?kind, restart, "Started storage daemon");

        Ok(ProcessHandle {
            role: NodeRole::StorageDaemon,
            index,
            port: Some(port),
            working_dir: path,
            config_path,
            output_path: output,
            pid,
        })
    }

    async fn asd_config(
        &self,
        prefix: &RunPrefix,
        index: usize,
        path: &Path,
        multicast: bool,
    ) -> Result<AsdConfig> {
        let identity = StorageDaemonIdentity::for_index(prefix, index);
        let tls = match self.ctx.tls.as_ref() {
            Some(ca) => {
                let leaf = ca.sign(self.runner(), &identity.asd_id()).await?;
                Some(TlsFiles {
                    cert: leaf.cert,
                    key: leaf.key,
                })
            }
            None => None,
        };

        Ok(AsdConfig {
            port: identity.port,
            node_id: identity.node_id(),
            home: path.to_path_buf(),
            log_level: self.ctx.env.node_log_level.clone(),
            asd_id: identity.asd_id(),
            limit: capacity_limit(self.ctx.env.osds_on_separate_fs),
            sync_dont_use: false,
            multicast: Multicast::from_flag(multicast),
            tls,
        })
    }

    /// Kill whatever listens on `port`. Nothing listening is fine.
    pub async fn stop(&self, port: u16) -> bool {
        let mut command = CommandLine::new("fuser")
            .args(["-k", "-n", "tcp"])
            .arg(port.to_string());
        if self.ctx.env.sudo_fuser {
            command = command.with_sudo();
        }
        run_best_effort(self.runner(), &command).await
    }
}
