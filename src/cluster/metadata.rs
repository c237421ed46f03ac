//! The arakoon metadata cluster.

use super::ClusterContext;
use crate::config::EnvironmentConfig;
use crate::config_writer::IniDocument;
use crate::error::Result;
use crate::process::{run_best_effort, run_checked, CommandLine, CommandRunner};
use crate::tls::{CertificateAuthority, CLIENT_NAME};
use crate::types::{NodeRole, ProcessHandle};
use std::path::{Path, PathBuf};
use tracing::info;

/// Plugins every metadata node loads from its home directory.
pub const PLUGINS: [&str; 2] = ["nsm_host_plugin.cmxs", "albamgr_plugin.cmxs"];

/// Cluster id written to the generated config.
pub const CLUSTER_ID: &str = "arakoon";

const CLIENT_PORT_BASE: u16 = 4000;
const MESSAGING_PORT_BASE: u16 = 4010;

/// Nodes whose client ports stay below the first messaging port.
pub const MAX_METADATA_NODES: usize = (MESSAGING_PORT_BASE - CLIENT_PORT_BASE) as usize;

/// Client port of the metadata node at `index`.
pub fn client_port(index: usize) -> u16 {
    CLIENT_PORT_BASE + index as u16
}

/// Messaging port of the metadata node at `index`.
pub fn messaging_port(index: usize) -> u16 {
    MESSAGING_PORT_BASE + index as u16
}

/// Render the cluster config for `nodes`.
pub fn render_config(
    env: &EnvironmentConfig,
    nodes: &[String],
    tls: Option<&CertificateAuthority>,
) -> IniDocument {
    let mut doc = IniDocument::new();
    {
        let global = doc.section("global");
        global
            .set("cluster", nodes.join(", "))
            .set("cluster_id", CLUSTER_ID)
            .set("plugins", "albamgr_plugin nsm_host_plugin");
        if let Some(ca) = tls {
            global
                .set("tls_ca_cert", ca.ca_cert().display())
                .set("tls_service", "true")
                .set("tls_service_validate_peer", "false");
        }
    }

    for (index, node) in nodes.iter().enumerate() {
        let section = doc.section(node);
        section
            .set("ip", &env.metadata_host)
            .set("client_port", client_port(index))
            .set("messaging_port", messaging_port(index))
            .set("home", env.arakoon_node_dir(node).display())
            .set("log_level", &env.node_log_level)
            .set("fsync", "false");
        if let Some(ca) = tls {
            let leaf = ca.leaf(node);
            section
                .set("tls_cert", leaf.cert.display())
                .set("tls_key", leaf.key.display());
        }
    }

    doc
}

/// Handle on the arakoon metadata cluster of a run.
pub struct ArakoonCluster {
    ctx: ClusterContext,
}

impl ArakoonCluster {
    pub fn new(ctx: &ClusterContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.ctx.runner()
    }

    /// The generated client config, shared with alba.
    pub fn config_file(&self) -> PathBuf {
        self.ctx.env.arakoon_config_file()
    }

    /// Create the CA and sign certificates for every node and the client.
    pub async fn prepare_tls(&self, nodes: &[String]) -> Result<()> {
        let Some(ca) = self.ctx.tls.as_ref() else {
            return Ok(());
        };
        ca.create(self.runner()).await?;
        for node in nodes {
            ca.sign(self.runner(), node).await?;
        }
        ca.sign(self.runner(), CLIENT_NAME).await?;
        Ok(())
    }

    /// Write the cluster config and launch every node.
    pub async fn start(&self, nodes: &[String]) -> Result<Vec<ProcessHandle>> {
        std::fs::create_dir_all(&self.ctx.env.arakoon_root)?;
        let config_file = self.config_file();
        let doc = render_config(&self.ctx.env, nodes, self.ctx.tls.as_ref());
        self.ctx.writer.write_ini(&config_file, &doc)?;

        let mut handles = Vec::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            let home = self.ctx.env.arakoon_node_dir(node);
            std::fs::create_dir_all(&home)?;
            for plugin in PLUGINS {
                link_force(&self.ctx.env.plugin_dir.join(plugin), &home.join(plugin))?;
            }

            let command = CommandLine::new(&self.ctx.env.arakoon_bin)
                .arg("--node")
                .arg(node)
                .arg("-config")
                .arg(&config_file);
            let output = home.join("node.out");
            let pid = self.runner().spawn_detached(&command, &output).await?;
            info!(node = %node, port = client_port(index), "Started metadata node");

            handles.push(ProcessHandle {
                role: NodeRole::MetadataNode,
                index,
                port: Some(client_port(index)),
                working_dir: home,
                config_path: Some(config_file.clone()),
                output_path: output,
                pid,
            });
        }
        Ok(handles)
    }

    /// Ask the cluster who its master is; `None` while there is no leader.
    pub async fn who_master(&self) -> Result<Option<String>> {
        let mut command = CommandLine::new(&self.ctx.env.arakoon_bin)
            .arg("-config")
            .arg(self.config_file())
            .arg("--who-master");
        if let Some(ca) = self.ctx.tls.as_ref() {
            command = command.args(ca.arakoon_flags());
        }

        let stdout = run_checked(self.runner(), &command).await?;
        let master = stdout.trim();
        if master.is_empty() {
            Ok(None)
        } else {
            Ok(Some(master.to_string()))
        }
    }

    /// Stop every node by command-line pattern. Missing processes are fine.
    pub async fn stop(&self, nodes: &[String]) {
        for node in nodes {
            let pattern = format!("^{} --node {}", self.ctx.env.arakoon_bin.display(), node);
            let command = CommandLine::new("pkill")
                .arg("--list-name")
                .arg("-f")
                .arg(pattern);
            run_best_effort(self.runner(), &command).await;
        }
    }

    /// Version banner of the arakoon binary.
    pub async fn version(&self) -> Result<String> {
        let command = CommandLine::new(&self.ctx.env.arakoon_bin).arg("--version");
        run_checked(self.runner(), &command).await
    }
}

/// `ln -fs target link`.
fn link_force(target: &Path, link: &Path) -> Result<()> {
    match std::fs::remove_file(link) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link)?;
    #[cfg(not(unix))]
    std::fs::copy(target, link).map(|_| ())?;
    Ok(())
}
