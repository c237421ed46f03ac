//! Thin wrapper over the `alba` control commands.

use super::ClusterContext;
use crate::error::{OrchestratorError, Result};
use crate::process::{run_checked, CommandLine, CommandRunner};
use crate::types::AvailableOsd;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Envelope `alba ... --to-json` wraps its answers in.
#[derive(Debug, Deserialize)]
struct JsonEnvelope<T> {
    result: T,
}

/// Entry of `list-namespaces --to-json`.
#[derive(Debug, Deserialize)]
struct NamespaceEntry {
    name: String,
}

/// Runs `alba` subcommands against the run's metadata cluster.
pub struct AlbaCli {
    ctx: ClusterContext,
    abm_config: PathBuf,
}

impl AlbaCli {
    pub fn new(ctx: &ClusterContext) -> Self {
        Self {
            ctx: ctx.clone(),
            abm_config: ctx.env.arakoon_config_file(),
        }
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.ctx.runner()
    }

    /// `alba <subcommand> ... --config <abm> [--tls=...]`.
    fn command<I, S>(&self, subcommand: &str, args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = CommandLine::new(&self.ctx.env.alba_bin)
            .arg(subcommand)
            .args(args)
            .arg("--config")
            .arg(&self.abm_config);
        if let Some(ca) = self.ctx.tls.as_ref() {
            command = command.arg(ca.alba_flag());
        }
        command
    }

    /// Version banner of the alba binary.
    pub async fn version(&self) -> Result<String> {
        let command = CommandLine::new(&self.ctx.env.alba_bin).arg("version");
        run_checked(self.runner(), &command).await
    }

    /// Register `nsm_config` as a namespace manager host.
    pub async fn add_nsm_host(&self, nsm_config: &Path) -> Result<()> {
        let command = self.command("add-nsm-host", [nsm_config]);
        run_checked(self.runner(), &command).await?;
        Ok(())
    }

    pub async fn create_namespace(&self, name: &str) -> Result<()> {
        let command = self.command("create-namespace", [name]);
        run_checked(self.runner(), &command).await?;
        Ok(())
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        let command = self.command("list-namespaces", ["--to-json"]);
        let stdout = run_checked(self.runner(), &command).await?;
        let entries: Vec<NamespaceEntry> = parse_result(&command, &stdout)?;
        Ok(entries.into_iter().map(|entry| entry.name).collect())
    }

    /// Daemons visible to the metadata cluster but not yet claimed.
    pub async fn list_available_osds(&self) -> Result<Vec<AvailableOsd>> {
        let command = self.command("list-available-osds", ["--to-json"]);
        let stdout = run_checked(self.runner(), &command).await?;
        parse_result(&command, &stdout)
    }

    pub async fn claim_osd(&self, long_id: &str) -> Result<()> {
        let command = self.command("claim-osd", ["--long-id", long_id, "--to-json"]);
        run_checked(self.runner(), &command).await?;
        Ok(())
    }

    /// Query the statistics of the daemon on `port`.
    pub async fn asd_statistics(&self, port: u16) -> Result<String> {
        let port = port.to_string();
        let mut command = CommandLine::new(&self.ctx.env.alba_bin)
            .arg("asd-statistics")
            .args(["-h", "::1", "-p", port.as_str()]);
        if let Some(ca) = self.ctx.tls.as_ref() {
            command = command.arg(ca.alba_flag());
        }
        run_checked(self.runner(), &command).await
    }
}

fn parse_result<T: serde::de::DeserializeOwned>(command: &CommandLine, stdout: &str) -> Result<T> {
    serde_json::from_str::<JsonEnvelope<T>>(stdout)
        .map(|envelope| envelope.result)
        .map_err(|e| OrchestratorError::UnexpectedOutput {
            command: command.to_string(),
            reason: e.to_string(),
        })
}
