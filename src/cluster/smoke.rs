//! Post-bringup smoke check: are the expected listeners there?

use crate::error::{OrchestratorError, Result};
use crate::process::{CommandLine, CommandRunner};
use crate::types::{asd_port, proxy_port};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Reports which processes own a TCP port.
#[async_trait]
pub trait PortInspector: Send + Sync {
    /// Pids listening on `port`; empty when nothing is.
    async fn owners(&self, port: u16) -> Result<Vec<u32>>;
}

/// Port inspection via `fuser -n tcp`.
pub struct FuserInspector {
    runner: Arc<dyn CommandRunner>,
    sudo: bool,
}

impl FuserInspector {
    pub fn new(runner: Arc<dyn CommandRunner>, sudo: bool) -> Self {
        Self { runner, sudo }
    }
}

#[async_trait]
impl PortInspector for FuserInspector {
    async fn owners(&self, port: u16) -> Result<Vec<u32>> {
        let mut command = CommandLine::new("fuser")
            .args(["-n", "tcp"])
            .arg(port.to_string());
        if self.sudo {
            command = command.with_sudo();
        }

        let output = self.runner.run(&command).await?;
        match output.status {
            // fuser exits 1 when no process uses the port
            0 => Ok(parse_pids(&output.stdout)),
            1 => Ok(Vec::new()),
            status => Err(OrchestratorError::CommandFailed {
                command: command.to_string(),
                status,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }
}

/// CentOS hides other users' sockets from an unprivileged fuser.
pub fn fuser_needs_sudo() -> bool {
    std::fs::read_to_string("/etc/os-release")
        .map(|release| release.contains("centos"))
        .unwrap_or(false)
}

/// Pids from fuser's stdout. Port labels go to stderr; anything that is
/// not a number is skipped.
pub fn parse_pids(stdout: &str) -> Vec<u32> {
    stdout
        .split_whitespace()
        .filter_map(|token| {
            token
                .trim_end_matches(|c: char| c.is_ascii_alphabetic())
                .parse()
                .ok()
        })
        .collect()
}

/// What the smoke check saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeReport {
    /// Storage ports with at least one listener.
    pub daemons_listening: usize,
    pub daemons_expected: usize,
    pub proxy_port: u16,
    pub proxy_listening: bool,
}

/// Counts live listeners against the expected topology. Read-only.
pub struct SmokeCheck<'a> {
    inspector: &'a dyn PortInspector,
    storage_daemons: usize,
    proxy_port: u16,
}

impl<'a> SmokeCheck<'a> {
    /// Check `storage_daemons` daemons and the first proxy.
    pub fn new(inspector: &'a dyn PortInspector, storage_daemons: usize) -> Self {
        Self {
            inspector,
            storage_daemons,
            proxy_port: proxy_port(0),
        }
    }

    pub async fn inspect(&self) -> Result<SmokeReport> {
        let mut daemons_listening = 0;
        for index in 0..self.storage_daemons {
            if !self.inspector.owners(asd_port(index)).await?.is_empty() {
                daemons_listening += 1;
            }
        }
        let proxy_listening = !self.inspector.owners(self.proxy_port).await?.is_empty();

        Ok(SmokeReport {
            daemons_listening,
            daemons_expected: self.storage_daemons,
            proxy_port: self.proxy_port,
            proxy_listening,
        })
    }

    /// Inspect and fail on any shortfall.
    pub async fn run(&self) -> Result<SmokeReport> {
        let report = self.inspect().await?;
        info!(
            daemons = report.daemons_listening,
            expected = report.daemons_expected,
            proxy = report.proxy_listening,
            "Smoke check"
        );

        if report.daemons_listening < report.daemons_expected {
            return Err(OrchestratorError::MissingDaemons {
                found: report.daemons_listening,
                expected: report.daemons_expected,
            });
        }
        if !report.proxy_listening {
            return Err(OrchestratorError::ProxyNotRunning {
                port: report.proxy_port,
            });
        }
        Ok(report)
    }
}
