//! Process launching and external command execution.
//!
//! Every external tool the orchestrator touches goes through a
//! [`CommandRunner`], so bringup and teardown can be driven against a
//! scripted runner in tests.

pub mod detach;

use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, warn};

/// An argument vector for an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_string_lossy().into_owned(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string_lossy().into_owned()));
        self
    }

    /// Prefix the whole command with `sudo`.
    pub fn with_sudo(self) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// True if the program or any argument contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.program.contains(needle) || self.args.iter().any(|a| a.contains(needle))
    }

    /// True if the program's file name or the first argument equals `name`.
    pub fn invokes(&self, name: &str) -> bool {
        let file_name = Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        file_name.as_deref() == Some(name)
            || (self.program == "sudo" && self.args.first().map(String::as_str) == Some(name))
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given status and stderr.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Stdout on success, `CommandFailed` otherwise.
    pub fn into_stdout(self, command: &CommandLine) -> Result<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(OrchestratorError::CommandFailed {
                command: command.to_string(),
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput>;

    /// Start a command in the background, appending stdout and stderr to
    /// `output`. Returns the pid when the platform reports one.
    async fn spawn_detached(&self, command: &CommandLine, output: &Path) -> Result<Option<u32>>;
}

/// Run a command and return its stdout, failing on a non-zero exit.
pub async fn run_checked(runner: &dyn CommandRunner, command: &CommandLine) -> Result<String> {
    debug!(command = %command, "Running command");
    runner.run(command).await?.into_stdout(command)
}

/// Run a command, logging instead of failing when it does not succeed.
pub async fn run_best_effort(runner: &dyn CommandRunner, command: &CommandLine) -> bool {
    match runner.run(command).await {
        Ok(output) if output.success() => true,
        Ok(output) => {
            warn!(
                command = %command,
                status = output.status,
                stderr = %output.stderr.trim(),
                "Command failed, continuing"
            );
            false
        }
        Err(e) => {
            warn!(command = %command, error = %e, "Command could not run, continuing");
            false
        }
    }
}

/// Runs commands on the local host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        let output = tokio::process::Command::new(command.program())
            .args(command.arguments())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| OrchestratorError::Spawn {
                command: command.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn_detached(&self, command: &CommandLine, output: &Path) -> Result<Option<u32>> {
        let pid = detach::spawn(command, output)?;
        crate::observability::record_launch(command.program());
        Ok(pid)
    }
}
