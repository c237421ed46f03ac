//! Detached background processes.
//!
//! A detached process gets its own session so it outlives the
//! orchestrator, reads from `/dev/null`, and appends both stdout and
//! stderr to one output file.

use super::CommandLine;
use crate::error::{OrchestratorError, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::Stdio;

/// Open `path` for appending, creating it and its parent directory.
fn open_output(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Starts `command` in the background and returns without waiting.
///
/// The returned pid is informational only; the child is not waited on and
/// may already have exited.
#[cfg(unix)]
pub fn spawn(command: &CommandLine, output: &Path) -> Result<Option<u32>> {
    let stdout_file = open_output(output)?;
    let stderr_file = stdout_file.try_clone()?;

    let mut cmd = tokio::process::Command::new(command.program());
    cmd.args(command.arguments())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file))
        .kill_on_drop(false);

    // SAFETY: setsid is async-signal-safe and the only call between fork
    // and exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|source| OrchestratorError::Spawn {
        command: command.to_string(),
        source,
    })?;

    let pid = child.id();
    tracing::info!(command = %command, output = %output.display(), pid = ?pid, "Launched detached process");
    Ok(pid)
}

/// Non-Unix stub implementation.
#[cfg(not(unix))]
pub fn spawn(_command: &CommandLine, _output: &Path) -> Result<Option<u32>> {
    Err(OrchestratorError::UnsupportedPlatform(
        "Detached processes are only supported on Unix systems".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_appends_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("logs/out.txt");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, "previous\n").unwrap();

        let cmd = CommandLine::new("sh").args(["-c", "echo to-stdout; echo to-stderr >&2"]);
        let pid = spawn(&cmd, &output).unwrap();
        assert!(pid.is_some());

        let mut content = String::new();
        for _ in 0..100 {
            content = std::fs::read_to_string(&output).unwrap();
            if content.contains("to-stderr") && content.contains("to-stdout") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(content.starts_with("previous\n"));
        assert!(content.contains("to-stdout"));
        assert!(content.contains("to-stderr"));
    }

    #[tokio::test]
    async fn test_spawn_creates_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("fresh/dir/out.txt");
        spawn(&CommandLine::new("true"), &output).unwrap();
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = spawn(&CommandLine::new("/nonexistent/binary"), &dir.path().join("out"));
        assert!(matches!(result, Err(OrchestratorError::Spawn { .. })));
    }
}
