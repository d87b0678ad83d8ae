//! External command execution.
//!
//! A single deterministic execution per call: run the command through the
//! shell in the given working directory and capture everything. Retries and
//! timeouts are the caller's concern.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use tokio::process::Command;

/// Captured result of one command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
    /// When the command was launched (used to detect stale coverage reports).
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a shell command in `cwd` and capture its output.
///
/// The command string is passed to `sh -c`, so pipelines and shell syntax
/// work the same way they would in a terminal.
pub async fn run_command(command: &str, cwd: &Path) -> Result<CommandOutput> {
    let started_at = chrono::Utc::now();
    let start = Instant::now();

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .output()
        .await
        .with_context(|| format!("Failed to execute command: {}", command))?;

    let duration_ms = start.elapsed().as_millis() as u64;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        // Killed by a signal: no code to report
        exit_code: output.status.code().unwrap_or(-1),
        duration_ms,
        started_at,
    })
}
