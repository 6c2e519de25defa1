//! Command execution collaborator.
//!
//! The runtime consumes the `Terminal` trait; `ProcessTerminal` is the
//! default shell-backed implementation with a concurrency cap, timeout, and
//! output limits. Safe-command vetting lives here too: read-only commands
//! are auto-approved, anything destructive goes through the approval flow.

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};
use swarm_common::Result;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OUTPUT_CHARS: usize = 50_000;

/// Command prefixes that run without user confirmation.
const SAFE_COMMAND_PREFIXES: &[&str] = &[
    "cargo test",
    "cargo check",
    "cargo build",
    "python3 -m pytest",
    "python -m pytest",
    "pytest",
    "python3 -m py_compile",
    "python -m py_compile",
    "python3 -c",
    "python -c",
    "cat ",
    "head ",
    "tail ",
    "wc ",
    "ls",
    "find ",
    "grep ",
    "rg ",
    "echo ",
    "pwd",
    "which ",
    "whoami",
    "tree ",
    "file ",
    "stat ",
    "diff ",
    "sort ",
    "uniq ",
    "node -e",
    "node --version",
    "npm list",
    "npm test",
    "npm run test",
];

/// Substrings that always require approval, regardless of prefix.
const DESTRUCTIVE_PATTERNS: &[&str] = &[
    "rm ", "rm -", "rmdir", "mv ", "cp ", "pip install", "pip3 install", "npm install",
    "yarn add", "cargo install", "brew ", "apt ", "sudo ", "chmod ", "chown ", "kill ", "pkill ",
    "curl ", "wget ", "> ", ">> ", "| tee",
];

/// Whether a terminal command may run without user confirmation.
pub fn is_safe_command(command: &str) -> bool {
    let cmd = command.trim();
    if DESTRUCTIVE_PATTERNS.iter().any(|pat| cmd.contains(pat)) {
        return false;
    }
    // Pipes smuggle arbitrary second commands past the prefix check.
    if cmd.contains('|') && !cmd.starts_with("grep ") && !cmd.starts_with("cat ") {
        return false;
    }
    SAFE_COMMAND_PREFIXES.iter().any(|p| cmd.starts_with(p))
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
    pub duration_secs: f64,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.return_code == 0 && !self.timed_out
    }
}

#[async_trait]
pub trait Terminal: Send + Sync {
    async fn execute(&self, command: &str, cwd: &Path) -> Result<CommandResult>;
}

/// Shell-backed executor with bounded concurrency and per-command timeout.
pub struct ProcessTerminal {
    semaphore: Semaphore,
    timeout: Duration,
}

impl Default for ProcessTerminal {
    fn default() -> Self {
        Self::new(3, DEFAULT_TIMEOUT)
    }
}

impl ProcessTerminal {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrent),
            timeout,
        }
    }
}

#[async_trait]
impl Terminal for ProcessTerminal {
    async fn execute(&self, command: &str, cwd: &Path) -> Result<CommandResult> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("terminal semaphore closed");
        let start = Instant::now();
        info!(command = %command, cwd = %cwd.display(), "Executing command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // Dropping the wait future on timeout must take the process
            // down with it.
            .kill_on_drop(true)
            .spawn()?;

        let mut timed_out = false;
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                timed_out = true;
                warn!(command = %command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Ok(CommandResult {
                    command: command.to_string(),
                    stdout: String::new(),
                    stderr: format!("timed out after {}s", self.timeout.as_secs()),
                    return_code: -1,
                    duration_secs: start.elapsed().as_secs_f64(),
                    timed_out,
                });
            }
        };

        let stdout = truncate(String::from_utf8_lossy(&output.stdout).into_owned());
        let stderr = truncate(String::from_utf8_lossy(&output.stderr).into_owned());
        let return_code = output.status.code().unwrap_or(-1);
        let duration_secs = start.elapsed().as_secs_f64();

        if return_code != 0 {
            warn!(command = %command, return_code, "Command failed");
        } else {
            info!(command = %command, duration_secs, "Command succeeded");
        }

        Ok(CommandResult {
            command: command.to_string(),
            stdout,
            stderr,
            return_code,
            duration_secs,
            timed_out,
        })
    }
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_OUTPUT_CHARS {
        // Keep the tail: errors show up at the end of output.
        let cut = s.len() - MAX_OUTPUT_CHARS;
        let boundary = (cut..s.len()).find(|i| s.is_char_boundary(*i)).unwrap_or(0);
        s = s.split_off(boundary);
    }
    s
}
