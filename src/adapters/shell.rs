//! Subprocess runner backed by `tokio::process`.
//!
//! Children are spawned with `kill_on_drop`, so a timeout kills the
//! process instead of leaving it running in the background.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{CommandError, CommandOutput, CommandRunner, CommandSpec};

/// Runs commands on the local system
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    fn name(&self) -> &str {
        "system"
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let (program, args) = spec.argv();
        let command_line = spec.display();
        let started = Instant::now();

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref cwd) = spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                CommandError::NotFound {
                    program: program.clone(),
                }
            } else {
                CommandError::Spawn {
                    command: command_line.clone(),
                    source,
                }
            }
        })?;

        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|source| CommandError::Io {
                    command: command_line.clone(),
                    source,
                })?;
            // Drop stdin to signal EOF
        }

        // Dropping the wait future on timeout drops the child, which kills it
        let output = timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| CommandError::TimedOut {
                command: command_line.clone(),
                timeout: spec.timeout,
            })?
            .map_err(|source| CommandError::Io {
                command: command_line.clone(),
                source,
            })?;

        tracing::debug!(command = %command_line, exit_code = ?output.status.code(), "Command finished");

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        })
    }
}
