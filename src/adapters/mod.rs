//! Adapter interfaces for external processes.
//!
//! Handlers and trigger actions never spawn processes directly; they go
//! through a `CommandRunner` so tests can substitute a fake.

pub mod shell;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

// Re-export the system runner
pub use shell::SystemRunner;

/// Default timeout for a single command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Description of a process to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,

    /// Arguments (not shell-interpreted)
    pub args: Vec<String>,

    /// Working directory
    pub cwd: Option<PathBuf>,

    /// Data written to stdin, then closed
    pub stdin: Option<String>,

    /// Wall-clock limit; the child is killed when it expires
    pub timeout: Duration,

    /// Run through `sudo -n`
    pub sudo: bool,
}

impl CommandSpec {
    /// A program with arguments
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            stdin: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            sudo: false,
        }
    }

    /// A command line interpreted by `sh -c`
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new("sh", ["-c".to_string(), command.into()])
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Program and arguments actually executed (after the sudo prefix)
    pub fn argv(&self) -> (String, Vec<String>) {
        if self.sudo {
            let mut args = vec!["-n".to_string(), self.program.clone()];
            args.extend(self.args.iter().cloned());
            ("sudo".to_string(), args)
        } else {
            (self.program.clone(), self.args.clone())
        }
    }

    /// Human-readable command line for logs
    pub fn display(&self) -> String {
        let (program, args) = self.argv();
        std::iter::once(program)
            .chain(args)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None if killed by a signal)
    pub exit_code: Option<i32>,

    pub stdout: String,

    pub stderr: String,

    /// Wall time
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Failures that prevented a process from finishing
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command not found: {program}")]
    NotFound { program: String },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("IO error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Trait for process runners
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Human-readable runner name
    fn name(&self) -> &str;

    /// Run a command to completion. A non-zero exit is not an error.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// Whether a program can be found on PATH
    fn is_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_spec() {
        let spec = CommandSpec::shell("echo hi");
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args, vec!["-c", "echo hi"]);
        assert_eq!(spec.display(), "sh -c echo hi");
    }

    #[test]
    fn test_sudo_prefix() {
        let spec = CommandSpec::new("cpupower", ["frequency-set", "-g", "performance"]).with_sudo(true);
        let (program, args) = spec.argv();
        assert_eq!(program, "sudo");
        assert_eq!(args, vec!["-n", "cpupower", "frequency-set", "-g", "performance"]);
    }
}
