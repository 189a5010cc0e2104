//! Audit history entries.
//!
//! Every executed action is recorded as one immutable line in an
//! append-only JSONL log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default length of stdout/stderr snippets kept in the history
pub const DEFAULT_SNIPPET_CHARS: usize = 1000;

/// A single line in the history log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique identifier for this entry
    pub id: Uuid,

    /// When this entry was recorded (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The block execution this entry belongs to
    pub run_id: Uuid,

    /// `step_id` of the instruction block
    pub step_id: String,

    /// Position of the action in its block (None for block-level entries)
    pub action_index: Option<usize>,

    /// Handler key, or "block" for block-level entries
    pub action_type: String,

    /// Command line for process-spawning actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Process exit code, if a process ran to completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Whether the action succeeded
    pub success: bool,

    /// Truncated standard output
    #[serde(default)]
    pub stdout_snippet: String,

    /// Truncated standard error
    #[serde(default)]
    pub stderr_snippet: String,

    /// Time taken in milliseconds
    pub duration_ms: u64,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEntry {
    /// Create an entry for an action with the current timestamp
    pub fn new(
        run_id: Uuid,
        step_id: impl Into<String>,
        action_index: Option<usize>,
        action_type: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            step_id: step_id.into(),
            action_index,
            action_type: action_type.into(),
            command: None,
            exit_code: None,
            success,
            stdout_snippet: String::new(),
            stderr_snippet: String::new(),
            duration_ms: 0,
            error: None,
        }
    }

    /// Record the command line
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Record the exit code
    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Record stdout/stderr, truncated to `max_chars` each
    pub fn with_output(mut self, stdout: &str, stderr: &str, max_chars: usize) -> Self {
        self.stdout_snippet = truncate_chars(stdout, max_chars);
        self.stderr_snippet = truncate_chars(stderr, max_chars);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Keep at most `max_chars` characters, never splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
