//! Results of executing instruction blocks.
//!
//! An `OverallResult` is written to the results file once per processed
//! block. It is immutable after construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Outcome of a single action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Position of the action within its block
    pub index: usize,

    /// Handler key that ran
    pub action_type: String,

    /// Whether the handler reported success
    pub success: bool,

    /// Handler output (shape depends on the handler)
    #[serde(default)]
    pub output: Value,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Exit code for actions that spawned a process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Wall time spent in the handler
    pub duration_seconds: f64,

    /// When the action finished
    pub timestamp: DateTime<Utc>,
}

impl ActionResult {
    /// A successful action
    pub fn succeeded(
        index: usize,
        action_type: impl Into<String>,
        output: Value,
        duration_seconds: f64,
    ) -> Self {
        Self {
            index,
            action_type: action_type.into(),
            success: true,
            output,
            error: None,
            exit_code: None,
            duration_seconds: duration_seconds.max(0.0),
            timestamp: Utc::now(),
        }
    }

    /// A failed action
    pub fn failed(
        index: usize,
        action_type: impl Into<String>,
        error: impl Into<String>,
        duration_seconds: f64,
    ) -> Self {
        Self {
            index,
            action_type: action_type.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            exit_code: None,
            duration_seconds: duration_seconds.max(0.0),
            timestamp: Utc::now(),
        }
    }

    /// Attach a process exit code
    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Attach output to a failure (partial stdout/stderr)
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }
}

/// Aggregate outcome of one instruction block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallResult {
    run_id: Uuid,
    step_id: String,
    overall_success: bool,
    results: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_hash: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_seconds: f64,
}

impl OverallResult {
    /// Aggregate action results.
    ///
    /// `overall_success` is the AND of all children. The dispatcher stops at
    /// the first failure, so a failing result is always the last one.
    pub fn from_results(
        run_id: Uuid,
        step_id: impl Into<String>,
        results: Vec<ActionResult>,
        started_at: DateTime<Utc>,
        input_hash: Option<String>,
    ) -> Self {
        let overall_success = results.iter().all(|r| r.success);
        let error = results
            .iter()
            .find(|r| !r.success)
            .map(|r| {
                format!(
                    "Action {} ({}) failed: {}",
                    r.index,
                    r.action_type,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            });

        Self::finish(run_id, step_id.into(), overall_success, results, error, started_at, input_hash)
    }

    /// A block that failed before any action ran (malformed input, unknown type, limits)
    pub fn block_failure(
        run_id: Uuid,
        step_id: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        input_hash: Option<String>,
    ) -> Self {
        Self::finish(
            run_id,
            step_id.into(),
            false,
            Vec::new(),
            Some(error.into()),
            started_at,
            input_hash,
        )
    }

    fn finish(
        run_id: Uuid,
        step_id: String,
        overall_success: bool,
        results: Vec<ActionResult>,
        error: Option<String>,
        started_at: DateTime<Utc>,
        input_hash: Option<String>,
    ) -> Self {
        let finished_at = Utc::now();
        let duration_seconds = (finished_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            run_id,
            step_id,
            overall_success,
            results,
            error,
            input_hash,
            started_at,
            finished_at,
            duration_seconds,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn overall_success(&self) -> bool {
        self.overall_success
    }

    pub fn results(&self) -> &[ActionResult] {
        &self.results
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn input_hash(&self) -> Option<&str> {
        self.input_hash.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }
}
