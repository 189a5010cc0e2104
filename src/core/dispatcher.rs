//! Polling dispatcher for instruction blocks.
//!
//! Reads one block at a time from the inbox, runs its actions in order
//! through the handler registry, records one history line per action and
//! writes an `OverallResult` to the output file.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{CommandRunner, SystemRunner};
use crate::config::DispatcherSettings;
use crate::domain::{truncate_chars, ActionResult, HistoryEntry, InstructionBlock, OverallResult};
use crate::ingest::Inbox;

use super::history::{hash_input, HistoryLog};
use super::registry::{HandlerContext, HandlerError, HandlerRegistry};

/// `action_type` recorded for block-level history lines
pub const BLOCK_ENTRY_TYPE: &str = "block";

/// How a block was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Actions were run (the result may still be a failure)
    Executed,
    /// Well-formed but refused before any action ran
    Refused,
    /// Could not be parsed as an instruction block
    Malformed,
}

/// A processed block and what happened to it
#[derive(Debug, Clone)]
pub struct Processed {
    pub result: OverallResult,
    pub disposition: Disposition,
}

/// Sequential, fail-fast instruction dispatcher
pub struct Dispatcher {
    registry: HandlerRegistry,
    runner: Arc<dyn CommandRunner>,
    settings: DispatcherSettings,
    history: HistoryLog,
}

impl Dispatcher {
    pub fn new(
        registry: HandlerRegistry,
        runner: Arc<dyn CommandRunner>,
        settings: DispatcherSettings,
        history: HistoryLog,
    ) -> Self {
        Self {
            registry,
            runner,
            settings,
            history,
        }
    }

    /// Dispatcher with built-in handlers, the system runner and configured paths
    pub async fn from_config() -> Result<Self> {
        let config = crate::config::config()?;
        let history = HistoryLog::open_default().await?;

        Ok(Self::new(
            HandlerRegistry::with_builtins(),
            Arc::new(SystemRunner::new()),
            config.dispatcher.clone(),
            history,
        ))
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Parse and run raw instruction text
    pub async fn process_content(&self, content: &str) -> Result<Processed> {
        self.process_input(content, content.len() as u64).await
    }

    /// `size` is the on-disk byte count, checked before anything is parsed
    #[instrument(skip(self, content), fields(bytes = size))]
    async fn process_input(&self, content: &str, size: u64) -> Result<Processed> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let input_hash = Some(hash_input(content));

        if let Err(violation) = self.settings.limits.validate_input_size(size) {
            let step_id = best_effort_step_id(content);
            let result = self
                .refuse(run_id, &step_id, violation.to_string(), started_at, input_hash)
                .await;
            return Ok(Processed {
                result,
                disposition: Disposition::Refused,
            });
        }

        let block = match InstructionBlock::from_json(content) {
            Ok(block) => block,
            Err(e) => {
                let step_id = best_effort_step_id(content);
                warn!(%run_id, step_id = %step_id, error = %e, "Malformed instruction block");
                let result = self
                    .refuse(run_id, &step_id, e.to_string(), started_at, input_hash)
                    .await;
                return Ok(Processed {
                    result,
                    disposition: Disposition::Malformed,
                });
            }
        };

        self.run_block(run_id, &block, started_at, input_hash).await
    }

    /// Run an already-parsed block
    pub async fn execute(&self, block: &InstructionBlock) -> Result<OverallResult> {
        let processed = self
            .run_block(Uuid::new_v4(), block, Utc::now(), None)
            .await?;
        Ok(processed.result)
    }

    async fn run_block(
        &self,
        run_id: Uuid,
        block: &InstructionBlock,
        started_at: DateTime<Utc>,
        input_hash: Option<String>,
    ) -> Result<Processed> {
        let refusal = match block.validate() {
            Err(e) => Some(e.to_string()),
            Ok(()) => match self.settings.limits.validate_block(block) {
                Err(violation) => Some(violation.to_string()),
                Ok(()) => self.preflight(block),
            },
        };

        if let Some(reason) = refusal {
            warn!(%run_id, step_id = %block.step_id, reason = %reason, "Refusing instruction block");
            let result = self
                .refuse(run_id, &block.step_id, reason, started_at, input_hash)
                .await;
            return Ok(Processed {
                result,
                disposition: Disposition::Refused,
            });
        }

        let result = self
            .execute_actions(run_id, block, started_at, input_hash)
            .await;

        Ok(Processed {
            result,
            disposition: Disposition::Executed,
        })
    }

    /// Unknown action types fail the block before anything runs
    fn preflight(&self, block: &InstructionBlock) -> Option<String> {
        let unknown: Vec<&str> = block
            .action_types()
            .into_iter()
            .filter(|t| !self.registry.contains(t))
            .collect();

        if unknown.is_empty() {
            None
        } else {
            Some(format!("Unknown action type(s): {}", unknown.join(", ")))
        }
    }

    #[instrument(skip_all, fields(%run_id, step_id = %block.step_id))]
    async fn execute_actions(
        &self,
        run_id: Uuid,
        block: &InstructionBlock,
        started_at: DateTime<Utc>,
        input_hash: Option<String>,
    ) -> OverallResult {
        info!(actions = block.actions.len(), "Executing instruction block");

        let mut ctx = HandlerContext::new(self.settings.clone(), Arc::clone(&self.runner));
        ctx.use_sudo = block.use_sudo_for_block;

        let timeout = self.settings.action_timeout();
        let snippet = self.settings.snippet_chars;
        let mut results = Vec::with_capacity(block.actions.len());

        for (index, action) in block.actions.iter().enumerate() {
            let action_type = action.action_type.as_str();
            let Some(handler) = self.registry.get(action_type) else {
                // Preflight already rejected unknown types; registry is immutable here
                let result = ActionResult::failed(index, action_type, "Unknown action type", 0.0);
                results.push(result);
                break;
            };

            let params = ctx.interpolate_params(&action.params);
            debug!(index, action_type, "Running action");

            let action_start = Instant::now();
            let outcome = match tokio::time::timeout(timeout, handler.execute(&params, &mut ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(HandlerError::Timeout(timeout)),
            };
            let elapsed = action_start.elapsed();

            let mut entry = HistoryEntry::new(run_id, &block.step_id, Some(index), action_type, outcome.is_ok())
                .with_duration(elapsed.as_millis() as u64);

            let result = match outcome {
                Ok(output) => {
                    if let Some(command) = output.command {
                        entry = entry.with_command(command);
                    }
                    entry = entry
                        .with_exit_code(output.exit_code)
                        .with_output(&output.stdout, &output.stderr, snippet);

                    ActionResult::succeeded(index, action_type, output.value, elapsed.as_secs_f64())
                        .with_exit_code(output.exit_code)
                }
                Err(err) => {
                    warn!(index, action_type, kind = err.kind(), error = %err, "Action failed");
                    let (detail, exit_code) = failure_detail(&err, snippet);

                    if let HandlerError::CommandFailed {
                        command,
                        stdout,
                        stderr,
                        ..
                    } = &err
                    {
                        entry = entry
                            .with_command(command.clone())
                            .with_output(stdout, stderr, snippet);
                    }
                    entry = entry.with_exit_code(exit_code).with_error(err.to_string());

                    ActionResult::failed(index, action_type, err.to_string(), elapsed.as_secs_f64())
                        .with_exit_code(exit_code)
                        .with_output(detail)
                }
            };

            self.record(&entry).await;

            let failed = !result.success;
            results.push(result);
            if failed {
                break;
            }
        }

        for line in &ctx.audit_trail {
            debug!(audit = %line);
        }

        let result = OverallResult::from_results(run_id, &block.step_id, results, started_at, input_hash);
        info!(
            success = result.overall_success(),
            executed = result.results().len(),
            duration_s = result.duration_seconds(),
            "Instruction block finished"
        );
        result
    }

    /// Build a block-level failure and record it
    async fn refuse(
        &self,
        run_id: Uuid,
        step_id: &str,
        reason: String,
        started_at: DateTime<Utc>,
        input_hash: Option<String>,
    ) -> OverallResult {
        let entry = HistoryEntry::new(run_id, step_id, None, BLOCK_ENTRY_TYPE, false).with_error(reason.clone());
        self.record(&entry).await;
        OverallResult::block_failure(run_id, step_id, reason, started_at, input_hash)
    }

    /// History write failures must not abort the block
    async fn record(&self, entry: &HistoryEntry) {
        if let Err(e) = self.history.append(entry).await {
            error!(error = %e, path = %self.history.path().display(), "Failed to append history entry");
        }
    }

    /// Process the inbox input if there is one.
    ///
    /// The result is written before the input is removed. Refused or
    /// malformed inputs are copied to the rejected directory first.
    pub async fn poll_once(&self, inbox: &Inbox) -> Result<Option<OverallResult>> {
        let Some(claimed) = inbox
            .take_bounded(self.settings.limits.max_instruction_bytes)
            .await
            .context("Failed to read instruction file")?
        else {
            return Ok(None);
        };
        debug!(bytes = claimed.size, path = %inbox.input_path().display(), "Claimed instruction file");

        let processed = self.process_input(&claimed.content, claimed.size).await?;

        let mut rejected = false;
        if processed.disposition != Disposition::Executed {
            let copy = if claimed.oversized {
                inbox.reject_input().await
            } else {
                inbox.reject(&claimed.content).await
            }
            .context("Failed to store rejected instruction file")?;
            warn!(path = %copy.display(), "Rejected instruction file kept");
            rejected = true;
        }

        // The block has run: the input goes away even when the result
        // cannot be written, so it is never executed twice.
        if let Err(e) = inbox.write_output(&processed.result).await {
            error!(error = %e, run_id = %processed.result.run_id(), "Failed to write result file");
            if !rejected {
                match inbox.reject(&claimed.content).await {
                    Ok(copy) => warn!(path = %copy.display(), "Instruction file kept after result write failure"),
                    Err(e) => error!(error = %e, "Failed to store instruction file"),
                }
            }
            inbox
                .remove_input()
                .await
                .context("Failed to remove instruction file")?;
            return Err(anyhow::Error::new(e).context("Failed to write result file"));
        }

        inbox
            .remove_input()
            .await
            .context("Failed to remove instruction file")?;

        Ok(Some(processed.result))
    }

    /// Poll until `shutdown` resolves, returning the number of blocks processed.
    ///
    /// `wake` signals (from the file watcher) cut the poll sleep short.
    /// Shutdown is observed between blocks, never in the middle of one.
    pub async fn listen<F>(
        &self,
        inbox: &Inbox,
        mut wake: Option<mpsc::Receiver<()>>,
        shutdown: F,
    ) -> Result<usize>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval = self.settings.poll_interval();
        let mut processed = 0usize;

        info!(
            input = %inbox.input_path().display(),
            output = %inbox.output_path().display(),
            interval_s = interval.as_secs(),
            "Dispatcher listening"
        );

        loop {
            match self.poll_once(inbox).await {
                Ok(Some(result)) => {
                    processed += 1;
                    info!(
                        step_id = %result.step_id(),
                        success = result.overall_success(),
                        "Processed instruction file"
                    );
                }
                Ok(None) => {}
                Err(e) => error!(error = %format!("{:#}", e), "Poll failed"),
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!(processed, "Dispatcher stopping");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
                _ = wait_for_wake(&mut wake) => {
                    debug!("Woken by file watcher");
                }
            }
        }

        Ok(processed)
    }
}

/// Resolve on the next wake signal; never resolve once the sender is gone
async fn wait_for_wake(wake: &mut Option<mpsc::Receiver<()>>) {
    let closed = match wake.as_mut() {
        Some(rx) => rx.recv().await.is_none(),
        None => true,
    };
    if closed {
        *wake = None;
        std::future::pending::<()>().await;
    }
}

/// `step_id` from JSON that failed to parse as a block, or "unknown"
fn best_effort_step_id(content: &str) -> String {
    serde_json::from_str::<Value>(content)
        .ok()
        .and_then(|v| {
            v.get("step_id")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Structured output and exit code for a failed action
fn failure_detail(err: &HandlerError, snippet: usize) -> (Value, Option<i32>) {
    match err {
        HandlerError::CommandFailed {
            exit_code,
            stdout,
            stderr,
            ..
        } => (
            json!({
                "kind": err.kind(),
                "exit_code": exit_code,
                "stdout": truncate_chars(stdout, snippet),
                "stderr": truncate_chars(stderr, snippet),
            }),
            *exit_code,
        ),
        _ => (json!({ "kind": err.kind() }), None),
    }
}
