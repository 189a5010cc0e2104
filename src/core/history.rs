//! Append-only action history with file-based persistence.
//!
//! Entries are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy debugging/inspection. Appends take an exclusive file lock so
//! concurrent processes never interleave lines.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::domain::HistoryEntry;

/// File-based history log using JSONL format
#[derive(Debug, Clone)]
pub struct HistoryLog {
    /// Path to the history.jsonl file
    path: PathBuf,
}

/// Aggregate counts over the history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub runs: usize,
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl HistoryLog {
    /// Use a history file at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Open the configured history file, creating its directory
    pub async fn open_default() -> Result<Self> {
        let path = crate::config::paths::history_file()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create history directory: {}", parent.display()))?;
        }
        Ok(Self::new(path))
    }

    /// Get the path to the history file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry to the log
    pub async fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let json = serde_json::to_string(entry).context("Failed to serialize history entry")?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open history file: {}", path.display()))?;

            file.lock_exclusive()
                .context("Failed to acquire file lock on history file")?;

            writeln!(file, "{}", json).context("Failed to write history entry")?;
            file.flush().context("Failed to flush history entry")?;

            // Lock is released when file is dropped
            Ok(())
        })
        .await
        .context("History writer task panicked")?
    }

    /// Replay all entries in order.
    ///
    /// Lines that fail to parse are skipped with a warning; one torn line
    /// must not hide the rest of the audit trail.
    pub async fn replay(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open history file: {}", self.path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut entries = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable history line"),
            }
        }

        Ok(entries)
    }

    /// The most recent `limit` entries, oldest first
    pub async fn tail(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.replay().await?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }

    /// All entries of one block execution
    pub async fn for_run(&self, run_id: Uuid) -> Result<Vec<HistoryEntry>> {
        let entries = self.replay().await?;
        Ok(entries.into_iter().filter(|e| e.run_id == run_id).collect())
    }

    /// Count entries by outcome
    pub async fn summary(&self) -> Result<HistorySummary> {
        let entries = self.replay().await?;

        let mut runs: Vec<Uuid> = entries.iter().map(|e| e.run_id).collect();
        runs.sort();
        runs.dedup();

        Ok(HistorySummary {
            total: entries.len(),
            succeeded: entries.iter().filter(|e| e.success).count(),
            failed: entries.iter().filter(|e| !e.success).count(),
            runs: runs.len(),
            last_timestamp: entries.last().map(|e| e.timestamp),
        })
    }
}

/// Hash input content (first 16 chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8]) // First 16 hex chars (8 bytes)
}
