//! Single-file inbox: a well-known input path and its output path.
//!
//! A producer drops a JSON document at the input path. The consumer reads
//! it once it has stopped changing, writes its answer atomically to the
//! output path and removes the input. Inputs that cannot be processed are
//! copied into a rejected directory first.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Errors that can occur with the inbox
#[derive(Debug, Error)]
pub enum InboxError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

impl InboxError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A claimed input document
#[derive(Debug, Clone)]
pub struct Claimed {
    pub content: String,
    /// Size of the file on disk in bytes
    pub size: u64,
    /// Over the read limit; `content` is empty and the file was left in place
    pub oversized: bool,
}

/// Input/output file pair
#[derive(Debug, Clone)]
pub struct Inbox {
    input_path: PathBuf,
    output_path: PathBuf,
    rejected_dir: PathBuf,
    settle_delay: Duration,
}

impl Inbox {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>, rejected_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            rejected_dir: rejected_dir.into(),
            settle_delay: Duration::ZERO,
        }
    }

    /// The configured instruction inbox
    pub fn instructions_default() -> anyhow::Result<Self> {
        let config = crate::config::config()?;
        Ok(Self::new(
            config.instructions_path.clone(),
            config.results_path.clone(),
            crate::config::paths::rejected_dir_in(&config.home),
        )
        .with_settle_delay(Duration::from_millis(500)))
    }

    /// Ignore inputs modified more recently than `delay`
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn rejected_dir(&self) -> &Path {
        &self.rejected_dir
    }

    /// Read the input if present and settled
    pub async fn take(&self) -> Result<Option<Claimed>, InboxError> {
        self.claim(None).await
    }

    /// Like [`take`](Self::take), but never reads more than `max_bytes`.
    ///
    /// Larger files come back as `oversized` without their content.
    pub async fn take_bounded(&self, max_bytes: u64) -> Result<Option<Claimed>, InboxError> {
        self.claim(Some(max_bytes)).await
    }

    async fn claim(&self, max_bytes: Option<u64>) -> Result<Option<Claimed>, InboxError> {
        let metadata = match fs::metadata(&self.input_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(InboxError::io(&self.input_path, e)),
        };

        if !metadata.is_file() {
            return Ok(None);
        }

        if !self.settle_delay.is_zero() {
            let modified = metadata
                .modified()
                .map_err(|e| InboxError::io(&self.input_path, e))?;
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO);
            if age < self.settle_delay {
                tracing::debug!(path = %self.input_path.display(), "Input still settling");
                return Ok(None);
            }
        }

        let oversized = |size| Claimed {
            content: String::new(),
            size,
            oversized: true,
        };

        if let Some(max) = max_bytes {
            if metadata.len() > max {
                return Ok(Some(oversized(metadata.len())));
            }
        }

        let file = match fs::File::open(&self.input_path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(InboxError::io(&self.input_path, e)),
        };

        // The file may have grown since the metadata call
        let mut bytes = Vec::new();
        match max_bytes {
            Some(max) => {
                file.take(max.saturating_add(1))
                    .read_to_end(&mut bytes)
                    .await
                    .map_err(|e| InboxError::io(&self.input_path, e))?;
                if bytes.len() as u64 > max {
                    return Ok(Some(oversized(bytes.len() as u64)));
                }
            }
            None => {
                let mut file = file;
                file.read_to_end(&mut bytes)
                    .await
                    .map_err(|e| InboxError::io(&self.input_path, e))?;
            }
        }

        Ok(Some(Claimed {
            size: bytes.len() as u64,
            content: String::from_utf8_lossy(&bytes).into_owned(),
            oversized: false,
        }))
    }

    /// Atomically replace the output file with `value` as pretty JSON
    pub async fn write_output<T: Serialize>(&self, value: &T) -> Result<(), InboxError> {
        let json = serde_json::to_string_pretty(value)?;
        let output_path = self.output_path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&output_path, json.as_bytes()))
            .await
            .map_err(|e| InboxError::io(&self.output_path, std::io::Error::other(e)))?
    }

    /// Remove the input; a missing file is fine
    pub async fn remove_input(&self) -> Result<(), InboxError> {
        match fs::remove_file(&self.input_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(InboxError::io(&self.input_path, e)),
        }
    }

    /// Move the input itself into the rejected directory
    pub async fn reject_input(&self) -> Result<PathBuf, InboxError> {
        let target = self.rejected_target().await?;
        fs::rename(&self.input_path, &target)
            .await
            .map_err(|e| InboxError::io(&self.input_path, e))?;
        Ok(target)
    }

    /// Copy rejected content into the rejected directory, returning its path
    pub async fn reject(&self, content: &str) -> Result<PathBuf, InboxError> {
        let target = self.rejected_target().await?;
        fs::write(&target, content)
            .await
            .map_err(|e| InboxError::io(&target, e))?;

        Ok(target)
    }

    async fn rejected_target(&self) -> Result<PathBuf, InboxError> {
        fs::create_dir_all(&self.rejected_dir)
            .await
            .map_err(|e| InboxError::io(&self.rejected_dir, e))?;

        let file_name = self
            .input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input.json".to_string());
        Ok(self.rejected_dir.join(format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            file_name
        )))
    }
}

/// Write through a temp file in the same directory, then rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), InboxError> {
    use std::io::Write;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| InboxError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| InboxError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| InboxError::io(path, e))?;
    tmp.flush().map_err(|e| InboxError::io(path, e))?;
    tmp.persist(path).map_err(|source| InboxError::Persist {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
