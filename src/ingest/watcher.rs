//! Inbox file watcher.
//!
//! Watches the directory containing an inbox file and sends a wake-up
//! signal whenever that file is created or modified, so the polling loop
//! can react before its next tick.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Watched path has no file name: {0}")]
    NoFileName(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// Configuration for the watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// File whose changes wake the loop
    pub target: PathBuf,

    /// Debounce window for filesystem events
    pub debounce: Duration,
}

impl WatcherConfig {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            debounce: Duration::from_millis(500),
        }
    }

    /// Directory that must exist to be watched
    pub fn watch_dir(&self) -> &Path {
        self.target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
    }

    /// Check the watch directory exists
    pub fn validate(&self) -> Result<(), WatcherError> {
        if self.target.file_name().is_none() {
            return Err(WatcherError::NoFileName(self.target.clone()));
        }
        let dir = self.watch_dir();
        if !dir.is_dir() {
            return Err(WatcherError::DirectoryNotFound(dir.to_path_buf()));
        }
        Ok(())
    }
}

/// Keeps the underlying watcher alive; dropping it stops wake-ups
pub struct WatchHandle {
    _debouncer: Debouncer<RecommendedWatcher>,
}

/// Watcher for a single inbox file
pub struct InstructionWatcher {
    config: WatcherConfig,
}

impl InstructionWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Start watching. Each relevant change sends one `()`; bursts coalesce
    /// because the channel holds a single pending signal.
    pub fn watch(&self) -> Result<(mpsc::Receiver<()>, WatchHandle), WatcherError> {
        self.config.validate()?;

        let (wake_tx, wake_rx) = mpsc::channel::<()>(1);
        let target_name = self
            .config
            .target
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| WatcherError::NoFileName(self.config.target.clone()))?;

        let mut debouncer = new_debouncer(self.config.debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    if events.iter().any(|e| is_target(&e.path, &target_name)) {
                        // Full channel means a wake-up is already pending
                        let _ = wake_tx.try_send(());
                    }
                }
                Err(e) => tracing::warn!("Watcher error: {:?}", e),
            }
        })?;

        debouncer
            .watcher()
            .watch(self.config.watch_dir(), RecursiveMode::NonRecursive)?;

        tracing::info!("Watching {} for instructions", self.config.target.display());

        Ok((wake_rx, WatchHandle { _debouncer: debouncer }))
    }
}

/// Whether an event path refers to the watched file
fn is_target(path: &Path, target_name: &OsString) -> bool {
    path.file_name().map(|n| n == target_name.as_os_str()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_target() {
        let name = OsString::from("instructions.json");
        assert!(is_target(Path::new("/srv/omnitide/instructions.json"), &name));
        assert!(!is_target(Path::new("/srv/omnitide/results.json"), &name));
        assert!(!is_target(Path::new("/"), &name));
    }

    #[test]
    fn test_validate_missing_directory() {
        let config = WatcherConfig::new("/definitely/not/here/instructions.json");
        assert!(matches!(
            config.validate(),
            Err(WatcherError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_validate_existing_directory() {
        let temp = TempDir::new().unwrap();
        let config = WatcherConfig::new(temp.path().join("instructions.json"));
        assert!(config.validate().is_ok());
        assert_eq!(config.watch_dir(), temp.path());
    }
}
