//! Canonical paths for the omnitide state directory.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Layout
//!
//! | Location | Writer | Purpose |
//! |----------|--------|---------|
//! | `instructions.json` | external producer | Next instruction block |
//! | `results.json` | dispatcher | Result of the last block |
//! | `history.jsonl` | dispatcher | Per-action audit log |
//! | `rejected/` | dispatcher | Copies of unparseable instruction files |
//! | `predictions.json` | external predictor | Next batch for `trigger listen` |

use std::path::{Path, PathBuf};

use anyhow::Result;

/// JSONL audit history
pub fn history_file() -> Result<PathBuf> {
    Ok(crate::config::config()?.history_path.clone())
}

/// Default predictions file for `trigger listen`
pub fn predictions_file() -> Result<PathBuf> {
    Ok(crate::config::omnitide_home()?.join("predictions.json"))
}

/// Dead-letter directory under an arbitrary home
pub fn rejected_dir_in(home: &Path) -> PathBuf {
    home.join("rejected")
}
