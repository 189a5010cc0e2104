//! Safety limits for instruction processing.
//!
//! Prevents runaway or dangerous blocks through configurable limits on:
//! - Instruction file size
//! - Number of actions per block
//! - Denylist patterns for paths touched by file handlers

use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::InstructionBlock;

/// Safety limits for the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum number of actions per block (default: 100)
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,

    /// Maximum size of an instruction file in bytes (default: 1MB)
    #[serde(default = "default_max_instruction_bytes")]
    pub max_instruction_bytes: u64,

    /// Glob patterns for paths that file handlers refuse to touch
    #[serde(default = "default_denylist")]
    pub denylist_patterns: Vec<String>,
}

fn default_max_actions() -> usize {
    100
}
fn default_max_instruction_bytes() -> u64 {
    1024 * 1024
} // 1MB

fn default_denylist() -> Vec<String> {
    vec![
        "**/.env*".to_string(),
        "**/secrets*".to_string(),
        "**/*credential*".to_string(),
        "**/*.pem".to_string(),
        "**/*.key".to_string(),
        "/etc/shadow".to_string(),
        "/etc/sudoers*".to_string(),
    ]
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_actions: default_max_actions(),
            max_instruction_bytes: default_max_instruction_bytes(),
            denylist_patterns: default_denylist(),
        }
    }
}

impl SafetyLimits {
    /// Check if a path matches any denylist pattern
    pub fn is_denylisted(&self, path: &str) -> bool {
        self.denylist_patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .any(|pattern| pattern.matches(path))
    }

    /// Validate raw instruction file size before parsing
    pub fn validate_input_size(&self, size: u64) -> Result<(), SafetyViolation> {
        if size > self.max_instruction_bytes {
            return Err(SafetyViolation::MaxInstructionBytes {
                actual: size,
                limit: self.max_instruction_bytes,
            });
        }
        Ok(())
    }

    /// Validate a parsed block against the action count limit
    pub fn validate_block(&self, block: &InstructionBlock) -> Result<(), SafetyViolation> {
        if block.actions.len() > self.max_actions {
            return Err(SafetyViolation::MaxActions {
                actual: block.actions.len(),
                limit: self.max_actions,
            });
        }
        Ok(())
    }

    /// Validate a path a handler is about to touch.
    ///
    /// Both the path as given and its lexically normalized form must pass.
    /// Symlinks are not resolved.
    pub fn validate_path(&self, path: &Path) -> Result<(), SafetyViolation> {
        let raw = path.to_string_lossy();
        let normalized = normalize_lexically(path);
        let normalized = normalized.to_string_lossy();
        if self.is_denylisted(&raw) || self.is_denylisted(&normalized) {
            return Err(SafetyViolation::DenylistMatch {
                path: raw.to_string(),
            });
        }
        Ok(())
    }
}

/// Drop `.` and resolve `..` without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Safety violation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SafetyViolation {
    #[error("Maximum actions exceeded: {actual} > {limit}")]
    MaxActions { actual: usize, limit: usize },

    #[error("Instruction file too large: {actual} > {limit} bytes")]
    MaxInstructionBytes { actual: u64, limit: u64 },

    #[error("Path matches denylist pattern: {path}")]
    DenylistMatch { path: String },
}
