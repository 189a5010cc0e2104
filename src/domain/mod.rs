//! Domain types for omnitide.
//!
//! This module contains the core data structures:
//! - Instructions: blocks of actions read from the inbox
//! - Results: per-action and per-block outcomes
//! - Events: audit history lines
//! - Predictions: intent predictions fed to the trigger

pub mod events;
pub mod instruction;
pub mod prediction;
pub mod result;

// Re-export commonly used types
pub use events::{truncate_chars, HistoryEntry, DEFAULT_SNIPPET_CHARS};
pub use instruction::{Action, InstructionBlock, InstructionError};
pub use prediction::{Prediction, PredictionBatch, PredictionMetadata, LOAD_SENSITIVE_INTENTS};
pub use result::{ActionResult, OverallResult};
