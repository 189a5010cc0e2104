//! omnitide - Proactive system tuning and file-based instruction dispatch
//!
//! Two cooperating pieces:
//! - A proactive trigger that turns intent predictions into system tuning
//!   actions, gated by confidence, risk and a per-intent cooldown
//! - A polling dispatcher that executes JSON instruction blocks dropped at
//!   a well-known path and records every action in a JSONL history
//!
//! # Modules
//!
//! - `adapters`: Process execution (timeouts, sudo, kill on drop)
//! - `core`: Dispatcher, handler registry, history, safety limits
//! - `domain`: Data structures (InstructionBlock, OverallResult, Prediction)
//! - `ingest`: Inbox files and the file watcher
//! - `trigger`: Gating, risk model, cooldowns, tuning actions
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the dispatcher loop
//! omnitide listen
//!
//! # Execute one block without deleting it
//! omnitide process-once block.json
//!
//! # Evaluate predictions
//! omnitide trigger evaluate predictions.json --dry-run
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod trigger;

// Re-export main types at crate root for convenience
pub use core::{Dispatcher, HandlerRegistry, HistoryLog};
pub use domain::{Action, ActionResult, HistoryEntry, InstructionBlock, OverallResult, Prediction};
pub use trigger::{ProactiveActionTrigger, TriggerDecision};
