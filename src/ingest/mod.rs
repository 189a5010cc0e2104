//! File-based ingestion of instruction blocks and prediction batches.
//!
//! The pipeline:
//!
//! 1. **Inbox**: well-known input file, atomic output file, rejected copies
//! 2. **Watcher**: wakes the polling loop when the input file changes
//!
//! # Architecture
//!
//! ```text
//! producer → instructions.json → Inbox → Dispatcher → results.json
//!                  ↓                         ↓
//!               Watcher (wake)          history.jsonl
//! ```

pub mod inbox;
pub mod watcher;

// Re-export key types
pub use inbox::{Claimed, Inbox, InboxError};
pub use watcher::{InstructionWatcher, WatchHandle, WatcherConfig, WatcherError};
