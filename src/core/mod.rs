//! Core dispatch logic.
//!
//! This module contains:
//! - History: Append-only action log
//! - Safety: Instruction limits and path denylist
//! - Registry: Handler table and per-block context
//! - Handlers: Built-in action handlers
//! - Dispatcher: Sequential, fail-fast block execution

pub mod dispatcher;
pub mod handlers;
pub mod history;
pub mod registry;
pub mod safety;

// Re-export commonly used types
pub use dispatcher::{Disposition, Dispatcher, Processed};
pub use history::{hash_input, HistoryLog, HistorySummary};
pub use registry::{ActionHandler, HandlerContext, HandlerError, HandlerOutput, HandlerRegistry};
pub use safety::{SafetyLimits, SafetyViolation};
