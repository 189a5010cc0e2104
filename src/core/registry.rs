//! Handler registry and the context handed to each handler.
//!
//! The registry maps an action's `type` string to a handler. It is built
//! explicitly at startup and owned by the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::adapters::{CommandError, CommandRunner};
use crate::config::DispatcherSettings;

use super::safety::{SafetyLimits, SafetyViolation};

/// Errors a handler can return
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with code {exit_code:?}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Action timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Denied(#[from] SafetyViolation),
}

impl HandlerError {
    /// Short machine-readable category
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => "invalid_params",
            Self::Io { .. } => "io",
            Self::CommandFailed { .. } => "command_failed",
            Self::Command(CommandError::TimedOut { .. }) | Self::Timeout(_) => "timeout",
            Self::Command(CommandError::NotFound { .. }) => "not_found",
            Self::Command(_) => "command",
            Self::Denied(_) => "denied",
        }
    }

    /// Wrap an IO error with the path it concerns
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Successful handler output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    /// Structured output stored in the action result
    pub value: Value,

    /// Command line, for process-spawning handlers
    pub command: Option<String>,

    pub exit_code: Option<i32>,

    pub stdout: String,

    pub stderr: String,
}

impl HandlerOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }
}

/// Mutable state shared by all handlers of one block
pub struct HandlerContext {
    /// Dispatcher settings in effect
    pub settings: DispatcherSettings,

    /// Variables any handler may read or write
    pub variables: HashMap<String, Value>,

    /// Human-readable record of what handlers did
    pub audit_trail: Vec<String>,

    /// Whether the block asked for sudo
    pub use_sudo: bool,

    /// Process runner
    pub runner: Arc<dyn CommandRunner>,
}

impl HandlerContext {
    pub fn new(settings: DispatcherSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            settings,
            variables: HashMap::new(),
            audit_trail: Vec::new(),
            use_sudo: false,
            runner,
        }
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.settings.limits
    }

    /// Append to the audit trail
    pub fn audit(&mut self, message: impl Into<String>) {
        self.audit_trail.push(message.into());
    }

    /// Replace `${name}` in a string with the variable's value
    pub fn interpolate(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.variables.get(name) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(other) => out.push_str(&other.to_string()),
                        None => {
                            out.push_str("${");
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// Interpolate every string inside a params object
    pub fn interpolate_params(&self, params: &Map<String, Value>) -> Map<String, Value> {
        params
            .iter()
            .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
            .collect()
    }

    fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.interpolate(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect()),
            Value::Object(map) => Value::Object(self.interpolate_params(map)),
            other => other.clone(),
        }
    }
}

/// A handler for one action type
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Registry key
    fn name(&self) -> &str;

    /// Execute the action
    async fn execute(
        &self,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext,
    ) -> Result<HandlerOutput, HandlerError>;
}

/// String-keyed handler table
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in handler
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::handlers::register_builtins(&mut registry);
        registry
    }

    /// Register a handler under its own name, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action_type).cloned()
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
