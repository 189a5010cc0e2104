//! Instruction blocks read from the inbox.
//!
//! An instruction block is a JSON document describing an ordered list of
//! actions to execute sequentially.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One command to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Handler key in the registry (e.g. "shell_command")
    #[serde(rename = "type")]
    pub action_type: String,

    /// Handler-specific parameters
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Action {
    /// Create a new action
    pub fn new(action_type: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            action_type: action_type.into(),
            params,
        }
    }
}

/// An ordered list of actions submitted as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionBlock {
    /// Caller-chosen identifier echoed in the result
    pub step_id: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Actions executed in order, first failure aborts the rest
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Prefix shell commands with `sudo -n`
    #[serde(default)]
    pub use_sudo_for_block: bool,
}

/// Structural problems with an instruction block
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstructionError {
    #[error("Invalid instruction JSON: {0}")]
    Malformed(String),

    #[error("Instruction block has an empty step_id")]
    EmptyStepId,

    #[error("Action {index} has an empty type")]
    EmptyActionType { index: usize },
}

impl InstructionBlock {
    /// Parse a block from JSON text
    pub fn from_json(content: &str) -> Result<Self, InstructionError> {
        let block: Self = serde_json::from_str(content)
            .map_err(|e| InstructionError::Malformed(e.to_string()))?;
        block.validate()?;
        Ok(block)
    }

    /// Check the invariants serde cannot express
    pub fn validate(&self) -> Result<(), InstructionError> {
        if self.step_id.trim().is_empty() {
            return Err(InstructionError::EmptyStepId);
        }

        if let Some(index) = self
            .actions
            .iter()
            .position(|a| a.action_type.trim().is_empty())
        {
            return Err(InstructionError::EmptyActionType { index });
        }

        Ok(())
    }

    /// Distinct action types referenced by this block, in first-seen order
    pub fn action_types(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for action in &self.actions {
            if !seen.contains(&action.action_type.as_str()) {
                seen.push(action.action_type.as_str());
            }
        }
        seen
    }
}
