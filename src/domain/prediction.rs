//! Intent predictions supplied by an external predictor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Intents whose actions are suppressed while the system is under heavy load
pub const LOAD_SENSITIVE_INTENTS: [&str; 2] = ["high_computation", "multimedia"];

/// One predicted user activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Activity label (e.g. "development", "gaming")
    pub intent_type: String,

    /// Predictor confidence in [0, 1]
    pub confidence: f64,

    /// Context reported alongside the prediction
    #[serde(default)]
    pub metadata: PredictionMetadata,
}

impl Prediction {
    pub fn new(intent_type: impl Into<String>, confidence: f64) -> Self {
        Self {
            intent_type: intent_type.into(),
            confidence,
            metadata: PredictionMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: PredictionMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Context that feeds the gating and risk model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMetadata {
    /// The user has opted out of automatic actions
    #[serde(default)]
    pub user_preference_block: bool,

    /// Current system load, normally in [0, 1]
    #[serde(default)]
    pub system_load: f64,

    /// Number of active user sessions
    #[serde(default = "default_active_users")]
    pub active_users: u32,

    /// Anything else the predictor sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_active_users() -> u32 {
    1
}

impl Default for PredictionMetadata {
    fn default() -> Self {
        Self {
            user_preference_block: false,
            system_load: 0.0,
            active_users: default_active_users(),
            extra: Map::new(),
        }
    }
}

impl PredictionMetadata {
    pub fn with_load(mut self, system_load: f64) -> Self {
        self.system_load = system_load;
        self
    }

    pub fn with_active_users(mut self, active_users: u32) -> Self {
        self.active_users = active_users;
        self
    }

    pub fn blocked(mut self) -> Self {
        self.user_preference_block = true;
        self
    }
}

/// A batch of predictions as written by the predictor.
///
/// Accepts either a bare array or `{"predictions": [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PredictionBatch {
    List(Vec<Prediction>),
    Wrapped { predictions: Vec<Prediction> },
}

impl PredictionBatch {
    pub fn into_vec(self) -> Vec<Prediction> {
        match self {
            Self::List(list) => list,
            Self::Wrapped { predictions } => predictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults() {
        let p: Prediction =
            serde_json::from_str(r#"{"intent_type": "gaming", "confidence": 0.9}"#).unwrap();
        assert_eq!(p.metadata.active_users, 1);
        assert_eq!(p.metadata.system_load, 0.0);
        assert!(!p.metadata.user_preference_block);
    }

    #[test]
    fn test_extra_metadata_kept() {
        let p: Prediction = serde_json::from_str(
            r#"{"intent_type": "gaming", "confidence": 0.9,
                "metadata": {"system_load": 0.4, "window": "steam"}}"#,
        )
        .unwrap();
        assert_eq!(p.metadata.system_load, 0.4);
        assert_eq!(p.metadata.extra["window"], "steam");
    }

    #[test]
    fn test_batch_shapes() {
        let bare: PredictionBatch =
            serde_json::from_str(r#"[{"intent_type": "idle", "confidence": 0.8}]"#).unwrap();
        assert_eq!(bare.into_vec().len(), 1);

        let wrapped: PredictionBatch = serde_json::from_str(
            r#"{"predictions": [{"intent_type": "idle", "confidence": 0.8},
                                {"intent_type": "gaming", "confidence": 0.6}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped.into_vec().len(), 2);
    }
}
