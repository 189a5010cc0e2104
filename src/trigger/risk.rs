//! Risk model for proactive actions.
//!
//! Each intent has base factors in four dimensions. Resource cost scales
//! with system load and user disruption with the number of active users.
//! The weighted sum is clamped to [0, 1]; anything non-finite scores 1.0.

use serde::Serialize;
use thiserror::Error;

use crate::domain::PredictionMetadata;

/// Weight of each dimension (sums to 1.0)
pub const SYSTEM_IMPACT_WEIGHT: f64 = 0.4;
pub const RESOURCE_COST_WEIGHT: f64 = 0.3;
pub const USER_DISRUPTION_WEIGHT: f64 = 0.2;
pub const REVERSIBILITY_WEIGHT: f64 = 0.1;

/// Cap on the active-user multiplier
const MAX_USER_MULTIPLIER: f64 = 2.0;

/// Score used when assessment fails
pub const FAIL_CLOSED_RISK: f64 = 1.0;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskError {
    #[error("Non-finite {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },
}

/// Per-dimension risk factors
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskFactors {
    pub system_impact: f64,
    pub resource_cost: f64,
    pub user_disruption: f64,
    pub reversibility: f64,
}

impl RiskFactors {
    pub const fn new(system_impact: f64, resource_cost: f64, user_disruption: f64, reversibility: f64) -> Self {
        Self {
            system_impact,
            resource_cost,
            user_disruption,
            reversibility,
        }
    }

    /// Base factors for an intent; unknown intents get 0.5 everywhere
    pub fn for_intent(intent: &str) -> Self {
        match intent {
            "development" => Self::new(0.2, 0.3, 0.1, 0.1),
            "gaming" => Self::new(0.4, 0.5, 0.3, 0.2),
            "high_computation" => Self::new(0.5, 0.6, 0.2, 0.3),
            "multimedia" => Self::new(0.3, 0.4, 0.3, 0.2),
            "power_saving" => Self::new(0.1, 0.1, 0.2, 0.1),
            "idle" => Self::new(0.1, 0.1, 0.1, 0.1),
            _ => Self::new(0.5, 0.5, 0.5, 0.5),
        }
    }

    /// Apply load and user scaling
    pub fn scaled(self, system_load: f64, active_users: u32) -> Self {
        let user_multiplier = (f64::from(active_users) / 2.0).min(MAX_USER_MULTIPLIER);
        Self {
            resource_cost: self.resource_cost * (1.0 + system_load),
            user_disruption: self.user_disruption * user_multiplier,
            ..self
        }
    }

    pub fn weighted_sum(&self) -> f64 {
        SYSTEM_IMPACT_WEIGHT * self.system_impact
            + RESOURCE_COST_WEIGHT * self.resource_cost
            + USER_DISRUPTION_WEIGHT * self.user_disruption
            + REVERSIBILITY_WEIGHT * self.reversibility
    }

    fn check_finite(&self) -> Result<(), RiskError> {
        for (field, value) in [
            ("system_impact", self.system_impact),
            ("resource_cost", self.resource_cost),
            ("user_disruption", self.user_disruption),
            ("reversibility", self.reversibility),
        ] {
            if !value.is_finite() {
                return Err(RiskError::NonFinite { field, value });
            }
        }
        Ok(())
    }
}

/// Full breakdown of a risk computation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub intent_type: String,
    pub base: RiskFactors,
    pub scaled: RiskFactors,
    pub score: f64,
}

/// Compute the risk of acting on `intent` in the given context
pub fn assess(intent: &str, metadata: &PredictionMetadata) -> Result<RiskAssessment, RiskError> {
    if !metadata.system_load.is_finite() {
        return Err(RiskError::NonFinite {
            field: "system_load",
            value: metadata.system_load,
        });
    }

    let base = RiskFactors::for_intent(intent);
    let scaled = base.scaled(metadata.system_load, metadata.active_users);
    scaled.check_finite()?;

    let sum = scaled.weighted_sum();
    if !sum.is_finite() {
        return Err(RiskError::NonFinite {
            field: "score",
            value: sum,
        });
    }

    Ok(RiskAssessment {
        intent_type: intent.to_string(),
        base,
        scaled,
        score: sum.clamp(0.0, 1.0),
    })
}

/// Risk score in [0, 1]; failures score 1.0
pub fn risk_score(intent: &str, metadata: &PredictionMetadata) -> f64 {
    match assess(intent, metadata) {
        Ok(assessment) => assessment.score,
        Err(e) => {
            tracing::warn!(intent, error = %e, "Risk assessment failed; assuming maximum risk");
            FAIL_CLOSED_RISK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(load: f64, users: u32) -> PredictionMetadata {
        PredictionMetadata::default()
            .with_load(load)
            .with_active_users(users)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total = SYSTEM_IMPACT_WEIGHT + RESOURCE_COST_WEIGHT + USER_DISRUPTION_WEIGHT + REVERSIBILITY_WEIGHT;
        assert!(approx(total, 1.0));
    }

    #[test]
    fn test_known_scores() {
        assert!(approx(risk_score("development", &meta(0.0, 2)), 0.20));
        assert!(approx(risk_score("development", &meta(0.0, 1)), 0.19));
        assert!(approx(risk_score("gaming", &meta(0.0, 1)), 0.36));
        assert!(approx(risk_score("multimedia", &meta(0.0, 1)), 0.29));
        assert!(approx(risk_score("multimedia", &meta(0.5, 1)), 0.35));
        assert!(approx(risk_score("power_saving", &meta(0.0, 1)), 0.10));
        assert!(approx(risk_score("idle", &meta(0.0, 1)), 0.09));
    }

    #[test]
    fn test_unknown_intent_uses_neutral_factors() {
        let assessment = assess("teleport", &meta(0.0, 2)).unwrap();
        assert_eq!(assessment.base, RiskFactors::new(0.5, 0.5, 0.5, 0.5));
        assert!(approx(assessment.score, 0.5));
    }

    #[test]
    fn test_user_multiplier_capped() {
        let at_four = risk_score("gaming", &meta(0.0, 4));
        let at_forty = risk_score("gaming", &meta(0.0, 40));
        assert!(approx(at_four, at_forty));
    }

    #[test]
    fn test_non_finite_fails_closed() {
        assert_eq!(risk_score("idle", &meta(f64::NAN, 1)), FAIL_CLOSED_RISK);
        assert_eq!(risk_score("idle", &meta(f64::INFINITY, 1)), FAIL_CLOSED_RISK);
        assert!(matches!(
            assess("idle", &meta(f64::NAN, 1)),
            Err(RiskError::NonFinite { field: "system_load", .. })
        ));
    }

    #[test]
    fn test_score_always_in_range() {
        for intent in ["development", "gaming", "high_computation", "multimedia", "unknown"] {
            for load in [-5.0, -1.0, 0.0, 0.5, 0.95, 3.0, 1e6] {
                for users in [0, 1, 2, 10, u32::MAX] {
                    let score = risk_score(intent, &meta(load, users));
                    assert!((0.0..=1.0).contains(&score), "{intent} {load} {users} -> {score}");
                }
            }
        }
    }
}
