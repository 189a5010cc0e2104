//! Proactive action trigger.
//!
//! Turns intent predictions into system tuning actions, gated by a
//! confidence floor, a risk model and a per-intent cooldown.
//!
//! ```text
//! predictions.json → ProactiveActionTrigger ─ gate ─→ OptimizationAction
//!                          │                              │
//!                     CooldownTracker ←── success ────────┘
//! ```

pub mod actions;
pub mod cooldown;
pub mod engine;
pub mod risk;

pub use actions::{default_actions, ActionOutcome, OptimizationAction, StepReport, StepStatus, SystemTuning, TuningStep};
pub use cooldown::{Clock, CooldownState, CooldownTracker, ManualClock, SystemClock};
pub use engine::{DecisionRecord, ProactiveActionTrigger, RejectReason, TriggerDecision, TriggerError, TriggerStats};
pub use risk::{assess, risk_score, RiskAssessment, RiskError, RiskFactors};
