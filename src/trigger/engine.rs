//! Proactive action trigger.
//!
//! Gating runs in a fixed order: confidence floor, cooldown, registered
//! action, user opt-out, high-load suppression, risk ceiling. Only a
//! prediction that clears every gate runs its action, and only a
//! successful action starts the intent's cooldown.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::CommandRunner;
use crate::config::TriggerSettings;
use crate::domain::{Prediction, PredictionBatch, LOAD_SENSITIVE_INTENTS};
use crate::ingest::{Inbox, InboxError};

use super::actions::{default_actions, ActionOutcome, OptimizationAction};
use super::cooldown::{Clock, CooldownState, CooldownTracker, SystemClock};
use super::risk::risk_score;

/// Errors from the trigger and its actions
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error(transparent)]
    Inbox(#[from] InboxError),

    #[error("Invalid predictions JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Action '{action}' failed: {message}")]
    Action { action: String, message: String },
}

/// Why a prediction did not trigger
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    LowConfidence { confidence: f64, threshold: f64 },
    CoolingDown { remaining: Duration },
    NoAction,
    UserBlocked,
    HighLoad { load: f64, threshold: f64 },
    RiskTooHigh { risk: f64, threshold: f64 },
    ActionFailed { error: String },
    ActionTimedOut { timeout: Duration },
}

impl RejectReason {
    /// Stable label used in statistics and output files
    pub fn label(&self) -> &'static str {
        match self {
            Self::LowConfidence { .. } => "low_confidence",
            Self::CoolingDown { .. } => "cooling_down",
            Self::NoAction => "no_action",
            Self::UserBlocked => "user_blocked",
            Self::HighLoad { .. } => "high_load",
            Self::RiskTooHigh { .. } => "risk_too_high",
            Self::ActionFailed { .. } => "action_failed",
            Self::ActionTimedOut { .. } => "action_timed_out",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidence { confidence, threshold } => {
                write!(f, "confidence {:.2} below threshold {:.2}", confidence, threshold)
            }
            Self::CoolingDown { remaining } => {
                write!(f, "cooling down for another {}s", remaining.as_secs())
            }
            Self::NoAction => write!(f, "no action registered"),
            Self::UserBlocked => write!(f, "blocked by user preference"),
            Self::HighLoad { load, threshold } => {
                write!(f, "system load {:.2} above {:.2}", load, threshold)
            }
            Self::RiskTooHigh { risk, threshold } => {
                write!(f, "risk {:.3} above threshold {:.2}", risk, threshold)
            }
            Self::ActionFailed { error } => write!(f, "action failed: {}", error),
            Self::ActionTimedOut { timeout } => {
                write!(f, "action timed out after {}s", timeout.as_secs())
            }
        }
    }
}

/// Outcome of evaluating one prediction
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerDecision {
    Triggered { risk: f64, outcome: ActionOutcome },
    Rejected(RejectReason),
}

impl TriggerDecision {
    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered { .. })
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            Self::Rejected(reason) => Some(reason),
            Self::Triggered { .. } => None,
        }
    }
}

/// Serializable form of a decision, as written to the decisions file
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub intent_type: String,
    pub confidence: f64,
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
    pub evaluated_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(prediction: &Prediction, decision: &TriggerDecision, evaluated_at: DateTime<Utc>) -> Self {
        let (risk, reason, reason_code, outcome) = match decision {
            TriggerDecision::Triggered { risk, outcome } => (Some(*risk), None, None, Some(outcome.clone())),
            TriggerDecision::Rejected(reason) => (None, Some(reason.to_string()), Some(reason.label()), None),
        };

        Self {
            intent_type: prediction.intent_type.clone(),
            confidence: prediction.confidence,
            triggered: decision.is_triggered(),
            risk,
            reason,
            reason_code,
            outcome,
            evaluated_at,
        }
    }
}

/// Counters since startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TriggerStats {
    pub evaluated: u64,
    pub triggered: u64,
    pub rejected: BTreeMap<&'static str, u64>,
}

impl TriggerStats {
    fn record(&mut self, decision: &TriggerDecision) {
        self.evaluated += 1;
        match decision {
            TriggerDecision::Triggered { .. } => self.triggered += 1,
            TriggerDecision::Rejected(reason) => {
                *self.rejected.entry(reason.label()).or_insert(0) += 1;
            }
        }
    }
}

/// Decides whether to act on intent predictions
pub struct ProactiveActionTrigger {
    settings: TriggerSettings,
    actions: HashMap<String, Arc<dyn OptimizationAction>>,
    cooldowns: CooldownTracker,
    clock: Arc<dyn Clock>,
    stats: TriggerStats,
}

impl ProactiveActionTrigger {
    /// Trigger on the wall clock with no actions registered
    pub fn new(settings: TriggerSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: TriggerSettings, clock: Arc<dyn Clock>) -> Self {
        let cooldown = Duration::from_secs(settings.cooldown_minutes.saturating_mul(60));
        Self {
            settings,
            actions: HashMap::new(),
            cooldowns: CooldownTracker::new(cooldown),
            clock,
            stats: TriggerStats::default(),
        }
    }

    /// Trigger with the built-in system tuning actions
    pub fn with_default_actions(settings: TriggerSettings, runner: Arc<dyn CommandRunner>) -> Self {
        let actions = default_actions(runner, &settings);
        let mut trigger = Self::new(settings);
        for (intent, action) in actions {
            trigger.register_action(intent, Arc::new(action));
        }
        trigger
    }

    /// Register (or replace) the action for an intent
    pub fn register_action(&mut self, intent: impl Into<String>, action: Arc<dyn OptimizationAction>) {
        self.actions.insert(intent.into(), action);
    }

    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    pub fn stats(&self) -> &TriggerStats {
        &self.stats
    }

    /// Registered intents, sorted
    pub fn intents(&self) -> Vec<&str> {
        let mut intents: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        intents.sort_unstable();
        intents
    }

    pub fn cooldown_snapshot(&self) -> Vec<(String, CooldownState)> {
        self.cooldowns.snapshot(self.clock.now())
    }

    /// Run every gate without side effects.
    ///
    /// Returns the risk score and the action to run when all gates pass.
    pub fn gate(
        &self,
        prediction: &Prediction,
        now: DateTime<Utc>,
    ) -> Result<(f64, Arc<dyn OptimizationAction>), RejectReason> {
        let settings = &self.settings;
        let intent = prediction.intent_type.as_str();
        let metadata = &prediction.metadata;

        // NaN confidence never passes
        if !(prediction.confidence >= settings.confidence_threshold) {
            return Err(RejectReason::LowConfidence {
                confidence: prediction.confidence,
                threshold: settings.confidence_threshold,
            });
        }

        if let CooldownState::CoolingDown { remaining } = self.cooldowns.state(intent, now) {
            return Err(RejectReason::CoolingDown { remaining });
        }

        let Some(action) = self.actions.get(intent) else {
            return Err(RejectReason::NoAction);
        };

        if metadata.user_preference_block {
            return Err(RejectReason::UserBlocked);
        }

        if metadata.system_load > settings.high_load_threshold && LOAD_SENSITIVE_INTENTS.contains(&intent) {
            return Err(RejectReason::HighLoad {
                load: metadata.system_load,
                threshold: settings.high_load_threshold,
            });
        }

        let risk = risk_score(intent, metadata);
        if !(risk <= settings.risk_threshold) {
            return Err(RejectReason::RiskTooHigh {
                risk,
                threshold: settings.risk_threshold,
            });
        }

        Ok((risk, Arc::clone(action)))
    }

    /// Evaluate one prediction, running its action if every gate passes
    #[instrument(skip_all, fields(intent = %prediction.intent_type, confidence = prediction.confidence))]
    pub async fn evaluate_one(&mut self, prediction: &Prediction) -> TriggerDecision {
        let decision = match self.gate(prediction, self.clock.now()) {
            Err(reason) => {
                debug!(reason = %reason, "Prediction rejected");
                TriggerDecision::Rejected(reason)
            }
            Ok((risk, action)) => self.run_action(prediction, risk, action).await,
        };

        self.stats.record(&decision);
        decision
    }

    async fn run_action(
        &mut self,
        prediction: &Prediction,
        risk: f64,
        action: Arc<dyn OptimizationAction>,
    ) -> TriggerDecision {
        let timeout = Duration::from_secs(self.settings.action_timeout_seconds);
        info!(action = action.name(), risk, "Triggering action");

        match tokio::time::timeout(timeout, action.apply()).await {
            Err(_) => {
                warn!(action = action.name(), ?timeout, "Action timed out");
                TriggerDecision::Rejected(RejectReason::ActionTimedOut { timeout })
            }
            Ok(Err(e)) => {
                error!(action = action.name(), error = %e, "Action failed");
                TriggerDecision::Rejected(RejectReason::ActionFailed { error: e.to_string() })
            }
            Ok(Ok(outcome)) if !outcome.success() => {
                let summary = outcome.failure_summary();
                error!(action = action.name(), failures = %summary, "Action reported failed steps");
                TriggerDecision::Rejected(RejectReason::ActionFailed { error: summary })
            }
            Ok(Ok(outcome)) => {
                self.cooldowns.record(&prediction.intent_type, self.clock.now());
                info!(action = action.name(), steps = outcome.steps.len(), "Action applied; cooldown started");
                TriggerDecision::Triggered { risk, outcome }
            }
        }
    }

    /// Evaluate predictions in the order given
    pub async fn evaluate(&mut self, predictions: &[Prediction]) -> Vec<TriggerDecision> {
        let mut decisions = Vec::with_capacity(predictions.len());
        for prediction in predictions {
            decisions.push(self.evaluate_one(prediction).await);
        }
        decisions
    }

    /// Evaluate and pair each decision with its serializable record
    pub async fn evaluate_records(&mut self, predictions: &[Prediction]) -> Vec<DecisionRecord> {
        let mut records = Vec::with_capacity(predictions.len());
        for prediction in predictions {
            let decision = self.evaluate_one(prediction).await;
            records.push(DecisionRecord::new(prediction, &decision, self.clock.now()));
        }
        records
    }

    /// Process one predictions file from the inbox.
    ///
    /// Unparseable batches are copied to the rejected directory and removed.
    pub async fn poll_once(&mut self, inbox: &Inbox) -> Result<Option<Vec<DecisionRecord>>, TriggerError> {
        let Some(claimed) = inbox.take().await? else {
            return Ok(None);
        };

        let batch = match serde_json::from_str::<PredictionBatch>(&claimed.content) {
            Ok(batch) => batch.into_vec(),
            Err(e) => {
                let copy = inbox.reject(&claimed.content).await?;
                inbox.remove_input().await?;
                warn!(path = %copy.display(), "Rejected predictions file kept");
                return Err(TriggerError::Parse(e));
            }
        };

        let records = self.evaluate_records(&batch).await;
        let written = inbox.write_output(&records).await;
        // Actions already ran; a batch is never evaluated twice
        inbox.remove_input().await?;
        written?;

        Ok(Some(records))
    }

    /// Poll a predictions inbox until `shutdown` resolves.
    ///
    /// Cooldown state carries across batches.
    pub async fn listen<F>(
        &mut self,
        inbox: &Inbox,
        interval: Duration,
        mut wake: Option<mpsc::Receiver<()>>,
        shutdown: F,
    ) -> Result<TriggerStats, TriggerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(input = %inbox.input_path().display(), "Trigger listening");

        loop {
            match self.poll_once(inbox).await {
                Ok(Some(records)) => {
                    let triggered = records.iter().filter(|r| r.triggered).count();
                    info!(predictions = records.len(), triggered, "Processed predictions batch");
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "Predictions poll failed"),
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
                Some(()) = recv(&mut wake) => {}
            }
        }

        info!(evaluated = self.stats.evaluated, triggered = self.stats.triggered, "Trigger stopping");
        Ok(self.stats.clone())
    }
}

/// Next wake signal; `None` once the channel is closed or absent
async fn recv(wake: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match wake.as_mut() {
        Some(rx) => {
            let signal = rx.recv().await;
            if signal.is_none() {
                *wake = None;
            }
            signal
        }
        None => std::future::pending().await,
    }
}
