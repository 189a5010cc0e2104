//! Trigger Integration Tests
//!
//! Tests for gating, cooldowns, the risk ceiling and the predictions inbox.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use omnitide::adapters::SystemRunner;
use omnitide::config::TriggerSettings;
use omnitide::domain::{Prediction, PredictionMetadata};
use omnitide::ingest::Inbox;
use omnitide::trigger::{
    risk_score, ActionOutcome, Clock, ManualClock, OptimizationAction, ProactiveActionTrigger,
    RejectReason, StepStatus, TriggerDecision, TriggerError,
};
use tempfile::TempDir;

/// Records how often it was applied
#[derive(Default)]
struct RecordingAction {
    calls: AtomicUsize,
}

impl RecordingAction {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OptimizationAction for RecordingAction {
    fn name(&self) -> &str {
        "recording"
    }

    async fn apply(&self) -> Result<ActionOutcome, TriggerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ActionOutcome::new("recording"))
    }
}

/// Never finishes within the trigger timeout
struct StuckAction;

#[async_trait]
impl OptimizationAction for StuckAction {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn apply(&self) -> Result<ActionOutcome, TriggerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ActionOutcome::new("stuck"))
    }
}

const INTENTS: [&str; 6] = [
    "development",
    "gaming",
    "high_computation",
    "multimedia",
    "power_saving",
    "idle",
];

fn create_test_trigger() -> (ProactiveActionTrigger, Arc<RecordingAction>, ManualClock) {
    let clock = ManualClock::default();
    let action = Arc::new(RecordingAction::default());
    let mut trigger =
        ProactiveActionTrigger::with_clock(TriggerSettings::default(), Arc::new(clock.clone()));
    for intent in INTENTS {
        trigger.register_action(intent, action.clone());
    }
    (trigger, action, clock)
}

fn development(confidence: f64) -> Prediction {
    Prediction::new("development", confidence)
        .with_metadata(PredictionMetadata::default().with_active_users(2))
}

#[tokio::test]
async fn test_low_confidence_never_acts() {
    let (mut trigger, action, _clock) = create_test_trigger();

    for confidence in [0.0, 0.5, 0.7499, f64::NAN] {
        for intent in INTENTS {
            let decision = trigger.evaluate_one(&Prediction::new(intent, confidence)).await;
            assert!(matches!(
                decision,
                TriggerDecision::Rejected(RejectReason::LowConfidence { .. })
            ));
        }
    }
    assert_eq!(action.calls(), 0);
}

#[tokio::test]
async fn test_example_triggers_then_suppressed() {
    let (mut trigger, action, clock) = create_test_trigger();

    let first = trigger.evaluate_one(&development(0.85)).await;
    let TriggerDecision::Triggered { risk, .. } = first else {
        panic!("expected trigger, got {:?}", first);
    };
    assert!((risk - 0.2).abs() < 1e-9);

    // Within the 15 minute window
    clock.advance(Duration::from_secs(10 * 60));
    let second = trigger.evaluate_one(&development(0.85)).await;
    match second.reject_reason() {
        Some(RejectReason::CoolingDown { remaining }) => {
            assert_eq!(*remaining, Duration::from_secs(5 * 60));
        }
        other => panic!("expected cooldown, got {:?}", other),
    }

    // Other intents are unaffected
    let idle = trigger.evaluate_one(&Prediction::new("idle", 0.9)).await;
    assert!(idle.is_triggered());

    clock.advance(Duration::from_secs(5 * 60));
    assert!(trigger.evaluate_one(&development(0.85)).await.is_triggered());
    assert_eq!(action.calls(), 3);
}

#[tokio::test]
async fn test_risk_above_threshold_never_acts() {
    let (mut trigger, action, clock) = create_test_trigger();

    for _ in 0..5 {
        let decision = trigger.evaluate_one(&Prediction::new("gaming", 0.99)).await;
        assert!(matches!(
            decision.reject_reason(),
            Some(RejectReason::RiskTooHigh { .. })
        ));
        clock.advance(Duration::from_secs(3600));
    }

    // Unknown intent with an action registered still scores 0.45+
    trigger.register_action("teleport", Arc::new(RecordingAction::default()));
    let unknown = trigger.evaluate_one(&Prediction::new("teleport", 0.99)).await;
    assert!(matches!(
        unknown.reject_reason(),
        Some(RejectReason::RiskTooHigh { .. })
    ));

    assert_eq!(action.calls(), 0);
}

#[tokio::test]
async fn test_risk_in_unit_interval() {
    for intent in INTENTS.iter().chain(["something_else"].iter()) {
        for load in [f64::NEG_INFINITY, -2.0, 0.0, 0.3, 0.9, 1.0, 50.0, f64::NAN] {
            for users in [0, 1, 3, 1000] {
                let metadata = PredictionMetadata::default()
                    .with_load(load)
                    .with_active_users(users);
                let risk = risk_score(intent, &metadata);
                assert!((0.0..=1.0).contains(&risk));
            }
        }
    }
}

#[tokio::test]
async fn test_identical_inputs_identical_decisions() {
    let (mut a, _, _) = create_test_trigger();
    let (mut b, _, _) = create_test_trigger();

    let batch = vec![
        development(0.9),
        Prediction::new("gaming", 0.95),
        development(0.9),
        Prediction::new("multimedia", 0.8)
            .with_metadata(PredictionMetadata::default().with_load(0.95)),
        Prediction::new("idle", 0.8).with_metadata(PredictionMetadata::default().blocked()),
    ];

    let first = a.evaluate(&batch).await;
    let second = b.evaluate(&batch).await;
    assert_eq!(first, second);

    // Rejections carry no side effects: repeating yields the same answers
    let rejected_only = vec![Prediction::new("gaming", 0.95), Prediction::new("idle", 0.1)];
    let once = a.evaluate(&rejected_only).await;
    let twice = a.evaluate(&rejected_only).await;
    assert_eq!(once, twice);
}

#[tokio::test(start_paused = true)]
async fn test_action_timeout_no_cooldown() {
    let clock = ManualClock::default();
    let settings = TriggerSettings {
        action_timeout_seconds: 1,
        ..TriggerSettings::default()
    };
    let mut trigger = ProactiveActionTrigger::with_clock(settings, Arc::new(clock.clone()));
    trigger.register_action("development", Arc::new(StuckAction));

    let decision = trigger.evaluate_one(&development(0.9)).await;
    assert!(matches!(
        decision.reject_reason(),
        Some(RejectReason::ActionTimedOut { .. })
    ));
    assert!(trigger.cooldown_snapshot().is_empty());
    assert_eq!(trigger.stats().rejected.get("action_timed_out"), Some(&1));
}

#[tokio::test]
async fn test_default_actions_dry_run() {
    let settings = TriggerSettings {
        dry_run: true,
        ..TriggerSettings::default()
    };
    let mut trigger = ProactiveActionTrigger::with_default_actions(settings, Arc::new(SystemRunner::new()));
    assert_eq!(trigger.intents().len(), 6);

    let decision = trigger.evaluate_one(&development(0.9)).await;
    match decision {
        TriggerDecision::Triggered { outcome, .. } => {
            assert_eq!(outcome.action, "development");
            assert!(outcome.steps.iter().all(|s| s.status == StepStatus::DryRun));
        }
        other => panic!("expected trigger, got {:?}", other),
    }
}

#[tokio::test]
async fn test_predictions_inbox() {
    let temp = TempDir::new().unwrap();
    let inbox = Inbox::new(
        temp.path().join("predictions.json"),
        temp.path().join("decisions.json"),
        temp.path().join("rejected"),
    );
    let (mut trigger, action, clock) = create_test_trigger();

    std::fs::write(
        inbox.input_path(),
        r#"{"predictions": [
            {"intent_type": "development", "confidence": 0.9, "metadata": {"active_users": 2}},
            {"intent_type": "gaming", "confidence": 0.5}
        ]}"#,
    )
    .unwrap();

    let records = trigger.poll_once(&inbox).await.unwrap().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].triggered);
    assert_eq!(records[1].reason_code, Some("low_confidence"));
    assert!(!inbox.input_path().exists());

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(inbox.output_path()).unwrap()).unwrap();
    assert_eq!(written[0]["triggered"], true);

    // Cooldown carries over to the next batch
    std::fs::write(
        inbox.input_path(),
        r#"[{"intent_type": "development", "confidence": 0.9, "metadata": {"active_users": 2}}]"#,
    )
    .unwrap();
    let records = trigger.poll_once(&inbox).await.unwrap().unwrap();
    assert_eq!(records[0].reason_code, Some("cooling_down"));
    assert_eq!(action.calls(), 1);
    assert_eq!(records[0].evaluated_at, clock.now());

    // Garbage is rejected and removed
    std::fs::write(inbox.input_path(), "not predictions").unwrap();
    assert!(matches!(
        trigger.poll_once(&inbox).await,
        Err(TriggerError::Parse(_))
    ));
    assert!(!inbox.input_path().exists());
    assert_eq!(std::fs::read_dir(inbox.rejected_dir()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_unwritable_decisions_never_reevaluates() {
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("decisions.json");
    std::fs::create_dir(&output).unwrap();
    let inbox = Inbox::new(temp.path().join("predictions.json"), &output, temp.path().join("rejected"));
    let (mut trigger, action, _clock) = create_test_trigger();

    std::fs::write(
        inbox.input_path(),
        r#"[{"intent_type": "idle", "confidence": 0.9}]"#,
    )
    .unwrap();

    assert!(matches!(
        trigger.poll_once(&inbox).await,
        Err(TriggerError::Inbox(_))
    ));
    assert!(!inbox.input_path().exists());
    assert!(trigger.poll_once(&inbox).await.unwrap().is_none());
    assert_eq!(action.calls(), 1);
}
