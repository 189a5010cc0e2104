//! Trigger CLI subcommands.
//!
//! Provides commands to:
//! - `evaluate`: Run a predictions file through the trigger once
//! - `risk`: Show the risk breakdown for an intent
//! - `listen`: Poll a predictions file, keeping cooldowns across batches

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::adapters::SystemRunner;
use crate::config::TriggerSettings;
use crate::domain::{PredictionBatch, PredictionMetadata};
use crate::ingest::{Inbox, InstructionWatcher, WatcherConfig};
use crate::trigger::{assess, CooldownState, ProactiveActionTrigger, RejectReason, TriggerDecision};

/// File the decisions for a predictions batch are written to
const DECISIONS_FILE: &str = "decisions.json";

/// Trigger-related subcommands
#[derive(Subcommand, Debug)]
pub enum TriggerCommands {
    /// Evaluate a predictions file once and print the decisions
    Evaluate {
        /// JSON file with an array of predictions (or {"predictions": [...]})
        file: PathBuf,

        /// Record tuning steps without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the risk breakdown for an intent
    Risk {
        /// Intent type (e.g. development, gaming)
        intent: String,

        /// System load in [0, 1]
        #[arg(long, default_value = "0.0")]
        load: f64,

        /// Number of active users
        #[arg(long, default_value = "1")]
        users: u32,
    },

    /// Poll a predictions file until Ctrl-C
    Listen {
        /// Predictions file (defaults to <home>/predictions.json)
        file: Option<PathBuf>,

        /// Record tuning steps without applying them
        #[arg(long)]
        dry_run: bool,
    },
}

/// Execute trigger subcommands
pub async fn execute(command: TriggerCommands) -> Result<()> {
    match command {
        TriggerCommands::Evaluate { file, dry_run } => execute_evaluate(&file, dry_run).await,
        TriggerCommands::Risk { intent, load, users } => execute_risk(&intent, load, users),
        TriggerCommands::Listen { file, dry_run } => execute_listen(file, dry_run).await,
    }
}

fn settings(dry_run: bool) -> Result<TriggerSettings> {
    let mut settings = crate::config::config()?.trigger.clone();
    settings.dry_run |= dry_run;
    Ok(settings)
}

async fn execute_evaluate(file: &Path, dry_run: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read predictions file: {}", file.display()))?;
    let predictions = serde_json::from_str::<PredictionBatch>(&content)
        .with_context(|| format!("Invalid predictions file: {}", file.display()))?
        .into_vec();

    let mut trigger = ProactiveActionTrigger::with_default_actions(settings(dry_run)?, Arc::new(SystemRunner::new()));
    let decisions = trigger.evaluate(&predictions).await;

    let records: Vec<_> = predictions
        .iter()
        .zip(&decisions)
        .map(|(p, d)| crate::trigger::DecisionRecord::new(p, d, chrono::Utc::now()))
        .collect();
    println!("{}", serde_json::to_string_pretty(&records)?);

    let stats = trigger.stats();
    eprintln!(
        "\n[{} evaluated, {} triggered, {} rejected]",
        stats.evaluated,
        stats.triggered,
        stats.evaluated - stats.triggered
    );

    let action_failed = decisions.iter().any(|d| {
        matches!(
            d,
            TriggerDecision::Rejected(RejectReason::ActionFailed { .. } | RejectReason::ActionTimedOut { .. })
        )
    });
    if action_failed {
        std::process::exit(1);
    }

    Ok(())
}

fn execute_risk(intent: &str, load: f64, users: u32) -> Result<()> {
    let metadata = PredictionMetadata::default()
        .with_load(load)
        .with_active_users(users);
    let assessment = assess(intent, &metadata)?;
    let threshold = crate::config::config()?.trigger.risk_threshold;

    println!("Intent: {}", assessment.intent_type);
    println!("Load: {:.2}  Active users: {}", load, users);
    println!();
    println!("{:<18} {:>8} {:>8}", "FACTOR", "BASE", "SCALED");
    println!("{}", "-".repeat(36));
    let rows = [
        ("system_impact", assessment.base.system_impact, assessment.scaled.system_impact),
        ("resource_cost", assessment.base.resource_cost, assessment.scaled.resource_cost),
        ("user_disruption", assessment.base.user_disruption, assessment.scaled.user_disruption),
        ("reversibility", assessment.base.reversibility, assessment.scaled.reversibility),
    ];
    for (name, base, scaled) in rows {
        println!("{:<18} {:>8.3} {:>8.3}", name, base, scaled);
    }
    println!();
    println!(
        "Risk score: {:.3} ({} threshold {:.2})",
        assessment.score,
        if assessment.score > threshold { "above" } else { "within" },
        threshold
    );

    Ok(())
}

async fn execute_listen(file: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let input = match file {
        Some(path) => path,
        None => crate::config::paths::predictions_file()?,
    };
    let dir = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let inbox = Inbox::new(&input, dir.join(DECISIONS_FILE), dir.join("rejected"))
        .with_settle_delay(std::time::Duration::from_millis(500));

    let (wake, _watch) = match InstructionWatcher::new(WatcherConfig::new(&input)).watch() {
        Ok((rx, handle)) => (Some(rx), Some(handle)),
        Err(e) => {
            tracing::warn!(error = %e, "File watcher unavailable; polling only");
            (None, None)
        }
    };

    let interval = crate::config::config()?.dispatcher.poll_interval();
    let mut trigger = ProactiveActionTrigger::with_default_actions(settings(dry_run)?, Arc::new(SystemRunner::new()));
    let stats = trigger
        .listen(&inbox, interval, wake, super::shutdown_signal())
        .await?;

    let cooldowns = cooldown_report(trigger.cooldown_snapshot());
    let summary = serde_json::json!({ "stats": stats, "cooldowns": cooldowns });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// JSON view of a cooldown snapshot
fn cooldown_report(snapshot: Vec<(String, CooldownState)>) -> Vec<serde_json::Value> {
    snapshot
        .into_iter()
        .map(|(intent, state)| match state {
            CooldownState::Eligible => serde_json::json!({ "intent": intent, "eligible": true }),
            CooldownState::CoolingDown { remaining } => serde_json::json!({
                "intent": intent,
                "eligible": false,
                "remaining_seconds": remaining.as_secs(),
            }),
        })
        .collect()
}
