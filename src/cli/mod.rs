//! Command-line interface for omnitide.
//!
//! Provides commands for running the instruction dispatcher, processing a
//! single block, inspecting history and driving the proactive trigger.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::core::{Dispatcher, HandlerRegistry, HistoryLog};
use crate::domain::OverallResult;
use crate::ingest::{Inbox, InstructionWatcher, WatcherConfig};

pub mod trigger;

/// omnitide - Proactive system tuning and file-based instruction dispatch
#[derive(Parser, Debug)]
#[command(name = "omnitide")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the instruction file and execute blocks until Ctrl-C
    Listen {
        /// Disable the file watcher and rely on polling alone
        #[arg(long)]
        no_watch: bool,
    },

    /// Execute one instruction file without deleting it
    ProcessOnce {
        /// Instruction block JSON file
        file: PathBuf,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check directories and system tools
    HealthCheck,

    /// Show the last result and a history summary
    Status,

    /// Show recent history entries
    History {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show registered handlers, trigger intents and settings
    Info,

    /// Print the version
    Version,

    /// Show resolved configuration (debug)
    Config,

    /// Proactive action trigger
    Trigger {
        #[command(subcommand)]
        command: trigger::TriggerCommands,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Listen { no_watch } => {
                listen(no_watch).await
            }
            Commands::ProcessOnce { file, output } => {
                process_once(&file, output).await
            }
            Commands::HealthCheck => {
                health_check().await
            }
            Commands::Status => {
                show_status().await
            }
            Commands::History { limit } => {
                show_history(limit).await
            }
            Commands::Info => {
                show_info()
            }
            Commands::Version => {
                println!("omnitide {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
            Commands::Config => {
                show_config()
            }
            Commands::Trigger { command } => {
                trigger::execute(command).await
            }
        }
    }
}

/// Resolves on Ctrl-C
pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Run the dispatcher loop
async fn listen(no_watch: bool) -> Result<()> {
    let dispatcher = Dispatcher::from_config().await?;
    let inbox = Inbox::instructions_default()?;

    if let Some(dir) = inbox.input_path().parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create instruction directory: {}", dir.display()))?;
    }

    // Handle must outlive the loop or wake-ups stop
    let (wake, _watch) = if no_watch {
        (None, None)
    } else {
        match InstructionWatcher::new(WatcherConfig::new(inbox.input_path())).watch() {
            Ok((rx, handle)) => (Some(rx), Some(handle)),
            Err(e) => {
                tracing::warn!(error = %e, "File watcher unavailable; polling only");
                (None, None)
            }
        }
    };

    let processed = dispatcher.listen(&inbox, wake, shutdown_signal()).await?;
    eprintln!("\n[Stopped after {} instruction block(s)]", processed);

    Ok(())
}

/// Execute one instruction file
async fn process_once(file: &Path, output: Option<PathBuf>) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read instruction file: {}", file.display()))?;

    let dispatcher = Dispatcher::from_config().await?;
    let processed = dispatcher.process_content(&content).await?;
    let result = &processed.result;
    let json = serde_json::to_string_pretty(result)?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, &json)
                .await
                .with_context(|| format!("Failed to write result file: {}", path.display()))?;
            eprintln!("Result written to {}", path.display());
        }
        None => println!("{}", json),
    }

    if result.overall_success() {
        eprintln!("\n[Block '{}' completed successfully]", result.step_id());
    } else {
        eprintln!(
            "\n[Block '{}' failed: {}]",
            result.step_id(),
            result.error().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    Ok(())
}

/// One health-check line
struct Check {
    name: String,
    ok: bool,
    required: bool,
    detail: String,
}

impl Check {
    fn new(name: impl Into<String>, ok: bool, required: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok,
            required,
            detail: detail.into(),
        }
    }
}

/// Whether a temp file can be created in `dir`
fn writable(dir: &Path) -> bool {
    tempfile::NamedTempFile::new_in(dir).is_ok()
}

/// Check directories and tools
async fn health_check() -> Result<()> {
    let cfg = crate::config::config()?;
    let mut checks = Vec::new();

    let home_ok = tokio::fs::create_dir_all(&cfg.home).await.is_ok() && writable(&cfg.home);
    checks.push(Check::new("home directory", home_ok, true, cfg.home.display().to_string()));

    for (name, path) in [
        ("instruction directory", &cfg.instructions_path),
        ("result directory", &cfg.results_path),
        ("history directory", &cfg.history_path),
    ] {
        let dir = path.parent().unwrap_or(Path::new("."));
        let ok = dir.is_dir() && writable(dir);
        checks.push(Check::new(name, ok, true, dir.display().to_string()));
    }

    for (tool, required, purpose) in [
        ("sh", true, "shell_command"),
        ("cpupower", false, "governor tuning"),
        ("sysctl", false, "kernel tuning"),
        ("sudo", false, "use_sudo_for_block"),
    ] {
        let (ok, detail) = match which::which(tool) {
            Ok(path) => (true, path.display().to_string()),
            Err(_) => (false, format!("not found ({})", purpose)),
        };
        checks.push(Check::new(tool, ok, required, detail));
    }

    println!("{:<24} {:<8} DETAIL", "CHECK", "STATUS");
    println!("{}", "-".repeat(70));
    for check in &checks {
        let status = match (check.ok, check.required) {
            (true, _) => "ok",
            (false, true) => "FAIL",
            (false, false) => "warn",
        };
        println!("{:<24} {:<8} {}", check.name, status, check.detail);
    }

    if checks.iter().any(|c| c.required && !c.ok) {
        eprintln!("\n[Health check failed]");
        std::process::exit(1);
    }

    eprintln!("\n[Health check passed]");
    Ok(())
}

/// Show the last result and history counts
async fn show_status() -> Result<()> {
    let cfg = crate::config::config()?;

    println!("Instruction file: {}", cfg.instructions_path.display());
    println!(
        "  Pending: {}",
        if cfg.instructions_path.is_file() { "yes" } else { "no" }
    );
    println!();

    match tokio::fs::read_to_string(&cfg.results_path).await {
        Ok(content) => {
            let result: OverallResult = serde_json::from_str(&content)
                .with_context(|| format!("Invalid result file: {}", cfg.results_path.display()))?;
            println!("Last result ({}):", cfg.results_path.display());
            println!("  Run ID:   {}", result.run_id());
            println!("  Step:     {}", result.step_id());
            println!("  Success:  {}", result.overall_success());
            println!("  Actions:  {}", result.results().len());
            println!("  Finished: {}", result.finished_at());
            if let Some(error) = result.error() {
                println!("  Error:    {}", error);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No result yet");
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read result file: {}", cfg.results_path.display()));
        }
    }
    println!();

    let summary = HistoryLog::new(&cfg.history_path).summary().await?;
    println!("History ({}):", cfg.history_path.display());
    println!("  Entries:   {}", summary.total);
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Failed:    {}", summary.failed);
    println!("  Runs:      {}", summary.runs);
    if let Some(last) = summary.last_timestamp {
        println!("  Last:      {}", last);
    }

    Ok(())
}

/// Show recent history entries
async fn show_history(limit: usize) -> Result<()> {
    let history = HistoryLog::new(&crate::config::config()?.history_path);
    let entries = history.tail(limit).await?;

    if entries.is_empty() {
        println!("No history entries found");
        return Ok(());
    }

    println!(
        "{:<26} {:<20} {:>4} {:<16} {:<6} {:>8}  ERROR",
        "TIMESTAMP", "STEP", "IDX", "ACTION", "OK", "MS"
    );
    println!("{}", "-".repeat(100));

    for entry in entries {
        let index = entry
            .action_index
            .map(|i| i.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<26} {:<20} {:>4} {:<16} {:<6} {:>8}  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.step_id,
            index,
            entry.action_type,
            if entry.success { "yes" } else { "no" },
            entry.duration_ms,
            entry.error.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

/// Show handlers, intents and settings
fn show_info() -> Result<()> {
    let cfg = crate::config::config()?;
    let registry = HandlerRegistry::with_builtins();

    println!("omnitide {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Action handlers ({}):", registry.len());
    for name in registry.names() {
        println!("  {}", name);
    }
    println!();
    println!("Trigger intents:");
    let runner = std::sync::Arc::new(crate::adapters::SystemRunner::new());
    for (intent, action) in crate::trigger::default_actions(runner, &cfg.trigger) {
        let steps: Vec<String> = action.steps().iter().map(|s| s.describe()).collect();
        println!("  {:<18} {}", intent, steps.join(", "));
    }
    println!();
    println!("Trigger:");
    println!("  Confidence threshold: {:.2}", cfg.trigger.confidence_threshold);
    println!("  Risk threshold:       {:.2}", cfg.trigger.risk_threshold);
    println!("  Cooldown:             {} min", cfg.trigger.cooldown_minutes);
    println!("  Dry run:              {}", cfg.trigger.dry_run);

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = crate::config::config()?;

    println!("omnitide configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:         {}", cfg.home.display());
    println!("  Instructions: {}", cfg.instructions_path.display());
    println!("  Results:      {}", cfg.results_path.display());
    println!("  History:      {}", cfg.history_path.display());
    println!("  Rejected:     {}", crate::config::paths::rejected_dir_in(&cfg.home).display());
    println!();
    println!("Dispatcher:");
    println!("  Poll interval:  {}s", cfg.dispatcher.poll_interval().as_secs());
    println!("  Action timeout: {}s", cfg.dispatcher.action_timeout_seconds);
    println!("  Snippet chars:  {}", cfg.dispatcher.snippet_chars);
    println!("  Max actions:    {}", cfg.dispatcher.limits.max_actions);
    println!("  Max input size: {} bytes", cfg.dispatcher.limits.max_instruction_bytes);
    println!("  Denylist:       {}", cfg.dispatcher.limits.denylist_patterns.join(", "));
    println!();
    println!("Trigger:");
    println!("  Confidence threshold: {}", cfg.trigger.confidence_threshold);
    println!("  Risk threshold:       {}", cfg.trigger.risk_threshold);
    println!("  Cooldown:             {} min", cfg.trigger.cooldown_minutes);
    println!("  Action timeout:       {}s", cfg.trigger.action_timeout_seconds);
    println!("  High-load threshold:  {}", cfg.trigger.high_load_threshold);
    println!("  Dry run:              {}", cfg.trigger.dry_run);
    println!("  Use sudo:             {}", cfg.trigger.use_sudo);

    Ok(())
}
