//! Optimization actions run when an intent triggers.
//!
//! The built-in `SystemTuning` action applies a sequence of CPU governor,
//! sysctl and `/proc` writes. Missing tools are reported per step rather
//! than failing the action.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::adapters::{CommandError, CommandRunner, CommandSpec};
use crate::config::TriggerSettings;
use crate::domain::truncate_chars;

use super::engine::TriggerError;

/// Per-step command timeout
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Characters of stderr kept in a failed step
const STDERR_CHARS: usize = 500;

/// One system change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TuningStep {
    /// `cpupower frequency-set -g <governor>`
    Governor { governor: String },
    /// `sysctl -w key=value`
    Sysctl { key: String, value: String },
    /// Direct write into a kernel tunable file
    ProcWrite { path: PathBuf, value: String },
}

impl TuningStep {
    pub fn governor(governor: impl Into<String>) -> Self {
        Self::Governor {
            governor: governor.into(),
        }
    }

    pub fn sysctl(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Sysctl {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn proc_write(path: impl Into<PathBuf>, value: impl Into<String>) -> Self {
        Self::ProcWrite {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Command for process-based steps
    pub fn command(&self) -> Option<CommandSpec> {
        match self {
            Self::Governor { governor } => Some(CommandSpec::new(
                "cpupower",
                ["frequency-set", "-g", governor.as_str()],
            )),
            Self::Sysctl { key, value } => {
                Some(CommandSpec::new("sysctl", ["-w".to_string(), format!("{}={}", key, value)]))
            }
            Self::ProcWrite { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Governor { governor } => format!("cpu governor -> {}", governor),
            Self::Sysctl { key, value } => format!("sysctl {}={}", key, value),
            Self::ProcWrite { path, value } => format!("write {} -> {}", value, path.display()),
        }
    }
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    Failed { exit_code: Option<i32>, stderr: String },
    Unavailable { reason: String },
    TimedOut,
    DryRun,
}

impl StepStatus {
    /// Failures that make the whole action unsuccessful
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: TuningStep,
    pub status: StepStatus,
}

/// Result of applying an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub action: String,
    pub steps: Vec<StepReport>,
}

impl ActionOutcome {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            steps: Vec::new(),
        }
    }

    /// No step failed or timed out
    pub fn success(&self) -> bool {
        !self.steps.iter().any(|s| s.status.is_failure())
    }

    /// Human-readable list of failing steps
    pub fn failure_summary(&self) -> String {
        self.steps
            .iter()
            .filter(|s| s.status.is_failure())
            .map(|s| match &s.status {
                StepStatus::Failed { exit_code, stderr } => {
                    format!("{} failed ({:?}): {}", s.step.describe(), exit_code, stderr.trim())
                }
                _ => format!("{} timed out", s.step.describe()),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Something the trigger can run for an intent
#[async_trait]
pub trait OptimizationAction: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self) -> Result<ActionOutcome, TriggerError>;
}

/// A named sequence of tuning steps
pub struct SystemTuning {
    name: String,
    steps: Vec<TuningStep>,
    runner: Arc<dyn CommandRunner>,
    dry_run: bool,
    sudo: bool,
}

impl SystemTuning {
    pub fn new(name: impl Into<String>, steps: Vec<TuningStep>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            name: name.into(),
            steps,
            runner,
            dry_run: false,
            sudo: false,
        }
    }

    /// Record steps without touching the system
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Prefix commands with `sudo -n`
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn steps(&self) -> &[TuningStep] {
        &self.steps
    }

    async fn apply_step(&self, step: &TuningStep) -> StepStatus {
        if self.dry_run {
            return StepStatus::DryRun;
        }

        match step {
            TuningStep::ProcWrite { path, value } => {
                if !path.exists() {
                    return StepStatus::Unavailable {
                        reason: format!("{} does not exist", path.display()),
                    };
                }
                match tokio::time::timeout(STEP_TIMEOUT, tokio::fs::write(path, value)).await {
                    Ok(Ok(())) => StepStatus::Applied,
                    Ok(Err(e)) => StepStatus::Failed {
                        exit_code: None,
                        stderr: e.to_string(),
                    },
                    Err(_) => StepStatus::TimedOut,
                }
            }
            _ => {
                let Some(spec) = step.command() else {
                    return StepStatus::Unavailable {
                        reason: "no command for step".to_string(),
                    };
                };
                if !self.runner.is_available(&spec.program) {
                    return StepStatus::Unavailable {
                        reason: format!("{} not installed", spec.program),
                    };
                }

                let spec = spec.with_timeout(STEP_TIMEOUT).with_sudo(self.sudo);
                match self.runner.run(&spec).await {
                    Ok(output) if output.success() => StepStatus::Applied,
                    Ok(output) => StepStatus::Failed {
                        exit_code: output.exit_code,
                        stderr: truncate_chars(&output.stderr, STDERR_CHARS),
                    },
                    Err(CommandError::TimedOut { .. }) => StepStatus::TimedOut,
                    Err(CommandError::NotFound { program }) => StepStatus::Unavailable {
                        reason: format!("{} not installed", program),
                    },
                    Err(e) => StepStatus::Failed {
                        exit_code: None,
                        stderr: e.to_string(),
                    },
                }
            }
        }
    }
}

#[async_trait]
impl OptimizationAction for SystemTuning {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self) -> Result<ActionOutcome, TriggerError> {
        let mut outcome = ActionOutcome::new(&self.name);

        // No rollback: earlier steps stay applied if a later one fails
        for step in &self.steps {
            let status = self.apply_step(step).await;
            tracing::debug!(action = %self.name, step = %step.describe(), ?status, "Tuning step");
            outcome.steps.push(StepReport {
                step: step.clone(),
                status,
            });
        }

        Ok(outcome)
    }
}

/// Built-in intent → tuning mapping
pub fn default_actions(
    runner: Arc<dyn CommandRunner>,
    settings: &TriggerSettings,
) -> Vec<(&'static str, SystemTuning)> {
    let tuning = |name: &str, steps: Vec<TuningStep>| {
        SystemTuning::new(name, steps, Arc::clone(&runner))
            .with_dry_run(settings.dry_run)
            .with_sudo(settings.use_sudo)
    };

    vec![
        (
            "development",
            tuning("development", vec![TuningStep::governor("performance")]),
        ),
        (
            "gaming",
            tuning(
                "gaming",
                vec![
                    TuningStep::governor("performance"),
                    TuningStep::sysctl("vm.swappiness", "10"),
                ],
            ),
        ),
        (
            "high_computation",
            tuning(
                "high_computation",
                vec![
                    TuningStep::governor("performance"),
                    TuningStep::sysctl("kernel.sched_autogroup_enabled", "0"),
                ],
            ),
        ),
        (
            "multimedia",
            tuning("multimedia", vec![TuningStep::sysctl("vm.swappiness", "30")]),
        ),
        (
            "power_saving",
            tuning("power_saving", vec![TuningStep::governor("powersave")]),
        ),
        ("idle", tuning("idle", vec![TuningStep::governor("powersave")])),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::CommandOutput;
    use std::sync::Mutex;

    /// Runner that records commands and answers with a fixed exit code
    struct ScriptedRunner {
        exit_code: i32,
        available: bool,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(exit_code: i32, available: bool) -> Self {
            Self {
                exit_code,
                available,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
            self.seen.lock().unwrap().push(spec.display());
            Ok(CommandOutput {
                exit_code: Some(self.exit_code),
                stdout: String::new(),
                stderr: if self.exit_code == 0 { String::new() } else { "permission denied".to_string() },
                duration: Duration::ZERO,
            })
        }

        fn is_available(&self, _program: &str) -> bool {
            self.available
        }
    }

    #[test]
    fn test_step_commands() {
        let gov = TuningStep::governor("performance").command().unwrap();
        assert_eq!(gov.display(), "cpupower frequency-set -g performance");

        let sysctl = TuningStep::sysctl("vm.swappiness", "10").command().unwrap();
        assert_eq!(sysctl.display(), "sysctl -w vm.swappiness=10");

        assert!(TuningStep::proc_write("/proc/sys/vm/swappiness", "10").command().is_none());
    }

    #[tokio::test]
    async fn test_applied_steps() {
        let runner = Arc::new(ScriptedRunner::new(0, true));
        let action = SystemTuning::new(
            "gaming",
            vec![TuningStep::governor("performance"), TuningStep::sysctl("vm.swappiness", "10")],
            runner.clone(),
        );

        let outcome = action.apply().await.unwrap();
        assert!(outcome.success());
        assert!(outcome.steps.iter().all(|s| s.status == StepStatus::Applied));
        assert_eq!(
            *runner.seen.lock().unwrap(),
            vec!["cpupower frequency-set -g performance", "sysctl -w vm.swappiness=10"]
        );
    }

    #[tokio::test]
    async fn test_failed_step_fails_action() {
        let runner = Arc::new(ScriptedRunner::new(1, true));
        let action = SystemTuning::new("dev", vec![TuningStep::governor("performance")], runner);

        let outcome = action.apply().await.unwrap();
        assert!(!outcome.success());
        assert_eq!(
            outcome.steps[0].status,
            StepStatus::Failed {
                exit_code: Some(1),
                stderr: "permission denied".to_string()
            }
        );
        assert!(outcome.failure_summary().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_missing_tools_are_tolerated() {
        let runner = Arc::new(ScriptedRunner::new(0, false));
        let action = SystemTuning::new(
            "idle",
            vec![
                TuningStep::governor("powersave"),
                TuningStep::proc_write("/definitely/not/a/tunable", "1"),
            ],
            runner.clone(),
        );

        let outcome = action.apply().await.unwrap();
        assert!(outcome.success());
        assert!(outcome
            .steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Unavailable { .. })));
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_spawns_nothing() {
        let runner = Arc::new(ScriptedRunner::new(0, true));
        let action = SystemTuning::new("gaming", vec![TuningStep::governor("performance")], runner.clone())
            .with_dry_run(true);

        let outcome = action.apply().await.unwrap();
        assert_eq!(outcome.steps[0].status, StepStatus::DryRun);
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_proc_write() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("swappiness");
        std::fs::write(&path, "60").unwrap();

        let action = SystemTuning::new(
            "custom",
            vec![TuningStep::proc_write(&path, "10")],
            Arc::new(ScriptedRunner::new(0, true)),
        );
        let outcome = action.apply().await.unwrap();
        assert_eq!(outcome.steps[0].status, StepStatus::Applied);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "10");
    }

    #[test]
    fn test_default_mapping() {
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner::new(0, true));
        let actions = default_actions(runner, &TriggerSettings::default());
        let intents: Vec<&str> = actions.iter().map(|(i, _)| *i).collect();
        assert_eq!(
            intents,
            vec!["development", "gaming", "high_computation", "multimedia", "power_saving", "idle"]
        );

        let (_, gaming) = &actions[1];
        assert_eq!(
            gaming.steps(),
            &[TuningStep::governor("performance"), TuningStep::sysctl("vm.swappiness", "10")]
        );
    }

    #[tokio::test]
    async fn test_default_actions_use_sudo_setting() {
        let runner = Arc::new(ScriptedRunner::new(0, true));
        let settings = TriggerSettings {
            use_sudo: true,
            ..TriggerSettings::default()
        };
        let actions = default_actions(runner.clone(), &settings);
        let (_, development) = &actions[0];

        development.apply().await.unwrap();
        assert_eq!(
            *runner.seen.lock().unwrap(),
            vec!["sudo -n cpupower frequency-set -g performance"]
        );
    }
}
