//! Configuration for omnitide.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (OMNITIDE_HOME, OMNITIDE_INSTRUCTIONS)
//! 2. Config file (.omnitide/config.yaml)
//! 3. Defaults (~/.omnitide)
//!
//! Config file discovery:
//! - Searches current directory and parents for .omnitide/config.yaml
//! - Paths in config file are relative to the .omnitide directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::safety::SafetyLimits;

pub mod paths;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub dispatcher: Option<DispatcherConfig>,
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .omnitide/)
    pub home: Option<String>,
    /// Instruction file watched by the dispatcher
    pub instructions: Option<String>,
    /// Result file written after each block
    pub results: Option<String>,
    /// JSONL history log
    pub history: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    pub poll_interval_seconds: Option<u64>,
    pub action_timeout_seconds: Option<u64>,
    pub snippet_chars: Option<usize>,
    pub max_actions: Option<usize>,
    pub max_instruction_bytes: Option<u64>,
    pub denylist_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    pub confidence_threshold: Option<f64>,
    pub risk_threshold: Option<f64>,
    pub cooldown_minutes: Option<u64>,
    pub action_timeout_seconds: Option<u64>,
    pub high_load_threshold: Option<f64>,
    pub dry_run: Option<bool>,
    pub use_sudo: Option<bool>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to omnitide home (state)
    pub home: PathBuf,
    /// Instruction file polled by `listen`
    pub instructions_path: PathBuf,
    /// Result file written after each block
    pub results_path: PathBuf,
    /// JSONL history log
    pub history_path: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Dispatcher settings
    pub dispatcher: DispatcherSettings,
    /// Trigger settings
    pub trigger: TriggerSettings,
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub poll_interval_seconds: u64,
    pub action_timeout_seconds: u64,
    pub snippet_chars: usize,
    pub limits: SafetyLimits,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            action_timeout_seconds: 300,
            snippet_chars: crate::domain::DEFAULT_SNIPPET_CHARS,
            limits: SafetyLimits::default(),
        }
    }
}

impl DispatcherSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSettings {
    pub confidence_threshold: f64,
    pub risk_threshold: f64,
    pub cooldown_minutes: u64,
    pub action_timeout_seconds: u64,
    pub high_load_threshold: f64,
    pub dry_run: bool,
    /// Run tuning commands through `sudo -n`
    pub use_sudo: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            risk_threshold: 0.3,
            cooldown_minutes: 15,
            action_timeout_seconds: 30,
            high_load_threshold: 0.9,
            dry_run: false,
            use_sudo: false,
        }
    }
}

impl DispatcherConfig {
    fn resolve(&self) -> DispatcherSettings {
        let defaults = DispatcherSettings::default();
        let mut limits = defaults.limits.clone();
        if let Some(max_actions) = self.max_actions {
            limits.max_actions = max_actions;
        }
        if let Some(max_bytes) = self.max_instruction_bytes {
            limits.max_instruction_bytes = max_bytes;
        }
        if let Some(ref patterns) = self.denylist_patterns {
            limits.denylist_patterns = patterns.clone();
        }

        DispatcherSettings {
            poll_interval_seconds: self
                .poll_interval_seconds
                .unwrap_or(defaults.poll_interval_seconds),
            action_timeout_seconds: self
                .action_timeout_seconds
                .unwrap_or(defaults.action_timeout_seconds),
            snippet_chars: self.snippet_chars.unwrap_or(defaults.snippet_chars),
            limits,
        }
    }
}

impl TriggerConfig {
    fn resolve(&self) -> TriggerSettings {
        let defaults = TriggerSettings::default();
        TriggerSettings {
            confidence_threshold: self
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            risk_threshold: self.risk_threshold.unwrap_or(defaults.risk_threshold),
            cooldown_minutes: self.cooldown_minutes.unwrap_or(defaults.cooldown_minutes),
            action_timeout_seconds: self
                .action_timeout_seconds
                .unwrap_or(defaults.action_timeout_seconds),
            high_load_threshold: self
                .high_load_threshold
                .unwrap_or(defaults.high_load_threshold),
            dry_run: self.dry_run.unwrap_or(defaults.dry_run),
            use_sudo: self.use_sudo.unwrap_or(defaults.use_sudo),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".omnitide").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file over the defaults rooted at `default_home`
fn resolve(config: Option<(&Path, ConfigFile)>, default_home: PathBuf) -> ResolvedConfig {
    let env_home = std::env::var("OMNITIDE_HOME").ok().map(PathBuf::from);
    let env_instructions = std::env::var("OMNITIDE_INSTRUCTIONS").ok().map(PathBuf::from);

    let Some((config_path, config)) = config else {
        let home = env_home.unwrap_or(default_home);
        return ResolvedConfig {
            instructions_path: env_instructions.unwrap_or_else(|| home.join("instructions.json")),
            results_path: home.join("results.json"),
            history_path: home.join("history.jsonl"),
            home,
            config_file: None,
            dispatcher: DispatcherSettings::default(),
            trigger: TriggerSettings::default(),
        };
    };

    // Paths in the file are relative to .omnitide/
    let omnitide_dir = config_path.parent().unwrap_or(Path::new("."));

    let home = if let Some(home) = env_home {
        home
    } else if let Some(ref home_path) = config.paths.home {
        resolve_path(omnitide_dir, home_path)
    } else {
        default_home
    };

    let file_path = |value: &Option<String>, fallback: &str| {
        value
            .as_deref()
            .map(|p| resolve_path(omnitide_dir, p))
            .unwrap_or_else(|| home.join(fallback))
    };

    let instructions_path = env_instructions
        .unwrap_or_else(|| file_path(&config.paths.instructions, "instructions.json"));
    let results_path = file_path(&config.paths.results, "results.json");
    let history_path = file_path(&config.paths.history, "history.jsonl");

    ResolvedConfig {
        instructions_path,
        results_path,
        history_path,
        config_file: Some(config_path.to_path_buf()),
        dispatcher: config
            .dispatcher
            .as_ref()
            .map(DispatcherConfig::resolve)
            .unwrap_or_default(),
        trigger: config
            .trigger
            .as_ref()
            .map(TriggerConfig::resolve)
            .unwrap_or_default(),
        home,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".omnitide");

    match find_config_file() {
        Some(config_path) => {
            let config = load_config_file(&config_path)?;
            Ok(resolve(Some((&config_path, config)), default_home))
        }
        None => Ok(resolve(None, default_home)),
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the omnitide home directory.
pub fn omnitide_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}
