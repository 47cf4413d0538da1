//! Ralph configuration (`~/.claude/ralph.toml`).
//!
//! The configuration is loaded exactly once at startup and passed down by
//! reference. This module is the only place that consults the process
//! environment.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::controller::RetryPolicy;

pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const TELEGRAM_CHAT_ENV: &str = "TELEGRAM_CHAT_ID";

/// Top-level configuration (TOML). Missing fields take defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root for session and task logs.
    pub log_dir: PathBuf,

    /// Gate for the wait-and-recheck recovery path.
    pub recovery_enabled: bool,

    /// Waits before each health probe, in order.
    pub recovery_delays_secs: Vec<u64>,

    /// Fresh-session retries allowed after context overflow.
    pub context_overflow_max_retries: u32,

    /// Kill an attempt that runs longer than this.
    pub attempt_timeout_secs: u64,

    /// Cap on captured output kept in memory for classification.
    pub output_limit_bytes: usize,

    pub assistant: AssistantConfig,
    pub health: HealthConfig,
    pub telegram: TelegramConfig,

    /// Opaque spend cap forwarded to the assistant. CLI only.
    #[serde(skip)]
    pub max_budget_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssistantConfig {
    /// Executable name or path.
    pub command: String,
    pub model: String,
    pub implement_skill: String,
    pub batch_check_skill: String,
    pub plan_skill: String,
    /// `(label, skill)` pairs run by `ralph review`, in order.
    pub review_skills: Vec<ReviewSkill>,
    pub review_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewSkill {
    pub name: String,
    pub skill: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.bot_token) && set(&self.chat_id)
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        let review = |name: &str, skill: &str| ReviewSkill {
            name: name.to_string(),
            skill: skill.to_string(),
        };
        Self {
            command: "claude".to_string(),
            model: "opus".to_string(),
            implement_skill: "ralph-implement-python-task".to_string(),
            batch_check_skill: "ralph-batch-check".to_string(),
            plan_skill: "ralph-plan-task".to_string(),
            review_skills: vec![
                review("Code Review", "ralph-review-code"),
                review("Code Simplifier", "ralph-review-simplify"),
                review("Security Review", "ralph-review-security"),
                review("Codex Review", "ralph-review-codex"),
            ],
            review_timeout_secs: 30 * 60,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: claude_home().join("logs"),
            recovery_enabled: true,
            recovery_delays_secs: vec![600, 1200, 1800],
            context_overflow_max_retries: 2,
            attempt_timeout_secs: 6 * 60 * 60,
            output_limit_bytes: 20_000_000,
            assistant: AssistantConfig::default(),
            health: HealthConfig::default(),
            telegram: TelegramConfig::default(),
            max_budget_usd: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.recovery_delays_secs.is_empty() {
            return Err(anyhow!("recovery_delays_secs must not be empty"));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(anyhow!("attempt_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.assistant.command.trim().is_empty() {
            return Err(anyhow!("assistant.command must be non-empty"));
        }
        if self.assistant.review_timeout_secs == 0 || self.health.timeout_secs == 0 {
            return Err(anyhow!("review and health timeouts must be > 0"));
        }
        if self.max_budget_usd.is_some_and(|b| b <= 0.0 || !b.is_finite()) {
            return Err(anyhow!("max budget must be a positive number"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            recovery_enabled: self.recovery_enabled,
            context_overflow_max_retries: self.context_overflow_max_retries,
        }
    }

    pub fn recovery_delays(&self) -> Vec<Duration> {
        self.recovery_delays_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// `~/.claude`, or `.claude` when no home directory is known.
pub fn claude_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".claude"))
        .unwrap_or_else(|| PathBuf::from(".claude"))
}

pub fn default_config_path() -> PathBuf {
    claude_home().join("ralph.toml")
}

/// Load config from a TOML file and apply environment overrides.
///
/// If the file is missing, defaults are used.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut cfg = read_config_file(path)?;
    apply_env_overrides(&mut cfg, |key| env::var(key).ok());
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// Environment values replace file values for notification secrets.
fn apply_env_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup(TELEGRAM_TOKEN_ENV).filter(|v| !v.is_empty()) {
        cfg.telegram.bot_token = Some(token);
    }
    if let Some(chat) = lookup(TELEGRAM_CHAT_ENV).filter(|v| !v.is_empty()) {
        cfg.telegram.chat_id = Some(chat);
    }
}
