//! Out-of-band operator notifications (Telegram).
//!
//! Notifications are best effort: a failed delivery is logged and never
//! changes a task or session outcome.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::types::TaskRef;
use crate::io::config::TelegramConfig;

const TELEGRAM_API: &str = "https://api.telegram.org";
const MAX_LISTED_TASKS: usize = 10;

/// Lifecycle events an operator is told about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    SessionStart {
        project: String,
        tasks: Vec<u32>,
        at: DateTime<Local>,
    },
    TaskFailed {
        task: TaskRef,
        reason: String,
    },
    RecoveryStart {
        attempt: usize,
        max_attempts: usize,
        delay: Duration,
    },
    RecoverySuccess {
        task: TaskRef,
    },
    ContextOverflow {
        task: TaskRef,
        retry: u32,
        max_retries: u32,
    },
    PipelineStopped {
        reason: String,
        at: DateTime<Local>,
    },
    SessionComplete {
        project: String,
        duration: String,
        /// Task number with its formatted duration.
        completed: Vec<(u32, String)>,
        /// Task number with its failure reason.
        failed: Vec<(u32, String)>,
        on_hold: Vec<u32>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::SessionStart { .. } => "session_start",
            Notification::TaskFailed { .. } => "task_failed",
            Notification::RecoveryStart { .. } => "recovery_start",
            Notification::RecoverySuccess { .. } => "recovery_success",
            Notification::ContextOverflow { .. } => "context_overflow",
            Notification::PipelineStopped { .. } => "pipeline_stopped",
            Notification::SessionComplete { .. } => "session_complete",
        }
    }

    /// Telegram Markdown message text.
    pub fn render(&self) -> String {
        match self {
            Notification::SessionStart { project, tasks, at } => {
                let mut listed = tasks
                    .iter()
                    .take(MAX_LISTED_TASKS)
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                if tasks.len() > MAX_LISTED_TASKS {
                    listed.push_str("...");
                }
                format!(
                    "🚀 *RALPH STARTED*\n\n*Project:* {}\n*Tasks:* {} ({listed})\n*Time:* {}",
                    escape_markdown(project),
                    tasks.len(),
                    at.format("%H:%M")
                )
            }
            Notification::TaskFailed { task, reason } => format!(
                "⚠️ Task {} failed: {}",
                escape_markdown(&task.to_string()),
                escape_markdown(reason)
            ),
            Notification::RecoveryStart {
                attempt,
                max_attempts,
                delay,
            } => format!(
                "🔄 *API error detected*\nRecovery attempt {attempt}/{max_attempts} in {} min",
                delay.as_secs() / 60
            ),
            Notification::RecoverySuccess { task } => format!(
                "✅ *API recovered*\nResuming task {}",
                escape_markdown(&task.to_string())
            ),
            Notification::ContextOverflow {
                task,
                retry,
                max_retries,
            } => format!(
                "⚠️ *Context overflow* on task {}\nRetry {retry}/{max_retries} with fresh session",
                escape_markdown(&task.to_string())
            ),
            Notification::PipelineStopped { reason, at } => format!(
                "🚨 *PIPELINE STOPPED*\n\n*Reason:* {}\n*Time:* {}",
                escape_markdown(reason),
                at.format("%H:%M")
            ),
            Notification::SessionComplete {
                project,
                duration,
                completed,
                failed,
                on_hold,
            } => {
                let mut lines = vec![
                    "📊 *RALPH SESSION COMPLETE*".to_string(),
                    String::new(),
                    format!("*Project:* {}", escape_markdown(project)),
                    format!("*Duration:* {duration}"),
                ];
                if !completed.is_empty() {
                    lines.push(String::new());
                    lines.push(format!("✅ *Completed ({}):*", completed.len()));
                    for (number, took) in completed {
                        lines.push(format!("• #{number} ({took})"));
                    }
                }
                if !failed.is_empty() {
                    lines.push(String::new());
                    lines.push(format!("❌ *Failed ({}):*", failed.len()));
                    for (number, reason) in failed {
                        lines.push(format!("• #{number} — {}", escape_markdown(reason)));
                    }
                }
                if !on_hold.is_empty() {
                    lines.push(String::new());
                    lines.push(format!("⏸ *On hold ({}):*", on_hold.len()));
                    for number in on_hold {
                        lines.push(format!("• #{number}"));
                    }
                }
                lines.join("\n")
            }
        }
    }
}

/// Underscores break Telegram Markdown (e.g. `API_TIMEOUT`).
pub fn escape_markdown(text: &str) -> String {
    text.replace('_', "\\_")
}

pub trait Notifier {
    fn send(&self, notification: &Notification) -> Result<()>;
}

/// Deliver a notification, logging instead of failing.
pub fn notify(notifier: &dyn Notifier, notification: Notification) {
    if let Err(err) = notifier.send(&notification) {
        warn!(kind = notification.kind(), err = %format!("{err:#}"), "notification failed");
    }
}

/// Used when no Telegram credentials are configured.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        debug!(kind = notification.kind(), "notifications disabled, skipping");
        Ok(())
    }
}

pub struct TelegramNotifier {
    client: reqwest::blocking::Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(format!("ralph/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    fn payload(&self, text: &str) -> Value {
        json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        })
    }
}

impl Notifier for TelegramNotifier {
    #[instrument(skip_all, fields(kind = notification.kind()))]
    fn send(&self, notification: &Notification) -> Result<()> {
        let url = format!("{TELEGRAM_API}/bot{}/sendMessage", self.token);
        let response = self
            .client
            .post(&url)
            .json(&self.payload(&notification.render()))
            .send()
            .context("send telegram message")?;
        let status = response.status();
        let body: Value = response.json().unwrap_or(Value::Null);
        if !status.is_success() || body.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(anyhow!("telegram rejected message (status {status})"));
        }
        debug!("notification delivered");
        Ok(())
    }
}

/// Telegram when both credentials are present, otherwise a no-op.
pub fn notifier_from_config(config: &TelegramConfig) -> Box<dyn Notifier> {
    let (Some(token), Some(chat_id)) = (&config.bot_token, &config.chat_id) else {
        return Box::new(NullNotifier);
    };
    if !config.is_configured() {
        return Box::new(NullNotifier);
    }
    match TelegramNotifier::new(token.trim(), chat_id.trim()) {
        Ok(notifier) => Box::new(notifier),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "telegram disabled");
            Box::new(NullNotifier)
        }
    }
}
