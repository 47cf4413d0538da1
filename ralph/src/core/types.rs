//! Shared deterministic types for the pipeline core.
//!
//! These types are the contracts between the classifier, the retry/resume
//! controller, and the orchestrator. They carry no I/O and serialize into the
//! session audit log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::core::usage::UsageError;

/// One unit of work: `project#number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub project: String,
    pub number: u32,
}

impl TaskRef {
    pub fn new(project: impl Into<String>, number: u32) -> Self {
        Self {
            project: project.into(),
            number,
        }
    }

    /// File-name-safe form (`project_number`).
    pub fn slug(&self) -> String {
        format!("{}_{}", self.project, self.number)
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.project, self.number)
    }
}

impl FromStr for TaskRef {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, number) = s
            .rsplit_once('#')
            .ok_or_else(|| UsageError::new(format!("expected project#number, got '{s}'")))?;
        if project.trim().is_empty() {
            return Err(UsageError::new(format!("missing project name in '{s}'")));
        }
        let number = number
            .parse::<u32>()
            .map_err(|_| UsageError::new(format!("invalid task number in '{s}'")))?;
        Ok(Self::new(project, number))
    }
}

/// Classification of a single run attempt. Exactly one applies per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Completed,
    ContextOverflow,
    AuthExpired,
    RateLimit,
    Overloaded,
    ApiTimeout,
    Forbidden,
    OnHold,
    Unknown,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "COMPLETED",
            Outcome::ContextOverflow => "CONTEXT_OVERFLOW",
            Outcome::AuthExpired => "AUTH_EXPIRED",
            Outcome::RateLimit => "RATE_LIMIT",
            Outcome::Overloaded => "OVERLOADED",
            Outcome::ApiTimeout => "API_TIMEOUT",
            Outcome::Forbidden => "FORBIDDEN",
            Outcome::OnHold => "ON_HOLD",
            Outcome::Unknown => "UNKNOWN",
        }
    }

    /// Backing-service errors that the recovery loop can wait out.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Outcome::AuthExpired | Outcome::ApiTimeout | Outcome::RateLimit | Outcome::Overloaded
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task ended as `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "outcome", rename_all = "snake_case")]
pub enum FailureReason {
    /// Fresh-session retries after context overflow ran out.
    ContextOverflowExhausted,
    /// Clean exit without a completion marker.
    Incomplete,
    /// Non-zero exit with no recognizable marker.
    Unknown,
    /// Transient error while recovery was disabled.
    Unrecovered(Outcome),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ContextOverflowExhausted => f.write_str("CONTEXT_OVERFLOW_EXHAUSTED"),
            FailureReason::Incomplete => f.write_str("INCOMPLETE"),
            FailureReason::Unknown => f.write_str("UNKNOWN"),
            FailureReason::Unrecovered(outcome) => write!(f, "{outcome}"),
        }
    }
}

/// Why a task halted the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "outcome", rename_all = "snake_case")]
pub enum AbortReason {
    Forbidden,
    /// Recovery loop ran out of waits for this transient error.
    RecoveryExhausted(Outcome),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Forbidden => f.write_str("FORBIDDEN"),
            AbortReason::RecoveryExhausted(outcome) => write!(f, "{outcome} (recovery exhausted)"),
        }
    }
}

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    OnHold,
    Failed { cause: FailureReason },
    PipelineAborted { cause: AbortReason },
}

impl TaskStatus {
    pub fn failed(cause: FailureReason) -> Self {
        TaskStatus::Failed { cause }
    }

    pub fn aborted(cause: AbortReason) -> Self {
        TaskStatus::PipelineAborted { cause }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, TaskStatus::PipelineAborted { .. })
    }

    /// Failed or aborted; these make the session exit non-zero.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed { .. } | TaskStatus::PipelineAborted { .. }
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Completed => f.write_str("completed"),
            TaskStatus::OnHold => f.write_str("on-hold"),
            TaskStatus::Failed { cause } => write!(f, "failed ({cause})"),
            TaskStatus::PipelineAborted { cause } => write!(f, "pipeline-aborted ({cause})"),
        }
    }
}

/// One finished invocation of the assistant process.
#[derive(Debug, Clone)]
pub struct RunAttempt {
    /// 1-based attempt index within the task.
    pub index: u32,
    pub resumed: bool,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    /// Captured stdout + stderr (bounded).
    pub output: String,
    /// `None` when the process was killed or never started.
    pub exit_code: Option<i32>,
    /// Session identifier exposed in the event stream, usable as a resume token.
    pub session_id: Option<String>,
}

impl RunAttempt {
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Final record for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: TaskRef,
    #[serde(flatten)]
    pub status: TaskStatus,
    pub attempts: u32,
    pub duration_secs: u64,
}

/// Format seconds as `HH:MM:SS`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}
