//! Persistent run artefacts: the session audit log and per-task output logs.
//!
//! Layout under the configured log directory:
//!
//! ```text
//! <log_dir>/ralph-<command>/session_<ts>.jsonl   one JSON event per line
//! <log_dir>/ralph-<command>/<project>_<n>_<ts>_q<pos>.log  raw output, all attempts
//! <log_dir>/ralph-<command>/batch_check_<ts>.log
//! <log_dir>/reviews/<project>_<n>_<skill>_<ts>.log
//! ```
//!
//! The audit log is append-only and created fresh for every invocation.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;
use serde_json::Value;

use crate::core::session::SessionSummary;
use crate::core::types::{Outcome, RunAttempt, TaskRef, TaskResult};

/// Invocation timestamp used in file names: `YYYYmmdd_HHMMSS_mmm`.
pub fn log_stamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// File locations for one invocation of a command.
#[derive(Debug, Clone)]
pub struct LogPaths {
    pub dir: PathBuf,
    pub stamp: String,
}

impl LogPaths {
    pub fn new(log_dir: &Path, command: &str, stamp: impl Into<String>) -> Self {
        Self {
            dir: log_dir.join(format!("ralph-{command}")),
            stamp: stamp.into(),
        }
    }

    pub fn session(&self) -> PathBuf {
        self.dir.join(format!("session_{}.jsonl", self.stamp))
    }

    /// `position` is the 1-based queue slot, so a task selected twice gets two logs.
    pub fn task(&self, task: &TaskRef, position: usize) -> PathBuf {
        self.dir.join(format!("{}_{}_q{position}.log", task.slug(), self.stamp))
    }

    pub fn batch_check(&self) -> PathBuf {
        self.dir.join(format!("batch_check_{}.log", self.stamp))
    }
}

pub fn review_log_path(log_dir: &Path, task: &TaskRef, skill: &str, stamp: &str) -> PathBuf {
    log_dir
        .join("reviews")
        .join(format!("{}_{skill}_{stamp}.log", task.slug()))
}

/// One line of the session audit log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    SessionStarted {
        command: String,
        project: String,
        tasks: Vec<u32>,
        working_dir: String,
        recovery_enabled: bool,
    },
    WorkspaceReset {
        task: String,
        discarded: Vec<String>,
    },
    WorkspaceResetFailed {
        task: String,
        error: String,
    },
    AttemptStarted {
        task: String,
        attempt: u32,
        resumed: bool,
        note: Option<String>,
    },
    AttemptFinished {
        task: String,
        attempt: u32,
        exit_code: Option<i32>,
        outcome: Outcome,
    },
    ContextOverflowRetry {
        task: String,
        retry: u32,
        max_retries: u32,
    },
    RecoveryStarted {
        task: String,
        outcome: Outcome,
    },
    RecoveryProbe {
        attempt: usize,
        max_attempts: usize,
        delay_secs: u64,
        status: String,
        message: String,
    },
    RecoveryFinished {
        task: String,
        recovered: bool,
    },
    /// Recovery succeeded but the failed attempt exposed no session to resume.
    ResumeTokenMissing {
        task: String,
    },
    TaskFinished(TaskResult),
    PipelineHalted {
        task: String,
        reason: String,
    },
    BatchCheck {
        tasks: Vec<String>,
        success: bool,
        error: Option<String>,
    },
    SessionFinished {
        summary: SessionSummary,
        exit_code: i32,
    },
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Append-only JSONL writer for one session.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: File,
}

impl AuditLog {
    /// Create a new log file; fails if one already exists at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)
            .with_context(|| format!("create audit log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, event: AuditEvent) -> Result<()> {
        let record = AuditRecord {
            ts: Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            event: &event,
        };
        let mut line = serde_json::to_string(&record).context("serialize audit event")?;
        line.push('\n');
        (&self.file)
            .write_all(line.as_bytes())
            .with_context(|| format!("append audit log {}", self.path.display()))
    }
}

/// Read back every record of an audit log.
pub fn read_audit_log(path: &Path) -> Result<Vec<Value>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read audit log {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("parse audit line"))
        .collect()
}

/// Frame an attempt in the per-task log before its output is tee'd in.
pub fn append_attempt_header(
    path: &Path,
    task: &TaskRef,
    index: u32,
    resumed: bool,
    note: Option<&str>,
    started_at: DateTime<Local>,
) -> Result<()> {
    let mut text = format!(
        "\n===== {task} attempt {index}{} @ {} =====\n",
        if resumed { " (resumed)" } else { "" },
        started_at.to_rfc3339_opts(SecondsFormat::Secs, false)
    );
    if let Some(note) = note {
        text.push_str(&format!("note: {note}\n"));
    }
    append_text(path, &text)
}

pub fn append_attempt_footer(path: &Path, attempt: &RunAttempt, outcome: Outcome) -> Result<()> {
    let exit = attempt
        .exit_code
        .map_or_else(|| "none".to_string(), |code| code.to_string());
    let text = format!(
        "\n===== attempt {} finished @ {} exit={exit} outcome={outcome} =====\n",
        attempt.index,
        attempt.ended_at.to_rfc3339_opts(SecondsFormat::Secs, false)
    );
    append_text(path, &text)
}

fn append_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open task log {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("append task log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AbortReason, TaskStatus};
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
            .single()
            .expect("valid time")
    }

    #[test]
    fn paths_follow_naming_scheme() {
        let stamp = log_stamp(at());
        assert_eq!(stamp, "20260102_030405_000");
        let paths = LogPaths::new(Path::new("/logs"), "implement", stamp);
        let task = TaskRef::new("shop", 4);
        assert_eq!(
            paths.session(),
            Path::new("/logs/ralph-implement/session_20260102_030405_000.jsonl")
        );
        assert_eq!(
            paths.task(&task, 3),
            Path::new("/logs/ralph-implement/shop_4_20260102_030405_000_q3.log")
        );
        assert_ne!(paths.task(&task, 1), paths.task(&task, 2));
        assert!(paths.batch_check().ends_with("batch_check_20260102_030405_000.log"));
        assert_eq!(
            review_log_path(Path::new("/logs"), &task, "ralph-review-code", "s"),
            Path::new("/logs/reviews/shop_4_ralph-review-code_s.log")
        );
    }

    #[test]
    fn audit_log_appends_tagged_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ralph-implement").join("session.jsonl");
        let log = AuditLog::create(&path).expect("create");
        log.record(AuditEvent::RecoveryFinished {
            task: "shop#1".to_string(),
            recovered: true,
        })
        .expect("record");
        log.record(AuditEvent::TaskFinished(TaskResult {
            task: TaskRef::new("shop", 1),
            status: TaskStatus::aborted(AbortReason::RecoveryExhausted(Outcome::RateLimit)),
            attempts: 2,
            duration_secs: 30,
        }))
        .expect("record");

        let records = read_audit_log(&path).expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["event"], "recovery_finished");
        assert!(records[0]["ts"].as_str().is_some());
        assert_eq!(records[1]["event"], "task_finished");
        assert_eq!(records[1]["status"], "pipeline_aborted");
        assert_eq!(records[1]["cause"]["outcome"], "RATE_LIMIT");
        assert_eq!(records[1]["attempts"], 2);
    }

    #[test]
    fn audit_log_refuses_to_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.jsonl");
        fs::write(&path, "existing\n").expect("seed");
        assert!(AuditLog::create(&path).is_err());
        assert_eq!(fs::read_to_string(&path).expect("read"), "existing\n");
    }

    #[test]
    fn attempt_frames_accumulate_in_task_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("shop_1.log");
        let task = TaskRef::new("shop", 1);
        append_attempt_header(&path, &task, 1, false, None, at()).expect("header");
        append_attempt_footer(
            &path,
            &RunAttempt {
                index: 1,
                resumed: false,
                started_at: at(),
                ended_at: at(),
                output: String::new(),
                exit_code: None,
                session_id: None,
            },
            Outcome::Unknown,
        )
        .expect("footer");
        append_attempt_header(&path, &task, 2, true, Some("resume"), at()).expect("header");

        let text = fs::read_to_string(&path).expect("read");
        assert!(text.contains("shop#1 attempt 1 @"));
        assert!(text.contains("exit=none outcome=UNKNOWN"));
        assert!(text.contains("shop#1 attempt 2 (resumed) @"));
        assert!(text.contains("note: resume"));
    }
}
