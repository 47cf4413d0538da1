//! Test-only fakes for the pipeline's collaborators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Local;
use tempfile::TempDir;

use crate::core::classifier::COMPLETION_PHRASE;
use crate::core::stream::find_session_id;
use crate::core::types::{RunAttempt, TaskRef};
use crate::io::assistant::{Assistant, AttemptRequest};
use crate::io::audit_log::{AuditLog, LogPaths, read_audit_log};
use crate::io::config::Config;
use crate::io::git::Workspace;
use crate::io::health::{HealthCheck, HealthReport, HealthStatus};
use crate::io::notify::{Notification, Notifier};
use crate::recovery::Sleeper;

/// Canned output for one assistant attempt.
#[derive(Debug, Clone)]
pub struct ScriptedAttempt {
    pub output: String,
    pub exit_code: Option<i32>,
}

fn init_line(session_id: &str) -> String {
    format!(r#"{{"type":"system","subtype":"init","session_id":"{session_id}","model":"test"}}"#)
}

/// Clean exit with the completion phrase.
pub fn completed_output() -> ScriptedAttempt {
    ScriptedAttempt {
        output: format!("{}\nall done {COMPLETION_PHRASE}\n", init_line("sess-ok")),
        exit_code: Some(0),
    }
}

/// Clean exit with no recognizable marker.
pub fn incomplete_output() -> ScriptedAttempt {
    ScriptedAttempt {
        output: "made some progress\n".to_string(),
        exit_code: Some(0),
    }
}

/// Non-zero exit printing `message`, optionally exposing a session id.
pub fn error_output(message: &str, session_id: Option<&str>) -> ScriptedAttempt {
    let mut output = String::new();
    if let Some(id) = session_id {
        output.push_str(&init_line(id));
        output.push('\n');
    }
    output.push_str(message);
    output.push('\n');
    ScriptedAttempt {
        output,
        exit_code: Some(1),
    }
}

/// What the pipeline asked the assistant to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub task: TaskRef,
    pub index: u32,
    pub resume_token: Option<String>,
    pub note: Option<String>,
}

/// Assistant that replays queued attempts in order.
pub struct ScriptedAssistant {
    queue: RefCell<VecDeque<ScriptedAttempt>>,
    calls: RefCell<Vec<RecordedCall>>,
    batch_calls: RefCell<Vec<Vec<TaskRef>>>,
    batch_result: Result<bool, String>,
}

impl ScriptedAssistant {
    pub fn new(attempts: Vec<ScriptedAttempt>) -> Self {
        Self {
            queue: RefCell::new(attempts.into()),
            calls: RefCell::new(Vec::new()),
            batch_calls: RefCell::new(Vec::new()),
            batch_result: Ok(true),
        }
    }

    pub fn with_failing_batch_check(mut self) -> Self {
        self.batch_result = Err("batch check crashed".to_string());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub fn batch_calls(&self) -> Vec<Vec<TaskRef>> {
        self.batch_calls.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Assistant for ScriptedAssistant {
    fn run_task(&self, request: &AttemptRequest<'_>) -> RunAttempt {
        self.calls.borrow_mut().push(RecordedCall {
            task: request.task.clone(),
            index: request.index,
            resume_token: request.resume_token.map(str::to_string),
            note: request.note.map(str::to_string),
        });
        let scripted = self
            .queue
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted attempt left for {}", request.task));
        let now = Local::now();
        RunAttempt {
            index: request.index,
            resumed: request.resume_token.is_some(),
            started_at: now,
            ended_at: now,
            session_id: find_session_id(&scripted.output),
            output: scripted.output,
            exit_code: scripted.exit_code,
        }
    }

    fn batch_check(&self, tasks: &[TaskRef], _log_path: &Path) -> Result<bool> {
        self.batch_calls.borrow_mut().push(tasks.to_vec());
        self.batch_result.clone().map_err(|msg| anyhow!(msg))
    }
}

/// Health check that replays statuses; the last one repeats forever.
pub struct ScriptedHealthCheck {
    queue: RefCell<VecDeque<HealthStatus>>,
    last: Cell<HealthStatus>,
    calls: Cell<usize>,
}

impl ScriptedHealthCheck {
    pub fn new(statuses: Vec<HealthStatus>) -> Self {
        let last = statuses.last().copied().unwrap_or(HealthStatus::OtherError);
        Self {
            queue: RefCell::new(statuses.into()),
            last: Cell::new(last),
            calls: Cell::new(0),
        }
    }

    pub fn always(status: HealthStatus) -> Self {
        Self::new(vec![status])
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl HealthCheck for ScriptedHealthCheck {
    fn check(&self) -> HealthReport {
        self.calls.set(self.calls.get() + 1);
        let status = self
            .queue
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.last.get());
        HealthReport {
            status,
            message: format!("scripted {}", status.as_str()),
        }
    }
}

/// Notifier that remembers everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: RefCell<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    /// Records, then reports a delivery failure for every message.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.borrow().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent.borrow().iter().map(Notification::kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.borrow_mut().push(notification.clone());
        if self.fail {
            return Err(anyhow!("delivery failed"));
        }
        Ok(())
    }
}

/// Sleeper that returns immediately and records requested waits.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
    }
}

/// Workspace that counts resets; can be told to fail.
#[derive(Default)]
pub struct RecordingWorkspace {
    resets: Cell<usize>,
    dirty: Vec<String>,
    fail: bool,
}

impl RecordingWorkspace {
    pub fn with_dirty(paths: &[&str]) -> Self {
        Self {
            dirty: paths.iter().map(|p| (*p).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn resets(&self) -> usize {
        self.resets.get()
    }
}

impl Workspace for RecordingWorkspace {
    fn reset(&self) -> Result<Vec<String>> {
        self.resets.set(self.resets.get() + 1);
        if self.fail {
            return Err(anyhow!("git checkout -- . failed: not a git repository"));
        }
        Ok(self.dirty.clone())
    }
}

/// Temporary log directory with a config, paths, and an open audit log.
pub struct TestEnv {
    pub temp: TempDir,
    pub config: Config,
    pub paths: LogPaths,
    pub audit: AuditLog,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = Config {
            log_dir: temp.path().join("logs"),
            ..Config::default()
        };
        let paths = LogPaths::new(&config.log_dir, "implement", "test");
        let audit = AuditLog::create(&paths.session()).expect("audit log");
        Self {
            temp,
            config,
            paths,
            audit,
        }
    }

    /// `event` tags of every audit record so far.
    pub fn audit_events(&self) -> Vec<String> {
        read_audit_log(self.audit.path())
            .expect("read audit log")
            .iter()
            .filter_map(|record| record["event"].as_str().map(str::to_string))
            .collect()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialise a git repository with one committed `README.md` ("hi\n").
pub fn init_git_repo(root: &Path) {
    let git = |args: &[&str]| {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .status()
            .unwrap_or_else(|err| panic!("git {}: {err}", args.join(" ")));
        assert!(status.success(), "git {} failed", args.join(" "));
    };
    git(&["init", "-q"]);
    git(&["config", "user.email", "test@example.com"]);
    git(&["config", "user.name", "test"]);
    fs::write(root.join("README.md"), "hi\n").expect("write README");
    git(&["add", "README.md"]);
    git(&["commit", "-q", "-m", "init"]);
}
