//! `ralph plan`: interactive planning, one task at a time.
//!
//! The assistant runs attached to the operator's terminal. There is no
//! classification and no recovery: exit code 0 means the task was planned.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use chrono::Local;
use tracing::{info, instrument, warn};

use crate::core::session::SessionRecord;
use crate::core::types::{FailureReason, TaskRef, TaskResult, TaskStatus, format_duration};
use crate::implement::{ImplementRequest, task_queue};
use crate::io::audit_log::{AuditEvent, AuditLog, LogPaths, log_stamp};
use crate::io::config::Config;
use crate::io::console;
use crate::io::git::Workspace;
use crate::io::process::run_interactive;

/// One interactive planning conversation.
pub trait Planner {
    /// Returns the exit code, or `None` if the session was killed.
    fn plan(&self, task: &TaskRef) -> Result<Option<i32>>;
}

/// Runs `claude -p "/<plan_skill> <task>"` on the operator's terminal.
pub struct ClaudePlanner {
    command: String,
    model: String,
    skill: String,
    working_dir: PathBuf,
}

impl ClaudePlanner {
    pub fn new(config: &Config, working_dir: &Path) -> Self {
        Self {
            command: config.assistant.command.clone(),
            model: config.assistant.model.clone(),
            skill: config.assistant.plan_skill.clone(),
            working_dir: working_dir.to_path_buf(),
        }
    }
}

impl Planner for ClaudePlanner {
    fn plan(&self, task: &TaskRef) -> Result<Option<i32>> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-p")
            .arg(format!("/{} {task}", self.skill.trim_start_matches('/')))
            .arg("--model")
            .arg(&self.model)
            .arg("--verbose")
            .current_dir(&self.working_dir);
        run_interactive(cmd)
    }
}

#[instrument(skip_all, fields(project = %request.project))]
pub fn run_plan(
    config: &Config,
    request: &ImplementRequest,
    workspace: &dyn Workspace,
    planner: &dyn Planner,
) -> Result<SessionRecord> {
    let queue = task_queue(request)?;
    let started_at = Local::now();
    let paths = LogPaths::new(&config.log_dir, "plan", log_stamp(started_at));
    let audit = AuditLog::create(&paths.session())?;
    audit.record(AuditEvent::SessionStarted {
        command: "plan".to_string(),
        project: request.project.clone(),
        tasks: queue.iter().map(|t| t.number).collect(),
        working_dir: request.working_dir.display().to_string(),
        recovery_enabled: false,
    })?;

    console::header(&format!("Ralph Planning: {}", request.project));
    console::kv(
        "Tasks",
        &queue
            .iter()
            .map(|t| t.number.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    );
    console::kv("Working dir", &request.working_dir.display().to_string());

    let mut record = SessionRecord::new(request.project.as_str(), started_at);
    for task in &queue {
        console::subheader(&format!("Planning: {task}"));
        match workspace.reset() {
            Ok(discarded) => {
                if !discarded.is_empty() {
                    console::dim(&format!("Cleaned {} files", discarded.len()));
                }
                audit.record(AuditEvent::WorkspaceReset {
                    task: task.to_string(),
                    discarded,
                })?;
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "workspace reset failed");
                audit.record(AuditEvent::WorkspaceResetFailed {
                    task: task.to_string(),
                    error: format!("{err:#}"),
                })?;
            }
        }

        let started = Local::now();
        let status = match planner.plan(task) {
            Ok(Some(0)) => {
                console::success(&format!("Completed: {task}"));
                TaskStatus::Completed
            }
            Ok(code) => {
                let code = code.map_or_else(|| "none".to_string(), |c| c.to_string());
                console::error(&format!("Failed: {task} (exit code {code})"));
                TaskStatus::failed(FailureReason::Unknown)
            }
            Err(err) => {
                console::error(&format!("Error: {task} - {err:#}"));
                TaskStatus::failed(FailureReason::Unknown)
            }
        };
        let result = TaskResult {
            task: task.clone(),
            status,
            attempts: 1,
            duration_secs: (Local::now() - started).num_seconds().max(0) as u64,
        };
        audit.record(AuditEvent::TaskFinished(result.clone()))?;
        info!(task = %task, %status, "planning finished");
        record.push(result);
    }

    let summary = record.finish(Local::now());
    audit.record(AuditEvent::SessionFinished {
        summary: summary.clone(),
        exit_code: record.exit_code(),
    })?;
    console::header("Session Complete");
    console::kv("Duration", &format_duration(summary.duration_secs));
    console::kv("Completed", &summary.completed.len().to_string());
    console::kv("Failed", &summary.failed.len().to_string());
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingWorkspace;
    use std::cell::RefCell;

    struct FakePlanner {
        codes: RefCell<Vec<Option<i32>>>,
        seen: RefCell<Vec<String>>,
    }

    impl Planner for FakePlanner {
        fn plan(&self, task: &TaskRef) -> Result<Option<i32>> {
            self.seen.borrow_mut().push(task.to_string());
            Ok(self.codes.borrow_mut().remove(0))
        }
    }

    #[test]
    fn plans_each_task_after_cleanup() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = Config {
            log_dir: temp.path().to_path_buf(),
            ..Config::default()
        };
        let request = ImplementRequest {
            project: "shop".to_string(),
            selectors: vec!["1-2".to_string()],
            working_dir: temp.path().to_path_buf(),
        };
        let workspace = RecordingWorkspace::with_dirty(&["notes.md"]);
        let planner = FakePlanner {
            codes: RefCell::new(vec![Some(0), Some(130)]),
            seen: RefCell::new(Vec::new()),
        };

        let record = run_plan(&config, &request, &workspace, &planner).expect("plan");
        assert_eq!(*planner.seen.borrow(), vec!["shop#1", "shop#2"]);
        assert_eq!(workspace.resets(), 2);
        assert_eq!(record.summary().completed, vec![1]);
        assert_eq!(record.exit_code(), 1);
        assert!(temp.path().join("ralph-plan").is_dir());
    }
}
