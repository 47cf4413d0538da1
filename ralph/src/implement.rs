//! `ralph implement`: run a queue of tasks autonomously.
//!
//! For each task in selector order: reset the workspace, drive the task to a
//! terminal result, record it. A pipeline-aborted result stops the queue;
//! later tasks are neither run nor recorded. Completed tasks get one batch
//! verification pass at the end unless the pipeline aborted.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use tracing::{info, instrument, warn};

use crate::core::ranges::expand_task_ranges;
use crate::core::session::{SessionRecord, SessionSummary};
use crate::core::types::{TaskRef, TaskResult, TaskStatus, format_duration};
use crate::core::usage::UsageError;
use crate::io::assistant::Assistant;
use crate::io::audit_log::{AuditEvent, AuditLog, LogPaths, log_stamp};
use crate::io::config::Config;
use crate::io::console;
use crate::io::git::Workspace;
use crate::io::health::HealthCheck;
use crate::io::notify::{Notification, Notifier, notify};
use crate::recovery::Sleeper;
use crate::task::{TaskEnv, execute_task_with_recovery};

/// What to run and where.
#[derive(Debug, Clone)]
pub struct ImplementRequest {
    pub project: String,
    pub selectors: Vec<String>,
    pub working_dir: PathBuf,
}

/// The pipeline's outside world.
pub struct Collaborators<'a> {
    pub assistant: &'a dyn Assistant,
    pub health: &'a dyn HealthCheck,
    pub notifier: &'a dyn Notifier,
    pub workspace: &'a dyn Workspace,
    pub sleeper: &'a dyn Sleeper,
}

#[derive(Debug)]
pub struct ImplementReport {
    pub record: SessionRecord,
    pub summary: SessionSummary,
    /// `None` when the batch check was skipped.
    pub batch_check: Option<bool>,
    pub audit_path: PathBuf,
    pub exit_code: i32,
}

/// Parse the request into the ordered task list. Fails before any side effect.
pub fn task_queue(request: &ImplementRequest) -> Result<Vec<TaskRef>, UsageError> {
    if request.project.trim().is_empty() {
        return Err(UsageError::new("project name must not be empty"));
    }
    if request.selectors.is_empty() {
        return Err(UsageError::new("no task numbers provided"));
    }
    let numbers = expand_task_ranges(&request.selectors)?;
    Ok(numbers
        .into_iter()
        .map(|n| TaskRef::new(request.project.as_str(), n))
        .collect())
}

#[instrument(skip_all, fields(project = %request.project))]
pub fn run_implement(
    config: &Config,
    request: &ImplementRequest,
    deps: &Collaborators<'_>,
) -> Result<ImplementReport> {
    let queue = task_queue(request)?;
    let numbers = queue.iter().map(|t| t.number).collect::<Vec<_>>();

    let started_at = Local::now();
    let paths = LogPaths::new(&config.log_dir, "implement", log_stamp(started_at));
    let audit = AuditLog::create(&paths.session())?;
    audit.record(AuditEvent::SessionStarted {
        command: "implement".to_string(),
        project: request.project.clone(),
        tasks: numbers.clone(),
        working_dir: request.working_dir.display().to_string(),
        recovery_enabled: config.recovery_enabled,
    })?;
    info!(tasks = queue.len(), audit = %paths.session().display(), "session started");

    print_session_header(config, request, &numbers, &paths);
    notify(
        deps.notifier,
        Notification::SessionStart {
            project: request.project.clone(),
            tasks: numbers,
            at: started_at,
        },
    );

    let env = TaskEnv {
        config,
        assistant: deps.assistant,
        health: deps.health,
        notifier: deps.notifier,
        sleeper: deps.sleeper,
        audit: &audit,
        paths: &paths,
    };
    let mut record = SessionRecord::new(request.project.as_str(), started_at);

    for (i, task) in queue.iter().enumerate() {
        console::subheader(&format!("Task: {task} ({}/{})", i + 1, queue.len()));
        clean_workspace(deps.workspace, &audit, task)?;

        let result = execute_task_with_recovery(&env, task, i + 1)?;
        audit.record(AuditEvent::TaskFinished(result.clone()))?;
        report_result(deps.notifier, &audit, &result)?;

        let halted = result.status.is_abort();
        record.push(result);
        if halted {
            let skipped = queue.len() - i - 1;
            if skipped > 0 {
                warn!(skipped, "pipeline halted, skipping remaining tasks");
                console::warning(&format!("Pipeline stopped - skipping {skipped} remaining task(s)"));
            }
            break;
        }
    }

    let batch_check = run_batch_check(deps.assistant, &audit, &paths, &record);

    let summary = record.finish(Local::now());
    let exit_code = record.exit_code();
    print_session_summary(&summary);
    notify(
        deps.notifier,
        Notification::SessionComplete {
            project: request.project.clone(),
            duration: format_duration(summary.duration_secs),
            completed: completed_with_durations(&record),
            failed: summary.failed.clone(),
            on_hold: summary.on_hold.clone(),
        },
    );
    audit.record(AuditEvent::SessionFinished {
        summary: summary.clone(),
        exit_code,
    })?;
    info!(exit_code, "session finished");

    Ok(ImplementReport {
        record,
        summary,
        batch_check,
        audit_path: audit.path().to_path_buf(),
        exit_code,
    })
}

/// A failed reset is reported and the task still runs.
fn clean_workspace(workspace: &dyn Workspace, audit: &AuditLog, task: &TaskRef) -> Result<()> {
    match workspace.reset() {
        Ok(discarded) => {
            if !discarded.is_empty() {
                console::dim(&format!("Cleaned {} files", discarded.len()));
            }
            audit.record(AuditEvent::WorkspaceReset {
                task: task.to_string(),
                discarded,
            })
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "workspace reset failed");
            console::warning(&format!("Workspace cleanup failed: {err:#}"));
            audit.record(AuditEvent::WorkspaceResetFailed {
                task: task.to_string(),
                error: format!("{err:#}"),
            })
        }
    }
}

fn report_result(notifier: &dyn Notifier, audit: &AuditLog, result: &TaskResult) -> Result<()> {
    let task = &result.task;
    let took = format_duration(result.duration_secs);
    match &result.status {
        TaskStatus::Completed => console::success(&format!("Completed: {task} ({took})")),
        TaskStatus::OnHold => console::warning(&format!("On hold: {task}")),
        TaskStatus::Failed { cause } => {
            console::error(&format!("Failed: {task} - {cause}"));
            notify(
                notifier,
                Notification::TaskFailed {
                    task: task.clone(),
                    reason: cause.to_string(),
                },
            );
        }
        TaskStatus::PipelineAborted { cause } => {
            console::error(&format!("Fatal error: {task} - {cause}"));
            notify(
                notifier,
                Notification::PipelineStopped {
                    reason: format!("{task}: {cause}"),
                    at: Local::now(),
                },
            );
            audit.record(AuditEvent::PipelineHalted {
                task: task.to_string(),
                reason: cause.to_string(),
            })?;
        }
    }
    Ok(())
}

/// Verify completed tasks together. Never affects the exit code.
fn run_batch_check(
    assistant: &dyn Assistant,
    audit: &AuditLog,
    paths: &LogPaths,
    record: &SessionRecord,
) -> Option<bool> {
    let completed = record.completed_refs();
    if completed.is_empty() || record.halted() {
        return None;
    }
    console::subheader("Running batch check");
    let result = assistant.batch_check(&completed, &paths.batch_check());
    let (success, error) = match &result {
        Ok(true) => {
            console::success("Batch check complete");
            (true, None)
        }
        Ok(false) => {
            console::error("Batch check reported problems");
            (false, None)
        }
        Err(err) => {
            console::error(&format!("Batch check failed: {err:#}"));
            (false, Some(format!("{err:#}")))
        }
    };
    let event = AuditEvent::BatchCheck {
        tasks: completed.iter().map(ToString::to_string).collect(),
        success,
        error,
    };
    if let Err(err) = audit.record(event) {
        warn!(err = %format!("{err:#}"), "could not record batch check");
    }
    Some(success)
}

fn completed_with_durations(record: &SessionRecord) -> Vec<(u32, String)> {
    record
        .results
        .iter()
        .filter(|r| r.status.is_completed())
        .map(|r| (r.task.number, format_duration(r.duration_secs)))
        .collect()
}

fn print_session_header(
    config: &Config,
    request: &ImplementRequest,
    numbers: &[u32],
    paths: &LogPaths,
) {
    console::header(&format!("Ralph Implementation: {}", request.project));
    let tasks = numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    console::kv("Tasks", &tasks);
    console::kv("Working dir", &request.working_dir.display().to_string());
    console::kv(
        "Max budget",
        &config
            .max_budget_usd
            .map_or_else(|| "unlimited".to_string(), |b| format!("${b:.2}")),
    );
    console::kv(
        "Recovery",
        if config.recovery_enabled {
            "enabled"
        } else {
            "disabled"
        },
    );
    console::kv("Logs", &paths.dir.display().to_string());
}

fn print_session_summary(summary: &SessionSummary) {
    console::header("Session Complete");
    console::kv("Duration", &format_duration(summary.duration_secs));
    console::kv("Completed", &summary.completed.len().to_string());
    console::kv("On hold", &summary.on_hold.len().to_string());
    console::kv("Failed", &summary.failed.len().to_string());
    if summary.halted {
        console::warning("Pipeline halted before the queue finished");
    }
}
