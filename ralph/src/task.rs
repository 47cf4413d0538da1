//! Drives one task through attempts, retries, and recovery until it is terminal.
//!
//! All decisions live in [`Controller`]; this module performs the side effects
//! each [`Action`] asks for and records them.

use std::time::Instant;

use anyhow::Result;
use chrono::Local;
use tracing::{info, instrument, warn};

use crate::core::classifier::classify_output;
use crate::core::controller::{Action, AttemptReport, Controller, RetryNote};
use crate::core::types::{TaskRef, TaskResult};
use crate::io::assistant::{Assistant, AttemptRequest};
use crate::io::audit_log::{
    AuditEvent, AuditLog, LogPaths, append_attempt_footer, append_attempt_header,
};
use crate::io::config::Config;
use crate::io::console;
use crate::io::health::HealthCheck;
use crate::io::notify::{Notification, Notifier, notify};
use crate::recovery::{RecoveryDeps, Sleeper, recovery_loop};

/// Everything a task run touches.
pub struct TaskEnv<'a> {
    pub config: &'a Config,
    pub assistant: &'a dyn Assistant,
    pub health: &'a dyn HealthCheck,
    pub notifier: &'a dyn Notifier,
    pub sleeper: &'a dyn Sleeper,
    pub audit: &'a AuditLog,
    pub paths: &'a LogPaths,
}

/// Run `task` to a terminal result.
///
/// Attempt failures are folded into the result; only log I/O errors propagate.
#[instrument(skip_all, fields(task = %task, position))]
pub fn execute_task_with_recovery(
    env: &TaskEnv<'_>,
    task: &TaskRef,
    position: usize,
) -> Result<TaskResult> {
    let started = Instant::now();
    let log_path = env.paths.task(task, position);
    let delays = env.config.recovery_delays();
    let mut controller = Controller::new(env.config.retry_policy());
    let mut action = controller.start();

    let status = loop {
        action = match action {
            Action::Run { resume_token, note } => {
                let index = controller.begin_attempt();
                let note_text = note.map(|n| n.render());
                let resumed = resume_token.is_some();
                append_attempt_header(
                    &log_path,
                    task,
                    index,
                    resumed,
                    note_text.as_deref(),
                    Local::now(),
                )?;
                env.audit.record(AuditEvent::AttemptStarted {
                    task: task.to_string(),
                    attempt: index,
                    resumed,
                    note: note_text.clone(),
                })?;
                info!(attempt = index, resumed, "running attempt");

                let attempt = env.assistant.run_task(&AttemptRequest {
                    task,
                    index,
                    resume_token: resume_token.as_deref(),
                    note: note_text.as_deref(),
                    log_path: &log_path,
                });
                let outcome = classify_output(&attempt.output, attempt.exit_code);
                append_attempt_footer(&log_path, &attempt, outcome)?;
                env.audit.record(AuditEvent::AttemptFinished {
                    task: task.to_string(),
                    attempt: index,
                    exit_code: attempt.exit_code,
                    outcome,
                })?;
                info!(attempt = index, exit_code = ?attempt.exit_code, %outcome, "attempt classified");

                let next = controller.on_attempt(AttemptReport {
                    outcome,
                    exit_code: attempt.exit_code,
                    session_id: attempt.session_id,
                });
                if let Action::Run {
                    note: Some(RetryNote::ContextOverflow { retry, max_retries }),
                    ..
                } = &next
                {
                    announce_context_overflow(env, task, *retry, *max_retries)?;
                }
                next
            }
            Action::Recover { outcome } => {
                console::warning(&format!("API error: {outcome} - starting recovery"));
                env.audit.record(AuditEvent::RecoveryStarted {
                    task: task.to_string(),
                    outcome,
                })?;
                let deps = RecoveryDeps {
                    health: env.health,
                    sleeper: env.sleeper,
                    notifier: env.notifier,
                    audit: env.audit,
                };
                let recovery = recovery_loop(task, &delays, &deps)?;
                env.audit.record(AuditEvent::RecoveryFinished {
                    task: task.to_string(),
                    recovered: recovery.recovered,
                })?;
                if !recovery.recovered {
                    console::error("Recovery failed - all attempts exhausted");
                }

                let next = controller.on_recovery(recovery.recovered);
                if let Action::Run {
                    resume_token: None, ..
                } = &next
                {
                    // Re-running the full instruction may redo finished work.
                    warn!("no session id in failed attempt, re-running without resume");
                    console::warning("No session to resume - re-running task from scratch");
                    env.audit.record(AuditEvent::ResumeTokenMissing {
                        task: task.to_string(),
                    })?;
                }
                next
            }
            Action::Finish(status) => break status,
        };
    };

    let attempts = controller.attempt_state().attempts;
    info!(%status, attempts, "task finished");
    Ok(TaskResult {
        task: task.clone(),
        status,
        attempts,
        duration_secs: started.elapsed().as_secs(),
    })
}

fn announce_context_overflow(
    env: &TaskEnv<'_>,
    task: &TaskRef,
    retry: u32,
    max_retries: u32,
) -> Result<()> {
    notify(
        env.notifier,
        Notification::ContextOverflow {
            task: task.clone(),
            retry,
            max_retries,
        },
    );
    console::warning(&format!("Context overflow - retry {retry}/{max_retries}"));
    env.audit.record(AuditEvent::ContextOverflowRetry {
        task: task.to_string(),
        retry,
        max_retries,
    })
}
