//! Assistant abstraction for task attempts.
//!
//! The [`Assistant`] trait decouples the task driver from the actual coding
//! assistant CLI. Tests use scripted assistants that return canned output
//! without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, info, instrument, warn};

use crate::core::stream::find_session_id;
use crate::core::types::{RunAttempt, TaskRef};
use crate::io::config::Config;
use crate::io::console::StreamMonitor;
use crate::io::process::{CommandOutput, LineSink, run_command_with_tee};
use crate::io::prompt::{render_batch_check, render_task_instruction};

/// One attempt at one task.
#[derive(Debug, Clone)]
pub struct AttemptRequest<'a> {
    pub task: &'a TaskRef,
    /// 1-based attempt index.
    pub index: u32,
    /// Session to resume, if any.
    pub resume_token: Option<&'a str>,
    /// Extra paragraph appended to the instruction.
    pub note: Option<&'a str>,
    /// Per-task log that receives the raw output (appended).
    pub log_path: &'a Path,
}

/// Abstraction over the coding assistant.
pub trait Assistant {
    /// Run one attempt. Never fails: spawn errors become an attempt with no exit code.
    fn run_task(&self, request: &AttemptRequest<'_>) -> RunAttempt;

    /// Verify a batch of completed tasks. Returns whether the check exited cleanly.
    fn batch_check(&self, tasks: &[TaskRef], log_path: &Path) -> Result<bool>;
}

/// Assistant that spawns the `claude` CLI in headless stream-json mode.
pub struct ClaudeAssistant {
    command: String,
    model: String,
    implement_skill: String,
    batch_check_skill: String,
    working_dir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    max_budget_usd: Option<f64>,
    show_stream: bool,
}

impl ClaudeAssistant {
    pub fn new(config: &Config, working_dir: &Path) -> Self {
        Self {
            command: config.assistant.command.clone(),
            model: config.assistant.model.clone(),
            implement_skill: config.assistant.implement_skill.clone(),
            batch_check_skill: config.assistant.batch_check_skill.clone(),
            working_dir: working_dir.to_path_buf(),
            timeout: config.attempt_timeout(),
            output_limit_bytes: config.output_limit_bytes,
            max_budget_usd: config.max_budget_usd,
            show_stream: true,
        }
    }

    /// Suppress the live event rendering (totals are still tracked).
    pub fn without_stream_output(mut self) -> Self {
        self.show_stream = false;
        self
    }

    fn command(&self, instruction: &str, resume_token: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-p")
            .arg(instruction)
            .arg("--model")
            .arg(&self.model)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--dangerously-skip-permissions");
        if let Some(token) = resume_token {
            cmd.arg("--resume").arg(token);
        }
        if let Some(budget) = self.max_budget_usd {
            cmd.arg("--max-budget-usd").arg(budget.to_string());
        }
        cmd.current_dir(&self.working_dir);
        cmd
    }

    /// Spawn with the stream monitor attached and print totals afterwards.
    fn run_monitored(&self, cmd: Command, log_path: &Path) -> Result<CommandOutput> {
        let monitor = Arc::new(Mutex::new(if self.show_stream {
            StreamMonitor::new()
        } else {
            StreamMonitor::quiet()
        }));
        let sink_monitor = Arc::clone(&monitor);
        let sink: LineSink = Box::new(move |line| {
            if let Ok(mut monitor) = sink_monitor.lock() {
                monitor.handle_line(line);
            }
        });

        let started = Instant::now();
        let output = run_command_with_tee(
            cmd,
            self.timeout,
            self.output_limit_bytes,
            Some(log_path),
            Some(sink),
        );
        if let Ok(monitor) = monitor.lock() {
            monitor.print_summary(started.elapsed().as_secs());
        }
        output
    }
}

impl Assistant for ClaudeAssistant {
    #[instrument(skip_all, fields(task = %request.task, attempt = request.index, resumed = request.resume_token.is_some()))]
    fn run_task(&self, request: &AttemptRequest<'_>) -> RunAttempt {
        let started_at = Local::now();
        info!("starting assistant attempt");

        let result = render_task_instruction(&self.implement_skill, request.task, request.note)
            .and_then(|instruction| {
                let cmd = self.command(&instruction, request.resume_token);
                self.run_monitored(cmd, request.log_path)
                    .context("run assistant")
            });

        let (output, exit_code) = match result {
            Ok(output) => {
                if output.timed_out {
                    warn!(timeout_secs = self.timeout.as_secs(), "assistant attempt timed out");
                }
                (output.combined(), output.exit_code)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "assistant attempt could not run");
                (format!("{err:#}"), None)
            }
        };
        let session_id = find_session_id(&output);
        debug!(?exit_code, has_session = session_id.is_some(), "assistant attempt finished");

        RunAttempt {
            index: request.index,
            resumed: request.resume_token.is_some(),
            started_at,
            ended_at: Local::now(),
            output,
            exit_code,
            session_id,
        }
    }

    #[instrument(skip_all, fields(tasks = tasks.len()))]
    fn batch_check(&self, tasks: &[TaskRef], log_path: &Path) -> Result<bool> {
        let instruction = render_batch_check(&self.batch_check_skill, tasks)?;
        let cmd = self.command(&instruction, None);
        let output = self
            .run_monitored(cmd, log_path)
            .context("run batch check")?;
        Ok(output.success())
    }
}
