//! Helpers for running child processes with timeouts and bounded output.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    /// `None` when the child was killed (timeout or signal).
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, lossily decoded.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }
}

/// Called with each stdout line (without the trailing newline) as it arrives.
pub type LineSink = Box<dyn FnMut(&str) + Send>;

type SharedLog = Arc<Mutex<BufWriter<File>>>;

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory. Only the last `output_limit_bytes` of each stream are kept;
/// older bytes are dropped while the pipe keeps draining, since completion markers and API errors
/// arrive at the end.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    run_command_with_tee(cmd, timeout, output_limit_bytes, None, None)
}

/// Run a command with a timeout, tee-ing both streams line by line into `log_path`.
///
/// The log is opened in append mode so several attempts can share one file. Every line is
/// flushed as soon as it is read. Stdout lines are also handed to `on_line`, in order.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes, tee = log_path.is_some()))]
pub fn run_command_with_tee(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    log_path: Option<&Path>,
    on_line: Option<LineSink>,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let log = match log_path {
        Some(path) => Some(open_append(path)?),
        None => None,
    };

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_log = log.clone();
    let stdout_handle = thread::spawn(move || {
        read_lines_limited(stdout, output_limit_bytes, stdout_log, on_line)
    });
    let stderr_handle =
        thread::spawn(move || read_lines_limited(stderr, output_limit_bytes, log, None));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let exit_code = if timed_out { None } else { status.code() };
    debug!(?exit_code, timed_out, "command finished");
    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Run a command attached to the caller's terminal and wait for it.
#[instrument(skip_all)]
pub fn run_interactive(mut cmd: Command) -> Result<Option<i32>> {
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let status = cmd.status().context("run interactive command")?;
    debug!(exit_code = ?status.code(), "interactive command finished");
    Ok(status.code())
}

fn open_append(path: &Path) -> Result<SharedLog> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))?;
    Ok(Arc::new(Mutex::new(BufWriter::new(file))))
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line keeping at most `limit` trailing bytes, optionally tee-ing to a log
/// and a sink. Returns the kept tail and the number of bytes dropped from the front.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    log: Option<SharedLog>,
    mut on_line: Option<LineSink>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected: VecDeque<u8> = VecDeque::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(mutex) = &log
            && let Ok(mut writer) = mutex.lock()
        {
            if let Err(e) = writer.write_all(&line) {
                warn!(err = %e, "failed to write to log file");
            } else if let Err(e) = writer.flush() {
                warn!(err = %e, "failed to flush log file");
            }
        }

        if let Some(sink) = on_line.as_mut() {
            let text = String::from_utf8_lossy(&line);
            sink(text.trim_end_matches(['\n', '\r']));
        }

        collected.extend(&line);
        if collected.len() > limit {
            let excess = collected.len() - limit;
            collected.drain(..excess);
            truncated += excess;
        }
    }

    Ok((collected.into(), truncated))
}
