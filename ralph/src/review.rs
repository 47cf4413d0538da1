//! `ralph review`: run each configured review skill against one task.
//!
//! Reviews are independent assistant sessions run one after another. Each
//! gets its own log under `<log_dir>/reviews/` and its own timeout. The
//! command succeeds only if every review exits 0.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, instrument, warn};

use crate::core::types::{TaskRef, format_duration};
use crate::exit_codes;
use crate::io::audit_log::{log_stamp, review_log_path};
use crate::io::config::{Config, ReviewSkill, claude_home};
use crate::io::console;
use crate::io::process::run_command_with_tee;

#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub task: TaskRef,
    pub working_dir: PathBuf,
    /// Marker file set aside while reviews run so hooks keyed on it stay quiet.
    pub active_task_marker: Option<PathBuf>,
}

impl ReviewRequest {
    pub fn new(task: TaskRef, working_dir: PathBuf) -> Self {
        Self {
            task,
            working_dir,
            active_task_marker: Some(default_active_task_marker()),
        }
    }
}

/// `~/.claude/workflow-state/active_ralph_task.txt`
pub fn default_active_task_marker() -> PathBuf {
    claude_home()
        .join("workflow-state")
        .join("active_ralph_task.txt")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewResult {
    pub name: String,
    pub success: bool,
    pub duration_secs: u64,
    pub log_path: PathBuf,
    pub log_size: u64,
}

#[derive(Debug)]
pub struct ReviewReport {
    pub results: Vec<ReviewResult>,
    pub exit_code: i32,
}

#[instrument(skip_all, fields(task = %request.task))]
pub fn run_review(config: &Config, request: &ReviewRequest) -> Result<ReviewReport> {
    let stamp = log_stamp(Local::now());
    let skills = &config.assistant.review_skills;

    console::header(&format!("Ralph Review: {}", request.task));
    console::kv("Reviews", &skills.len().to_string());
    console::kv("Working dir", &request.working_dir.display().to_string());

    let _suspended = match &request.active_task_marker {
        Some(marker) => SuspendedMarker::suspend(marker)?,
        None => None,
    };

    let timeout = Duration::from_secs(config.assistant.review_timeout_secs);
    let mut results = Vec::with_capacity(skills.len());
    for (i, review) in skills.iter().enumerate() {
        console::subheader(&format!("[{}/{}] {}", i + 1, skills.len(), review.name));
        let log_path = review_log_path(&config.log_dir, &request.task, &review.skill, &stamp);
        let result = run_one_review(config, request, review, timeout, log_path);
        if result.success {
            console::success(&format!(
                "{} ({})",
                result.name,
                format_duration(result.duration_secs)
            ));
        } else {
            console::error(&format!("{} failed", result.name));
        }
        results.push(result);
    }

    console::header("Review Summary");
    println!("{}", render_summary_table(&results));
    for result in &results {
        console::dim(&format!("{}: {}", result.name, result.log_path.display()));
    }

    let exit_code = if results.iter().all(|r| r.success) {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    };
    info!(exit_code, reviews = results.len(), "reviews finished");
    Ok(ReviewReport { results, exit_code })
}

/// Spawn and timeout failures count as a failed review, never as an error.
fn run_one_review(
    config: &Config,
    request: &ReviewRequest,
    review: &ReviewSkill,
    timeout: Duration,
    log_path: PathBuf,
) -> ReviewResult {
    let mut cmd = Command::new(&config.assistant.command);
    cmd.arg("-p")
        .arg(format!(
            "/{} {}",
            review.skill.trim_start_matches('/'),
            request.task
        ))
        .arg("--model")
        .arg(&config.assistant.model)
        .args(["--output-format", "stream-json", "--verbose"])
        .arg("--dangerously-skip-permissions")
        .current_dir(&request.working_dir);

    let started = Instant::now();
    let success = match run_command_with_tee(
        cmd,
        timeout,
        config.output_limit_bytes,
        Some(&log_path),
        None,
    ) {
        Ok(output) if output.timed_out => {
            console::warning(&format!("Timed out after {}", format_duration(timeout.as_secs())));
            false
        }
        Ok(output) => output.success(),
        Err(err) => {
            warn!(review = %review.name, err = %format!("{err:#}"), "review could not run");
            console::error(&format!("{err:#}"));
            false
        }
    };

    let log_size = fs::metadata(&log_path).map(|m| m.len()).unwrap_or(0);
    ReviewResult {
        name: review.name.clone(),
        success,
        duration_secs: started.elapsed().as_secs(),
        log_path,
        log_size,
    }
}

fn render_summary_table(results: &[ReviewResult]) -> String {
    let name_width = results
        .iter()
        .map(|r| r.name.chars().count())
        .chain(std::iter::once("Review".len()))
        .max()
        .unwrap_or(6);
    let row = |name: &str, status: &str, time: &str, size: &str| {
        format!("{name:<name_width$}  {status:<6}  {time:>8}  {size:>9}")
    };

    let mut lines = vec![row("Review", "Status", "Time", "Log Size")];
    lines.push("-".repeat(lines[0].chars().count()));
    for result in results {
        lines.push(row(
            &result.name,
            if result.success { "PASS" } else { "FAIL" },
            &format_duration(result.duration_secs),
            &format_size(result.log_size),
        ));
    }
    lines.join("\n")
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Renames a marker file to `<name>.bak` and puts it back on drop.
struct SuspendedMarker {
    original: PathBuf,
    backup: PathBuf,
}

impl SuspendedMarker {
    fn suspend(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut backup = path.as_os_str().to_owned();
        backup.push(".bak");
        let backup = PathBuf::from(backup);
        fs::rename(path, &backup)
            .with_context(|| format!("suspend {}", path.display()))?;
        info!(marker = %path.display(), "suspended active task marker");
        Ok(Some(Self {
            original: path.to_path_buf(),
            backup,
        }))
    }
}

impl Drop for SuspendedMarker {
    fn drop(&mut self) {
        if let Err(err) = fs::rename(&self.backup, &self.original) {
            warn!(marker = %self.original.display(), err = %err, "failed to restore active task marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, success: bool, size: u64) -> ReviewResult {
        ReviewResult {
            name: name.to_string(),
            success,
            duration_secs: 75,
            log_path: PathBuf::from("x.log"),
            log_size: size,
        }
    }

    #[test]
    fn summary_table_has_a_row_per_review() {
        let table = render_summary_table(&[
            result("Code Review", true, 512),
            result("Security Review", false, 3 * 1024 * 1024),
        ]);
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Review"));
        assert!(lines[2].contains("Code Review") && lines[2].contains("PASS"));
        assert!(lines[2].contains("512 B"));
        assert!(lines[3].contains("FAIL") && lines[3].contains("3.0 MB"));
    }

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(2048), "2.0 KB");
    }

    #[test]
    fn marker_is_restored_after_suspension() {
        let temp = tempfile::tempdir().expect("tempdir");
        let marker = temp.path().join("active_ralph_task.txt");
        fs::write(&marker, "shop#1").expect("write");

        {
            let guard = SuspendedMarker::suspend(&marker).expect("suspend");
            assert!(guard.is_some());
            assert!(!marker.exists());
            assert!(temp.path().join("active_ralph_task.txt.bak").exists());
        }
        assert_eq!(fs::read_to_string(&marker).expect("read"), "shop#1");
    }

    #[test]
    fn missing_marker_is_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let guard = SuspendedMarker::suspend(&temp.path().join("none.txt")).expect("suspend");
        assert!(guard.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn runs_every_review_and_fails_if_any_fails() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("fake-claude");
        fs::write(
            &script,
            "#!/bin/sh\necho \"reviewing $2\"\ncase \"$2\" in\n  /review-bad*) exit 1 ;;\nesac\n",
        )
        .expect("write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

        let mut config = Config {
            log_dir: temp.path().join("logs"),
            ..Config::default()
        };
        config.assistant.command = script.display().to_string();
        config.assistant.review_skills = vec![
            ReviewSkill {
                name: "Good".to_string(),
                skill: "review-good".to_string(),
            },
            ReviewSkill {
                name: "Bad".to_string(),
                skill: "review-bad".to_string(),
            },
        ];
        let request = ReviewRequest {
            task: TaskRef::new("shop", 4),
            working_dir: temp.path().to_path_buf(),
            active_task_marker: None,
        };

        let report = run_review(&config, &request).expect("review");
        assert_eq!(report.exit_code, exit_codes::FAILED);
        assert_eq!(
            report
                .results
                .iter()
                .map(|r| (r.name.as_str(), r.success))
                .collect::<Vec<_>>(),
            vec![("Good", true), ("Bad", false)]
        );
        let log = fs::read_to_string(&report.results[0].log_path).expect("log");
        assert!(log.contains("reviewing /review-good shop#4"));
        assert!(report.results[0].log_path.starts_with(temp.path().join("logs/reviews")));
    }
}
