//! Session record: the aggregate of one pipeline invocation.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::core::types::{TaskRef, TaskResult, TaskStatus};

/// Results of one invocation over a task selector set.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub project: String,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub results: Vec<TaskResult>,
}

/// Counts derived from a finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub completed: Vec<u32>,
    pub on_hold: Vec<u32>,
    /// Failed or aborted tasks with their reason.
    pub failed: Vec<(u32, String)>,
    pub halted: bool,
    pub duration_secs: u64,
}

impl SessionRecord {
    pub fn new(project: impl Into<String>, started_at: DateTime<Local>) -> Self {
        Self {
            project: project.into(),
            started_at,
            finished_at: None,
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, result: TaskResult) {
        self.results.push(result);
    }

    /// True once any task ended with `pipeline-aborted`.
    pub fn halted(&self) -> bool {
        self.results.iter().any(|r| r.status.is_abort())
    }

    pub fn completed_refs(&self) -> Vec<TaskRef> {
        self.results
            .iter()
            .filter(|r| r.status.is_completed())
            .map(|r| r.task.clone())
            .collect()
    }

    pub fn finish(&mut self, finished_at: DateTime<Local>) -> SessionSummary {
        self.finished_at = Some(finished_at);
        self.summary()
    }

    pub fn summary(&self) -> SessionSummary {
        let mut completed = Vec::new();
        let mut on_hold = Vec::new();
        let mut failed = Vec::new();
        for result in &self.results {
            match &result.status {
                TaskStatus::Completed => completed.push(result.task.number),
                TaskStatus::OnHold => on_hold.push(result.task.number),
                TaskStatus::Failed { cause } => {
                    failed.push((result.task.number, cause.to_string()));
                }
                TaskStatus::PipelineAborted { cause } => {
                    failed.push((result.task.number, cause.to_string()));
                }
            }
        }
        let end = self.finished_at.unwrap_or_else(Local::now);
        SessionSummary {
            completed,
            on_hold,
            failed,
            halted: self.halted(),
            duration_secs: (end - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Process exit code: zero only when nothing failed or aborted.
    pub fn exit_code(&self) -> i32 {
        if self.results.iter().any(|r| r.status.is_failure()) {
            crate::exit_codes::FAILED
        } else {
            crate::exit_codes::OK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AbortReason, FailureReason};
    use chrono::Duration;

    fn result(number: u32, status: TaskStatus) -> TaskResult {
        TaskResult {
            task: TaskRef::new("proj", number),
            status,
            attempts: 1,
            duration_secs: 1,
        }
    }

    #[test]
    fn empty_session_exits_ok() {
        let record = SessionRecord::new("proj", Local::now());
        assert_eq!(record.exit_code(), 0);
        assert!(!record.halted());
    }

    #[test]
    fn on_hold_does_not_fail_session() {
        let mut record = SessionRecord::new("proj", Local::now());
        record.push(result(1, TaskStatus::Completed));
        record.push(result(2, TaskStatus::OnHold));
        assert_eq!(record.exit_code(), 0);
        assert_eq!(record.completed_refs(), vec![TaskRef::new("proj", 1)]);
    }

    #[test]
    fn summary_groups_results_and_flags_halt() {
        let started = Local::now();
        let mut record = SessionRecord::new("proj", started);
        record.push(result(1, TaskStatus::Completed));
        record.push(result(2, TaskStatus::failed(FailureReason::Incomplete)));
        record.push(result(3, TaskStatus::aborted(AbortReason::Forbidden)));

        let summary = record.finish(started + Duration::seconds(90));
        assert_eq!(summary.completed, vec![1]);
        assert_eq!(
            summary.failed,
            vec![
                (2, "INCOMPLETE".to_string()),
                (3, "FORBIDDEN".to_string())
            ]
        );
        assert!(summary.halted);
        assert_eq!(summary.duration_secs, 90);
        assert_ne!(record.exit_code(), 0);
    }
}
