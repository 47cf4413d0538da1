//! Per-task retry/resume state machine.
//!
//! The controller owns all attempt bookkeeping for one task and turns each
//! classified attempt into the next action. It performs no I/O: the task
//! driver runs the attempt, runs the recovery loop when asked, and reports
//! the results back.
//!
//! ```text
//! RUNNING --attempt--> TERMINAL
//!    ^        |
//!    |        +--transient--> AWAITING_RECOVERY --recovered--> RUNNING
//!    +---context overflow (fresh session)       --exhausted--> TERMINAL
//! ```

use crate::core::types::{AbortReason, FailureReason, Outcome, TaskStatus};

/// Knobs that shape the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub recovery_enabled: bool,
    pub context_overflow_max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            recovery_enabled: true,
            context_overflow_max_retries: 2,
        }
    }
}

/// Mutable bookkeeping held for the lifetime of one task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskAttemptState {
    /// Total attempts started so far.
    pub attempts: u32,
    /// Consecutive fresh-session retries after context overflow.
    pub context_retries: u32,
    /// Session to resume on the next attempt.
    pub resume_token: Option<String>,
    /// Set once a recovery loop ran out of waits.
    pub recovery_failed: bool,
}

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Running,
    AwaitingRecovery { outcome: Outcome },
    Terminal(TaskStatus),
}

/// Why the next attempt differs from a plain first run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryNote {
    ContextOverflow { retry: u32, max_retries: u32 },
    Recovered { outcome: Outcome },
}

impl RetryNote {
    /// Text appended to the instruction on the next attempt.
    pub fn render(&self) -> String {
        match self {
            RetryNote::ContextOverflow { retry, max_retries } => format!(
                "Previous attempt failed with context overflow. \
                 This is retry {retry}/{max_retries}. Focus on essential changes only."
            ),
            RetryNote::Recovered { outcome } => format!(
                "Previous attempt was interrupted by {outcome}. \
                 This is a recovery resume. Continue where you left off."
            ),
        }
    }
}

/// What the task driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start another attempt.
    Run {
        resume_token: Option<String>,
        note: Option<RetryNote>,
    },
    /// Run the recovery loop, then report back via [`Controller::on_recovery`].
    Recover { outcome: Outcome },
    /// Task is done.
    Finish(TaskStatus),
}

/// Summary of a finished attempt as the controller sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub outcome: Outcome,
    pub exit_code: Option<i32>,
    pub session_id: Option<String>,
}

impl AttemptReport {
    fn exited_non_zero(&self) -> bool {
        self.exit_code != Some(0)
    }
}

/// Retry/resume controller for a single task.
#[derive(Debug, Clone)]
pub struct Controller {
    policy: RetryPolicy,
    state: ControllerState,
    attempt_state: TaskAttemptState,
    pending: Option<AttemptReport>,
}

impl Controller {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: ControllerState::Running,
            attempt_state: TaskAttemptState::default(),
            pending: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn attempt_state(&self) -> &TaskAttemptState {
        &self.attempt_state
    }

    /// First action for a fresh task.
    pub fn start(&self) -> Action {
        Action::Run {
            resume_token: None,
            note: None,
        }
    }

    /// Record that an attempt is being launched; returns its 1-based index.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt_state.attempts += 1;
        self.attempt_state.attempts
    }

    /// Feed a classified attempt into the transition table.
    pub fn on_attempt(&mut self, report: AttemptReport) -> Action {
        debug_assert_eq!(self.state, ControllerState::Running);
        let outcome = report.outcome;
        match outcome {
            Outcome::Completed => self.finish(TaskStatus::Completed),
            Outcome::OnHold => self.finish(TaskStatus::OnHold),
            Outcome::Forbidden => self.finish(TaskStatus::aborted(AbortReason::Forbidden)),
            Outcome::ContextOverflow => {
                let max_retries = self.policy.context_overflow_max_retries;
                if self.attempt_state.context_retries >= max_retries {
                    return self.finish(TaskStatus::failed(
                        FailureReason::ContextOverflowExhausted,
                    ));
                }
                self.attempt_state.context_retries += 1;
                self.attempt_state.resume_token = None;
                Action::Run {
                    resume_token: None,
                    note: Some(RetryNote::ContextOverflow {
                        retry: self.attempt_state.context_retries,
                        max_retries,
                    }),
                }
            }
            transient if transient.is_transient() => {
                if !self.policy.recovery_enabled {
                    return self.finish(TaskStatus::failed(FailureReason::Unrecovered(outcome)));
                }
                self.await_recovery(report)
            }
            _ => {
                if !report.exited_non_zero() {
                    return self.finish(TaskStatus::failed(FailureReason::Incomplete));
                }
                if !self.policy.recovery_enabled {
                    return self.finish(TaskStatus::failed(FailureReason::Unknown));
                }
                self.await_recovery(report)
            }
        }
    }

    /// Report the result of the recovery loop requested by [`Action::Recover`].
    pub fn on_recovery(&mut self, recovered: bool) -> Action {
        let ControllerState::AwaitingRecovery { outcome } = self.state else {
            debug_assert!(false, "on_recovery called outside AWAITING_RECOVERY");
            return Action::Finish(TaskStatus::failed(FailureReason::Unknown));
        };
        let failed_attempt = self.pending.take();

        if !recovered {
            self.attempt_state.recovery_failed = true;
            let status = if outcome == Outcome::Unknown {
                TaskStatus::failed(FailureReason::Unknown)
            } else {
                TaskStatus::aborted(AbortReason::RecoveryExhausted(outcome))
            };
            return self.finish(status);
        }

        self.state = ControllerState::Running;
        self.attempt_state.resume_token = failed_attempt.and_then(|report| report.session_id);
        Action::Run {
            resume_token: self.attempt_state.resume_token.clone(),
            note: Some(RetryNote::Recovered { outcome }),
        }
    }

    fn await_recovery(&mut self, report: AttemptReport) -> Action {
        let outcome = report.outcome;
        self.state = ControllerState::AwaitingRecovery { outcome };
        self.pending = Some(report);
        Action::Recover { outcome }
    }

    fn finish(&mut self, status: TaskStatus) -> Action {
        self.state = ControllerState::Terminal(status);
        Action::Finish(status)
    }
}
