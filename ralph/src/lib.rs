//! Autonomous task-execution orchestrator for an AI coding assistant.
//!
//! Ralph takes a project and a set of task numbers, hands each task to the
//! assistant CLI in turn, reads the outcome from its output, and decides
//! whether to finish, retry in a fresh session, or wait for the API to come
//! back and resume the interrupted session. The architecture keeps decisions
//! apart from effects:
//!
//! - **[`core`]**: Pure, deterministic logic (range expansion, output
//!   classification, the retry/resume state machine, the session record).
//! - **[`io`]**: Side-effecting adapters behind traits (subprocesses, git,
//!   health probes, notifications, log files), replaceable with fakes in tests.
//!
//! Orchestration modules ([`implement`], [`task`], [`recovery`], [`plan`],
//! [`review`], [`health`]) wire the two together behind the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod health;
pub mod implement;
pub mod io;
pub mod logging;
pub mod plan;
pub mod recovery;
pub mod review;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
