//! Side-effecting adapters: config, subprocesses, the assistant CLI, git,
//! notifications, and log files.

pub mod assistant;
pub mod audit_log;
pub mod config;
pub mod console;
pub mod git;
pub mod health;
pub mod notify;
pub mod process;
pub mod prompt;
