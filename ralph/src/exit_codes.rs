//! Stable exit codes for ralph CLI commands.

/// Every task completed or went on hold.
pub const OK: i32 = 0;
/// A task failed, the pipeline aborted, or a runtime error occurred.
pub const FAILED: i32 = 1;
/// Malformed command-line input; nothing was run.
pub const USAGE: i32 = 2;

/// `ralph health` codes.
pub mod health {
    pub const HEALTHY: i32 = 0;
    pub const AUTH_ERROR: i32 = 1;
    pub const RATE_LIMITED: i32 = 2;
    pub const OTHER_ERROR: i32 = 3;
    pub const OVERLOADED: i32 = 4;
}
