//! Lightweight liveness probe against the assistant API.

use std::process::Command;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::exit_codes;
use crate::io::config::Config;
use crate::io::process::run_command_with_timeout;

const PROBE_PROMPT: &str = "Reply with OK";
const PROBE_OUTPUT_LIMIT: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    AuthError,
    RateLimited,
    Overloaded,
    OtherError,
}

impl HealthStatus {
    pub fn is_healthy(self) -> bool {
        self == HealthStatus::Healthy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::AuthError => "AUTH_ERROR",
            HealthStatus::RateLimited => "RATE_LIMITED",
            HealthStatus::Overloaded => "OVERLOADED",
            HealthStatus::OtherError => "OTHER_ERROR",
        }
    }

    /// Process exit code for `ralph health`.
    pub fn exit_code(self) -> i32 {
        match self {
            HealthStatus::Healthy => exit_codes::health::HEALTHY,
            HealthStatus::AuthError => exit_codes::health::AUTH_ERROR,
            HealthStatus::RateLimited => exit_codes::health::RATE_LIMITED,
            HealthStatus::Overloaded => exit_codes::health::OVERLOADED,
            HealthStatus::OtherError => exit_codes::health::OTHER_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
}

impl HealthReport {
    fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Probe used by the recovery loop. Only `Healthy` counts as recovered.
pub trait HealthCheck {
    fn check(&self) -> HealthReport;
}

/// Sends a one-turn prompt through the assistant CLI.
pub struct ClaudeHealthCheck {
    command: String,
    timeout: Duration,
}

impl ClaudeHealthCheck {
    pub fn new(config: &Config) -> Self {
        Self {
            command: config.assistant.command.clone(),
            timeout: Duration::from_secs(config.health.timeout_secs),
        }
    }
}

impl HealthCheck for ClaudeHealthCheck {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn check(&self) -> HealthReport {
        let mut cmd = Command::new(&self.command);
        cmd.args(["-p", PROBE_PROMPT, "--max-turns", "1", "--output-format", "json"]);

        let output = match run_command_with_timeout(cmd, self.timeout, PROBE_OUTPUT_LIMIT) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "health probe could not run");
                return HealthReport::new(
                    HealthStatus::OtherError,
                    format!("Health check failed: {err:#}"),
                );
            }
        };
        if output.timed_out {
            return HealthReport::new(
                HealthStatus::OtherError,
                format!("Health check timed out after {}s", self.timeout.as_secs()),
            );
        }
        let report = classify_health_output(&output.combined());
        debug!(status = report.status.as_str(), "health probe finished");
        report
    }
}

/// Classify probe output: the last `result` JSON line wins, raw text is the fallback.
pub fn classify_health_output(output: &str) -> HealthReport {
    let parsed = output
        .trim()
        .lines()
        .rev()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .filter(Value::is_object)
        .collect::<Vec<_>>();
    let data = parsed
        .iter()
        .find(|v| v.get("type").and_then(Value::as_str) == Some("result"))
        .or_else(|| parsed.first());

    let Some(data) = data else {
        return classify_raw(output);
    };

    if data.get("type").and_then(Value::as_str) == Some("result") {
        if data.get("is_error").and_then(Value::as_bool).unwrap_or(false) {
            return classify_error_result(data);
        }
        let text = data.get("result").and_then(Value::as_str).unwrap_or("");
        if !text.is_empty() {
            return HealthReport::new(HealthStatus::Healthy, "API is responding");
        }
    }

    let output_tokens = data
        .get("usage")
        .and_then(|u| u.get("output_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if output_tokens > 0 {
        return HealthReport::new(HealthStatus::Healthy, "API is responding (got tokens)");
    }
    HealthReport::new(HealthStatus::OtherError, "No valid response from API")
}

fn classify_error_result(data: &Value) -> HealthReport {
    let code = match data.get("error_code") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let message = match data.get("errors").and_then(Value::as_array) {
        Some(errors) if !errors.is_empty() => errors
            .iter()
            .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_string))
            .collect::<Vec<_>>()
            .join("; "),
        _ => data
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    };
    let lower = message.to_lowercase();

    if code.contains("401") || message.contains("401") {
        HealthReport::new(
            HealthStatus::AuthError,
            format!("Authentication error: {message}"),
        )
    } else if code.contains("429") || message.contains("429") || lower.contains("rate") {
        HealthReport::new(HealthStatus::RateLimited, format!("Rate limited: {message}"))
    } else if code.contains("529") || message.contains("529") || lower.contains("overloaded") {
        HealthReport::new(HealthStatus::Overloaded, format!("API overloaded: {message}"))
    } else {
        HealthReport::new(HealthStatus::OtherError, format!("API error: {message}"))
    }
}

fn classify_raw(output: &str) -> HealthReport {
    let lower = output.to_lowercase();
    if output.contains("401") || lower.contains("unauthorized") {
        HealthReport::new(HealthStatus::AuthError, "Authentication failed (401)")
    } else if output.contains("429") || lower.contains("rate limit") {
        HealthReport::new(HealthStatus::RateLimited, "Rate limited (429)")
    } else if output.contains("529") || lower.contains("overloaded") {
        HealthReport::new(HealthStatus::Overloaded, "API overloaded (529)")
    } else {
        let preview: String = output.chars().take(200).collect();
        HealthReport::new(
            HealthStatus::OtherError,
            format!("Could not parse response: {preview}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_result_is_healthy() {
        let output = r#"{"type":"result","is_error":false,"result":"OK"}"#;
        assert_eq!(classify_health_output(output).status, HealthStatus::Healthy);
    }

    #[test]
    fn last_result_line_wins() {
        let output = "{\"type\":\"system\"}\n{\"type\":\"result\",\"is_error\":true,\"result\":\"API Error: 529 overloaded\"}\n{\"type\":\"debug\"}";
        assert_eq!(
            classify_health_output(output).status,
            HealthStatus::Overloaded
        );
    }

    #[test]
    fn error_results_map_by_code_then_message() {
        let cases = [
            (r#"{"type":"result","is_error":true,"error_code":401}"#, HealthStatus::AuthError),
            (
                r#"{"type":"result","is_error":true,"errors":["429 Too Many Requests"]}"#,
                HealthStatus::RateLimited,
            ),
            (
                r#"{"type":"result","is_error":true,"result":"Overloaded"}"#,
                HealthStatus::Overloaded,
            ),
            (
                r#"{"type":"result","is_error":true,"result":"boom"}"#,
                HealthStatus::OtherError,
            ),
        ];
        for (output, expected) in cases {
            assert_eq!(classify_health_output(output).status, expected, "{output}");
        }
    }

    #[test]
    fn tokens_without_text_still_count() {
        let output = r#"{"type":"result","is_error":false,"result":"","usage":{"output_tokens":2}}"#;
        assert_eq!(classify_health_output(output).status, HealthStatus::Healthy);
    }

    #[test]
    fn raw_text_falls_back_to_substrings() {
        assert_eq!(
            classify_health_output("Error: Unauthorized").status,
            HealthStatus::AuthError
        );
        assert_eq!(
            classify_health_output("HTTP 529").status,
            HealthStatus::Overloaded
        );
        assert_eq!(
            classify_health_output("command not found").status,
            HealthStatus::OtherError
        );
    }

    #[test]
    fn exit_codes_follow_health_table() {
        assert_eq!(HealthStatus::Healthy.exit_code(), 0);
        assert_eq!(HealthStatus::AuthError.exit_code(), 1);
        assert_eq!(HealthStatus::RateLimited.exit_code(), 2);
        assert_eq!(HealthStatus::OtherError.exit_code(), 3);
        assert_eq!(HealthStatus::Overloaded.exit_code(), 4);
    }
}
