//! Operator-facing terminal output.
//!
//! Everything here goes to stdout and is meant for a human watching the run.
//! Developer diagnostics go through `tracing` on stderr instead.

use std::io::IsTerminal;

use colored::Colorize;

use crate::core::stream::{StreamEvent, StreamStats, parse_line};
use crate::core::types::format_duration;

/// Disable colour when stdout is not a terminal.
pub fn init_colors() {
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
}

pub fn header(title: &str) {
    let rule = "=".repeat(60);
    println!("\n{}", rule.bright_blue());
    println!("{}", title.bright_blue().bold());
    println!("{}", rule.bright_blue());
}

pub fn subheader(title: &str) {
    println!("\n{} {}", "──".blue(), title.bold());
}

pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

pub fn error(message: &str) {
    println!("{} {}", "✗".red().bold(), message.red());
}

pub fn warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

pub fn info(message: &str) {
    println!("{} {}", "→".cyan(), message);
}

pub fn dim(message: &str) {
    println!("  {}", message.dimmed());
}

pub fn kv(key: &str, value: &str) {
    println!("  {:<14} {}", format!("{key}:").dimmed(), value);
}

/// Renders assistant stream events as they arrive and keeps usage totals.
#[derive(Debug, Default)]
pub struct StreamMonitor {
    stats: StreamStats,
    quiet: bool,
}

impl StreamMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track totals without printing anything.
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn handle_line(&mut self, line: &str) {
        for event in parse_line(line) {
            self.stats.record(&event);
            if !self.quiet
                && let Some(rendered) = render_event(&event)
            {
                println!("{rendered}");
            }
        }
    }

    pub fn print_summary(&self, elapsed_secs: u64) {
        if self.quiet || self.stats.is_empty() {
            return;
        }
        println!("{}", render_summary(&self.stats, elapsed_secs));
    }
}

fn render_event(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::Init { session_id, model } => Some(format!(
            "{} session {} {}",
            "●".blue(),
            session_id.dimmed(),
            format!("({model})").dimmed()
        )),
        StreamEvent::Text(text) => {
            let first = text.lines().next().unwrap_or_default();
            if first.trim().is_empty() {
                return None;
            }
            let suffix = if text.lines().nth(1).is_some() { " …" } else { "" };
            Some(format!("  {}{}", first, suffix.dimmed()))
        }
        StreamEvent::Tool { name, detail } => Some(format!(
            "  {} {} {}",
            "▸".cyan(),
            name.cyan().bold(),
            detail.dimmed()
        )),
        StreamEvent::Result {
            input_tokens,
            output_tokens,
            cost_usd,
            error,
        } => {
            let metrics = format!(
                "  tokens in={input_tokens} out={output_tokens} cost=${cost_usd:.4}"
            );
            match error {
                Some(details) => Some(format!(
                    "{}\n  {} {}",
                    metrics.dimmed(),
                    "error:".red().bold(),
                    details.red()
                )),
                None => Some(metrics.dimmed().to_string()),
            }
        }
    }
}

fn render_summary(stats: &StreamStats, elapsed_secs: u64) -> String {
    format!(
        "{} {} tool calls, {} in / {} out tokens, ${:.4}, {}",
        "Σ".bold(),
        stats.tool_calls,
        stats.input_tokens,
        stats.output_tokens,
        stats.cost_usd,
        format_duration(elapsed_secs)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_accumulates_tools_and_usage() {
        let mut monitor = StreamMonitor::quiet();
        monitor.handle_line(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"a.rs"}}]}}"#,
        );
        monitor.handle_line("not json");
        monitor.handle_line(
            r#"{"type":"result","is_error":false,"total_cost_usd":0.5,"usage":{"input_tokens":10,"output_tokens":3}}"#,
        );
        assert_eq!(monitor.stats().tool_calls, 1);
        assert_eq!(monitor.stats().input_tokens, 10);
        assert_eq!(monitor.stats().output_tokens, 3);
    }

    #[test]
    fn tool_event_shows_name_and_detail() {
        let rendered = render_event(&StreamEvent::Tool {
            name: "Edit".to_string(),
            detail: "src/lib.rs".to_string(),
        })
        .expect("rendered");
        assert!(rendered.contains("Edit"));
        assert!(rendered.contains("src/lib.rs"));
    }

    #[test]
    fn summary_includes_duration() {
        let stats = StreamStats {
            tool_calls: 4,
            ..StreamStats::default()
        };
        let rendered = render_summary(&stats, 3725);
        assert!(rendered.contains("4 tool calls"));
        assert!(rendered.contains("01:02:05"));
    }
}
