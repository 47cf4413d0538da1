//! Autonomous task runner for the `claude` CLI.
//!
//! `ralph implement` works through a queue of tasks unattended, waiting out
//! API outages and resuming interrupted sessions. `plan`, `review`, and
//! `health` cover the rest of the task lifecycle.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ralph::core::types::TaskRef;
use ralph::core::usage::UsageError;
use ralph::exit_codes;
use ralph::health::run_health;
use ralph::implement::{Collaborators, ImplementRequest, run_implement};
use ralph::io::assistant::ClaudeAssistant;
use ralph::io::config::{Config, default_config_path, load_config};
use ralph::io::console;
use ralph::io::git::Git;
use ralph::io::health::ClaudeHealthCheck;
use ralph::io::notify::notifier_from_config;
use ralph::plan::{ClaudePlanner, run_plan};
use ralph::recovery::ThreadSleeper;
use ralph::review::{ReviewRequest, run_review};

#[derive(Parser)]
#[command(
    name = "ralph",
    version,
    about = "Autonomous task runner for the claude CLI with automatic recovery"
)]
struct Cli {
    /// Config file (default: ~/.claude/ralph.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level diagnostics on stderr (RUST_LOG overrides).
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run tasks autonomously, one after another.
    Implement {
        project: String,
        /// Task numbers and ranges, e.g. `1-5 7 9-11`.
        #[arg(required = true, num_args = 1..)]
        tasks: Vec<String>,
        /// Directory the assistant works in (default: current directory).
        #[arg(short, long)]
        working_dir: Option<PathBuf>,
        /// Spend cap in USD forwarded to the assistant.
        #[arg(long)]
        max_budget: Option<f64>,
        /// Fail on API errors instead of waiting for recovery.
        #[arg(long)]
        no_recovery: bool,
    },
    /// Plan tasks interactively.
    Plan {
        project: String,
        #[arg(required = true, num_args = 1..)]
        tasks: Vec<String>,
        #[arg(short, long)]
        working_dir: Option<PathBuf>,
    },
    /// Run every configured review on one task (`project#n`).
    Review {
        task_ref: String,
        #[arg(short, long)]
        working_dir: Option<PathBuf>,
    },
    /// Probe the assistant API. Exit code reflects the status.
    Health {
        /// Print the probe's message.
        #[arg(short = 'v', long = "details")]
        details: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    ralph::logging::init(cli.verbose);
    console::init_colors();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            if let Some(usage) = err.downcast_ref::<UsageError>() {
                eprintln!("error: {usage}");
                std::process::exit(exit_codes::USAGE);
            }
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path)?;

    match cli.command {
        Command::Implement {
            project,
            tasks,
            working_dir,
            max_budget,
            no_recovery,
        } => {
            if no_recovery {
                config.recovery_enabled = false;
            }
            if let Some(budget) = max_budget {
                if !budget.is_finite() || budget <= 0.0 {
                    return Err(UsageError::new("--max-budget must be a positive number").into());
                }
                config.max_budget_usd = Some(budget);
            }
            let request = ImplementRequest {
                project,
                selectors: tasks,
                working_dir: resolve_working_dir(working_dir)?,
            };
            cmd_implement(&config, &request)
        }
        Command::Plan {
            project,
            tasks,
            working_dir,
        } => {
            let request = ImplementRequest {
                project,
                selectors: tasks,
                working_dir: resolve_working_dir(working_dir)?,
            };
            let workspace = Git::new(&request.working_dir);
            let planner = ClaudePlanner::new(&config, &request.working_dir);
            let record = run_plan(&config, &request, &workspace, &planner)?;
            Ok(record.exit_code())
        }
        Command::Review {
            task_ref,
            working_dir,
        } => {
            let task: TaskRef = task_ref.parse()?;
            let request = ReviewRequest::new(task, resolve_working_dir(working_dir)?);
            Ok(run_review(&config, &request)?.exit_code)
        }
        Command::Health { details } => Ok(run_health(&ClaudeHealthCheck::new(&config), details)),
    }
}

fn cmd_implement(config: &Config, request: &ImplementRequest) -> Result<i32> {
    let assistant = ClaudeAssistant::new(config, &request.working_dir);
    let health = ClaudeHealthCheck::new(config);
    let notifier = notifier_from_config(&config.telegram);
    let workspace = Git::new(&request.working_dir);
    let deps = Collaborators {
        assistant: &assistant,
        health: &health,
        notifier: notifier.as_ref(),
        workspace: &workspace,
        sleeper: &ThreadSleeper,
    };
    let report = run_implement(config, request, &deps)?;
    console::dim(&format!("Audit log: {}", report.audit_path.display()));
    Ok(report.exit_code)
}

fn resolve_working_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("resolve current directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_implement_with_flags() {
        let cli = Cli::parse_from([
            "ralph",
            "implement",
            "shop",
            "1-3",
            "7",
            "-w",
            "/tmp/shop",
            "--max-budget",
            "12.5",
            "--no-recovery",
        ]);
        match cli.command {
            Command::Implement {
                project,
                tasks,
                working_dir,
                max_budget,
                no_recovery,
            } => {
                assert_eq!(project, "shop");
                assert_eq!(tasks, vec!["1-3", "7"]);
                assert_eq!(working_dir, Some(PathBuf::from("/tmp/shop")));
                assert_eq!(max_budget, Some(12.5));
                assert!(no_recovery);
            }
            _ => panic!("expected implement"),
        }
    }

    #[test]
    fn implement_requires_tasks() {
        assert!(Cli::try_parse_from(["ralph", "implement", "shop"]).is_err());
    }

    #[test]
    fn parse_health_details_and_global_config() {
        let cli = Cli::parse_from(["ralph", "health", "-v", "--config", "/tmp/r.toml"]);
        assert!(matches!(cli.command, Command::Health { details: true }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/r.toml")));
    }
}
