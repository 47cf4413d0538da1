//! Git adapter for pre-task workspace cleanup.
//!
//! Every task starts from the last committed state: uncommitted leftovers
//! from an earlier failed attempt are discarded before the assistant runs.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

impl StatusEntry {
    pub fn is_untracked(&self) -> bool {
        self.code == "??"
    }
}

/// Something that can be reset to a clean state before a task.
pub trait Workspace {
    /// Discard uncommitted changes; returns the paths that were dirty.
    fn reset(&self) -> Result<Vec<String>>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Status entries in porcelain format (untracked directories collapsed).
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1"])?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    /// Restore tracked files and delete untracked files and directories.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn reset_worktree(&self) -> Result<Vec<String>> {
        let entries = self.status_porcelain()?;
        if entries.is_empty() {
            debug!("worktree already clean");
            return Ok(Vec::new());
        }
        let untracked = entries.iter().filter(|e| e.is_untracked()).count();
        let tracked = entries.len() - untracked;
        if tracked > 0 {
            self.run_checked(&["checkout", "--", "."])?;
        }
        if untracked > 0 {
            self.run_checked(&["clean", "-fd"])?;
        }
        debug!(tracked, untracked, "worktree reset");
        Ok(entries.into_iter().map(|entry| entry.path).collect())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = %args.join(" "), "git command failed");
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl Workspace for Git {
    fn reset(&self) -> Result<Vec<String>> {
        self.reset_worktree()
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 || !line.is_char_boundary(3) {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::init_git_repo;
    use std::fs;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? build/").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "build/".to_string()
            }
        );
    }

    #[test]
    fn parses_staged_and_unstaged_lines() {
        let modified = parse_status_line("MM src/lib.rs").expect("parse");
        assert_eq!(modified.code, "MM");
        assert!(!modified.is_untracked());
        assert!(parse_status_line("?? a.txt").expect("parse").is_untracked());
        assert_eq!(
            parse_status_line(" D gone.txt").expect("parse").path,
            "gone.txt"
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn rejects_short_line() {
        assert!(parse_status_line("M").is_err());
    }

    #[test]
    fn reset_discards_edits_and_untracked_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        fs::write(temp.path().join("README.md"), "changed\n").expect("edit");
        fs::create_dir_all(temp.path().join("scratch")).expect("mkdir");
        fs::write(temp.path().join("scratch").join("notes.txt"), "x").expect("write");

        let git = Git::new(temp.path());
        let mut discarded = git.reset().expect("reset");
        discarded.sort();
        assert_eq!(discarded, vec!["README.md".to_string(), "scratch/".to_string()]);

        assert_eq!(
            fs::read_to_string(temp.path().join("README.md")).expect("read"),
            "hi\n"
        );
        assert!(!temp.path().join("scratch").exists());
        assert!(git.status_porcelain().expect("status").is_empty());
    }

    #[test]
    fn reset_with_only_untracked_files_cleans_them() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        fs::write(temp.path().join("stray.txt"), "x").expect("write");

        let git = Git::new(temp.path());
        let entries = git.status_porcelain().expect("status");
        assert!(entries.iter().all(StatusEntry::is_untracked));
        assert_eq!(git.reset().expect("reset"), vec!["stray.txt".to_string()]);
        assert!(!temp.path().join("stray.txt").exists());
    }

    #[test]
    fn reset_on_clean_tree_is_a_no_op() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        assert!(Git::new(temp.path()).reset().expect("reset").is_empty());
    }
}
