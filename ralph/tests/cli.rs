//! CLI tests: spawn the ralph binary and check exit codes for paths that
//! never reach the assistant.

use std::process::Command;

use ralph::exit_codes;

fn ralph(config_dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ralph"));
    cmd.arg("--config")
        .arg(config_dir.join("missing.toml"))
        .env_remove("TELEGRAM_BOT_TOKEN")
        .env_remove("TELEGRAM_CHAT_ID")
        .current_dir(config_dir);
    cmd
}

#[test]
fn malformed_selector_exits_with_usage_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = ralph(temp.path())
        .args(["implement", "shop", "1", "3-x"])
        .output()
        .expect("ralph implement");

    assert_eq!(output.status.code(), Some(exit_codes::USAGE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("3-x"), "stderr: {stderr}");
}

#[test]
fn malformed_review_ref_exits_with_usage_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = ralph(temp.path())
        .args(["review", "shop-4"])
        .status()
        .expect("ralph review");

    assert_eq!(status.code(), Some(exit_codes::USAGE));
}

#[test]
fn invalid_config_is_a_runtime_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("ralph.toml");
    std::fs::write(&config, "recovery_delays_secs = []\n").expect("write config");

    let status = Command::new(env!("CARGO_BIN_EXE_ralph"))
        .arg("--config")
        .arg(&config)
        .args(["implement", "shop", "1"])
        .current_dir(temp.path())
        .status()
        .expect("ralph implement");

    assert_eq!(status.code(), Some(exit_codes::FAILED));
}

#[test]
fn help_lists_commands() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = ralph(temp.path())
        .arg("--help")
        .output()
        .expect("ralph --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["implement", "plan", "review", "health"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}
