//! Exit-code contract of the `ticket2pr` binary for failures that happen
//! before any collaborator is contacted.

use std::path::Path;
use std::process::{Command, Output};

use ticket2pr::exit_codes;

fn ticket2pr(cwd: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ticket2pr"));
    cmd.args(args)
        .current_dir(cwd)
        .env_remove("TICKET2PR_CONFIG")
        .env("HOME", cwd);
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("spawn ticket2pr")
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

#[test]
fn invalid_issue_exits_with_invalid_input() {
    let dir = tempfile::tempdir().expect("tempdir");

    let out = run(&mut ticket2pr(dir.path(), &["run", "not an issue"]));

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(stderr(&out).contains("is not an issue key"), "{}", stderr(&out));
}

/// Verifies usage errors keep clap's exit code.
#[test]
fn unknown_flag_is_a_usage_error() {
    let dir = tempfile::tempdir().expect("tempdir");

    let out = run(&mut ticket2pr(dir.path(), &["run", "PROJ-1", "--no-such-flag"]));

    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn missing_settings_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("absent.toml");

    let out = run(&mut ticket2pr(
        dir.path(),
        &["--config", &config.to_string_lossy(), "run", "PROJ-1"],
    ));

    assert_eq!(out.status.code(), Some(exit_codes::CONFIG));
    assert!(stderr(&out).contains("ticket2pr init"), "{}", stderr(&out));
}

/// Verifies an incomplete settings file named by the environment fails validation.
#[test]
fn incomplete_settings_from_env_are_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[jira]\nbase_url = \"https://acme.atlassian.net\"\n")
        .expect("write config");

    let out = run(
        ticket2pr(dir.path(), &["run", "PROJ-1"]).env("TICKET2PR_CONFIG", &config),
    );

    assert_eq!(out.status.code(), Some(exit_codes::CONFIG));
    assert!(stderr(&out).contains("jira.api_token is required"), "{}", stderr(&out));
}

#[test]
fn bare_invocation_with_settings_prints_help() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "").expect("write config");

    let out = run(&mut ticket2pr(dir.path(), &["--config", &config.to_string_lossy()]));

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Usage"));
}
