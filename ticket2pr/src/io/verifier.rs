//! External verifiers (lint/format hooks, test commands).
//!
//! A verifier only reports pass/fail plus its output; repairing failures is
//! the retry loop's job. Verifiers that cannot run in a workspace report
//! themselves unavailable so the step is skipped instead of failed.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::io::config::VerifierSettings;
use crate::io::process::{ProcessLimits, run_command};
use crate::io::signals::CancelToken;

/// Whether a verifier can run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(String),
}

/// Result of one verifier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierOutcome {
    pub passed: bool,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub workdir: PathBuf,
    /// Files under verification (the staged change set).
    pub files: Vec<String>,
}

pub trait Verifier {
    fn name(&self) -> &str;
    fn availability(&self) -> Availability;
    fn run(&self, request: &VerifyRequest) -> Result<VerifierOutcome>;
}

/// Builds the verifiers the pipeline needs for a given workspace.
pub trait VerifierProvider {
    fn lint(&self, workdir: &Path) -> Box<dyn Verifier + '_>;
    fn tests(&self, workdir: &Path, commands: &[String]) -> Box<dyn Verifier + '_>;
}

/// Lint/format hook runner (`pre-commit run --files ...` by default).
pub struct LintVerifier {
    command: Vec<String>,
    config_path: PathBuf,
    limits: ProcessLimits,
}

impl Verifier for LintVerifier {
    fn name(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("lint")
    }

    fn availability(&self) -> Availability {
        let Some(program) = self.command.first() else {
            return Availability::Unavailable("no lint command configured".to_string());
        };
        if which::which(program).is_err() {
            return Availability::Unavailable(format!("{program} not found in PATH"));
        }
        if !self.config_path.is_file() {
            return Availability::Unavailable(format!(
                "{} not found in workspace",
                self.config_path.display()
            ));
        }
        Availability::Available
    }

    #[instrument(skip_all, fields(verifier = self.name(), files = request.files.len()))]
    fn run(&self, request: &VerifyRequest) -> Result<VerifierOutcome> {
        let Some((program, args)) = self.command.split_first() else {
            return Ok(VerifierOutcome {
                passed: false,
                output: "no lint command configured".to_string(),
            });
        };
        let existing: Vec<&String> = request
            .files
            .iter()
            .filter(|f| request.workdir.join(f).exists())
            .collect();
        let mut cmd = Command::new(program);
        cmd.args(args).args(existing).current_dir(&request.workdir);
        let out = run_command(cmd, None, &self.limits)?;
        debug!(exit_code = ?out.status.code(), "lint finished");
        Ok(VerifierOutcome {
            passed: out.success(),
            output: out.combined(self.name()),
        })
    }
}

/// Runs shell commands in order; passes only if every command exits 0.
pub struct CommandVerifier {
    commands: Vec<String>,
    limits: ProcessLimits,
}

impl Verifier for CommandVerifier {
    fn name(&self) -> &str {
        "tests"
    }

    fn availability(&self) -> Availability {
        if self.commands.is_empty() {
            return Availability::Unavailable("no test commands".to_string());
        }
        Availability::Available
    }

    #[instrument(skip_all, fields(commands = self.commands.len()))]
    fn run(&self, request: &VerifyRequest) -> Result<VerifierOutcome> {
        let mut output = String::new();
        for command in &self.commands {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command).current_dir(&request.workdir);
            let out = run_command(cmd, None, &self.limits)?;
            output.push_str(&format!("$ {command}\n"));
            output.push_str(&out.combined("command"));
            if !output.ends_with('\n') {
                output.push('\n');
            }
            if !out.success() {
                output.push_str(&format!("[exit status {:?}]\n", out.status.code()));
                return Ok(VerifierOutcome {
                    passed: false,
                    output,
                });
            }
        }
        Ok(VerifierOutcome {
            passed: true,
            output,
        })
    }
}

/// Production verifiers built from settings.
pub struct DefaultVerifiers {
    settings: VerifierSettings,
    cancel: CancelToken,
}

impl DefaultVerifiers {
    pub fn new(settings: VerifierSettings, cancel: CancelToken) -> Self {
        Self { settings, cancel }
    }

    fn limits(&self) -> ProcessLimits {
        ProcessLimits::new(
            Duration::from_secs(self.settings.timeout_secs),
            self.settings.output_limit_bytes,
        )
        .with_cancel(self.cancel.clone())
    }
}

impl VerifierProvider for DefaultVerifiers {
    fn lint(&self, workdir: &Path) -> Box<dyn Verifier + '_> {
        Box::new(LintVerifier {
            command: self.settings.lint_command.clone(),
            config_path: workdir.join(&self.settings.lint_config_file),
            limits: self.limits(),
        })
    }

    fn tests(&self, _workdir: &Path, commands: &[String]) -> Box<dyn Verifier + '_> {
        Box::new(CommandVerifier {
            commands: commands.to_vec(),
            limits: self.limits(),
        })
    }
}
