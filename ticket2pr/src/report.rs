//! Turns a finished run into the user-facing report and exit code.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::types::{ErrorDetail, StepResult, StepStatus};
use crate::engine::EngineOutcome;
use crate::error::PipelineError;
use crate::exit_codes;
use crate::io::workspace::ReleaseOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Interrupted,
}

/// Written to `report.json` and rendered on stdout.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub issue_key: String,
    pub status: RunStatus,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    pub base_branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_request_url: Option<String>,
    pub staged_files: Vec<String>,
    pub steps: Vec<StepResult>,
    pub workspace: ReleaseOutcome,
    pub run_dir: PathBuf,
}

pub struct ResultAggregator;

impl ResultAggregator {
    /// Build the report. Call only after the workspace lease was released.
    pub fn aggregate(
        outcome: &EngineOutcome,
        release: &ReleaseOutcome,
        run_id: &str,
        run_dir: &Path,
    ) -> RunReport {
        let ctx = &outcome.context;
        let (status, exit_code) = match &outcome.failure {
            None => (RunStatus::Success, exit_codes::OK),
            Some(f) if f.error == PipelineError::Interrupted => {
                (RunStatus::Interrupted, f.error.exit_code())
            }
            Some(f) => (RunStatus::Failed, f.error.exit_code()),
        };
        RunReport {
            run_id: run_id.to_string(),
            issue_key: ctx.issue_key().to_string(),
            status,
            exit_code,
            failed_step: outcome.failure.as_ref().map(|f| f.step.clone()),
            error: outcome.failure.as_ref().map(|f| f.error.detail()),
            ticket_url: ctx.issue().map(|issue| issue.url.clone()),
            branch_name: ctx.branch_name().map(str::to_string),
            base_branch: ctx.base_branch().to_string(),
            commit_sha: ctx.commit_sha().map(str::to_string),
            change_request_url: ctx.change_request().map(|cr| cr.url.clone()),
            staged_files: ctx.staged_files().files().iter().cloned().collect(),
            steps: ctx.step_history().to_vec(),
            workspace: release.clone(),
            run_dir: run_dir.to_path_buf(),
        }
    }
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Human-readable summary for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            let mark = match step.status {
                StepStatus::Success => "ok",
                StepStatus::Skipped => "skip",
                StepStatus::Failed => "FAIL",
            };
            let _ = write!(out, "  [{mark:>4}] {}", step.step);
            if let Some(reason) = &step.skip_reason {
                let _ = write!(out, " ({reason})");
            }
            if !step.attempts.is_empty() {
                let _ = write!(out, " ({} verifier attempts)", step.attempts.len());
            }
            out.push('\n');
        }
        out.push('\n');

        match (&self.failed_step, &self.error) {
            (Some(step), Some(error)) => {
                let _ = writeln!(
                    out,
                    "{} failed at step '{step}': {}",
                    self.issue_key, error.message
                );
            }
            _ => {
                let _ = writeln!(out, "{} done.", self.issue_key);
            }
        }
        if let Some(url) = &self.ticket_url {
            let _ = writeln!(out, "  ticket:         {url}");
        }
        if let Some(url) = &self.change_request_url {
            let _ = writeln!(out, "  change request: {url}");
        }
        if let Some(branch) = &self.branch_name {
            let _ = writeln!(out, "  branch:         {branch} (base {})", self.base_branch);
        }
        if let Some(error) = &self.workspace.error {
            let _ = writeln!(
                out,
                "  workspace {} was not removed: {error}",
                self.workspace.path.display()
            );
        }
        let _ = writeln!(out, "  diagnostics:    {}", self.run_dir.display());
        out
    }
}
